//! Postgres schema creation

use crate::error::PersistenceError;
use sqlx::PgPool;

/// Arbitrary key serialising concurrent schema bootstraps
const SCHEMA_LOCK_KEY: i64 = 0x7061_726c_6579;

const CREATE_CONVERSATION: &str = r#"
    CREATE TABLE IF NOT EXISTS conversation (
        id UUID PRIMARY KEY,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        user_id TEXT NOT NULL,
        title TEXT,
        native_language TEXT NOT NULL
            CHECK (native_language IN ('en', 'es', 'fr', 'de', 'pt', 'it', 'ja', 'zh', 'ko', 'ru', 'he')),
        target_language TEXT NOT NULL
            CHECK (target_language IN ('en', 'es', 'fr', 'de', 'pt', 'it', 'ja', 'zh', 'ko', 'ru', 'he')),
        level TEXT NOT NULL CHECK (level IN ('A1', 'A2', 'B1', 'B2', 'C1', 'C2')),
        provider TEXT NOT NULL,
        model TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'active'
    )
"#;

const CREATE_CONVERSATION_USER_INDEX: &str = r#"
    CREATE INDEX IF NOT EXISTS conversation_user_updated_idx
        ON conversation (user_id, updated_at DESC)
"#;

// gen_random_uuid() is built in from Postgres 13
const CREATE_MESSAGE: &str = r#"
    CREATE TABLE IF NOT EXISTS message (
        id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        conversation_id UUID NOT NULL REFERENCES conversation (id) ON DELETE CASCADE,
        turn_id UUID NOT NULL,
        role TEXT NOT NULL CHECK (role IN ('user', 'assistant')),
        content TEXT NOT NULL,
        ordinal INTEGER NOT NULL CHECK (ordinal >= 0),
        CONSTRAINT message_conversation_ordinal_key UNIQUE (conversation_id, ordinal),
        CONSTRAINT message_conversation_turn_role_key UNIQUE (conversation_id, turn_id, role)
    )
"#;

const CREATE_CORRECTION: &str = r#"
    CREATE TABLE IF NOT EXISTS correction (
        id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        message_id UUID NOT NULL REFERENCES message (id) ON DELETE CASCADE,
        category TEXT NOT NULL
            CHECK (category IN ('grammar', 'vocabulary', 'spelling', 'word order', 'conjugation')),
        original TEXT NOT NULL,
        correction TEXT NOT NULL,
        explanation TEXT NOT NULL
    )
"#;

const CREATE_CORRECTION_MESSAGE_INDEX: &str = r#"
    CREATE INDEX IF NOT EXISTS correction_message_idx ON correction (message_id)
"#;

/// Create all required tables
///
/// Idempotent, and safe to run from several processes at once: the
/// statements run in one transaction behind an advisory lock.
pub async fn create_tables(pool: &PgPool) -> Result<(), PersistenceError> {
    let mut tx = pool.begin().await?;

    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(SCHEMA_LOCK_KEY)
        .execute(&mut *tx)
        .await?;

    let statements = [
        ("conversation", CREATE_CONVERSATION),
        ("conversation index", CREATE_CONVERSATION_USER_INDEX),
        ("message", CREATE_MESSAGE),
        ("correction", CREATE_CORRECTION),
        ("correction index", CREATE_CORRECTION_MESSAGE_INDEX),
    ];

    for (name, statement) in statements {
        sqlx::query(statement)
            .execute(&mut *tx)
            .await
            .map_err(|e| PersistenceError::SchemaError(format!("Failed to create {}: {}", name, e)))?;
    }

    tx.commit().await?;
    Ok(())
}
