//! Conversation turn persistence using Postgres
//!
//! Each turn writes two messages (user, assistant) and the corrections
//! reported for the user message. Message ordinals are assigned under a
//! row lock on the conversation so concurrent turns never collide.

use crate::{PersistenceError, PgClient};
use async_trait::async_trait;
use parley_core::{
    Correction, Language, Level, PersistedCorrection, PersistedMessage, Role,
};
use sqlx::PgConnection;
use uuid::Uuid;

/// Metadata of a conversation created by its first turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewConversation {
    pub conversation_id: Uuid,
    pub user_id: String,
    pub native_language: Language,
    pub target_language: Language,
    pub level: Level,
    /// Generator provider, e.g. "openai"
    pub provider: String,
    pub model: String,
}

/// The content of one completed turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnRecord {
    /// Server-generated; makes repeated writes of the same turn converge
    pub turn_id: Uuid,
    pub user_text: String,
    pub assistant_text: String,
    pub corrections: Vec<Correction>,
}

/// Rows written for a turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedTurn {
    pub conversation_id: Uuid,
    pub messages: Vec<PersistedMessage>,
    pub corrections: Vec<PersistedCorrection>,
}

/// Conversation store trait
#[async_trait]
pub trait ConversationRepository: Send + Sync {
    /// Create the conversation and store its first turn at ordinals 0 and 1
    async fn save_first(
        &self,
        conversation: &NewConversation,
        turn: &TurnRecord,
    ) -> Result<PersistedTurn, PersistenceError>;

    /// Append a turn at the next two free ordinals
    ///
    /// Fails with `AccessDenied` when the conversation does not belong
    /// to `user_id`.
    async fn save_subsequent(
        &self,
        conversation_id: Uuid,
        user_id: &str,
        turn: &TurnRecord,
    ) -> Result<PersistedTurn, PersistenceError>;

    /// Short backend name for readiness reporting
    fn backend(&self) -> &'static str;
}

/// Postgres implementation of the conversation store
#[derive(Clone)]
pub struct PgConversationRepository {
    client: PgClient,
}

impl PgConversationRepository {
    pub fn new(client: PgClient) -> Self {
        Self { client }
    }
}

/// Lock the conversation row if `user_id` owns it
///
/// The `UPDATE` takes a row-level exclusive lock held until commit, so
/// every writer of this conversation is serialised here. It must run
/// before the maximum ordinal is read.
async fn lock_conversation(
    conn: &mut PgConnection,
    conversation_id: Uuid,
    user_id: &str,
) -> Result<(), PersistenceError> {
    let locked: Option<Uuid> = sqlx::query_scalar(
        "UPDATE conversation SET updated_at = now() WHERE id = $1 AND user_id = $2 RETURNING id",
    )
    .bind(conversation_id)
    .bind(user_id)
    .fetch_optional(&mut *conn)
    .await?;

    match locked {
        Some(_) => Ok(()),
        None => Err(PersistenceError::AccessDenied { conversation_id }),
    }
}

async fn next_ordinal(conn: &mut PgConnection, conversation_id: Uuid) -> Result<i32, PersistenceError> {
    let next: i32 = sqlx::query_scalar(
        "SELECT COALESCE(MAX(ordinal), -1) + 1 FROM message WHERE conversation_id = $1",
    )
    .bind(conversation_id)
    .fetch_one(&mut *conn)
    .await?;

    Ok(next)
}

/// Insert or refresh one message of a turn, returning the stored row
///
/// A conflict on (conversation, turn, role) means this turn was already
/// written; the content is refreshed and the original ordinal kept.
async fn upsert_message(
    conn: &mut PgConnection,
    conversation_id: Uuid,
    turn_id: Uuid,
    role: Role,
    content: &str,
    ordinal: i32,
) -> Result<PersistedMessage, PersistenceError> {
    let id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO message (conversation_id, turn_id, role, content, ordinal)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (conversation_id, turn_id, role) DO UPDATE SET content = EXCLUDED.content
        RETURNING id
        "#,
    )
    .bind(conversation_id)
    .bind(turn_id)
    .bind(role.as_str())
    .bind(content)
    .bind(ordinal)
    .fetch_one(&mut *conn)
    .await?;

    Ok(PersistedMessage {
        id,
        role,
        content: content.to_string(),
    })
}

/// Replace the corrections attached to a user message
async fn replace_corrections(
    conn: &mut PgConnection,
    message_id: Uuid,
    corrections: &[Correction],
) -> Result<Vec<PersistedCorrection>, PersistenceError> {
    sqlx::query("DELETE FROM correction WHERE message_id = $1")
        .bind(message_id)
        .execute(&mut *conn)
        .await?;

    let mut persisted = Vec::with_capacity(corrections.len());
    for c in corrections {
        sqlx::query(
            r#"
            INSERT INTO correction (message_id, category, original, correction, explanation)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(message_id)
        .bind(c.category.as_str())
        .bind(&c.original)
        .bind(&c.correction)
        .bind(&c.explanation)
        .execute(&mut *conn)
        .await?;

        persisted.push(PersistedCorrection {
            message_id,
            category: c.category,
            original: c.original.clone(),
            correction: c.correction.clone(),
            explanation: c.explanation.clone(),
        });
    }

    Ok(persisted)
}

async fn write_turn(
    conn: &mut PgConnection,
    conversation_id: Uuid,
    first_ordinal: i32,
    turn: &TurnRecord,
) -> Result<PersistedTurn, PersistenceError> {
    let user = upsert_message(
        conn,
        conversation_id,
        turn.turn_id,
        Role::User,
        &turn.user_text,
        first_ordinal,
    )
    .await?;

    let assistant = upsert_message(
        conn,
        conversation_id,
        turn.turn_id,
        Role::Assistant,
        &turn.assistant_text,
        first_ordinal + 1,
    )
    .await?;

    let corrections = replace_corrections(conn, user.id, &turn.corrections).await?;

    Ok(PersistedTurn {
        conversation_id,
        messages: vec![user, assistant],
        corrections,
    })
}

#[async_trait]
impl ConversationRepository for PgConversationRepository {
    async fn save_first(
        &self,
        conversation: &NewConversation,
        turn: &TurnRecord,
    ) -> Result<PersistedTurn, PersistenceError> {
        let mut tx = self.client.pool().begin().await?;

        sqlx::query(
            r#"
            INSERT INTO conversation (id, user_id, native_language, target_language, level, provider, model)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(conversation.conversation_id)
        .bind(&conversation.user_id)
        .bind(conversation.native_language.code())
        .bind(conversation.target_language.code())
        .bind(conversation.level.as_str())
        .bind(&conversation.provider)
        .bind(&conversation.model)
        .execute(&mut *tx)
        .await?;

        // An existing row with this id must belong to the same user
        lock_conversation(&mut tx, conversation.conversation_id, &conversation.user_id).await?;

        let persisted = write_turn(&mut tx, conversation.conversation_id, 0, turn).await?;
        tx.commit().await?;

        tracing::info!(
            conversation_id = %conversation.conversation_id,
            turn_id = %turn.turn_id,
            corrections = persisted.corrections.len(),
            "Conversation created"
        );

        Ok(persisted)
    }

    async fn save_subsequent(
        &self,
        conversation_id: Uuid,
        user_id: &str,
        turn: &TurnRecord,
    ) -> Result<PersistedTurn, PersistenceError> {
        let mut tx = self.client.pool().begin().await?;

        // Do not reorder: the lock must be held before ordinals are read
        lock_conversation(&mut tx, conversation_id, user_id).await?;
        let ordinal = next_ordinal(&mut tx, conversation_id).await?;

        let persisted = write_turn(&mut tx, conversation_id, ordinal, turn).await?;
        tx.commit().await?;

        tracing::debug!(
            conversation_id = %conversation_id,
            turn_id = %turn.turn_id,
            ordinal,
            "Turn appended"
        );

        Ok(persisted)
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }
}
