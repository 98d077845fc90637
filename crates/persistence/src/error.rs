//! Persistence errors and transient-failure classification

use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The conversation does not exist or belongs to another user
    #[error("Conversation {conversation_id} is not accessible to this user")]
    AccessDenied { conversation_id: Uuid },

    #[error("Persistence timed out after {0:?}")]
    Timeout(Duration),

    #[error("Schema error: {0}")]
    SchemaError(String),

    #[error("Invalid stored data: {0}")]
    InvalidData(String),
}

impl PersistenceError {
    /// Postgres SQLSTATE of the underlying error, if any
    pub fn sqlstate(&self) -> Option<String> {
        match self {
            Self::Database(sqlx::Error::Database(db)) => db.code().map(|c| c.into_owned()),
            _ => None,
        }
    }

    /// Whether retrying the same transaction may succeed
    ///
    /// Lock conflicts, deadlocks, serialization failures and lost
    /// connections are transient. Everything else, including
    /// `AccessDenied` and the outer timeout, is terminal.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Database(sqlx::Error::Database(db)) => {
                db.code().map_or(false, |code| is_transient_sqlstate(&code))
            }
            Self::Database(sqlx::Error::Io(_)) | Self::Database(sqlx::Error::PoolTimedOut) => true,
            _ => false,
        }
    }
}

/// Transient Postgres error codes
///
/// `40P01` deadlock, `40001` serialization failure, `55P03` lock not
/// available, class `08` connection exceptions, class `57P` operator
/// intervention (admin shutdown, crash recovery).
pub fn is_transient_sqlstate(code: &str) -> bool {
    matches!(code, "40P01" | "40001" | "55P03") || code.starts_with("08") || code.starts_with("57P")
}
