//! Persistence layer for parley
//!
//! Provides durable storage for:
//! - Conversations and their metadata
//! - Messages with contiguous per-conversation ordinals
//! - Corrections reported for user messages
//!
//! The Postgres store is the production backend; the in-memory store
//! keeps the same contract for development and tests.

pub mod client;
pub mod conversations;
pub mod error;
pub mod memory;
pub mod schema;

pub use client::{PgClient, PgConfig};
pub use conversations::{
    ConversationRepository, NewConversation, PersistedTurn, PgConversationRepository, TurnRecord,
};
pub use error::{is_transient_sqlstate, PersistenceError};
pub use memory::InMemoryConversationRepository;

/// Connect to Postgres and optionally bootstrap the schema
///
/// # Arguments
/// * `config` - Connection settings
/// * `ensure_schema` - Create missing tables before returning
pub async fn init(config: &PgConfig, ensure_schema: bool) -> Result<PersistenceLayer, PersistenceError> {
    let client = PgClient::connect(config).await?;
    if ensure_schema {
        client.ensure_schema().await?;
    }

    Ok(PersistenceLayer {
        conversations: PgConversationRepository::new(client.clone()),
        client,
    })
}

/// Combined persistence layer with all services
pub struct PersistenceLayer {
    pub client: PgClient,
    pub conversations: PgConversationRepository,
}
