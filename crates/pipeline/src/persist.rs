//! Turn persistence with bounded retries

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parley_persistence::{
    ConversationRepository, NewConversation, PersistedTurn, PersistenceError, TurnRecord,
};
use uuid::Uuid;

use crate::gate::PersistGate;

/// Where a turn is written
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistTarget {
    /// First turn: the conversation is created with this metadata
    First(NewConversation),
    /// Later turn of an existing conversation
    Subsequent { conversation_id: Uuid, user_id: String },
}

/// Shared state of a turn awaiting persistence
///
/// The record is frozen before the gate becomes ready, so whichever path
/// claims the gate sees the complete turn.
#[derive(Debug)]
pub struct PendingTurn {
    pub gate: PersistGate,
    record: OnceLock<TurnRecord>,
    target: PersistTarget,
}

impl PendingTurn {
    pub fn new(target: PersistTarget) -> Self {
        Self {
            gate: PersistGate::new(),
            record: OnceLock::new(),
            target,
        }
    }

    /// Freeze the completed turn and open the gate
    pub fn ready(&self, record: TurnRecord) {
        if self.record.set(record).is_ok() {
            self.gate.mark_ready();
        }
    }

    pub fn record(&self) -> Option<&TurnRecord> {
        self.record.get()
    }

    pub fn target(&self) -> &PersistTarget {
        &self.target
    }
}

/// Writes completed turns through the repository
pub struct TurnPersister {
    repo: Arc<dyn ConversationRepository>,
    timeout: Duration,
    retries: u32,
}

impl TurnPersister {
    pub fn new(repo: Arc<dyn ConversationRepository>, timeout: Duration, retries: u32) -> Self {
        Self {
            repo,
            timeout,
            retries,
        }
    }

    pub fn backend(&self) -> &'static str {
        self.repo.backend()
    }

    /// Persist a claimed turn
    ///
    /// Transient storage errors are retried with exponential backoff; the
    /// whole attempt, retries included, is bounded by the timeout.
    pub async fn persist(&self, pending: &PendingTurn) -> Result<PersistedTurn, PersistenceError> {
        let record = pending.record().ok_or_else(|| {
            PersistenceError::InvalidData("turn persisted before completion".to_string())
        })?;

        match tokio::time::timeout(self.timeout, self.save_with_retry(pending.target(), record)).await {
            Ok(result) => result,
            Err(_) => Err(PersistenceError::Timeout(self.timeout)),
        }
    }

    async fn save_with_retry(
        &self,
        target: &PersistTarget,
        record: &TurnRecord,
    ) -> Result<PersistedTurn, PersistenceError> {
        let mut attempt = 0;
        loop {
            let result = match target {
                PersistTarget::First(conversation) => self.repo.save_first(conversation, record).await,
                PersistTarget::Subsequent {
                    conversation_id,
                    user_id,
                } => {
                    self.repo
                        .save_subsequent(*conversation_id, user_id, record)
                        .await
                }
            };

            match result {
                Err(e) if e.is_transient() && attempt < self.retries => {
                    let backoff = Duration::from_millis(50 * 2u64.pow(attempt));
                    attempt += 1;
                    tracing::warn!(
                        error = %e,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        turn_id = %record.turn_id,
                        "Transient storage error, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
                other => return other,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use parley_core::{Language, Level};
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails with the queued errors before delegating to an in-memory store
    struct FlakyRepository {
        failures: Mutex<Vec<PersistenceError>>,
        calls: AtomicU32,
        delay: Duration,
        inner: parley_persistence::InMemoryConversationRepository,
    }

    impl FlakyRepository {
        fn new(failures: Vec<PersistenceError>) -> Self {
            Self {
                failures: Mutex::new(failures),
                calls: AtomicU32::new(0),
                delay: Duration::ZERO,
                inner: parley_persistence::InMemoryConversationRepository::new(),
            }
        }
    }

    #[async_trait]
    impl ConversationRepository for FlakyRepository {
        async fn save_first(
            &self,
            conversation: &NewConversation,
            turn: &TurnRecord,
        ) -> Result<PersistedTurn, PersistenceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            let failure = self.failures.lock().pop();
            match failure {
                Some(e) => Err(e),
                None => self.inner.save_first(conversation, turn).await,
            }
        }

        async fn save_subsequent(
            &self,
            conversation_id: Uuid,
            user_id: &str,
            turn: &TurnRecord,
        ) -> Result<PersistedTurn, PersistenceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.save_subsequent(conversation_id, user_id, turn).await
        }

        fn backend(&self) -> &'static str {
            "flaky"
        }
    }

    fn pending_first() -> PendingTurn {
        let pending = PendingTurn::new(PersistTarget::First(NewConversation {
            conversation_id: Uuid::new_v4(),
            user_id: "u1".to_string(),
            native_language: Language::En,
            target_language: Language::De,
            level: Level::B1,
            provider: "openai".to_string(),
            model: "gpt-4.1-mini".to_string(),
        }));
        pending.ready(TurnRecord {
            turn_id: Uuid::new_v4(),
            user_text: "Ich bin müde".to_string(),
            assistant_text: "Warum denn?".to_string(),
            corrections: Vec::new(),
        });
        pending
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_are_retried() {
        let repo = Arc::new(FlakyRepository::new(vec![
            PersistenceError::Database(sqlx::Error::PoolTimedOut),
            PersistenceError::Database(sqlx::Error::PoolTimedOut),
        ]));
        let persister = TurnPersister::new(repo.clone(), Duration::from_secs(10), 2);

        let saved = persister.persist(&pending_first()).await.unwrap();
        assert_eq!(saved.messages.len(), 2);
        assert_eq!(repo.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_are_bounded() {
        let repo = Arc::new(FlakyRepository::new(vec![
            PersistenceError::Database(sqlx::Error::PoolTimedOut),
            PersistenceError::Database(sqlx::Error::PoolTimedOut),
            PersistenceError::Database(sqlx::Error::PoolTimedOut),
        ]));
        let persister = TurnPersister::new(repo.clone(), Duration::from_secs(10), 2);

        assert!(persister.persist(&pending_first()).await.is_err());
        assert_eq!(repo.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_terminal_errors_are_not_retried() {
        let repo = Arc::new(FlakyRepository::new(vec![PersistenceError::AccessDenied {
            conversation_id: Uuid::nil(),
        }]));
        let persister = TurnPersister::new(repo.clone(), Duration::from_secs(10), 2);

        let err = persister.persist(&pending_first()).await.unwrap_err();
        assert!(matches!(err, PersistenceError::AccessDenied { .. }));
        assert_eq!(repo.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_is_bounded_by_timeout() {
        let mut repo = FlakyRepository::new(Vec::new());
        repo.delay = Duration::from_secs(30);
        let persister = TurnPersister::new(Arc::new(repo), Duration::from_secs(10), 2);

        let err = persister.persist(&pending_first()).await.unwrap_err();
        assert!(matches!(err, PersistenceError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_incomplete_turn_is_rejected() {
        let persister = TurnPersister::new(
            Arc::new(FlakyRepository::new(Vec::new())),
            Duration::from_secs(10),
            2,
        );
        let pending = PendingTurn::new(PersistTarget::Subsequent {
            conversation_id: Uuid::new_v4(),
            user_id: "u1".to_string(),
        });

        assert!(persister.persist(&pending).await.is_err());
    }
}
