//! In-memory conversation store
//!
//! Follows the same contract as the Postgres store (ownership check,
//! contiguous ordinals, idempotent writes per turn). Used when
//! persistence is disabled and in tests.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use parley_core::{Correction, PersistedCorrection, PersistedMessage, Role};
use uuid::Uuid;

use crate::conversations::{ConversationRepository, NewConversation, PersistedTurn, TurnRecord};
use crate::PersistenceError;

#[derive(Debug, Clone)]
struct StoredMessage {
    id: Uuid,
    turn_id: Uuid,
    role: Role,
    content: String,
    ordinal: i32,
}

#[derive(Debug)]
struct StoredConversation {
    meta: NewConversation,
    messages: Vec<StoredMessage>,
    corrections: HashMap<Uuid, Vec<Correction>>,
}

impl StoredConversation {
    fn next_ordinal(&self) -> i32 {
        self.messages.iter().map(|m| m.ordinal).max().map_or(0, |max| max + 1)
    }

    fn upsert(&mut self, turn_id: Uuid, role: Role, content: &str, ordinal: i32) -> PersistedMessage {
        let existing = self
            .messages
            .iter_mut()
            .find(|m| m.turn_id == turn_id && m.role == role);

        let id = match existing {
            Some(message) => {
                message.content = content.to_string();
                message.id
            }
            None => {
                let id = Uuid::new_v4();
                self.messages.push(StoredMessage {
                    id,
                    turn_id,
                    role,
                    content: content.to_string(),
                    ordinal,
                });
                id
            }
        };

        PersistedMessage {
            id,
            role,
            content: content.to_string(),
        }
    }

    fn write_turn(&mut self, conversation_id: Uuid, first_ordinal: i32, turn: &TurnRecord) -> PersistedTurn {
        let user = self.upsert(turn.turn_id, Role::User, &turn.user_text, first_ordinal);
        let assistant = self.upsert(
            turn.turn_id,
            Role::Assistant,
            &turn.assistant_text,
            first_ordinal + 1,
        );

        self.corrections.insert(user.id, turn.corrections.clone());
        let corrections = turn
            .corrections
            .iter()
            .map(|c| PersistedCorrection {
                message_id: user.id,
                category: c.category,
                original: c.original.clone(),
                correction: c.correction.clone(),
                explanation: c.explanation.clone(),
            })
            .collect();

        PersistedTurn {
            conversation_id,
            messages: vec![user, assistant],
            corrections,
        }
    }
}

/// Mutex-guarded conversation store
#[derive(Default)]
pub struct InMemoryConversationRepository {
    conversations: Mutex<HashMap<Uuid, StoredConversation>>,
}

impl InMemoryConversationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages of a conversation ordered by ordinal, as (ordinal, role, content)
    pub fn messages(&self, conversation_id: Uuid) -> Vec<(i32, Role, String)> {
        let conversations = self.conversations.lock();
        let mut messages: Vec<_> = conversations
            .get(&conversation_id)
            .map(|c| {
                c.messages
                    .iter()
                    .map(|m| (m.ordinal, m.role, m.content.clone()))
                    .collect()
            })
            .unwrap_or_default();
        messages.sort_by_key(|(ordinal, _, _)| *ordinal);
        messages
    }

    /// Stored metadata of a conversation
    pub fn conversation(&self, conversation_id: Uuid) -> Option<NewConversation> {
        self.conversations
            .lock()
            .get(&conversation_id)
            .map(|c| c.meta.clone())
    }

    /// Corrections stored for a message
    pub fn corrections(&self, message_id: Uuid) -> Vec<Correction> {
        self.conversations
            .lock()
            .values()
            .find_map(|c| c.corrections.get(&message_id).cloned())
            .unwrap_or_default()
    }

    pub fn conversation_count(&self) -> usize {
        self.conversations.lock().len()
    }
}

#[async_trait]
impl ConversationRepository for InMemoryConversationRepository {
    async fn save_first(
        &self,
        conversation: &NewConversation,
        turn: &TurnRecord,
    ) -> Result<PersistedTurn, PersistenceError> {
        let mut conversations = self.conversations.lock();
        let stored = conversations
            .entry(conversation.conversation_id)
            .or_insert_with(|| StoredConversation {
                meta: conversation.clone(),
                messages: Vec::new(),
                corrections: HashMap::new(),
            });

        if stored.meta.user_id != conversation.user_id {
            return Err(PersistenceError::AccessDenied {
                conversation_id: conversation.conversation_id,
            });
        }

        Ok(stored.write_turn(conversation.conversation_id, 0, turn))
    }

    async fn save_subsequent(
        &self,
        conversation_id: Uuid,
        user_id: &str,
        turn: &TurnRecord,
    ) -> Result<PersistedTurn, PersistenceError> {
        let mut conversations = self.conversations.lock();
        let stored = conversations
            .get_mut(&conversation_id)
            .filter(|c| c.meta.user_id == user_id)
            .ok_or(PersistenceError::AccessDenied { conversation_id })?;

        let ordinal = stored.next_ordinal();
        Ok(stored.write_turn(conversation_id, ordinal, turn))
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::{CorrectionCategory, Language, Level};
    use std::sync::Arc;

    fn new_conversation(user_id: &str) -> NewConversation {
        NewConversation {
            conversation_id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            native_language: Language::En,
            target_language: Language::Es,
            level: Level::A2,
            provider: "openai".to_string(),
            model: "gpt-4.1-mini".to_string(),
        }
    }

    fn turn(user: &str, assistant: &str) -> TurnRecord {
        TurnRecord {
            turn_id: Uuid::new_v4(),
            user_text: user.to_string(),
            assistant_text: assistant.to_string(),
            corrections: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_first_turn_uses_ordinals_zero_and_one() {
        let repo = InMemoryConversationRepository::new();
        let conversation = new_conversation("u1");

        let saved = repo.save_first(&conversation, &turn("hola", "¡Hola!")).await.unwrap();
        assert_eq!(saved.conversation_id, conversation.conversation_id);
        assert_eq!(saved.messages.len(), 2);

        let messages = repo.messages(conversation.conversation_id);
        assert_eq!(messages[0], (0, Role::User, "hola".to_string()));
        assert_eq!(messages[1], (1, Role::Assistant, "¡Hola!".to_string()));
    }

    #[tokio::test]
    async fn test_subsequent_turn_rejects_other_user() {
        let repo = InMemoryConversationRepository::new();
        let conversation = new_conversation("owner");
        repo.save_first(&conversation, &turn("a", "b")).await.unwrap();

        let err = repo
            .save_subsequent(conversation.conversation_id, "intruder", &turn("c", "d"))
            .await
            .unwrap_err();
        assert!(matches!(err, PersistenceError::AccessDenied { .. }));

        let err = repo
            .save_subsequent(Uuid::new_v4(), "owner", &turn("c", "d"))
            .await
            .unwrap_err();
        assert!(matches!(err, PersistenceError::AccessDenied { .. }));
    }

    #[tokio::test]
    async fn test_repeated_turn_converges() {
        let repo = InMemoryConversationRepository::new();
        let conversation = new_conversation("u1");
        repo.save_first(&conversation, &turn("a", "b")).await.unwrap();

        let mut second = turn("c", "d");
        second.corrections.push(Correction {
            category: CorrectionCategory::Spelling,
            original: "c".to_string(),
            correction: "C".to_string(),
            explanation: "capital".to_string(),
        });

        let first_write = repo
            .save_subsequent(conversation.conversation_id, "u1", &second)
            .await
            .unwrap();
        let second_write = repo
            .save_subsequent(conversation.conversation_id, "u1", &second)
            .await
            .unwrap();

        assert_eq!(first_write.messages, second_write.messages);
        assert_eq!(repo.messages(conversation.conversation_id).len(), 4);
        assert_eq!(repo.corrections(first_write.messages[0].id).len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_turns_get_contiguous_ordinals() {
        let repo = Arc::new(InMemoryConversationRepository::new());
        let conversation = new_conversation("u1");
        repo.save_first(&conversation, &turn("a", "b")).await.unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let repo = repo.clone();
                let id = conversation.conversation_id;
                tokio::spawn(async move {
                    repo.save_subsequent(id, "u1", &turn(&format!("u{i}"), &format!("a{i}")))
                        .await
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let ordinals: Vec<i32> = repo
            .messages(conversation.conversation_id)
            .into_iter()
            .map(|(ordinal, _, _)| ordinal)
            .collect();
        assert_eq!(ordinals, (0..18).collect::<Vec<_>>());
    }
}
