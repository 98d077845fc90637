//! Reply generation port

use crate::{CancellationToken, ConversationMessage, Correction, DeltaStream, UserSettings};

/// One delta of a generated reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LlmDelta {
    /// Visible reply text
    Content(String),
    /// Corrections for the user's latest message, reported once per reply
    Corrections(Vec<Correction>),
}

/// Conversational reply generator with a correction side-channel
pub trait Generator: Send + Sync + 'static {
    /// Stream the reply to the last message of `messages`
    ///
    /// # Arguments
    /// * `messages` - Conversation context, oldest first, ending with the user's message
    /// * `settings` - Languages and level that shape the reply
    /// * `cancel` - Token that aborts the request when fired
    fn generate_stream<'a>(
        &'a self,
        messages: &'a [ConversationMessage],
        settings: &'a UserSettings,
        cancel: CancellationToken,
    ) -> DeltaStream<'a, LlmDelta>;

    /// Provider name stored with new conversations (e.g. "openai")
    fn provider(&self) -> &str;

    /// Model name stored with new conversations
    fn model(&self) -> &str;
}
