//! JSON wire format of the turn endpoint
//!
//! Requests and events are tagged with `_tag`; field names are
//! camelCase and binary audio travels as standard base64.

use base64::{engine::general_purpose::STANDARD, Engine};
use parley_core::{
    ConversationEvent, ConversationInput, ConversationMessage, ConversationPayload, Correction,
    Error, Phase, PersistedCorrection, PersistedMessage,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ServerError;

/// Message shown to clients for any provider failure
pub const CONVERSATION_FAILED: &str = "Conversation failed";

/// Body of `POST /api/conversation/turn`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnRequest {
    #[serde(default)]
    pub messages: Vec<ConversationMessage>,
    pub input: InputDto,
    #[serde(default)]
    pub tts: bool,
    #[serde(default)]
    pub conversation_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "_tag")]
pub enum InputDto {
    ConversationTextInput { text: String },
    ConversationAudioInput { data: String },
}

impl TryFrom<TurnRequest> for ConversationPayload {
    type Error = ServerError;

    fn try_from(request: TurnRequest) -> Result<Self, Self::Error> {
        let input = match request.input {
            InputDto::ConversationTextInput { text } => ConversationInput::Text(text),
            InputDto::ConversationAudioInput { data } => {
                let audio = STANDARD
                    .decode(data.trim())
                    .map_err(|e| ServerError::InvalidRequest(format!("audio is not base64: {}", e)))?;
                ConversationInput::Audio(audio)
            }
        };

        Ok(ConversationPayload {
            messages: request.messages,
            input,
            tts: request.tts,
            conversation_id: request.conversation_id,
        })
    }
}

/// One NDJSON line of the response
#[derive(Debug, Serialize)]
#[serde(tag = "_tag")]
pub enum EventDto {
    ConversationStarted {
        #[serde(rename = "conversationId")]
        conversation_id: Uuid,
    },
    ConversationTranscription {
        text: String,
    },
    ConversationLlmChunk {
        text: String,
    },
    ConversationCorrections {
        corrections: Vec<Correction>,
    },
    ConversationLlmDone {
        text: String,
    },
    ConversationAudioChunk {
        data: String,
    },
    ConversationDone,
    ConversationPersisted {
        #[serde(rename = "conversationId")]
        conversation_id: Uuid,
        messages: Vec<PersistedMessage>,
        corrections: Vec<PersistedCorrection>,
    },
    ConversationPersistFailed,
    ConversationError {
        #[serde(skip_serializing_if = "Option::is_none")]
        phase: Option<Phase>,
        message: &'static str,
    },
}

impl From<ConversationEvent> for EventDto {
    fn from(event: ConversationEvent) -> Self {
        match event {
            ConversationEvent::Started { conversation_id } => Self::ConversationStarted { conversation_id },
            ConversationEvent::Transcription { text } => Self::ConversationTranscription { text },
            ConversationEvent::LlmChunk { text } => Self::ConversationLlmChunk { text },
            ConversationEvent::Corrections { corrections } => Self::ConversationCorrections { corrections },
            ConversationEvent::LlmDone { text } => Self::ConversationLlmDone { text },
            ConversationEvent::AudioChunk { data } => Self::ConversationAudioChunk {
                data: STANDARD.encode(data),
            },
            ConversationEvent::Done => Self::ConversationDone,
            ConversationEvent::Persisted {
                conversation_id,
                messages,
                corrections,
            } => Self::ConversationPersisted {
                conversation_id,
                messages,
                corrections,
            },
            ConversationEvent::PersistFailed => Self::ConversationPersistFailed,
        }
    }
}

impl EventDto {
    /// Terminal error line; provider details stay in the logs
    pub fn failure(error: &Error) -> Self {
        Self::ConversationError {
            phase: error.phase(),
            message: CONVERSATION_FAILED,
        }
    }

    /// Serialize as one newline-terminated line
    pub fn to_line(&self) -> Option<String> {
        match serde_json::to_string(self) {
            Ok(mut line) => {
                line.push('\n');
                Some(line)
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode event");
                None
            }
        }
    }
}
