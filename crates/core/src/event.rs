//! Turn payload and the ordered output event union

use uuid::Uuid;

use crate::{ConversationMessage, Correction, PersistedCorrection, PersistedMessage};

/// What the user said or typed for this turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationInput {
    /// Recorded speech, transcribed before generation
    Audio(Vec<u8>),
    /// Literal text, used as-is
    Text(String),
}

impl ConversationInput {
    pub fn is_audio(&self) -> bool {
        matches!(self, Self::Audio(_))
    }
}

/// Everything the client sends to run one turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationPayload {
    /// Prior messages of the conversation, oldest first
    pub messages: Vec<ConversationMessage>,
    pub input: ConversationInput,
    /// Whether the reply should also be synthesized to speech
    pub tts: bool,
    /// Absent on the first turn of a new conversation
    pub conversation_id: Option<Uuid>,
}

/// One emission of a turn's output stream
///
/// Events are produced in a fixed order:
/// `Started?`, `Transcription?`, `LlmChunk*` (interleaved with `Corrections?`),
/// `LlmDone`, `AudioChunk*`, `Done`, `Persisted | PersistFailed?`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationEvent {
    /// First turn only: the id the conversation will be stored under
    Started { conversation_id: Uuid },
    /// Audio input only: the final transcription
    Transcription { text: String },
    LlmChunk { text: String },
    Corrections { corrections: Vec<Correction> },
    /// Full reply text, emitted once generation completed
    LlmDone { text: String },
    AudioChunk { data: Vec<u8> },
    Done,
    Persisted {
        conversation_id: Uuid,
        messages: Vec<PersistedMessage>,
        corrections: Vec<PersistedCorrection>,
    },
    /// The turn was delivered but could not be stored
    PersistFailed,
}

impl ConversationEvent {
    /// Wire tag of the event
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Started { .. } => "ConversationStarted",
            Self::Transcription { .. } => "ConversationTranscription",
            Self::LlmChunk { .. } => "ConversationLlmChunk",
            Self::Corrections { .. } => "ConversationCorrections",
            Self::LlmDone { .. } => "ConversationLlmDone",
            Self::AudioChunk { .. } => "ConversationAudioChunk",
            Self::Done => "ConversationDone",
            Self::Persisted { .. } => "ConversationPersisted",
            Self::PersistFailed => "ConversationPersistFailed",
        }
    }

    /// True for the two events that may follow `Done`
    pub fn is_persist_outcome(&self) -> bool {
        matches!(self, Self::Persisted { .. } | Self::PersistFailed)
    }
}
