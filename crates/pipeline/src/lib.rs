//! Conversation turn pipeline
//!
//! Features:
//! - Transcription, generation and synthesis adapters for OpenAI-compatible APIs
//! - Per-turn orchestration with ordered events and cancellation on disconnect
//! - Persist gate arbitrating inline and scope-exit persistence
//! - Bounded, transient-only retries for storage writes

pub mod gate;
pub mod orchestrator;
pub mod persist;
pub mod scope;
pub mod stt;
pub mod tts;

pub use gate::{GateState, PersistGate};
pub use orchestrator::{PipelineConfig, TurnContext, TurnPipeline, TurnStream};
pub use persist::{PendingTurn, PersistTarget, TurnPersister};
pub use scope::TurnScope;
pub use stt::{OpenAiTranscriber, OpenAiTranscriberConfig};
pub use tts::{OpenAiSynthesizer, OpenAiSynthesizerConfig};

use thiserror::Error;

/// Pipeline construction errors
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Provider setup failed: {0}")]
    Provider(#[from] parley_llm::LlmError),
}
