//! Core traits and types for the parley conversation partner
//!
//! This crate provides foundational types used across all other crates:
//! - Capability ports for pluggable providers (transcription, generation, synthesis)
//! - Conversation messages, corrections, languages and CEFR levels
//! - The turn payload and the ordered output event union
//! - Phase-tagged error types
//! - Stream guards shared by the provider adapters

pub mod conversation;
pub mod correction;
pub mod error;
pub mod event;
pub mod language;
pub mod streaming;
pub mod traits;

pub use conversation::{ConversationMessage, PersistedCorrection, PersistedMessage, Role};
pub use correction::{Correction, CorrectionCategory};
pub use error::{Error, Phase, Result};
pub use event::{ConversationEvent, ConversationInput, ConversationPayload};
pub use language::{Language, Level, UserSettings};
pub use streaming::{guard_stream, LineTooLong, SseDecoder, StreamGuard};
pub use traits::{DeltaStream, Generator, LlmDelta, Synthesizer, Transcriber};

/// Re-exported so that port implementors and callers agree on one token type.
pub use tokio_util::sync::CancellationToken;
