//! OpenAI-compatible provider integration
//!
//! Features:
//! - Shared HTTP client for chat, transcription and speech endpoints
//! - Streaming reply generation with a correction-reporting tool
//! - CEFR-aware system prompt construction

pub mod backend;
pub mod client;
pub mod corrections;
pub mod prompt;

pub use backend::{OpenAiGenerator, OpenAiGeneratorConfig};
pub use client::{OpenAiClient, OpenAiClientConfig};
pub use corrections::{parse_corrections, report_corrections_tool, ToolCallAccumulator, REPORT_CORRECTIONS};
pub use prompt::{chat_messages, level_instructions, system_prompt, ChatMessage, ChatToolCall};

use parley_core::Phase;
use thiserror::Error;

/// Provider errors
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("API error: {0}")]
    Api(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Timeout")]
    Timeout,

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl LlmError {
    /// Tag the error with the stage that issued the request
    pub fn into_phase(self, phase: Phase) -> parley_core::Error {
        parley_core::Error::provider(phase, self.to_string())
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::Network(err.to_string())
        }
    }
}

impl From<parley_core::LineTooLong> for LlmError {
    fn from(err: parley_core::LineTooLong) -> Self {
        LlmError::InvalidResponse(err.to_string())
    }
}

impl From<LlmError> for parley_core::Error {
    fn from(err: LlmError) -> Self {
        err.into_phase(Phase::Llm)
    }
}
