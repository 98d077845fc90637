//! Error types shared by every provider-facing stage

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Pipeline stage that produced an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Stt,
    Llm,
    Tts,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stt => "stt",
            Self::Llm => "llm",
            Self::Tts => "tts",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Conversation errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("{phase} provider error: {message}")]
    Provider { phase: Phase, message: String },

    #[error("{phase} stream stalled: no data for {after:?}")]
    Stalled { phase: Phase, after: Duration },

    #[error("{0} cancelled")]
    Cancelled(Phase),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    pub fn provider(phase: Phase, message: impl Into<String>) -> Self {
        Self::Provider {
            phase,
            message: message.into(),
        }
    }

    /// Stage the error belongs to, if any
    pub fn phase(&self) -> Option<Phase> {
        match self {
            Self::Provider { phase, .. } | Self::Stalled { phase, .. } => Some(*phase),
            Self::Cancelled(phase) => Some(*phase),
            Self::InvalidInput(_) => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
