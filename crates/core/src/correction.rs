//! Structured language corrections reported alongside a reply

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of language error a correction addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CorrectionCategory {
    #[serde(rename = "grammar")]
    Grammar,
    #[serde(rename = "vocabulary")]
    Vocabulary,
    #[serde(rename = "spelling")]
    Spelling,
    #[serde(rename = "word order")]
    WordOrder,
    #[serde(rename = "conjugation")]
    Conjugation,
}

impl CorrectionCategory {
    pub const ALL: [CorrectionCategory; 5] = [
        Self::Grammar,
        Self::Vocabulary,
        Self::Spelling,
        Self::WordOrder,
        Self::Conjugation,
    ];

    /// Wire and storage representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Grammar => "grammar",
            Self::Vocabulary => "vocabulary",
            Self::Spelling => "spelling",
            Self::WordOrder => "word order",
            Self::Conjugation => "conjugation",
        }
    }
}

impl fmt::Display for CorrectionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CorrectionCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown correction category: {}", s))
    }
}

/// One detected error in the user's message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Correction {
    pub category: CorrectionCategory,
    /// Incorrect fragment as the user wrote or said it
    pub original: String,
    /// Corrected version of the fragment
    pub correction: String,
    /// Short explanation in the user's native language
    pub explanation: String,
}
