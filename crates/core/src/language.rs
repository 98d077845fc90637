//! Supported languages, CEFR levels and per-user learning settings

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Languages a user can speak natively or practise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    En,
    Es,
    Fr,
    De,
    Pt,
    It,
    Ja,
    Zh,
    Ko,
    Ru,
    He,
}

impl Language {
    pub const ALL: [Language; 11] = [
        Self::En,
        Self::Es,
        Self::Fr,
        Self::De,
        Self::Pt,
        Self::It,
        Self::Ja,
        Self::Zh,
        Self::Ko,
        Self::Ru,
        Self::He,
    ];

    pub const DEFAULT_NATIVE: Language = Language::En;
    pub const DEFAULT_TARGET: Language = Language::Es;

    /// ISO 639-1 code, also used as the transcription language hint
    pub fn code(&self) -> &'static str {
        match self {
            Self::En => "en",
            Self::Es => "es",
            Self::Fr => "fr",
            Self::De => "de",
            Self::Pt => "pt",
            Self::It => "it",
            Self::Ja => "ja",
            Self::Zh => "zh",
            Self::Ko => "ko",
            Self::Ru => "ru",
            Self::He => "he",
        }
    }

    /// English display name
    pub fn name(&self) -> &'static str {
        match self {
            Self::En => "English",
            Self::Es => "Spanish",
            Self::Fr => "French",
            Self::De => "German",
            Self::Pt => "Portuguese",
            Self::It => "Italian",
            Self::Ja => "Japanese",
            Self::Zh => "Chinese",
            Self::Ko => "Korean",
            Self::Ru => "Russian",
            Self::He => "Hebrew",
        }
    }

    /// Name of the language in the language itself
    pub fn native_name(&self) -> &'static str {
        match self {
            Self::En => "English",
            Self::Es => "Español",
            Self::Fr => "Français",
            Self::De => "Deutsch",
            Self::Pt => "Português",
            Self::It => "Italiano",
            Self::Ja => "日本語",
            Self::Zh => "中文",
            Self::Ko => "한국어",
            Self::Ru => "Русский",
            Self::He => "עברית",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|l| l.code() == lower)
            .ok_or_else(|| format!("unsupported language: {}", s))
    }
}

/// CEFR proficiency level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Level {
    A1,
    A2,
    B1,
    B2,
    C1,
    C2,
}

impl Level {
    pub const ALL: [Level; 6] = [Self::A1, Self::A2, Self::B1, Self::B2, Self::C1, Self::C2];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::A1 => "A1",
            Self::A2 => "A2",
            Self::B1 => "B1",
            Self::B2 => "B2",
            Self::C1 => "C1",
            Self::C2 => "C2",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::A1 => "A1 - Beginner",
            Self::A2 => "A2 - Elementary",
            Self::B1 => "B1 - Intermediate",
            Self::B2 => "B2 - Upper Intermediate",
            Self::C1 => "C1 - Advanced",
            Self::C2 => "C2 - Mastery",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::A1 => "Basic phrases and simple interactions",
            Self::A2 => "Simple everyday conversations",
            Self::B1 => "Familiar topics and experiences",
            Self::B2 => "Abstract and complex topics",
            Self::C1 => "Fluent and spontaneous expression",
            Self::C2 => "Native-level precision and nuance",
        }
    }
}

impl Default for Level {
    fn default() -> Self {
        Self::A1
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|l| l.as_str() == upper)
            .ok_or_else(|| format!("unknown CEFR level: {}", s))
    }
}

/// Learning settings that drive generation for one user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSettings {
    pub native_language: Language,
    pub target_language: Language,
    pub level: Level,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            native_language: Language::DEFAULT_NATIVE,
            target_language: Language::DEFAULT_TARGET,
            level: Level::default(),
        }
    }
}
