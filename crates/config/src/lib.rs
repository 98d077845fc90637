//! Configuration management for parley
//!
//! Supports loading configuration from:
//! - YAML/TOML files (`config/default`, `config/{env}`)
//! - Environment variables (`PARLEY__` prefix, `__` separator)
//!
//! Every section falls back to defaults so that an empty environment
//! yields a runnable development setup.

pub mod constants;
pub mod settings;

pub use settings::{
    load_settings, AuthConfig, ConversationConfig, ObservabilityConfig, OpenAiConfig,
    PersistenceConfig, ProvidersConfig, RuntimeEnvironment, ServerConfig, Settings,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}
