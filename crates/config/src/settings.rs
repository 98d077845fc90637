//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::constants::{conversation, database, providers, server};
use crate::ConfigError;

/// Runtime environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    /// Development mode - relaxed validation, warnings only
    #[default]
    Development,
    /// Staging mode - stricter validation
    Staging,
    /// Production mode - all validations enforced
    Production,
}

impl RuntimeEnvironment {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    /// Check if strict validation should be applied
    pub fn is_strict(&self) -> bool {
        matches!(self, Self::Production | Self::Staging)
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub environment: RuntimeEnvironment,

    #[serde(default)]
    pub server: ServerConfig,

    /// AI provider access
    #[serde(default)]
    pub providers: ProvidersConfig,

    /// Turn execution limits
    #[serde(default)]
    pub conversation: ConversationConfig,

    /// Postgres persistence
    #[serde(default)]
    pub persistence: PersistenceConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_server()?;
        self.validate_conversation()?;
        self.validate_environment()?;
        Ok(())
    }

    fn validate_server(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.port".to_string(),
                message: "Port cannot be 0".to_string(),
            });
        }

        if self.server.auth.enabled
            && self.server.auth.api_key.as_deref().map_or(true, str::is_empty)
        {
            return Err(ConfigError::InvalidValue {
                field: "server.auth.api_key".to_string(),
                message: "Auth is enabled but no API key is configured".to_string(),
            });
        }

        Ok(())
    }

    fn validate_conversation(&self) -> Result<(), ConfigError> {
        let c = &self.conversation;

        if c.max_context_messages == 0 {
            return Err(ConfigError::InvalidValue {
                field: "conversation.max_context_messages".to_string(),
                message: "Must keep at least one prior message".to_string(),
            });
        }

        if c.persist_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "conversation.persist_timeout_ms".to_string(),
                message: "Persist timeout must be positive".to_string(),
            });
        }

        if c.stall_timeout_ms < 1000 {
            return Err(ConfigError::InvalidValue {
                field: "conversation.stall_timeout_ms".to_string(),
                message: format!("Too low (minimum 1000ms), got {}", c.stall_timeout_ms),
            });
        }

        if c.event_buffer == 0 {
            return Err(ConfigError::InvalidValue {
                field: "conversation.event_buffer".to_string(),
                message: "Event buffer must hold at least one event".to_string(),
            });
        }

        Ok(())
    }

    /// Staging and production refuse to start half-configured
    fn validate_environment(&self) -> Result<(), ConfigError> {
        if !self.environment.is_strict() {
            if self.providers.openai.api_key.is_empty() {
                tracing::warn!("OpenAI API key is empty; provider calls will fail");
            }
            return Ok(());
        }

        if self.providers.openai.api_key.is_empty() {
            return Err(ConfigError::MissingField("providers.openai.api_key".to_string()));
        }

        if !self.persistence.enabled {
            return Err(ConfigError::InvalidValue {
                field: "persistence.enabled".to_string(),
                message: format!(
                    "In-memory storage is not allowed in {:?}",
                    self.environment
                ),
            });
        }

        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    /// Allowed origins; empty means localhost:3000 only
    #[serde(default)]
    pub cors_origins: Vec<String>,

    /// Seconds allowed for turn finalizers to drain on shutdown
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,

    #[serde(default)]
    pub auth: AuthConfig,
}

fn default_host() -> String {
    server::HOST.to_string()
}

fn default_port() -> u16 {
    server::PORT
}

fn default_shutdown_grace() -> u64 {
    server::SHUTDOWN_GRACE_SECS
}

fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_enabled: default_true(),
            cors_origins: Vec::new(),
            shutdown_grace_secs: default_shutdown_grace(),
            auth: AuthConfig::default(),
        }
    }
}

/// API key authentication
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Expected bearer token
    #[serde(default)]
    pub api_key: Option<String>,

    /// Path prefixes that bypass authentication
    #[serde(default = "default_public_paths")]
    pub public_paths: Vec<String>,
}

fn default_public_paths() -> Vec<String> {
    vec![
        "/health".to_string(),
        "/ready".to_string(),
        "/metrics".to_string(),
    ]
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: None,
            public_paths: default_public_paths(),
        }
    }
}

/// AI provider access
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub openai: OpenAiConfig,
}

/// OpenAI-compatible endpoint shared by transcription, chat and speech
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    #[serde(default = "default_openai_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_openai_api_key")]
    pub api_key: String,

    #[serde(default)]
    pub organization: Option<String>,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_chat_model")]
    pub chat_model: String,

    #[serde(default = "default_transcription_model")]
    pub transcription_model: String,

    #[serde(default = "default_speech_model")]
    pub speech_model: String,

    /// Voice used for synthesized replies
    #[serde(default = "default_voice")]
    pub voice: String,

    #[serde(default = "default_speech_instructions")]
    pub speech_instructions: String,
}

fn default_openai_endpoint() -> String {
    providers::OPENAI_ENDPOINT.to_string()
}

fn default_openai_api_key() -> String {
    std::env::var("OPENAI_API_KEY").unwrap_or_default()
}

fn default_request_timeout() -> u64 {
    providers::REQUEST_TIMEOUT_SECS
}

fn default_chat_model() -> String {
    std::env::var("OPENAI_MODEL").unwrap_or_else(|_| providers::CHAT_MODEL.to_string())
}

fn default_transcription_model() -> String {
    providers::TRANSCRIPTION_MODEL.to_string()
}

fn default_speech_model() -> String {
    providers::SPEECH_MODEL.to_string()
}

fn default_voice() -> String {
    providers::VOICE.to_string()
}

fn default_speech_instructions() -> String {
    providers::SPEECH_INSTRUCTIONS.to_string()
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            endpoint: default_openai_endpoint(),
            api_key: default_openai_api_key(),
            organization: None,
            request_timeout_secs: default_request_timeout(),
            chat_model: default_chat_model(),
            transcription_model: default_transcription_model(),
            speech_model: default_speech_model(),
            voice: default_voice(),
            speech_instructions: default_speech_instructions(),
        }
    }
}

/// Turn execution limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    /// Prior messages kept in the generation context
    #[serde(default = "default_max_context_messages")]
    pub max_context_messages: usize,

    /// Ceiling for one save, retries included
    #[serde(default = "default_persist_timeout")]
    pub persist_timeout_ms: u64,

    /// Retries for transient storage errors
    #[serde(default = "default_persist_retries")]
    pub persist_retries: u32,

    /// Silence allowed on any provider stream
    #[serde(default = "default_stall_timeout")]
    pub stall_timeout_ms: u64,

    /// Bounded channel size between a turn and its client
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_max_context_messages() -> usize {
    conversation::MAX_CONTEXT_MESSAGES
}

fn default_persist_timeout() -> u64 {
    conversation::PERSIST_TIMEOUT_MS
}

fn default_persist_retries() -> u32 {
    conversation::PERSIST_RETRIES
}

fn default_stall_timeout() -> u64 {
    conversation::STALL_TIMEOUT_MS
}

fn default_event_buffer() -> usize {
    conversation::EVENT_BUFFER
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            max_context_messages: default_max_context_messages(),
            persist_timeout_ms: default_persist_timeout(),
            persist_retries: default_persist_retries(),
            stall_timeout_ms: default_stall_timeout(),
            event_buffer: default_event_buffer(),
        }
    }
}

/// Postgres persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Enable Postgres persistence (false = in-memory only)
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_database_url")]
    pub database_url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,

    /// Create tables on start-up if they are missing
    #[serde(default = "default_true")]
    pub ensure_schema: bool,
}

fn default_database_url() -> String {
    std::env::var("DATABASE_URL").unwrap_or_else(|_| database::DEFAULT_URL.to_string())
}

fn default_max_connections() -> u32 {
    database::MAX_CONNECTIONS
}

fn default_acquire_timeout() -> u64 {
    database::ACQUIRE_TIMEOUT_SECS
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: false, // Disabled by default for development
            database_url: default_database_url(),
            max_connections: default_max_connections(),
            acquire_timeout_secs: default_acquire_timeout(),
            ensure_schema: default_true(),
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub log_json: bool,

    /// Expose Prometheus metrics at /metrics
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
            metrics_enabled: true,
        }
    }
}

/// Load settings from files and environment
///
/// Priority (highest to lowest):
/// 1. Environment variables (PARLEY__ prefix, e.g. `PARLEY__SERVER__PORT`)
/// 2. config/{env}.yaml (if env specified)
/// 3. config/default.yaml
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(File::with_name("config/default").required(false));

    if let Some(env_name) = env {
        builder =
            builder.add_source(File::with_name(&format!("config/{}", env_name)).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix("PARLEY")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.conversation.max_context_messages, 20);
        assert_eq!(settings.conversation.persist_timeout_ms, 10_000);
        assert_eq!(settings.conversation.persist_retries, 2);
        assert_eq!(settings.conversation.stall_timeout_ms, 15_000);
        assert_eq!(settings.providers.openai.voice, "coral");
        assert!(!settings.persistence.enabled);
    }

    #[test]
    fn test_default_settings_validate_in_development() {
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn test_conversation_validation() {
        let mut settings = Settings::default();
        settings.conversation.stall_timeout_ms = 500;
        assert!(settings.validate().is_err());

        settings.conversation.stall_timeout_ms = 15_000;
        settings.conversation.max_context_messages = 0;
        assert!(settings.validate().is_err());

        settings.conversation.max_context_messages = 20;
        settings.conversation.event_buffer = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_auth_requires_key() {
        let mut settings = Settings::default();
        settings.server.auth.enabled = true;
        assert!(settings.validate().is_err());

        settings.server.auth.api_key = Some("secret".to_string());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_production_requires_persistence_and_key() {
        let mut settings = Settings::default();
        settings.environment = RuntimeEnvironment::Production;
        settings.providers.openai.api_key = "sk-test".to_string();
        assert!(settings.validate().is_err());

        settings.persistence.enabled = true;
        assert!(settings.validate().is_ok());

        settings.providers.openai.api_key.clear();
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::MissingField(_))
        ));
    }

    #[test]
    fn test_partial_section_uses_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{"conversation":{"persist_retries":5}}"#).unwrap();
        assert_eq!(settings.conversation.persist_retries, 5);
        assert_eq!(settings.conversation.max_context_messages, 20);
        assert_eq!(settings.server.port, 8080);
    }
}
