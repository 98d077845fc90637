//! HTTP client for OpenAI-compatible endpoints
//!
//! One client is shared by the generator and the speech adapters so that
//! they use the same connection pool, credentials and timeouts.

use std::time::Duration;

use parley_config::OpenAiConfig;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, RequestBuilder, Response};

use crate::LlmError;

/// Connection settings for an OpenAI-compatible API
#[derive(Debug, Clone)]
pub struct OpenAiClientConfig {
    /// API base, e.g. `https://api.openai.com/v1`
    pub endpoint: String,
    pub api_key: String,
    pub organization: Option<String>,
    /// Whole-request ceiling, including the streamed body
    pub timeout: Duration,
}

impl Default for OpenAiClientConfig {
    fn default() -> Self {
        Self {
            endpoint: parley_config::constants::providers::OPENAI_ENDPOINT.to_string(),
            api_key: String::new(),
            organization: None,
            timeout: Duration::from_secs(parley_config::constants::providers::REQUEST_TIMEOUT_SECS),
        }
    }
}

impl From<&OpenAiConfig> for OpenAiClientConfig {
    fn from(config: &OpenAiConfig) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            organization: config.organization.clone(),
            timeout: Duration::from_secs(config.request_timeout_secs),
        }
    }
}

/// Authenticated client for one OpenAI-compatible API
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    config: OpenAiClientConfig,
    client: Client,
}

impl OpenAiClient {
    pub fn new(config: OpenAiClientConfig) -> Result<Self, LlmError> {
        let is_local = config.endpoint.starts_with("http://localhost")
            || config.endpoint.starts_with("http://127.0.0.1");
        if config.api_key.is_empty() && !is_local {
            return Err(LlmError::Configuration(
                "API key required for remote endpoints".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Configuration(e.to_string()))?;

        Ok(Self { config, client })
    }

    /// Full URL of an API path such as `chat/completions`
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.endpoint.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn build_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();

        if !self.config.api_key.is_empty() {
            let auth_value = format!("Bearer {}", self.config.api_key);
            if let Ok(val) = HeaderValue::from_str(&auth_value) {
                headers.insert(AUTHORIZATION, val);
            }
        }

        if let Some(ref org) = self.config.organization {
            if let Ok(val) = HeaderValue::from_str(org) {
                headers.insert("OpenAI-Organization", val);
            }
        }

        headers
    }

    /// Authenticated POST builder for an API path
    pub fn post(&self, path: &str) -> RequestBuilder {
        self.client.post(self.url(path)).headers(self.build_headers())
    }

    /// Send a request, turning non-2xx statuses into `LlmError::Api`
    pub async fn send(&self, request: RequestBuilder) -> Result<Response, LlmError> {
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!("HTTP {}: {}", status, error_text)));
        }

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_requires_key_for_remote_endpoint() {
        assert!(OpenAiClient::new(OpenAiClientConfig::default()).is_err());

        let local = OpenAiClientConfig {
            endpoint: "http://localhost:8000/v1".to_string(),
            ..Default::default()
        };
        assert!(OpenAiClient::new(local).is_ok());

        let remote = OpenAiClientConfig {
            api_key: "sk-test".to_string(),
            ..Default::default()
        };
        assert!(OpenAiClient::new(remote).is_ok());
    }

    #[test]
    fn test_url_joins_paths() {
        let client = OpenAiClient::new(OpenAiClientConfig {
            endpoint: "http://localhost:8000/v1/".to_string(),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(client.url("chat/completions"), "http://localhost:8000/v1/chat/completions");
        assert_eq!(client.url("/audio/speech"), "http://localhost:8000/v1/audio/speech");
    }
}
