//! Streaming speech synthesis over the audio speech API

use std::time::Duration;

use futures::StreamExt;
use parley_core::{guard_stream, CancellationToken, DeltaStream, Phase, StreamGuard, Synthesizer};
use parley_llm::{LlmError, OpenAiClient};
use serde::Serialize;

/// Synthesizer settings
#[derive(Debug, Clone)]
pub struct OpenAiSynthesizerConfig {
    pub model: String,
    /// Delivery instructions sent with every request
    pub instructions: String,
    pub stall_timeout: Duration,
}

impl Default for OpenAiSynthesizerConfig {
    fn default() -> Self {
        Self {
            model: parley_config::constants::providers::SPEECH_MODEL.to_string(),
            instructions: parley_config::constants::providers::SPEECH_INSTRUCTIONS.to_string(),
            stall_timeout: parley_core::streaming::DEFAULT_STALL_TIMEOUT,
        }
    }
}

#[derive(Debug, Serialize)]
struct SpeechRequest<'r> {
    model: &'r str,
    voice: &'r str,
    input: &'r str,
    instructions: &'r str,
    response_format: &'static str,
}

/// Synthesizer producing raw 24 kHz 16-bit mono PCM
pub struct OpenAiSynthesizer {
    config: OpenAiSynthesizerConfig,
    client: OpenAiClient,
}

impl OpenAiSynthesizer {
    pub fn new(config: OpenAiSynthesizerConfig, client: OpenAiClient) -> Self {
        Self { config, client }
    }
}

impl Synthesizer for OpenAiSynthesizer {
    fn synthesize_stream<'a>(
        &'a self,
        text: &'a str,
        voice: &'a str,
        cancel: CancellationToken,
    ) -> DeltaStream<'a, Vec<u8>> {
        let guard = StreamGuard::new(Phase::Tts, cancel).with_stall_timeout(self.config.stall_timeout);

        let inner = async_stream::try_stream! {
            let request = SpeechRequest {
                model: &self.config.model,
                voice,
                input: text,
                instructions: &self.config.instructions,
                response_format: "pcm",
            };
            let response = self
                .client
                .send(self.client.post("audio/speech").json(&request))
                .await?;

            let mut body = response.bytes_stream();
            while let Some(chunk) = body.next().await {
                let chunk = chunk.map_err(LlmError::from)?;
                if !chunk.is_empty() {
                    yield chunk.to_vec();
                }
            }
        };

        guard_stream(
            inner.map(|r: Result<Vec<u8>, LlmError>| r.map_err(|e| e.into_phase(Phase::Tts))),
            guard,
        )
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}
