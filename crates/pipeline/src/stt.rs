//! Streaming transcription over the audio transcriptions API

use std::time::Duration;

use futures::StreamExt;
use parley_core::{
    guard_stream, CancellationToken, DeltaStream, Language, Phase, SseDecoder, StreamGuard,
    Transcriber,
};
use parley_llm::{LlmError, OpenAiClient};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;

/// Transcriber settings
#[derive(Debug, Clone)]
pub struct OpenAiTranscriberConfig {
    pub model: String,
    /// Silence allowed between transcript events
    pub stall_timeout: Duration,
}

impl Default for OpenAiTranscriberConfig {
    fn default() -> Self {
        Self {
            model: parley_config::constants::providers::TRANSCRIPTION_MODEL.to_string(),
            stall_timeout: parley_core::streaming::DEFAULT_STALL_TIMEOUT,
        }
    }
}

/// Transcriber backed by `audio/transcriptions` with `stream=true`
///
/// The upload is a WAV file; text arrives as `transcript.text.delta`
/// server-sent events.
pub struct OpenAiTranscriber {
    config: OpenAiTranscriberConfig,
    client: OpenAiClient,
}

#[derive(Debug, Deserialize)]
struct TranscriptEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    delta: Option<String>,
}

impl OpenAiTranscriber {
    pub fn new(config: OpenAiTranscriberConfig, client: OpenAiClient) -> Self {
        Self { config, client }
    }

    fn form(&self, audio: Vec<u8>, language: Language) -> Result<Form, LlmError> {
        let file = Part::bytes(audio)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| LlmError::Configuration(e.to_string()))?;

        Ok(Form::new()
            .part("file", file)
            .text("model", self.config.model.clone())
            .text("language", language.code())
            .text("temperature", "0")
            .text("stream", "true"))
    }
}

fn text_delta(data: &str) -> Option<String> {
    match serde_json::from_str::<TranscriptEvent>(data) {
        Ok(event) if event.kind == "transcript.text.delta" => event.delta,
        Ok(_) => None,
        Err(e) => {
            tracing::debug!(error = %e, "Skipping unparseable transcript event");
            None
        }
    }
}

impl Transcriber for OpenAiTranscriber {
    fn transcribe_stream<'a>(
        &'a self,
        audio: Vec<u8>,
        language: Language,
        cancel: CancellationToken,
    ) -> DeltaStream<'a, String> {
        let guard = StreamGuard::new(Phase::Stt, cancel).with_stall_timeout(self.config.stall_timeout);

        let inner = async_stream::try_stream! {
            tracing::debug!(bytes = audio.len(), language = %language.code(), "Transcribing audio");

            let form = self.form(audio, language)?;
            let response = self
                .client
                .send(self.client.post("audio/transcriptions").multipart(form))
                .await?;

            let mut body = response.bytes_stream();
            let mut decoder = SseDecoder::new();

            while let Some(chunk) = body.next().await {
                let chunk = chunk.map_err(LlmError::from)?;
                for data in decoder.push(&chunk)? {
                    if let Some(delta) = text_delta(&data) {
                        yield delta;
                    }
                }
            }

            if let Some(delta) = decoder.finish().as_deref().and_then(text_delta) {
                yield delta;
            }
        };

        guard_stream(
            inner.map(|r: Result<String, LlmError>| r.map_err(|e| e.into_phase(Phase::Stt))),
            guard,
        )
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_llm::OpenAiClientConfig;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn transcriber(server: &MockServer) -> OpenAiTranscriber {
        let client = OpenAiClient::new(OpenAiClientConfig {
            endpoint: server.uri(),
            api_key: "sk-test".to_string(),
            ..Default::default()
        })
        .unwrap();
        OpenAiTranscriber::new(OpenAiTranscriberConfig::default(), client)
    }

    #[test]
    fn test_only_text_deltas_are_kept() {
        assert_eq!(
            text_delta(r#"{"type":"transcript.text.delta","delta":"Hola"}"#),
            Some("Hola".to_string())
        );
        assert_eq!(text_delta(r#"{"type":"transcript.text.done","text":"Hola"}"#), None);
        assert_eq!(text_delta("not json"), None);
    }

    #[tokio::test]
    async fn test_streams_deltas() {
        let server = MockServer::start().await;
        let body = concat!(
            "data: {\"type\":\"transcript.text.delta\",\"delta\":\"Me gusta \"}\n\n",
            "data: {\"type\":\"transcript.text.delta\",\"delta\":\"el cine\"}\n\n",
            "data: {\"type\":\"transcript.text.done\",\"text\":\"Me gusta el cine\"}\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/audio/transcriptions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .expect(1)
            .mount(&server)
            .await;

        let transcriber = transcriber(&server);
        let deltas: Vec<String> = transcriber
            .transcribe_stream(vec![0u8; 64], Language::Es, CancellationToken::new())
            .map(|d| d.unwrap())
            .collect()
            .await;

        assert_eq!(deltas, vec!["Me gusta ".to_string(), "el cine".to_string()]);
    }

    #[tokio::test]
    async fn test_http_error_is_stt_phase() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/audio/transcriptions"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let transcriber = transcriber(&server);
        let results: Vec<_> = transcriber
            .transcribe_stream(vec![1, 2, 3], Language::Fr, CancellationToken::new())
            .collect()
            .await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].as_ref().unwrap_err().phase(), Some(Phase::Stt));
    }
}
