//! Streaming reply generation over the chat-completions API
//!
//! The model streams its visible reply and may call `report_corrections`
//! in the same response. When it answers with the tool call alone, one
//! follow-up request (tool result attached, no tools offered) produces
//! the visible reply.

use std::collections::BTreeMap;
use std::time::Duration;

use futures::StreamExt;
use parley_config::OpenAiConfig;
use parley_core::{
    guard_stream, CancellationToken, ConversationMessage, DeltaStream, Generator, LlmDelta, Phase,
    SseDecoder, StreamGuard, UserSettings,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::{OpenAiClient, OpenAiClientConfig};
use crate::corrections::{report_corrections_tool, ToolCallAccumulator, ToolCallDelta};
use crate::prompt::{chat_messages, ChatMessage, ChatToolCall};
use crate::LlmError;

const TOOL_RESULT: &str = "Corrections reported successfully.";

/// Generator settings
#[derive(Debug, Clone)]
pub struct OpenAiGeneratorConfig {
    pub client: OpenAiClientConfig,
    pub model: String,
    /// Silence allowed between stream chunks
    pub stall_timeout: Duration,
}

impl Default for OpenAiGeneratorConfig {
    fn default() -> Self {
        Self {
            client: OpenAiClientConfig::default(),
            model: parley_config::constants::providers::CHAT_MODEL.to_string(),
            stall_timeout: parley_core::streaming::DEFAULT_STALL_TIMEOUT,
        }
    }
}

impl OpenAiGeneratorConfig {
    pub fn from_settings(openai: &OpenAiConfig, stall_timeout: Duration) -> Self {
        Self {
            client: OpenAiClientConfig::from(openai),
            model: openai.chat_model.clone(),
            stall_timeout,
        }
    }
}

/// Chat-completions generator
pub struct OpenAiGenerator {
    config: OpenAiGeneratorConfig,
    client: OpenAiClient,
}

impl OpenAiGenerator {
    pub fn new(config: OpenAiGeneratorConfig) -> Result<Self, LlmError> {
        let client = OpenAiClient::new(config.client.clone())?;
        Ok(Self { config, client })
    }

    /// Share an existing client (and its connection pool)
    pub fn with_client(config: OpenAiGeneratorConfig, client: OpenAiClient) -> Self {
        Self { config, client }
    }

    fn request<'r>(&'r self, messages: &'r [ChatMessage], offer_tools: bool) -> ChatRequest<'r> {
        ChatRequest {
            model: &self.config.model,
            messages,
            stream: true,
            tools: offer_tools.then(|| vec![report_corrections_tool()]),
            tool_choice: offer_tools.then_some("auto"),
            parallel_tool_calls: offer_tools.then_some(false),
        }
    }

    /// Stream the deltas of one chat-completions request
    fn stream_deltas<'a>(
        &'a self,
        messages: Vec<ChatMessage>,
        offer_tools: bool,
        cancel: CancellationToken,
    ) -> DeltaStream<'a, StreamDelta> {
        let guard = StreamGuard::new(Phase::Llm, cancel).with_stall_timeout(self.config.stall_timeout);

        let inner = async_stream::try_stream! {
            let request = self.request(&messages, offer_tools);
            let response = self
                .client
                .send(self.client.post("chat/completions").json(&request))
                .await?;

            let mut body = response.bytes_stream();
            let mut decoder = SseDecoder::new();

            while let Some(chunk) = body.next().await {
                let chunk = chunk.map_err(LlmError::from)?;
                for data in decoder.push(&chunk)? {
                    if let Some(delta) = parse_chunk(&data) {
                        yield delta;
                    }
                }
            }

            if let Some(delta) = decoder.finish().as_deref().and_then(parse_chunk) {
                yield delta;
            }
        };

        guard_stream(inner.map(|r: Result<StreamDelta, LlmError>| r.map_err(parley_core::Error::from)), guard)
    }
}

impl Generator for OpenAiGenerator {
    fn generate_stream<'a>(
        &'a self,
        messages: &'a [ConversationMessage],
        settings: &'a UserSettings,
        cancel: CancellationToken,
    ) -> DeltaStream<'a, LlmDelta> {
        Box::pin(async_stream::try_stream! {
            let chat = chat_messages(messages, settings);
            let mut calls: BTreeMap<usize, ToolCallAccumulator> = BTreeMap::new();
            let mut has_content = false;

            let mut primary = self.stream_deltas(chat.clone(), true, cancel.clone());
            while let Some(delta) = primary.next().await {
                let delta = delta?;
                if let Some(tool_calls) = &delta.tool_calls {
                    ToolCallAccumulator::absorb(&mut calls, tool_calls);
                }
                if let Some(text) = delta.content.filter(|t| !t.is_empty()) {
                    has_content = true;
                    yield LlmDelta::Content(text);
                }
            }
            drop(primary);

            let report = calls.into_values().find(|c| c.is_report());

            if let Some(call) = &report {
                let corrections = call.corrections();
                tracing::debug!(count = corrections.len(), "Correction report received");
                if !corrections.is_empty() {
                    yield LlmDelta::Corrections(corrections);
                }
            }

            // Tool call without visible text: ask once more for the reply
            if let Some(call) = report.filter(|c| !has_content && !c.id.is_empty()) {
                let tool_call_id = call.id.clone();
                let mut follow_up = chat;
                follow_up.push(ChatMessage::assistant_tool_call(ChatToolCall::function(
                    call.id,
                    call.name,
                    call.arguments,
                )));
                follow_up.push(ChatMessage::tool_result(tool_call_id, TOOL_RESULT));

                let mut secondary = self.stream_deltas(follow_up, false, cancel.clone());
                while let Some(delta) = secondary.next().await {
                    if let Some(text) = delta?.content.filter(|t| !t.is_empty()) {
                        yield LlmDelta::Content(text);
                    }
                }
            }
        })
    }

    fn provider(&self) -> &str {
        parley_config::constants::providers::PROVIDER_NAME
    }

    fn model(&self) -> &str {
        &self.config.model
    }
}

fn parse_chunk(data: &str) -> Option<StreamDelta> {
    match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => chunk.choices.into_iter().next().and_then(|c| c.delta),
        Err(e) => {
            tracing::debug!(error = %e, "Skipping unparseable stream chunk");
            None
        }
    }
}

// Chat-completions wire types
#[derive(Debug, Serialize)]
struct ChatRequest<'r> {
    model: &'r str,
    messages: &'r [ChatMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parallel_tool_calls: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<StreamDelta>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::{CorrectionCategory, Language, Level};
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sse(events: &[Value]) -> String {
        let mut body: String = events.iter().map(|e| format!("data: {}\n\n", e)).collect();
        body.push_str("data: [DONE]\n\n");
        body
    }

    fn content(text: &str) -> Value {
        json!({"choices": [{"index": 0, "delta": {"content": text}}]})
    }

    fn tool_fragment(id: Option<&str>, name: Option<&str>, arguments: &str) -> Value {
        let mut function = json!({"arguments": arguments});
        if let Some(name) = name {
            function["name"] = json!(name);
        }
        let mut call = json!({"index": 0, "type": "function", "function": function});
        if let Some(id) = id {
            call["id"] = json!(id);
        }
        json!({"choices": [{"index": 0, "delta": {"content": null, "tool_calls": [call]}}]})
    }

    fn generator(server: &MockServer) -> OpenAiGenerator {
        OpenAiGenerator::new(OpenAiGeneratorConfig {
            client: OpenAiClientConfig {
                endpoint: server.uri(),
                api_key: "sk-test".to_string(),
                ..Default::default()
            },
            model: "gpt-test".to_string(),
            stall_timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    fn settings() -> UserSettings {
        UserSettings {
            native_language: Language::En,
            target_language: Language::Es,
            level: Level::A2,
        }
    }

    async fn collect(generator: &OpenAiGenerator) -> Vec<parley_core::Result<LlmDelta>> {
        let messages = vec![ConversationMessage::user("Yo soy cansado")];
        let settings = settings();
        generator
            .generate_stream(&messages, &settings, CancellationToken::new())
            .collect()
            .await
    }

    fn sse_response(events: &[Value]) -> ResponseTemplate {
        ResponseTemplate::new(200)
            .insert_header("content-type", "text/event-stream")
            .set_body_string(sse(events))
    }

    const REPORT: &str = r#"{"corrections":[{"category":"grammar","original":"soy cansado","correction":"estoy cansado","explanation":"Temporary states use estar"}]}"#;

    #[tokio::test]
    async fn test_streams_content_and_corrections() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(json!({
                "model": "gpt-test",
                "stream": true,
                "tool_choice": "auto",
                "parallel_tool_calls": false,
            })))
            .respond_with(sse_response(&[
                content("¡Oh no! "),
                content("¿Dormiste mal?"),
                tool_fragment(Some("call_1"), Some("report_corrections"), &REPORT[..20]),
                tool_fragment(None, None, &REPORT[20..]),
            ]))
            .expect(1)
            .mount(&server)
            .await;

        let deltas: Vec<LlmDelta> = collect(&generator(&server))
            .await
            .into_iter()
            .map(|d| d.unwrap())
            .collect();

        assert_eq!(deltas.len(), 3);
        assert_eq!(deltas[0], LlmDelta::Content("¡Oh no! ".to_string()));
        assert_eq!(deltas[1], LlmDelta::Content("¿Dormiste mal?".to_string()));
        match &deltas[2] {
            LlmDelta::Corrections(corrections) => {
                assert_eq!(corrections.len(), 1);
                assert_eq!(corrections[0].category, CorrectionCategory::Grammar);
            }
            other => panic!("Expected corrections, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_tool_only_response_triggers_one_follow_up() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(json!({"messages": [{"role": "developer"}, {"role": "user"}, {"role": "assistant"}, {"role": "tool", "tool_call_id": "call_9"}]})))
            .respond_with(sse_response(&[content("¿Por qué?")]))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(json!({"tool_choice": "auto"})))
            .respond_with(sse_response(&[tool_fragment(
                Some("call_9"),
                Some("report_corrections"),
                REPORT,
            )]))
            .expect(1)
            .mount(&server)
            .await;

        let deltas: Vec<LlmDelta> = collect(&generator(&server))
            .await
            .into_iter()
            .map(|d| d.unwrap())
            .collect();

        assert!(matches!(deltas[0], LlmDelta::Corrections(_)));
        assert_eq!(deltas[1], LlmDelta::Content("¿Por qué?".to_string()));
        assert_eq!(deltas.len(), 2);
    }

    #[tokio::test]
    async fn test_malformed_report_still_streams_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(sse_response(&[
                content("Vale."),
                tool_fragment(Some("call_2"), Some("report_corrections"), "{\"corrections\": [{"),
            ]))
            .expect(1)
            .mount(&server)
            .await;

        let deltas: Vec<LlmDelta> = collect(&generator(&server))
            .await
            .into_iter()
            .map(|d| d.unwrap())
            .collect();

        assert_eq!(deltas, vec![LlmDelta::Content("Vale.".to_string())]);
    }

    #[tokio::test]
    async fn test_empty_report_after_reply_yields_only_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(sse_response(&[
                content("Muy bien."),
                tool_fragment(Some("call_3"), Some("report_corrections"), ""),
            ]))
            .expect(1)
            .mount(&server)
            .await;

        let deltas: Vec<LlmDelta> = collect(&generator(&server))
            .await
            .into_iter()
            .map(|d| d.unwrap())
            .collect();

        assert_eq!(deltas, vec![LlmDelta::Content("Muy bien.".to_string())]);
    }

    #[tokio::test]
    async fn test_out_of_range_tool_index_does_not_abort_reply() {
        let server = MockServer::start().await;
        let mut stray = tool_fragment(Some("call_x"), Some("other"), "{}");
        stray["choices"][0]["delta"]["tool_calls"][0]["index"] = json!(u64::MAX);
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(sse_response(&[
                content("Claro."),
                stray,
                tool_fragment(Some("call_4"), Some("report_corrections"), REPORT),
            ]))
            .expect(1)
            .mount(&server)
            .await;

        let deltas: Vec<LlmDelta> = collect(&generator(&server))
            .await
            .into_iter()
            .map(|d| d.unwrap())
            .collect();

        assert_eq!(deltas.len(), 2);
        assert_eq!(deltas[0], LlmDelta::Content("Claro.".to_string()));
        assert!(matches!(deltas[1], LlmDelta::Corrections(_)));
    }

    #[tokio::test]
    async fn test_unterminated_event_line_is_llm_error() {
        let server = MockServer::start().await;
        let body = format!("data: {}", "a".repeat(parley_core::streaming::MAX_SSE_LINE_BYTES + 1));
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .mount(&server)
            .await;

        let results = collect(&generator(&server)).await;

        let err = results.last().unwrap().as_ref().unwrap_err();
        assert_eq!(err.phase(), Some(Phase::Llm));
        assert!(err.to_string().contains("exceeds"));
    }

    #[tokio::test]
    async fn test_http_error_is_llm_phase() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
            .mount(&server)
            .await;

        let results = collect(&generator(&server)).await;

        assert_eq!(results.len(), 1);
        let err = results[0].as_ref().unwrap_err();
        assert_eq!(err.phase(), Some(Phase::Llm));
        assert!(err.to_string().contains("500"));
    }

    #[test]
    fn test_request_without_tools_omits_tool_fields() {
        let generator = OpenAiGenerator::new(OpenAiGeneratorConfig {
            client: OpenAiClientConfig {
                endpoint: "http://localhost:1".to_string(),
                ..Default::default()
            },
            ..Default::default()
        })
        .unwrap();
        let messages = vec![ChatMessage::user("hola")];

        let json = serde_json::to_value(generator.request(&messages, false)).unwrap();
        assert!(json.get("tools").is_none());
        assert!(json.get("tool_choice").is_none());

        let json = serde_json::to_value(generator.request(&messages, true)).unwrap();
        assert_eq!(json["tools"][0]["function"]["name"], "report_corrections");
    }
}
