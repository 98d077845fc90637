//! Turn orchestration
//!
//! Each turn runs as one tracked task that writes its events, in order,
//! into a bounded channel. The returned [`TurnStream`] reads that channel;
//! dropping it cancels the turn. Whatever way a turn ends, its scope is
//! closed before the channel is released, so finalizers (provider
//! cancellation and persist-on-exit) have always run once the stream
//! has ended.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use futures::{Stream, StreamExt};
use parley_config::ConversationConfig;
use parley_core::{
    CancellationToken, ConversationEvent, ConversationInput, ConversationMessage, ConversationPayload,
    Correction, Generator, LlmDelta, Result, Synthesizer, Transcriber, UserSettings,
};
use parley_persistence::{
    ConversationRepository, NewConversation, PersistedTurn, PersistenceError, TurnRecord,
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::DropGuard;
use tokio_util::task::TaskTracker;
use tracing::Instrument;
use uuid::Uuid;

use crate::gate::GateState;
use crate::persist::{PendingTurn, PersistTarget, TurnPersister};
use crate::scope::TurnScope;

/// Turn execution settings
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Prior messages kept in the generation context
    pub max_context_messages: usize,
    pub persist_timeout: Duration,
    pub persist_retries: u32,
    pub event_buffer: usize,
    /// Synthesizer voice
    pub voice: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_settings(
            &ConversationConfig::default(),
            parley_config::constants::providers::VOICE,
        )
    }
}

impl PipelineConfig {
    pub fn from_settings(conversation: &ConversationConfig, voice: impl Into<String>) -> Self {
        Self {
            max_context_messages: conversation.max_context_messages,
            persist_timeout: Duration::from_millis(conversation.persist_timeout_ms),
            persist_retries: conversation.persist_retries,
            event_buffer: conversation.event_buffer.max(1),
            voice: voice.into(),
        }
    }
}

/// Caller identity and learning settings for one turn
#[derive(Debug, Clone)]
pub struct TurnContext {
    pub user_id: String,
    pub settings: UserSettings,
}

/// Ordered events of one turn
///
/// A provider failure ends the stream with an `Err` item. Dropping the
/// stream cancels the turn.
pub struct TurnStream {
    inner: ReceiverStream<Result<ConversationEvent>>,
    conversation_id: Uuid,
    turn_id: Uuid,
    _cancel_on_drop: DropGuard,
}

impl TurnStream {
    pub fn conversation_id(&self) -> Uuid {
        self.conversation_id
    }

    pub fn turn_id(&self) -> Uuid {
        self.turn_id
    }
}

impl Stream for TurnStream {
    type Item = Result<ConversationEvent>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().inner.poll_next_unpin(cx)
    }
}

/// Runs conversation turns against the provider ports and the store
pub struct TurnPipeline {
    stt: Arc<dyn Transcriber>,
    llm: Arc<dyn Generator>,
    tts: Arc<dyn Synthesizer>,
    persister: Arc<TurnPersister>,
    config: Arc<PipelineConfig>,
    root: CancellationToken,
    tracker: TaskTracker,
}

impl TurnPipeline {
    pub fn new(
        stt: Arc<dyn Transcriber>,
        llm: Arc<dyn Generator>,
        tts: Arc<dyn Synthesizer>,
        repo: Arc<dyn ConversationRepository>,
        config: PipelineConfig,
    ) -> Self {
        let persister = Arc::new(TurnPersister::new(
            repo,
            config.persist_timeout,
            config.persist_retries,
        ));

        Self {
            stt,
            llm,
            tts,
            persister,
            config: Arc::new(config),
            root: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Start a turn and return its event stream
    pub fn run(&self, payload: ConversationPayload, ctx: TurnContext) -> TurnStream {
        let ConversationPayload {
            messages,
            input,
            tts,
            conversation_id,
        } = payload;

        let is_first = conversation_id.is_none();
        let conversation_id = conversation_id.unwrap_or_else(Uuid::new_v4);
        let turn_id = Uuid::new_v4();
        let token = self.root.child_token();
        let (tx, rx) = mpsc::channel(self.config.event_buffer);

        let span = tracing::info_span!(
            "turn",
            %conversation_id,
            %turn_id,
            user_id = %ctx.user_id,
            first = is_first,
            audio = input.is_audio(),
        );

        let task = TurnTask {
            stt: self.stt.clone(),
            llm: self.llm.clone(),
            tts: self.tts.clone(),
            persister: self.persister.clone(),
            config: self.config.clone(),
            conversation_id,
            turn_id,
            is_first,
            messages,
            speak: tts,
            ctx,
            token: token.clone(),
            tx,
        };
        self.tracker.spawn(task.run(input).instrument(span));

        TurnStream {
            inner: ReceiverStream::new(rx),
            conversation_id,
            turn_id,
            _cancel_on_drop: token.drop_guard(),
        }
    }

    /// Turns still running, finalizers included
    pub fn active_turns(&self) -> usize {
        self.tracker.len()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.root.is_cancelled()
    }

    /// Storage backend name
    pub fn backend(&self) -> &'static str {
        self.persister.backend()
    }

    /// Cancel every running turn without waiting
    ///
    /// Turns started afterwards are cancelled immediately.
    pub fn cancel_all(&self) {
        self.root.cancel();
    }

    /// Cancel every turn and wait up to `grace` for their finalizers
    ///
    /// Returns false if some turns were still running when the grace
    /// period ran out.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.root.cancel();
        self.tracker.close();

        match tokio::time::timeout(grace, self.tracker.wait()).await {
            Ok(()) => {
                tracing::info!("All turns finished");
                true
            }
            Err(_) => {
                tracing::warn!(remaining = self.tracker.len(), "Turns still running after grace period");
                false
            }
        }
    }
}

enum Produced {
    /// Input was empty after trimming
    Empty,
    /// Reply generated (and synthesized if requested)
    Completed,
}

struct TurnTask {
    stt: Arc<dyn Transcriber>,
    llm: Arc<dyn Generator>,
    tts: Arc<dyn Synthesizer>,
    persister: Arc<TurnPersister>,
    config: Arc<PipelineConfig>,
    conversation_id: Uuid,
    turn_id: Uuid,
    is_first: bool,
    messages: Vec<ConversationMessage>,
    speak: bool,
    ctx: TurnContext,
    token: CancellationToken,
    tx: mpsc::Sender<Result<ConversationEvent>>,
}

impl TurnTask {
    async fn run(self, input: ConversationInput) {
        let started = Instant::now();
        let pending = Arc::new(PendingTurn::new(self.target()));
        let scope = TurnScope::new(self.token.clone());

        // Registered first so it runs last, after provider work is cancelled
        {
            let pending = pending.clone();
            let persister = self.persister.clone();
            scope.defer(async move {
                if pending.gate.try_claim() {
                    let result = persister.persist(&pending).await;
                    pending.gate.mark_saved();
                    record_persist("cleanup", &result);
                }
            });
        }
        {
            let token = scope.token().clone();
            scope.defer(async move { token.cancel() });
        }

        let produced = tokio::select! {
            biased;
            _ = self.token.cancelled() => None,
            result = self.produce(input, &pending) => Some(result),
        };

        let outcome = match produced {
            Some(Ok(Produced::Empty)) => {
                tracing::debug!("Empty input, turn skipped");
                self.emit(ConversationEvent::Done).await;
                "empty"
            }
            Some(Ok(Produced::Completed)) => {
                self.emit(ConversationEvent::Done).await;

                // Not raced against cancellation; bounded by the persist timeout
                if !self.token.is_cancelled() && pending.gate.try_claim() {
                    let result = self.persister.persist(&pending).await;
                    pending.gate.mark_saved();
                    record_persist("inline", &result);
                    self.emit(persist_event(result)).await;
                }
                "completed"
            }
            Some(Err(e)) if !e.is_cancelled() => {
                tracing::warn!(error = %e, phase = ?e.phase(), "Turn failed");
                if self.tx.send(Err(e)).await.is_err() {
                    tracing::debug!("Client gone before error delivery");
                }
                "error"
            }
            _ => {
                match pending.gate.state() {
                    GateState::Streaming => tracing::debug!("Turn cancelled before ready"),
                    state => tracing::info!(gate = ?state, "Turn interrupted"),
                }
                "interrupted"
            }
        };

        scope.close().await;

        metrics::counter!("parley_turns_total", "outcome" => outcome).increment(1);
        metrics::histogram!("parley_turn_duration_seconds").record(started.elapsed().as_secs_f64());
    }

    async fn produce(&self, input: ConversationInput, pending: &PendingTurn) -> Result<Produced> {
        let is_audio = input.is_audio();
        let raw = match input {
            ConversationInput::Audio(audio) => self.transcribe(audio).await?,
            ConversationInput::Text(text) => text,
        };

        let user_text = raw.trim().to_string();
        if user_text.is_empty() {
            return Ok(Produced::Empty);
        }

        if self.is_first {
            self.emit(ConversationEvent::Started {
                conversation_id: self.conversation_id,
            })
            .await;
        }
        if is_audio {
            self.emit(ConversationEvent::Transcription {
                text: user_text.clone(),
            })
            .await;
        }

        let context = self.context(&user_text);
        let (reply, corrections) = self.generate(&context).await?;

        pending.ready(TurnRecord {
            turn_id: self.turn_id,
            user_text,
            assistant_text: reply.clone(),
            corrections,
        });
        self.emit(ConversationEvent::LlmDone { text: reply.clone() }).await;

        if self.speak && !reply.trim().is_empty() {
            self.synthesize(&reply).await?;
        }

        Ok(Produced::Completed)
    }

    async fn transcribe(&self, audio: Vec<u8>) -> Result<String> {
        let mut text = String::new();
        let mut deltas =
            self.stt
                .transcribe_stream(audio, self.ctx.settings.target_language, self.token.clone());

        while let Some(delta) = deltas.next().await {
            text.push_str(&delta?);
        }
        Ok(text)
    }

    async fn generate(&self, context: &[ConversationMessage]) -> Result<(String, Vec<Correction>)> {
        let mut reply = String::new();
        let mut corrections = Vec::new();
        let mut deltas = self
            .llm
            .generate_stream(context, &self.ctx.settings, self.token.clone());

        while let Some(delta) = deltas.next().await {
            match delta? {
                LlmDelta::Content(text) => {
                    reply.push_str(&text);
                    self.emit(ConversationEvent::LlmChunk { text }).await;
                }
                LlmDelta::Corrections(reported) => {
                    corrections = reported.clone();
                    self.emit(ConversationEvent::Corrections {
                        corrections: reported,
                    })
                    .await;
                }
            }
        }

        Ok((reply, corrections))
    }

    async fn synthesize(&self, text: &str) -> Result<()> {
        let mut chunks = self
            .tts
            .synthesize_stream(text, &self.config.voice, self.token.clone());

        while let Some(chunk) = chunks.next().await {
            self.emit(ConversationEvent::AudioChunk { data: chunk? }).await;
        }
        Ok(())
    }

    /// Last N prior messages followed by the new user message
    fn context(&self, user_text: &str) -> Vec<ConversationMessage> {
        let skip = self
            .messages
            .len()
            .saturating_sub(self.config.max_context_messages);

        let mut context = self.messages[skip..].to_vec();
        context.push(ConversationMessage::user(user_text));
        context
    }

    fn target(&self) -> PersistTarget {
        if self.is_first {
            let settings = &self.ctx.settings;
            PersistTarget::First(NewConversation {
                conversation_id: self.conversation_id,
                user_id: self.ctx.user_id.clone(),
                native_language: settings.native_language,
                target_language: settings.target_language,
                level: settings.level,
                provider: self.llm.provider().to_string(),
                model: self.llm.model().to_string(),
            })
        } else {
            PersistTarget::Subsequent {
                conversation_id: self.conversation_id,
                user_id: self.ctx.user_id.clone(),
            }
        }
    }

    async fn emit(&self, event: ConversationEvent) {
        metrics::counter!("parley_turn_events_total", "event" => event.tag()).increment(1);
        if self.tx.send(Ok(event)).await.is_err() {
            tracing::trace!("Event receiver dropped");
        }
    }
}

/// Access denial is reported like any other failure
fn persist_event(result: std::result::Result<PersistedTurn, PersistenceError>) -> ConversationEvent {
    match result {
        Ok(saved) => ConversationEvent::Persisted {
            conversation_id: saved.conversation_id,
            messages: saved.messages,
            corrections: saved.corrections,
        },
        Err(_) => ConversationEvent::PersistFailed,
    }
}

fn record_persist(path: &'static str, result: &std::result::Result<PersistedTurn, PersistenceError>) {
    match result {
        Ok(saved) => {
            tracing::debug!(path, corrections = saved.corrections.len(), "Turn persisted");
            metrics::counter!("parley_persist_total", "result" => "ok", "path" => path).increment(1);
        }
        Err(e) => {
            tracing::error!(path, error = %e, "Conversation persist failed");
            metrics::counter!("parley_persist_total", "result" => "failed", "path" => path).increment(1);
        }
    }
}
