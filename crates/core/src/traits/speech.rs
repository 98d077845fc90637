//! Speech processing ports

use crate::{CancellationToken, DeltaStream, Language};

/// Speech-to-text capability
///
/// # Example
///
/// ```ignore
/// let stt: Arc<dyn Transcriber> = Arc::new(OpenAiTranscriber::new(config)?);
/// let text: String = stt
///     .transcribe_stream(audio, Language::Es, cancel)
///     .try_collect::<Vec<_>>()
///     .await?
///     .concat();
/// ```
pub trait Transcriber: Send + Sync + 'static {
    /// Transcribe one recorded utterance
    ///
    /// # Arguments
    /// * `audio` - Encoded audio (WAV) of the whole utterance
    /// * `language` - Expected spoken language, used as a recognition hint
    /// * `cancel` - Token that aborts the request when fired
    ///
    /// # Returns
    /// Stream of text deltas; concatenated they form the transcription
    fn transcribe_stream<'a>(
        &'a self,
        audio: Vec<u8>,
        language: Language,
        cancel: CancellationToken,
    ) -> DeltaStream<'a, String>;

    /// Model name for logging
    fn model_name(&self) -> &str;
}

/// Text-to-speech capability
pub trait Synthesizer: Send + Sync + 'static {
    /// Synthesize a full reply
    ///
    /// # Arguments
    /// * `text` - Text to speak
    /// * `voice` - Provider voice identifier
    /// * `cancel` - Token that aborts the request when fired
    ///
    /// # Returns
    /// Stream of raw audio chunks in arrival order
    fn synthesize_stream<'a>(
        &'a self,
        text: &'a str,
        voice: &'a str,
        cancel: CancellationToken,
    ) -> DeltaStream<'a, Vec<u8>>;

    /// Model name for logging
    fn model_name(&self) -> &str;
}
