//! Guards and decoders for streams consumed from providers

use futures::{Stream, StreamExt};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::traits::DeltaStream;
use crate::{Error, Phase, Result};

/// Default ceiling on silence from a provider stream
pub const DEFAULT_STALL_TIMEOUT: Duration = Duration::from_secs(15);

/// Limits applied to one provider stream
#[derive(Debug, Clone)]
pub struct StreamGuard {
    pub phase: Phase,
    /// Maximum time between two items before the stream is abandoned
    pub stall_timeout: Duration,
    pub cancel: CancellationToken,
}

impl StreamGuard {
    pub fn new(phase: Phase, cancel: CancellationToken) -> Self {
        Self {
            phase,
            stall_timeout: DEFAULT_STALL_TIMEOUT,
            cancel,
        }
    }

    pub fn with_stall_timeout(mut self, stall_timeout: Duration) -> Self {
        self.stall_timeout = stall_timeout;
        self
    }
}

enum Step<T> {
    Item(Result<T>),
    End,
    Stalled,
    Cancelled,
}

/// Wrap a provider stream so that it observes cancellation and stalls
///
/// The wrapped stream ends after the first error. Cancellation yields
/// `Error::Cancelled`, silence longer than the stall timeout yields
/// `Error::Stalled`.
pub fn guard_stream<'a, S, T>(inner: S, guard: StreamGuard) -> DeltaStream<'a, T>
where
    S: Stream<Item = Result<T>> + Send + 'a,
    T: Send + 'a,
{
    Box::pin(async_stream::stream! {
        let mut inner = Box::pin(inner);
        loop {
            let step = tokio::select! {
                biased;
                _ = guard.cancel.cancelled() => Step::Cancelled,
                next = tokio::time::timeout(guard.stall_timeout, inner.next()) => match next {
                    Ok(Some(item)) => Step::Item(item),
                    Ok(None) => Step::End,
                    Err(_) => Step::Stalled,
                },
            };

            match step {
                Step::Item(Ok(item)) => yield Ok(item),
                Step::Item(Err(e)) => {
                    yield Err(e);
                    break;
                }
                Step::End => break,
                Step::Stalled => {
                    tracing::warn!(phase = %guard.phase, after = ?guard.stall_timeout, "Provider stream stalled");
                    yield Err(Error::Stalled { phase: guard.phase, after: guard.stall_timeout });
                    break;
                }
                Step::Cancelled => {
                    yield Err(Error::Cancelled(guard.phase));
                    break;
                }
            }
        }
    })
}

/// Incremental decoder for `text/event-stream` bodies
///
/// Feeds raw body chunks and returns the payload of every complete
/// `data:` line. Blank lines, comments, other fields and the `[DONE]`
/// sentinel are dropped. Multi-byte characters split across chunks are
/// reassembled before decoding.
///
/// A line that grows past the configured maximum without a newline is
/// rejected with [`LineTooLong`].
#[derive(Debug)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    max_line: usize,
}

/// Default ceiling on one undelimited SSE line
pub const MAX_SSE_LINE_BYTES: usize = 1024 * 1024;

/// An SSE line exceeded the decoder's limit
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("event-stream line exceeds {limit} bytes")]
pub struct LineTooLong {
    pub limit: usize,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self {
            buffer: Vec::new(),
            max_line: MAX_SSE_LINE_BYTES,
        }
    }
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_line(mut self, max_line: usize) -> Self {
        self.max_line = max_line;
        self
    }

    /// Append a chunk and drain every complete line
    pub fn push(&mut self, chunk: &[u8]) -> std::result::Result<Vec<String>, LineTooLong> {
        self.buffer.extend_from_slice(chunk);

        let mut payloads = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(data) = Self::data_of(&line) {
                payloads.push(data);
            }
        }

        if self.buffer.len() > self.max_line {
            self.buffer.clear();
            return Err(LineTooLong { limit: self.max_line });
        }
        Ok(payloads)
    }

    /// Flush a trailing line that was not newline-terminated
    pub fn finish(&mut self) -> Option<String> {
        let line = std::mem::take(&mut self.buffer);
        Self::data_of(&line)
    }

    fn data_of(line: &[u8]) -> Option<String> {
        let line = String::from_utf8_lossy(line);
        let line = line.trim_end_matches(['\r', '\n']);
        let data = line.strip_prefix("data:")?;
        let data = data.strip_prefix(' ').unwrap_or(data);
        if data.is_empty() || data == "[DONE]" {
            return None;
        }
        Some(data.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[test]
    fn test_sse_decoder_splits_lines() {
        let mut decoder = SseDecoder::new();
        let out = decoder.push(b"data: {\"a\":1}\n\ndata: {\"b\"").unwrap();
        assert_eq!(out, vec!["{\"a\":1}".to_string()]);

        let out = decoder.push(b":2}\r\n: keep-alive\nevent: x\ndata: [DONE]\n").unwrap();
        assert_eq!(out, vec!["{\"b\":2}".to_string()]);
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn test_sse_decoder_reassembles_split_utf8() {
        let mut decoder = SseDecoder::new();
        let bytes = "data: ñ\n".as_bytes();
        // split inside the two-byte 'ñ'
        assert!(decoder.push(&bytes[..7]).unwrap().is_empty());
        assert_eq!(decoder.push(&bytes[7..]).unwrap(), vec!["ñ".to_string()]);
    }

    #[test]
    fn test_sse_decoder_rejects_unterminated_line() {
        let mut decoder = SseDecoder::new().with_max_line(16);
        assert_eq!(
            decoder.push(b"data: ok\ndata: 0123456789").unwrap(),
            vec!["ok".to_string()]
        );
        assert_eq!(
            decoder.push(b"abcdefghij"),
            Err(LineTooLong { limit: 16 })
        );
    }

    #[test]
    fn test_sse_decoder_flushes_trailing_line() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: tail").unwrap().is_empty());
        assert_eq!(decoder.finish(), Some("tail".to_string()));
    }

    #[tokio::test]
    async fn test_guard_passes_items_through() {
        let inner = stream::iter(vec![Ok(1), Ok(2)]);
        let guard = StreamGuard::new(Phase::Llm, CancellationToken::new());
        let items: Vec<_> = guard_stream(inner, guard).collect().await;
        assert_eq!(items, vec![Ok(1), Ok(2)]);
    }

    #[tokio::test]
    async fn test_guard_stops_after_error() {
        let inner = stream::iter(vec![
            Ok(1),
            Err(Error::provider(Phase::Tts, "boom")),
            Ok(3),
        ]);
        let guard = StreamGuard::new(Phase::Tts, CancellationToken::new());
        let items: Vec<_> = guard_stream(inner, guard).collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[1].is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_guard_reports_stall() {
        let inner = stream::pending::<Result<u8>>();
        let guard = StreamGuard::new(Phase::Stt, CancellationToken::new())
            .with_stall_timeout(Duration::from_secs(15));
        let items: Vec<_> = guard_stream(inner, guard).collect().await;
        assert_eq!(
            items,
            vec![Err(Error::Stalled {
                phase: Phase::Stt,
                after: Duration::from_secs(15)
            })]
        );
    }

    #[tokio::test]
    async fn test_guard_observes_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let inner = stream::pending::<Result<u8>>();
        let guard = StreamGuard::new(Phase::Llm, cancel);
        let items: Vec<_> = guard_stream(inner, guard).collect().await;
        assert_eq!(items, vec![Err(Error::Cancelled(Phase::Llm))]);
    }
}
