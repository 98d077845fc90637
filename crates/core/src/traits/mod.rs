//! Capability ports for the external AI providers
//!
//! Every provider is consumed through one of these traits so that the
//! turn pipeline can be driven by real HTTP adapters or by test doubles.
//!
//! ```text
//!   - Transcriber: audio -> stream of text deltas
//!   - Generator:   messages + settings -> stream of content / correction deltas
//!   - Synthesizer: text -> stream of audio byte chunks
//! ```
//!
//! All three take a cancellation token and must stop producing output
//! promptly once it fires.

mod generator;
mod speech;

use futures::Stream;
use std::pin::Pin;

use crate::Result;

pub use generator::{Generator, LlmDelta};
pub use speech::{Synthesizer, Transcriber};

/// Lazy, fallible stream of deltas produced by a provider
pub type DeltaStream<'a, T> = Pin<Box<dyn Stream<Item = Result<T>> + Send + 'a>>;
