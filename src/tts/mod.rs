//! Text-to-speech synthesis using Kokoro-82M.
//!
//! A [`SpeechPipeline`] turns `(text, voice)` into a sequence of
//! [`AudioChunk`]s, one per segment of the input. The production pipeline is
//! [`KokoroPipeline`]; the HTTP layer only sees the trait.

mod kokoro;

pub use kokoro::{KokoroPipeline, LanguageCode};

use crate::error::Result;

/// One segment of synthesized audio.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    /// Position in emission order, starting at 0.
    pub index: usize,
    /// Source text the chunk was synthesized from.
    pub graphemes: String,
    /// Phoneme string fed to the model.
    pub phonemes: String,
    /// Mono f32 samples at the pipeline's native sample rate.
    pub samples: Vec<f32>,
}

/// Lazily produced chunks. Iteration stops after the first error.
pub type ChunkIter<'a> = Box<dyn Iterator<Item = Result<AudioChunk>> + 'a>;

/// A loaded text-to-speech model.
///
/// Implementations are not expected to be re-entrant; callers serialise
/// access (see [`crate::worker::Worker`]).
pub trait SpeechPipeline: Send {
    /// Start synthesizing `text` with `voice` at `speed`.
    ///
    /// Voice resolution happens up front, so an unknown voice fails here
    /// rather than part-way through iteration.
    ///
    /// # Errors
    ///
    /// Returns an error if the voice cannot be loaded.
    fn generate<'a>(&'a mut self, text: &'a str, voice: &str, speed: f32)
    -> Result<ChunkIter<'a>>;

    /// Sample rate of the samples in emitted chunks, in Hz.
    fn native_sample_rate(&self) -> u32;
}
