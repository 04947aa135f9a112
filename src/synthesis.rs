//! The inference function: text and voice in, encoded WAV out.
//!
//! Chunks are concatenated in emission order and written as 16-bit PCM mono
//! at the configured output rate. The WAV is built in memory; nothing touches
//! the filesystem.

use crate::config::TtsConfig;
use crate::error::{Result, WorkerError};
use crate::tts::SpeechPipeline;
use std::io::Cursor;
use tracing::{debug, info};

/// Outcome of one inference call.
#[derive(Debug, Clone, PartialEq)]
pub enum Synthesis {
    /// At least one chunk was produced.
    Audio(WavAudio),
    /// The pipeline yielded nothing, e.g. for empty or unpronounceable text.
    Empty,
}

/// An encoded WAV file plus what went into it.
#[derive(Debug, Clone, PartialEq)]
pub struct WavAudio {
    /// Complete RIFF/WAVE file.
    pub bytes: Vec<u8>,
    /// Rate recorded in the WAV header, in Hz.
    pub sample_rate: u32,
    /// Number of mono samples.
    pub num_samples: usize,
    /// How many pipeline chunks were concatenated.
    pub chunk_count: usize,
}

impl WavAudio {
    /// Playback duration at the header's sample rate.
    pub fn duration_secs(&self) -> f32 {
        self.num_samples as f32 / self.sample_rate as f32
    }
}

/// Run `pipeline` on `(text, voice)` and encode the result.
///
/// # Errors
///
/// Returns an error if the voice is unknown, any chunk fails, or encoding
/// fails. An empty result is not an error; see [`Synthesis::Empty`].
pub fn synthesize(
    pipeline: &mut dyn SpeechPipeline,
    text: &str,
    voice: &str,
    config: &TtsConfig,
) -> Result<Synthesis> {
    info!("generating speech for {:?} with voice '{voice}'", text);
    let start = std::time::Instant::now();

    let mut samples: Vec<f32> = Vec::new();
    let mut chunk_count = 0;
    for chunk in pipeline.generate(text, voice, config.effective_speed())? {
        let chunk = chunk?;
        info!(
            "generated chunk {} with gs: {:?}, ps: {:?} ({} samples)",
            chunk.index,
            chunk.graphemes,
            chunk.phonemes,
            chunk.samples.len()
        );
        samples.extend_from_slice(&chunk.samples);
        chunk_count += 1;
    }

    if chunk_count == 0 {
        info!("no audio chunks were generated");
        return Ok(Synthesis::Empty);
    }

    if pipeline.native_sample_rate() != config.sample_rate {
        debug!(
            "writing {} Hz pipeline output with a {} Hz header",
            pipeline.native_sample_rate(),
            config.sample_rate
        );
    }
    let bytes = encode_wav(&samples, config.sample_rate)?;
    let audio = WavAudio {
        bytes,
        sample_rate: config.sample_rate,
        num_samples: samples.len(),
        chunk_count,
    };
    info!(
        "synthesized {chunk_count} chunks, {:.2}s of audio, {} WAV bytes in {}ms",
        audio.duration_secs(),
        audio.bytes.len(),
        start.elapsed().as_millis()
    );
    Ok(Synthesis::Audio(audio))
}

/// Encode mono f32 samples as a 16-bit PCM WAV file.
///
/// Samples outside `[-1, 1]` are clipped.
///
/// # Errors
///
/// Returns [`WorkerError::Wav`] if the writer fails.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::with_capacity(44 + samples.len() * 2));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| WorkerError::Wav(format!("failed to create wav writer: {e}")))?;
        for &s in samples {
            let v = (s.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16;
            writer
                .write_sample(v)
                .map_err(|e| WorkerError::Wav(format!("failed to write wav sample: {e}")))?;
        }
        writer
            .finalize()
            .map_err(|e| WorkerError::Wav(format!("failed to finalize wav: {e}")))?;
    }
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::tts::{AudioChunk, ChunkIter};

    /// Emits one chunk per whitespace-separated word, `len * 100` samples each.
    struct WordPipeline {
        fail_on: Option<&'static str>,
    }

    impl SpeechPipeline for WordPipeline {
        fn generate<'a>(
            &'a mut self,
            text: &'a str,
            voice: &str,
            _speed: f32,
        ) -> Result<ChunkIter<'a>> {
            if voice != "pf_dora" {
                return Err(WorkerError::Voice(format!("unknown voice '{voice}'")));
            }
            let fail_on = self.fail_on;
            Ok(Box::new(text.split_whitespace().enumerate().map(
                move |(index, word)| {
                    if Some(word) == fail_on {
                        return Err(WorkerError::Tts("boom".into()));
                    }
                    Ok(AudioChunk {
                        index,
                        graphemes: word.to_owned(),
                        phonemes: word.to_owned(),
                        samples: vec![index as f32 / 10.0; word.len() * 100],
                    })
                },
            )))
        }

        fn native_sample_rate(&self) -> u32 {
            24_000
        }
    }

    fn pipeline() -> WordPipeline {
        WordPipeline { fail_on: None }
    }

    fn decode(bytes: &[u8]) -> (hound::WavSpec, Vec<i16>) {
        let mut reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
        let spec = reader.spec();
        let samples = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        (spec, samples)
    }

    #[test]
    fn chunks_are_concatenated_in_order() {
        let config = TtsConfig::default();
        let Synthesis::Audio(audio) =
            synthesize(&mut pipeline(), "Hello world", "pf_dora", &config).unwrap()
        else {
            panic!("expected audio");
        };
        assert_eq!(audio.chunk_count, 2);
        assert_eq!(audio.num_samples, 1000);
        assert_eq!(audio.sample_rate, 22_050);

        let (spec, samples) = decode(&audio.bytes);
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, 22_050);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(samples.len(), 1000);
        assert_eq!(samples[0], 0);
        assert_eq!(samples[499], 0);
        assert_eq!(samples[500], (0.1 * i16::MAX as f32).round() as i16);
        assert!(audio.duration_secs() > 0.0);
    }

    #[test]
    fn empty_text_is_empty_synthesis() {
        let config = TtsConfig::default();
        assert_eq!(
            synthesize(&mut pipeline(), "", "pf_dora", &config).unwrap(),
            Synthesis::Empty
        );
        assert_eq!(
            synthesize(&mut pipeline(), "   ", "pf_dora", &config).unwrap(),
            Synthesis::Empty
        );
    }

    #[test]
    fn unknown_voice_aborts() {
        let config = TtsConfig::default();
        assert!(matches!(
            synthesize(&mut pipeline(), "Hello", "xx_nobody", &config),
            Err(WorkerError::Voice(_))
        ));
    }

    #[test]
    fn chunk_failure_discards_partial_output() {
        let config = TtsConfig::default();
        let mut p = WordPipeline {
            fail_on: Some("world"),
        };
        assert!(matches!(
            synthesize(&mut p, "Hello world again", "pf_dora", &config),
            Err(WorkerError::Tts(_))
        ));
    }

    #[test]
    fn repeated_calls_are_stable() {
        let config = TtsConfig::default();
        let mut p = pipeline();
        let a = synthesize(&mut p, "Olá mundo", "pf_dora", &config).unwrap();
        let b = synthesize(&mut p, "Olá mundo", "pf_dora", &config).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn encode_clips_out_of_range_samples() {
        let bytes = encode_wav(&[2.0, -2.0, 0.5], 22_050).unwrap();
        let (_, samples) = decode(&bytes);
        assert_eq!(samples[0], i16::MAX);
        assert_eq!(samples[1], -i16::MAX);
        assert_eq!(samples[2], (0.5 * i16::MAX as f32).round() as i16);
    }

    #[test]
    fn encode_uses_requested_rate() {
        let bytes = encode_wav(&[0.0; 10], 24_000).unwrap();
        let (spec, samples) = decode(&bytes);
        assert_eq!(spec.sample_rate, 24_000);
        assert_eq!(samples.len(), 10);
        assert_eq!(&bytes[..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");
    }
}
