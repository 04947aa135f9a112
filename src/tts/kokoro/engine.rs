//! Kokoro-82M ONNX inference engine.
//!
//! Per chunk: phonemize → tokenize → ONNX inference → 24 kHz audio.

use super::download::KokoroAssets;
use super::phonemize::{LanguageCode, Phonemizer};
use crate::config::WorkerConfig;
use crate::device::{ComputeDevice, execution_providers};
use crate::error::{Result, WorkerError};
use crate::tts::{AudioChunk, ChunkIter, SpeechPipeline};
use ort::session::Session;
use ort::value::Tensor;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use tracing::info;

/// Maximum context length for Kokoro (including pad tokens).
const MAX_CONTEXT: usize = 512;

/// Longest phoneme run that fits between the two pad tokens.
const MAX_PHONEMES: usize = MAX_CONTEXT - 2;

/// Width of one style vector.
const STYLE_DIM: usize = 256;

/// Output sample rate in Hz.
const SAMPLE_RATE: u32 = 24_000;

/// Kokoro TTS pipeline.
///
/// Owns the ONNX session, the tokenizer, the phonemizer for its fixed
/// language, and every voice style loaded so far.
pub struct KokoroPipeline {
    session: Session,
    tokenizer: tokenizers::Tokenizer,
    phonemizer: Phonemizer,
    voices: VoiceStore,
    lang: LanguageCode,
    device: ComputeDevice,
}

impl KokoroPipeline {
    /// Download (or reuse cached) assets and build the pipeline on `device`.
    ///
    /// # Errors
    ///
    /// Returns an error if the language is unsupported, any asset is
    /// unavailable, or the ONNX session cannot be created.
    pub fn load(config: &WorkerConfig, device: ComputeDevice) -> Result<Self> {
        let lang = LanguageCode::parse(&config.tts.lang_code)?;
        let phonemizer = Phonemizer::for_language(lang)?;

        let assets = KokoroAssets::open(&config.models)?;
        let model_path = assets.model(&config.tts.model_variant)?;
        let tokenizer_path = assets.tokenizer()?;

        info!("loading Kokoro ONNX model on {device}");
        let session = Session::builder()
            .and_then(|b| b.with_execution_providers(execution_providers(device)))
            .and_then(|b| b.with_intra_threads(config.tts.intra_threads))
            .and_then(|b| b.commit_from_file(&model_path))
            .map_err(|e| WorkerError::Model(format!("failed to load Kokoro ONNX model: {e}")))?;

        info!("loading tokenizer");
        let tokenizer = load_tokenizer(&tokenizer_path)?;

        info!(
            "Kokoro pipeline ready (lang={}, variant={}, device={device})",
            lang.code(),
            config.tts.model_variant
        );

        Ok(Self {
            session,
            tokenizer,
            phonemizer,
            voices: VoiceStore {
                assets,
                loaded: HashMap::new(),
            },
            lang,
            device,
        })
    }

    /// Language the pipeline was built for.
    pub fn language(&self) -> LanguageCode {
        self.lang
    }

    /// Device the session runs on.
    pub fn device(&self) -> ComputeDevice {
        self.device
    }
}

impl SpeechPipeline for KokoroPipeline {
    fn generate<'a>(
        &'a mut self,
        text: &'a str,
        voice: &str,
        speed: f32,
    ) -> Result<ChunkIter<'a>> {
        let style = self.voices.style(voice)?;
        Ok(Box::new(KokoroChunks {
            session: &mut self.session,
            tokenizer: &self.tokenizer,
            phonemizer: &self.phonemizer,
            style,
            speed,
            segments: split_segments(text).into_iter(),
            pending: VecDeque::new(),
            next_index: 0,
            done: false,
        }))
    }

    fn native_sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }
}

/// Voice style tensors, loaded on first use and kept for the worker's lifetime.
struct VoiceStore {
    assets: KokoroAssets,
    loaded: HashMap<String, Vec<f32>>,
}

impl VoiceStore {
    fn style(&mut self, voice: &str) -> Result<&[f32]> {
        if !self.loaded.contains_key(voice) {
            let path = self.assets.voice(voice)?;
            let styles = load_voice_styles(&path)?;
            self.loaded.insert(voice.to_owned(), styles);
        }
        self.loaded
            .get(voice)
            .map(Vec::as_slice)
            .ok_or_else(|| WorkerError::Voice(format!("voice '{voice}' not loaded")))
    }
}

/// Iterator state for one `generate` call.
struct KokoroChunks<'a> {
    session: &'a mut Session,
    tokenizer: &'a tokenizers::Tokenizer,
    phonemizer: &'a Phonemizer,
    style: &'a [f32],
    speed: f32,
    segments: std::vec::IntoIter<&'a str>,
    pending: VecDeque<(&'a str, String)>,
    next_index: usize,
    done: bool,
}

impl Iterator for KokoroChunks<'_> {
    type Item = Result<AudioChunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            if let Some((graphemes, phonemes)) = self.pending.pop_front() {
                match self.synthesize(&phonemes) {
                    Ok(Some(samples)) => {
                        let chunk = AudioChunk {
                            index: self.next_index,
                            graphemes: graphemes.to_owned(),
                            phonemes,
                            samples,
                        };
                        self.next_index += 1;
                        return Some(Ok(chunk));
                    }
                    Ok(None) => continue,
                    Err(e) => {
                        self.done = true;
                        return Some(Err(e));
                    }
                }
            }

            let segment = self.segments.next()?;
            match self.phonemizer.phonemize(segment) {
                Ok(ps) => {
                    for piece in split_phonemes(&ps, MAX_PHONEMES) {
                        self.pending.push_back((segment, piece));
                    }
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

impl KokoroChunks<'_> {
    /// Tokenize and run one phoneme run. `None` when no token survives.
    fn synthesize(&mut self, phonemes: &str) -> Result<Option<Vec<f32>>> {
        let encoding = self
            .tokenizer
            .encode(phonemes, false)
            .map_err(|e| WorkerError::Tts(format!("tokenization failed: {e}")))?;

        // Id 0 is the pad token, which is also where out-of-vocabulary
        // symbols land; drop those and add the two real pads.
        let content: Vec<i64> = encoding
            .get_ids()
            .iter()
            .filter(|&&id| id != 0)
            .map(|&id| i64::from(id))
            .collect();
        if content.is_empty() {
            return Ok(None);
        }

        let mut token_ids = Vec::with_capacity(content.len() + 2);
        token_ids.push(0);
        token_ids.extend_from_slice(&content);
        token_ids.push(0);

        if token_ids.len() > MAX_CONTEXT {
            return Err(WorkerError::Tts(format!(
                "input too long: {} tokens (max {MAX_CONTEXT})",
                token_ids.len()
            )));
        }

        let style = style_for(self.style, content.len());
        let start = std::time::Instant::now();
        let samples = run_inference(&mut *self.session, &token_ids, style, self.speed)?;
        info!(
            "inferred {} tokens → {} samples ({:.2}s audio) in {}ms",
            content.len(),
            samples.len(),
            samples.len() as f32 / SAMPLE_RATE as f32,
            start.elapsed().as_millis()
        );
        Ok(Some(samples))
    }
}

/// Pick the style vector for a run of `content_len` tokens.
///
/// The voice tensor holds one 256-dim row per possible length, row `n - 1`
/// for `n` tokens; lengths past the end use the last row.
fn style_for(styles: &[f32], content_len: usize) -> &[f32] {
    let rows = styles.len() / STYLE_DIM;
    let row = content_len
        .saturating_sub(1)
        .min(rows.saturating_sub(1));
    &styles[row * STYLE_DIM..(row + 1) * STYLE_DIM]
}

/// Split input text into segments on runs of newlines.
fn split_segments(text: &str) -> Vec<&str> {
    text.split('\n')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Break a phoneme string into runs of at most `max` characters, cutting at
/// spaces where possible.
fn split_phonemes(phonemes: &str, max: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for word in phonemes.split_whitespace() {
        let word_len = word.chars().count();
        let needed = if current.is_empty() {
            word_len
        } else {
            current_len + 1 + word_len
        };

        if needed <= max {
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(word);
            current_len = needed;
            continue;
        }

        if !current.is_empty() {
            pieces.push(std::mem::take(&mut current));
            current_len = 0;
        }

        if word_len <= max {
            current.push_str(word);
            current_len = word_len;
        } else {
            let chars: Vec<char> = word.chars().collect();
            for part in chars.chunks(max) {
                pieces.push(part.iter().collect());
            }
        }
    }

    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

/// Run a single ONNX inference call.
fn run_inference(
    session: &mut Session,
    token_ids: &[i64],
    style: &[f32],
    speed: f32,
) -> Result<Vec<f32>> {
    use ort::session::{SessionInputValue, SessionInputs};

    let seq_len = token_ids.len();

    let input_ids = Tensor::from_array(([1_usize, seq_len], token_ids.to_vec()))
        .map_err(|e| WorkerError::Tts(format!("failed to create input_ids tensor: {e}")))?;
    let style_tensor = Tensor::from_array(([1_usize, STYLE_DIM], style.to_vec()))
        .map_err(|e| WorkerError::Tts(format!("failed to create style tensor: {e}")))?;
    let speed_tensor = Tensor::from_array(([1_usize], vec![speed]))
        .map_err(|e| WorkerError::Tts(format!("failed to create speed tensor: {e}")))?;

    let mut feed: HashMap<String, SessionInputValue> = HashMap::new();
    feed.insert("input_ids".to_string(), input_ids.into());
    feed.insert("style".to_string(), style_tensor.into());
    feed.insert("speed".to_string(), speed_tensor.into());

    let outputs = session
        .run(SessionInputs::from(feed))
        .map_err(|e| WorkerError::Tts(format!("ONNX inference failed: {e}")))?;

    // Output: shape [1, num_samples]
    let (_shape, data) = outputs[0_usize]
        .try_extract_tensor::<f32>()
        .map_err(|e| WorkerError::Tts(format!("failed to extract output tensor: {e}")))?;

    Ok(data.to_vec())
}

/// Load and patch the Kokoro tokenizer.
///
/// `tokenizers` cannot deserialize the `TemplateProcessing` post-processor in
/// Kokoro's `tokenizer.json`, and the model section lacks a type tag. Both
/// are fixed up in the JSON before loading; pads are added by hand.
fn load_tokenizer(path: &Path) -> Result<tokenizers::Tokenizer> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        WorkerError::Model(format!(
            "failed to read tokenizer file {}: {e}",
            path.display()
        ))
    })?;

    let mut json: serde_json::Value = serde_json::from_str(&raw)
        .map_err(|e| WorkerError::Model(format!("failed to parse tokenizer JSON: {e}")))?;

    if let Some(obj) = json.as_object_mut() {
        obj.remove("post_processor");

        if let Some(model) = obj.get_mut("model").and_then(|m| m.as_object_mut()) {
            model
                .entry("type")
                .or_insert_with(|| serde_json::Value::String("WordLevel".to_owned()));
            model
                .entry("unk_token")
                .or_insert_with(|| serde_json::Value::String("$".to_owned()));
        }
    }

    let patched = serde_json::to_string(&json)
        .map_err(|e| WorkerError::Model(format!("failed to serialize patched tokenizer: {e}")))?;

    tokenizers::Tokenizer::from_bytes(patched)
        .map_err(|e| WorkerError::Model(format!("failed to load tokenizer: {e}")))
}

/// Load a voice style `.bin` file as a flat f32 vector.
///
/// The file is raw little-endian f32 with shape `(N, 1, 256)`.
fn load_voice_styles(path: &Path) -> Result<Vec<f32>> {
    let bytes = std::fs::read(path).map_err(|e| {
        WorkerError::Voice(format!("failed to read voice file {}: {e}", path.display()))
    })?;
    let styles = decode_voice_styles(&bytes)?;
    info!(
        "loaded voice style {}: {} entries of {STYLE_DIM} dims",
        path.display(),
        styles.len() / STYLE_DIM
    );
    Ok(styles)
}

fn decode_voice_styles(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(WorkerError::Voice(format!(
            "voice file size {} is not a multiple of 4 (expected f32 array)",
            bytes.len()
        )));
    }
    let float_count = bytes.len() / 4;
    if float_count == 0 || float_count % STYLE_DIM != 0 {
        return Err(WorkerError::Voice(format!(
            "voice file has {float_count} floats, not a positive multiple of {STYLE_DIM}"
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn segments_split_on_newline_runs() {
        assert_eq!(
            split_segments("Olá.\n\n  Tudo bem?  \nSim"),
            vec!["Olá.", "Tudo bem?", "Sim"]
        );
        assert!(split_segments("").is_empty());
        assert!(split_segments(" \n\n\t").is_empty());
    }

    #[test]
    fn short_phonemes_stay_whole() {
        assert_eq!(split_phonemes("oˈla ˈmũdu", 510), vec!["oˈla ˈmũdu"]);
        assert!(split_phonemes("", 510).is_empty());
    }

    #[test]
    fn long_phonemes_split_at_spaces() {
        let pieces = split_phonemes("aa bb cc dd", 5);
        assert_eq!(pieces, vec!["aa bb", "cc dd"]);
        for p in &pieces {
            assert!(p.chars().count() <= 5);
        }
    }

    #[test]
    fn oversized_word_is_hard_split() {
        assert_eq!(
            split_phonemes("ab abcdefg c", 3),
            vec!["ab", "abc", "def", "g c"]
        );
    }

    #[test]
    fn split_counts_chars_not_bytes() {
        // Each of these is one char but two bytes.
        let pieces = split_phonemes("ɐɐ ɐɐ", 5);
        assert_eq!(pieces, vec!["ɐɐ ɐɐ"]);
    }

    #[test]
    fn style_row_follows_token_count() {
        let mut styles = Vec::new();
        for row in 0..3 {
            styles.extend(std::iter::repeat_n(row as f32, STYLE_DIM));
        }
        assert_eq!(style_for(&styles, 0)[0], 0.0);
        assert_eq!(style_for(&styles, 1)[0], 0.0);
        assert_eq!(style_for(&styles, 2)[0], 1.0);
        assert_eq!(style_for(&styles, 3)[0], 2.0);
        assert_eq!(style_for(&styles, 400)[0], 2.0);
        assert_eq!(style_for(&styles, 1).len(), STYLE_DIM);
    }

    #[test]
    fn voice_styles_decode_little_endian() {
        let mut bytes = Vec::new();
        for i in 0..STYLE_DIM * 2 {
            bytes.extend_from_slice(&(i as f32).to_le_bytes());
        }
        let styles = decode_voice_styles(&bytes).unwrap();
        assert_eq!(styles.len(), STYLE_DIM * 2);
        assert_eq!(styles[STYLE_DIM], STYLE_DIM as f32);
    }

    #[test]
    fn malformed_voice_files_rejected() {
        assert!(matches!(
            decode_voice_styles(&[0, 0, 0]),
            Err(WorkerError::Voice(_))
        ));
        assert!(matches!(
            decode_voice_styles(&[0; 4 * 100]),
            Err(WorkerError::Voice(_))
        ));
        assert!(matches!(
            decode_voice_styles(&[]),
            Err(WorkerError::Voice(_))
        ));
    }

    #[test]
    fn tokenizer_patch_adds_type_and_drops_post_processor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokenizer.json");
        let json = serde_json::json!({
            "version": "1.0",
            "truncation": null,
            "padding": null,
            "added_tokens": [],
            "normalizer": null,
            "pre_tokenizer": {"type": "Whitespace"},
            "post_processor": {"type": "TemplateProcessing", "single": [], "pair": [], "special_tokens": {}},
            "decoder": null,
            "model": {"vocab": {"$": 0, "a": 1, "b": 2}}
        });
        std::fs::write(&path, json.to_string()).unwrap();

        let tokenizer = load_tokenizer(&path).unwrap();
        let ids = tokenizer.encode("a b", false).unwrap().get_ids().to_vec();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    #[ignore = "downloads Kokoro weights and needs espeak-ng"]
    fn portuguese_synthesis_is_deterministic() {
        let config = WorkerConfig::default();
        let mut pipeline = KokoroPipeline::load(&config, ComputeDevice::Cpu).unwrap();
        let mut lengths = Vec::new();
        for _ in 0..2 {
            let chunks: Vec<AudioChunk> = pipeline
                .generate("Olá mundo.", "pf_dora", 1.5)
                .unwrap()
                .collect::<Result<_>>()
                .unwrap();
            assert!(!chunks.is_empty());
            lengths.push((
                chunks.len(),
                chunks.iter().map(|c| c.samples.len()).sum::<usize>(),
            ));
        }
        assert_eq!(lengths[0], lengths[1]);
    }
}
