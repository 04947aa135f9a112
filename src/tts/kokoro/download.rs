//! Model asset download from HuggingFace Hub.

use crate::config::ModelConfig;
use crate::error::{Result, WorkerError};
use hf_hub::api::sync::{ApiBuilder, ApiRepo};
use std::path::PathBuf;
use tracing::info;

/// Handle on the Kokoro asset repository.
///
/// Files are fetched on first request and served from the hf-hub cache
/// afterwards.
pub struct KokoroAssets {
    repo_id: String,
    repo: ApiRepo,
}

impl KokoroAssets {
    /// Open the repository named in `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HF Hub client cannot be built.
    pub fn open(config: &ModelConfig) -> Result<Self> {
        let mut builder = ApiBuilder::new().with_progress(false);
        if let Some(dir) = &config.cache_dir {
            builder = builder.with_cache_dir(dir.clone());
        }
        let api = builder
            .build()
            .map_err(|e| WorkerError::Model(format!("HF Hub API init failed: {e}")))?;
        Ok(Self {
            repo_id: config.repo_id.clone(),
            repo: api.model(config.repo_id.clone()),
        })
    }

    /// Path to the ONNX model for `variant`.
    ///
    /// # Errors
    ///
    /// Returns an error if the download fails.
    pub fn model(&self, variant: &str) -> Result<PathBuf> {
        self.fetch(model_filename(variant))
    }

    /// Path to `tokenizer.json`.
    ///
    /// # Errors
    ///
    /// Returns an error if the download fails.
    pub fn tokenizer(&self) -> Result<PathBuf> {
        self.fetch("tokenizer.json")
    }

    /// Path to the style tensor for `voice`.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Voice`] if the identifier is malformed or the
    /// repository has no such voice.
    pub fn voice(&self, voice: &str) -> Result<PathBuf> {
        validate_voice_id(voice)?;
        let file = voice_filename(voice);
        info!("ensuring voice: {}/{file}", self.repo_id);
        self.repo
            .get(&file)
            .map_err(|e| WorkerError::Voice(format!("unknown voice '{voice}': {e}")))
    }

    fn fetch(&self, file: &str) -> Result<PathBuf> {
        info!("ensuring Kokoro asset: {}/{file}", self.repo_id);
        self.repo
            .get(file)
            .map_err(|e| WorkerError::Model(format!("failed to download {file}: {e}")))
    }
}

/// Map a user-facing variant name to the ONNX filename inside the `onnx/` subfolder.
pub fn model_filename(variant: &str) -> &'static str {
    match variant {
        "fp32" => "onnx/model.onnx",
        "fp16" => "onnx/model_fp16.onnx",
        "q8" | "quantized" => "onnx/model_quantized.onnx",
        "q8f16" => "onnx/model_q8f16.onnx",
        "q4" => "onnx/model_q4.onnx",
        "q4f16" => "onnx/model_q4f16.onnx",
        _ => {
            info!("unknown model variant '{variant}', falling back to fp32");
            "onnx/model.onnx"
        }
    }
}

/// Repository path of a voice's style tensor.
pub fn voice_filename(voice: &str) -> String {
    format!("voices/{voice}.bin")
}

/// Reject identifiers that cannot name a voice file, such as paths.
///
/// # Errors
///
/// Returns [`WorkerError::Voice`] for empty identifiers or ones containing
/// anything but ASCII letters, digits and underscores.
pub fn validate_voice_id(voice: &str) -> Result<()> {
    if voice.is_empty() {
        return Err(WorkerError::Voice("voice identifier is empty".into()));
    }
    if !voice
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_')
    {
        return Err(WorkerError::Voice(format!(
            "invalid voice identifier '{voice}'"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn variant_filenames() {
        assert_eq!(model_filename("fp32"), "onnx/model.onnx");
        assert_eq!(model_filename("q8"), "onnx/model_quantized.onnx");
        assert_eq!(model_filename("quantized"), "onnx/model_quantized.onnx");
        assert_eq!(model_filename("q4f16"), "onnx/model_q4f16.onnx");
        assert_eq!(model_filename("bogus"), "onnx/model.onnx");
    }

    #[test]
    fn voice_file_lives_under_voices() {
        assert_eq!(voice_filename("pf_dora"), "voices/pf_dora.bin");
    }

    #[test]
    fn known_voice_ids_are_valid() {
        for id in ["pf_dora", "pm_alex", "af_heart", "bf_emma", "ef_dora"] {
            assert!(validate_voice_id(id).is_ok(), "{id}");
        }
    }

    #[test]
    fn path_like_voice_ids_rejected() {
        for id in ["", "../secret", "voices/pf_dora", "pf dora", "pf_dora.bin"] {
            assert!(
                matches!(validate_voice_id(id), Err(WorkerError::Voice(_))),
                "{id:?}"
            );
        }
    }
}
