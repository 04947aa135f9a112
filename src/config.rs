//! Configuration types for the TTS worker.
//!
//! Everything except the API key lives here. The key is a secret and is only
//! ever read from the environment (see [`crate::auth::ApiKey::from_env`]).

use crate::device::DevicePreference;
use crate::error::{Result, WorkerError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// HuggingFace repo for Kokoro-82M ONNX models.
pub const KOKORO_REPO_ID: &str = "onnx-community/Kokoro-82M-v1.0-ONNX";

/// Top-level worker configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// HTTP listener settings.
    pub server: ServerConfig,
    /// Text-to-speech settings.
    pub tts: TtsConfig,
    /// Model asset settings.
    pub models: ModelConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to bind.
    pub host: String,
    /// Port to bind (`0` picks a free port).
    pub port: u16,
    /// Upper bound on how long a request waits for inference, in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: 8000,
            request_timeout_secs: 60,
        }
    }
}

/// Text-to-speech configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    /// Kokoro language code (`a`, `b`, `e`, `f`, `h`, `i`, `p`) or alias
    /// such as `pt-br`. The pipeline is bound to it for its whole lifetime.
    pub lang_code: String,
    /// ONNX model variant: "fp32", "fp16", "q8", "q8f16", "q4", "q4f16".
    pub model_variant: String,
    /// Speech speed multiplier (0.5–2.0).
    pub speed: f32,
    /// Sample rate written into the WAV header, in Hz.
    pub sample_rate: u32,
    /// Which compute device to run inference on.
    pub device: DevicePreference,
    /// ONNX Runtime intra-op thread count.
    pub intra_threads: usize,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            lang_code: "p".to_owned(),
            model_variant: "fp32".to_owned(),
            speed: 1.5,
            sample_rate: 22_050,
            device: DevicePreference::default(),
            intra_threads: 4,
        }
    }
}

impl TtsConfig {
    /// Speed multiplier clamped to the range the model handles well.
    pub fn effective_speed(&self) -> f32 {
        self.speed.clamp(0.5, 2.0)
    }
}

/// Model asset configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// HuggingFace repository holding the ONNX model, tokenizer and voices.
    pub repo_id: String,
    /// Override for the HuggingFace cache directory (`None` = hf-hub default).
    pub cache_dir: Option<PathBuf>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            repo_id: KOKORO_REPO_ID.to_owned(),
            cache_dir: None,
        }
    }
}

impl WorkerConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| WorkerError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| WorkerError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path, e.g. `~/.config/kokoro-worker/config.toml`.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("kokoro-worker")
            .join("config.toml")
    }

    /// Load from `path` if given, else from the default path if it exists,
    /// else fall back to defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicitly given file cannot be loaded, or the
    /// default file exists but is invalid.
    pub fn load(path: Option<&std::path::Path>) -> Result<Self> {
        match path {
            Some(p) => Self::from_file(p),
            None => {
                let default_path = Self::default_config_path();
                if default_path.exists() {
                    Self::from_file(&default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn default_config_matches_deployment() {
        let config = WorkerConfig::default();
        assert_eq!(config.tts.lang_code, "p");
        assert_eq!(config.tts.sample_rate, 22_050);
        assert!((config.tts.speed - 1.5).abs() < f32::EPSILON);
        assert_eq!(config.tts.device, DevicePreference::Auto);
        assert_eq!(config.server.request_timeout_secs, 60);
        assert_eq!(config.models.repo_id, KOKORO_REPO_ID);
        assert!(config.models.cache_dir.is_none());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: WorkerConfig = toml::from_str(
            r#"
            [server]
            port = 9000

            [tts]
            lang_code = "a"
            device = "cpu"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.tts.lang_code, "a");
        assert_eq!(config.tts.device, DevicePreference::Cpu);
        assert_eq!(config.tts.model_variant, "fp32");
    }

    #[test]
    fn effective_speed_is_clamped() {
        let mut tts = TtsConfig {
            speed: 5.0,
            ..TtsConfig::default()
        };
        assert!((tts.effective_speed() - 2.0).abs() < f32::EPSILON);
        tts.speed = 0.1;
        assert!((tts.effective_speed() - 0.5).abs() < f32::EPSILON);
        tts.speed = 1.5;
        assert!((tts.effective_speed() - 1.5).abs() < f32::EPSILON);
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = WorkerConfig::default();
        config.server.port = 8123;
        config.tts.speed = 1.25;
        config.models.cache_dir = Some(PathBuf::from("/var/cache/kokoro"));

        config.save_to_file(&path).unwrap();
        let loaded = WorkerConfig::load(Some(&path)).unwrap();
        assert_eq!(loaded.server.port, 8123);
        assert!((loaded.tts.speed - 1.25).abs() < f32::EPSILON);
        assert_eq!(
            loaded.models.cache_dir.as_deref(),
            Some(std::path::Path::new("/var/cache/kokoro"))
        );
    }

    #[test]
    fn load_missing_explicit_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = WorkerConfig::load(Some(&dir.path().join("nope.toml")));
        assert!(matches!(result, Err(WorkerError::Io(_))));
    }

    #[test]
    fn invalid_toml_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[server\nport = ").unwrap();
        assert!(matches!(
            WorkerConfig::from_file(&path),
            Err(WorkerError::Config(_))
        ));
    }
}
