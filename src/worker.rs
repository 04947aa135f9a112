//! Worker lifecycle: load the pipeline once, then serve inference calls.

use crate::config::{TtsConfig, WorkerConfig};
use crate::device::select_device;
use crate::error::{Result, WorkerError};
use crate::synthesis::{Synthesis, synthesize};
use crate::tts::{KokoroPipeline, SpeechPipeline};
use std::sync::{Arc, Mutex};
use tracing::info;

/// A loaded TTS pipeline and the settings it runs with.
///
/// A `Worker` only exists once its pipeline is fully constructed, so every
/// inference call sees an initialised model. Calls are serialised on an
/// internal lock; cloning a `Worker` shares the same pipeline.
#[derive(Clone)]
pub struct Worker {
    pipeline: Arc<Mutex<Box<dyn SpeechPipeline>>>,
    tts: TtsConfig,
}

impl Worker {
    /// Select a device and build the Kokoro pipeline.
    ///
    /// Blocking: downloads assets on first run and loads the ONNX session.
    ///
    /// # Errors
    ///
    /// Returns an error if device selection or pipeline construction fails.
    pub fn load(config: &WorkerConfig) -> Result<Self> {
        let device = select_device(config.tts.device)?;
        info!("loading Kokoro pipeline on device: {device}");
        let pipeline = KokoroPipeline::load(config, device)?;
        info!(
            "worker ready (lang={}, device={}, speed={}, output_rate={})",
            pipeline.language().code(),
            pipeline.device(),
            config.tts.effective_speed(),
            config.tts.sample_rate
        );
        Ok(Self::with_pipeline(Box::new(pipeline), config.tts.clone()))
    }

    /// Wrap an already-constructed pipeline.
    pub fn with_pipeline(pipeline: Box<dyn SpeechPipeline>, tts: TtsConfig) -> Self {
        Self {
            pipeline: Arc::new(Mutex::new(pipeline)),
            tts,
        }
    }

    /// Settings applied to every inference call.
    pub fn tts_config(&self) -> &TtsConfig {
        &self.tts
    }

    /// Run inference on the calling thread.
    ///
    /// # Errors
    ///
    /// Returns an error if synthesis fails or a previous call panicked while
    /// holding the pipeline.
    pub fn inference_blocking(&self, text: &str, voice: &str) -> Result<Synthesis> {
        let mut pipeline = self
            .pipeline
            .lock()
            .map_err(|_| WorkerError::Tts("pipeline lock poisoned".into()))?;
        synthesize(&mut **pipeline, text, voice, &self.tts)
    }

    /// Run inference on a blocking thread so the async runtime stays responsive.
    ///
    /// # Errors
    ///
    /// Returns an error if synthesis fails or the blocking task is lost.
    pub async fn inference(&self, text: String, voice: String) -> Result<Synthesis> {
        let worker = self.clone();
        tokio::task::spawn_blocking(move || worker.inference_blocking(&text, &voice))
            .await
            .map_err(|e| WorkerError::Tts(format!("inference task failed: {e}")))?
    }
}
