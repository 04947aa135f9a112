//! kokoro-worker: Kokoro-82M text-to-speech behind a single HTTP endpoint.
//!
//! A worker process loads one TTS pipeline at startup and serves it over
//! HTTP:
//! HTTP request → API-key check → inference → WAV encode → HTTP response
//!
//! # Architecture
//!
//! - **Device**: picks CUDA or CPU for ONNX Runtime once per process
//! - **TTS**: Kokoro-82M (ONNX) behind the [`tts::SpeechPipeline`] trait
//! - **Synthesis**: concatenates pipeline chunks and encodes 16-bit PCM WAV
//! - **Worker**: owns the loaded pipeline and serialises access to it
//! - **Server**: `axum` endpoint with `x-api-key` authentication

pub mod auth;
pub mod config;
pub mod device;
pub mod error;
pub mod server;
pub mod synthesis;
pub mod tts;
pub mod worker;

pub use auth::ApiKey;
pub use config::WorkerConfig;
pub use error::{Result, WorkerError};
pub use server::TtsServer;
pub use synthesis::{Synthesis, WavAudio};
pub use worker::Worker;
