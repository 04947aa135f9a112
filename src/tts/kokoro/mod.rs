//! Kokoro-82M TTS engine — single-model ONNX inference with misaki or espeak-ng phonemization.

mod download;
mod engine;
mod phonemize;

pub use engine::KokoroPipeline;
pub use phonemize::LanguageCode;
