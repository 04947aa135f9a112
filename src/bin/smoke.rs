//! Local smoke test: synthesize a sample sentence straight through the
//! inference function, no HTTP involved, and write it to `output.wav`.

use anyhow::bail;
use clap::Parser;
use kokoro_worker::{Synthesis, Worker, WorkerConfig};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Synthesize one sentence to a WAV file.
#[derive(Parser)]
#[command(name = "kokoro-smoke", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Text to speak.
    #[arg(long, default_value = "Olá, este é um exemplo de síntese de fala usando Kokoro.")]
    text: String,

    /// Voice identifier.
    #[arg(long, default_value = "pf_dora")]
    voice: String,

    /// Where to write the WAV file.
    #[arg(short, long, default_value = "output.wav")]
    output: PathBuf,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("kokoro_worker=info,hf_hub=warn,ort=warn")),
        )
        .init();

    let cli = Cli::parse();
    let config = WorkerConfig::load(cli.config.as_deref())?;
    let worker = Worker::load(&config)?;

    match worker.inference_blocking(&cli.text, &cli.voice)? {
        Synthesis::Audio(audio) => {
            std::fs::write(&cli.output, &audio.bytes)?;
            info!(
                "wrote {} ({:.2}s, {} chunks)",
                cli.output.display(),
                audio.duration_secs(),
                audio.chunk_count
            );
            Ok(())
        }
        Synthesis::Empty => bail!("no audio generated for {:?}", cli.text),
    }
}
