//! HTTP worker binary: loads the Kokoro pipeline once, then serves `POST /`.
//!
//! Requires `API_KEY` in the environment (a `.env` file in the working
//! directory is read first).

use clap::Parser;
use kokoro_worker::{ApiKey, TtsServer, Worker, WorkerConfig};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Kokoro text-to-speech worker.
#[derive(Parser)]
#[command(name = "kokoro-worker", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the bind host.
    #[arg(long)]
    host: Option<String>,

    /// Override the bind port.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("kokoro_worker=info,hf_hub=warn,ort=warn")),
        )
        .init();

    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let mut config = WorkerConfig::load(cli.config.as_deref())?;
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    let api_key = ApiKey::from_env()?;

    info!("kokoro-worker v{} starting", env!("CARGO_PKG_VERSION"));
    let load_config = config.clone();
    let worker = tokio::task::spawn_blocking(move || Worker::load(&load_config)).await??;

    let server = TtsServer::start(worker, api_key, &config.server).await?;
    info!("ready on port {}", server.port());

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    server.shutdown();
    Ok(())
}
