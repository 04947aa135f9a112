//! HTTP front end for the TTS worker.
//!
//! ## Endpoints
//!
//! - `POST /` — synthesize `{"text", "voice"}` into a WAV download
//!   (requires the `x-api-key` header)
//! - `GET /health` — liveness probe

use crate::auth::{API_KEY_HEADER, ApiKey};
use crate::config::ServerConfig;
use crate::error::{Result, WorkerError};
use crate::synthesis::{Synthesis, WavAudio};
use crate::worker::Worker;
use axum::Router;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

/// Filename offered to clients for the synthesized audio.
pub const OUTPUT_FILENAME: &str = "output.wav";

/// Message body returned on authentication failure.
pub const UNAUTHORIZED: &str = "Unauthorized";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Body of `POST /`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsRequest {
    /// Text to speak.
    pub text: String,
    /// Voice identifier, e.g. `pf_dora`.
    pub voice: String,
}

/// JSON body of every non-audio response from `POST /`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageResponse {
    /// Human-readable outcome.
    pub message: String,
}

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `"ok"` while the process is serving.
    pub status: String,
}

// ---------------------------------------------------------------------------
// Shared application state
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct AppState {
    worker: Worker,
    api_key: ApiKey,
    request_timeout: Duration,
}

/// Build the router without binding a socket.
pub fn router(worker: Worker, api_key: ApiKey, request_timeout: Duration) -> Router {
    let state = AppState {
        worker,
        api_key,
        request_timeout,
    };
    Router::new()
        .route("/", post(handle_synthesize))
        .route("/health", get(handle_health))
        // No payload cap: a wrong key must still see 401, never 413.
        .layer(DefaultBodyLimit::disable())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// TtsServer
// ---------------------------------------------------------------------------

/// The worker's HTTP listener, serving in a background task.
pub struct TtsServer {
    addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl TtsServer {
    /// Bind `{config.host}:{config.port}` (port `0` auto-assigns) and start serving.
    ///
    /// # Errors
    ///
    /// Returns an error if the TCP listener cannot bind.
    pub async fn start(worker: Worker, api_key: ApiKey, config: &ServerConfig) -> Result<Self> {
        let app = router(
            worker,
            api_key,
            Duration::from_secs(config.request_timeout_secs),
        );

        let bind_addr = format!("{}:{}", config.host, config.port);
        let listener = TcpListener::bind(&bind_addr)
            .await
            .map_err(|e| WorkerError::Server(format!("bind {bind_addr} failed: {e}")))?;
        let addr = listener
            .local_addr()
            .map_err(|e| WorkerError::Server(format!("failed to get local addr: {e}")))?;

        info!("TTS server listening on http://{addr}/");

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!("TTS server error: {e}");
            }
        });

        Ok(Self { addr, handle })
    }

    /// Returns the address the server is listening on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Returns the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Abort the server task.
    pub fn shutdown(&self) {
        self.handle.abort();
    }
}

impl Drop for TtsServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// `GET /health`
async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_owned(),
    })
}

/// `POST /` — authenticate, then synthesize.
///
/// The body is taken raw so that authentication is decided before any
/// parsing: a bad key gets 401 whatever the body looks like.
async fn handle_synthesize(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let span = info_span!("tts_request", request_id = %Uuid::new_v4());
    async move {
        let presented = headers.get(API_KEY_HEADER).map(|v| v.as_bytes());
        if !state.api_key.matches(presented) {
            warn!(
                "rejected request: {} api key",
                if presented.is_some() { "wrong" } else { "missing" }
            );
            return message(StatusCode::UNAUTHORIZED, UNAUTHORIZED);
        }

        let request: TtsRequest = match serde_json::from_slice(&body) {
            Ok(r) => r,
            Err(e) => {
                warn!("rejected request: invalid body: {e}");
                return message(
                    StatusCode::UNPROCESSABLE_ENTITY,
                    format!("invalid request body: {e}"),
                );
            }
        };

        let inference = state.worker.inference(request.text, request.voice);
        match tokio::time::timeout(state.request_timeout, inference).await {
            Ok(Ok(Synthesis::Audio(audio))) => wav_response(audio),
            Ok(Ok(Synthesis::Empty)) => {
                message(StatusCode::UNPROCESSABLE_ENTITY, "No audio generated")
            }
            Ok(Err(e)) => {
                error!("inference failed: {e}");
                message(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
            Err(_) => {
                error!(
                    "inference exceeded {}s timeout",
                    state.request_timeout.as_secs_f32()
                );
                message(StatusCode::GATEWAY_TIMEOUT, "Inference timed out")
            }
        }
    }
    .instrument(span)
    .await
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn message(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(MessageResponse {
            message: message.into(),
        }),
    )
        .into_response()
}

fn wav_response(audio: WavAudio) -> Response {
    info!(
        "serving {} ({} bytes, {:.2}s)",
        OUTPUT_FILENAME,
        audio.bytes.len(),
        audio.duration_secs()
    );
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "audio/wav".to_owned()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{OUTPUT_FILENAME}\""),
            ),
        ],
        audio.bytes,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn tts_request_parses() {
        let req: TtsRequest =
            serde_json::from_str(r#"{"text":"Hello world","voice":"pf_dora"}"#).unwrap();
        assert_eq!(req.text, "Hello world");
        assert_eq!(req.voice, "pf_dora");
    }

    #[test]
    fn tts_request_requires_both_fields() {
        assert!(serde_json::from_str::<TtsRequest>(r#"{"text":"hi"}"#).is_err());
        assert!(serde_json::from_str::<TtsRequest>(r#"{"text":1,"voice":"pf_dora"}"#).is_err());
    }

    #[test]
    fn unauthorized_body_shape() {
        let body = serde_json::to_string(&MessageResponse {
            message: UNAUTHORIZED.to_owned(),
        })
        .unwrap();
        assert_eq!(body, r#"{"message":"Unauthorized"}"#);
    }

    #[test]
    fn wav_response_headers() {
        let resp = wav_response(WavAudio {
            bytes: vec![1, 2, 3],
            sample_rate: 22_050,
            num_samples: 1,
            chunk_count: 1,
        });
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "audio/wav");
        assert_eq!(
            resp.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"output.wav\""
        );
    }

    #[test]
    fn message_response_status() {
        let resp = message(StatusCode::UNAUTHORIZED, UNAUTHORIZED);
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "application/json");
    }
}
