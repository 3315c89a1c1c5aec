//! HTTP API server.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/repos` | Submit a repository for ingestion |
//! | `GET`  | `/api/repos/{id}/status` | Fetch a job's current state |
//! | `GET`  | `/api/repos/{id}/progress` | Live progress stream (SSE) |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! Error responses are JSON:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "url must not be empty" } }
//! ```
//!
//! Codes: `unauthorized` (401), `bad_request` (400), `repo_too_large` (400),
//! `not_found` (404), `internal` (500).
//!
//! # Progress streaming
//!
//! The SSE endpoint subscribes to the job's progress feed, sends a
//! handshake event immediately, and relays events as JSON until a terminal
//! one (100% or error-tagged) arrives, after which the stream ends. There
//! is no replay: a client connecting after the job finished only ever sees
//! the handshake. A dropped connection unsubscribes its handler.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser
//! clients polling status and holding SSE connections open.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};

use crate::ingest::{IngestService, SubmitError, SubmitOutcome};
use crate::models::{IngestionJob, JobStatus, ProgressEvent};
use crate::progress::SubscriptionGuard;

/// Shared application state passed to all route handlers via Axum's
/// `State` extractor. The service is already cheap to clone.
#[derive(Clone)]
struct AppState {
    service: IngestService,
}

/// Starts the HTTP server on `bind`. Runs until the process terminates.
pub async fn run_server(bind: &str, service: IngestService) -> anyhow::Result<()> {
    let app = router(service);

    tracing::info!(%bind, "listening");
    let listener = tokio::net::TcpListener::bind(bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Builds the application router. Split from [`run_server`] so tests can
/// drive handlers without binding a socket.
pub fn router(service: IngestService) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/repos", post(handle_submit))
        .route("/api/repos/{id}/status", get(handle_status))
        .route("/api/repos/{id}/progress", get(handle_progress))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(AppState { service })
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(code: &str, message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: code.to_string(),
        message: message.into(),
    }
}

fn unauthorized(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::UNAUTHORIZED,
        code: "unauthorized".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn internal(err: anyhow::Error) -> AppError {
    tracing::error!(error = %format!("{err:#}"), "request failed");
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: "internal server error".to_string(),
    }
}

/// Caller identity comes from the `x-user-id` header; there is no session
/// layer in front of this API.
fn require_user(headers: &HeaderMap) -> Result<String, AppError> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string())
        .ok_or_else(|| unauthorized("missing x-user-id header"))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /api/repos ============

#[derive(Deserialize)]
struct SubmitRequest {
    url: String,
    /// Display name; derived from the URL when omitted.
    name: Option<String>,
}

#[derive(Serialize)]
struct JobResponse {
    id: String,
    name: String,
    url: String,
    status: JobStatus,
    created_at: String,
}

impl From<&IngestionJob> for JobResponse {
    fn from(job: &IngestionJob) -> Self {
        Self {
            id: job.id.clone(),
            name: job.name.clone(),
            url: job.url.clone(),
            status: job.status,
            created_at: job.created_at.to_rfc3339(),
        }
    }
}

/// Last path segment of the repository URL, without a `.git` suffix.
fn name_from_url(url: &str) -> String {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(url)
        .trim_end_matches(".git")
        .to_string()
}

/// Submits a repository. Returns `201` with the new job, or `200` with
/// the existing one when this user already submitted this URL.
async fn handle_submit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SubmitRequest>,
) -> Result<Response, AppError> {
    let user_id = require_user(&headers)?;

    let url = request.url.trim();
    if url.is_empty() {
        return Err(bad_request("bad_request", "url must not be empty"));
    }

    let name = match request.name {
        Some(name) if !name.trim().is_empty() => name.trim().to_string(),
        _ => name_from_url(url),
    };

    match state.service.submit(&user_id, url, &name).await {
        Ok(SubmitOutcome::Existing(job)) => {
            Ok((StatusCode::OK, Json(JobResponse::from(&job))).into_response())
        }
        Ok(SubmitOutcome::Started(job)) => {
            Ok((StatusCode::CREATED, Json(JobResponse::from(&job))).into_response())
        }
        Err(err @ SubmitError::RepoTooLarge { .. }) => {
            Err(bad_request("repo_too_large", err.to_string()))
        }
        Err(err @ SubmitError::SizeProbeFailed(_)) => {
            Err(bad_request("bad_request", err.to_string()))
        }
        Err(SubmitError::Internal(err)) => Err(internal(err)),
    }
}

// ============ GET /api/repos/{id}/status ============

async fn handle_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobResponse>, AppError> {
    let job = state
        .service
        .store()
        .get_job(&id)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found(format!("no job with id: {id}")))?;

    Ok(Json(JobResponse::from(&job)))
}

// ============ GET /api/repos/{id}/progress ============

/// SSE progress stream. Subscription happens before the handshake is
/// queued so no event published after the request arrives can be missed.
async fn handle_progress(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let bus = state.service.bus().clone();
    let (tx, rx) = mpsc::unbounded_channel::<ProgressEvent>();

    let relay = tx.clone();
    let subscription = bus.subscribe(&id, move |event| {
        // A send after the client went away just drops the event.
        let _ = relay.send(event.clone());
    });
    let guard = SubscriptionGuard::new(bus, subscription);

    let _ = tx.send(ProgressEvent::new(
        "Connection established. Waiting for logs...",
        0,
        Some("Calculating...".to_string()),
    ));

    // The guard rides along in the stream state; dropping the stream
    // (terminal event or client disconnect) unsubscribes.
    let stream = futures::stream::unfold(Some((rx, guard)), |state| async move {
        let (mut rx, guard) = state?;
        let event = rx.recv().await?;

        let payload = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
        let next = if event.is_terminal() { None } else { Some((rx, guard)) };
        Some((Ok(Event::default().data(payload)), next))
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_name_from_url() {
        assert_eq!(name_from_url("https://github.com/acme/widgets"), "widgets");
        assert_eq!(name_from_url("https://github.com/acme/widgets.git"), "widgets");
        assert_eq!(name_from_url("https://github.com/acme/widgets/"), "widgets");
    }

    #[test]
    fn user_header_is_required() {
        let mut headers = HeaderMap::new();
        assert!(require_user(&headers).is_err());

        headers.insert("x-user-id", "u1".parse().unwrap());
        assert_eq!(require_user(&headers).unwrap(), "u1");
    }
}
