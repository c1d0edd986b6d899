use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use shared::{
    domain::{JobId, WalletAddress},
    error::{ApiError, ErrorCode},
    protocol::{StatusReport, SubmitJobRequest, SubmitJobResponse},
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

mod app_state;
mod config;
mod jobs;

use app_state::AppState;
use config::{load_settings, Settings};
use jobs::{run_pipeline, JobStore};

const MAX_PROMPT_CHARS: usize = 1000;

type ApiResult<T> = Result<T, (StatusCode, Json<ApiError>)>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let settings = load_settings();
    let addr: SocketAddr = settings
        .bind_addr
        .parse()
        .with_context(|| format!("invalid bind address '{}'", settings.bind_addr))?;
    let jobs = JobStore::with_retention(settings.job_retention);
    let app = build_router(AppState {
        settings: Arc::new(settings),
        jobs,
    });

    info!(%addr, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/jobs", post(submit_job))
        .route("/jobs/:job_id", get(job_status))
        .route("/jobs/:job_id/events", get(job_events))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

fn api_error(
    status: StatusCode,
    code: ErrorCode,
    message: impl Into<String>,
) -> (StatusCode, Json<ApiError>) {
    (status, Json(ApiError::new(code, message)))
}

fn validate_submission(
    settings: &Settings,
    req: &SubmitJobRequest,
) -> ApiResult<(String, WalletAddress)> {
    let owner = WalletAddress::parse(&req.wallet_address).map_err(|e| {
        api_error(StatusCode::BAD_REQUEST, ErrorCode::Validation, e.to_string())
    })?;
    let prompt = req.prompt.trim();
    if prompt.is_empty() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            ErrorCode::Validation,
            "prompt must not be empty",
        ));
    }
    if prompt.chars().count() > MAX_PROMPT_CHARS {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            ErrorCode::Validation,
            format!("prompt exceeds {MAX_PROMPT_CHARS} characters"),
        ));
    }
    if settings.is_blocked(prompt) {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            ErrorCode::ContentRejected,
            "prompt violates content policy",
        ));
    }
    Ok((prompt.to_string(), owner))
}

async fn submit_job(
    State(state): State<AppState>,
    Json(req): Json<SubmitJobRequest>,
) -> ApiResult<(StatusCode, Json<SubmitJobResponse>)> {
    let (prompt, owner) = validate_submission(&state.settings, &req)?;
    let job_id = state.jobs.create(prompt, owner).await;
    tokio::spawn(run_pipeline(
        state.jobs.clone(),
        job_id.clone(),
        Arc::clone(&state.settings),
    ));
    Ok((StatusCode::ACCEPTED, Json(SubmitJobResponse { job_id })))
}

async fn job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<StatusReport>> {
    state
        .jobs
        .get(&JobId::new(job_id))
        .await
        .map(Json)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, ErrorCode::NotFound, "unknown job"))
}

async fn job_events(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Response {
    let job_id = JobId::new(job_id);
    if state.jobs.get(&job_id).await.is_none() {
        return api_error(StatusCode::NOT_FOUND, ErrorCode::NotFound, "unknown job").into_response();
    }
    ws.on_upgrade(move |socket| job_events_connection(state, socket, job_id))
}

/// Sends the job's current report, then every update, and closes after a terminal one.
async fn job_events_connection(state: AppState, socket: WebSocket, job_id: JobId) {
    use futures::{SinkExt, StreamExt};

    let (mut sender, mut receiver) = socket.split();
    // Subscribe before reading the current report so no update falls in between.
    let mut updates = state.jobs.subscribe();
    let jobs = state.jobs.clone();
    let topic = job_id.clone();

    let send_task = tokio::spawn(async move {
        let mut next = jobs.get(&topic).await;
        while let Some(report) = next.take() {
            let terminal = report.stage.is_terminal();
            let text = match serde_json::to_string(&report) {
                Ok(v) => v,
                Err(_) => break,
            };
            if sender.send(Message::Text(text)).await.is_err() || terminal {
                break;
            }
            next = loop {
                match updates.recv().await {
                    Ok(update) if update.job_id == topic => break Some(update),
                    Ok(_) => continue,
                    Err(RecvError::Lagged(missed)) => {
                        warn!(job_id = %topic, missed, "events: subscriber lagged; resending current");
                        break jobs.get(&topic).await;
                    }
                    Err(RecvError::Closed) => break None,
                }
            };
        }
        let _ = sender.send(Message::Close(None)).await;
    });

    debug!(job_id = %job_id, "events: subscriber connected");
    while let Some(Ok(_msg)) = receiver.next().await {}
    send_task.abort();
    debug!(job_id = %job_id, "events: subscriber disconnected");
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
