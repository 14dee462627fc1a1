use std::net::SocketAddr;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::engine::Engine;
use crate::error::{ErrorCode, ForgeError};
use crate::scheduler::{AppSpec, CancelOutcome, JobStatus};

#[derive(Clone)]
pub struct DashboardState {
    pub engine: Engine,
}

#[derive(Serialize)]
struct SubmitJobResponse {
    job_id: Uuid,
    status: JobStatus,
    estimated_completion: DateTime<Utc>,
}

#[derive(Serialize)]
struct CancelJobResponse {
    ok: bool,
    status: JobStatus,
}

/// Maps operation errors onto HTTP responses with a classified body.
struct ApiError(ForgeError);

impl From<ForgeError> for ApiError {
    fn from(err: ForgeError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            ForgeError::JobNotFound(_) => (StatusCode::NOT_FOUND, None),
            ForgeError::ArtifactNotFound(_) => {
                (StatusCode::NOT_FOUND, Some(ErrorCode::ArtifactNotFound))
            }
            ForgeError::Validation(_) => (StatusCode::BAD_REQUEST, Some(ErrorCode::ValidationError)),
            ForgeError::AdmissionRejected { queue_position } => {
                return (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(json!({
                        "error": {
                            "code": ErrorCode::AdmissionRejected,
                            "message": self.0.to_string(),
                            "retryable": true,
                        },
                        "queue_position": queue_position,
                    })),
                )
                    .into_response();
            }
            ForgeError::Io(_) | ForgeError::Internal(_) => {
                tracing::error!(error = %self.0, "Request failed");
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({
                        "error": {
                            "code": ErrorCode::UnexpectedError,
                            "message": "An unexpected error occurred",
                        }
                    })),
                )
                    .into_response();
            }
        };
        (
            status,
            Json(json!({
                "error": {
                    "code": code,
                    "message": self.0.to_string(),
                }
            })),
        )
            .into_response()
    }
}

pub fn router(state: DashboardState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(index_handler))
        .route("/api/jobs", get(list_jobs_handler).post(submit_job_handler))
        .route("/api/jobs/{id}", get(job_status_handler))
        .route("/api/jobs/{id}/cancel", post(cancel_job_handler))
        .route("/api/jobs/{id}/artifact", get(artifact_handler))
        .route("/api/jobs/{id}/install", post(install_handler))
        .route("/api/stats", get(stats_handler))
        .route("/download/{id}", get(download_page_handler))
        .layer(cors)
        .with_state(state)
}

pub async fn run_dashboard(addr: SocketAddr, state: DashboardState, shutdown: CancellationToken) {
    let app = router(state);

    tracing::info!(addr = %addr, "Starting API server");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "Failed to bind API server");
            return;
        }
    };

    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await });
    if let Err(e) = server.await {
        tracing::error!(error = %e, "API server failed");
    }
}

async fn index_handler() -> Html<&'static str> {
    Html(include_str!("index.html"))
}

async fn submit_job_handler(
    State(state): State<DashboardState>,
    Json(spec): Json<AppSpec>,
) -> Result<Json<SubmitJobResponse>, ApiError> {
    let view = state.engine.submit(spec).await?;
    Ok(Json(SubmitJobResponse {
        job_id: view.job_id,
        status: view.status,
        estimated_completion: view.estimated_completion,
    }))
}

async fn list_jobs_handler(State(state): State<DashboardState>) -> impl IntoResponse {
    Json(state.engine.list().await)
}

async fn job_status_handler(
    State(state): State<DashboardState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.engine.status(&id).await?))
}

async fn cancel_job_handler(
    State(state): State<DashboardState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CancelJobResponse>, ApiError> {
    let status = match state.engine.cancel(&id).await? {
        CancelOutcome::Cancelled => JobStatus::Cancelled,
        CancelOutcome::AlreadyTerminal(status) => status,
    };
    Ok(Json(CancelJobResponse { ok: true, status }))
}

async fn artifact_handler(
    State(state): State<DashboardState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let path = state.engine.artifact(&id).await?;
    let file = tokio::fs::File::open(&path).await.map_err(|e| {
        tracing::warn!(job_id = %id, error = %e, "Package vanished before download");
        ForgeError::ArtifactNotFound(id)
    })?;
    let length = file.metadata().await.map(|m| m.len()).ok();
    let disposition = format!("attachment; filename=\"{}.apk\"", id);

    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/vnd.android.package-archive")
        .header(header::CONTENT_DISPOSITION, disposition);
    if let Some(length) = length {
        response = response.header(header::CONTENT_LENGTH, length);
    }
    response
        .body(Body::from_stream(ReaderStream::new(file)))
        .map_err(|e| ApiError(ForgeError::Internal(e.to_string())))
}

async fn install_handler(
    State(state): State<DashboardState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.engine.install(&id).await?))
}

async fn download_page_handler(
    State(state): State<DashboardState>,
    Path(id): Path<Uuid>,
) -> Result<Html<String>, ApiError> {
    let package = state.engine.share(&id).await?;
    Ok(Html(package.page_html))
}

async fn stats_handler(State(state): State<DashboardState>) -> impl IntoResponse {
    Json(state.engine.stats().await)
}
