// src/api.rs
//! HTTP entry surface: enqueue, batch trigger, requeue sweep, read models.

use std::sync::Arc;

use axum::{
    extract::{Path, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::error::StorageError;
use crate::model::MessageRole;
use crate::store::{AnalysisRecordStore, JobQueue, MessageSource};
use crate::worker::{enqueue_filter, AnalysisWorker, NOTE_NOT_USER};

const DASHBOARD_TOPICS: usize = 10;

/// Shared-secret bearer check. An empty secret accepts nothing.
#[derive(Clone)]
pub struct BearerAuth {
    digest: Option<[u8; 32]>,
}

impl BearerAuth {
    pub fn new(secret: &str) -> Self {
        let secret = secret.trim();
        Self {
            digest: (!secret.is_empty()).then(|| Sha256::digest(secret.as_bytes()).into()),
        }
    }

    /// Compares fixed-size digests so timing does not depend on the common prefix length.
    pub fn accepts(&self, presented: Option<&str>) -> bool {
        let (Some(expected), Some(token)) = (self.digest.as_ref(), presented) else {
            return false;
        };
        let got: [u8; 32] = Sha256::digest(token.trim().as_bytes()).into();
        expected
            .iter()
            .zip(got.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

#[derive(Clone)]
pub struct AppState {
    pub worker: Arc<AnalysisWorker>,
    pub queue: Arc<dyn JobQueue>,
    pub messages: Arc<dyn MessageSource>,
    pub records: Arc<dyn AnalysisRecordStore>,
    pub auth: BearerAuth,
}

pub fn create_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/analysis/jobs", post(enqueue_job))
        .route("/api/analysis/jobs/{id}", get(job_status))
        .route("/api/analysis/process", post(process_batch))
        .route("/api/analysis/requeue", post(requeue))
        .route("/api/children/{id}/risk", get(child_risk))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_bearer));

    Router::new()
        .route("/health", get(|| async { "OK" }))
        .merge(protected)
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

async fn require_bearer(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let presented = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    if !state.auth.accepts(presented) {
        warn!(target: "api", path = %req.uri().path(), "rejected unauthorized request");
        return ApiError::Unauthorized.into_response();
    }
    next.run(req).await
}

#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    NotFound(String),
    Storage(StorageError),
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        ApiError::Storage(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, msg) = match self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            ApiError::NotFound(what) => (StatusCode::NOT_FOUND, what),
            ApiError::Storage(e) => {
                warn!(target: "api", error = %e, "storage error while serving request");
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        };
        (status, Json(json!({ "error": msg }))).into_response()
    }
}

// --- enqueue: direct reference or database-webhook shape ---

#[derive(Debug, Deserialize)]
struct WebhookRecord {
    id: i64,
    #[serde(default)]
    role: Option<MessageRole>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EnqueueBody {
    Direct { message_id: i64 },
    Webhook { record: WebhookRecord },
}

fn skipped(reason: &str) -> Response {
    (
        StatusCode::OK,
        Json(json!({ "skipped": true, "reason": reason })),
    )
        .into_response()
}

async fn enqueue_job(
    State(state): State<AppState>,
    Json(body): Json<EnqueueBody>,
) -> Result<Response, ApiError> {
    let message_id = match body {
        EnqueueBody::Direct { message_id } => message_id,
        EnqueueBody::Webhook { record } => {
            if matches!(record.role, Some(r) if r != MessageRole::User) {
                return Ok(skipped(NOTE_NOT_USER));
            }
            record.id
        }
    };

    let msg = state
        .messages
        .message(message_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("message {message_id} not found")))?;
    if let Err(reason) = enqueue_filter(&msg) {
        return Ok(skipped(reason));
    }

    let job = state.queue.enqueue(message_id).await?;
    info!(target: "api", job_id = job.id, message_id, "analysis job enqueued");
    Ok((
        StatusCode::CREATED,
        Json(json!({ "job_id": job.id, "status": job.status })),
    )
        .into_response())
}

async fn job_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    let job = state
        .queue
        .job(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("job {id} not found")))?;
    Ok(Json(job).into_response())
}

async fn process_batch(State(state): State<AppState>) -> Result<Response, ApiError> {
    let summary = state.worker.run_batch().await?;
    Ok(Json(summary).into_response())
}

async fn requeue(State(state): State<AppState>) -> Result<Response, ApiError> {
    let summary = state.worker.requeue_sweep().await?;
    Ok(Json(summary).into_response())
}

async fn child_risk(
    State(state): State<AppState>,
    Path(child_id): Path<String>,
) -> Result<Response, ApiError> {
    let latest = state.records.latest_record(&child_id).await?;
    let topics = state.records.top_topics(&child_id, DASHBOARD_TOPICS).await?;
    Ok(Json(json!({
        "child_id": child_id,
        "latest": latest,
        "topics": topics,
    }))
    .into_response())
}
