//! Request handlers.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use futures::Stream;
use serde::{Deserialize, Serialize};

use super::error::{ApiError, ApiResult};
use crate::jobs::{Job, JobSummary};
use crate::metrics;
use crate::service::ForgeService;

pub type AppState = Arc<ForgeService>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub source_reference: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub job_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub jobs: usize,
}

pub async fn health(State(service): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        jobs: service.registry().len(),
    })
}

pub async fn metrics_text() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::export_metrics(),
    )
}

/// `POST /api/jobs`
pub async fn submit_job(
    State(service): State<AppState>,
    body: Result<Json<SubmitRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    let Json(request) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let handle = service.submit(&request.source_reference)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            job_id: handle.job_id().to_string(),
        }),
    ))
}

/// `GET /api/jobs`
pub async fn list_jobs(State(service): State<AppState>) -> Json<Vec<JobSummary>> {
    Json(service.registry().list())
}

/// `GET /api/jobs/{job_id}`
pub async fn get_job(
    State(service): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<Job>> {
    service
        .registry()
        .snapshot(&job_id)
        .map(Json)
        .ok_or_else(|| not_found(&job_id))
}

/// `GET /api/jobs/{job_id}/stream`
///
/// One `snapshot` event per published job state, starting with the current
/// one. The response ends after the terminal snapshot.
pub async fn stream_job(
    State(service): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let handle = service
        .registry()
        .get(&job_id)
        .ok_or_else(|| not_found(&job_id))?;
    let mut subscription = handle
        .subscribe()
        .await
        .ok_or_else(|| ApiError::Internal(format!("progress stream for job '{}' is gone", job_id)))?;
    tracing::debug!(job_id = %job_id, "Progress subscriber attached");

    let stream = async_stream::stream! {
        while let Some(snapshot) = subscription.recv().await {
            match Event::default().event("snapshot").json_data(snapshot.as_ref()) {
                Ok(event) => yield Ok::<_, Infallible>(event),
                Err(e) => tracing::warn!(job_id = %snapshot.job_id, error = %e, "Snapshot could not be encoded"),
            }
        }
        let dropped = subscription.dropped();
        if dropped > 0 {
            tracing::debug!(dropped, "Progress subscriber fell behind");
        }
    };
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// `DELETE /api/jobs/{job_id}`
pub async fn delete_job(
    State(service): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<StatusCode> {
    if service.registry().remove(&job_id) {
        tracing::info!(job_id = %job_id, "Job removed");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found(&job_id))
    }
}

fn not_found(job_id: &str) -> ApiError {
    ApiError::NotFound(format!("job '{}' does not exist", job_id))
}
