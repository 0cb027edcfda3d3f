//! HTTP surface: job submission, polling, SSE progress, health and metrics.

pub mod error;
pub mod routes;

pub use error::{ApiError, ApiResult, ProblemDetails};
pub use routes::{AppState, SubmitRequest, SubmitResponse};

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::service::ForgeService;

/// Builds the application router.
pub fn router(service: Arc<ForgeService>) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/metrics", get(routes::metrics_text))
        .route("/api/jobs", get(routes::list_jobs).post(routes::submit_job))
        .route(
            "/api/jobs/{job_id}",
            get(routes::get_job).delete(routes::delete_job),
        )
        .route("/api/jobs/{job_id}/stream", get(routes::stream_job))
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

/// Binds `addr` and serves until the process is stopped.
pub async fn serve(service: Arc<ForgeService>, addr: &str) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "HTTP server listening");
    axum::serve(listener, router(service)).await
}
