//! Prometheus metrics for jobs, stages, streaming and LLM usage.
//!
//! ```ignore
//! use demo_forge::metrics::{init_metrics, export_metrics};
//!
//! init_metrics()?;
//! let text = export_metrics(); // served on GET /metrics
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::{
    record_dropped_update, record_job_finished, record_job_started, record_job_submitted,
    record_llm_request, record_stage,
};
pub use prometheus::{export_metrics, init_metrics, REGISTRY};
