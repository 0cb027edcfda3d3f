//! Recording helpers used throughout the service.
//!
//! Every helper is a no-op until [`super::init_metrics`] has run, so library
//! users and tests that never initialize metrics pay nothing.

use super::prometheus::{
    ACTIVE_JOBS, DROPPED_UPDATES, JOBS_FINISHED, JOBS_SUBMITTED, LLM_LATENCY, LLM_REQUESTS_TOTAL,
    STAGE_DURATION, STAGE_FAILURES,
};

pub fn record_job_submitted() {
    if let Some(counter) = JOBS_SUBMITTED.get() {
        counter.inc();
    }
}

/// Marks a job as running.
pub fn record_job_started() {
    if let Some(gauge) = ACTIVE_JOBS.get() {
        gauge.inc();
    }
}

/// Marks a running job as finished with `status` ("completed" or "failed").
pub fn record_job_finished(status: &str) {
    if let Some(gauge) = ACTIVE_JOBS.get() {
        gauge.dec();
    }
    if let Some(counter) = JOBS_FINISHED.get() {
        counter.with_label_values(&[status]).inc();
    }
    tracing::trace!(status, "Recorded job metric");
}

/// Records one stage execution.
pub fn record_stage(stage: &str, succeeded: bool, duration_secs: f64) {
    let outcome = if succeeded { "completed" } else { "failed" };
    if let Some(histogram) = STAGE_DURATION.get() {
        histogram
            .with_label_values(&[stage, outcome])
            .observe(duration_secs);
    }
    if !succeeded {
        if let Some(counter) = STAGE_FAILURES.get() {
            counter.with_label_values(&[stage]).inc();
        }
    }
}

pub fn record_dropped_update() {
    if let Some(counter) = DROPPED_UPDATES.get() {
        counter.inc();
    }
}

/// Records one LLM call.
pub fn record_llm_request(model: &str, success: bool, latency_secs: f64) {
    let status = if success { "success" } else { "failure" };
    if let Some(counter) = LLM_REQUESTS_TOTAL.get() {
        counter.with_label_values(&[model, status]).inc();
    }
    if let Some(histogram) = LLM_LATENCY.get() {
        histogram.with_label_values(&[model]).observe(latency_secs);
    }
}
