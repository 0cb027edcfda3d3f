//! Prometheus metrics registration and export.

use prometheus::{
    CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, IntCounter, Opts, Registry,
    TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all demo-forge metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Jobs accepted by the service.
pub static JOBS_SUBMITTED: OnceLock<IntCounter> = OnceLock::new();

/// Jobs that reached a terminal state, labeled by status.
pub static JOBS_FINISHED: OnceLock<CounterVec> = OnceLock::new();

/// Jobs currently running.
pub static ACTIVE_JOBS: OnceLock<Gauge> = OnceLock::new();

/// Stage execution duration in seconds, labeled by stage and outcome.
pub static STAGE_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Stage failures, labeled by stage.
pub static STAGE_FAILURES: OnceLock<CounterVec> = OnceLock::new();

/// Snapshots discarded because a subscriber queue was full.
pub static DROPPED_UPDATES: OnceLock<IntCounter> = OnceLock::new();

/// LLM calls, labeled by model and status.
pub static LLM_REQUESTS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// LLM call latency in seconds, labeled by model.
pub static LLM_LATENCY: OnceLock<HistogramVec> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Safe to call more than once; later calls leave the first registry in place.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric construction or registration fails.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    if REGISTRY.get().is_some() {
        return Ok(());
    }

    let registry = Registry::new();

    // Job metrics
    let jobs_submitted = IntCounter::new(
        "demo_forge_jobs_submitted_total",
        "Total number of provisioning jobs submitted",
    )?;

    let jobs_finished = CounterVec::new(
        Opts::new(
            "demo_forge_jobs_finished_total",
            "Total number of jobs that reached a terminal state",
        ),
        &["status"],
    )?;

    let active_jobs = Gauge::new("demo_forge_active_jobs", "Number of jobs currently running")?;

    // Stage metrics
    let stage_duration = HistogramVec::new(
        HistogramOpts::new(
            "demo_forge_stage_duration_seconds",
            "Stage execution duration in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 180.0, 600.0]),
        &["stage", "outcome"],
    )?;

    let stage_failures = CounterVec::new(
        Opts::new("demo_forge_stage_failures_total", "Total stage failures"),
        &["stage"],
    )?;

    // Streaming metrics
    let dropped_updates = IntCounter::new(
        "demo_forge_dropped_updates_total",
        "Progress snapshots dropped for slow subscribers",
    )?;

    // LLM metrics
    let llm_requests_total = CounterVec::new(
        Opts::new("demo_forge_llm_requests_total", "Total LLM API requests"),
        &["model", "status"],
    )?;

    let llm_latency = HistogramVec::new(
        HistogramOpts::new(
            "demo_forge_llm_latency_seconds",
            "LLM API request latency in seconds",
        )
        .buckets(vec![0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 90.0]),
        &["model"],
    )?;

    registry.register(Box::new(jobs_submitted.clone()))?;
    registry.register(Box::new(jobs_finished.clone()))?;
    registry.register(Box::new(active_jobs.clone()))?;
    registry.register(Box::new(stage_duration.clone()))?;
    registry.register(Box::new(stage_failures.clone()))?;
    registry.register(Box::new(dropped_updates.clone()))?;
    registry.register(Box::new(llm_requests_total.clone()))?;
    registry.register(Box::new(llm_latency.clone()))?;

    // If any of these fail, another thread initialized first (idempotent)
    let _ = REGISTRY.set(registry);
    let _ = JOBS_SUBMITTED.set(jobs_submitted);
    let _ = JOBS_FINISHED.set(jobs_finished);
    let _ = ACTIVE_JOBS.set(active_jobs);
    let _ = STAGE_DURATION.set(stage_duration);
    let _ = STAGE_FAILURES.set(stage_failures);
    let _ = DROPPED_UPDATES.set(dropped_updates);
    let _ = LLM_REQUESTS_TOTAL.set(llm_requests_total);
    let _ = LLM_LATENCY.set(llm_latency);

    tracing::info!("Prometheus metrics initialized");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// Returns a comment line instead of failing when the registry is missing or
/// encoding fails.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        assert!(init_metrics().is_ok());
        assert!(init_metrics().is_ok());
        assert!(REGISTRY.get().is_some());
    }

    #[test]
    fn test_export_after_init() {
        init_metrics().unwrap();
        if let Some(counter) = JOBS_SUBMITTED.get() {
            counter.inc();
        }
        let text = export_metrics();
        assert!(!text.starts_with("# Error"));
        assert!(text.contains("demo_forge_jobs_submitted_total"));
    }
}
