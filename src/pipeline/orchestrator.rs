//! Pipeline executor: runs one job's stages in order.
//!
//! The executor owns the job state machine. Every transition happens inside
//! a single [`JobHandle::update`] so that each published snapshot is
//! self-consistent, and log entries for a transition are appended before the
//! transition itself so the terminal snapshot already carries them.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use serde_json::json;

use super::stage::{Stage, StageContext, StageOutput};
use super::state::PipelineState;
use crate::agents::keys;
use crate::error::StageError;
use crate::export::SnapshotExporter;
use crate::jobs::{JobHandle, JobStatus, LogLevel};
use crate::metrics;

/// Safety net around a whole stage. Individual calls have tighter timeouts.
pub const DEFAULT_STAGE_TIMEOUT: Duration = Duration::from_secs(600);

/// How a run ended.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub status: JobStatus,
    /// The accumulated state, up to and including the last completed stage.
    pub state: PipelineState,
    pub failed_stage: Option<String>,
}

impl PipelineOutcome {
    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Completed
    }
}

enum StartAttempt {
    Started,
    /// The job was not pending; it is left as it was.
    Refused(String),
    /// The job did not fit this pipeline and has been failed.
    Rejected(String),
}

/// Sequences a fixed list of stages against one job.
#[derive(Clone)]
pub struct PipelineExecutor {
    stages: Vec<Arc<dyn Stage>>,
    stage_timeout: Duration,
    exporter: Option<SnapshotExporter>,
}

impl PipelineExecutor {
    pub fn new(stages: Vec<Arc<dyn Stage>>) -> Self {
        Self {
            stages,
            stage_timeout: DEFAULT_STAGE_TIMEOUT,
            exporter: None,
        }
    }

    pub fn with_stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = timeout;
        self
    }

    pub fn with_exporter(mut self, exporter: SnapshotExporter) -> Self {
        self.exporter = Some(exporter);
        self
    }

    /// Stage names in execution order, as recorded on new jobs.
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub fn stages(&self) -> &[Arc<dyn Stage>] {
        &self.stages
    }

    /// Runs every stage against the job behind `handle`.
    ///
    /// The job must be pending and carry one stage record per stage; a job
    /// whose records do not match is failed without running anything. The
    /// job's `source_reference` is seeded into the state as `source_url`
    /// unless `initial` already has one. Stages are never retried; the first
    /// failure (including a panic) fails the job and leaves later stages
    /// pending.
    pub async fn run(&self, handle: Arc<JobHandle>, initial: PipelineState) -> PipelineOutcome {
        let job_id = handle.job_id().to_string();
        let mut state = initial;
        if !state.contains(keys::SOURCE_URL) {
            let source = handle.snapshot().source_reference;
            state.set(keys::SOURCE_URL, json!(source));
        }

        let count = self.stages.len();
        let start = handle.update(|job| {
            if let Err(e) = job.start() {
                return StartAttempt::Refused(e.to_string());
            }
            if job.stages.len() != count {
                let reason = format!(
                    "job has {} stage records but the pipeline has {} stages",
                    job.stages.len(),
                    count
                );
                job.push_log(LogLevel::Error, format!("Pipeline not run: {}", reason), None);
                if let Err(e) = job.fail() {
                    tracing::debug!(job_id = %job.job_id, error = %e, "Job left unchanged");
                }
                return StartAttempt::Rejected(reason);
            }
            job.push_log(
                LogLevel::Info,
                format!("Pipeline started with {} stages", count),
                None,
            );
            StartAttempt::Started
        });
        match start {
            StartAttempt::Started => {}
            StartAttempt::Refused(reason) => {
                tracing::error!(job_id = %job_id, error = %reason, "Job could not be started");
                return PipelineOutcome {
                    status: handle.status(),
                    state,
                    failed_stage: None,
                };
            }
            StartAttempt::Rejected(reason) => {
                tracing::error!(job_id = %job_id, error = %reason, "Job failed before its first stage");
                metrics::record_job_started();
                metrics::record_job_finished("failed");
                self.export_job(&handle).await;
                return PipelineOutcome {
                    status: handle.status(),
                    state,
                    failed_stage: None,
                };
            }
        }
        metrics::record_job_started();
        tracing::info!(job_id = %job_id, stages = count, "Pipeline started");
        let run_started = Instant::now();

        for (index, stage) in self.stages.iter().enumerate() {
            let name = stage.name();
            if let Err(e) = handle.update(|job| job.start_stage(index)) {
                tracing::error!(job_id = %job_id, stage = name, error = %e, "Stage could not be started");
                return self
                    .finish_failed(&handle, index, name, 0, e.to_string(), state)
                    .await;
            }
            tracing::info!(job_id = %job_id, stage = name, index, "Stage started");
            handle.log(LogLevel::Info, format!("Stage {} started", name), Some(index));

            let ctx = StageContext::new(Arc::clone(&handle), index, count, name);
            let stage_started = Instant::now();
            let execution = AssertUnwindSafe(stage.execute(&state, &ctx)).catch_unwind();
            let result = match tokio::time::timeout(self.stage_timeout, execution).await {
                Ok(Ok(result)) => result,
                Ok(Err(payload)) => Err(StageError::from_panic(payload)),
                Err(_) => Err(StageError::timeout(
                    format!("stage '{}'", name),
                    self.stage_timeout,
                )),
            };
            let elapsed = stage_started.elapsed();
            let elapsed_ms = elapsed.as_millis() as u64;
            metrics::record_stage(name, result.is_ok(), elapsed.as_secs_f64());

            let output = match result {
                Ok(output) => output,
                Err(err) => {
                    tracing::error!(
                        job_id = %job_id,
                        stage = name,
                        elapsed_ms,
                        error = %err,
                        "Stage failed"
                    );
                    return self
                        .finish_failed(&handle, index, name, elapsed_ms, err.to_string(), state)
                        .await;
                }
            };

            let StageOutput {
                state: partial,
                summary,
                metadata,
                display_name,
            } = output;
            state.merge_in(partial);

            let completed = handle.update(|job| {
                job.merge_metadata(metadata);
                if let Some(display_name) = display_name {
                    job.display_name = Some(display_name);
                }
                job.complete_stage(index, elapsed_ms, summary)?;
                job.push_log(
                    LogLevel::Success,
                    format!("Stage {} completed in {} ms", name, elapsed_ms),
                    Some(index),
                );
                Ok::<_, crate::jobs::JobError>(())
            });
            if let Err(e) = completed {
                tracing::error!(job_id = %job_id, stage = name, error = %e, "Stage could not be completed");
                return self
                    .finish_failed(&handle, index, name, elapsed_ms, e.to_string(), state)
                    .await;
            }
            tracing::info!(job_id = %job_id, stage = name, elapsed_ms, "Stage completed");

            if let Some(exporter) = &self.exporter {
                if let Err(e) = exporter.write_stage(&job_id, index, name, &state).await {
                    tracing::warn!(job_id = %job_id, stage = name, error = %e, "Stage snapshot export failed");
                    handle.log(
                        LogLevel::Warning,
                        format!("Snapshot export failed: {}", e),
                        Some(index),
                    );
                }
            }
        }

        let total_ms = run_started.elapsed().as_millis() as u64;
        let finished = handle.update(|job| {
            job.push_log(
                LogLevel::Success,
                format!("Pipeline completed in {} ms", total_ms),
                None,
            );
            job.complete()
        });
        if let Err(e) = finished {
            tracing::error!(job_id = %job_id, error = %e, "Job could not be completed");
        }
        tracing::info!(job_id = %job_id, elapsed_ms = total_ms, "Pipeline completed");
        metrics::record_job_finished("completed");
        self.export_job(&handle).await;

        PipelineOutcome {
            status: handle.status(),
            state,
            failed_stage: None,
        }
    }

    /// Fails stage `index` and then the job, in one published update.
    async fn finish_failed(
        &self,
        handle: &Arc<JobHandle>,
        index: usize,
        name: &str,
        elapsed_ms: u64,
        error: String,
        state: PipelineState,
    ) -> PipelineOutcome {
        let failed = handle.update(|job| {
            // The stage may already be terminal if bookkeeping itself failed.
            if let Err(e) = job.fail_stage(index, elapsed_ms, error.clone()) {
                tracing::debug!(job_id = %job.job_id, error = %e, "Stage record left unchanged");
            }
            job.push_log(
                LogLevel::Error,
                format!("Stage {} failed: {}", name, error),
                Some(index),
            );
            job.fail()
        });
        if let Err(e) = failed {
            tracing::error!(job_id = %handle.job_id(), error = %e, "Job could not be marked failed");
        }
        metrics::record_job_finished("failed");
        self.export_job(handle).await;

        PipelineOutcome {
            status: handle.status(),
            state,
            failed_stage: Some(name.to_string()),
        }
    }

    async fn export_job(&self, handle: &Arc<JobHandle>) {
        let Some(exporter) = &self.exporter else {
            return;
        };
        let job = handle.snapshot();
        if let Err(e) = exporter.write_job(&job).await {
            // The job is terminal; the failure can only go to the process log.
            tracing::warn!(job_id = %job.job_id, error = %e, "Job snapshot export failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StageResult;
    use crate::export::load_stage_snapshot;
    use crate::jobs::{Job, StageStatus};
    use async_trait::async_trait;
    use serde_json::Value;

    struct WriteStage {
        name: &'static str,
        key: &'static str,
        value: Value,
    }

    #[async_trait]
    impl Stage for WriteStage {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn execute(
            &self,
            _state: &PipelineState,
            ctx: &StageContext,
        ) -> StageResult<StageOutput> {
            ctx.report_progress(0.5);
            Ok(StageOutput::new(PipelineState::new().with(self.key, self.value.clone()))
                .with_summary(json!({"wrote": self.key}))
                .with_metadata(self.key, self.value.clone()))
        }
    }

    struct NamingStage;

    #[async_trait]
    impl Stage for NamingStage {
        fn name(&self) -> &'static str {
            "naming"
        }

        async fn execute(
            &self,
            state: &PipelineState,
            _ctx: &StageContext,
        ) -> StageResult<StageOutput> {
            let url: String = state.require(keys::SOURCE_URL)?;
            Ok(StageOutput::new(PipelineState::new()).with_display_name(format!("Demo for {}", url)))
        }
    }

    struct FailingStage;

    #[async_trait]
    impl Stage for FailingStage {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn execute(
            &self,
            _state: &PipelineState,
            ctx: &StageContext,
        ) -> StageResult<StageOutput> {
            ctx.warn("about to fail");
            Err(StageError::External("upstream returned 503".to_string()))
        }
    }

    struct SlowStage;

    #[async_trait]
    impl Stage for SlowStage {
        fn name(&self) -> &'static str {
            "slow"
        }

        async fn execute(
            &self,
            _state: &PipelineState,
            _ctx: &StageContext,
        ) -> StageResult<StageOutput> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(StageOutput::default())
        }
    }

    struct PanickingStage;

    #[async_trait]
    impl Stage for PanickingStage {
        fn name(&self) -> &'static str {
            "panicking"
        }

        async fn execute(
            &self,
            _state: &PipelineState,
            _ctx: &StageContext,
        ) -> StageResult<StageOutput> {
            let rows: Vec<u32> = Vec::new();
            let index = rows.len() + 3;
            Ok(StageOutput::new(PipelineState::new().with("row", json!(rows[index]))))
        }
    }

    fn write(name: &'static str, key: &'static str, value: Value) -> Arc<dyn Stage> {
        Arc::new(WriteStage { name, key, value })
    }

    fn handle_for(executor: &PipelineExecutor) -> Arc<JobHandle> {
        let job = Job::new("job-test", "https://acme.test", &executor.stage_names());
        Arc::new(JobHandle::new(job, 64))
    }

    #[tokio::test]
    async fn test_all_stages_complete() {
        let executor = PipelineExecutor::new(vec![
            write("one", "a", json!(1)),
            Arc::new(NamingStage),
            write("three", "a", json!(3)),
        ]);
        let handle = handle_for(&executor);
        let outcome = executor
            .run(Arc::clone(&handle), PipelineState::new())
            .await;

        assert!(outcome.is_success());
        assert_eq!(outcome.state.get("a"), Some(&json!(3)));
        assert_eq!(outcome.state.get(keys::SOURCE_URL), Some(&json!("https://acme.test")));

        let job = handle.snapshot();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.overall_progress, 100.0);
        assert!(job.finished_at.is_some());
        assert!(job.stages.iter().all(|s| s.status == StageStatus::Completed));
        assert!(job.stages.iter().all(|s| s.elapsed_ms.is_some()));
        assert_eq!(job.stages[0].result_summary, Some(json!({"wrote": "a"})));
        assert_eq!(job.display_name.as_deref(), Some("Demo for https://acme.test"));
        assert_eq!(job.metadata.get("a"), Some(&json!(3)));
    }

    #[tokio::test]
    async fn test_failure_stops_pipeline() {
        let executor = PipelineExecutor::new(vec![
            write("one", "a", json!(1)),
            Arc::new(FailingStage),
            write("three", "b", json!(2)),
        ]);
        let handle = handle_for(&executor);
        let outcome = executor.run(Arc::clone(&handle), PipelineState::new()).await;

        assert_eq!(outcome.status, JobStatus::Failed);
        assert_eq!(outcome.failed_stage.as_deref(), Some("failing"));
        assert!(!outcome.state.contains("b"));

        let job = handle.snapshot();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.stages[0].status, StageStatus::Completed);
        assert_eq!(job.stages[1].status, StageStatus::Failed);
        assert!(job.stages[1].error.as_deref().unwrap().contains("503"));
        assert_eq!(job.stages[2].status, StageStatus::Pending);
        assert!(job.overall_progress < 100.0);

        let last = job.logs.last().unwrap();
        assert_eq!(last.level, LogLevel::Error);
        assert!(last.message.contains("failing"));
        assert_eq!(last.stage_index, Some(1));
    }

    #[tokio::test]
    async fn test_stage_timeout_fails_job() {
        let executor = PipelineExecutor::new(vec![Arc::new(SlowStage)])
            .with_stage_timeout(Duration::from_millis(20));
        let handle = handle_for(&executor);
        let outcome = executor.run(Arc::clone(&handle), PipelineState::new()).await;

        assert_eq!(outcome.status, JobStatus::Failed);
        let job = handle.snapshot();
        assert!(job.stages[0].error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_subscriber_sees_terminal_snapshot_last() {
        let executor = PipelineExecutor::new(vec![
            write("one", "a", json!(1)),
            write("two", "b", json!(2)),
        ]);
        let handle = handle_for(&executor);
        let mut sub = handle.subscribe().await.unwrap();

        let run = tokio::spawn({
            let executor = executor.clone();
            let handle = Arc::clone(&handle);
            async move { executor.run(handle, PipelineState::new()).await }
        });

        let mut last = None;
        let mut progress = Vec::new();
        while let Some(snapshot) = sub.recv().await {
            progress.push(snapshot.overall_progress);
            last = Some(snapshot);
        }
        run.await.unwrap();

        let last = last.unwrap();
        assert_eq!(last.status, JobStatus::Completed);
        assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn test_snapshots_exported_per_stage() {
        let dir = tempfile::tempdir().unwrap();
        let executor = PipelineExecutor::new(vec![
            write("one", "a", json!(1)),
            write("two", "b", json!(2)),
        ])
        .with_exporter(SnapshotExporter::new(dir.path()));
        let handle = handle_for(&executor);
        executor.run(Arc::clone(&handle), PipelineState::new()).await;

        let job_dir = dir.path().join("job-test");
        let second = load_stage_snapshot(&job_dir.join("01_two.json")).await.unwrap();
        assert_eq!(second.state_at_completion.get("a"), Some(&json!(1)));
        assert_eq!(second.state_at_completion.get("b"), Some(&json!(2)));
        assert!(job_dir.join("00_one.json").exists());
        assert!(job_dir.join("job.json").exists());
    }

    #[tokio::test]
    async fn test_panicking_stage_fails_job_and_closes_stream() {
        let executor = PipelineExecutor::new(vec![
            write("one", "a", json!(1)),
            Arc::new(PanickingStage),
            write("three", "b", json!(2)),
        ]);
        let handle = handle_for(&executor);
        let mut sub = handle.subscribe().await.unwrap();

        let run = tokio::spawn({
            let executor = executor.clone();
            let handle = Arc::clone(&handle);
            async move { executor.run(handle, PipelineState::new()).await }
        });

        let mut last = None;
        let drained = tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(snapshot) = sub.recv().await {
                last = Some(snapshot);
            }
        })
        .await;
        assert!(drained.is_ok(), "stream never reached a terminal snapshot");

        let outcome = run.await.expect("run task must not unwind");
        assert_eq!(outcome.status, JobStatus::Failed);
        assert_eq!(outcome.failed_stage.as_deref(), Some("panicking"));

        let last = last.unwrap();
        assert_eq!(last.status, JobStatus::Failed);
        assert_eq!(last.stages[0].status, StageStatus::Completed);
        assert_eq!(last.stages[1].status, StageStatus::Failed);
        assert!(last.stages[1].error.as_deref().unwrap().contains("panicked"));
        assert_eq!(last.stages[2].status, StageStatus::Pending);
        assert!(last.finished_at.is_some());
        assert!(handle.finished_at().is_some());
    }

    #[tokio::test]
    async fn test_mismatched_job_is_failed_without_running() {
        let executor = PipelineExecutor::new(vec![write("one", "a", json!(1))]);
        let job = Job::new("job-x", "https://acme.test", &["one", "two"]);
        let handle = Arc::new(JobHandle::new(job, 8));
        let mut sub = handle.subscribe().await.unwrap();

        let outcome = executor.run(Arc::clone(&handle), PipelineState::new()).await;
        assert_eq!(outcome.status, JobStatus::Failed);
        assert!(outcome.failed_stage.is_none());

        let job = handle.snapshot();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.finished_at.is_some());
        assert!(job.stages.iter().all(|s| s.status == StageStatus::Pending));
        let last_log = job.logs.last().unwrap();
        assert_eq!(last_log.level, LogLevel::Error);
        assert!(last_log.message.contains("2 stage records"));

        let mut last = None;
        while let Some(snapshot) = sub.recv().await {
            last = Some(snapshot);
        }
        assert_eq!(last.unwrap().status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_job_that_already_ran_is_left_alone() {
        let executor = PipelineExecutor::new(vec![write("one", "a", json!(1))]);
        let handle = handle_for(&executor);
        executor.run(Arc::clone(&handle), PipelineState::new()).await;
        let logs = handle.snapshot().logs.len();

        let outcome = executor.run(Arc::clone(&handle), PipelineState::new()).await;
        assert_eq!(outcome.status, JobStatus::Completed);
        assert_eq!(handle.snapshot().logs.len(), logs);
    }
}
