//! The uniform stage contract and its side channel.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::config::ForgeConfig;
use super::retry::RetryPolicy;
use super::state::PipelineState;
use crate::collectors::ContentFetcher;
use crate::error::StageResult;
use crate::jobs::{Job, JobHandle, LogLevel};
use crate::llm::LlmProvider;
use crate::warehouse::WarehouseSink;

/// One unit of the fixed, ordered pipeline.
///
/// Stages are not idempotent and are never retried by the orchestrator.
/// Retries of individual external calls happen inside `execute`.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Name recorded on the job's stage record.
    fn name(&self) -> &'static str;

    /// Runs the stage against the current state and returns its contribution.
    async fn execute(&self, state: &PipelineState, ctx: &StageContext)
        -> StageResult<StageOutput>;
}

/// What a successful stage contributes.
#[derive(Debug, Clone, Default)]
pub struct StageOutput {
    /// Partial state merged into the pipeline state.
    pub state: PipelineState,
    /// Small JSON summary recorded on the stage record.
    pub summary: Option<Value>,
    /// Projections merged into the job's metadata.
    pub metadata: Map<String, Value>,
    /// Human-readable name for the job, if this stage derives one.
    pub display_name: Option<String>,
}

impl StageOutput {
    pub fn new(state: PipelineState) -> Self {
        Self {
            state,
            ..Default::default()
        }
    }

    pub fn with_summary(mut self, summary: Value) -> Self {
        self.summary = Some(summary);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }
}

/// Tunables handed to every stage.
#[derive(Debug, Clone)]
pub struct StageSettings {
    pub default_model: String,
    pub reasoning_model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub llm_timeout: Duration,
    pub fetch_timeout: Duration,
    pub sink_timeout: Duration,
    pub retry: RetryPolicy,
    pub fanout_concurrency: usize,
}

impl StageSettings {
    pub fn from_config(config: &ForgeConfig) -> Self {
        Self {
            default_model: config.default_model.clone(),
            reasoning_model: config.reasoning_model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            llm_timeout: config.llm_timeout,
            fetch_timeout: config.fetch_timeout,
            sink_timeout: config.sink_timeout,
            retry: RetryPolicy::new(config.max_retries, config.retry_base_delay),
            fanout_concurrency: config.fanout_concurrency,
        }
    }
}

impl Default for StageSettings {
    fn default() -> Self {
        Self::from_config(&ForgeConfig::default())
    }
}

/// External collaborators shared by the stages of every job.
#[derive(Clone)]
pub struct StageDeps {
    /// `None` when no API key is configured; only offline variants can run then.
    pub llm: Option<Arc<dyn LlmProvider>>,
    pub fetcher: Arc<dyn ContentFetcher>,
    pub warehouse: Arc<dyn WarehouseSink>,
    pub settings: StageSettings,
}

/// Side channel from a running stage back to its job.
pub struct StageContext {
    handle: Arc<JobHandle>,
    stage_index: usize,
    stage_count: usize,
    stage_name: String,
}

impl StageContext {
    pub fn new(
        handle: Arc<JobHandle>,
        stage_index: usize,
        stage_count: usize,
        stage_name: impl Into<String>,
    ) -> Self {
        Self {
            handle,
            stage_index,
            stage_count: stage_count.max(1),
            stage_name: stage_name.into(),
        }
    }

    /// A context bound to a throwaway single-stage job.
    ///
    /// Used to run one stage outside the orchestrator. Must be called inside a
    /// tokio runtime.
    pub fn detached(stage_name: &str, source_reference: &str) -> Self {
        let job_id = format!("detached-{}", uuid::Uuid::new_v4());
        let mut job = Job::new(job_id, source_reference, &[stage_name]);
        let started = job.start().and_then(|_| job.start_stage(0));
        if let Err(e) = started {
            tracing::debug!(error = %e, "Detached context could not mark its stage running");
        }
        let handle = Arc::new(JobHandle::new(job, crate::jobs::DEFAULT_QUEUE_CAPACITY));
        Self::new(handle, 0, 1, stage_name)
    }

    pub fn job_id(&self) -> &str {
        self.handle.job_id()
    }

    pub fn stage_index(&self) -> usize {
        self.stage_index
    }

    pub fn stage_name(&self) -> &str {
        &self.stage_name
    }

    /// Current state of the owning job.
    pub fn job_snapshot(&self) -> Job {
        self.handle.snapshot()
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(LogLevel::Info, message.into());
    }

    pub fn success(&self, message: impl Into<String>) {
        self.emit(LogLevel::Success, message.into());
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.emit(LogLevel::Warning, message.into());
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(LogLevel::Error, message.into());
    }

    /// Raises overall progress to reflect `fraction` of this stage being done.
    ///
    /// Values outside `[0, 1]` are clamped. Progress never decreases.
    pub fn report_progress(&self, fraction: f64) {
        if !fraction.is_finite() {
            return;
        }
        let fraction = fraction.clamp(0.0, 1.0);
        let percent = (self.stage_index as f64 + fraction) / self.stage_count as f64 * 100.0;
        self.handle.update(|job| job.raise_progress(percent));
    }

    fn emit(&self, level: LogLevel, message: String) {
        let job_id = self.handle.job_id();
        let stage = self.stage_name.as_str();
        match level {
            LogLevel::Error => tracing::error!(job_id, stage, "{}", message),
            LogLevel::Warning => tracing::warn!(job_id, stage, "{}", message),
            LogLevel::Info | LogLevel::Success => tracing::info!(job_id, stage, "{}", message),
        }
        self.handle.log(level, message, Some(self.stage_index));
    }
}
