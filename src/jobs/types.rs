//! Externally observable job records.
//!
//! A [`Job`] is what pollers and stream subscribers see: overall status,
//! the ordered [`StageRecord`] list, an append-only log, progress, and free-form
//! metadata projected out of the pipeline state. All transition methods enforce
//! the monotonic state machine and refuse illegal moves rather than applying them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Progress ceiling while a job has not completed.
pub const MAX_RUNNING_PROGRESS: f64 = 99.0;

/// Errors raised by job bookkeeping.
#[derive(Debug, Error, PartialEq)]
pub enum JobError {
    #[error("Job '{0}' not found")]
    NotFound(String),

    #[error("Invalid {subject} transition from '{from}' to '{to}'")]
    InvalidTransition {
        subject: String,
        from: String,
        to: String,
    },

    #[error("Stage index {index} out of range (job has {len} stages)")]
    StageOutOfRange { index: usize, len: usize },

    #[error("Stage {running} is still running; cannot start stage {requested}")]
    StageAlreadyRunning { running: usize, requested: usize },
}

/// Overall status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    /// Whether no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Failed)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Status of a single stage within a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl StageStatus {
    fn can_transition_to(&self, next: StageStatus) -> bool {
        matches!(
            (self, next),
            (StageStatus::Pending, StageStatus::Running)
                | (StageStatus::Running, StageStatus::Completed)
                | (StageStatus::Running, StageStatus::Failed)
        )
    }
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageStatus::Pending => write!(f, "pending"),
            StageStatus::Running => write!(f, "running"),
            StageStatus::Completed => write!(f, "completed"),
            StageStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Severity of a job log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Success => write!(f, "SUCCESS"),
            LogLevel::Warning => write!(f, "WARNING"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// One line of the job's append-only log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage_index: Option<usize>,
}

/// Per-stage bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub sequence_index: usize,
    pub name: String,
    pub status: StageStatus,
    pub started_at: Option<DateTime<Utc>>,
    /// Wall-clock duration in milliseconds, set once the stage finishes.
    pub elapsed_ms: Option<u64>,
    pub error: Option<String>,
    pub result_summary: Option<Value>,
}

impl StageRecord {
    fn pending(sequence_index: usize, name: impl Into<String>) -> Self {
        Self {
            sequence_index,
            name: name.into(),
            status: StageStatus::Pending,
            started_at: None,
            elapsed_ms: None,
            error: None,
            result_summary: None,
        }
    }

    fn transition(&mut self, next: StageStatus) -> Result<(), JobError> {
        if !self.status.can_transition_to(next) {
            return Err(JobError::InvalidTransition {
                subject: format!("stage '{}'", self.name),
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }
}

/// The externally observable record of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub source_reference: String,
    pub display_name: Option<String>,
    pub status: JobStatus,
    pub overall_progress: f64,
    pub stages: Vec<StageRecord>,
    pub logs: Vec<LogEntry>,
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Creates a pending job with one pending record per stage name.
    pub fn new<S: AsRef<str>>(
        job_id: impl Into<String>,
        source_reference: impl Into<String>,
        stage_names: &[S],
    ) -> Self {
        let now = Utc::now();
        Self {
            job_id: job_id.into(),
            source_reference: source_reference.into(),
            display_name: None,
            status: JobStatus::Pending,
            overall_progress: 0.0,
            stages: stage_names
                .iter()
                .enumerate()
                .map(|(i, name)| StageRecord::pending(i, name.as_ref()))
                .collect(),
            logs: Vec::new(),
            metadata: Map::new(),
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Index of the stage currently running, if any.
    pub fn running_stage(&self) -> Option<usize> {
        self.stages
            .iter()
            .position(|s| s.status == StageStatus::Running)
    }

    /// Number of stages that finished successfully.
    pub fn completed_stages(&self) -> usize {
        self.stages
            .iter()
            .filter(|s| s.status == StageStatus::Completed)
            .count()
    }

    /// Moves the job from pending to running.
    pub fn start(&mut self) -> Result<(), JobError> {
        self.transition(JobStatus::Running)
    }

    /// Marks a stage as running. Only one stage may run at a time.
    pub fn start_stage(&mut self, index: usize) -> Result<(), JobError> {
        if let Some(running) = self.running_stage() {
            return Err(JobError::StageAlreadyRunning {
                running,
                requested: index,
            });
        }
        let stage = self.stage_mut(index)?;
        stage.transition(StageStatus::Running)?;
        stage.started_at = Some(Utc::now());
        self.touch();
        Ok(())
    }

    /// Marks a running stage as completed and raises overall progress.
    pub fn complete_stage(
        &mut self,
        index: usize,
        elapsed_ms: u64,
        result_summary: Option<Value>,
    ) -> Result<(), JobError> {
        let stage = self.stage_mut(index)?;
        stage.transition(StageStatus::Completed)?;
        stage.elapsed_ms = Some(elapsed_ms);
        stage.result_summary = result_summary;

        let total = self.stages.len().max(1) as f64;
        let fraction = self.completed_stages() as f64 / total;
        self.raise_progress(fraction * 100.0);
        self.touch();
        Ok(())
    }

    /// Marks a running stage as failed with a non-empty error message.
    pub fn fail_stage(
        &mut self,
        index: usize,
        elapsed_ms: u64,
        error: impl Into<String>,
    ) -> Result<(), JobError> {
        let mut error = error.into();
        if error.trim().is_empty() {
            error = "stage failed without an error message".to_string();
        }
        let stage = self.stage_mut(index)?;
        stage.transition(StageStatus::Failed)?;
        stage.elapsed_ms = Some(elapsed_ms);
        stage.error = Some(error);
        self.touch();
        Ok(())
    }

    /// Marks the job completed. Progress jumps to 100 only here.
    pub fn complete(&mut self) -> Result<(), JobError> {
        self.transition(JobStatus::Completed)?;
        self.overall_progress = 100.0;
        self.finished_at = Some(self.updated_at);
        Ok(())
    }

    /// Marks the job failed. Progress is left where it stopped.
    pub fn fail(&mut self) -> Result<(), JobError> {
        self.transition(JobStatus::Failed)?;
        self.finished_at = Some(self.updated_at);
        Ok(())
    }

    /// Raises progress to `percent` if that is higher than the current value.
    ///
    /// Progress never decreases and stays below 100 until [`Job::complete`].
    pub fn raise_progress(&mut self, percent: f64) {
        if self.status.is_terminal() || !percent.is_finite() {
            return;
        }
        let capped = percent.clamp(0.0, MAX_RUNNING_PROGRESS);
        if capped > self.overall_progress {
            self.overall_progress = capped;
        }
    }

    /// Appends a log entry, keeping timestamps non-decreasing.
    pub fn push_log(
        &mut self,
        level: LogLevel,
        message: impl Into<String>,
        stage_index: Option<usize>,
    ) {
        let mut timestamp = Utc::now();
        if let Some(last) = self.logs.last() {
            if timestamp < last.timestamp {
                timestamp = last.timestamp;
            }
        }
        self.logs.push(LogEntry {
            timestamp,
            level,
            message: message.into(),
            stage_index,
        });
        self.touch();
    }

    /// Merges metadata projections produced by a stage (last writer wins).
    pub fn merge_metadata(&mut self, metadata: Map<String, Value>) {
        for (key, value) in metadata {
            self.metadata.insert(key, value);
        }
        self.touch();
    }

    fn stage_mut(&mut self, index: usize) -> Result<&mut StageRecord, JobError> {
        let len = self.stages.len();
        self.stages
            .get_mut(index)
            .ok_or(JobError::StageOutOfRange { index, len })
    }

    fn transition(&mut self, next: JobStatus) -> Result<(), JobError> {
        if !self.status.can_transition_to(next) {
            return Err(JobError::InvalidTransition {
                subject: "job".to_string(),
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        self.touch();
        Ok(())
    }

    fn touch(&mut self) {
        let now = Utc::now();
        if now > self.updated_at {
            self.updated_at = now;
        }
    }
}

/// Compact listing entry for a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: String,
    pub source_reference: String,
    pub display_name: Option<String>,
    pub status: JobStatus,
    pub overall_progress: f64,
    pub created_at: DateTime<Utc>,
}

impl From<&Job> for JobSummary {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.job_id.clone(),
            source_reference: job.source_reference.clone(),
            display_name: job.display_name.clone(),
            status: job.status,
            overall_progress: job.overall_progress,
            created_at: job.created_at,
        }
    }
}
