//! On-disk snapshots: `{root}/{job_id}/{index:02}_{stage}.json` per completed
//! stage, plus `{root}/{job_id}/job.json` for the terminal job.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ExportError;
use crate::jobs::Job;
use crate::pipeline::PipelineState;

/// File name of the terminal job record.
pub const JOB_FILE: &str = "job.json";

/// The pipeline state as it stood when one stage completed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSnapshot {
    pub stage_name: String,
    pub sequence_index: usize,
    pub timestamp: DateTime<Utc>,
    pub state_at_completion: PipelineState,
}

/// Writes snapshots under a root directory.
#[derive(Debug, Clone)]
pub struct SnapshotExporter {
    root: PathBuf,
}

impl SnapshotExporter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding one job's snapshots.
    pub fn job_dir(&self, job_id: &str) -> PathBuf {
        self.root.join(job_id)
    }

    /// Writes the state captured after stage `index` completed.
    pub async fn write_stage(
        &self,
        job_id: &str,
        index: usize,
        stage_name: &str,
        state: &PipelineState,
    ) -> Result<PathBuf, ExportError> {
        let snapshot = StageSnapshot {
            stage_name: stage_name.to_string(),
            sequence_index: index,
            timestamp: Utc::now(),
            state_at_completion: state.clone(),
        };
        let path = self
            .job_dir(job_id)
            .join(format!("{:02}_{}.json", index, stage_name));
        self.write_json(&path, &snapshot).await?;
        tracing::debug!(job_id, stage = stage_name, path = %path.display(), "Stage snapshot written");
        Ok(path)
    }

    /// Writes the terminal job record.
    pub async fn write_job(&self, job: &Job) -> Result<PathBuf, ExportError> {
        let path = self.job_dir(&job.job_id).join(JOB_FILE);
        self.write_json(&path, job).await?;
        tracing::debug!(job_id = %job.job_id, path = %path.display(), "Job snapshot written");
        Ok(path)
    }

    async fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), ExportError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(value)?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }
}

/// Reads a stage snapshot written by [`SnapshotExporter::write_stage`].
///
/// # Errors
///
/// `NotFound` if the file does not exist, `InvalidSnapshot` if it is not a
/// stage snapshot.
pub async fn load_stage_snapshot(path: &Path) -> Result<StageSnapshot, ExportError> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ExportError::NotFound(path.display().to_string()));
        }
        Err(e) => return Err(e.into()),
    };
    serde_json::from_str(&raw).map_err(|e| ExportError::InvalidSnapshot {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}
