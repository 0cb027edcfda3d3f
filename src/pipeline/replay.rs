//! Re-running a single stage against a captured state.
//!
//! A snapshot written by [`crate::export::SnapshotExporter`] holds the state
//! as it stood after one stage. Feeding it to the next stage reproduces that
//! stage's behaviour without repeating the earlier ones.

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

use super::stage::{Stage, StageContext, StageOutput};
use super::state::PipelineState;
use crate::agents::keys;
use crate::error::{ExportError, StageError};
use crate::export::load_stage_snapshot;
use crate::jobs::Job;

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("Unknown stage '{0}'")]
    UnknownStage(String),

    #[error(transparent)]
    Snapshot(#[from] ExportError),

    #[error("Stage failed: {0}")]
    Stage(#[from] StageError),
}

/// Output of a replayed stage plus the throwaway job its logs landed on.
#[derive(Debug)]
pub struct ReplayResult {
    pub output: StageOutput,
    pub job: Job,
}

/// Runs `stage` once against `state` on a detached job.
pub async fn replay_stage(
    stage: &dyn Stage,
    state: &PipelineState,
) -> Result<ReplayResult, ReplayError> {
    let source = state
        .get(keys::SOURCE_URL)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let ctx = StageContext::detached(stage.name(), &source);
    tracing::info!(stage = stage.name(), job_id = %ctx.job_id(), "Replaying stage");

    let output = stage.execute(state, &ctx).await?;
    Ok(ReplayResult {
        output,
        job: ctx.job_snapshot(),
    })
}

/// Loads the snapshot at `path` and replays the stage named `stage_name`.
pub async fn replay_from_file(
    stages: &[Arc<dyn Stage>],
    stage_name: &str,
    path: &Path,
) -> Result<ReplayResult, ReplayError> {
    let stage = stages
        .iter()
        .find(|s| s.name() == stage_name)
        .ok_or_else(|| ReplayError::UnknownStage(stage_name.to_string()))?;
    let snapshot = load_stage_snapshot(path).await?;
    tracing::debug!(
        captured_after = %snapshot.stage_name,
        keys = snapshot.state_at_completion.len(),
        "Loaded snapshot"
    );
    replay_stage(stage.as_ref(), &snapshot.state_at_completion).await
}
