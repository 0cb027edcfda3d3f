//! Snapshot export for offline inspection and stage replay.
//!
//! When a snapshot directory is configured, the orchestrator writes the
//! pipeline state after every completed stage and the terminal job record.
//! Export is observational: failures are logged and never fail a job.

pub mod snapshots;

pub use snapshots::{load_stage_snapshot, SnapshotExporter, StageSnapshot, JOB_FILE};
