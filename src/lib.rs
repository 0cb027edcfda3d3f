//! demo-forge: provisions demo analytics environments.
//!
//! A job runs seven stages in order against a shared, accumulating state:
//! research, narrative, schema design, synthetic data, warehouse loading,
//! instructions and query validation. Progress is published to any number
//! of live subscribers and served over HTTP.

pub mod agents;
pub mod api;
pub mod cli;
pub mod collectors;
pub mod error;
pub mod export;
pub mod jobs;
pub mod llm;
pub mod metrics;
pub mod pipeline;
pub mod prompts;
pub mod service;
pub mod warehouse;

// Re-export commonly used error types
pub use error::{ExportError, LlmError, StageError, StageResult};
pub use service::{ForgeService, ServiceError};
