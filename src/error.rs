//! Error types for demo-forge operations.
//!
//! Defines the error types shared across subsystems:
//! - Stage execution (the only error that halts a job)
//! - LLM API interactions
//! - Snapshot export

use std::time::Duration;

use thiserror::Error;

/// Errors raised by a pipeline stage.
///
/// Any of these returned from [`crate::pipeline::Stage::execute`] fails the
/// stage and stops the job. Recoverable problems (optional sources, single
/// bad columns, one failed table out of many) are handled inside the stage
/// and never surface as a `StageError`.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("Missing required input '{0}' in pipeline state")]
    MissingInput(String),

    #[error("Invalid input '{field}': {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("External call failed: {0}")]
    External(String),

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: String,
        timeout: Duration,
    },

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Warehouse error: {0}")]
    Sink(String),

    #[error("Could not normalize table '{table}' for the warehouse: {reason}")]
    Normalization { table: String, reason: String },

    #[error("{failed} of {total} sub-tasks failed: {details}")]
    AggregateFailure {
        failed: usize,
        total: usize,
        details: String,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Stage panicked: {0}")]
    Panicked(String),
}

impl StageError {
    /// Shorthand for an invalid-input error.
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for a timeout error.
    pub fn timeout(operation: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout,
        }
    }

    /// Converts a caught panic payload into a stage error.
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        Self::Panicked(message)
    }
}

/// Result type alias for stage operations.
pub type StageResult<T> = Result<T, StageError>;

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API key: OPENROUTER_API_KEY environment variable not set")]
    MissingApiKey,

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },

    #[error("Empty response from model '{0}'")]
    EmptyResponse(String),
}

impl LlmError {
    /// Whether a retry has a reasonable chance of succeeding.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::RequestFailed(_) | LlmError::RateLimited(_) | LlmError::Timeout(_) => true,
            LlmError::ApiError { code, .. } => *code == 429 || *code >= 500,
            _ => false,
        }
    }
}

/// Errors that can occur while exporting or loading snapshots.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Snapshot not found: {0}")]
    NotFound(String),

    #[error("Invalid snapshot '{path}': {reason}")]
    InvalidSnapshot { path: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_error_display() {
        let err = StageError::MissingInput("data_model".to_string());
        assert!(err.to_string().contains("data_model"));

        let err = StageError::timeout("fetch https://example.com", Duration::from_secs(5));
        assert!(err.to_string().contains("timed out"));

        let err = StageError::AggregateFailure {
            failed: 3,
            total: 4,
            details: "orders: disk full".to_string(),
        };
        assert!(err.to_string().contains("3 of 4"));
    }

    #[test]
    fn test_panic_payload_message() {
        let err = StageError::from_panic(Box::new("index out of bounds"));
        assert_eq!(err.to_string(), "Stage panicked: index out of bounds");

        let err = StageError::from_panic(Box::new(String::from("bad row")));
        assert!(err.to_string().contains("bad row"));

        let err = StageError::from_panic(Box::new(7_u32));
        assert!(err.to_string().contains("unknown panic payload"));
    }

    #[test]
    fn test_llm_error_transient() {
        assert!(LlmError::RateLimited("slow down".into()).is_transient());
        assert!(LlmError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(LlmError::ApiError {
            code: 503,
            message: "unavailable".into()
        }
        .is_transient());
        assert!(!LlmError::ApiError {
            code: 400,
            message: "bad request".into()
        }
        .is_transient());
        assert!(!LlmError::MissingApiKey.is_transient());
    }
}
