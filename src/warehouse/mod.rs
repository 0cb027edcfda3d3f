//! Warehouse sink abstraction, data model types and defensive normalization.
//!
//! - **model**: tables, columns and column types produced by schema design
//! - **normalize**: reshapes rows for sinks that cannot express every value
//! - **local**: directory-backed JSONL sink with an in-memory catalog

pub mod local;
pub mod model;
pub mod normalize;

pub use local::LocalWarehouse;
pub use model::{ColumnSpec, ColumnType, DataModel, TableSpec};
pub use normalize::{normalize_table, ColumnAdjustment, NormalizationReport, NormalizedTable};

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// A row as produced by synthetic data generation.
pub type Row = Map<String, Value>;

/// Errors returned by warehouse sinks.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Database '{0}' has not been provisioned")]
    NotProvisioned(String),

    #[error("Unknown table '{0}'")]
    UnknownTable(String),

    #[error("Column '{column}' of table '{table}' rejects value: {reason}")]
    TypeMismatch {
        table: String,
        column: String,
        reason: String,
    },

    #[error("Sink rejected request: {0}")]
    Rejected(String),

    #[error("Sink operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SinkError {
    /// Whether a retry has a reasonable chance of succeeding.
    pub fn is_transient(&self) -> bool {
        matches!(self, SinkError::Io(_) | SinkError::Timeout(_))
    }
}

/// What a sink can store natively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkCapabilities {
    pub supports_arrays: bool,
    pub supports_objects: bool,
    /// Separator used when joining array elements into text.
    pub array_delimiter: String,
    /// Longest text value the sink accepts, in characters.
    pub max_text_len: Option<usize>,
}

impl Default for SinkCapabilities {
    fn default() -> Self {
        Self {
            supports_arrays: true,
            supports_objects: true,
            array_delimiter: "|".to_string(),
            max_text_len: None,
        }
    }
}

/// Where a provisioned database lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarehouseLocation {
    pub database: String,
    pub location: String,
}

/// Result of checking one query against the loaded catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryCheck {
    pub valid: bool,
    pub referenced_tables: Vec<String>,
    pub missing_tables: Vec<String>,
    pub reason: Option<String>,
}

/// A schema-strict destination for generated tables.
#[async_trait]
pub trait WarehouseSink: Send + Sync {
    fn capabilities(&self) -> SinkCapabilities;

    /// Creates the database namespace if needed.
    async fn provision(&self, database: &str) -> Result<WarehouseLocation, SinkError>;

    /// Declares a table. Replaces any previous declaration with the same name.
    async fn create_table(&self, database: &str, table: &TableSpec) -> Result<(), SinkError>;

    /// Loads rows into a declared table. Returns the number of rows stored.
    async fn load_rows(&self, database: &str, table: &str, rows: &[Row])
        -> Result<usize, SinkError>;

    /// Names of tables that hold loaded data.
    async fn loaded_tables(&self, database: &str) -> Result<Vec<String>, SinkError>;

    /// Checks that a query only references loaded tables.
    async fn validate_query(&self, database: &str, sql: &str) -> Result<QueryCheck, SinkError>;

    /// Stores a text document next to the database. Returns its location.
    async fn write_document(
        &self,
        database: &str,
        name: &str,
        contents: &str,
    ) -> Result<String, SinkError>;
}
