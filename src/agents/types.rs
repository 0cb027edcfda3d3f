//! Artifacts the stages exchange through the pipeline state.
//!
//! Each type is stored under a fixed state key, listed on its doc comment.

use serde::{Deserialize, Serialize};

/// What research learned about the company. Key: `company_research`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompanyResearch {
    pub company_name: String,
    #[serde(default)]
    pub source_url: String,
    pub summary: String,
    pub industry: String,
    #[serde(default)]
    pub offerings: Vec<String>,
    #[serde(default)]
    pub audience: Vec<String>,
    #[serde(default)]
    pub key_terms: Vec<String>,
    /// URLs that were fetched and digested.
    #[serde(default)]
    pub pages: Vec<String>,
    /// Optional pages that could not be used.
    #[serde(default)]
    pub degraded: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Storyline {
    pub title: String,
    pub summary: String,
    #[serde(default)]
    pub business_questions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    pub name: String,
    pub role: String,
    #[serde(default)]
    pub goals: Vec<String>,
}

/// A business question and the SQL that answers it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoldenQuery {
    pub question: String,
    pub sql: String,
}

/// The demo narrative. Key: `demo_story`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DemoStory {
    pub storyline: Storyline,
    pub personas: Vec<Persona>,
    pub golden_queries: Vec<GoldenQuery>,
}

/// A table the warehouse stage could not load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableFailure {
    pub table: String,
    pub error: String,
}

/// Where the demo data landed. Key: `warehouse`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WarehouseInfo {
    pub database: String,
    pub location: String,
    pub tables_loaded: Vec<String>,
    #[serde(default)]
    pub tables_failed: Vec<TableFailure>,
    #[serde(default)]
    pub rows_loaded: usize,
    /// `table.column` entries reshaped by normalization.
    #[serde(default)]
    pub normalized_columns: Vec<String>,
}

/// Outcome of checking one golden query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub question: String,
    pub sql: String,
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Key: `query_validation`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryValidationReport {
    pub total: usize,
    pub valid: usize,
    pub invalid: usize,
    pub results: Vec<QueryResult>,
}
