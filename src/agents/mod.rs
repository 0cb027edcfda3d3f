//! The seven pipeline stages.
//!
//! Every agent implements [`crate::pipeline::Stage`] and talks to the outside
//! world only through the collaborators in [`crate::pipeline::StageDeps`]:
//!
//! 1. [`ResearchAgent`] - fetches and summarizes the prospect's website
//! 2. [`NarrativeAgent`] - storyline, personas and golden queries
//! 3. [`SchemaDesignAgent`] - the warehouse data model
//! 4. [`SyntheticDataAgent`] - deterministic rows per table
//! 5. [`WarehouseLoadAgent`] - normalizes and loads the rows
//! 6. [`InstructionsAgent`] - the demo runbook
//! 7. [`QueryValidationAgent`] - checks golden queries against the warehouse
//!
//! Agents that call a model take an `Option<LlmBackend>`; `None` selects the
//! offline behavior built from [`templates`].

pub mod instructions;
pub mod narrative;
pub mod query_validation;
pub mod research;
pub mod schema_design;
pub mod synthetic_data;
pub mod templates;
pub mod types;
pub mod warehouse_load;

pub use instructions::InstructionsAgent;
pub use narrative::NarrativeAgent;
pub use query_validation::QueryValidationAgent;
pub use research::ResearchAgent;
pub use schema_design::SchemaDesignAgent;
pub use synthetic_data::{SyntheticDataAgent, SyntheticTables};
pub use types::{
    CompanyResearch, DemoStory, GoldenQuery, Persona, QueryResult, QueryValidationReport,
    Storyline, TableFailure, WarehouseInfo,
};
pub use warehouse_load::WarehouseLoadAgent;

use std::future::Future;

use crate::error::{StageError, StageResult};
use crate::pipeline::retry::with_backoff;
use crate::pipeline::StageSettings;
use crate::warehouse::SinkError;

/// Pipeline state keys.
pub mod keys {
    pub const SOURCE_URL: &str = "source_url";
    pub const COMPANY_RESEARCH: &str = "company_research";
    pub const DEMO_STORY: &str = "demo_story";
    pub const DATA_MODEL: &str = "data_model";
    pub const SYNTHETIC_DATA: &str = "synthetic_data";
    pub const WAREHOUSE: &str = "warehouse";
    pub const INSTRUCTIONS_MARKDOWN: &str = "instructions_markdown";
    pub const QUERY_VALIDATION: &str = "query_validation";
}

/// Runs one sink operation under the sink timeout, retrying transient errors.
pub(crate) async fn sink_call<T, F, Fut>(
    settings: &StageSettings,
    label: &str,
    mut operation: F,
) -> StageResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SinkError>>,
{
    let timeout = settings.sink_timeout;
    with_backoff(&settings.retry, label, SinkError::is_transient, || {
        let call = operation();
        async move {
            tokio::time::timeout(timeout, call)
                .await
                .map_err(|_| SinkError::Timeout(timeout))?
        }
    })
    .await
    .map_err(|err| match err {
        SinkError::Timeout(after) => StageError::timeout(label, after),
        other => StageError::Sink(format!("{}: {}", label, other)),
    })
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory collaborators shared by the agent tests.

    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::collectors::{ContentFetcher, FetchError, FetchedPage};
    use crate::warehouse::{
        QueryCheck, Row, SinkCapabilities, SinkError, TableSpec, WarehouseLocation,
        WarehouseSink,
    };

    /// Serves fixed bodies by exact URL; anything else is a 404.
    #[derive(Default)]
    pub struct StaticFetcher {
        pages: HashMap<String, String>,
        stalled: HashSet<String>,
    }

    impl StaticFetcher {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn page(mut self, url: &str, body: &str) -> Self {
            self.pages.insert(url.to_string(), body.to_string());
            self
        }

        /// Requests for `url` never answer within a test's lifetime.
        pub fn stalled(mut self, url: &str) -> Self {
            self.stalled.insert(url.to_string());
            self
        }
    }

    #[async_trait]
    impl ContentFetcher for StaticFetcher {
        async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
            if self.stalled.contains(url) {
                tokio::time::sleep(std::time::Duration::from_secs(30)).await;
            }
            match self.pages.get(url) {
                Some(body) => Ok(FetchedPage {
                    url: url.to_string(),
                    status: 200,
                    body: body.clone(),
                }),
                None => Err(FetchError::Status {
                    url: url.to_string(),
                    status: 404,
                }),
            }
        }
    }

    /// Array-less sink that keeps everything in memory.
    #[derive(Default)]
    pub struct MemorySink {
        pub tables: Mutex<HashMap<String, Vec<Row>>>,
        pub documents: Mutex<HashMap<String, String>>,
        failing_tables: HashSet<String>,
        fail_provision: bool,
        fail_documents: bool,
    }

    impl MemorySink {
        pub fn new() -> Self {
            Self::default()
        }

        /// Loading `table` is rejected.
        pub fn failing_table(mut self, table: &str) -> Self {
            self.failing_tables.insert(table.to_string());
            self
        }

        pub fn failing_provision(mut self) -> Self {
            self.fail_provision = true;
            self
        }

        pub fn failing_documents(mut self) -> Self {
            self.fail_documents = true;
            self
        }

        /// Marks `tables` as loaded without going through the stage.
        pub fn with_loaded(self, tables: &[&str]) -> Self {
            {
                let mut loaded = self.tables.lock().unwrap();
                for table in tables {
                    loaded.insert(table.to_string(), Vec::new());
                }
            }
            self
        }
    }

    #[async_trait]
    impl WarehouseSink for MemorySink {
        fn capabilities(&self) -> SinkCapabilities {
            SinkCapabilities {
                supports_arrays: false,
                supports_objects: false,
                ..Default::default()
            }
        }

        async fn provision(&self, database: &str) -> Result<WarehouseLocation, SinkError> {
            if self.fail_provision {
                return Err(SinkError::Rejected("provisioning disabled".to_string()));
            }
            Ok(WarehouseLocation {
                database: database.to_string(),
                location: format!("memory://{}", database),
            })
        }

        async fn create_table(&self, _database: &str, table: &TableSpec) -> Result<(), SinkError> {
            if self.failing_tables.contains(&table.name) {
                return Err(SinkError::Rejected(format!("table {} refused", table.name)));
            }
            Ok(())
        }

        async fn load_rows(
            &self,
            _database: &str,
            table: &str,
            rows: &[Row],
        ) -> Result<usize, SinkError> {
            if rows.iter().any(|r| r.values().any(|v| v.is_array() || v.is_object())) {
                return Err(SinkError::TypeMismatch {
                    table: table.to_string(),
                    column: "?".to_string(),
                    reason: "nested value".to_string(),
                });
            }
            self.tables
                .lock()
                .unwrap()
                .insert(table.to_string(), rows.to_vec());
            Ok(rows.len())
        }

        async fn loaded_tables(&self, _database: &str) -> Result<Vec<String>, SinkError> {
            let mut names: Vec<String> = self.tables.lock().unwrap().keys().cloned().collect();
            names.sort();
            Ok(names)
        }

        async fn validate_query(&self, _database: &str, sql: &str) -> Result<QueryCheck, SinkError> {
            let loaded = self.tables.lock().unwrap();
            let lowered = sql.to_lowercase();
            let referenced: Vec<String> = lowered
                .split_whitespace()
                .collect::<Vec<_>>()
                .windows(2)
                .filter(|w| w[0] == "from" || w[0] == "join")
                .map(|w| w[1].to_string())
                .collect();
            let missing: Vec<String> = referenced
                .iter()
                .filter(|t| !loaded.contains_key(*t))
                .cloned()
                .collect();
            Ok(QueryCheck {
                valid: !referenced.is_empty() && missing.is_empty(),
                reason: (!missing.is_empty()).then(|| format!("unknown tables: {}", missing.join(", "))),
                referenced_tables: referenced,
                missing_tables: missing,
            })
        }

        async fn write_document(
            &self,
            database: &str,
            name: &str,
            contents: &str,
        ) -> Result<String, SinkError> {
            if self.fail_documents {
                return Err(SinkError::Rejected("read-only".to_string()));
            }
            self.documents
                .lock()
                .unwrap()
                .insert(name.to_string(), contents.to_string());
            Ok(format!("memory://{}/{}", database, name))
        }
    }
}
