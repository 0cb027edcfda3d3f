//! Warehouse stage: provisions a database and loads every generated table.
//!
//! Rows are normalized against the sink's capabilities first. Tables then load
//! through a best-effort fan-out: a minority of failed tables is reported as a
//! partial failure, while all or most tables failing fails the stage.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::json;

use super::keys;
use super::types::{CompanyResearch, TableFailure, WarehouseInfo};
use super::{sink_call, SyntheticTables};
use crate::error::StageResult;
use crate::pipeline::fanout::{fan_out, FanOutPolicy};
use crate::pipeline::{PipelineState, Stage, StageContext, StageOutput, StageSettings};
use crate::warehouse::{normalize_table, DataModel, NormalizedTable, WarehouseSink};

/// Longest company slug used in a database name.
const MAX_SLUG_LEN: usize = 32;

pub struct WarehouseLoadAgent {
    warehouse: Arc<dyn WarehouseSink>,
    settings: StageSettings,
}

impl WarehouseLoadAgent {
    pub fn new(warehouse: Arc<dyn WarehouseSink>, settings: StageSettings) -> Self {
        Self {
            warehouse,
            settings,
        }
    }

    async fn load_table(&self, database: &str, table: &NormalizedTable) -> StageResult<usize> {
        let name = table.spec.name.as_str();
        sink_call(&self.settings, &format!("create_table {}", name), || {
            self.warehouse.create_table(database, &table.spec)
        })
        .await?;
        sink_call(&self.settings, &format!("load_rows {}", name), || {
            self.warehouse.load_rows(database, name, &table.rows)
        })
        .await
    }
}

#[async_trait]
impl Stage for WarehouseLoadAgent {
    fn name(&self) -> &'static str {
        "warehouse"
    }

    async fn execute(
        &self,
        state: &PipelineState,
        ctx: &StageContext,
    ) -> StageResult<StageOutput> {
        let model: DataModel = state.require(keys::DATA_MODEL)?;
        let mut data: SyntheticTables = state.require(keys::SYNTHETIC_DATA)?;
        let research: Option<CompanyResearch> = state.optional(keys::COMPANY_RESEARCH)?;

        let database = database_name(
            research.as_ref().map(|r| r.company_name.as_str()),
            ctx.job_id(),
        );
        let location = sink_call(&self.settings, "provision", || {
            self.warehouse.provision(&database)
        })
        .await?;
        ctx.info(format!(
            "Provisioned database {} at {}",
            location.database, location.location
        ));
        ctx.report_progress(0.1);

        let caps = self.warehouse.capabilities();
        let mut tables = Vec::with_capacity(model.tables.len());
        let mut normalized_columns = Vec::new();
        for spec in &model.tables {
            let rows = data.remove(&spec.name).unwrap_or_default();
            if rows.is_empty() {
                ctx.warn(format!("No rows generated for table {}", spec.name));
            }
            let table = normalize_table(spec, rows, &caps)?;
            for (column, adjustments) in &table.report.adjustments {
                let changes: Vec<&str> = adjustments.iter().map(|a| a.describe()).collect();
                let dropped = match table.report.dropped_values.get(column) {
                    Some(n) if *n > 0 => format!(" ({} value(s) dropped)", n),
                    _ => String::new(),
                };
                ctx.warn(format!(
                    "Column {}.{} normalized: {}{}",
                    spec.name,
                    column,
                    changes.join(", "),
                    dropped
                ));
                normalized_columns.push(format!("{}.{}", spec.name, column));
            }
            tables.push(table);
        }
        ctx.report_progress(0.3);

        let tasks: Vec<(String, BoxFuture<'_, StageResult<usize>>)> = tables
            .iter()
            .map(|t| (t.spec.name.clone(), self.load_table(&location.database, t).boxed()))
            .collect();
        let report = fan_out(
            tasks,
            self.settings.fanout_concurrency,
            FanOutPolicy::BestEffort,
        )
        .await?;
        for (table, err) in &report.failed {
            ctx.warn(format!("Table {} failed to load: {}", table, err));
        }
        let report = report.into_result()?;

        let info = WarehouseInfo {
            database: location.database.clone(),
            location: location.location.clone(),
            tables_loaded: report.succeeded.iter().map(|(t, _)| t.clone()).collect(),
            tables_failed: report
                .failed
                .iter()
                .map(|(table, err)| TableFailure {
                    table: table.clone(),
                    error: err.to_string(),
                })
                .collect(),
            rows_loaded: report.succeeded.iter().map(|(_, rows)| rows).sum(),
            normalized_columns,
        };

        let mut summary = json!({
            "database": info.database,
            "location": info.location,
            "tables_loaded": info.tables_loaded.len(),
            "tables_failed": info.tables_failed.len(),
            "rows_loaded": info.rows_loaded,
            "normalized_columns": info.normalized_columns.len(),
        });
        if info.tables_failed.is_empty() {
            ctx.success(format!(
                "Loaded {} rows into {} table(s)",
                info.rows_loaded,
                info.tables_loaded.len()
            ));
        } else {
            let note = format!(
                "partial failure: {} of {} tables failed to load",
                info.tables_failed.len(),
                report.total()
            );
            ctx.warn(format!("Warehouse load finished with {}", note));
            summary["note"] = json!(note);
        }

        let mut partial = PipelineState::new();
        partial.put(keys::WAREHOUSE, &info)?;
        Ok(StageOutput::new(partial)
            .with_summary(summary)
            .with_metadata("warehouse_database", json!(info.database))
            .with_metadata("warehouse_location", json!(info.location)))
    }
}

/// `demo_<company slug>_<job id prefix>`, safe for any sink.
pub fn database_name(company: Option<&str>, job_id: &str) -> String {
    let mut slug = String::new();
    for c in company.unwrap_or_default().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('_') {
            slug.push('_');
        }
        if slug.len() >= MAX_SLUG_LEN {
            break;
        }
    }
    let slug = slug.trim_end_matches('_');
    let suffix: String = job_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(8)
        .collect::<String>()
        .to_lowercase();
    match (slug.is_empty(), suffix.is_empty()) {
        (true, true) => "demo".to_string(),
        (true, false) => format!("demo_{}", suffix),
        (false, true) => format!("demo_{}", slug),
        (false, false) => format!("demo_{}_{}", slug, suffix),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::synthetic_data::generate_table;
    use crate::agents::templates;
    use crate::agents::testing::MemorySink;
    use crate::error::StageError;
    use crate::jobs::LogLevel;
    use crate::warehouse::LocalWarehouse;

    fn inputs() -> PipelineState {
        let research = CompanyResearch {
            company_name: "Acme Rockets, Inc.".to_string(),
            industry: "Retail".to_string(),
            ..Default::default()
        };
        let model = templates::data_model(&research);
        let data: SyntheticTables = model
            .tables
            .iter()
            .map(|t| (t.name.clone(), generate_table(&model, t, "https://acme.test")))
            .collect();
        let mut state = PipelineState::new();
        state.put(keys::COMPANY_RESEARCH, &research).unwrap();
        state.put(keys::DATA_MODEL, &model).unwrap();
        state.put(keys::SYNTHETIC_DATA, &data).unwrap();
        state
    }

    fn agent(sink: Arc<dyn WarehouseSink>) -> WarehouseLoadAgent {
        WarehouseLoadAgent::new(sink, StageSettings::default())
    }

    #[test]
    fn test_database_name() {
        assert_eq!(
            database_name(Some("Acme Rockets, Inc."), "9F3A-11c2-zz"),
            "demo_acme_rockets_inc_9f3a11c2"
        );
        assert_eq!(database_name(None, ""), "demo");
        assert_eq!(database_name(Some("!!!"), "abc"), "demo_abc");
    }

    #[tokio::test]
    async fn test_loads_local_warehouse_with_normalization() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(LocalWarehouse::new(dir.path()).unwrap());
        let ctx = StageContext::detached("warehouse", "https://acme.test");

        let out = agent(sink.clone()).execute(&inputs(), &ctx).await.unwrap();
        let info: WarehouseInfo = out.state.require(keys::WAREHOUSE).unwrap();

        assert_eq!(info.tables_loaded.len(), 3);
        assert!(info.tables_failed.is_empty());
        assert_eq!(info.rows_loaded, 1240);
        assert_eq!(
            info.normalized_columns,
            vec!["customers.interests".to_string(), "products.tags".to_string()]
        );
        assert_eq!(out.metadata["warehouse_database"], json!(info.database));

        let warnings: Vec<_> = ctx
            .job_snapshot()
            .logs
            .into_iter()
            .filter(|l| l.level == LogLevel::Warning)
            .collect();
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].message.contains("customers.interests"));

        let loaded = sink.loaded_tables(&info.database).await.unwrap();
        assert_eq!(loaded.len(), 3);
    }

    #[tokio::test]
    async fn test_minority_failure_is_partial() {
        let sink = Arc::new(MemorySink::new().failing_table("products"));
        let ctx = StageContext::detached("warehouse", "https://acme.test");

        let out = agent(sink).execute(&inputs(), &ctx).await.unwrap();
        let info: WarehouseInfo = out.state.require(keys::WAREHOUSE).unwrap();
        assert_eq!(info.tables_loaded, vec!["customers".to_string(), "orders".to_string()]);
        assert_eq!(info.tables_failed[0].table, "products");
        let summary = out.summary.unwrap();
        assert_eq!(summary["tables_failed"], 1);
        assert!(summary["note"].as_str().unwrap().contains("1 of 3"));
    }

    #[tokio::test]
    async fn test_majority_failure_fails_stage() {
        let sink = Arc::new(
            MemorySink::new()
                .failing_table("products")
                .failing_table("orders"),
        );
        let ctx = StageContext::detached("warehouse", "https://acme.test");
        let err = agent(sink).execute(&inputs(), &ctx).await.unwrap_err();
        assert!(matches!(
            err,
            StageError::AggregateFailure {
                failed: 2,
                total: 3,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_provision_is_required() {
        let sink = Arc::new(MemorySink::new().failing_provision());
        let ctx = StageContext::detached("warehouse", "https://acme.test");
        let err = agent(sink).execute(&inputs(), &ctx).await.unwrap_err();
        assert!(matches!(err, StageError::Sink(_)));
    }
}
