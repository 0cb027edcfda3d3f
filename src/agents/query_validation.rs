//! Query validation stage: every golden query must run on the loaded tables.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use super::keys;
use super::sink_call;
use super::types::{DemoStory, QueryResult, QueryValidationReport, WarehouseInfo};
use crate::error::{StageError, StageResult};
use crate::pipeline::{PipelineState, Stage, StageContext, StageOutput, StageSettings};
use crate::warehouse::WarehouseSink;

pub struct QueryValidationAgent {
    warehouse: Arc<dyn WarehouseSink>,
    settings: StageSettings,
}

impl QueryValidationAgent {
    pub fn new(warehouse: Arc<dyn WarehouseSink>, settings: StageSettings) -> Self {
        Self {
            warehouse,
            settings,
        }
    }
}

#[async_trait]
impl Stage for QueryValidationAgent {
    fn name(&self) -> &'static str {
        "query_validation"
    }

    async fn execute(
        &self,
        state: &PipelineState,
        ctx: &StageContext,
    ) -> StageResult<StageOutput> {
        let story: DemoStory = state.require(keys::DEMO_STORY)?;
        let warehouse: WarehouseInfo = state.require(keys::WAREHOUSE)?;

        let total = story.golden_queries.len();
        let mut report = QueryValidationReport {
            total,
            ..Default::default()
        };
        for (i, query) in story.golden_queries.iter().enumerate() {
            let check = sink_call(&self.settings, "validate_query", || {
                self.warehouse.validate_query(&warehouse.database, &query.sql)
            })
            .await?;
            if check.valid {
                report.valid += 1;
            } else {
                report.invalid += 1;
                ctx.warn(format!(
                    "Golden query '{}' is invalid: {}",
                    query.question,
                    check.reason.as_deref().unwrap_or("rejected by the warehouse")
                ));
            }
            report.results.push(QueryResult {
                question: query.question.clone(),
                sql: query.sql.clone(),
                valid: check.valid,
                reason: check.reason,
            });
            ctx.report_progress((i + 1) as f64 / total as f64);
        }

        if total > 0 && report.valid == 0 {
            return Err(StageError::AggregateFailure {
                failed: report.invalid,
                total,
                details: "no golden query validates against the warehouse".to_string(),
            });
        }
        if total == 0 {
            ctx.warn("No golden queries to validate");
        } else {
            ctx.success(format!("{} of {} golden queries validated", report.valid, total));
        }

        let summary = json!({
            "total": report.total,
            "valid": report.valid,
            "invalid": report.invalid,
        });
        let mut partial = PipelineState::new();
        partial.put(keys::QUERY_VALIDATION, &report)?;
        Ok(StageOutput::new(partial).with_summary(summary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::testing::MemorySink;
    use crate::agents::types::{GoldenQuery, Storyline};
    use crate::jobs::LogLevel;

    fn state(queries: &[&str]) -> PipelineState {
        let story = DemoStory {
            storyline: Storyline::default(),
            personas: Vec::new(),
            golden_queries: queries
                .iter()
                .enumerate()
                .map(|(i, sql)| GoldenQuery {
                    question: format!("Q{}", i + 1),
                    sql: sql.to_string(),
                })
                .collect(),
        };
        let warehouse = WarehouseInfo {
            database: "demo".to_string(),
            ..Default::default()
        };
        let mut state = PipelineState::new();
        state.put(keys::DEMO_STORY, &story).unwrap();
        state.put(keys::WAREHOUSE, &warehouse).unwrap();
        state
    }

    fn agent() -> QueryValidationAgent {
        let sink = Arc::new(MemorySink::new().with_loaded(&["orders", "customers"]));
        QueryValidationAgent::new(sink, StageSettings::default())
    }

    #[tokio::test]
    async fn test_invalid_queries_are_warnings() {
        let ctx = StageContext::detached("query_validation", "https://acme.test");
        let out = agent()
            .execute(
                &state(&[
                    "SELECT * FROM orders",
                    "SELECT * FROM orders o JOIN customers c ON o.customer_id = c.customer_id",
                    "SELECT * FROM refunds",
                ]),
                &ctx,
            )
            .await
            .unwrap();

        assert_eq!(
            out.summary.unwrap(),
            json!({"total": 3, "valid": 2, "invalid": 1})
        );
        let report: QueryValidationReport = out.state.require(keys::QUERY_VALIDATION).unwrap();
        assert!(!report.results[2].valid);
        let warnings: Vec<_> = ctx
            .job_snapshot()
            .logs
            .into_iter()
            .filter(|l| l.level == LogLevel::Warning)
            .collect();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].message.contains("Q3"));
    }

    #[tokio::test]
    async fn test_all_invalid_fails_stage() {
        let ctx = StageContext::detached("query_validation", "https://acme.test");
        let err = agent()
            .execute(&state(&["SELECT * FROM refunds", "SELECT 1"]), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StageError::AggregateFailure {
                failed: 2,
                total: 2,
                ..
            }
        ));
    }
}
