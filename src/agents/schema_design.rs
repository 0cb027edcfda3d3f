//! Schema design stage: turns the story into a validated data model.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::keys;
use super::templates;
use super::types::{CompanyResearch, DemoStory};
use crate::error::{StageError, StageResult};
use crate::llm::LlmBackend;
use crate::pipeline::{PipelineState, Stage, StageContext, StageOutput};
use crate::prompts::build_schema_prompt;
use crate::warehouse::model::MAX_ROWS_PER_TABLE;
use crate::warehouse::{ColumnSpec, ColumnType, DataModel, TableSpec};

/// Model output before column types are checked.
#[derive(Debug, Deserialize)]
struct RawModel {
    #[serde(default)]
    tables: Vec<RawTable>,
}

#[derive(Debug, Deserialize)]
struct RawTable {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default = "default_row_count")]
    row_count: usize,
    #[serde(default)]
    columns: Vec<RawColumn>,
}

#[derive(Debug, Deserialize)]
struct RawColumn {
    name: String,
    #[serde(rename = "type")]
    data_type: String,
    #[serde(default)]
    multi_valued: bool,
    #[serde(default)]
    references: Option<String>,
    #[serde(default)]
    sample_values: Vec<String>,
}

fn default_row_count() -> usize {
    100
}

pub struct SchemaDesignAgent {
    llm: Option<LlmBackend>,
}

impl SchemaDesignAgent {
    pub fn new(llm: Option<LlmBackend>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Stage for SchemaDesignAgent {
    fn name(&self) -> &'static str {
        "schema_design"
    }

    async fn execute(
        &self,
        state: &PipelineState,
        ctx: &StageContext,
    ) -> StageResult<StageOutput> {
        let research: CompanyResearch = state.require(keys::COMPANY_RESEARCH)?;
        let story: DemoStory = state.require(keys::DEMO_STORY)?;

        let model = match &self.llm {
            Some(llm) => {
                ctx.info(format!("Designing schema with {}", llm.model()));
                let prompt = build_schema_prompt(&research, &story);
                let raw: RawModel = llm.complete_json(&prompt.system, &prompt.user).await?;
                resolve(raw, ctx)?
            }
            None => templates::data_model(&research),
        };
        model.validate()?;

        let columns: usize = model.tables.iter().map(|t| t.columns.len()).sum();
        let rows: usize = model.tables.iter().map(|t| t.row_count).sum();
        ctx.success(format!(
            "Designed {} table(s): {}",
            model.tables.len(),
            model.table_names().join(", ")
        ));

        let mut partial = PipelineState::new();
        partial.put(keys::DATA_MODEL, &model)?;
        Ok(StageOutput::new(partial).with_summary(json!({
            "tables": model.tables.len(),
            "columns": columns,
            "rows_planned": rows,
        })))
    }
}

/// Checks column types and clamps row counts.
///
/// An unknown type fails the stage; an out-of-range row count is clamped
/// with a warning.
fn resolve(raw: RawModel, ctx: &StageContext) -> StageResult<DataModel> {
    let mut tables = Vec::with_capacity(raw.tables.len());
    for table in raw.tables {
        let mut columns = Vec::with_capacity(table.columns.len());
        for column in table.columns {
            let data_type = ColumnType::parse(&column.data_type).ok_or_else(|| {
                StageError::invalid(
                    keys::DATA_MODEL,
                    format!(
                        "column '{}.{}' has unknown type '{}'",
                        table.name, column.name, column.data_type
                    ),
                )
            })?;
            columns.push(ColumnSpec {
                name: column.name,
                data_type,
                multi_valued: column.multi_valued,
                references: column.references.filter(|r| !r.trim().is_empty()),
                sample_values: column.sample_values,
            });
        }

        let row_count = table.row_count.clamp(1, MAX_ROWS_PER_TABLE);
        if row_count != table.row_count {
            ctx.warn(format!(
                "Table '{}' row_count {} clamped to {}",
                table.name, table.row_count, row_count
            ));
        }
        tables.push(TableSpec {
            name: table.name,
            description: table.description,
            columns,
            row_count,
        });
    }
    Ok(DataModel { tables })
}
