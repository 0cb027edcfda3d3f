//! Instructions stage: the markdown runbook for presenting the demo.
//!
//! The document is always returned in the pipeline state. Writing a copy next
//! to the warehouse is best effort; a failed write is a WARNING.

use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use super::keys;
use super::sink_call;
use super::types::{CompanyResearch, DemoStory, WarehouseInfo};
use crate::error::{StageError, StageResult};
use crate::llm::LlmBackend;
use crate::pipeline::{PipelineState, Stage, StageContext, StageOutput, StageSettings};
use crate::prompts::build_instructions_prompt;
use crate::warehouse::{DataModel, WarehouseSink};

/// File name of the runbook stored with the warehouse.
pub const DOCUMENT_NAME: &str = "DEMO_GUIDE.md";

pub struct InstructionsAgent {
    llm: Option<LlmBackend>,
    warehouse: Arc<dyn WarehouseSink>,
    settings: StageSettings,
}

impl InstructionsAgent {
    pub fn new(
        llm: Option<LlmBackend>,
        warehouse: Arc<dyn WarehouseSink>,
        settings: StageSettings,
    ) -> Self {
        Self {
            llm,
            warehouse,
            settings,
        }
    }
}

#[async_trait]
impl Stage for InstructionsAgent {
    fn name(&self) -> &'static str {
        "instructions"
    }

    async fn execute(
        &self,
        state: &PipelineState,
        ctx: &StageContext,
    ) -> StageResult<StageOutput> {
        let research: CompanyResearch = state.require(keys::COMPANY_RESEARCH)?;
        let story: DemoStory = state.require(keys::DEMO_STORY)?;
        let model: DataModel = state.require(keys::DATA_MODEL)?;
        let warehouse: WarehouseInfo = state.require(keys::WAREHOUSE)?;

        let markdown = match &self.llm {
            Some(llm) => {
                ctx.info(format!("Writing runbook with {}", llm.model()));
                let prompt = build_instructions_prompt(&research, &story, &model, &warehouse);
                strip_markdown_fence(&llm.complete(&prompt.system, &prompt.user).await?)
            }
            None => render_offline(&research, &story, &model, &warehouse),
        };
        if markdown.trim().is_empty() {
            return Err(StageError::invalid(
                keys::INSTRUCTIONS_MARKDOWN,
                "generated document is empty",
            ));
        }
        ctx.report_progress(0.7);

        let written = sink_call(&self.settings, "write_document", || {
            self.warehouse
                .write_document(&warehouse.database, DOCUMENT_NAME, &markdown)
        })
        .await;
        let document = match written {
            Ok(location) => {
                ctx.info(format!("Runbook written to {}", location));
                Some(location)
            }
            Err(e) => {
                ctx.warn(format!("Runbook not stored with the warehouse: {}", e));
                None
            }
        };

        let sections = markdown.lines().filter(|l| l.starts_with("## ")).count();
        ctx.success(format!("Runbook ready ({} sections)", sections));

        let mut partial = PipelineState::new();
        partial.put(keys::INSTRUCTIONS_MARKDOWN, &markdown)?;
        let mut output = StageOutput::new(partial).with_summary(json!({
            "characters": markdown.chars().count(),
            "sections": sections,
            "document": document,
        }));
        if let Some(location) = document {
            output = output.with_metadata("instructions_document", json!(location));
        }
        Ok(output)
    }
}

/// Removes a ```markdown fence wrapped around the whole reply.
fn strip_markdown_fence(reply: &str) -> String {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };
    let Some(body) = rest.strip_suffix("```") else {
        return trimmed.to_string();
    };
    match body.split_once('\n') {
        Some((lang, content)) if !lang.contains(' ') => content.trim().to_string(),
        _ => body.trim().to_string(),
    }
}

fn render_offline(
    research: &CompanyResearch,
    story: &DemoStory,
    model: &DataModel,
    warehouse: &WarehouseInfo,
) -> String {
    let mut doc = String::new();
    // Writing to a String cannot fail.
    let _ = writeln!(doc, "# {}\n", story.storyline.title);

    let _ = writeln!(doc, "## Overview\n\n{}\n\n{}\n", research.summary, story.storyline.summary);
    if !story.personas.is_empty() {
        let _ = writeln!(doc, "Audience for this demo:\n");
        for persona in &story.personas {
            let _ = writeln!(
                doc,
                "- **{}**, {}: {}",
                persona.name,
                persona.role,
                persona.goals.join("; ")
            );
        }
        doc.push('\n');
    }

    let _ = writeln!(doc, "## Setup\n");
    let _ = writeln!(
        doc,
        "1. Connect your SQL client to database `{}` at `{}`.",
        warehouse.database, warehouse.location
    );
    let loaded: Vec<String> = warehouse
        .tables_loaded
        .iter()
        .map(|t| format!("`{}`", t))
        .collect();
    let _ = writeln!(doc, "2. Confirm these tables are present: {}.", loaded.join(", "));
    if !warehouse.tables_failed.is_empty() {
        let failed: Vec<&str> = warehouse
            .tables_failed
            .iter()
            .map(|f| f.table.as_str())
            .collect();
        let _ = writeln!(
            doc,
            "\n> Tables {} did not load. Skip walkthrough steps that use them.",
            failed.join(", ")
        );
    }
    doc.push('\n');

    let _ = writeln!(doc, "## Data Model\n");
    let _ = writeln!(doc, "| Table | Rows | Columns |\n|---|---|---|");
    for table in &model.tables {
        let columns: Vec<String> = table
            .columns
            .iter()
            .map(|c| format!("{} ({})", c.name, c.data_type))
            .collect();
        let _ = writeln!(doc, "| {} | {} | {} |", table.name, table.row_count, columns.join(", "));
    }
    doc.push('\n');

    let _ = writeln!(doc, "## Walkthrough\n");
    for (i, query) in story.golden_queries.iter().enumerate() {
        let _ = writeln!(doc, "### {}. {}\n\n```sql\n{}\n```\n", i + 1, query.question, query.sql);
    }

    let _ = writeln!(doc, "## Talking Points\n");
    for question in &story.storyline.business_questions {
        let _ = writeln!(doc, "- {}", question);
    }
    doc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::templates;
    use crate::agents::testing::MemorySink;
    use crate::jobs::LogLevel;
    use crate::llm::testing::ScriptedLlm;
    use std::time::Duration;

    fn state() -> PipelineState {
        let research = CompanyResearch {
            company_name: "Acme".to_string(),
            industry: "Retail".to_string(),
            summary: "Acme sells anvils.".to_string(),
            ..Default::default()
        };
        let story = DemoStory {
            storyline: templates::storyline(&research),
            personas: templates::personas(&research),
            golden_queries: templates::golden_queries(&research),
        };
        let warehouse = WarehouseInfo {
            database: "demo_acme".to_string(),
            location: "memory://demo_acme".to_string(),
            tables_loaded: vec!["customers".to_string(), "orders".to_string()],
            ..Default::default()
        };
        let mut state = PipelineState::new();
        state.put(keys::COMPANY_RESEARCH, &research).unwrap();
        state.put(keys::DEMO_STORY, &story).unwrap();
        state
            .put(keys::DATA_MODEL, &templates::data_model(&research))
            .unwrap();
        state.put(keys::WAREHOUSE, &warehouse).unwrap();
        state
    }

    #[tokio::test]
    async fn test_offline_runbook_is_written_to_sink() {
        let sink = Arc::new(MemorySink::new());
        let agent = InstructionsAgent::new(None, sink.clone(), StageSettings::default());
        let ctx = StageContext::detached("instructions", "https://acme.test");

        let out = agent.execute(&state(), &ctx).await.unwrap();
        let markdown: String = out.state.require(keys::INSTRUCTIONS_MARKDOWN).unwrap();
        for section in ["## Overview", "## Setup", "## Data Model", "## Walkthrough", "## Talking Points"] {
            assert!(markdown.contains(section), "missing {section}");
        }
        assert!(markdown.contains("`demo_acme`"));
        assert!(markdown.contains("```sql"));
        assert_eq!(out.summary.unwrap()["sections"], 5);
        assert!(sink.documents.lock().unwrap().contains_key(DOCUMENT_NAME));
        assert_eq!(
            out.metadata["instructions_document"],
            json!("memory://demo_acme/DEMO_GUIDE.md")
        );
    }

    #[tokio::test]
    async fn test_document_write_failure_degrades() {
        let sink = Arc::new(MemorySink::new().failing_documents());
        let agent = InstructionsAgent::new(None, sink, StageSettings::default());
        let ctx = StageContext::detached("instructions", "https://acme.test");

        let out = agent.execute(&state(), &ctx).await.unwrap();
        assert!(out.summary.unwrap()["document"].is_null());
        assert!(ctx
            .job_snapshot()
            .logs
            .iter()
            .any(|l| l.level == LogLevel::Warning && l.message.contains("not stored")));
    }

    #[tokio::test]
    async fn test_llm_runbook_fence_is_stripped() {
        let llm = Arc::new(
            ScriptedLlm::new().reply("Golden queries", "```markdown\n# Guide\n\n## Overview\nHi\n```"),
        );
        let backend = LlmBackend::new(llm, "m", Duration::from_secs(1));
        let agent = InstructionsAgent::new(
            Some(backend),
            Arc::new(MemorySink::new()),
            StageSettings::default(),
        );
        let ctx = StageContext::detached("instructions", "https://acme.test");

        let out = agent.execute(&state(), &ctx).await.unwrap();
        let markdown: String = out.state.require(keys::INSTRUCTIONS_MARKDOWN).unwrap();
        assert_eq!(markdown, "# Guide\n\n## Overview\nHi");
    }

    #[test]
    fn test_strip_fence_leaves_plain_text() {
        assert_eq!(strip_markdown_fence("  # Title  "), "# Title");
        assert_eq!(strip_markdown_fence("```\nbody\n```"), "body");
    }
}
