//! Prompt for the demo setup and walkthrough document.

use super::{bullets, Prompt};
use crate::agents::types::{CompanyResearch, DemoStory, WarehouseInfo};
use crate::warehouse::DataModel;

const INSTRUCTIONS_SYSTEM: &str = r#"You are a solutions engineer writing the runbook a colleague will follow to present an analytics demo.
Write GitHub-flavored markdown with these sections, in order:
## Overview, ## Setup, ## Data Model, ## Walkthrough, ## Talking Points.
The Walkthrough presents each golden query with its question, the SQL in a code block, and what to point out.
Output ONLY the markdown document."#;

pub fn build_instructions_prompt(
    research: &CompanyResearch,
    story: &DemoStory,
    model: &DataModel,
    warehouse: &WarehouseInfo,
) -> Prompt {
    let tables: Vec<String> = model
        .tables
        .iter()
        .map(|t| {
            let columns: Vec<String> = t
                .columns
                .iter()
                .map(|c| format!("{} {}", c.name, c.data_type))
                .collect();
            format!("{} ({} rows): {}", t.name, t.row_count, columns.join(", "))
        })
        .collect();
    let personas: Vec<String> = story
        .personas
        .iter()
        .map(|p| format!("{}, {}", p.name, p.role))
        .collect();
    let queries: Vec<String> = story
        .golden_queries
        .iter()
        .map(|q| format!("{}\n  {}", q.question, q.sql))
        .collect();

    let user = format!(
        "Company: {}\n{}\n\nDemo: {}\n{}\n\nPersonas:\n{}\n\nWarehouse database: {} at {}\nLoaded tables: {}\n\nTables:\n{}\n\nGolden queries:\n{}",
        research.company_name,
        research.summary,
        story.storyline.title,
        story.storyline.summary,
        bullets(&personas),
        warehouse.database,
        warehouse.location,
        warehouse.tables_loaded.join(", "),
        bullets(&tables),
        bullets(&queries),
    );
    Prompt::new(INSTRUCTIONS_SYSTEM, user)
}
