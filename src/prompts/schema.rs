//! Prompt for designing the demo data model.

use super::{bullets, Prompt};
use crate::agents::types::{CompanyResearch, DemoStory};
use crate::warehouse::model::MAX_ROWS_PER_TABLE;

const SCHEMA_SYSTEM: &str = r#"You are a data architect designing a small analytics warehouse for a product demo.

## RULES

1. Table and column names are snake_case identifiers.
2. Column types are one of: string, integer, float, boolean, date, timestamp.
3. Every table has an integer primary key column named <singular>_id listed first.
4. Foreign keys set "references" to "table.column" of an existing table.
5. A column holding a list of values sets "multi_valued": true.
6. Give string columns a handful of realistic "sample_values" where it helps the demo.

## OUTPUT FORMAT

{
  "tables": [
    {
      "name": "orders",
      "description": "What one row represents",
      "row_count": 500,
      "columns": [
        {"name": "order_id", "type": "integer"},
        {"name": "customer_id", "type": "integer", "references": "customers.customer_id"},
        {"name": "tags", "type": "string", "multi_valued": true, "sample_values": ["gift", "express"]}
      ]
    }
  ]
}

Output ONLY the JSON object."#;

/// Builds the schema prompt. The model must contain every table the golden
/// queries reference.
pub fn build_schema_prompt(research: &CompanyResearch, story: &DemoStory) -> Prompt {
    let queries: Vec<String> = story
        .golden_queries
        .iter()
        .map(|q| format!("{}\n  {}", q.question, q.sql))
        .collect();
    let user = format!(
        "Company: {} ({})\n{}\n\nDemo: {}\n{}\n\nGolden queries:\n{}\n\nDesign the warehouse tables. Include every table and column the golden queries use. Keep row_count between 20 and {} per table.",
        research.company_name,
        research.industry,
        research.summary,
        story.storyline.title,
        story.storyline.summary,
        bullets(&queries),
        MAX_ROWS_PER_TABLE.min(2000),
    );
    Prompt::new(SCHEMA_SYSTEM, user)
}
