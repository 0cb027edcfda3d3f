//! Prompts for the three narrative components.
//!
//! The components are generated independently and in parallel, so each
//! prompt carries the full company context.

use super::{bullets, Prompt};
use crate::agents::types::CompanyResearch;

const NARRATIVE_SYSTEM: &str = r#"You are a solutions engineer writing a short, believable analytics demo for a prospect.
The demo runs on a small warehouse of synthetic data that mirrors the prospect's business.
Keep every answer specific to the company described by the user. Output ONLY the JSON requested."#;

fn company_context(research: &CompanyResearch) -> String {
    format!(
        "Company: {}\nIndustry: {}\nSummary: {}\n\nOfferings:\n{}\n\nAudience:\n{}",
        research.company_name,
        research.industry,
        research.summary,
        bullets(&research.offerings),
        bullets(&research.audience),
    )
}

/// Prompt for the demo storyline.
pub fn build_storyline_prompt(research: &CompanyResearch) -> Prompt {
    let user = format!(
        "{}\n\nWrite the demo storyline. Respond with JSON:\n{{\n  \"title\": \"Demo title\",\n  \"summary\": \"One paragraph narrative of the business situation the demo explores\",\n  \"business_questions\": [\"Question the demo answers\", \"...\"]\n}}\nInclude three to five business questions.",
        company_context(research)
    );
    Prompt::new(NARRATIVE_SYSTEM, user)
}

/// Prompt for the personas who will use the demo.
pub fn build_personas_prompt(research: &CompanyResearch) -> Prompt {
    let user = format!(
        "{}\n\nDescribe the people at this company who would use the demo. Respond with JSON:\n{{\n  \"personas\": [\n    {{\"name\": \"First name\", \"role\": \"Job title\", \"goals\": [\"What they want to learn\"]}}\n  ]\n}}\nInclude two or three personas.",
        company_context(research)
    );
    Prompt::new(NARRATIVE_SYSTEM, user)
}

/// Prompt for the golden queries the demo warehouse must answer.
pub fn build_golden_queries_prompt(research: &CompanyResearch) -> Prompt {
    let user = format!(
        "{}\n\nWrite the golden queries for the demo. Each is a business question and the SQL that answers it.\nUse snake_case table and column names; a schema will be designed to contain every table you reference.\nRespond with JSON:\n{{\n  \"golden_queries\": [\n    {{\"question\": \"Business question\", \"sql\": \"SELECT ... FROM ...\"}}\n  ]\n}}\nInclude three to five queries. Use plain ANSI SQL with explicit JOINs.",
        company_context(research)
    );
    Prompt::new(NARRATIVE_SYSTEM, user)
}
