//! LLM prompts for the content-generating stages.
//!
//! Each submodule pairs a fixed system prompt with a builder that renders the
//! user prompt from pipeline artifacts:
//!
//! - [`research`] - company summary from fetched page digests
//! - [`narrative`] - storyline, personas and golden queries
//! - [`schema`] - warehouse data model covering the golden queries
//! - [`instructions`] - setup and walkthrough document
//!
//! Every builder names the JSON shape it expects back; replies are parsed with
//! [`crate::llm::parse_json`], which tolerates fenced or chatty output.

pub mod instructions;
pub mod narrative;
pub mod research;
pub mod schema;

pub use instructions::build_instructions_prompt;
pub use narrative::{build_golden_queries_prompt, build_personas_prompt, build_storyline_prompt};
pub use research::build_research_prompt;
pub use schema::build_schema_prompt;

/// A system + user prompt pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

impl Prompt {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
        }
    }
}

/// Renders a list as markdown bullets, or `(none)` when empty.
pub(crate) fn bullets<S: AsRef<str>>(items: &[S]) -> String {
    if items.is_empty() {
        return "(none)".to_string();
    }
    items
        .iter()
        .map(|item| format!("- {}", item.as_ref()))
        .collect::<Vec<_>>()
        .join("\n")
}
