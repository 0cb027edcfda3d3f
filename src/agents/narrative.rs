//! Narrative stage: storyline, personas and golden queries.
//!
//! The three components are independent and run through a fail-fast fan-out;
//! a demo without any one of them is not worth provisioning.

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Deserialize;
use serde_json::json;

use super::keys;
use super::templates;
use super::types::{CompanyResearch, DemoStory, GoldenQuery, Persona, Storyline};
use crate::error::{StageError, StageResult};
use crate::llm::LlmBackend;
use crate::pipeline::fanout::{fan_out, FanOutPolicy};
use crate::pipeline::{PipelineState, Stage, StageContext, StageOutput, StageSettings};
use crate::prompts::{build_golden_queries_prompt, build_personas_prompt, build_storyline_prompt};

#[derive(Deserialize)]
struct PersonasReply {
    personas: Vec<Persona>,
}

#[derive(Deserialize)]
struct GoldenQueriesReply {
    golden_queries: Vec<GoldenQuery>,
}

/// One finished component.
enum Component {
    Storyline(Storyline),
    Personas(Vec<Persona>),
    GoldenQueries(Vec<GoldenQuery>),
}

pub struct NarrativeAgent {
    llm: Option<LlmBackend>,
    settings: StageSettings,
}

impl NarrativeAgent {
    pub fn new(llm: Option<LlmBackend>, settings: StageSettings) -> Self {
        Self { llm, settings }
    }

    async fn storyline(&self, research: &CompanyResearch) -> StageResult<Component> {
        let storyline = match &self.llm {
            Some(llm) => {
                let prompt = build_storyline_prompt(research);
                llm.complete_json::<Storyline>(&prompt.system, &prompt.user)
                    .await?
            }
            None => templates::storyline(research),
        };
        if storyline.title.trim().is_empty() || storyline.summary.trim().is_empty() {
            return Err(StageError::invalid("storyline", "title and summary are required"));
        }
        Ok(Component::Storyline(storyline))
    }

    async fn personas(&self, research: &CompanyResearch) -> StageResult<Component> {
        let personas = match &self.llm {
            Some(llm) => {
                let prompt = build_personas_prompt(research);
                llm.complete_json::<PersonasReply>(&prompt.system, &prompt.user)
                    .await?
                    .personas
            }
            None => templates::personas(research),
        };
        if personas.is_empty() {
            return Err(StageError::invalid("personas", "no personas generated"));
        }
        Ok(Component::Personas(personas))
    }

    async fn golden_queries(&self, research: &CompanyResearch) -> StageResult<Component> {
        let queries = match &self.llm {
            Some(llm) => {
                let prompt = build_golden_queries_prompt(research);
                llm.complete_json::<GoldenQueriesReply>(&prompt.system, &prompt.user)
                    .await?
                    .golden_queries
            }
            None => templates::golden_queries(research),
        };
        let queries: Vec<GoldenQuery> = queries
            .into_iter()
            .filter(|q| !q.question.trim().is_empty() && !q.sql.trim().is_empty())
            .collect();
        if queries.is_empty() {
            return Err(StageError::invalid(
                "golden_queries",
                "no query with both a question and SQL",
            ));
        }
        Ok(Component::GoldenQueries(queries))
    }
}

#[async_trait]
impl Stage for NarrativeAgent {
    fn name(&self) -> &'static str {
        "narrative"
    }

    async fn execute(
        &self,
        state: &PipelineState,
        ctx: &StageContext,
    ) -> StageResult<StageOutput> {
        let research: CompanyResearch = state.require(keys::COMPANY_RESEARCH)?;
        ctx.info(format!("Writing demo narrative for {}", research.company_name));

        let tasks: Vec<(String, BoxFuture<'_, StageResult<Component>>)> = vec![
            ("storyline".to_string(), self.storyline(&research).boxed()),
            ("personas".to_string(), self.personas(&research).boxed()),
            (
                "golden_queries".to_string(),
                self.golden_queries(&research).boxed(),
            ),
        ];
        let report = fan_out(
            tasks,
            self.settings.fanout_concurrency,
            FanOutPolicy::FailFast,
        )
        .await?;

        let mut storyline = None;
        let mut personas = None;
        let mut golden_queries = None;
        for (_, component) in report.succeeded {
            match component {
                Component::Storyline(s) => storyline = Some(s),
                Component::Personas(p) => personas = Some(p),
                Component::GoldenQueries(q) => golden_queries = Some(q),
            }
        }
        let missing = |name: &str| StageError::External(format!("component '{}' produced nothing", name));
        let story = DemoStory {
            storyline: storyline.ok_or_else(|| missing("storyline"))?,
            personas: personas.ok_or_else(|| missing("personas"))?,
            golden_queries: golden_queries.ok_or_else(|| missing("golden_queries"))?,
        };

        ctx.success(format!(
            "Story '{}' with {} persona(s) and {} golden quer{}",
            story.storyline.title,
            story.personas.len(),
            story.golden_queries.len(),
            if story.golden_queries.len() == 1 { "y" } else { "ies" }
        ));

        let mut partial = PipelineState::new();
        partial.put(keys::DEMO_STORY, &story)?;
        Ok(StageOutput::new(partial).with_summary(json!({
            "title": story.storyline.title,
            "personas": story.personas.len(),
            "golden_queries": story.golden_queries.len(),
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedLlm;
    use std::sync::Arc;
    use std::time::Duration;

    fn state() -> PipelineState {
        let research = CompanyResearch {
            company_name: "Acme".to_string(),
            industry: "Retail".to_string(),
            summary: "Sells anvils.".to_string(),
            offerings: vec!["Anvils".to_string()],
            ..Default::default()
        };
        let mut state = PipelineState::new();
        state.put(keys::COMPANY_RESEARCH, &research).unwrap();
        state
    }

    fn backend(llm: Arc<ScriptedLlm>) -> LlmBackend {
        LlmBackend::new(llm, "m", Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_offline_story() {
        let agent = NarrativeAgent::new(None, StageSettings::default());
        let ctx = StageContext::detached("narrative", "https://acme.test");
        let out = agent.execute(&state(), &ctx).await.unwrap();

        let story: DemoStory = out.state.require(keys::DEMO_STORY).unwrap();
        assert_eq!(story.golden_queries.len(), 4);
        assert_eq!(out.summary.unwrap()["personas"], 2);
    }

    #[tokio::test]
    async fn test_llm_components_are_assembled() {
        let llm = Arc::new(
            ScriptedLlm::new()
                .reply(
                    "business_questions",
                    r#"{"title": "Anvil insights", "summary": "Where anvils sell.", "business_questions": ["Who buys?"]}"#,
                )
                .reply(
                    "\"personas\"",
                    r#"{"personas": [{"name": "Wile", "role": "Buyer", "goals": ["Catch"]}]}"#,
                )
                .reply(
                    "golden_queries",
                    r#"{"golden_queries": [{"question": "Top sellers?", "sql": "SELECT * FROM anvils"}, {"question": "", "sql": ""}]}"#,
                ),
        );
        let agent = NarrativeAgent::new(Some(backend(llm.clone())), StageSettings::default());
        let ctx = StageContext::detached("narrative", "https://acme.test");
        let out = agent.execute(&state(), &ctx).await.unwrap();

        let story: DemoStory = out.state.require(keys::DEMO_STORY).unwrap();
        assert_eq!(story.storyline.title, "Anvil insights");
        assert_eq!(story.personas[0].name, "Wile");
        assert_eq!(story.golden_queries.len(), 1);
        assert_eq!(llm.call_count(), 3);
    }

    #[tokio::test]
    async fn test_one_failed_component_fails_the_stage() {
        let llm = Arc::new(
            ScriptedLlm::new()
                .reply(
                    "business_questions",
                    r#"{"title": "T", "summary": "S", "business_questions": []}"#,
                )
                .reply("\"personas\"", r#"{"personas": [{"name": "A", "role": "B"}]}"#)
                .fail("golden_queries", 400),
        );
        let agent = NarrativeAgent::new(Some(backend(llm)), StageSettings::default());
        let ctx = StageContext::detached("narrative", "https://acme.test");
        let err = agent.execute(&state(), &ctx).await.unwrap_err();

        match err {
            StageError::AggregateFailure { failed, total, details } => {
                assert_eq!(failed, 1);
                assert_eq!(total, 3);
                assert!(details.starts_with("golden_queries"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_requires_research() {
        let agent = NarrativeAgent::new(None, StageSettings::default());
        let ctx = StageContext::detached("narrative", "https://acme.test");
        let err = agent.execute(&PipelineState::new(), &ctx).await.unwrap_err();
        assert!(matches!(err, StageError::MissingInput(_)));
    }
}
