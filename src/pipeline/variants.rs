//! Stage kinds, implementation variants, and the registry that binds them.
//!
//! The set of stages and the set of variants are both closed. Configuration
//! picks one variant per stage once, at startup; [`StageVariantRegistry::build`]
//! then turns those selections into the ordered list of stage implementations
//! for a job. Nothing is re-resolved while a job runs.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::config::{ConfigError, ForgeConfig};
use super::stage::{Stage, StageDeps};
use crate::agents::{
    InstructionsAgent, NarrativeAgent, QueryValidationAgent, ResearchAgent, SchemaDesignAgent,
    SyntheticDataAgent, WarehouseLoadAgent,
};
use crate::llm::LlmBackend;

/// The fixed, ordered set of pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Research,
    Narrative,
    SchemaDesign,
    SyntheticData,
    Warehouse,
    Instructions,
    QueryValidation,
}

impl StageKind {
    /// All stages in execution order.
    pub const ALL: [StageKind; 7] = [
        StageKind::Research,
        StageKind::Narrative,
        StageKind::SchemaDesign,
        StageKind::SyntheticData,
        StageKind::Warehouse,
        StageKind::Instructions,
        StageKind::QueryValidation,
    ];

    /// Stable name used in job records, snapshots, and configuration.
    pub fn name(&self) -> &'static str {
        match self {
            StageKind::Research => "research",
            StageKind::Narrative => "narrative",
            StageKind::SchemaDesign => "schema_design",
            StageKind::SyntheticData => "synthetic_data",
            StageKind::Warehouse => "warehouse",
            StageKind::Instructions => "instructions",
            StageKind::QueryValidation => "query_validation",
        }
    }

    /// Environment variable that selects this stage's variant.
    pub fn env_key(&self) -> String {
        format!("DEMOFORGE_VARIANT_{}", self.name().to_uppercase())
    }

    /// Variants this stage can run as. The first entry is the default.
    pub fn supported_variants(&self) -> &'static [StageVariant] {
        match self {
            StageKind::Research
            | StageKind::Narrative
            | StageKind::SchemaDesign
            | StageKind::Instructions => &[
                StageVariant::Standard,
                StageVariant::Reasoning,
                StageVariant::Offline,
            ],
            StageKind::SyntheticData | StageKind::Warehouse | StageKind::QueryValidation => {
                &[StageVariant::Standard]
            }
        }
    }

    pub fn default_variant(&self) -> StageVariant {
        self.supported_variants()[0]
    }

    /// Whether this stage calls a language model in its LLM-backed variants.
    pub fn uses_llm(&self) -> bool {
        self.supported_variants().contains(&StageVariant::Offline)
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for StageKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase().replace('-', "_");
        StageKind::ALL
            .into_iter()
            .find(|kind| kind.name() == wanted)
            .ok_or_else(|| ConfigError::InvalidValue {
                key: "stage".to_string(),
                message: format!("unknown stage '{}'", s),
            })
    }
}

/// Implementation choices available to a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageVariant {
    /// Default model.
    Standard,
    /// Larger reasoning model.
    Reasoning,
    /// Deterministic, no model calls.
    Offline,
}

impl std::fmt::Display for StageVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageVariant::Standard => write!(f, "standard"),
            StageVariant::Reasoning => write!(f, "reasoning"),
            StageVariant::Offline => write!(f, "offline"),
        }
    }
}

impl FromStr for StageVariant {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "standard" | "default" => Ok(StageVariant::Standard),
            "reasoning" => Ok(StageVariant::Reasoning),
            "offline" | "template" => Ok(StageVariant::Offline),
            other => Err(ConfigError::InvalidValue {
                key: "variant".to_string(),
                message: format!(
                    "unknown variant '{}' (expected standard, reasoning, or offline)",
                    other
                ),
            }),
        }
    }
}

/// Resolved `stage → variant` selections.
#[derive(Debug, Clone, PartialEq)]
pub struct StageVariantRegistry {
    selections: BTreeMap<StageKind, StageVariant>,
}

impl StageVariantRegistry {
    /// Resolves every stage's variant from configuration, falling back to defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if a stage is configured with a
    /// variant it does not support.
    pub fn from_config(config: &ForgeConfig) -> Result<Self, ConfigError> {
        let mut selections = BTreeMap::new();
        for kind in StageKind::ALL {
            let mut variant = config
                .variants
                .get(&kind)
                .copied()
                .unwrap_or_else(|| kind.default_variant());
            if config.offline && kind.uses_llm() {
                variant = StageVariant::Offline;
            }
            if !kind.supported_variants().contains(&variant) {
                return Err(ConfigError::ValidationFailed(format!(
                    "stage '{}' does not support variant '{}'",
                    kind, variant
                )));
            }
            selections.insert(kind, variant);
        }
        Ok(Self { selections })
    }

    pub fn variant(&self, kind: StageKind) -> StageVariant {
        self.selections
            .get(&kind)
            .copied()
            .unwrap_or_else(|| kind.default_variant())
    }

    /// Iterates `(stage, variant)` pairs in execution order.
    pub fn selections(&self) -> impl Iterator<Item = (StageKind, StageVariant)> + '_ {
        self.selections.iter().map(|(k, v)| (*k, *v))
    }

    /// Whether any selected variant needs a language model.
    pub fn requires_llm(&self) -> bool {
        self.selections
            .iter()
            .any(|(k, v)| k.uses_llm() && *v != StageVariant::Offline)
    }

    /// Instantiates the ordered stage list.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if an LLM-backed variant is selected
    /// but no provider is available.
    pub fn build(&self, deps: &StageDeps) -> Result<Vec<Arc<dyn Stage>>, ConfigError> {
        let mut stages: Vec<Arc<dyn Stage>> = Vec::with_capacity(StageKind::ALL.len());
        for kind in StageKind::ALL {
            let variant = self.variant(kind);
            let backend = self.backend_for(kind, variant, deps)?;
            let stage: Arc<dyn Stage> = match kind {
                StageKind::Research => Arc::new(ResearchAgent::new(
                    Arc::clone(&deps.fetcher),
                    backend,
                    deps.settings.clone(),
                )),
                StageKind::Narrative => {
                    Arc::new(NarrativeAgent::new(backend, deps.settings.clone()))
                }
                StageKind::SchemaDesign => Arc::new(SchemaDesignAgent::new(backend)),
                StageKind::SyntheticData => Arc::new(SyntheticDataAgent::new()),
                StageKind::Warehouse => Arc::new(WarehouseLoadAgent::new(
                    Arc::clone(&deps.warehouse),
                    deps.settings.clone(),
                )),
                StageKind::Instructions => Arc::new(InstructionsAgent::new(
                    backend,
                    Arc::clone(&deps.warehouse),
                    deps.settings.clone(),
                )),
                StageKind::QueryValidation => Arc::new(QueryValidationAgent::new(
                    Arc::clone(&deps.warehouse),
                    deps.settings.clone(),
                )),
            };
            stages.push(stage);
        }
        Ok(stages)
    }

    fn backend_for(
        &self,
        kind: StageKind,
        variant: StageVariant,
        deps: &StageDeps,
    ) -> Result<Option<LlmBackend>, ConfigError> {
        if !kind.uses_llm() || variant == StageVariant::Offline {
            return Ok(None);
        }
        let provider = deps.llm.as_ref().ok_or_else(|| {
            ConfigError::MissingEnvVar(format!(
                "OPENROUTER_API_KEY (stage '{}' uses variant '{}'; set {}=offline to run without a model)",
                kind,
                variant,
                kind.env_key()
            ))
        })?;
        let model = match variant {
            StageVariant::Reasoning => deps.settings.reasoning_model.clone(),
            _ => deps.settings.default_model.clone(),
        };
        Ok(Some(
            LlmBackend::new(Arc::clone(provider), model, deps.settings.llm_timeout)
                .with_sampling(deps.settings.temperature, deps.settings.max_tokens)
                .with_retry(deps.settings.retry.clone()),
        ))
    }
}
