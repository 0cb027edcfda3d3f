//! Wiring between configuration, the job registry and pipeline runs.
//!
//! [`ForgeService`] is what the HTTP layer and the CLI share: it validates
//! submissions, creates jobs and starts one orchestrator run per job.

use std::sync::Arc;

use reqwest::Url;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::collectors::HttpFetcher;
use crate::export::SnapshotExporter;
use crate::jobs::{JobHandle, JobRegistry};
use crate::llm::{LlmProvider, OpenRouterProvider};
use crate::metrics;
use crate::pipeline::{
    ConfigError, ForgeConfig, PipelineExecutor, PipelineOutcome, PipelineState, StageDeps,
    StageSettings, StageVariantRegistry,
};
use crate::warehouse::LocalWarehouse;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Invalid source reference '{reference}': {reason}")]
    InvalidSource { reference: String, reason: String },

    #[error("Could not set up {component}: {reason}")]
    Setup { component: String, reason: String },
}

/// Builds the production collaborators described by `config`.
///
/// The LLM provider is only created when an API key is configured.
///
/// # Errors
///
/// `ServiceError::Setup` if an HTTP client or the warehouse cannot be built.
pub fn build_deps(config: &ForgeConfig) -> Result<StageDeps, ServiceError> {
    let settings = StageSettings::from_config(config);

    let llm: Option<Arc<dyn LlmProvider>> = match &config.api_key {
        Some(key) => {
            let provider = OpenRouterProvider::new(key.clone(), &config.api_base, config.llm_timeout)
                .map_err(|e| ServiceError::Setup {
                    component: "LLM provider".to_string(),
                    reason: e.to_string(),
                })?;
            tracing::info!(api_key = %provider.api_key_masked(), base_url = %provider.base_url(), "Using OpenRouter");
            Some(Arc::new(provider))
        }
        None => None,
    };

    let fetcher = HttpFetcher::new(config.fetch_timeout, settings.retry.clone()).map_err(|e| {
        ServiceError::Setup {
            component: "content fetcher".to_string(),
            reason: e.to_string(),
        }
    })?;

    let warehouse = LocalWarehouse::new(&config.warehouse_dir).map_err(|e| ServiceError::Setup {
        component: "warehouse".to_string(),
        reason: e.to_string(),
    })?;

    Ok(StageDeps {
        llm,
        fetcher: Arc::new(fetcher),
        warehouse: Arc::new(warehouse),
        settings,
    })
}

/// Checks that `reference` is an absolute http(s) URL with a host.
///
/// # Errors
///
/// `ServiceError::InvalidSource` otherwise.
pub fn validate_source(reference: &str) -> Result<Url, ServiceError> {
    let invalid = |reason: &str| ServiceError::InvalidSource {
        reference: reference.to_string(),
        reason: reason.to_string(),
    };
    let trimmed = reference.trim();
    if trimmed.is_empty() {
        return Err(invalid("source reference is empty"));
    }
    let url = Url::parse(trimmed).map_err(|e| invalid(&e.to_string()))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(invalid("only http and https URLs are supported"));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(invalid("URL has no host"));
    }
    Ok(url)
}

/// Shared entry point for submitting and running jobs.
pub struct ForgeService {
    config: ForgeConfig,
    registry: Arc<JobRegistry>,
    variants: StageVariantRegistry,
    executor: PipelineExecutor,
}

impl ForgeService {
    /// Resolves variants, builds the stage list and an empty job registry.
    ///
    /// # Errors
    ///
    /// `ServiceError::Config` for an invalid configuration or a selected
    /// LLM-backed variant without a provider.
    pub fn new(config: ForgeConfig, deps: StageDeps) -> Result<Self, ServiceError> {
        config.validate()?;
        let variants = StageVariantRegistry::from_config(&config)?;
        let stages = variants.build(&deps)?;

        let mut executor = PipelineExecutor::new(stages).with_stage_timeout(config.stage_timeout);
        if let Some(dir) = &config.snapshot_dir {
            tracing::info!(dir = %dir.display(), "Stage snapshot export enabled");
            executor = executor.with_exporter(SnapshotExporter::new(dir));
        }

        for (kind, variant) in variants.selections() {
            tracing::debug!(stage = kind.name(), variant = %variant, "Stage variant selected");
        }

        let registry = Arc::new(JobRegistry::new(
            config.job_ttl,
            config.subscriber_queue_capacity,
        ));

        Ok(Self {
            config,
            registry,
            variants,
            executor,
        })
    }

    /// [`ForgeService::new`] with collaborators built by [`build_deps`].
    pub fn from_config(config: ForgeConfig) -> Result<Self, ServiceError> {
        let deps = build_deps(&config)?;
        Self::new(config, deps)
    }

    pub fn config(&self) -> &ForgeConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn variants(&self) -> &StageVariantRegistry {
        &self.variants
    }

    pub fn executor(&self) -> &PipelineExecutor {
        &self.executor
    }

    /// Creates a job and starts its pipeline run in the background.
    ///
    /// # Errors
    ///
    /// `ServiceError::InvalidSource` if `source_reference` is not an http(s) URL.
    pub fn submit(&self, source_reference: &str) -> Result<Arc<JobHandle>, ServiceError> {
        let handle = self.create_job(source_reference)?;
        let executor = self.executor.clone();
        let run_handle = Arc::clone(&handle);
        tokio::spawn(async move {
            executor.run(run_handle, PipelineState::new()).await;
        });
        Ok(handle)
    }

    /// Creates a job and runs it on the current task.
    pub async fn run_to_completion(
        &self,
        source_reference: &str,
    ) -> Result<(Arc<JobHandle>, PipelineOutcome), ServiceError> {
        let handle = self.create_job(source_reference)?;
        let outcome = self.run_job(Arc::clone(&handle)).await;
        Ok((handle, outcome))
    }

    /// Runs the pipeline for a job created by [`ForgeService::create_job`].
    pub async fn run_job(&self, handle: Arc<JobHandle>) -> PipelineOutcome {
        self.executor.run(handle, PipelineState::new()).await
    }

    /// Starts the background task that evicts expired terminal jobs.
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        self.registry.spawn_sweeper(self.config.eviction_interval)
    }

    /// Validates the source and registers a pending job for it.
    ///
    /// # Errors
    ///
    /// `ServiceError::InvalidSource` if `source_reference` is not an http(s) URL.
    pub fn create_job(&self, source_reference: &str) -> Result<Arc<JobHandle>, ServiceError> {
        let url = validate_source(source_reference)?;
        let handle = self
            .registry
            .create(url.as_str(), &self.executor.stage_names());
        metrics::record_job_submitted();
        tracing::info!(job_id = %handle.job_id(), source = %url, "Job submitted");
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::testing::{MemorySink, StaticFetcher};
    use crate::jobs::{JobStatus, StageStatus};
    use crate::pipeline::{StageKind, StageVariant};

    const HOME: &str = "<html><head><title>Acme Rockets | Launch services</title>\
        <meta name=\"description\" content=\"Affordable launch services for small satellites.\">\
        </head><body><h1>Rockets for everyone</h1></body></html>";

    fn offline_deps() -> StageDeps {
        StageDeps {
            llm: None,
            fetcher: Arc::new(StaticFetcher::new().page("https://acme.test/", HOME)),
            warehouse: Arc::new(MemorySink::new()),
            settings: StageSettings::default(),
        }
    }

    #[test]
    fn test_validate_source() {
        assert!(validate_source("https://acme.test").is_ok());
        assert!(validate_source("  http://acme.test/path ").is_ok());
        assert!(validate_source("").is_err());
        assert!(validate_source("ftp://acme.test").is_err());
        assert!(validate_source("acme.test").is_err());
    }

    #[tokio::test]
    async fn test_llm_variants_without_provider_are_rejected() {
        let result = ForgeService::new(ForgeConfig::default(), offline_deps());
        assert!(matches!(
            result,
            Err(ServiceError::Config(ConfigError::MissingEnvVar(_)))
        ));
    }

    #[tokio::test]
    async fn test_offline_run_completes_every_stage() {
        let service =
            ForgeService::new(ForgeConfig::default().with_offline(true), offline_deps()).unwrap();
        assert_eq!(
            service.variants().variant(StageKind::Research),
            StageVariant::Offline
        );

        let (handle, outcome) = service.run_to_completion("https://acme.test").await.unwrap();
        assert!(outcome.is_success(), "failed at {:?}", outcome.failed_stage);

        let job = handle.snapshot();
        assert_eq!(job.source_reference, "https://acme.test/");
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.stages.len(), 7);
        assert!(job.stages.iter().all(|s| s.status == StageStatus::Completed));
        assert!(job.display_name.is_some());
        assert!(job.metadata.contains_key("warehouse_database"));
        assert!(service.registry().get(handle.job_id()).is_some());
    }

    #[tokio::test]
    async fn test_submit_rejects_bad_source_without_creating_job() {
        let service =
            ForgeService::new(ForgeConfig::default().with_offline(true), offline_deps()).unwrap();
        assert!(matches!(
            service.submit("mailto:ops@acme.test"),
            Err(ServiceError::InvalidSource { .. })
        ));
        assert!(service.registry().is_empty());
    }

    #[tokio::test]
    async fn test_submit_runs_in_background() {
        let service =
            ForgeService::new(ForgeConfig::default().with_offline(true), offline_deps()).unwrap();
        let handle = service.submit("https://acme.test/").unwrap();
        let mut sub = handle.subscribe().await.unwrap();
        let mut last = None;
        while let Some(snapshot) = sub.recv().await {
            last = Some(snapshot);
        }
        assert_eq!(last.unwrap().status, JobStatus::Completed);
    }
}
