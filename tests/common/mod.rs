//! Collaborators shared by the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use demo_forge::collectors::{ContentFetcher, FetchError, FetchedPage};
use demo_forge::error::LlmError;
use demo_forge::llm::{Choice, GenerationRequest, GenerationResponse, LlmProvider, Message, Usage};
use demo_forge::pipeline::{ForgeConfig, StageDeps, StageSettings};
use demo_forge::warehouse::LocalWarehouse;
use demo_forge::ForgeService;
use tempfile::TempDir;

pub const HOME: &str = r#"<html><head><title>Acme Rockets | Launch services</title>
    <meta name="description" content="Acme builds reusable rockets for small satellites.">
    </head><body><h1>Reusable boosters</h1><p>Rockets launch weekly from three sites.</p></body></html>"#;

/// Serves `HOME` for every site root; every other path is a 404.
pub struct SiteFetcher;

#[async_trait]
impl ContentFetcher for SiteFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        if url.ends_with('/') {
            Ok(FetchedPage {
                url: url.to_string(),
                status: 200,
                body: HOME.to_string(),
            })
        } else {
            Err(FetchError::Status {
                url: url.to_string(),
                status: 404,
            })
        }
    }
}

/// Answers every request with the same content.
pub struct FixedLlm(pub String);

#[async_trait]
impl LlmProvider for FixedLlm {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
        Ok(GenerationResponse {
            id: "fixed".to_string(),
            model: request.model,
            choices: vec![Choice {
                index: 0,
                message: Message::assistant(self.0.clone()),
                finish_reason: "stop".to_string(),
            }],
            usage: Usage::default(),
        })
    }
}

/// Collaborators backed by a temporary local warehouse.
pub fn deps(warehouse_dir: &TempDir, llm: Option<Arc<dyn LlmProvider>>) -> StageDeps {
    StageDeps {
        llm,
        fetcher: Arc::new(SiteFetcher),
        warehouse: Arc::new(LocalWarehouse::new(warehouse_dir.path()).unwrap()),
        settings: StageSettings::default(),
    }
}

/// A service that runs every stage offline.
pub fn offline_service(warehouse_dir: &TempDir) -> Arc<ForgeService> {
    let config = ForgeConfig::default()
        .with_offline(true)
        .with_warehouse_dir(warehouse_dir.path());
    Arc::new(ForgeService::new(config, deps(warehouse_dir, None)).unwrap())
}
