//! LLM access for the content-generating stages.
//!
//! [`LlmProvider`] is the seam to the outside world; [`OpenRouterProvider`]
//! is the production implementation. Stages talk to a provider through an
//! [`LlmBackend`], which binds the model chosen by the stage variant and owns
//! the per-call timeout and transient-error retry.

pub mod json;
pub mod openrouter;

pub use json::{extract_json, parse_json};
pub use openrouter::OpenRouterProvider;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::metrics;
use crate::pipeline::retry::{with_backoff, RetryPolicy};

/// A message in a conversation with an LLM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender ("system", "user", "assistant").
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Request for text generation from an LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub model: String,
    pub messages: Vec<Message>,
    /// Sampling temperature (0.0 - 2.0).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl GenerationRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Response from an LLM generation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub id: String,
    pub model: String,
    pub choices: Vec<Choice>,
    pub usage: Usage,
}

impl GenerationResponse {
    /// Content of the first choice, if any.
    pub fn first_content(&self) -> Option<&str> {
        self.choices.first().map(|c| c.message.content.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    pub index: u32,
    pub message: Message,
    /// Reason the generation stopped ("stop", "length").
    pub finish_reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Trait for LLM providers that can generate text.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Performs one generation request. Implementations do not retry.
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError>;
}

/// A provider bound to one model, with timeout and retry.
#[derive(Clone)]
pub struct LlmBackend {
    provider: Arc<dyn LlmProvider>,
    model: String,
    timeout: Duration,
    retry: RetryPolicy,
    temperature: Option<f64>,
    max_tokens: Option<u32>,
}

impl LlmBackend {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            provider,
            model: model.into(),
            timeout,
            retry: RetryPolicy::none(),
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_sampling(mut self, temperature: f64, max_tokens: u32) -> Self {
        self.temperature = Some(temperature);
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Sends a system + user prompt and returns the reply text.
    ///
    /// Each attempt is bounded by the backend timeout; transient failures
    /// are retried per the backend's policy.
    pub async fn complete(&self, system: &str, user: &str) -> Result<String, LlmError> {
        let mut request = GenerationRequest::new(
            self.model.clone(),
            vec![Message::system(system), Message::user(user)],
        );
        request.temperature = self.temperature;
        request.max_tokens = self.max_tokens;

        let label = format!("llm:{}", self.model);
        let started = Instant::now();
        let result = with_backoff(&self.retry, &label, LlmError::is_transient, || {
            let request = request.clone();
            async move {
                tokio::time::timeout(self.timeout, self.provider.generate(request))
                    .await
                    .map_err(|_| LlmError::Timeout(self.timeout))?
            }
        })
        .await;
        metrics::record_llm_request(
            &self.model,
            result.is_ok(),
            started.elapsed().as_secs_f64(),
        );
        let response = result?;

        let content = response.first_content().unwrap_or_default().trim();
        if content.is_empty() {
            return Err(LlmError::EmptyResponse(self.model.clone()));
        }
        Ok(content.to_string())
    }

    /// Like [`LlmBackend::complete`], then parses the reply as JSON.
    pub async fn complete_json<T: DeserializeOwned>(
        &self,
        system: &str,
        user: &str,
    ) -> Result<T, LlmError> {
        let content = self.complete(system, user).await?;
        parse_json(&content)
    }
}
