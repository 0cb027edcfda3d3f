//! Service configuration.
//!
//! Values come from defaults, then `DEMOFORGE_*` environment variables, then
//! builder overrides applied by the CLI. `validate()` runs before anything is
//! constructed from the config.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use super::variants::{StageKind, StageVariant};

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    /// IO error while reading configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration for the provisioning service.
#[derive(Debug, Clone)]
pub struct ForgeConfig {
    // LLM settings
    /// Model used by `standard` variants.
    pub default_model: String,
    /// Model used by `reasoning` variants.
    pub reasoning_model: String,
    /// Sampling temperature for generation calls.
    pub temperature: f64,
    /// Upper bound on tokens per generation.
    pub max_tokens: u32,
    /// OpenRouter API key. Only required when an LLM-backed variant is selected.
    pub api_key: Option<String>,
    /// Base URL of the OpenAI-compatible chat completions API.
    pub api_base: String,

    // Timeouts
    /// Safety timeout around one stage invocation.
    pub stage_timeout: Duration,
    /// Timeout for one content fetch.
    pub fetch_timeout: Duration,
    /// Timeout for one LLM call.
    pub llm_timeout: Duration,
    /// Timeout for one warehouse sink operation.
    pub sink_timeout: Duration,

    // Retry and fan-out
    /// Attempts per transient external call (including the first).
    pub max_retries: u32,
    /// Base delay before the first retry; doubled per attempt.
    pub retry_base_delay: Duration,
    /// Maximum parallel sub-tasks inside a stage.
    pub fanout_concurrency: usize,

    // Jobs
    /// Snapshots buffered per progress subscriber.
    pub subscriber_queue_capacity: usize,
    /// How long terminal jobs stay in the registry.
    pub job_ttl: Duration,
    /// How often the eviction sweeper runs.
    pub eviction_interval: Duration,

    // Storage
    /// Directory for per-stage state snapshots. Disabled when `None`.
    pub snapshot_dir: Option<PathBuf>,
    /// Root of the local warehouse.
    pub warehouse_dir: PathBuf,

    // Variants
    /// Per-stage variant overrides.
    pub variants: BTreeMap<StageKind, StageVariant>,
    /// Forces every LLM-backed stage to its offline variant.
    pub offline: bool,

    // Server
    /// Address the HTTP server binds to.
    pub bind_addr: String,
}

impl Default for ForgeConfig {
    fn default() -> Self {
        Self {
            default_model: "openai/gpt-4o-mini".to_string(),
            reasoning_model: "anthropic/claude-sonnet-4".to_string(),
            temperature: 0.4,
            max_tokens: 2000,
            api_key: None,
            api_base: "https://openrouter.ai/api/v1".to_string(),

            stage_timeout: Duration::from_secs(600),
            fetch_timeout: Duration::from_secs(15),
            llm_timeout: Duration::from_secs(90),
            sink_timeout: Duration::from_secs(30),

            max_retries: 3,
            retry_base_delay: Duration::from_millis(500),
            fanout_concurrency: 4,

            subscriber_queue_capacity: 16,
            job_ttl: Duration::from_secs(3600),
            eviction_interval: Duration::from_secs(60),

            snapshot_dir: None,
            warehouse_dir: PathBuf::from("./warehouse"),

            variants: BTreeMap::new(),
            offline: false,

            bind_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

impl ForgeConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `OPENROUTER_API_KEY`: API key for LLM-backed variants
    /// - `DEMOFORGE_API_BASE`: Chat completions base URL
    /// - `DEMOFORGE_DEFAULT_MODEL` / `DEMOFORGE_REASONING_MODEL`: Model ids
    /// - `DEMOFORGE_TEMPERATURE`, `DEMOFORGE_MAX_TOKENS`: Generation settings
    /// - `DEMOFORGE_STAGE_TIMEOUT_SECS`, `DEMOFORGE_FETCH_TIMEOUT_SECS`,
    ///   `DEMOFORGE_LLM_TIMEOUT_SECS`, `DEMOFORGE_SINK_TIMEOUT_SECS`: Timeouts
    /// - `DEMOFORGE_MAX_RETRIES`, `DEMOFORGE_RETRY_BASE_DELAY_MS`: Retry policy
    /// - `DEMOFORGE_FANOUT_CONCURRENCY`: Parallel sub-tasks per stage
    /// - `DEMOFORGE_QUEUE_CAPACITY`: Snapshots buffered per subscriber
    /// - `DEMOFORGE_JOB_TTL_SECS`, `DEMOFORGE_EVICTION_INTERVAL_SECS`: Retention
    /// - `DEMOFORGE_SNAPSHOT_DIR`: Enables per-stage snapshot export
    /// - `DEMOFORGE_WAREHOUSE_DIR`: Local warehouse root
    /// - `DEMOFORGE_OFFLINE`: Run every LLM-backed stage offline
    /// - `DEMOFORGE_VARIANT_<STAGE>`: Variant for one stage
    /// - `DEMOFORGE_BIND_ADDR`: HTTP bind address
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value or validation fails.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        // LLM settings
        if let Ok(val) = std::env::var("OPENROUTER_API_KEY") {
            if !val.trim().is_empty() {
                config.api_key = Some(val);
            }
        }

        if let Ok(val) = std::env::var("DEMOFORGE_API_BASE") {
            config.api_base = val;
        }

        if let Ok(val) = std::env::var("DEMOFORGE_DEFAULT_MODEL") {
            config.default_model = val;
        }

        if let Ok(val) = std::env::var("DEMOFORGE_REASONING_MODEL") {
            config.reasoning_model = val;
        }

        if let Ok(val) = std::env::var("DEMOFORGE_TEMPERATURE") {
            config.temperature = parse_env_value(&val, "DEMOFORGE_TEMPERATURE")?;
        }

        if let Ok(val) = std::env::var("DEMOFORGE_MAX_TOKENS") {
            config.max_tokens = parse_env_value(&val, "DEMOFORGE_MAX_TOKENS")?;
        }

        // Timeouts
        if let Ok(val) = std::env::var("DEMOFORGE_STAGE_TIMEOUT_SECS") {
            config.stage_timeout = parse_env_secs(&val, "DEMOFORGE_STAGE_TIMEOUT_SECS")?;
        }

        if let Ok(val) = std::env::var("DEMOFORGE_FETCH_TIMEOUT_SECS") {
            config.fetch_timeout = parse_env_secs(&val, "DEMOFORGE_FETCH_TIMEOUT_SECS")?;
        }

        if let Ok(val) = std::env::var("DEMOFORGE_LLM_TIMEOUT_SECS") {
            config.llm_timeout = parse_env_secs(&val, "DEMOFORGE_LLM_TIMEOUT_SECS")?;
        }

        if let Ok(val) = std::env::var("DEMOFORGE_SINK_TIMEOUT_SECS") {
            config.sink_timeout = parse_env_secs(&val, "DEMOFORGE_SINK_TIMEOUT_SECS")?;
        }

        // Retry and fan-out
        if let Ok(val) = std::env::var("DEMOFORGE_MAX_RETRIES") {
            config.max_retries = parse_env_value(&val, "DEMOFORGE_MAX_RETRIES")?;
        }

        if let Ok(val) = std::env::var("DEMOFORGE_RETRY_BASE_DELAY_MS") {
            let millis: u64 = parse_env_value(&val, "DEMOFORGE_RETRY_BASE_DELAY_MS")?;
            config.retry_base_delay = Duration::from_millis(millis);
        }

        if let Ok(val) = std::env::var("DEMOFORGE_FANOUT_CONCURRENCY") {
            config.fanout_concurrency = parse_env_value(&val, "DEMOFORGE_FANOUT_CONCURRENCY")?;
        }

        // Jobs
        if let Ok(val) = std::env::var("DEMOFORGE_QUEUE_CAPACITY") {
            config.subscriber_queue_capacity = parse_env_value(&val, "DEMOFORGE_QUEUE_CAPACITY")?;
        }

        if let Ok(val) = std::env::var("DEMOFORGE_JOB_TTL_SECS") {
            config.job_ttl = parse_env_secs(&val, "DEMOFORGE_JOB_TTL_SECS")?;
        }

        if let Ok(val) = std::env::var("DEMOFORGE_EVICTION_INTERVAL_SECS") {
            config.eviction_interval = parse_env_secs(&val, "DEMOFORGE_EVICTION_INTERVAL_SECS")?;
        }

        // Storage
        if let Ok(val) = std::env::var("DEMOFORGE_SNAPSHOT_DIR") {
            if !val.trim().is_empty() {
                config.snapshot_dir = Some(PathBuf::from(val));
            }
        }

        if let Ok(val) = std::env::var("DEMOFORGE_WAREHOUSE_DIR") {
            config.warehouse_dir = PathBuf::from(val);
        }

        // Variants
        if let Ok(val) = std::env::var("DEMOFORGE_OFFLINE") {
            config.offline = parse_env_bool(&val, "DEMOFORGE_OFFLINE")?;
        }

        for kind in StageKind::ALL {
            let key = kind.env_key();
            if let Ok(val) = std::env::var(&key) {
                let variant = val.parse::<StageVariant>().map_err(|_| ConfigError::InvalidValue {
                    key: key.clone(),
                    message: format!("unknown variant '{}'", val),
                })?;
                config.variants.insert(kind, variant);
            }
        }

        // Server
        if let Ok(val) = std::env::var("DEMOFORGE_BIND_ADDR") {
            config.bind_addr = val;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        // LLM validation
        if self.default_model.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "default_model cannot be empty".to_string(),
            ));
        }

        if self.reasoning_model.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "reasoning_model cannot be empty".to_string(),
            ));
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::ValidationFailed(
                "temperature must be between 0.0 and 2.0".to_string(),
            ));
        }

        if self.max_tokens == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_tokens must be greater than 0".to_string(),
            ));
        }

        // Timeout validation
        for (name, value) in [
            ("stage_timeout", self.stage_timeout),
            ("fetch_timeout", self.fetch_timeout),
            ("llm_timeout", self.llm_timeout),
            ("sink_timeout", self.sink_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::ValidationFailed(format!(
                    "{} must be greater than 0",
                    name
                )));
            }
        }

        // Retry and fan-out validation
        if self.max_retries == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_retries must be at least 1".to_string(),
            ));
        }

        if self.fanout_concurrency == 0 {
            return Err(ConfigError::ValidationFailed(
                "fanout_concurrency must be greater than 0".to_string(),
            ));
        }

        // Job validation
        if self.subscriber_queue_capacity == 0 {
            return Err(ConfigError::ValidationFailed(
                "subscriber_queue_capacity must be greater than 0".to_string(),
            ));
        }

        if self.eviction_interval.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "eviction_interval must be greater than 0".to_string(),
            ));
        }

        // Variant validation
        for (kind, variant) in &self.variants {
            if !kind.supported_variants().contains(variant) {
                return Err(ConfigError::ValidationFailed(format!(
                    "stage '{}' does not support variant '{}'",
                    kind, variant
                )));
            }
        }

        if self.bind_addr.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "bind_addr cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Builder method to set the default model.
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    /// Builder method to set the reasoning model.
    pub fn with_reasoning_model(mut self, model: impl Into<String>) -> Self {
        self.reasoning_model = model.into();
        self
    }

    /// Builder method to set the API key.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Builder method to set the per-stage timeout.
    pub fn with_stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = timeout;
        self
    }

    /// Builder method to set the fetch timeout.
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Builder method to set the LLM timeout.
    pub fn with_llm_timeout(mut self, timeout: Duration) -> Self {
        self.llm_timeout = timeout;
        self
    }

    /// Builder method to set the retry policy.
    pub fn with_retries(mut self, max_retries: u32, base_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_base_delay = base_delay;
        self
    }

    /// Builder method to set fan-out concurrency.
    pub fn with_fanout_concurrency(mut self, concurrency: usize) -> Self {
        self.fanout_concurrency = concurrency;
        self
    }

    /// Builder method to set the subscriber queue capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.subscriber_queue_capacity = capacity;
        self
    }

    /// Builder method to set job retention.
    pub fn with_job_ttl(mut self, ttl: Duration) -> Self {
        self.job_ttl = ttl;
        self
    }

    /// Builder method to enable snapshot export.
    pub fn with_snapshot_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.snapshot_dir = Some(dir.into());
        self
    }

    /// Builder method to set the warehouse root.
    pub fn with_warehouse_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.warehouse_dir = dir.into();
        self
    }

    /// Builder method to select a variant for one stage.
    pub fn with_variant(mut self, kind: StageKind, variant: StageVariant) -> Self {
        self.variants.insert(kind, variant);
        self
    }

    /// Builder method to force offline variants.
    pub fn with_offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    /// Builder method to set the bind address.
    pub fn with_bind_addr(mut self, addr: impl Into<String>) -> Self {
        self.bind_addr = addr.into();
        self
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

/// Parse an environment variable holding whole seconds.
fn parse_env_secs(value: &str, key: &str) -> Result<Duration, ConfigError> {
    parse_env_value::<u64>(value, key).map(Duration::from_secs)
}

/// Parse an environment variable as a boolean.
fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean value, got '{}'", value),
        }),
    }
}
