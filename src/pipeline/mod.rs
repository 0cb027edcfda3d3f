//! Pipeline orchestration for demo provisioning jobs.
//!
//! # Architecture
//!
//! - **state**: the mergeable key-value payload threaded through stages
//! - **stage**: the uniform `Stage` contract, its side channel and shared deps
//! - **variants**: per-stage implementation selection, resolved once at startup
//! - **orchestrator**: runs one job's stages in order and owns its state machine
//! - **fanout**, **retry**: intra-stage concurrency and transient-error retry
//! - **replay**: runs one stage in isolation against an exported snapshot
//! - **config**: service configuration from defaults, env and CLI
//!
//! # Example
//!
//! ```rust,ignore
//! use demo_forge::pipeline::{ForgeConfig, PipelineExecutor, PipelineState, StageVariantRegistry};
//!
//! let config = ForgeConfig::from_env()?.with_offline(true);
//! let stages = StageVariantRegistry::from_config(&config)?.build(&deps)?;
//! let executor = PipelineExecutor::new(stages).with_stage_timeout(config.stage_timeout);
//!
//! let handle = registry.create("https://acme.example", &executor.stage_names());
//! let outcome = executor.run(handle, PipelineState::new()).await;
//! println!("{}", outcome.status);
//! ```

pub mod config;
pub mod fanout;
pub mod orchestrator;
pub mod replay;
pub mod retry;
pub mod stage;
pub mod state;
pub mod variants;

pub use config::{ConfigError, ForgeConfig};
pub use fanout::{fan_out, FanOutPolicy, FanOutReport};
pub use orchestrator::{PipelineExecutor, PipelineOutcome, DEFAULT_STAGE_TIMEOUT};
pub use replay::{replay_from_file, replay_stage, ReplayError, ReplayResult};
pub use retry::{with_backoff, RetryPolicy};
pub use stage::{Stage, StageContext, StageDeps, StageOutput, StageSettings};
pub use state::{merge, PipelineState};
pub use variants::{StageKind, StageVariant, StageVariantRegistry};
