//! The generation-to-deployment pipeline.
//!
//! # Architecture
//!
//! - **Config**: explicit configuration for every collaborator
//! - **State**: the stage machine and its terminal failure
//! - **Orchestrator**: [`DeployPipeline`], which drives one input through
//!   every stage
//!
//! # Example
//!
//! ```rust,ignore
//! use flowforge::generator::GenerationInput;
//! use flowforge::pipeline::{DeployPipeline, PipelineConfig};
//!
//! let config = PipelineConfig::from_env()?.with_work_pool("local-process");
//! let pipeline = DeployPipeline::from_config(&config)?;
//!
//! let report = pipeline
//!     .run(&GenerationInput::goal("I want to see the price of ETH in USD every 5 minutes"))
//!     .await?;
//! println!("{} -> {}", report.entrypoint, report.deployment_id);
//! ```
//!
//! A run for one name is independent of runs for other names. Two runs for
//! the same name race: the last write and the last registration win.

pub mod config;
pub mod orchestrator;
pub mod state;

pub use config::{
    ConfigError, GeneratorConfig, PipelineConfig, PlatformConfig, PlatformMode, VcsConfig,
    DEFAULT_BACKEND_ENDPOINT, DEFAULT_MODEL, DEFAULT_WORK_POOL,
};
pub use orchestrator::{DeployPipeline, PipelineError, PipelineReport, TriggerOutcome};
pub use state::{PipelineFailure, PipelineState, Stage};
