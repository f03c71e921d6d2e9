//! flowforge: from a goal or a script to a running Prefect deployment.
//!
//! A natural-language goal, or an existing script, goes to an LLM that
//! answers with a schema-constrained [`Artifact`]. The artifact is checked
//! statically, decorated as a flow, written to `flows/<name>.py`, registered
//! with Prefect and triggered once. Git is notified on a best-effort basis.

pub mod artifact;
pub mod cli;
pub mod error;
pub mod generator;
pub mod llm;
pub mod normalize;
pub mod pipeline;
pub mod platform;
pub mod python;
pub mod schedule;
pub mod utils;
pub mod vcs;
pub mod writer;

pub use artifact::{Artifact, Entrypoint};
pub use error::{DeployError, DeployResult, LlmError, PlatformError, SourceError, VcsError};
pub use generator::{GenerationInput, StructuredGenerator};
pub use pipeline::{DeployPipeline, PipelineConfig, PipelineFailure, PipelineReport, Stage};
