//! States of a deploy pipeline run.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::error::DeployError;
use crate::vcs::VcsOutcome;

/// A non-terminal step of the pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Generating,
    Validating,
    Writing,
    Registering,
    Triggering,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Generating,
        Stage::Validating,
        Stage::Writing,
        Stage::Registering,
        Stage::Triggering,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Generating => "generating",
            Stage::Validating => "validating",
            Stage::Writing => "writing",
            Stage::Registering => "registering",
            Stage::Triggering => "triggering",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable state of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PipelineState {
    Running { stage: Stage },
    Done,
    Failed { stage: Stage, cause: String },
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PipelineState::Running { .. })
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Running { stage } => write!(f, "{}", stage),
            PipelineState::Done => f.write_str("done"),
            PipelineState::Failed { stage, cause } => write!(f, "failed at {}: {}", stage, cause),
        }
    }
}

/// Terminal failure of a run: the stage that failed and why.
#[derive(Debug, thiserror::Error)]
#[error("{stage} failed: {error}")]
pub struct PipelineFailure {
    pub stage: Stage,
    #[source]
    pub error: DeployError,
    /// Flow file left on disk for manual recovery.
    pub file: Option<PathBuf>,
    /// Git outcome, when notification ran before the failure.
    pub vcs: Option<VcsOutcome>,
}

impl PipelineFailure {
    pub fn new(stage: Stage, error: DeployError) -> Self {
        Self {
            stage,
            error,
            file: None,
            vcs: None,
        }
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    pub fn with_vcs(mut self, outcome: VcsOutcome) -> Self {
        self.vcs = Some(outcome);
        self
    }

    pub fn kind(&self) -> &'static str {
        self.error.kind()
    }

    pub fn state(&self) -> PipelineState {
        PipelineState::Failed {
            stage: self.stage,
            cause: self.error.to_string(),
        }
    }
}
