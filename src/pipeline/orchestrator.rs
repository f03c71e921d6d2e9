//! The deploy pipeline: generation to a running deployment.
//!
//! Stages run strictly in order and each fails closed:
//! - Generating: one schema-constrained backend call
//! - Validating: identifier reconciliation, static parse, decoration
//! - Writing: atomic write of `<flows_dir>/<name>.py`
//! - Registering: create or update the deployment
//! - Triggering: request one immediate run (failure is reported, not fatal)
//!
//! Git notification starts once the file is written and runs alongside
//! registration. Its outcome is reported and never fails a run.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::artifact::{Artifact, Entrypoint};
use crate::error::DeployError;
use crate::generator::{GenerationInput, StructuredGenerator};
use crate::normalize::{normalize, NormalizedArtifact};
use crate::platform::{
    platform_from_config, DeploymentId, DeploymentRef, DeploymentRequest, FlowRunId,
    OrchestrationPlatform,
};
use crate::writer::WrittenArtifact;
use crate::vcs::{notify, GitCli, VcsOutcome, VersionControl};
use crate::writer::ArtifactWriter;

use super::config::{ConfigError, PipelineConfig};
use super::state::{PipelineFailure, PipelineState, Stage};

/// Errors that can occur while assembling a pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A collaborator could not be constructed.
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),
}

/// Result of the immediate run request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TriggerOutcome {
    Triggered { run_id: FlowRunId },
    /// The deployment exists; only the run request failed.
    Failed { message: String },
    Skipped,
}

/// Everything a successful run produced.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub artifact: Artifact,
    pub path: PathBuf,
    pub entrypoint: Entrypoint,
    pub checksum: String,
    /// False when the file on disk already had these contents.
    pub file_changed: bool,
    pub deployment_id: DeploymentId,
    pub deployment: DeploymentRef,
    pub trigger: TriggerOutcome,
    pub vcs: VcsOutcome,
    pub stages: Vec<Stage>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl PipelineReport {
    pub fn state(&self) -> PipelineState {
        PipelineState::Done
    }
}

/// Tracks visited stages and forwards transitions to the observer.
struct Progress<'a, F> {
    observer: &'a mut F,
    stages: Vec<Stage>,
}

impl<'a, F> Progress<'a, F>
where
    F: FnMut(&PipelineState),
{
    fn enter(&mut self, stage: Stage) {
        info!(stage = %stage, "Entering stage");
        self.stages.push(stage);
        (self.observer)(&PipelineState::Running { stage });
    }

    fn fail(&mut self, stage: Stage, error: DeployError) -> PipelineFailure {
        let failure = PipelineFailure::new(stage, error);
        error!(stage = %stage, kind = failure.kind(), error = %failure.error, "Pipeline failed");
        (self.observer)(&failure.state());
        failure
    }
}

/// Runs inputs through generation, validation, persistence and deployment.
pub struct DeployPipeline {
    generator: StructuredGenerator,
    platform: Arc<dyn OrchestrationPlatform>,
    vcs: Option<Arc<dyn VersionControl>>,
    writer: ArtifactWriter,
    work_pool: String,
    work_queue: Option<String>,
    trigger_run: bool,
}

impl std::fmt::Debug for DeployPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeployPipeline")
            .field("generator", &self.generator)
            .field("platform", &self.platform.name())
            .field("writer", &self.writer)
            .field("work_pool", &self.work_pool)
            .field("trigger_run", &self.trigger_run)
            .finish_non_exhaustive()
    }
}

impl DeployPipeline {
    /// Creates a pipeline with git notification disabled.
    pub fn new(
        generator: StructuredGenerator,
        platform: Arc<dyn OrchestrationPlatform>,
        writer: ArtifactWriter,
        work_pool: impl Into<String>,
    ) -> Self {
        Self {
            generator,
            platform,
            vcs: None,
            writer,
            work_pool: work_pool.into(),
            work_queue: None,
            trigger_run: true,
        }
    }

    /// Builds a pipeline with the collaborators `config` selects.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;

        let generator = StructuredGenerator::from_config(config.generator.clone())
            .map_err(|e| PipelineError::InitializationFailed(e.to_string()))?;
        let platform = platform_from_config(&config.platform)
            .map_err(|e| PipelineError::InitializationFailed(e.to_string()))?;

        let mut pipeline = Self::new(
            generator,
            platform,
            ArtifactWriter::new(&config.flows_dir),
            &config.work_pool,
        )
        .with_work_queue(config.work_queue.clone())
        .with_trigger_run(config.trigger_run);

        if config.vcs.enabled {
            pipeline = pipeline.with_vcs(Arc::new(GitCli::from_config(&config.vcs)));
        }

        Ok(pipeline)
    }

    pub fn with_vcs(mut self, vcs: Arc<dyn VersionControl>) -> Self {
        self.vcs = Some(vcs);
        self
    }

    pub fn with_work_queue(mut self, queue: Option<String>) -> Self {
        self.work_queue = queue;
        self
    }

    /// Whether to request a run after registration.
    pub fn with_trigger_run(mut self, enabled: bool) -> Self {
        self.trigger_run = enabled;
        self
    }

    /// Runs the whole pipeline for `input`.
    pub async fn run(&self, input: &GenerationInput) -> Result<PipelineReport, PipelineFailure> {
        self.run_with_observer(input, |_| {}).await
    }

    /// Generates and validates without touching disk or the platform.
    pub async fn prepare(
        &self,
        input: &GenerationInput,
    ) -> Result<NormalizedArtifact, PipelineFailure> {
        let mut observer = |_: &PipelineState| {};
        let mut progress = Progress {
            observer: &mut observer,
            stages: Vec::new(),
        };
        self.generate_and_validate(input, &mut progress).await
    }

    async fn generate_and_validate<F>(
        &self,
        input: &GenerationInput,
        progress: &mut Progress<'_, F>,
    ) -> Result<NormalizedArtifact, PipelineFailure>
    where
        F: FnMut(&PipelineState),
    {
        progress.enter(Stage::Generating);
        let artifact = match self.generator.generate(input).await {
            Ok(artifact) => artifact,
            Err(e) => return Err(progress.fail(Stage::Generating, e)),
        };
        info!(
            name = %artifact.name,
            scheduled = artifact.schedule.is_some(),
            "Generated artifact"
        );

        progress.enter(Stage::Validating);
        normalize(artifact).map_err(|e| progress.fail(Stage::Validating, e))
    }

    /// Registers the written file and, if enabled, requests one run.
    ///
    /// Only registration can fail; a failed run request becomes
    /// [`TriggerOutcome::Failed`].
    async fn register_and_trigger<F>(
        &self,
        normalized: &NormalizedArtifact,
        written: &WrittenArtifact,
        progress: &mut Progress<'_, F>,
    ) -> Result<(DeploymentId, DeploymentRef, TriggerOutcome), DeployError>
    where
        F: FnMut(&PipelineState),
    {
        progress.enter(Stage::Registering);
        let request = DeploymentRequest::for_artifact(
            &normalized.artifact,
            written.entrypoint.clone(),
            &self.work_pool,
        )
        .with_flow_name(normalized.flow_name.clone())
        .with_work_queue(self.work_queue.clone());
        let deployment = request.deployment_ref();

        let deployment_id = self
            .platform
            .register(&request)
            .await
            .map_err(DeployError::Registration)?;

        if !self.trigger_run {
            return Ok((deployment_id, deployment, TriggerOutcome::Skipped));
        }

        progress.enter(Stage::Triggering);
        let trigger = match self.platform.trigger(&deployment).await {
            Ok(run_id) => TriggerOutcome::Triggered { run_id },
            Err(e) => {
                let err = DeployError::Trigger(e);
                warn!(
                    name = %normalized.artifact.name,
                    kind = err.kind(),
                    error = %err,
                    "Deployment created but run request failed"
                );
                TriggerOutcome::Failed {
                    message: err.to_string(),
                }
            }
        };
        Ok((deployment_id, deployment, trigger))
    }

    async fn notify_vcs(&self, path: &Path, name: &str) -> VcsOutcome {
        match self.vcs {
            Some(ref vcs) => notify(vcs.as_ref(), path, name).await,
            None => VcsOutcome::Skipped,
        }
    }

    /// Runs the whole pipeline, reporting every state transition.
    pub async fn run_with_observer<F>(
        &self,
        input: &GenerationInput,
        mut observer: F,
    ) -> Result<PipelineReport, PipelineFailure>
    where
        F: FnMut(&PipelineState) + Send,
    {
        let started_at = Utc::now();
        let mut progress = Progress {
            observer: &mut observer,
            stages: Vec::new(),
        };

        let normalized = self.generate_and_validate(input, &mut progress).await?;
        let name = normalized.artifact.name.clone();

        progress.enter(Stage::Writing);
        let written = match self.writer.write(&normalized).await {
            Ok(written) => written,
            Err(e) => return Err(progress.fail(Stage::Writing, e)),
        };

        let (deployed, vcs) = tokio::join!(
            self.register_and_trigger(&normalized, &written, &mut progress),
            self.notify_vcs(&written.path, &name),
        );

        let (deployment_id, deployment, trigger) = match deployed {
            Ok(deployed) => deployed,
            Err(e) => {
                return Err(progress
                    .fail(Stage::Registering, e)
                    .with_file(written.path)
                    .with_vcs(vcs))
            }
        };

        (progress.observer)(&PipelineState::Done);
        info!(name = %name, deployment = %deployment, id = %deployment_id, "Deployment ready");

        Ok(PipelineReport {
            artifact: normalized.artifact,
            path: written.path,
            entrypoint: written.entrypoint,
            checksum: written.checksum,
            file_changed: written.changed,
            deployment_id,
            deployment,
            trigger,
            vcs,
            stages: progress.stages,
            started_at,
            finished_at: Utc::now(),
        })
    }
}
