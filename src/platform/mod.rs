//! Registration and triggering of deployments on Prefect.
//!
//! Two backends implement [`OrchestrationPlatform`]: [`PrefectCli`] shells
//! out to `prefect`, [`PrefectApi`] talks to the REST API. Registration is
//! an upsert keyed by flow and deployment name, so registering the same
//! artifact twice updates one record.

pub mod prefect_api;
pub mod prefect_cli;

pub use prefect_api::PrefectApi;
pub use prefect_cli::PrefectCli;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::artifact::{slug_for, Artifact, Entrypoint};
use crate::error::PlatformError;
use crate::pipeline::{PlatformConfig, PlatformMode};
use crate::schedule::CronSchedule;

/// Identifier of a registered deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeploymentId(pub String);

impl fmt::Display for DeploymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a requested flow run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlowRunId(pub String);

impl fmt::Display for FlowRunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The `<flow>/<deployment>` pair Prefect uses to address a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRef {
    pub flow_name: String,
    pub deployment_name: String,
}

impl fmt::Display for DeploymentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.flow_name, self.deployment_name)
    }
}

/// Everything needed to create or update one deployment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeploymentRequest {
    pub name: String,
    /// Flow the deployment belongs to.
    pub flow_name: String,
    pub entrypoint: Entrypoint,
    pub description: String,
    pub schedule: Option<CronSchedule>,
    pub parameters: BTreeMap<String, serde_json::Value>,
    pub work_pool: String,
    pub work_queue: Option<String>,
}

impl DeploymentRequest {
    /// Request for `artifact` under Prefect's default flow name: the
    /// function name with underscores turned into dashes.
    pub fn for_artifact(
        artifact: &Artifact,
        entrypoint: Entrypoint,
        work_pool: impl Into<String>,
    ) -> Self {
        Self {
            name: artifact.name.clone(),
            flow_name: slug_for(&entrypoint.function),
            entrypoint,
            description: artifact.description.clone(),
            schedule: artifact.schedule.clone(),
            parameters: artifact.parameters.clone(),
            work_pool: work_pool.into(),
            work_queue: None,
        }
    }

    pub fn with_work_queue(mut self, queue: Option<String>) -> Self {
        self.work_queue = queue;
        self
    }

    /// Uses the name given in the flow decorator instead of the default.
    pub fn with_flow_name(mut self, flow_name: impl Into<String>) -> Self {
        self.flow_name = flow_name.into();
        self
    }

    pub fn deployment_ref(&self) -> DeploymentRef {
        DeploymentRef {
            flow_name: self.flow_name.clone(),
            deployment_name: self.name.clone(),
        }
    }
}

/// An orchestration platform that can host deployments.
#[async_trait]
pub trait OrchestrationPlatform: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Creates or updates the deployment described by `request`.
    async fn register(&self, request: &DeploymentRequest) -> Result<DeploymentId, PlatformError>;

    /// Requests one immediate run of a registered deployment.
    async fn trigger(&self, deployment: &DeploymentRef) -> Result<FlowRunId, PlatformError>;
}

/// Builds the backend selected by `config`.
pub fn platform_from_config(
    config: &PlatformConfig,
) -> Result<Arc<dyn OrchestrationPlatform>, PlatformError> {
    match config.mode {
        PlatformMode::Cli => Ok(Arc::new(PrefectCli::new(config.prefect_bin.clone()))),
        PlatformMode::Api => {
            let url = config.api_url.clone().ok_or_else(|| {
                PlatformError::Unreachable("PREFECT_API_URL is not configured".to_string())
            })?;
            Ok(Arc::new(PrefectApi::new(url, config.api_key.clone())?))
        }
    }
}

fn uuid_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}")
            .expect("valid regex")
    })
}

/// Parses a UUID string, normalizing it to lowercase hyphenated form.
pub(crate) fn parse_uuid(value: &str) -> Option<String> {
    let candidate = uuid_re().find(value)?;
    uuid::Uuid::parse_str(candidate.as_str())
        .ok()
        .map(|id| id.hyphenated().to_string())
}
