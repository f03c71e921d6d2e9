//! Prefect backend driving the `prefect` command line.

use std::process::Stdio;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;
use tracing::{debug, info};

use super::{parse_uuid, DeploymentId, DeploymentRef, DeploymentRequest, FlowRunId, OrchestrationPlatform};
use crate::error::PlatformError;

fn deployment_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"with id '([^']+)'").expect("valid regex"))
}

fn flow_run_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"UUID:\s*(\S+)").expect("valid regex"))
}

/// Registers and triggers deployments through `prefect deploy` and
/// `prefect deployment run`.
#[derive(Debug, Clone)]
pub struct PrefectCli {
    bin: String,
}

impl PrefectCli {
    pub fn new(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }

    /// Arguments for `prefect deploy`.
    pub fn deploy_args(request: &DeploymentRequest) -> Result<Vec<String>, PlatformError> {
        let mut args = vec![
            "--no-prompt".to_string(),
            "deploy".to_string(),
            request.entrypoint.to_string(),
            "-n".to_string(),
            request.name.clone(),
            "-p".to_string(),
            request.work_pool.clone(),
        ];

        if let Some(ref queue) = request.work_queue {
            args.push("-q".to_string());
            args.push(queue.clone());
        }

        if !request.description.is_empty() {
            args.push("-d".to_string());
            args.push(request.description.clone());
        }

        if let Some(ref schedule) = request.schedule {
            args.push("--cron".to_string());
            args.push(schedule.cron.clone());
            if let Some(ref tz) = schedule.timezone {
                args.push("--timezone".to_string());
                args.push(tz.clone());
            }
        }

        if !request.parameters.is_empty() {
            let params = serde_json::to_string(&request.parameters)
                .map_err(|e| PlatformError::UnexpectedResponse(e.to_string()))?;
            args.push("--params".to_string());
            args.push(params);
        }

        Ok(args)
    }

    /// Arguments for `prefect deployment run`.
    pub fn run_args(deployment: &DeploymentRef) -> Vec<String> {
        vec![
            "deployment".to_string(),
            "run".to_string(),
            deployment.to_string(),
        ]
    }

    async fn run(&self, args: &[String]) -> Result<String, PlatformError> {
        let display = format!("{} {}", self.bin, args.first().map_or("", |a| a.as_str()));
        debug!(command = %self.bin, ?args, "Running prefect");

        let mut cmd = Command::new(&self.bin);
        cmd.args(args)
            .env("PREFECT_CLI_COLORS", "False")
            .env("PREFECT_CLI_WRAP_LINES", "False")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let output = cmd.output().await.map_err(|e| PlatformError::Spawn {
            command: self.bin.clone(),
            reason: e.to_string(),
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(PlatformError::NonZeroExit {
                command: display,
                code: output.status.code().unwrap_or(-1),
                stderr: if stderr.is_empty() {
                    stdout.trim().to_string()
                } else {
                    stderr
                },
            });
        }

        Ok(stdout)
    }
}

/// Extracts the deployment id from `prefect deploy` output.
pub fn parse_deployment_id(output: &str) -> Option<DeploymentId> {
    let caps = deployment_id_re().captures(output)?;
    parse_uuid(caps.get(1)?.as_str()).map(DeploymentId)
}

/// Extracts the flow-run id from `prefect deployment run` output.
pub fn parse_flow_run_id(output: &str) -> Option<FlowRunId> {
    let caps = flow_run_id_re().captures(output)?;
    parse_uuid(caps.get(1)?.as_str()).map(FlowRunId)
}

#[async_trait]
impl OrchestrationPlatform for PrefectCli {
    fn name(&self) -> &'static str {
        "prefect-cli"
    }

    async fn register(&self, request: &DeploymentRequest) -> Result<DeploymentId, PlatformError> {
        let args = Self::deploy_args(request)?;
        let stdout = self.run(&args).await?;

        let id = parse_deployment_id(&stdout).ok_or_else(|| {
            PlatformError::UnexpectedResponse(format!(
                "no deployment id in prefect deploy output: {}",
                stdout.trim()
            ))
        })?;

        info!(deployment = %request.deployment_ref(), id = %id, "Registered deployment");
        Ok(id)
    }

    async fn trigger(&self, deployment: &DeploymentRef) -> Result<FlowRunId, PlatformError> {
        let stdout = self.run(&Self::run_args(deployment)).await?;

        let id = parse_flow_run_id(&stdout).ok_or_else(|| {
            PlatformError::UnexpectedResponse(format!(
                "no flow run id in prefect deployment run output: {}",
                stdout.trim()
            ))
        })?;

        info!(deployment = %deployment, run_id = %id, "Triggered flow run");
        Ok(id)
    }
}
