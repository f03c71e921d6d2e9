//! Best-effort git notification after a flow file is written.
//!
//! Staging, committing and pushing can each fail on their own. Failures
//! are logged and folded into a [`VcsOutcome`]; they never fail a deploy.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::Serialize;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::VcsError;
use crate::pipeline::VcsConfig;

/// A version-control system the pipeline reports new flow files to.
#[async_trait]
pub trait VersionControl: Send + Sync {
    async fn stage(&self, paths: &[PathBuf]) -> Result<(), VcsError>;
    async fn commit(&self, message: &str) -> Result<(), VcsError>;
    async fn push(&self) -> Result<(), VcsError>;
}

/// Result of the notification step, recorded in the pipeline report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum VcsOutcome {
    /// Notification was disabled or not reached.
    Skipped,
    Pushed,
    Failed { step: String, message: String },
}

impl VcsOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, VcsOutcome::Failed { .. })
    }
}

/// Stages, commits and pushes `path`, stopping at the first failure.
pub async fn notify(vcs: &dyn VersionControl, path: &Path, name: &str) -> VcsOutcome {
    let paths = [path.to_path_buf()];
    let message = format!("Add flow {}", name);

    let result: Result<(), (&str, VcsError)> = async {
        vcs.stage(&paths).await.map_err(|e| ("stage", e))?;
        vcs.commit(&message).await.map_err(|e| ("commit", e))?;
        vcs.push().await.map_err(|e| ("push", e))
    }
    .await;

    match result {
        Ok(()) => {
            info!(name, path = %path.display(), "Pushed flow file");
            VcsOutcome::Pushed
        }
        Err((step, err)) => {
            warn!(name, step, error = %err, "Git notification failed");
            VcsOutcome::Failed {
                step: step.to_string(),
                message: err.to_string(),
            }
        }
    }
}

/// [`VersionControl`] backed by the `git` executable.
#[derive(Debug, Clone)]
pub struct GitCli {
    bin: String,
    working_dir: Option<PathBuf>,
    remote: Option<String>,
    branch: Option<String>,
}

impl GitCli {
    pub fn new(bin: impl Into<String>) -> Self {
        Self {
            bin: bin.into(),
            working_dir: None,
            remote: None,
            branch: None,
        }
    }

    pub fn from_config(config: &VcsConfig) -> Self {
        Self {
            bin: config.git_bin.clone(),
            working_dir: None,
            remote: config.remote.clone(),
            branch: config.branch.clone(),
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Arguments for `git push`. A branch is only passed with a remote.
    pub fn push_args(&self) -> Vec<String> {
        let mut args = vec!["push".to_string()];
        if let Some(ref remote) = self.remote {
            args.push(remote.clone());
            if let Some(ref branch) = self.branch {
                args.push(branch.clone());
            }
        }
        args
    }

    async fn git(&self, step: &str, args: &[String]) -> Result<(), VcsError> {
        debug!(?args, "Running git");
        let mut cmd = Command::new(&self.bin);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(ref dir) = self.working_dir {
            cmd.current_dir(dir);
        }

        let output = cmd
            .output()
            .await
            .map_err(|e| VcsError::Spawn(e.to_string()))?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
            Err(VcsError::StepFailed {
                step: step.to_string(),
                stderr: if stderr.is_empty() { stdout } else { stderr },
            })
        }
    }
}

#[async_trait]
impl VersionControl for GitCli {
    async fn stage(&self, paths: &[PathBuf]) -> Result<(), VcsError> {
        let mut args = vec!["add".to_string(), "--".to_string()];
        args.extend(paths.iter().map(|p| p.to_string_lossy().into_owned()));
        self.git("add", &args).await
    }

    async fn commit(&self, message: &str) -> Result<(), VcsError> {
        let args = vec!["commit".to_string(), "-m".to_string(), message.to_string()];
        self.git("commit", &args).await
    }

    async fn push(&self) -> Result<(), VcsError> {
        self.git("push", &self.push_args()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingVcs {
        calls: Mutex<Vec<String>>,
        fail_at: Option<&'static str>,
    }

    impl RecordingVcs {
        fn failing_at(step: &'static str) -> Self {
            Self {
                fail_at: Some(step),
                ..Default::default()
            }
        }

        fn record(&self, call: String, step: &str) -> Result<(), VcsError> {
            self.calls.lock().expect("lock poisoned").push(call);
            if self.fail_at == Some(step) {
                return Err(VcsError::StepFailed {
                    step: step.to_string(),
                    stderr: "rejected".to_string(),
                });
            }
            Ok(())
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().expect("lock poisoned").clone()
        }
    }

    #[async_trait]
    impl VersionControl for RecordingVcs {
        async fn stage(&self, paths: &[PathBuf]) -> Result<(), VcsError> {
            self.record(format!("stage {}", paths[0].display()), "stage")
        }

        async fn commit(&self, message: &str) -> Result<(), VcsError> {
            self.record(format!("commit {}", message), "commit")
        }

        async fn push(&self) -> Result<(), VcsError> {
            self.record("push".to_string(), "push")
        }
    }

    #[tokio::test]
    async fn test_notify_runs_all_steps() {
        let vcs = RecordingVcs::default();
        let outcome = notify(&vcs, Path::new("flows/eth-price.py"), "eth-price").await;
        assert_eq!(outcome, VcsOutcome::Pushed);
        assert_eq!(
            vcs.calls(),
            vec!["stage flows/eth-price.py", "commit Add flow eth-price", "push"]
        );
    }

    #[tokio::test]
    async fn test_notify_stops_at_first_failure() {
        let vcs = RecordingVcs::failing_at("commit");
        let outcome = notify(&vcs, Path::new("flows/eth-price.py"), "eth-price").await;
        assert!(outcome.is_failed());
        assert_eq!(
            outcome,
            VcsOutcome::Failed {
                step: "commit".to_string(),
                message: "git commit failed: rejected".to_string(),
            }
        );
        assert_eq!(vcs.calls().len(), 2);
    }

    #[test]
    fn test_push_args() {
        let git = GitCli::new("git");
        assert_eq!(git.push_args(), vec!["push"]);

        let git = GitCli::from_config(&VcsConfig {
            remote: Some("origin".to_string()),
            branch: Some("main".to_string()),
            ..VcsConfig::default()
        });
        assert_eq!(git.push_args(), vec!["push", "origin", "main"]);
    }

    #[tokio::test]
    async fn test_missing_git_binary_fails_softly() {
        let git = GitCli::new("/nonexistent/git-binary");
        let outcome = notify(&git, Path::new("flows/eth-price.py"), "eth-price").await;
        match outcome {
            VcsOutcome::Failed { step, .. } => assert_eq!(step, "stage"),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_git_outside_repository_fails_softly() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let git = GitCli::new("git").with_working_dir(dir.path());
        let outcome = notify(&git, Path::new("missing.py"), "missing").await;
        assert!(outcome.is_failed());
    }
}
