//! Persistence of normalized flow files.
//!
//! Files live at `<flows_dir>/<name>.py`. A write goes to a temporary
//! sibling first and is renamed over the target, so the target is either
//! the previous version or the complete new one.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::artifact::Entrypoint;
use crate::error::{DeployError, DeployResult};
use crate::normalize::{content_checksum, NormalizedArtifact};

/// Outcome of a flow file write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WrittenArtifact {
    pub path: PathBuf,
    pub entrypoint: Entrypoint,
    pub checksum: String,
    /// False when the file already held identical contents.
    pub changed: bool,
}

/// Writes flow files into one directory.
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    flows_dir: PathBuf,
}

impl ArtifactWriter {
    pub fn new(flows_dir: impl Into<PathBuf>) -> Self {
        Self {
            flows_dir: flows_dir.into(),
        }
    }

    pub fn flows_dir(&self) -> &Path {
        &self.flows_dir
    }

    /// Persists `normalized`, overwriting any previous file for the same name.
    pub async fn write(&self, normalized: &NormalizedArtifact) -> DeployResult<WrittenArtifact> {
        let artifact = &normalized.artifact;
        let path = artifact.file_path(&self.flows_dir);

        fs::create_dir_all(&self.flows_dir)
            .await
            .map_err(|e| persistence(&self.flows_dir, e))?;

        let previous = fs::read(&path).await.ok().map(|bytes| {
            let text = String::from_utf8_lossy(&bytes);
            content_checksum(&text)
        });
        let changed = previous.as_deref() != Some(normalized.checksum.as_str());

        let tmp_path = self
            .flows_dir
            .join(format!(".{}.{}.tmp", artifact.name, Uuid::new_v4().simple()));

        if let Err(e) = write_and_sync(&tmp_path, normalized.contents.as_bytes()).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(persistence(&path, e));
        }

        if let Err(e) = fs::rename(&tmp_path, &path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(persistence(&path, e));
        }

        tracing::info!(
            name = %artifact.name,
            path = %path.display(),
            checksum = %normalized.checksum,
            changed,
            "Wrote flow file"
        );

        Ok(WrittenArtifact {
            entrypoint: artifact.entrypoint(&self.flows_dir),
            path,
            checksum: normalized.checksum.clone(),
            changed,
        })
    }
}

async fn write_and_sync(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    Ok(())
}

fn persistence(path: &Path, err: std::io::Error) -> DeployError {
    DeployError::Persistence {
        path: path.display().to_string(),
        reason: err.to_string(),
    }
}
