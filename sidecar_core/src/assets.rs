//! Model Asset Provisioner (C8).
//!
//! Contract: verify a set of marker files exist under the resolved model
//! directory; if they don't, fetch a snapshot from a remote hub into that
//! directory and verify again. Never validates file contents (only
//! presence) and never runs on the serving path — only during bootstrap.
//!
//! Grounded on `start_server.py::serve`'s model-path resolution and
//! `snapshot_download(...)` call (the "Model found locally. Skipping
//! download." / "Downloading from HuggingFace Hub..." branches), realized
//! with the `hf-hub` crate in place of `huggingface_hub`.

use std::path::{Path, PathBuf};

use hf_hub::api::tokio::Api;

#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("failed to create model directory {0}: {1}")]
    CreateDir(PathBuf, std::io::Error),
    #[error("hub download failed: {0}")]
    Download(#[from] hf_hub::api::tokio::ApiError),
}

/// A model asset bundle: a repository to pull from and the marker files
/// that prove a complete, usable local copy already exists.
#[derive(Debug, Clone)]
pub struct AssetSpec {
    pub repo_id: String,
    pub revision: String,
    /// Paths relative to the model directory that must all exist for the
    /// bundle to be considered present.
    pub marker_files: Vec<String>,
}

impl AssetSpec {
    pub fn new(repo_id: impl Into<String>, marker_files: Vec<String>) -> Self {
        Self {
            repo_id: repo_id.into(),
            revision: "main".to_string(),
            marker_files,
        }
    }

    fn is_present(&self, model_dir: &Path) -> bool {
        self.marker_files
            .iter()
            .all(|marker| model_dir.join(marker).exists())
    }
}

/// Resolve `model_dir`'s contents, downloading `spec`'s repository into it
/// if the marker files are missing. A no-op (no network access) if they're
/// already present, matching "Model found locally. Skipping download."
pub async fn ensure_assets(spec: &AssetSpec, model_dir: &Path) -> Result<(), AssetError> {
    if spec.is_present(model_dir) {
        tracing::info!("model assets found locally at {:?}, skipping download", model_dir);
        return Ok(());
    }

    tracing::info!(
        "model assets not found, downloading {} (revision {}) into {:?}",
        spec.repo_id,
        spec.revision,
        model_dir,
    );
    tokio::fs::create_dir_all(model_dir)
        .await
        .map_err(|e| AssetError::CreateDir(model_dir.to_path_buf(), e))?;

    let api = Api::new()?;
    let repo = api.model(spec.repo_id.clone());
    for marker in &spec.marker_files {
        let fetched = repo.get(marker).await?;
        let destination = model_dir.join(marker);
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AssetError::CreateDir(parent.to_path_buf(), e))?;
        }
        // `hf-hub` caches under its own blob store and returns the cached
        // path; copy into a sibling temp file then rename, so a process
        // killed mid-copy never leaves a partially-written marker file that
        // `is_present` would mistake for a complete asset.
        let tmp_destination = destination.with_extension("part");
        tokio::fs::copy(&fetched, &tmp_destination)
            .await
            .map_err(|e| AssetError::CreateDir(tmp_destination.clone(), e))?;
        tokio::fs::rename(&tmp_destination, &destination)
            .await
            .map_err(|e| AssetError::CreateDir(destination.clone(), e))?;
    }

    tracing::info!("model download completed successfully");
    Ok(())
}

/// Resolves the model directory the way `--model-path` resolution is
/// specified: explicit flag, then environment variable, then a
/// platform-appropriate user-data directory, matching the `%APPDATA%`
/// fallback generalized across platforms via `dirs`.
pub fn resolve_model_dir(flag: Option<&str>, env_var: &str, subdir: &str) -> PathBuf {
    if let Some(flag) = flag {
        return PathBuf::from(flag);
    }
    if let Ok(value) = std::env::var(env_var) {
        return PathBuf::from(value);
    }
    let base = dirs::data_dir().unwrap_or_else(std::env::temp_dir);
    base.join("sidecar").join(subdir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_file_presence_controls_download() {
        let dir = std::env::temp_dir().join(format!("asset-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let spec = AssetSpec::new("example/repo", vec!["model.onnx".to_string()]);
        assert!(!spec.is_present(&dir));
        std::fs::write(dir.join("model.onnx"), b"stub").unwrap();
        assert!(spec.is_present(&dir));
        std::fs::remove_dir_all(&dir).ok();
    }
}
