// SPDX-License-Identifier: Apache-2.0

use super::ReportFiles;
use crate::error::ReportError;
use runlens_model::ArtifactId;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{info, warn};

/// Extracts reports under `{root}/{artifact_id}/` and maps them to URLs.
///
/// Writes go to a staging directory that is renamed into place, so a report
/// directory either has its entry point or does not exist.
#[derive(Debug, Clone)]
pub struct FsMaterializer {
    root: PathBuf,
    url_prefix: String,
}

impl FsMaterializer {
    #[must_use]
    pub fn new(root: PathBuf, url_prefix: &str) -> Self {
        Self {
            root,
            url_prefix: url_prefix.trim_end_matches('/').to_string(),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn report_dir(&self, artifact: ArtifactId) -> PathBuf {
        self.root.join(artifact.to_string())
    }

    #[must_use]
    pub fn entry_url(&self, artifact: ArtifactId, entry_point: &str) -> String {
        format!("{}/{artifact}/{entry_point}", self.url_prefix)
    }

    #[must_use]
    pub fn is_materialized(&self, artifact: ArtifactId, entry_point: &str) -> bool {
        self.report_dir(artifact).join(entry_point).is_file()
    }

    /// Writes the report to disk. A concurrent writer that finished first
    /// counts as success.
    pub async fn write(&self, artifact: ArtifactId, files: ReportFiles) -> Result<(), ReportError> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.write_blocking(artifact, &files))
            .await
            .map_err(|e| ReportError::Internal(format!("extraction task failed: {e}")))?
    }

    fn write_blocking(&self, artifact: ArtifactId, files: &ReportFiles) -> Result<(), ReportError> {
        fs::create_dir_all(&self.root)
            .map_err(|e| ReportError::Internal(format!("create served root failed: {e}")))?;
        let staging = self.root.join(format!(
            ".staging-{artifact}-{}",
            uuid::Uuid::new_v4().simple()
        ));
        if let Err(e) = write_tree(&staging, files) {
            let _ = fs::remove_dir_all(&staging);
            return Err(e);
        }

        let target = self.report_dir(artifact);
        let entry_point = files.entry_point();
        match fs::rename(&staging, &target) {
            Ok(()) => {
                info!(artifact_id = %artifact, files = files.len(), "report extracted");
                Ok(())
            }
            Err(_) if target.join(entry_point).is_file() => {
                let _ = fs::remove_dir_all(&staging);
                info!(artifact_id = %artifact, "report extracted concurrently; keeping existing copy");
                Ok(())
            }
            Err(first) => {
                // A leftover directory without an entry point is incomplete.
                warn!(artifact_id = %artifact, error = %first, "replacing incomplete report directory");
                let _ = fs::remove_dir_all(&target);
                let result = fs::rename(&staging, &target);
                if result.is_err() {
                    let _ = fs::remove_dir_all(&staging);
                }
                result.map_err(|e| ReportError::Internal(format!("publish report failed: {e}")))
            }
        }
    }

    /// Maps a request path to a file inside the artifact's directory.
    /// Returns `None` for anything that would escape it or does not exist.
    #[must_use]
    pub fn resolve_file(&self, artifact: ArtifactId, rel_path: &str) -> Option<PathBuf> {
        let rel = Path::new(rel_path.trim_start_matches('/'));
        if rel.as_os_str().is_empty()
            || !rel.components().all(|c| matches!(c, Component::Normal(_)))
        {
            return None;
        }
        let dir = self.report_dir(artifact);
        let candidate = dir.join(rel);
        let canonical_dir = dir.canonicalize().ok()?;
        let canonical = candidate.canonicalize().ok()?;
        (canonical.starts_with(&canonical_dir) && canonical.is_file()).then_some(canonical)
    }
}

fn write_tree(dir: &Path, files: &ReportFiles) -> Result<(), ReportError> {
    for (name, asset) in files.iter() {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| ReportError::Internal(format!("create {name} parent failed: {e}")))?;
        }
        fs::write(&path, &asset.body)
            .map_err(|e| ReportError::Internal(format!("write {name} failed: {e}")))?;
    }
    Ok(())
}
