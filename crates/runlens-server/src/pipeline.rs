// SPDX-License-Identifier: Apache-2.0

use crate::artifacts::{self, FetchLimits};
use crate::auth::Credential;
use crate::error::ReportError;
use crate::materialize::{decode_archive_blocking, ArchiveLimits, CacheKey, ReportFiles};
use crate::AppState;
use runlens_api::ReportStrategy;
use runlens_model::ArtifactRef;
use std::collections::BTreeMap;
use tracing::{info, instrument};

/// Per-viewer resources that must be released when the viewer goes away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportResources {
    /// Shared on disk; reclaimed by the retention sweeper, not per viewer.
    Persisted,
    Cache(CacheKey),
    /// `addresses` maps archive paths to the `/blobs/{id}` they were published at.
    Blobs {
        ids: Vec<String>,
        addresses: BTreeMap<String, String>,
        document: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializedReport {
    pub entry_url: String,
    pub resources: ReportResources,
}

pub(crate) fn fetch_limits(state: &AppState) -> FetchLimits {
    FetchLimits {
        max_artifact_bytes: state.reports.max_artifact_bytes,
        metadata_timeout: state.api.upstream_timeout,
        download_timeout: state.api.download_timeout,
    }
}

pub(crate) fn archive_limits(state: &AppState) -> ArchiveLimits {
    ArchiveLimits {
        strip_prefix: state.reports.strip_prefix.clone(),
        entry_point: state.reports.entry_point.clone(),
        max_entries: state.reports.max_archive_entries,
        max_extracted_bytes: state.reports.max_extracted_bytes,
    }
}

/// Ensures the report is extracted on disk and returns its entry URL.
///
/// Metadata is always resolved first so access is re-checked against the
/// upstream even when the extraction already exists.
#[instrument(name = "persist_report", skip(state, credential, artifact), fields(artifact = %artifact))]
pub(crate) async fn persist_report(
    state: &AppState,
    artifact: &ArtifactRef,
    credential: &Credential,
) -> Result<String, ReportError> {
    let limits = fetch_limits(state);
    let metadata = artifacts::resolve(state.upstream.as_ref(), artifact, credential, &limits).await?;
    state.grants.grant(artifact.id, credential.fingerprint());
    let entry_point = state.reports.entry_point.as_str();
    let url = state.persisted.entry_url(artifact.id, entry_point);
    if state.persisted.is_materialized(artifact.id, entry_point) {
        info!("report already extracted");
        return Ok(url);
    }
    let bytes = artifacts::fetch(state.upstream.as_ref(), &metadata, credential, &limits).await?;
    let files = decode_archive_blocking(bytes, archive_limits(state)).await?;
    state.persisted.write(artifact.id, files).await?;
    Ok(url)
}

/// Produces a loadable report for one viewer using `strategy`.
///
/// Stores are only touched after the archive decoded completely, so a failed
/// or abandoned load leaves nothing half-populated behind.
#[instrument(name = "materialize_report", skip(state, credential, artifact, strategy), fields(artifact = %artifact, strategy = %strategy))]
pub(crate) async fn materialize_report(
    state: &AppState,
    artifact: &ArtifactRef,
    strategy: ReportStrategy,
    credential: &Credential,
    viewer_id: &str,
) -> Result<MaterializedReport, ReportError> {
    match strategy {
        ReportStrategy::Persist => {
            let entry_url = persist_report(state, artifact, credential).await?;
            Ok(MaterializedReport {
                entry_url,
                resources: ReportResources::Persisted,
            })
        }
        ReportStrategy::Cache => {
            let files = fetch_and_decode(state, artifact, credential).await?;
            let key = CacheKey {
                fingerprint: credential.fingerprint().to_string(),
                artifact_id: artifact.id,
            };
            state
                .report_cache
                .put(key.clone(), artifact, viewer_id, &files)
                .await;
            info!(cache = %artifact.cache_name(), files = files.len(), "report cached");
            Ok(MaterializedReport {
                entry_url: format!("/report/{}/{}", artifact.id, files.entry_point()),
                resources: ReportResources::Cache(key),
            })
        }
        ReportStrategy::Blob => {
            let files = fetch_and_decode(state, artifact, credential).await?;
            let set = state.blobs.publish(credential.fingerprint(), &files).await?;
            info!(blobs = set.ids.len(), "report published as blobs");
            Ok(MaterializedReport {
                entry_url: format!("/reports/viewers/{viewer_id}/document"),
                resources: ReportResources::Blobs {
                    ids: set.ids,
                    addresses: set.addresses,
                    document: set.document,
                },
            })
        }
    }
}

async fn fetch_and_decode(
    state: &AppState,
    artifact: &ArtifactRef,
    credential: &Credential,
) -> Result<ReportFiles, ReportError> {
    let fetched = artifacts::resolve_and_fetch(
        state.upstream.as_ref(),
        artifact,
        credential,
        &fetch_limits(state),
    )
    .await?;
    decode_archive_blocking(fetched.bytes, archive_limits(state)).await
}

/// Releases whatever a viewer held. Safe to call more than once.
pub(crate) async fn release_resources(
    state: &AppState,
    resources: &ReportResources,
    viewer_id: &str,
) {
    match resources {
        ReportResources::Persisted => {}
        ReportResources::Cache(key) => {
            if state.report_cache.release(key, viewer_id).await {
                info!(viewer_id, artifact_id = %key.artifact_id, "report cache deleted");
            }
        }
        ReportResources::Blobs { ids, .. } => {
            let released = state.blobs.release(ids).await;
            info!(viewer_id, released, "blob addresses revoked");
        }
    }
}
