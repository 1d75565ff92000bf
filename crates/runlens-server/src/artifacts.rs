// SPDX-License-Identifier: Apache-2.0

//! Artifact resolution and download.
//!
//! Resolution and download are separate steps so callers can short-circuit
//! between them (an already-extracted report needs no download) while the
//! metadata lookup still verifies the caller may see the artifact.

use crate::auth::Credential;
use crate::error::ReportError;
use crate::upstream::UpstreamApi;
use runlens_model::{ArtifactId, ArtifactMetadata, ArtifactRef};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{info, instrument};

#[derive(Debug, Clone)]
pub struct FetchLimits {
    pub max_artifact_bytes: u64,
    pub metadata_timeout: Duration,
    pub download_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct FetchedArchive {
    pub metadata: ArtifactMetadata,
    pub bytes: Vec<u8>,
}

pub(crate) async fn with_upstream_timeout<T, F>(limit: Duration, fut: F) -> Result<T, ReportError>
where
    F: Future<Output = Result<T, crate::upstream::UpstreamError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(ReportError::from),
        Err(_) => Err(ReportError::Timeout),
    }
}

/// Looks up artifact metadata and rejects expired or oversized archives
/// before any byte of the archive is transferred.
#[instrument(name = "artifact_resolve", skip(upstream, credential, artifact, limits), fields(artifact = %artifact))]
pub async fn resolve(
    upstream: &dyn UpstreamApi,
    artifact: &ArtifactRef,
    credential: &Credential,
    limits: &FetchLimits,
) -> Result<ArtifactMetadata, ReportError> {
    let metadata = with_upstream_timeout(
        limits.metadata_timeout,
        upstream.artifact_metadata(credential, artifact),
    )
    .await?;
    if metadata.id != artifact.id.get() {
        return Err(ReportError::NotFound(format!("artifact {artifact}")));
    }
    if metadata.expired {
        return Err(ReportError::NotFound(format!("artifact {artifact} has expired")));
    }
    if metadata.exceeds(limits.max_artifact_bytes) {
        return Err(ReportError::PayloadTooLarge {
            limit_bytes: limits.max_artifact_bytes,
        });
    }
    Ok(metadata)
}

/// Downloads the archive named by `metadata`. Not retried.
#[instrument(name = "artifact_fetch", skip_all, fields(artifact_id = metadata.id))]
pub async fn fetch(
    upstream: &dyn UpstreamApi,
    metadata: &ArtifactMetadata,
    credential: &Credential,
    limits: &FetchLimits,
) -> Result<Vec<u8>, ReportError> {
    let bytes = with_upstream_timeout(
        limits.download_timeout,
        upstream.download_archive(
            credential,
            &metadata.archive_download_url,
            limits.max_artifact_bytes,
        ),
    )
    .await?;
    info!(bytes = bytes.len(), "artifact archive downloaded");
    Ok(bytes)
}

pub async fn resolve_and_fetch(
    upstream: &dyn UpstreamApi,
    artifact: &ArtifactRef,
    credential: &Credential,
    limits: &FetchLimits,
) -> Result<FetchedArchive, ReportError> {
    let metadata = resolve(upstream, artifact, credential, limits).await?;
    let bytes = fetch(upstream, &metadata, credential, limits).await?;
    Ok(FetchedArchive { metadata, bytes })
}

/// Which credentials have proven access to which artifacts.
///
/// Persisted reports are shared on disk; serving them is limited to
/// credentials that resolved the artifact's metadata at least once. Each
/// grant remembers when it was last used so idle ones can be pruned.
#[derive(Default)]
pub struct ReportGrants {
    granted: Mutex<HashMap<ArtifactId, HashMap<String, Instant>>>,
}

impl ReportGrants {
    pub fn grant(&self, artifact: ArtifactId, fingerprint: &str) {
        self.granted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(artifact)
            .or_default()
            .insert(fingerprint.to_string(), Instant::now());
    }

    /// Checks the grant and refreshes its last use.
    #[must_use]
    pub fn is_granted(&self, artifact: ArtifactId, fingerprint: &str) -> bool {
        let mut granted = self.granted.lock().unwrap_or_else(PoisonError::into_inner);
        match granted.get_mut(&artifact).and_then(|set| set.get_mut(fingerprint)) {
            Some(last_used) => {
                *last_used = Instant::now();
                true
            }
            None => false,
        }
    }

    pub fn revoke_fingerprint(&self, fingerprint: &str) {
        let mut granted = self.granted.lock().unwrap_or_else(PoisonError::into_inner);
        for set in granted.values_mut() {
            set.remove(fingerprint);
        }
        granted.retain(|_, set| !set.is_empty());
    }

    /// Drops grants unused for `idle`; returns how many were dropped.
    pub fn prune_idle(&self, idle: Duration) -> usize {
        let mut granted = self.granted.lock().unwrap_or_else(PoisonError::into_inner);
        let mut pruned = 0;
        for set in granted.values_mut() {
            let before = set.len();
            set.retain(|_, last_used| last_used.elapsed() < idle);
            pruned += before - set.len();
        }
        granted.retain(|_, set| !set.is_empty());
        pruned
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.granted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(HashMap::len)
            .sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
