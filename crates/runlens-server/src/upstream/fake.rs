// SPDX-License-Identifier: Apache-2.0

use super::{UpstreamApi, UpstreamError};
use crate::auth::Credential;
use async_trait::async_trait;
use runlens_model::{
    Account, Artifact, ArtifactMetadata, ArtifactPage, ArtifactRef, Job, JobPage, Owner, RepoName,
    Repository, WorkflowRun, WorkflowRunPage,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

type RepoKey = (String, String);

/// In-memory stand-in for the CI host, used by tests and local demos.
///
/// Counters record every call so callers can assert that rejected requests
/// never reached the upstream.
pub struct FakeUpstream {
    /// Tokens accepted as valid. Empty means every non-empty token is accepted.
    pub valid_tokens: Mutex<HashSet<String>>,
    pub account: Mutex<Account>,
    pub repositories: Mutex<Vec<Repository>>,
    pub runs: Mutex<HashMap<RepoKey, Vec<WorkflowRun>>>,
    pub jobs: Mutex<HashMap<u64, Vec<Job>>>,
    pub run_artifacts: Mutex<HashMap<u64, Vec<Artifact>>>,
    pub logs: Mutex<HashMap<u64, Vec<u8>>>,
    pub artifacts: Mutex<HashMap<u64, (RepoKey, ArtifactMetadata)>>,
    pub archives: Mutex<HashMap<String, Vec<u8>>>,
    pub forbidden_repos: Mutex<HashSet<RepoKey>>,
    /// Status code returned from `list_workflow_runs` instead of data.
    pub fail_runs_with: Mutex<Option<u16>>,
    /// Status code returned from `download_archive` instead of the body.
    pub fail_downloads_with: Mutex<Option<u16>>,
    pub calls: AtomicU64,
    pub metadata_calls: AtomicU64,
    pub download_calls: AtomicU64,
    pub downloaded_bytes: AtomicU64,
    pub run_polls: AtomicU64,
    pub download_delay: Duration,
}

impl Default for FakeUpstream {
    fn default() -> Self {
        Self {
            valid_tokens: Mutex::new(HashSet::new()),
            account: Mutex::new(Account {
                login: "octocat".to_string(),
                id: 1,
                avatar_url: None,
            }),
            repositories: Mutex::new(Vec::new()),
            runs: Mutex::new(HashMap::new()),
            jobs: Mutex::new(HashMap::new()),
            run_artifacts: Mutex::new(HashMap::new()),
            logs: Mutex::new(HashMap::new()),
            artifacts: Mutex::new(HashMap::new()),
            archives: Mutex::new(HashMap::new()),
            forbidden_repos: Mutex::new(HashSet::new()),
            fail_runs_with: Mutex::new(None),
            fail_downloads_with: Mutex::new(None),
            calls: AtomicU64::new(0),
            metadata_calls: AtomicU64::new(0),
            download_calls: AtomicU64::new(0),
            downloaded_bytes: AtomicU64::new(0),
            run_polls: AtomicU64::new(0),
            download_delay: Duration::ZERO,
        }
    }
}

fn repo_key(owner: &Owner, repo: &RepoName) -> RepoKey {
    (owner.as_str().to_string(), repo.as_str().to_string())
}

impl FakeUpstream {
    #[must_use]
    pub fn with_download_delay(delay: Duration) -> Self {
        Self {
            download_delay: delay,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn archive_url(artifact_id: u64) -> String {
        format!("https://api.github.test/artifacts/{artifact_id}/zip")
    }

    /// Registers an artifact whose download returns `archive`. The declared
    /// size matches the archive length.
    pub async fn insert_artifact(&self, owner: &str, repo: &str, id: u64, name: &str, archive: Vec<u8>) {
        let size = archive.len() as u64;
        self.insert_artifact_with_size(owner, repo, id, name, size, archive)
            .await;
    }

    pub async fn insert_artifact_with_size(
        &self,
        owner: &str,
        repo: &str,
        id: u64,
        name: &str,
        declared_size: u64,
        archive: Vec<u8>,
    ) {
        let url = Self::archive_url(id);
        let meta = ArtifactMetadata {
            id,
            name: name.to_string(),
            size_in_bytes: declared_size,
            archive_download_url: url.clone(),
            expired: false,
            expires_at: None,
        };
        self.artifacts
            .lock()
            .await
            .insert(id, ((owner.to_string(), repo.to_string()), meta));
        self.archives.lock().await.insert(url, archive);
    }

    pub async fn expire_artifact(&self, id: u64) {
        if let Some((_, meta)) = self.artifacts.lock().await.get_mut(&id) {
            meta.expired = true;
        }
    }

    pub async fn push_run(&self, owner: &str, repo: &str, run: WorkflowRun) {
        let mut runs = self.runs.lock().await;
        let list = runs
            .entry((owner.to_string(), repo.to_string()))
            .or_default();
        list.insert(0, run);
    }

    pub fn total_calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn total_downloaded_bytes(&self) -> u64 {
        self.downloaded_bytes.load(Ordering::Relaxed)
    }

    async fn check(&self, credential: &Credential) -> Result<(), UpstreamError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let valid = self.valid_tokens.lock().await;
        if valid.is_empty() || valid.contains(credential.expose()) {
            Ok(())
        } else {
            Err(UpstreamError::Unauthorized)
        }
    }

    async fn check_repo(&self, owner: &Owner, repo: &RepoName) -> Result<(), UpstreamError> {
        if self
            .forbidden_repos
            .lock()
            .await
            .contains(&repo_key(owner, repo))
        {
            return Err(UpstreamError::NotFound(format!("{owner}/{repo}")));
        }
        Ok(())
    }
}

#[async_trait]
impl UpstreamApi for FakeUpstream {
    fn backend_tag(&self) -> &'static str {
        "fake"
    }

    async fn current_user(&self, credential: &Credential) -> Result<Account, UpstreamError> {
        self.check(credential).await?;
        Ok(self.account.lock().await.clone())
    }

    async fn list_repositories(
        &self,
        credential: &Credential,
    ) -> Result<Vec<Repository>, UpstreamError> {
        self.check(credential).await?;
        Ok(self.repositories.lock().await.clone())
    }

    async fn list_workflow_runs(
        &self,
        credential: &Credential,
        owner: &Owner,
        repo: &RepoName,
        per_page: u32,
    ) -> Result<WorkflowRunPage, UpstreamError> {
        self.check(credential).await?;
        self.run_polls.fetch_add(1, Ordering::Relaxed);
        self.check_repo(owner, repo).await?;
        if let Some(status) = *self.fail_runs_with.lock().await {
            return Err(super::classify_status(status, "workflow runs"));
        }
        let runs = self
            .runs
            .lock()
            .await
            .get(&repo_key(owner, repo))
            .cloned()
            .unwrap_or_default();
        Ok(WorkflowRunPage {
            total_count: runs.len() as u64,
            workflow_runs: runs.into_iter().take(per_page as usize).collect(),
        })
    }

    async fn list_jobs(
        &self,
        credential: &Credential,
        owner: &Owner,
        repo: &RepoName,
        run_id: u64,
    ) -> Result<JobPage, UpstreamError> {
        self.check(credential).await?;
        self.check_repo(owner, repo).await?;
        let jobs = self
            .jobs
            .lock()
            .await
            .get(&run_id)
            .cloned()
            .ok_or_else(|| UpstreamError::NotFound(format!("run {run_id}")))?;
        Ok(JobPage {
            total_count: jobs.len() as u64,
            jobs,
        })
    }

    async fn list_run_artifacts(
        &self,
        credential: &Credential,
        owner: &Owner,
        repo: &RepoName,
        run_id: u64,
    ) -> Result<ArtifactPage, UpstreamError> {
        self.check(credential).await?;
        self.check_repo(owner, repo).await?;
        let artifacts = self
            .run_artifacts
            .lock()
            .await
            .get(&run_id)
            .cloned()
            .unwrap_or_default();
        Ok(ArtifactPage {
            total_count: artifacts.len() as u64,
            artifacts,
        })
    }

    async fn job_logs(
        &self,
        credential: &Credential,
        owner: &Owner,
        repo: &RepoName,
        job_id: u64,
        max_bytes: u64,
    ) -> Result<Vec<u8>, UpstreamError> {
        self.check(credential).await?;
        self.check_repo(owner, repo).await?;
        let logs = self
            .logs
            .lock()
            .await
            .get(&job_id)
            .cloned()
            .ok_or_else(|| UpstreamError::NotFound(format!("job {job_id}")))?;
        if logs.len() as u64 > max_bytes {
            return Err(UpstreamError::TooLarge {
                limit_bytes: max_bytes,
            });
        }
        Ok(logs)
    }

    async fn artifact_metadata(
        &self,
        credential: &Credential,
        artifact: &ArtifactRef,
    ) -> Result<ArtifactMetadata, UpstreamError> {
        self.check(credential).await?;
        self.metadata_calls.fetch_add(1, Ordering::Relaxed);
        self.check_repo(&artifact.owner, &artifact.repo).await?;
        let artifacts = self.artifacts.lock().await;
        match artifacts.get(&artifact.id.get()) {
            Some(((owner, repo), meta))
                if owner == artifact.owner.as_str() && repo == artifact.repo.as_str() =>
            {
                Ok(meta.clone())
            }
            _ => Err(UpstreamError::NotFound(format!("artifact {artifact}"))),
        }
    }

    async fn download_archive(
        &self,
        credential: &Credential,
        url: &str,
        max_bytes: u64,
    ) -> Result<Vec<u8>, UpstreamError> {
        self.check(credential).await?;
        self.download_calls.fetch_add(1, Ordering::Relaxed);
        if !self.download_delay.is_zero() {
            tokio::time::sleep(self.download_delay).await;
        }
        if let Some(status) = *self.fail_downloads_with.lock().await {
            return Err(super::classify_status(status, "archive download"));
        }
        let bytes = self
            .archives
            .lock()
            .await
            .get(url)
            .cloned()
            .ok_or_else(|| UpstreamError::NotFound(url.to_string()))?;
        if bytes.len() as u64 > max_bytes {
            // A streaming client stops once the bound is crossed.
            self.downloaded_bytes
                .fetch_add(max_bytes.saturating_add(1), Ordering::Relaxed);
            return Err(UpstreamError::TooLarge {
                limit_bytes: max_bytes,
            });
        }
        self.downloaded_bytes
            .fetch_add(bytes.len() as u64, Ordering::Relaxed);
        Ok(bytes)
    }
}
