// SPDX-License-Identifier: Apache-2.0

use crate::auth::Credential;
use async_trait::async_trait;
use runlens_model::{
    Account, ArtifactMetadata, ArtifactPage, ArtifactRef, JobPage, Owner, RepoName, Repository,
    WorkflowRunPage,
};
use std::fmt::{Display, Formatter};

pub mod fake;
pub mod github;

pub use fake::FakeUpstream;
pub use github::GithubBackend;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    /// The credential was rejected.
    Unauthorized,
    Forbidden(String),
    NotFound(String),
    Status { status: u16, message: String },
    Timeout,
    Transport(String),
    Decode(String),
    /// The body grew past the caller's bound before it finished.
    TooLarge { limit_bytes: u64 },
}

impl Display for UpstreamError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unauthorized => write!(f, "upstream rejected the credential"),
            Self::Forbidden(m) => write!(f, "upstream denied access: {m}"),
            Self::NotFound(m) => write!(f, "upstream resource not found: {m}"),
            Self::Status { status, message } => {
                write!(f, "upstream returned status {status}: {message}")
            }
            Self::Timeout => write!(f, "upstream request timed out"),
            Self::Transport(m) => write!(f, "upstream transport failed: {m}"),
            Self::Decode(m) => write!(f, "upstream payload could not be decoded: {m}"),
            Self::TooLarge { limit_bytes } => {
                write!(f, "upstream body exceeded {limit_bytes} bytes")
            }
        }
    }
}

impl std::error::Error for UpstreamError {}

/// Everything the server needs from the CI host.
///
/// Every call takes the caller's credential; implementations never fall back
/// to an ambient identity.
#[async_trait]
pub trait UpstreamApi: Send + Sync + 'static {
    fn backend_tag(&self) -> &'static str;

    async fn current_user(&self, credential: &Credential) -> Result<Account, UpstreamError>;

    async fn list_repositories(
        &self,
        credential: &Credential,
    ) -> Result<Vec<Repository>, UpstreamError>;

    async fn list_workflow_runs(
        &self,
        credential: &Credential,
        owner: &Owner,
        repo: &RepoName,
        per_page: u32,
    ) -> Result<WorkflowRunPage, UpstreamError>;

    async fn list_jobs(
        &self,
        credential: &Credential,
        owner: &Owner,
        repo: &RepoName,
        run_id: u64,
    ) -> Result<JobPage, UpstreamError>;

    async fn list_run_artifacts(
        &self,
        credential: &Credential,
        owner: &Owner,
        repo: &RepoName,
        run_id: u64,
    ) -> Result<ArtifactPage, UpstreamError>;

    async fn job_logs(
        &self,
        credential: &Credential,
        owner: &Owner,
        repo: &RepoName,
        job_id: u64,
        max_bytes: u64,
    ) -> Result<Vec<u8>, UpstreamError>;

    async fn artifact_metadata(
        &self,
        credential: &Credential,
        artifact: &ArtifactRef,
    ) -> Result<ArtifactMetadata, UpstreamError>;

    /// Downloads the archive body, failing with [`UpstreamError::TooLarge`]
    /// as soon as more than `max_bytes` have arrived.
    async fn download_archive(
        &self,
        credential: &Credential,
        url: &str,
        max_bytes: u64,
    ) -> Result<Vec<u8>, UpstreamError>;
}

/// Maps a non-success HTTP status onto the error taxonomy.
#[must_use]
pub fn classify_status(status: u16, context: &str) -> UpstreamError {
    match status {
        401 => UpstreamError::Unauthorized,
        403 => UpstreamError::Forbidden(context.to_string()),
        404 | 410 => UpstreamError::NotFound(context.to_string()),
        _ => UpstreamError::Status {
            status,
            message: context.to_string(),
        },
    }
}
