#![forbid(unsafe_code)]
//! Domain types shared by the runlens crates.

mod artifact;
mod workflow;

use sha2::{Digest, Sha256};

pub use artifact::{
    parse_artifact_id, parse_owner, parse_repo_name, ArtifactId, ArtifactMetadata, ArtifactRef,
    Owner, RepoName, ValidationError, OWNER_MAX_LEN, REPO_MAX_LEN,
};
pub use workflow::{
    owner_from_html_url, Account, Artifact, ArtifactPage, Job, JobPage, Repository, Step,
    WorkflowRun, WorkflowRunPage,
};

pub const CRATE_NAME: &str = "runlens-model";

#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
