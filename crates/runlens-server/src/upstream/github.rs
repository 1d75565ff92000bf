// SPDX-License-Identifier: Apache-2.0

use super::{classify_status, UpstreamApi, UpstreamError};
use crate::auth::Credential;
use async_trait::async_trait;
use reqwest::header::{HeaderValue, ACCEPT};
use runlens_model::{
    Account, ArtifactMetadata, ArtifactPage, ArtifactRef, JobPage, Owner, RepoName, Repository,
    WorkflowRunPage,
};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::instrument;

const GITHUB_JSON: &str = "application/vnd.github+json";
const GITHUB_API_VERSION: &str = "2022-11-28";
const REPOS_PER_PAGE: u32 = 100;

/// REST client for the GitHub API.
///
/// The caller's token is only attached to requests aimed at `base_url`;
/// redirects to signed download hosts go out without it.
pub struct GithubBackend {
    base_url: String,
    base: reqwest::Url,
    client: reqwest::Client,
}

impl GithubBackend {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("runlens/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| UpstreamError::Transport(format!("http client init failed: {e}")))?;
        let base_url = base_url.trim_end_matches('/').to_string();
        let base = reqwest::Url::parse(&base_url)
            .map_err(|e| UpstreamError::Transport(format!("invalid api base url: {e}")))?;
        Ok(Self {
            base_url,
            base,
            client,
        })
    }

    fn request(&self, credential: &Credential, url: &str) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .get(url)
            .header(ACCEPT, HeaderValue::from_static(GITHUB_JSON))
            .header("X-GitHub-Api-Version", GITHUB_API_VERSION);
        if self.is_api_origin(url) {
            req = req.bearer_auth(credential.expose());
        }
        req
    }

    fn is_api_origin(&self, url: &str) -> bool {
        reqwest::Url::parse(url).is_ok_and(|u| u.origin() == self.base.origin())
    }

    async fn send(
        &self,
        credential: &Credential,
        url: &str,
        context: &str,
    ) -> Result<reqwest::Response, UpstreamError> {
        let resp = self
            .request(credential, url)
            .send()
            .await
            .map_err(map_transport)?;
        if resp.status().is_success() {
            Ok(resp)
        } else {
            Err(classify_status(resp.status().as_u16(), context))
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        credential: &Credential,
        path: &str,
        context: &str,
    ) -> Result<T, UpstreamError> {
        let url = format!("{}{path}", self.base_url);
        let resp = self.send(credential, &url, context).await?;
        resp.json::<T>()
            .await
            .map_err(|e| UpstreamError::Decode(format!("{context}: {e}")))
    }
}

fn map_transport(err: reqwest::Error) -> UpstreamError {
    if err.is_timeout() {
        UpstreamError::Timeout
    } else {
        UpstreamError::Transport(err.to_string())
    }
}

async fn read_bounded(
    mut resp: reqwest::Response,
    max_bytes: u64,
) -> Result<Vec<u8>, UpstreamError> {
    if resp.content_length().is_some_and(|len| len > max_bytes) {
        return Err(UpstreamError::TooLarge {
            limit_bytes: max_bytes,
        });
    }
    let mut out = Vec::new();
    while let Some(chunk) = resp.chunk().await.map_err(map_transport)? {
        if (out.len() + chunk.len()) as u64 > max_bytes {
            return Err(UpstreamError::TooLarge {
                limit_bytes: max_bytes,
            });
        }
        out.extend_from_slice(&chunk);
    }
    Ok(out)
}

#[async_trait]
impl UpstreamApi for GithubBackend {
    fn backend_tag(&self) -> &'static str {
        "github"
    }

    #[instrument(name = "github_current_user", skip_all)]
    async fn current_user(&self, credential: &Credential) -> Result<Account, UpstreamError> {
        self.get_json(credential, "/user", "authenticated user").await
    }

    #[instrument(name = "github_list_repositories", skip_all)]
    async fn list_repositories(
        &self,
        credential: &Credential,
    ) -> Result<Vec<Repository>, UpstreamError> {
        self.get_json(
            credential,
            &format!("/user/repos?per_page={REPOS_PER_PAGE}&sort=updated"),
            "repository list",
        )
        .await
    }

    #[instrument(name = "github_list_workflow_runs", skip(self, credential))]
    async fn list_workflow_runs(
        &self,
        credential: &Credential,
        owner: &Owner,
        repo: &RepoName,
        per_page: u32,
    ) -> Result<WorkflowRunPage, UpstreamError> {
        self.get_json(
            credential,
            &format!("/repos/{owner}/{repo}/actions/runs?per_page={per_page}"),
            "workflow runs",
        )
        .await
    }

    #[instrument(name = "github_list_jobs", skip(self, credential))]
    async fn list_jobs(
        &self,
        credential: &Credential,
        owner: &Owner,
        repo: &RepoName,
        run_id: u64,
    ) -> Result<JobPage, UpstreamError> {
        self.get_json(
            credential,
            &format!("/repos/{owner}/{repo}/actions/runs/{run_id}/jobs"),
            "workflow jobs",
        )
        .await
    }

    #[instrument(name = "github_list_run_artifacts", skip(self, credential))]
    async fn list_run_artifacts(
        &self,
        credential: &Credential,
        owner: &Owner,
        repo: &RepoName,
        run_id: u64,
    ) -> Result<ArtifactPage, UpstreamError> {
        self.get_json(
            credential,
            &format!("/repos/{owner}/{repo}/actions/runs/{run_id}/artifacts"),
            "run artifacts",
        )
        .await
    }

    #[instrument(name = "github_job_logs", skip(self, credential))]
    async fn job_logs(
        &self,
        credential: &Credential,
        owner: &Owner,
        repo: &RepoName,
        job_id: u64,
        max_bytes: u64,
    ) -> Result<Vec<u8>, UpstreamError> {
        let url = format!(
            "{}/repos/{owner}/{repo}/actions/jobs/{job_id}/logs",
            self.base_url
        );
        let resp = self.send(credential, &url, "job logs").await?;
        read_bounded(resp, max_bytes).await
    }

    #[instrument(name = "github_artifact_metadata", skip(self, credential, artifact), fields(artifact = %artifact))]
    async fn artifact_metadata(
        &self,
        credential: &Credential,
        artifact: &ArtifactRef,
    ) -> Result<ArtifactMetadata, UpstreamError> {
        self.get_json(
            credential,
            &format!(
                "/repos/{}/{}/actions/artifacts/{}",
                artifact.owner, artifact.repo, artifact.id
            ),
            "artifact metadata",
        )
        .await
    }

    #[instrument(name = "github_download_archive", skip(self, credential, url))]
    async fn download_archive(
        &self,
        credential: &Credential,
        url: &str,
        max_bytes: u64,
    ) -> Result<Vec<u8>, UpstreamError> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| UpstreamError::Transport(format!("invalid archive url: {e}")))?;
        if !matches!(parsed.scheme(), "https" | "http") {
            return Err(UpstreamError::Transport(format!(
                "unsupported archive url scheme: {}",
                parsed.scheme()
            )));
        }
        let resp = self.send(credential, url, "artifact archive").await?;
        read_bounded(resp, max_bytes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_scoped_to_the_api_host() {
        let backend =
            GithubBackend::new("https://api.github.com/", Duration::from_secs(1)).expect("client");
        let cred = Credential::new("gho_abc").expect("credential");

        let req = backend
            .request(&cred, "https://api.github.com/user")
            .build()
            .expect("request");
        assert_eq!(
            req.headers()
                .get("authorization")
                .and_then(|v| v.to_str().ok()),
            Some("Bearer gho_abc")
        );
        assert_eq!(
            req.headers().get("accept").and_then(|v| v.to_str().ok()),
            Some(GITHUB_JSON)
        );

        let req = backend
            .request(&cred, "https://pipelines.example.net/blob.zip")
            .build()
            .expect("request");
        assert!(req.headers().get("authorization").is_none());

        let req = backend
            .request(&cred, "https://api.github.com.attacker.test/x")
            .build()
            .expect("request");
        assert!(req.headers().get("authorization").is_none());
    }
}
