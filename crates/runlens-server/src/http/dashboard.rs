// SPDX-License-Identifier: Apache-2.0

//! Read-only passthrough of the CI host's repositories, runs, jobs, run
//! artifacts and job logs for the dashboard.

use crate::artifacts::with_upstream_timeout;
use crate::auth::{require_credential, Credential};
use crate::error::ReportError;
use crate::http::request_tracing::request_id;
use crate::http::response_contract::report_error_response;
use crate::AppState;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use runlens_api::params::{parse_numeric_path, parse_per_page, repo_coordinate_from_path, RepoCoordinate};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{error, warn};

fn failure(err: &ReportError, request_id: &str, operation: &'static str) -> Response {
    if err.is_server_fault() {
        error!(request_id, operation, code = %err.code(), error = %err, "dashboard request failed");
    } else {
        warn!(request_id, operation, code = %err.code(), error = %err, "dashboard request rejected");
    }
    report_error_response(err, request_id)
}

fn json_or_failure<T: Serialize>(
    result: Result<T, ReportError>,
    request_id: &str,
    operation: &'static str,
) -> Response {
    match result {
        Ok(body) => {
            let mut resp = (StatusCode::OK, Json(body)).into_response();
            resp.headers_mut().insert(
                "cache-control",
                axum::http::HeaderValue::from_static("private, no-store"),
            );
            resp
        }
        Err(err) => failure(&err, request_id, operation),
    }
}

async fn guard_and_path(
    state: &AppState,
    headers: &HeaderMap,
    owner: &str,
    repo: &str,
) -> Result<(Credential, RepoCoordinate), ReportError> {
    let credential = require_credential(headers, state).await?;
    let coordinate = repo_coordinate_from_path(owner, repo)?;
    Ok((credential, coordinate))
}

/// `GET /api/repos`
pub(crate) async fn repositories_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Response {
    let request_id = request_id(&headers);
    let result = async {
        let credential = require_credential(&headers, &state).await?;
        with_upstream_timeout(
            state.api.upstream_timeout,
            state.upstream.list_repositories(&credential),
        )
        .await
    }
    .await;
    json_or_failure(result, &request_id, "list_repositories")
}

/// `GET /api/repos/:owner/:repo/runs?per_page=`
pub(crate) async fn workflow_runs_handler(
    State(state): State<AppState>,
    Path((owner, repo)): Path<(String, String)>,
    Query(params): Query<BTreeMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let request_id = request_id(&headers);
    let result = async {
        let (credential, coordinate) = guard_and_path(&state, &headers, &owner, &repo).await?;
        let per_page = parse_per_page(
            &params,
            state.api.default_runs_per_page,
            state.api.max_runs_per_page,
        )?;
        with_upstream_timeout(
            state.api.upstream_timeout,
            state.upstream.list_workflow_runs(
                &credential,
                &coordinate.owner,
                &coordinate.repo,
                per_page,
            ),
        )
        .await
    }
    .await;
    json_or_failure(result, &request_id, "list_workflow_runs")
}

/// `GET /api/repos/:owner/:repo/runs/:run_id/jobs`
pub(crate) async fn jobs_handler(
    State(state): State<AppState>,
    Path((owner, repo, run_id)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Response {
    let request_id = request_id(&headers);
    let result = async {
        let (credential, coordinate) = guard_and_path(&state, &headers, &owner, &repo).await?;
        let run_id = parse_numeric_path("run_id", &run_id)?;
        with_upstream_timeout(
            state.api.upstream_timeout,
            state
                .upstream
                .list_jobs(&credential, &coordinate.owner, &coordinate.repo, run_id),
        )
        .await
    }
    .await;
    json_or_failure(result, &request_id, "list_jobs")
}

/// `GET /api/repos/:owner/:repo/runs/:run_id/artifacts`
pub(crate) async fn run_artifacts_handler(
    State(state): State<AppState>,
    Path((owner, repo, run_id)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Response {
    let request_id = request_id(&headers);
    let result = async {
        let (credential, coordinate) = guard_and_path(&state, &headers, &owner, &repo).await?;
        let run_id = parse_numeric_path("run_id", &run_id)?;
        with_upstream_timeout(
            state.api.upstream_timeout,
            state.upstream.list_run_artifacts(
                &credential,
                &coordinate.owner,
                &coordinate.repo,
                run_id,
            ),
        )
        .await
    }
    .await;
    json_or_failure(result, &request_id, "list_run_artifacts")
}

/// `GET /api/repos/:owner/:repo/jobs/:job_id/logs` as plain text.
pub(crate) async fn job_logs_handler(
    State(state): State<AppState>,
    Path((owner, repo, job_id)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Response {
    let request_id = request_id(&headers);
    let max_bytes = state.api.max_log_bytes.min(state.reports.max_artifact_bytes);
    let result = async {
        let (credential, coordinate) = guard_and_path(&state, &headers, &owner, &repo).await?;
        let job_id = parse_numeric_path("job_id", &job_id)?;
        with_upstream_timeout(
            state.api.download_timeout,
            state.upstream.job_logs(
                &credential,
                &coordinate.owner,
                &coordinate.repo,
                job_id,
                max_bytes,
            ),
        )
        .await
    }
    .await;
    match result {
        Ok(bytes) => (
            StatusCode::OK,
            [
                ("content-type", "text/plain; charset=utf-8"),
                ("cache-control", "private, no-store"),
            ],
            String::from_utf8_lossy(&bytes).into_owned(),
        )
            .into_response(),
        Err(err) => failure(&err, &request_id, "job_logs"),
    }
}
