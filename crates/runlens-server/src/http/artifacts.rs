// SPDX-License-Identifier: Apache-2.0

use crate::artifacts;
use crate::auth::require_credential;
use crate::error::ReportError;
use crate::http::request_tracing::request_id;
use crate::http::response_contract::report_error_response;
use crate::pipeline::{self, persist_report};
use crate::AppState;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use runlens_api::params::parse_artifact_query;
use runlens_api::{ArtifactFormat, ReportUrlResponse};
use runlens_model::ArtifactRef;
use std::collections::BTreeMap;
use tracing::{error, info, warn};

const FALLBACK_ARCHIVE_NAME: &str = "playwright-report";

/// File name safe to place in a quoted `Content-Disposition` parameter.
pub(crate) fn attachment_name(artifact_name: &str) -> String {
    let cleaned: String = artifact_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches(|c| c == '.' || c == '_');
    let stem = if cleaned.is_empty() {
        FALLBACK_ARCHIVE_NAME
    } else {
        cleaned
    };
    if stem.to_ascii_lowercase().ends_with(".zip") {
        stem.to_string()
    } else {
        format!("{stem}.zip")
    }
}

pub(crate) fn log_report_failure(
    err: &ReportError,
    request_id: &str,
    artifact: &ArtifactRef,
    operation: &'static str,
) {
    if err.is_server_fault() {
        error!(
            request_id,
            artifact_id = %artifact.id,
            owner = %artifact.owner,
            repo = %artifact.repo,
            code = %err.code(),
            error = %err,
            operation,
            "artifact request failed"
        );
    } else {
        warn!(
            request_id,
            artifact_id = %artifact.id,
            owner = %artifact.owner,
            repo = %artifact.repo,
            code = %err.code(),
            error = %err,
            operation,
            "artifact request rejected"
        );
    }
}

/// `GET /artifacts/:artifact_id?owner=&repo=[&format=extract|zip]`
pub(crate) async fn artifact_handler(
    State(state): State<AppState>,
    Path(artifact_id): Path<String>,
    Query(params): Query<BTreeMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let request_id = request_id(&headers);
    let credential = match require_credential(&headers, &state).await {
        Ok(c) => c,
        Err(err) => return report_error_response(&err, &request_id),
    };
    let query = match parse_artifact_query(&artifact_id, &params) {
        Ok(q) => q,
        Err(err) => return report_error_response(&ReportError::from(err), &request_id),
    };
    let artifact = query.artifact;
    let format = query
        .format
        .unwrap_or(state.reports.default_artifact_format);

    match format {
        ArtifactFormat::Extract => match persist_report(&state, &artifact, &credential).await {
            Ok(url) => {
                info!(request_id = %request_id, artifact_id = %artifact.id, url = %url, "report url issued");
                (StatusCode::OK, Json(ReportUrlResponse { url })).into_response()
            }
            Err(err) => {
                log_report_failure(&err, &request_id, &artifact, "extract");
                report_error_response(&err, &request_id)
            }
        },
        ArtifactFormat::Zip => {
            let limits = pipeline::fetch_limits(&state);
            match artifacts::resolve_and_fetch(
                state.upstream.as_ref(),
                &artifact,
                &credential,
                &limits,
            )
            .await
            {
                Ok(fetched) => {
                    let disposition = format!(
                        "attachment; filename=\"{}\"",
                        attachment_name(&fetched.metadata.name)
                    );
                    Response::builder()
                        .status(StatusCode::OK)
                        .header("content-type", "application/zip")
                        .header("content-disposition", disposition)
                        .header("cache-control", "private, no-store")
                        .body(Body::from(fetched.bytes))
                        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
                }
                Err(err) => {
                    log_report_failure(&err, &request_id, &artifact, "zip");
                    report_error_response(&err, &request_id)
                }
            }
        }
    }
}
