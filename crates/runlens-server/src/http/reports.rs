// SPDX-License-Identifier: Apache-2.0

use crate::auth::{require_credential, Credential};
use crate::error::ReportError;
use crate::http::handlers::asset_response;
use crate::http::request_tracing::request_id;
use crate::http::response_contract::report_error_response;
use crate::materialize::{blob_id, content_type_for_path, document_asset, CacheKey, ReportAsset};
use crate::pipeline::ReportResources;
use crate::viewer::{close_viewer, frame_document, load_viewer, ViewerSession};
use crate::AppState;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use runlens_api::params::{parse_artifact_id_path, parse_viewer_query};
use std::collections::BTreeMap;

const CACHE_ASSET_CONTROL: &str = "private, no-cache";
const BLOB_ASSET_CONTROL: &str = "private, max-age=3600, immutable";
const PERSISTED_ASSET_CONTROL: &str = "private, max-age=300";

async fn guarded(headers: &HeaderMap, state: &AppState) -> Result<Credential, Response> {
    require_credential(headers, state)
        .await
        .map_err(|err| report_error_response(&err, &request_id(headers)))
}

fn lookup_viewer(
    state: &AppState,
    viewer_id: &str,
    credential: &Credential,
) -> Result<ViewerSession, ReportError> {
    state
        .viewers
        .get(viewer_id, credential.fingerprint())
        .ok_or_else(|| ReportError::NotFound(format!("viewer {viewer_id}")))
}

fn viewer_snapshot(
    state: &AppState,
    viewer_id: &str,
    credential: &Credential,
    status: StatusCode,
    request_id: &str,
) -> Response {
    match lookup_viewer(state, viewer_id, credential) {
        Ok(viewer) => (status, Json(viewer.to_response())).into_response(),
        Err(err) => report_error_response(&err, request_id),
    }
}

/// `POST /reports/:artifact_id/viewers?owner=&repo=[&strategy=]`
///
/// The load runs inside this request; the response carries the viewer in its
/// settled state.
pub(crate) async fn create_viewer_handler(
    State(state): State<AppState>,
    Path(artifact_id): Path<String>,
    Query(params): Query<BTreeMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let request_id = request_id(&headers);
    let credential = match guarded(&headers, &state).await {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let query = match parse_viewer_query(
        &artifact_id,
        &params,
        state.reports.default_viewer_strategy,
    ) {
        Ok(q) => q,
        Err(err) => return report_error_response(&ReportError::from(err), &request_id),
    };
    let (viewer_id, generation) = state.viewers.open(
        query.artifact.clone(),
        query.strategy,
        credential.fingerprint(),
    );
    tracing::info!(
        request_id = %request_id,
        viewer_id = %viewer_id,
        artifact_id = %query.artifact.id,
        strategy = %query.strategy,
        "report viewer opened"
    );
    load_viewer(
        state.clone(),
        viewer_id.clone(),
        generation,
        query.artifact,
        query.strategy,
        credential.clone(),
    )
    .await;
    viewer_snapshot(&state, &viewer_id, &credential, StatusCode::CREATED, &request_id)
}

/// `GET /reports/viewers/:viewer_id`
pub(crate) async fn get_viewer_handler(
    State(state): State<AppState>,
    Path(viewer_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let credential = match guarded(&headers, &state).await {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    viewer_snapshot(
        &state,
        &viewer_id,
        &credential,
        StatusCode::OK,
        &request_id(&headers),
    )
}

/// `POST /reports/viewers/:viewer_id/retry`
pub(crate) async fn retry_viewer_handler(
    State(state): State<AppState>,
    Path(viewer_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let request_id = request_id(&headers);
    let credential = match guarded(&headers, &state).await {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let viewer = match state.viewers.begin_retry(&viewer_id, credential.fingerprint()) {
        Ok(v) => v,
        Err(err) => return report_error_response(&err, &request_id),
    };
    tracing::info!(
        request_id = %request_id,
        viewer_id = %viewer_id,
        generation = viewer.generation(),
        "report viewer retry"
    );
    load_viewer(
        state.clone(),
        viewer.id.clone(),
        viewer.generation(),
        viewer.artifact.clone(),
        viewer.strategy,
        credential.clone(),
    )
    .await;
    viewer_snapshot(&state, &viewer_id, &credential, StatusCode::OK, &request_id)
}

/// `DELETE /reports/viewers/:viewer_id`
pub(crate) async fn close_viewer_handler(
    State(state): State<AppState>,
    Path(viewer_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let credential = match guarded(&headers, &state).await {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match state.viewers.close(&viewer_id, credential.fingerprint()) {
        Some(viewer) => {
            close_viewer(&state, viewer).await;
            StatusCode::NO_CONTENT.into_response()
        }
        None => report_error_response(
            &ReportError::NotFound(format!("viewer {viewer_id}")),
            &request_id(&headers),
        ),
    }
}

/// `GET /reports/viewers/:viewer_id/frame`
pub(crate) async fn viewer_frame_handler(
    State(state): State<AppState>,
    Path(viewer_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let request_id = request_id(&headers);
    let credential = match guarded(&headers, &state).await {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let viewer = match lookup_viewer(&state, &viewer_id, &credential) {
        Ok(v) => v,
        Err(err) => return report_error_response(&err, &request_id),
    };
    match viewer.ready_report() {
        Some(report) => {
            let mut resp = Html(frame_document(&report.entry_url)).into_response();
            resp.headers_mut()
                .insert("cache-control", HeaderValue::from_static("no-store"));
            resp
        }
        None => report_error_response(
            &ReportError::InvalidState("report is not ready".to_string()),
            &request_id,
        ),
    }
}

/// `GET /reports/viewers/:viewer_id/document`: rewritten entry document of a
/// blob-strategy viewer.
pub(crate) async fn viewer_document_handler(
    State(state): State<AppState>,
    Path(viewer_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let request_id = request_id(&headers);
    let credential = match guarded(&headers, &state).await {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let viewer = match lookup_viewer(&state, &viewer_id, &credential) {
        Ok(v) => v,
        Err(err) => return report_error_response(&err, &request_id),
    };
    match viewer.ready_report().map(|r| &r.resources) {
        Some(ReportResources::Blobs { document, .. }) => {
            asset_response(&headers, &state, document_asset(document), "private, no-store")
        }
        Some(_) => report_error_response(
            &ReportError::NotFound(format!("viewer {viewer_id} has no rewritten document")),
            &request_id,
        ),
        None => report_error_response(
            &ReportError::InvalidState("report is not ready".to_string()),
            &request_id,
        ),
    }
}

/// `GET /reports/viewers/:viewer_id/*path`: archive files of a blob-strategy
/// viewer, addressed relative to its document.
///
/// References the document rewrite cannot see (inline styles, URLs built by
/// scripts) resolve against the document URL and land here.
pub(crate) async fn viewer_asset_handler(
    State(state): State<AppState>,
    Path((viewer_id, path)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    let request_id = request_id(&headers);
    let credential = match guarded(&headers, &state).await {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let viewer = match lookup_viewer(&state, &viewer_id, &credential) {
        Ok(v) => v,
        Err(err) => return report_error_response(&err, &request_id),
    };
    let not_found = || {
        report_error_response(
            &ReportError::NotFound(format!("report asset {path}")),
            &request_id,
        )
    };
    let Some(ReportResources::Blobs { addresses, .. }) = viewer.ready_report().map(|r| &r.resources)
    else {
        return not_found();
    };
    let Some(id) = addresses
        .get(path.trim_start_matches("./"))
        .and_then(|address| blob_id(address))
    else {
        return not_found();
    };
    match state.blobs.get(id, credential.fingerprint()).await {
        Some(asset) => asset_response(&headers, &state, asset, CACHE_ASSET_CONTROL),
        None => not_found(),
    }
}

/// `GET /report/:artifact_id/*path`: the interception route backing the
/// cache strategy. Only the credential that filled the cache can read it.
pub(crate) async fn cached_asset_handler(
    State(state): State<AppState>,
    Path((artifact_id, path)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    let request_id = request_id(&headers);
    let credential = match guarded(&headers, &state).await {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let artifact_id = match parse_artifact_id_path(&artifact_id) {
        Ok(id) => id,
        Err(err) => return report_error_response(&ReportError::from(err), &request_id),
    };
    let key = CacheKey {
        fingerprint: credential.fingerprint().to_string(),
        artifact_id,
    };
    match state.report_cache.match_asset(&key, &path).await {
        Some(asset) => asset_response(&headers, &state, asset, CACHE_ASSET_CONTROL),
        None => report_error_response(
            &ReportError::NotFound(format!("report asset {path}")),
            &request_id,
        ),
    }
}

/// `GET /blobs/:blob_id`
pub(crate) async fn blob_handler(
    State(state): State<AppState>,
    Path(blob_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let credential = match guarded(&headers, &state).await {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match state.blobs.get(&blob_id, credential.fingerprint()).await {
        Some(asset) => asset_response(&headers, &state, asset, BLOB_ASSET_CONTROL),
        None => report_error_response(
            &ReportError::NotFound("blob address revoked or unknown".to_string()),
            &request_id(&headers),
        ),
    }
}

/// `GET /playwright-reports/:artifact_id/*path`: files of a persisted report,
/// readable by credentials that resolved the artifact upstream.
pub(crate) async fn persisted_asset_handler(
    State(state): State<AppState>,
    Path((artifact_id, path)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    let request_id = request_id(&headers);
    let credential = match guarded(&headers, &state).await {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let artifact_id = match parse_artifact_id_path(&artifact_id) {
        Ok(id) => id,
        Err(err) => return report_error_response(&ReportError::from(err), &request_id),
    };
    let not_found = || {
        report_error_response(
            &ReportError::NotFound(format!("report file {path}")),
            &request_id,
        )
    };
    if !state.grants.is_granted(artifact_id, credential.fingerprint()) {
        return not_found();
    }
    let Some(file) = state.persisted.resolve_file(artifact_id, &path) else {
        return not_found();
    };
    match tokio::fs::read(&file).await {
        Ok(bytes) => asset_response(
            &headers,
            &state,
            ReportAsset {
                body: Bytes::from(bytes),
                content_type: content_type_for_path(&path),
            },
            PERSISTED_ASSET_CONTROL,
        ),
        Err(e) => {
            tracing::warn!(request_id = %request_id, artifact_id = %artifact_id, error = %e, "persisted report read failed");
            not_found()
        }
    }
}
