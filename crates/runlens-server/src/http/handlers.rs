// SPDX-License-Identifier: Apache-2.0

use crate::materialize::{is_compressible, ReportAsset};
use crate::{AppState, CRATE_NAME};
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use brotli::CompressorWriter;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::json;
use std::io::Write;
use std::sync::atomic::Ordering;

pub(crate) async fn healthz_handler() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

pub(crate) async fn readyz_handler(State(state): State<AppState>) -> impl IntoResponse {
    if state.ready.load(Ordering::Relaxed) {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not-ready")
    }
}

pub(crate) async fn version_handler(State(state): State<AppState>) -> impl IntoResponse {
    let payload = json!({
        "server": {
            "crate": CRATE_NAME,
            "version": env!("CARGO_PKG_VERSION"),
            "config_schema_version": crate::config::CONFIG_SCHEMA_VERSION,
            "upstream": state.upstream.backend_tag(),
        },
        "reports": {
            "max_artifact_bytes": state.reports.max_artifact_bytes,
            "default_strategy": state.reports.default_viewer_strategy,
        }
    });
    let mut response = Json(payload).into_response();
    response
        .headers_mut()
        .insert("cache-control", HeaderValue::from_static("public, max-age=30"));
    response
}

pub(crate) async fn openapi_handler() -> impl IntoResponse {
    Json(runlens_api::openapi_v1_spec())
}

pub(crate) fn accepted_encoding(headers: &HeaderMap) -> Option<&'static str> {
    let accept = headers
        .get("accept-encoding")
        .and_then(|v| v.to_str().ok())?;
    if accept.contains("br") {
        Some("br")
    } else if accept.contains("gzip") {
        Some("gzip")
    } else {
        None
    }
}

pub(crate) fn maybe_compress(
    headers: &HeaderMap,
    state: &AppState,
    bytes: &[u8],
) -> std::io::Result<Option<(Vec<u8>, &'static str)>> {
    if !state.api.enable_response_compression || bytes.len() < state.api.compression_min_bytes {
        return Ok(None);
    }
    match accepted_encoding(headers) {
        Some("gzip") => {
            let mut encoder = GzEncoder::new(
                Vec::with_capacity((bytes.len() / 2).max(256)),
                Compression::fast(),
            );
            encoder.write_all(bytes)?;
            Ok(Some((encoder.finish()?, "gzip")))
        }
        Some("br") => {
            let mut compressed = Vec::with_capacity((bytes.len() / 2).max(256));
            {
                let mut writer = CompressorWriter::new(&mut compressed, 4096, 4, 22);
                writer.write_all(bytes)?;
            }
            Ok(Some((compressed, "br")))
        }
        _ => Ok(None),
    }
}

/// Serves one report asset with its content type, compressing text-like
/// bodies when the client accepts it.
pub(crate) fn asset_response(
    headers: &HeaderMap,
    state: &AppState,
    asset: ReportAsset,
    cache_control: &'static str,
) -> Response {
    let compressed = if is_compressible(asset.content_type) {
        match maybe_compress(headers, state, &asset.body) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "response compression failed; serving identity");
                None
            }
        }
    } else {
        None
    };
    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header("content-type", asset.content_type)
        .header("cache-control", cache_control)
        .header("x-content-type-options", "nosniff");
    let body = match compressed {
        Some((bytes, encoding)) => {
            builder = builder
                .header("content-encoding", encoding)
                .header("vary", "accept-encoding");
            Body::from(bytes)
        }
        None => Body::from(asset.body),
    };
    builder
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn brotli_is_preferred_over_gzip() {
        let mut headers = HeaderMap::new();
        headers.insert("accept-encoding", HeaderValue::from_static("gzip, br"));
        assert_eq!(accepted_encoding(&headers), Some("br"));
        headers.insert("accept-encoding", HeaderValue::from_static("gzip"));
        assert_eq!(accepted_encoding(&headers), Some("gzip"));
        headers.insert("accept-encoding", HeaderValue::from_static("identity"));
        assert_eq!(accepted_encoding(&headers), None);
    }
}
