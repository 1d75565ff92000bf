// SPDX-License-Identifier: Apache-2.0

use crate::AppState;
use axum::http::HeaderMap;

pub(crate) const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RequestTrace {
    pub request_id: String,
    pub correlation_id: Option<String>,
}

fn header_text(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty() && v.len() <= 128)
        .map(ToString::to_string)
}

#[must_use]
pub(crate) fn extract_request_trace(headers: &HeaderMap, state: &AppState) -> RequestTrace {
    let request_id = header_text(headers, REQUEST_ID_HEADER).unwrap_or_else(|| {
        let id = state
            .request_id_seed
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        format!("req-{id:016x}")
    });
    RequestTrace {
        request_id,
        correlation_id: header_text(headers, "x-correlation-id"),
    }
}

/// Request id as assigned by the tracing middleware.
#[must_use]
pub(crate) fn request_id(headers: &HeaderMap) -> String {
    header_text(headers, REQUEST_ID_HEADER).unwrap_or_else(|| "req-unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use std::sync::Arc;

    #[test]
    fn propagates_or_generates_request_ids() {
        let state = crate::AppState::new(
            Arc::new(crate::FakeUpstream::default()),
            crate::ReportConfig::default(),
        );
        let mut headers = HeaderMap::new();
        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_static("req-abc"));
        headers.insert("x-correlation-id", HeaderValue::from_static("corr-1"));
        let trace = extract_request_trace(&headers, &state);
        assert_eq!(trace.request_id, "req-abc");
        assert_eq!(trace.correlation_id.as_deref(), Some("corr-1"));

        let generated = extract_request_trace(&HeaderMap::new(), &state);
        assert!(generated.request_id.starts_with("req-"));
        assert_eq!(generated.request_id.len(), 20);
    }
}
