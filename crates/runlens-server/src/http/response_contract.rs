// SPDX-License-Identifier: Apache-2.0

use crate::error::ReportError;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use runlens_api::{ApiError, ApiErrorCode};

#[must_use]
pub(crate) fn api_error_status(code: ApiErrorCode) -> StatusCode {
    match code {
        ApiErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
        ApiErrorCode::MissingQueryParameter | ApiErrorCode::InvalidQueryParameter => {
            StatusCode::BAD_REQUEST
        }
        ApiErrorCode::Forbidden => StatusCode::FORBIDDEN,
        ApiErrorCode::NotFound => StatusCode::NOT_FOUND,
        ApiErrorCode::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
        ApiErrorCode::InvalidState => StatusCode::CONFLICT,
        // Upstream failures and timeouts are told apart by `code`, not status.
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// The body is the flat error object, so `body.error` is the message string.
#[must_use]
pub(crate) fn api_error_response(status: StatusCode, err: ApiError) -> Response {
    let mut resp = (status, Json(err)).into_response();
    if status == StatusCode::UNAUTHORIZED {
        resp.headers_mut()
            .insert("www-authenticate", HeaderValue::from_static("Bearer"));
    }
    resp
}

#[must_use]
pub(crate) fn report_error_response(err: &ReportError, request_id: &str) -> Response {
    api_error_response(api_error_status(err.code()), err.to_api_error(request_id))
}
