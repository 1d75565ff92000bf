// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ApiErrorCode {
    Unauthorized,
    MissingQueryParameter,
    InvalidQueryParameter,
    Forbidden,
    NotFound,
    PayloadTooLarge,
    UpstreamUnavailable,
    Timeout,
    CorruptArchive,
    MissingEntryPoint,
    InvalidState,
    Cancelled,
    Internal,
}

impl ApiErrorCode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::MissingQueryParameter => "missing_query_parameter",
            Self::InvalidQueryParameter => "invalid_query_parameter",
            Self::Forbidden => "forbidden",
            Self::NotFound => "not_found",
            Self::PayloadTooLarge => "payload_too_large",
            Self::UpstreamUnavailable => "upstream_unavailable",
            Self::Timeout => "timeout",
            Self::CorruptArchive => "corrupt_archive",
            Self::MissingEntryPoint => "missing_entry_point",
            Self::InvalidState => "invalid_state",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        }
    }
}

impl Display for ApiErrorCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error body returned by every endpoint.
///
/// `error` carries the human-readable message so callers that only look at
/// `body.error` still get something they can show.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApiError {
    #[serde(rename = "error")]
    pub message: String,
    pub code: ApiErrorCode,
    pub details: Value,
    pub request_id: String,
}

impl ApiError {
    #[must_use]
    pub fn new(
        code: ApiErrorCode,
        message: impl Into<String>,
        details: Value,
        request_id: impl Into<String>,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            details,
            request_id: request_id.into(),
        }
    }

    #[must_use]
    pub fn missing_repo_coordinate() -> Self {
        Self::new(
            ApiErrorCode::MissingQueryParameter,
            "Missing 'owner' or 'repo' query parameter",
            json!({"required": ["owner", "repo"]}),
            "req-unknown",
        )
    }

    #[must_use]
    pub fn invalid_param(name: &str, value: &str, reason: &str) -> Self {
        Self::new(
            ApiErrorCode::InvalidQueryParameter,
            format!("invalid query parameter: {name}"),
            json!({"parameter": name, "value": value, "reason": reason}),
            "req-unknown",
        )
    }

    #[must_use]
    pub fn invalid_path(name: &str, value: &str, reason: &str) -> Self {
        Self::new(
            ApiErrorCode::InvalidQueryParameter,
            format!("invalid path parameter: {name}"),
            json!({"parameter": name, "value": value, "reason": reason}),
            "req-unknown",
        )
    }
}

impl Display for ApiError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}
