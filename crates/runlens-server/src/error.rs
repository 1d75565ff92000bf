// SPDX-License-Identifier: Apache-2.0

use crate::upstream::UpstreamError;
use runlens_api::{ApiError, ApiErrorCode};
use serde_json::{json, Value};
use std::fmt::{Display, Formatter};

/// Failure of any report-pipeline or dashboard operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportError {
    Unauthorized,
    BadRequest(Box<ApiError>),
    NotFound(String),
    Forbidden(String),
    PayloadTooLarge { limit_bytes: u64 },
    /// Extraction bounds crossed while decompressing.
    ExtractionLimit(String),
    UpstreamUnavailable { status: Option<u16>, message: String },
    Timeout,
    CorruptArchive(String),
    MissingEntryPoint(String),
    InvalidState(String),
    Cancelled,
    Internal(String),
}

impl ReportError {
    #[must_use]
    pub fn code(&self) -> ApiErrorCode {
        match self {
            Self::Unauthorized => ApiErrorCode::Unauthorized,
            Self::BadRequest(err) => err.code,
            Self::NotFound(_) => ApiErrorCode::NotFound,
            Self::Forbidden(_) => ApiErrorCode::Forbidden,
            Self::PayloadTooLarge { .. } | Self::ExtractionLimit(_) => {
                ApiErrorCode::PayloadTooLarge
            }
            Self::UpstreamUnavailable { .. } => ApiErrorCode::UpstreamUnavailable,
            Self::Timeout => ApiErrorCode::Timeout,
            Self::CorruptArchive(_) => ApiErrorCode::CorruptArchive,
            Self::MissingEntryPoint(_) => ApiErrorCode::MissingEntryPoint,
            Self::InvalidState(_) => ApiErrorCode::InvalidState,
            Self::Cancelled => ApiErrorCode::Cancelled,
            Self::Internal(_) => ApiErrorCode::Internal,
        }
    }

    /// Message shown to the client in the `error` field.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::Unauthorized => "Unauthorized".to_string(),
            Self::BadRequest(err) => err.message.clone(),
            Self::NotFound(m) => format!("Not found: {m}"),
            Self::Forbidden(m) => format!("Forbidden: {m}"),
            Self::PayloadTooLarge { limit_bytes } => format!(
                "Artifact is too large to process (>{}MB)",
                limit_bytes / (1024 * 1024)
            ),
            Self::ExtractionLimit(m) => format!("Artifact is too large to process: {m}"),
            Self::UpstreamUnavailable { .. } => "Upstream service unavailable".to_string(),
            Self::Timeout => "Upstream request timed out".to_string(),
            Self::CorruptArchive(_) | Self::MissingEntryPoint(_) | Self::Internal(_) => {
                "Failed to process artifact".to_string()
            }
            Self::InvalidState(m) => m.clone(),
            Self::Cancelled => "Report loading was cancelled".to_string(),
        }
    }

    #[must_use]
    pub fn details(&self) -> Value {
        match self {
            Self::BadRequest(err) => err.details.clone(),
            Self::PayloadTooLarge { limit_bytes } => json!({"limit_bytes": limit_bytes}),
            Self::UpstreamUnavailable { status, message } => {
                json!({"upstream_status": status, "reason": message})
            }
            Self::CorruptArchive(m) | Self::MissingEntryPoint(m) | Self::ExtractionLimit(m) => {
                json!({"reason": m})
            }
            _ => json!({}),
        }
    }

    #[must_use]
    pub fn to_api_error(&self, request_id: &str) -> ApiError {
        ApiError::new(self.code(), self.message(), self.details(), request_id)
    }

    #[must_use]
    pub fn is_server_fault(&self) -> bool {
        matches!(
            self,
            Self::UpstreamUnavailable { .. }
                | Self::Timeout
                | Self::CorruptArchive(_)
                | Self::MissingEntryPoint(_)
                | Self::Internal(_)
        )
    }
}

impl Display for ReportError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CorruptArchive(m) => write!(f, "corrupt archive: {m}"),
            Self::MissingEntryPoint(m) => write!(f, "missing entry point: {m}"),
            Self::Internal(m) => write!(f, "internal error: {m}"),
            Self::UpstreamUnavailable {
                status: Some(s),
                message,
            } => write!(f, "upstream unavailable ({s}): {message}"),
            Self::UpstreamUnavailable { message, .. } => {
                write!(f, "upstream unavailable: {message}")
            }
            other => write!(f, "{}", other.message()),
        }
    }
}

impl std::error::Error for ReportError {}

impl From<ApiError> for ReportError {
    fn from(err: ApiError) -> Self {
        Self::BadRequest(Box::new(err))
    }
}

impl From<UpstreamError> for ReportError {
    fn from(err: UpstreamError) -> Self {
        match err {
            UpstreamError::Unauthorized => Self::Unauthorized,
            UpstreamError::Forbidden(m) => Self::Forbidden(m),
            UpstreamError::NotFound(m) => Self::NotFound(m),
            UpstreamError::Status { status, message } => Self::UpstreamUnavailable {
                status: Some(status),
                message,
            },
            UpstreamError::Timeout => Self::Timeout,
            UpstreamError::Transport(m) | UpstreamError::Decode(m) => Self::UpstreamUnavailable {
                status: None,
                message: m,
            },
            UpstreamError::TooLarge { limit_bytes } => Self::PayloadTooLarge { limit_bytes },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_ceiling_message_is_in_megabytes() {
        let err = ReportError::PayloadTooLarge {
            limit_bytes: 100 * 1024 * 1024,
        };
        assert_eq!(err.message(), "Artifact is too large to process (>100MB)");
        assert_eq!(err.code(), ApiErrorCode::PayloadTooLarge);
    }

    #[test]
    fn processing_failures_share_one_client_message() {
        for err in [
            ReportError::CorruptArchive("bad header".to_string()),
            ReportError::MissingEntryPoint("index.html".to_string()),
            ReportError::Internal("disk full".to_string()),
        ] {
            assert_eq!(err.message(), "Failed to process artifact");
            assert!(err.is_server_fault());
        }
    }

    #[test]
    fn upstream_errors_map_onto_report_errors() {
        assert_eq!(
            ReportError::from(UpstreamError::Unauthorized),
            ReportError::Unauthorized
        );
        assert_eq!(
            ReportError::from(UpstreamError::TooLarge { limit_bytes: 5 }),
            ReportError::PayloadTooLarge { limit_bytes: 5 }
        );
    }
}
