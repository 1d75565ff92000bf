// SPDX-License-Identifier: Apache-2.0

use crate::errors::ApiErrorCode;
use crate::params::ReportStrategy;
use runlens_model::WorkflowRun;
use serde::{Deserialize, Serialize};

/// Redirect-style payload pointing at a served report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportUrlResponse {
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewerStateName {
    Loading,
    Ready,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewerFailure {
    pub code: ApiErrorCode,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewerResponse {
    pub viewer_id: String,
    pub artifact_id: u64,
    pub owner: String,
    pub repo: String,
    pub strategy: ReportStrategy,
    pub state: ViewerStateName,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<ViewerFailure>,
    pub retry_allowed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionResponse {
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub login: Option<String>,
}

/// Payload carried in the `data:` line of a build-event frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BuildEvent {
    Connected,
    WorkflowRun {
        owner: String,
        repo: String,
        run: WorkflowRun,
    },
}

impl BuildEvent {
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::WorkflowRun { .. } => "workflow_run",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_event_is_tagged_by_type() {
        let value = serde_json::to_value(BuildEvent::Connected).expect("serialize");
        assert_eq!(value, serde_json::json!({"type": "connected"}));
        assert_eq!(BuildEvent::Connected.event_name(), "connected");
    }
}
