// SPDX-License-Identifier: Apache-2.0

use super::Credential;
use crate::error::ReportError;
use crate::AppState;
use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::http::HeaderMap;

pub const SESSION_COOKIE: &str = "runlens_session";

pub(crate) fn session_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let raw = headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
    let (scheme, token) = raw.split_once(' ')?;
    scheme
        .eq_ignore_ascii_case("bearer")
        .then(|| token.trim())
        .filter(|t| !t.is_empty())
}

/// Resolves the caller's credential or rejects the request.
///
/// Runs before any parameter validation or upstream call, so a rejected
/// request never reaches the upstream.
pub async fn require_credential(
    headers: &HeaderMap,
    state: &AppState,
) -> Result<Credential, ReportError> {
    if let Some(session_id) = session_cookie(headers) {
        if let Some(session) = state.sessions.lookup(&session_id).await {
            return Ok(session.credential);
        }
        crate::viewer::expire_sessions(state).await;
    }
    if state.api.allow_bearer_tokens {
        if let Some(token) = bearer_token(headers) {
            return Credential::new(token).ok_or(ReportError::Unauthorized);
        }
    }
    Err(ReportError::Unauthorized)
}
