// SPDX-License-Identifier: Apache-2.0

use crate::auth::{session_cookie, SESSION_COOKIE};
use crate::error::ReportError;
use crate::http::request_tracing::request_id;
use crate::http::response_contract::report_error_response;
use crate::viewer::{expire_sessions, release_credential_state};
use crate::AppState;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use runlens_api::SessionResponse;
use std::collections::BTreeMap;
use tracing::{info, warn};

fn session_cookie_header(state: &AppState, value: &str, max_age_secs: u64) -> Option<HeaderValue> {
    let secure = if state.auth.cookie_secure { "; Secure" } else { "" };
    HeaderValue::from_str(&format!(
        "{SESSION_COOKIE}={value}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age_secs}{secure}"
    ))
    .ok()
}

fn redirect(location: &str) -> Response {
    match HeaderValue::from_str(location) {
        Ok(value) => (StatusCode::FOUND, [(header::LOCATION, value)]).into_response(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

/// `GET /auth/login`
pub(crate) async fn login_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let request_id = request_id(&headers);
    let Some(identity) = state.identity.clone() else {
        return report_error_response(
            &ReportError::NotFound("sign-in is not configured".to_string()),
            &request_id,
        );
    };
    let oauth_state = state.sessions.issue_state().await;
    match identity.authorize_url(&oauth_state) {
        Ok(url) => redirect(&url),
        Err(err) => {
            warn!(request_id = %request_id, error = %err, "authorize url construction failed");
            report_error_response(&ReportError::from(err), &request_id)
        }
    }
}

/// `GET /auth/callback?code=&state=`
pub(crate) async fn callback_handler(
    State(state): State<AppState>,
    Query(params): Query<BTreeMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let request_id = request_id(&headers);
    let Some(identity) = state.identity.clone() else {
        return report_error_response(
            &ReportError::NotFound("sign-in is not configured".to_string()),
            &request_id,
        );
    };
    let (Some(code), Some(oauth_state)) = (params.get("code"), params.get("state")) else {
        return report_error_response(&ReportError::Unauthorized, &request_id);
    };
    if !state.sessions.consume_state(oauth_state).await {
        warn!(request_id = %request_id, "sign-in callback with unknown state");
        return report_error_response(&ReportError::Unauthorized, &request_id);
    }
    let credential = match identity.exchange_code(code).await {
        Ok(c) => c,
        Err(err) => {
            warn!(request_id = %request_id, error = %err, "oauth code exchange failed");
            return report_error_response(&ReportError::from(err), &request_id);
        }
    };
    let login = match tokio::time::timeout(
        state.api.upstream_timeout,
        state.upstream.current_user(&credential),
    )
    .await
    {
        Ok(Ok(account)) => Some(account.login),
        Ok(Err(err)) => return report_error_response(&ReportError::from(err), &request_id),
        Err(_) => {
            warn!(request_id = %request_id, "user lookup timed out after sign-in");
            None
        }
    };
    info!(
        request_id = %request_id,
        login = login.as_deref().unwrap_or("unknown"),
        credential = credential.fingerprint(),
        "signed in"
    );
    expire_sessions(&state).await;
    let session_id = state.sessions.create(credential, login).await;
    let mut resp = redirect(&state.auth.post_login_redirect);
    if let Some(cookie) =
        session_cookie_header(&state, &session_id, state.auth.session_ttl.as_secs())
    {
        resp.headers_mut().insert(header::SET_COOKIE, cookie);
    }
    resp
}

/// `POST /auth/logout`: drops the session and everything opened under it.
pub(crate) async fn logout_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(session_id) = session_cookie(&headers) {
        if let Some(session) = state.sessions.remove(&session_id).await {
            let fingerprint = session.credential.fingerprint();
            let closed = if state.sessions.holds_fingerprint(fingerprint).await {
                0
            } else {
                release_credential_state(&state, fingerprint).await
            };
            info!(request_id = %request_id(&headers), closed_viewers = closed, "signed out");
        }
    }
    let mut resp = StatusCode::NO_CONTENT.into_response();
    if let Some(cookie) = session_cookie_header(&state, "", 0) {
        resp.headers_mut().insert(header::SET_COOKIE, cookie);
    }
    resp
}

/// `GET /api/session`
pub(crate) async fn session_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Response {
    let session = match session_cookie(&headers) {
        Some(id) => {
            let session = state.sessions.lookup(&id).await;
            if session.is_none() {
                expire_sessions(&state).await;
            }
            session
        }
        None => None,
    };
    let body = SessionResponse {
        authenticated: session.is_some(),
        login: session.and_then(|s| s.login),
    };
    let mut resp = Json(body).into_response();
    resp.headers_mut()
        .insert("cache-control", HeaderValue::from_static("no-store"));
    resp
}
