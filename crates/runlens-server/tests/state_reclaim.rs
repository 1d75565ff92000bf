mod support;

use std::sync::Arc;
use std::time::Duration;

use runlens_server::{
    spawn_viewer_reaper, ApiConfig, AppState, AuthConfig, Credential, FakeUpstream, ReportConfig,
};
use serde_json::json;
use support::{get, post, report_zip, send_raw, spawn_server, OWNER, REPO};
use tempfile::{tempdir, TempDir};

const TOKEN: &str = "gho_reclaim";

async fn state_for(
    reports: impl FnOnce(&TempDir) -> ReportConfig,
    session_ttl: Duration,
) -> (TempDir, AppState) {
    let tmp = tempdir().expect("tempdir");
    let upstream = Arc::new(FakeUpstream::default());
    upstream
        .insert_artifact(OWNER, REPO, 70, "playwright-report", report_zip())
        .await;
    let state = AppState::with_config(
        upstream,
        None,
        ApiConfig::default(),
        reports(&tmp),
        AuthConfig {
            session_ttl,
            cookie_secure: false,
            ..AuthConfig::default()
        },
    );
    (tmp, state)
}

async fn signed_in_cookie(state: &AppState) -> String {
    let session_id = state
        .sessions
        .create(
            Credential::new(TOKEN).expect("credential"),
            Some("octocat".to_string()),
        )
        .await;
    format!("runlens_session={session_id}")
}

#[tokio::test]
async fn expired_session_releases_what_it_opened_on_next_request() {
    let (_tmp, state) =
        state_for(|t| support::report_config(t.path()), Duration::from_millis(200)).await;
    let addr = spawn_server(state.clone()).await;
    let cookie = signed_in_cookie(&state).await;
    let with_cookie = [("Cookie", cookie.as_str())];

    let cached = send_raw(
        addr,
        "POST",
        "/reports/70/viewers?owner=octo&repo=site&strategy=cache",
        &with_cookie,
    )
    .await;
    assert_eq!(cached.status, 201);
    let persisted = send_raw(addr, "GET", "/artifacts/70?owner=octo&repo=site", &with_cookie).await;
    assert_eq!(persisted.status, 200);
    assert_eq!(state.report_cache.len().await, 1);
    assert_eq!(state.viewers.len(), 1);
    assert_eq!(state.grants.len(), 1);

    tokio::time::sleep(Duration::from_millis(300)).await;
    let session = send_raw(addr, "GET", "/api/session", &with_cookie).await;
    assert_eq!(session.json(), json!({"authenticated": false}));

    assert_eq!(state.report_cache.len().await, 0);
    assert!(state.report_cache.cache_names().await.is_empty());
    assert!(state.viewers.is_empty());
    assert!(state.grants.is_empty());
    assert_eq!(state.sessions.len().await, 0);
    assert_eq!(
        send_raw(addr, "GET", "/report/70/styles.css", &with_cookie).await.status,
        401
    );
}

#[tokio::test]
async fn reaper_expires_sessions_without_further_requests() {
    let (_tmp, state) =
        state_for(|t| support::report_config(t.path()), Duration::from_millis(200)).await;
    let addr = spawn_server(state.clone()).await;
    let cookie = signed_in_cookie(&state).await;
    let with_cookie = [("Cookie", cookie.as_str())];

    for strategy in ["cache", "blob"] {
        let created = send_raw(
            addr,
            "POST",
            &format!("/reports/70/viewers?owner=octo&repo=site&strategy={strategy}"),
            &with_cookie,
        )
        .await;
        assert_eq!(created.status, 201, "{strategy}");
    }
    assert_eq!(state.viewers.len(), 2);
    assert_eq!(state.blobs.len().await, 3);

    let reaper = spawn_viewer_reaper(state.clone(), Duration::from_millis(25));
    tokio::time::sleep(Duration::from_millis(450)).await;
    reaper.abort();

    assert!(state.viewers.is_empty());
    assert_eq!(state.report_cache.len().await, 0);
    assert_eq!(state.blobs.len().await, 0);
    assert_eq!(state.sessions.len().await, 0);
}

#[tokio::test]
async fn idle_bearer_viewers_are_reaped() {
    let (_tmp, state) = state_for(
        |t| ReportConfig {
            viewer_idle_ttl: Duration::from_millis(300),
            ..support::report_config(t.path())
        },
        Duration::from_secs(60),
    )
    .await;
    let addr = spawn_server(state.clone()).await;

    let created = post(addr, "/reports/70/viewers?owner=octo&repo=site&strategy=blob", TOKEN).await;
    assert_eq!(created.status, 201);
    let id = created.json()["viewer_id"]
        .as_str()
        .expect("viewer id")
        .to_string();
    assert_eq!(get(addr, "/artifacts/70?owner=octo&repo=site", TOKEN).await.status, 200);
    assert_eq!(state.blobs.len().await, 3);

    let reaper = spawn_viewer_reaper(state.clone(), Duration::from_millis(20));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(get(addr, &format!("/reports/viewers/{id}"), TOKEN).await.status, 200);

    tokio::time::sleep(Duration::from_millis(800)).await;
    reaper.abort();
    assert!(state.viewers.is_empty());
    assert_eq!(state.blobs.len().await, 0);
    assert!(state.grants.is_empty());
    assert_eq!(get(addr, &format!("/reports/viewers/{id}"), TOKEN).await.status, 404);
}
