mod support;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use runlens_server::{ApiConfig, FakeUpstream};
use support::{get, open_stream, read_until, run, spawn_server, state_with, OWNER, REPO};
use tempfile::tempdir;

const TOKEN: &str = "gho_events";

fn fast_polling(keepalive: Duration) -> ApiConfig {
    ApiConfig {
        events_poll_interval: Duration::from_millis(50),
        events_keepalive_interval: keepalive,
        ..ApiConfig::default()
    }
}

async fn wait_for_polls(upstream: &FakeUpstream, at_least: u64) {
    for _ in 0..100 {
        if upstream.run_polls.load(Ordering::Relaxed) >= at_least {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("expected at least {at_least} polls");
}

#[tokio::test]
async fn stream_opens_with_connected_and_stays_quiet_while_runs_are_unchanged() {
    let tmp = tempdir().expect("tempdir");
    let upstream = Arc::new(FakeUpstream::default());
    upstream.push_run(OWNER, REPO, run(100)).await;
    let addr = spawn_server(state_with(
        upstream.clone(),
        support::report_config(tmp.path()),
        fast_polling(Duration::from_secs(60)),
    ))
    .await;

    let mut stream = open_stream(
        addr,
        "/api/builds/events?owner=octo&repo=site&lastRunId=100",
        TOKEN,
    )
    .await;
    let mut buf = String::new();
    assert!(read_until(&mut stream, &mut buf, "event: connected", Duration::from_secs(5)).await);
    assert!(buf.starts_with("HTTP/1.1 200"));
    assert!(buf.to_ascii_lowercase().contains("content-type: text/event-stream"));

    wait_for_polls(&upstream, 3).await;
    assert!(!read_until(&mut stream, &mut buf, "event: workflow_run", Duration::from_millis(200)).await);
}

#[tokio::test]
async fn new_run_is_announced_exactly_once() {
    let tmp = tempdir().expect("tempdir");
    let upstream = Arc::new(FakeUpstream::default());
    upstream.push_run(OWNER, REPO, run(100)).await;
    let addr = spawn_server(state_with(
        upstream.clone(),
        support::report_config(tmp.path()),
        fast_polling(Duration::from_secs(60)),
    ))
    .await;

    let mut stream = open_stream(
        addr,
        "/api/builds/events?owner=octo&repo=site&lastRunId=100",
        TOKEN,
    )
    .await;
    let mut buf = String::new();
    assert!(read_until(&mut stream, &mut buf, "event: connected", Duration::from_secs(5)).await);

    upstream.push_run(OWNER, REPO, run(101)).await;
    assert!(read_until(&mut stream, &mut buf, "\"id\":101", Duration::from_secs(5)).await);
    let polls = upstream.run_polls.load(Ordering::Relaxed);
    wait_for_polls(&upstream, polls + 3).await;
    read_until(&mut stream, &mut buf, "never-present", Duration::from_millis(150)).await;

    assert_eq!(buf.matches("event: workflow_run").count(), 1);
    assert!(buf.contains("\"type\":\"workflow_run\""));
    assert!(buf.contains("\"owner\":\"octo\""));
}

#[tokio::test]
async fn stream_without_last_run_id_seeds_from_first_poll() {
    let tmp = tempdir().expect("tempdir");
    let upstream = Arc::new(FakeUpstream::default());
    upstream.push_run(OWNER, REPO, run(7)).await;
    let addr = spawn_server(state_with(
        upstream.clone(),
        support::report_config(tmp.path()),
        fast_polling(Duration::from_secs(60)),
    ))
    .await;

    let mut stream = open_stream(addr, "/api/builds/events?owner=octo&repo=site", TOKEN).await;
    let mut buf = String::new();
    assert!(read_until(&mut stream, &mut buf, "event: connected", Duration::from_secs(5)).await);
    wait_for_polls(&upstream, 2).await;
    assert!(!buf.contains("event: workflow_run"));

    upstream.push_run(OWNER, REPO, run(8)).await;
    assert!(read_until(&mut stream, &mut buf, "\"id\":8", Duration::from_secs(5)).await);
}

#[tokio::test]
async fn upstream_errors_do_not_end_the_stream() {
    let tmp = tempdir().expect("tempdir");
    let upstream = Arc::new(FakeUpstream::default());
    upstream.push_run(OWNER, REPO, run(1)).await;
    *upstream.fail_runs_with.lock().await = Some(502);
    let addr = spawn_server(state_with(
        upstream.clone(),
        support::report_config(tmp.path()),
        fast_polling(Duration::from_secs(60)),
    ))
    .await;

    let mut stream = open_stream(
        addr,
        "/api/builds/events?owner=octo&repo=site&lastRunId=1",
        TOKEN,
    )
    .await;
    let mut buf = String::new();
    assert!(read_until(&mut stream, &mut buf, "event: connected", Duration::from_secs(5)).await);
    wait_for_polls(&upstream, 2).await;

    *upstream.fail_runs_with.lock().await = None;
    upstream.push_run(OWNER, REPO, run(2)).await;
    assert!(read_until(&mut stream, &mut buf, "\"id\":2", Duration::from_secs(5)).await);
}

#[tokio::test]
async fn disconnect_stops_polling() {
    let tmp = tempdir().expect("tempdir");
    let upstream = Arc::new(FakeUpstream::default());
    upstream.push_run(OWNER, REPO, run(1)).await;
    let addr = spawn_server(state_with(
        upstream.clone(),
        support::report_config(tmp.path()),
        fast_polling(Duration::from_millis(40)),
    ))
    .await;

    let mut stream = open_stream(
        addr,
        "/api/builds/events?owner=octo&repo=site&lastRunId=1",
        TOKEN,
    )
    .await;
    let mut buf = String::new();
    assert!(read_until(&mut stream, &mut buf, "event: connected", Duration::from_secs(5)).await);
    wait_for_polls(&upstream, 2).await;
    drop(stream);

    // Keep-alive writes surface the closed socket and the stream is dropped.
    tokio::time::sleep(Duration::from_millis(800)).await;
    let settled = upstream.run_polls.load(Ordering::Relaxed);
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(upstream.run_polls.load(Ordering::Relaxed) <= settled + 1);
}

#[tokio::test]
async fn stream_requires_credential_and_coordinates() {
    let tmp = tempdir().expect("tempdir");
    let upstream = Arc::new(FakeUpstream::default());
    let addr = spawn_server(state_with(
        upstream.clone(),
        support::report_config(tmp.path()),
        ApiConfig::default(),
    ))
    .await;

    let anonymous =
        support::send_raw(addr, "GET", "/api/builds/events?owner=octo&repo=site", &[]).await;
    assert_eq!(anonymous.status, 401);
    assert_eq!(get(addr, "/api/builds/events?owner=octo", TOKEN).await.status, 400);
    let bad_id = get(
        addr,
        "/api/builds/events?owner=octo&repo=site&lastRunId=abc",
        TOKEN,
    )
    .await;
    assert_eq!(bad_id.status, 400);
    assert_eq!(upstream.total_calls(), 0);
}
