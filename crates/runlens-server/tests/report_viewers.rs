mod support;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use runlens_server::{ApiConfig, AppState, FakeUpstream};
use serde_json::{json, Value};
use support::{delete, get, post, report_zip, spawn_server, state_with, zip_of, OWNER, REPO};
use tempfile::{tempdir, TempDir};

const TOKEN: &str = "gho_viewer";

async fn setup(artifact_id: u64, archive: Vec<u8>) -> (TempDir, Arc<FakeUpstream>, AppState) {
    let tmp = tempdir().expect("tempdir");
    let upstream = Arc::new(FakeUpstream::default());
    upstream
        .insert_artifact(OWNER, REPO, artifact_id, "playwright-report", archive)
        .await;
    let state = state_with(
        upstream.clone(),
        support::report_config(tmp.path()),
        ApiConfig::default(),
    );
    (tmp, upstream, state)
}

fn viewer_id(body: &Value) -> String {
    body["viewer_id"].as_str().expect("viewer id").to_string()
}

#[tokio::test]
async fn cache_strategy_serves_from_named_cache_until_closed() {
    let (_tmp, _upstream, state) = setup(60, report_zip()).await;
    let addr = spawn_server(state.clone()).await;

    let created = post(addr, "/reports/60/viewers?owner=octo&repo=site&strategy=cache", TOKEN).await;
    assert_eq!(created.status, 201);
    let body = created.json();
    assert_eq!(body["state"], json!("ready"));
    assert_eq!(body["strategy"], json!("cache"));
    assert_eq!(body["entry_url"], json!("/report/60/index.html"));
    assert_eq!(body["retry_allowed"], json!(false));
    let id = viewer_id(&body);
    assert_eq!(state.report_cache.cache_names().await, vec!["report-60".to_string()]);

    let css = get(addr, "/report/60/styles.css", TOKEN).await;
    assert_eq!(css.status, 200);
    assert_eq!(
        css.header("content-type").as_deref(),
        Some("text/css; charset=utf-8")
    );
    assert_eq!(css.text(), "body { margin: 0; }");

    // Another credential never sees this cache.
    assert_eq!(get(addr, "/report/60/styles.css", "gho_other").await.status, 404);
    assert_eq!(
        get(addr, &format!("/reports/viewers/{id}"), "gho_other").await.status,
        404
    );

    let frame = get(addr, &format!("/reports/viewers/{id}/frame"), TOKEN).await;
    assert_eq!(frame.status, 200);
    assert!(frame
        .text()
        .contains(r#"sandbox="allow-scripts allow-same-origin""#));

    assert_eq!(delete(addr, &format!("/reports/viewers/{id}"), TOKEN).await.status, 204);
    assert_eq!(state.report_cache.len().await, 0);
    assert_eq!(get(addr, "/report/60/styles.css", TOKEN).await.status, 404);
    assert_eq!(get(addr, &format!("/reports/viewers/{id}"), TOKEN).await.status, 404);
}

#[tokio::test]
async fn blob_strategy_rewrites_entry_document_and_revokes_on_close() {
    let (_tmp, _upstream, state) = setup(61, report_zip()).await;
    let addr = spawn_server(state.clone()).await;

    let created = post(addr, "/reports/61/viewers?owner=octo&repo=site&strategy=blob", TOKEN).await;
    assert_eq!(created.status, 201);
    let body = created.json();
    assert_eq!(body["state"], json!("ready"));
    let id = viewer_id(&body);
    assert_eq!(
        body["entry_url"],
        json!(format!("/reports/viewers/{id}/document"))
    );

    let document = get(addr, &format!("/reports/viewers/{id}/document"), TOKEN).await;
    assert_eq!(document.status, 200);
    let html = document.text();
    assert!(!html.contains(r#"src="app.js""#));
    assert!(!html.contains(r#"href="./styles.css""#));
    assert!(html.contains(r#"const data = "data.js";"#));

    let blob_path = html
        .split("src=\"")
        .skip(1)
        .map(|rest| rest.split('"').next().unwrap_or_default().to_string())
        .find(|src| src.starts_with("/blobs/"))
        .expect("rewritten blob address");
    let script = get(addr, &blob_path, TOKEN).await;
    assert_eq!(script.status, 200);
    assert_eq!(script.text(), "console.log('report');");
    assert_eq!(get(addr, &blob_path, "gho_other").await.status, 404);

    assert_eq!(state.blobs.len().await, 3);
    assert_eq!(delete(addr, &format!("/reports/viewers/{id}"), TOKEN).await.status, 204);
    assert_eq!(state.blobs.len().await, 0);
    assert_eq!(get(addr, &blob_path, TOKEN).await.status, 404);
}

#[tokio::test]
async fn blob_viewer_resolves_references_outside_markup_attributes() {
    let index = br#"<!doctype html><html><head><style>@font-face{font-family:r;src:url(fonts/r.woff2)}</style><link rel="stylesheet" href="css/site.css"></head><body><script>fetch("data/trace.zip")</script></body></html>"#;
    let archive = zip_of(&[
        ("playwright-report/index.html", index),
        ("playwright-report/css/site.css", b"body{background:url('../img/bg.png')}"),
        ("playwright-report/img/bg.png", &[0x89, b'P', b'N', b'G']),
        ("playwright-report/fonts/r.woff2", b"wOF2"),
        ("playwright-report/data/trace.zip", b"PK-trace"),
    ]);
    let (_tmp, upstream, state) = setup(64, archive).await;
    let addr = spawn_server(state.clone()).await;

    let created = post(addr, "/reports/64/viewers?owner=octo&repo=site&strategy=blob", TOKEN).await;
    assert_eq!(created.status, 201);
    let id = viewer_id(&created.json());
    let calls_after_load = upstream.total_calls();

    // Inline style and script URLs resolve against the document URL.
    let font = get(addr, &format!("/reports/viewers/{id}/fonts/r.woff2"), TOKEN).await;
    assert_eq!(font.status, 200);
    assert_eq!(font.header("content-type").as_deref(), Some("font/woff2"));
    assert_eq!(font.text(), "wOF2");
    let trace = get(addr, &format!("/reports/viewers/{id}/data/trace.zip"), TOKEN).await;
    assert_eq!(trace.status, 200);
    assert_eq!(trace.text(), "PK-trace");

    // The linked stylesheet is a blob whose own url() now names a blob.
    let html = get(addr, &format!("/reports/viewers/{id}/document"), TOKEN).await.text();
    let css_path = html
        .split("href=\"")
        .nth(1)
        .and_then(|rest| rest.split('"').next())
        .expect("stylesheet href")
        .to_string();
    assert!(css_path.starts_with("/blobs/"));
    let css = get(addr, &css_path, TOKEN).await.text();
    let image_path = css
        .split("url(\"")
        .nth(1)
        .and_then(|rest| rest.split('"').next())
        .expect("rewritten image url")
        .to_string();
    assert!(image_path.starts_with("/blobs/"));
    let image = get(addr, &image_path, TOKEN).await;
    assert_eq!(image.status, 200);
    assert_eq!(image.header("content-type").as_deref(), Some("image/png"));

    // Static viewer routes still win over archive paths.
    assert_eq!(
        get(addr, &format!("/reports/viewers/{id}/frame"), TOKEN).await.status,
        200
    );
    assert_eq!(
        get(addr, &format!("/reports/viewers/{id}/missing.js"), TOKEN).await.status,
        404
    );
    assert_eq!(
        get(addr, &format!("/reports/viewers/{id}/fonts/r.woff2"), "gho_other").await.status,
        404
    );
    assert_eq!(upstream.total_calls(), calls_after_load);

    assert_eq!(delete(addr, &format!("/reports/viewers/{id}"), TOKEN).await.status, 204);
    assert_eq!(
        get(addr, &format!("/reports/viewers/{id}/fonts/r.woff2"), TOKEN).await.status,
        404
    );
}

#[tokio::test]
async fn persist_strategy_points_at_the_served_root() {
    let (tmp, _upstream, state) = setup(62, report_zip()).await;
    let addr = spawn_server(state).await;

    let created = post(addr, "/reports/62/viewers?owner=octo&repo=site&strategy=persist", TOKEN).await;
    assert_eq!(created.status, 201);
    let body = created.json();
    assert_eq!(body["entry_url"], json!("/playwright-reports/62/index.html"));
    let id = viewer_id(&body);

    assert_eq!(delete(addr, &format!("/reports/viewers/{id}"), TOKEN).await.status, 204);
    // Persisted files outlive the viewer; the sweeper reclaims them.
    assert!(tmp.path().join("62/index.html").is_file());
}

#[tokio::test]
async fn failed_load_can_be_retried_once_the_artifact_is_fixed() {
    let (_tmp, upstream, state) = setup(63, b"not a zip".to_vec()).await;
    let addr = spawn_server(state.clone()).await;

    let created = post(addr, "/reports/63/viewers?owner=octo&repo=site", TOKEN).await;
    assert_eq!(created.status, 201);
    let body = created.json();
    assert_eq!(body["state"], json!("failed"));
    assert_eq!(body["failure"]["code"], json!("corrupt_archive"));
    assert_eq!(body["failure"]["message"], json!("Failed to process artifact"));
    assert_eq!(body["retry_allowed"], json!(true));
    assert_eq!(state.report_cache.len().await, 0);
    let id = viewer_id(&body);

    let frame = get(addr, &format!("/reports/viewers/{id}/frame"), TOKEN).await;
    assert_eq!(frame.status, 409);

    upstream
        .insert_artifact(OWNER, REPO, 63, "playwright-report", report_zip())
        .await;
    let retried = post(addr, &format!("/reports/viewers/{id}/retry"), TOKEN).await;
    assert_eq!(retried.status, 200);
    assert_eq!(retried.json()["state"], json!("ready"));
    assert_eq!(upstream.download_calls.load(Ordering::Relaxed), 2);

    // Retry is only offered from the failed state.
    let again = post(addr, &format!("/reports/viewers/{id}/retry"), TOKEN).await;
    assert_eq!(again.status, 409);
    assert_eq!(again.json()["code"], json!("invalid_state"));
}

#[tokio::test]
async fn viewer_requests_are_guarded_and_validated() {
    let (_tmp, upstream, state) = setup(64, report_zip()).await;
    let addr = spawn_server(state).await;

    let anonymous = support::send_raw(addr, "POST", "/reports/64/viewers?owner=octo&repo=site", &[]).await;
    assert_eq!(anonymous.status, 401);
    assert_eq!(post(addr, "/reports/64/viewers?owner=octo", TOKEN).await.status, 400);
    let bad_strategy = post(addr, "/reports/64/viewers?owner=octo&repo=site&strategy=iframe", TOKEN).await;
    assert_eq!(bad_strategy.status, 400);
    assert_eq!(upstream.total_calls(), 0);
}
