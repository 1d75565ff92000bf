mod support;

use std::io;
use std::sync::{Arc, Mutex};

use runlens_server::{ApiConfig, FakeUpstream};
use tracing::Level;
use tracing_subscriber::fmt::MakeWriter;

#[derive(Clone, Default)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

struct BufferWriter(Arc<Mutex<Vec<u8>>>);

impl<'a> MakeWriter<'a> for SharedBuffer {
    type Writer = BufferWriter;

    fn make_writer(&'a self) -> Self::Writer {
        BufferWriter(Arc::clone(&self.0))
    }
}

impl io::Write for BufferWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self
            .0
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "lock poisoned"))?;
        guard.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SharedBuffer {
    fn json_lines(&self) -> Vec<serde_json::Value> {
        let bytes = self.0.lock().expect("lock output").clone();
        let text = String::from_utf8(bytes).expect("utf8 log output");
        text.lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).expect("json log line"))
            .collect()
    }
}

#[test]
fn structured_logging_format_is_valid_json() {
    let sink = SharedBuffer::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(sink.clone())
        .json()
        .with_max_level(Level::INFO)
        .finish();

    tracing::subscriber::with_default(subscriber, || {
        tracing::info!(
            target: "runlens_audit",
            request_id = "req-123",
            artifact_id = 42_u64,
            strategy = "cache",
            "report viewer ready"
        );
    });

    let lines = sink.json_lines();
    let parsed = lines.first().expect("log line");
    assert_eq!(parsed.get("level").and_then(|v| v.as_str()), Some("INFO"));
    assert_eq!(
        parsed.get("target").and_then(|v| v.as_str()),
        Some("runlens_audit")
    );
    let fields = parsed.get("fields").expect("fields object");
    assert_eq!(
        fields.get("request_id").and_then(|v| v.as_str()),
        Some("req-123")
    );
    assert_eq!(fields.get("artifact_id").and_then(|v| v.as_u64()), Some(42));
}

#[tokio::test]
async fn completed_requests_are_logged_inside_the_request_span() {
    let sink = SharedBuffer::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(sink.clone())
        .json()
        .with_max_level(Level::INFO)
        .finish();
    // The test runtime is single threaded, so the server task sees this default.
    let _guard = tracing::subscriber::set_default(subscriber);

    let tmp = tempfile::tempdir().expect("tempdir");
    let addr = support::spawn_server(support::state_with(
        Arc::new(FakeUpstream::default()),
        support::report_config(tmp.path()),
        ApiConfig::default(),
    ))
    .await;
    let resp = support::send_raw(
        addr,
        "GET",
        "/artifacts/5?owner=octo&repo=site",
        &[("x-request-id", "req-log-1")],
    )
    .await;
    assert_eq!(resp.status, 401);
    assert_eq!(resp.header("x-request-id").as_deref(), Some("req-log-1"));

    let lines = sink.json_lines();
    let completed = lines
        .iter()
        .find(|l| l["fields"]["message"] == "request completed")
        .expect("request completed line");
    assert_eq!(completed["fields"]["status"].as_u64(), Some(401));
    assert_eq!(completed["span"]["name"], "http.request");
    assert_eq!(completed["span"]["request_id"], "req-log-1");
    assert_eq!(completed["span"]["route"], "/artifacts/5");
}
