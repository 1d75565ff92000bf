// SPDX-License-Identifier: Apache-2.0

//! `GET /api/builds/events`: server-sent build notifications.
//!
//! The poll loop lives inside the response stream. When the client goes away
//! hyper drops the body, which drops the stream and ends polling.

use crate::artifacts::with_upstream_timeout;
use crate::auth::{require_credential, Credential};
use crate::error::ReportError;
use crate::http::request_tracing::request_id;
use crate::http::response_contract::report_error_response;
use crate::AppState;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::stream::{self, Stream, StreamExt};
use runlens_api::params::{parse_events_query, RepoCoordinate};
use runlens_api::BuildEvent;
use std::collections::BTreeMap;
use std::convert::Infallible;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Updates the last-known run id. Returns `true` when `latest` should be
/// announced: a known id that differs from it.
pub(crate) fn observe_latest_run(last_known: &mut Option<u64>, latest: u64) -> bool {
    match *last_known {
        Some(id) if id == latest => false,
        Some(_) => {
            *last_known = Some(latest);
            true
        }
        None => {
            *last_known = Some(latest);
            false
        }
    }
}

fn encode(event: &BuildEvent) -> Option<Event> {
    match Event::default().event(event.event_name()).json_data(event) {
        Ok(frame) => Some(frame),
        Err(e) => {
            warn!(error = %e, event = event.event_name(), "build event encoding failed");
            None
        }
    }
}

struct RunPoller {
    state: AppState,
    credential: Credential,
    coordinate: RepoCoordinate,
    last_known: Option<u64>,
    ticker: Interval,
    request_id: String,
}

impl RunPoller {
    async fn poll_once(&mut self) -> Option<BuildEvent> {
        let result = with_upstream_timeout(
            self.state.api.upstream_timeout,
            self.state.upstream.list_workflow_runs(
                &self.credential,
                &self.coordinate.owner,
                &self.coordinate.repo,
                1,
            ),
        )
        .await;
        let page = match result {
            Ok(page) => page,
            Err(err) => {
                log_poll_failure(&err, &self.request_id, &self.coordinate);
                return None;
            }
        };
        let latest = page.workflow_runs.into_iter().next()?;
        if !observe_latest_run(&mut self.last_known, latest.id) {
            debug!(request_id = %self.request_id, run_id = latest.id, "no new workflow run");
            return None;
        }
        info!(
            request_id = %self.request_id,
            owner = %self.coordinate.owner,
            repo = %self.coordinate.repo,
            run_id = latest.id,
            "new workflow run announced"
        );
        Some(BuildEvent::WorkflowRun {
            owner: self.coordinate.owner.to_string(),
            repo: self.coordinate.repo.to_string(),
            run: latest,
        })
    }
}

impl Drop for RunPoller {
    fn drop(&mut self) {
        info!(
            request_id = %self.request_id,
            owner = %self.coordinate.owner,
            repo = %self.coordinate.repo,
            "build event stream closed"
        );
    }
}

fn log_poll_failure(err: &ReportError, request_id: &str, coordinate: &RepoCoordinate) {
    warn!(
        request_id,
        owner = %coordinate.owner,
        repo = %coordinate.repo,
        code = %err.code(),
        error = %err,
        "workflow run poll failed"
    );
}

fn build_event_stream(poller: RunPoller) -> impl Stream<Item = Result<Event, Infallible>> {
    let connected = stream::iter(encode(&BuildEvent::Connected)).map(Ok);
    let runs = stream::unfold(poller, |mut poller| async move {
        loop {
            poller.ticker.tick().await;
            if let Some(frame) = poller.poll_once().await.as_ref().and_then(encode) {
                return Some((Ok(frame), poller));
            }
        }
    });
    connected.chain(runs)
}

/// `GET /api/builds/events?owner=&repo=[&lastRunId=]`
pub(crate) async fn build_events_handler(
    State(state): State<AppState>,
    Query(params): Query<BTreeMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let request_id = request_id(&headers);
    let credential = match require_credential(&headers, &state).await {
        Ok(c) => c,
        Err(err) => return report_error_response(&err, &request_id),
    };
    let query = match parse_events_query(&params) {
        Ok(q) => q,
        Err(err) => return report_error_response(&ReportError::from(err), &request_id),
    };
    info!(
        request_id = %request_id,
        owner = %query.coordinate.owner,
        repo = %query.coordinate.repo,
        last_run_id = ?query.last_run_id,
        "build event stream opened"
    );

    let period = state.api.events_poll_interval;
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let keepalive = KeepAlive::new()
        .interval(state.api.events_keepalive_interval)
        .text("keepalive");
    let poller = RunPoller {
        state,
        credential,
        coordinate: query.coordinate,
        last_known: query.last_run_id,
        ticker,
        request_id,
    };
    let mut resp = Sse::new(build_event_stream(poller))
        .keep_alive(keepalive)
        .into_response();
    resp.headers_mut().insert(
        "cache-control",
        axum::http::HeaderValue::from_static("no-cache"),
    );
    resp
}
