// SPDX-License-Identifier: Apache-2.0

//! Report viewer sessions: `Loading -> Ready | Failed`, with retry from
//! `Failed` and resource release when the viewer is closed, idles out, or
//! the sign-in session that opened it expires.

use crate::auth::Credential;
use crate::error::ReportError;
use crate::pipeline::{self, MaterializedReport};
use crate::AppState;
use runlens_api::{ApiErrorCode, ReportStrategy, ViewerFailure, ViewerResponse, ViewerStateName};
use runlens_model::ArtifactRef;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewerState {
    Loading,
    Ready(MaterializedReport),
    Failed { code: ApiErrorCode, message: String },
}

#[derive(Debug, Clone)]
pub struct ViewerSession {
    pub id: String,
    pub artifact: ArtifactRef,
    pub strategy: ReportStrategy,
    pub fingerprint: String,
    pub state: ViewerState,
    generation: u64,
    last_seen: Instant,
}

impl ViewerSession {
    #[must_use]
    pub fn to_response(&self) -> ViewerResponse {
        let (state, entry_url, failure) = match &self.state {
            ViewerState::Loading => (ViewerStateName::Loading, None, None),
            ViewerState::Ready(report) => {
                (ViewerStateName::Ready, Some(report.entry_url.clone()), None)
            }
            ViewerState::Failed { code, message } => (
                ViewerStateName::Failed,
                None,
                Some(ViewerFailure {
                    code: *code,
                    message: message.clone(),
                }),
            ),
        };
        ViewerResponse {
            viewer_id: self.id.clone(),
            artifact_id: self.artifact.id.get(),
            owner: self.artifact.owner.to_string(),
            repo: self.artifact.repo.to_string(),
            strategy: self.strategy,
            frame_url: entry_url
                .as_ref()
                .map(|_| format!("/reports/viewers/{}/frame", self.id)),
            entry_url,
            retry_allowed: state == ViewerStateName::Failed,
            failure,
            state,
        }
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn ready_report(&self) -> Option<&MaterializedReport> {
        match &self.state {
            ViewerState::Ready(report) => Some(report),
            _ => None,
        }
    }
}

/// Every open viewer, keyed by viewer id.
///
/// Viewers are only visible to the credential that opened them; lookups with
/// any other fingerprint behave as if the viewer does not exist.
#[derive(Default)]
pub struct ViewerRegistry {
    viewers: Mutex<HashMap<String, ViewerSession>>,
}

impl ViewerRegistry {
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, ViewerSession>> {
        self.viewers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a new viewer in `Loading`. Returns its id and load generation.
    pub fn open(
        &self,
        artifact: ArtifactRef,
        strategy: ReportStrategy,
        fingerprint: &str,
    ) -> (String, u64) {
        let id = uuid::Uuid::new_v4().to_string();
        self.lock().insert(
            id.clone(),
            ViewerSession {
                id: id.clone(),
                artifact,
                strategy,
                fingerprint: fingerprint.to_string(),
                state: ViewerState::Loading,
                generation: 1,
                last_seen: Instant::now(),
            },
        );
        (id, 1)
    }

    /// Returns the viewer and marks it as in use.
    #[must_use]
    pub fn get(&self, id: &str, fingerprint: &str) -> Option<ViewerSession> {
        let mut viewers = self.lock();
        let viewer = viewers.get_mut(id).filter(|v| v.fingerprint == fingerprint)?;
        viewer.last_seen = Instant::now();
        Some(viewer.clone())
    }

    /// Moves a failed viewer back to `Loading` under a new generation.
    pub fn begin_retry(&self, id: &str, fingerprint: &str) -> Result<ViewerSession, ReportError> {
        let mut viewers = self.lock();
        let viewer = viewers
            .get_mut(id)
            .filter(|v| v.fingerprint == fingerprint)
            .ok_or_else(|| ReportError::NotFound(format!("viewer {id}")))?;
        match viewer.state {
            ViewerState::Failed { .. } => {
                viewer.generation += 1;
                viewer.state = ViewerState::Loading;
                viewer.last_seen = Instant::now();
                Ok(viewer.clone())
            }
            ViewerState::Loading => Err(ReportError::InvalidState(
                "report is still loading".to_string(),
            )),
            ViewerState::Ready(_) => Err(ReportError::InvalidState(
                "report is already loaded".to_string(),
            )),
        }
    }

    /// Records the outcome of a load. When the viewer has been closed or a
    /// newer load superseded this one, the resources are handed back so the
    /// caller can release them.
    fn complete(
        &self,
        id: &str,
        generation: u64,
        outcome: Result<MaterializedReport, ReportError>,
    ) -> Option<MaterializedReport> {
        let mut viewers = self.lock();
        let Some(viewer) = viewers
            .get_mut(id)
            .filter(|v| v.generation == generation && v.state == ViewerState::Loading)
        else {
            return outcome.ok();
        };
        viewer.last_seen = Instant::now();
        viewer.state = match outcome {
            Ok(report) => ViewerState::Ready(report),
            Err(err) => ViewerState::Failed {
                code: err.code(),
                message: err.message(),
            },
        };
        None
    }

    fn cancel(&self, id: &str, generation: u64) {
        if let Some(viewer) = self
            .lock()
            .get_mut(id)
            .filter(|v| v.generation == generation && v.state == ViewerState::Loading)
        {
            viewer.state = ViewerState::Failed {
                code: ApiErrorCode::Cancelled,
                message: ReportError::Cancelled.message(),
            };
        }
    }

    pub fn close(&self, id: &str, fingerprint: &str) -> Option<ViewerSession> {
        let mut viewers = self.lock();
        if viewers.get(id).is_some_and(|v| v.fingerprint == fingerprint) {
            viewers.remove(id)
        } else {
            None
        }
    }

    pub fn close_all_for(&self, fingerprint: &str) -> Vec<ViewerSession> {
        let mut viewers = self.lock();
        let ids: Vec<String> = viewers
            .values()
            .filter(|v| v.fingerprint == fingerprint)
            .map(|v| v.id.clone())
            .collect();
        ids.iter().filter_map(|id| viewers.remove(id)).collect()
    }

    /// Removes settled viewers nobody has touched for `idle`. Viewers still
    /// loading belong to a live request and are left alone.
    pub fn take_idle(&self, idle: Duration) -> Vec<ViewerSession> {
        let mut viewers = self.lock();
        let ids: Vec<String> = viewers
            .values()
            .filter(|v| v.state != ViewerState::Loading && v.last_seen.elapsed() >= idle)
            .map(|v| v.id.clone())
            .collect();
        ids.iter().filter_map(|id| viewers.remove(id)).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Marks the viewer `Failed(cancelled)` if the load future is dropped
/// before it records an outcome.
struct CancelOnDrop {
    registry: Arc<ViewerRegistry>,
    id: String,
    generation: u64,
    armed: bool,
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if self.armed {
            warn!(viewer_id = %self.id, "report load cancelled");
            self.registry.cancel(&self.id, self.generation);
        }
    }
}

/// Runs one load attempt to completion and records the outcome.
///
/// The attempt is owned by the caller's request; dropping the future before
/// it finishes leaves the viewer `Failed(cancelled)`.
pub(crate) async fn load_viewer(
    state: AppState,
    viewer_id: String,
    generation: u64,
    artifact: ArtifactRef,
    strategy: ReportStrategy,
    credential: Credential,
) {
    let mut guard = CancelOnDrop {
        registry: state.viewers.clone(),
        id: viewer_id.clone(),
        generation,
        armed: true,
    };
    let outcome =
        pipeline::materialize_report(&state, &artifact, strategy, &credential, &viewer_id).await;
    guard.armed = false;
    match &outcome {
        Ok(report) => info!(
            viewer_id = %viewer_id,
            artifact_id = %artifact.id,
            owner = %artifact.owner,
            repo = %artifact.repo,
            entry_url = %report.entry_url,
            "report viewer ready"
        ),
        Err(err) => warn!(
            viewer_id = %viewer_id,
            artifact_id = %artifact.id,
            owner = %artifact.owner,
            repo = %artifact.repo,
            code = %err.code(),
            error = %err,
            "report viewer failed"
        ),
    }
    if let Some(orphan) = state.viewers.complete(&viewer_id, generation, outcome) {
        pipeline::release_resources(&state, &orphan.resources, &viewer_id).await;
    }
}

/// Closes a viewer and releases everything it held.
pub(crate) async fn close_viewer(state: &AppState, viewer: ViewerSession) {
    if let ViewerState::Ready(report) = &viewer.state {
        pipeline::release_resources(state, &report.resources, &viewer.id).await;
    }
    info!(viewer_id = %viewer.id, "report viewer closed");
}

/// Closes every viewer opened by `fingerprint` and revokes its persisted
/// report grants. Returns how many viewers were closed.
pub(crate) async fn release_credential_state(state: &AppState, fingerprint: &str) -> usize {
    let viewers = state.viewers.close_all_for(fingerprint);
    let closed = viewers.len();
    for viewer in viewers {
        close_viewer(state, viewer).await;
    }
    state.grants.revoke_fingerprint(fingerprint);
    closed
}

/// Drops expired sign-in sessions together with everything opened under them.
pub(crate) async fn expire_sessions(state: &AppState) {
    for session in state.sessions.take_expired().await {
        let fingerprint = session.credential.fingerprint();
        let closed = release_credential_state(state, fingerprint).await;
        info!(credential = fingerprint, closed_viewers = closed, "session expired");
    }
}

/// Closes viewers idle past the configured TTL and forgets stale grants.
pub(crate) async fn reap_idle_viewers(state: &AppState) -> usize {
    let idle = state.reports.viewer_idle_ttl;
    let viewers = state.viewers.take_idle(idle);
    let closed = viewers.len();
    for viewer in viewers {
        close_viewer(state, viewer).await;
    }
    let pruned = state.grants.prune_idle(idle);
    if closed > 0 || pruned > 0 {
        info!(closed_viewers = closed, pruned_grants = pruned, "idle report state reaped");
    }
    closed
}

/// Runs session expiry and idle-viewer reaping every `interval`.
pub fn spawn_viewer_reaper(state: AppState, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            expire_sessions(&state).await;
            reap_idle_viewers(&state).await;
        }
    })
}

/// Iframe shell for a ready viewer. Scripts run; top-level navigation and
/// popups stay blocked.
#[must_use]
pub fn frame_document(entry_url: &str) -> String {
    let src = entry_url
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;");
    format!(
        "<!doctype html>\n<html><head><meta charset=\"utf-8\"><title>Playwright Report</title>\
<style>html,body{{margin:0;height:100%}}iframe{{border:0;width:100%;height:100%}}</style></head>\
<body><iframe title=\"Playwright Report\" src=\"{src}\" sandbox=\"allow-scripts allow-same-origin\"></iframe></body></html>\n"
    )
}
