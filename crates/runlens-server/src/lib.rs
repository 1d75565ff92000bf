#![forbid(unsafe_code)]

use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::Router;
use std::sync::atomic::{AtomicBool, AtomicU64};
use std::sync::Arc;

mod artifacts;
mod auth;
mod config;
mod error;
mod http;
mod materialize;
mod middleware;
mod pipeline;
mod retention;
mod upstream;
mod viewer;

pub const CRATE_NAME: &str = "runlens-server";

pub use artifacts::{
    fetch, resolve, resolve_and_fetch, FetchLimits, FetchedArchive, ReportGrants,
};
pub use auth::{
    require_credential, Credential, FakeIdentity, GithubOAuth, IdentityProvider, SessionStore,
    StoredSession, SESSION_COOKIE,
};
pub use config::{
    validate_startup_config_contract, ApiConfig, AuthConfig, ReportConfig,
    CONFIG_SCHEMA_VERSION, DEFAULT_GITHUB_API_BASE, DEFAULT_MAX_ARTIFACT_BYTES,
};
pub use error::ReportError;
pub use materialize::{
    content_type_for_path, decode_archive, rewrite_entry_document, ArchiveLimits, BlobSet, BlobStore,
    CacheKey, FsMaterializer, ReportAsset, ReportCacheStore, ReportFiles,
};
pub use pipeline::{MaterializedReport, ReportResources};
pub use retention::{
    list_persisted_reports, spawn_retention_sweeper, sweep_reports, PersistedReport, SweepReport,
};
pub use upstream::{classify_status, FakeUpstream, GithubBackend, UpstreamApi, UpstreamError};
pub use viewer::{
    frame_document, spawn_viewer_reaper, ViewerRegistry, ViewerSession, ViewerState,
};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub api: ApiConfig,
    pub reports: ReportConfig,
    pub auth: AuthConfig,
    pub upstream: Arc<dyn UpstreamApi>,
    pub identity: Option<Arc<dyn IdentityProvider>>,
    pub sessions: Arc<SessionStore>,
    pub report_cache: Arc<ReportCacheStore>,
    pub blobs: Arc<BlobStore>,
    pub viewers: Arc<ViewerRegistry>,
    pub grants: Arc<ReportGrants>,
    pub persisted: Arc<FsMaterializer>,
    pub ready: Arc<AtomicBool>,
    pub(crate) request_id_seed: Arc<AtomicU64>,
}

impl AppState {
    #[must_use]
    pub fn new(upstream: Arc<dyn UpstreamApi>, reports: ReportConfig) -> Self {
        Self::with_config(
            upstream,
            None,
            ApiConfig::default(),
            reports,
            AuthConfig::default(),
        )
    }

    #[must_use]
    pub fn with_config(
        upstream: Arc<dyn UpstreamApi>,
        identity: Option<Arc<dyn IdentityProvider>>,
        api: ApiConfig,
        reports: ReportConfig,
        auth: AuthConfig,
    ) -> Self {
        Self {
            upstream,
            identity,
            sessions: Arc::new(SessionStore::new(auth.session_ttl)),
            report_cache: Arc::new(ReportCacheStore::default()),
            blobs: Arc::new(BlobStore::default()),
            viewers: Arc::new(ViewerRegistry::default()),
            grants: Arc::new(ReportGrants::default()),
            persisted: Arc::new(FsMaterializer::new(
                reports.served_root.clone(),
                &reports.served_url_prefix,
            )),
            ready: Arc::new(AtomicBool::new(true)),
            request_id_seed: Arc::new(AtomicU64::new(1)),
            api,
            reports,
            auth,
        }
    }

    #[must_use]
    pub fn with_identity(mut self, identity: Arc<dyn IdentityProvider>) -> Self {
        self.identity = Some(identity);
        self
    }
}

pub fn build_router(state: AppState) -> Router {
    let persisted_route = format!("{}/:artifact_id/*path", state.reports.served_url_prefix);
    Router::new()
        .route("/healthz", get(http::handlers::healthz_handler))
        .route("/readyz", get(http::handlers::readyz_handler))
        .route("/v1/version", get(http::handlers::version_handler))
        .route("/v1/openapi.json", get(http::handlers::openapi_handler))
        .route("/auth/login", get(http::auth::login_handler))
        .route("/auth/callback", get(http::auth::callback_handler))
        .route("/auth/logout", post(http::auth::logout_handler))
        .route("/api/session", get(http::auth::session_handler))
        .route("/api/repos", get(http::dashboard::repositories_handler))
        .route(
            "/api/repos/:owner/:repo/runs",
            get(http::dashboard::workflow_runs_handler),
        )
        .route(
            "/api/repos/:owner/:repo/runs/:run_id/jobs",
            get(http::dashboard::jobs_handler),
        )
        .route(
            "/api/repos/:owner/:repo/runs/:run_id/artifacts",
            get(http::dashboard::run_artifacts_handler),
        )
        .route(
            "/api/repos/:owner/:repo/jobs/:job_id/logs",
            get(http::dashboard::job_logs_handler),
        )
        .route(
            "/api/builds/events",
            get(http::events::build_events_handler),
        )
        .route(
            "/artifacts/:artifact_id",
            get(http::artifacts::artifact_handler),
        )
        .route(
            "/reports/:artifact_id/viewers",
            post(http::reports::create_viewer_handler),
        )
        .route(
            "/reports/viewers/:viewer_id",
            get(http::reports::get_viewer_handler).delete(http::reports::close_viewer_handler),
        )
        .route(
            "/reports/viewers/:viewer_id/retry",
            post(http::reports::retry_viewer_handler),
        )
        .route(
            "/reports/viewers/:viewer_id/frame",
            get(http::reports::viewer_frame_handler),
        )
        .route(
            "/reports/viewers/:viewer_id/document",
            get(http::reports::viewer_document_handler),
        )
        .route(
            "/reports/viewers/:viewer_id/*path",
            get(http::reports::viewer_asset_handler),
        )
        .route(
            "/report/:artifact_id/*path",
            get(http::reports::cached_asset_handler),
        )
        .route("/blobs/:blob_id", get(http::reports::blob_handler))
        .route(&persisted_route, get(http::reports::persisted_asset_handler))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::request_tracing::request_tracing_middleware,
        ))
        .with_state(state)
}
