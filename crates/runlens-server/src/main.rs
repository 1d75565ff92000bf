#![forbid(unsafe_code)]

use runlens_server::{
    build_router, spawn_retention_sweeper, spawn_viewer_reaper, validate_startup_config_contract,
    ApiConfig, AppState, AuthConfig, GithubBackend, GithubOAuth, IdentityProvider, ReportConfig,
};
use std::env;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn env_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .ok()
        .and_then(|v| match v.as_str() {
            "1" | "true" | "TRUE" | "yes" | "YES" => Some(true),
            "0" | "false" | "FALSE" | "no" | "NO" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_u32(name: &str, default: u32) -> u32 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(default)
}

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default)
}

fn env_duration_ms(name: &str, default: Duration) -> Duration {
    Duration::from_millis(env_u64(name, default.as_millis() as u64))
}

fn env_string(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => {}
                    _ = sigint.recv() => {}
                }
            }
            _ => {
                warn!("signal handlers unavailable; falling back to ctrl-c");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if env_bool("RUNLENS_LOG_JSON", true) {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

fn load_config() -> (ApiConfig, ReportConfig, AuthConfig) {
    let api_defaults = ApiConfig::default();
    let api = ApiConfig {
        bind_addr: env_string("RUNLENS_BIND").unwrap_or(api_defaults.bind_addr.clone()),
        github_api_base: env_string("RUNLENS_GITHUB_API_BASE")
            .unwrap_or(api_defaults.github_api_base.clone()),
        upstream_timeout: env_duration_ms(
            "RUNLENS_UPSTREAM_TIMEOUT_MS",
            api_defaults.upstream_timeout,
        ),
        download_timeout: env_duration_ms(
            "RUNLENS_DOWNLOAD_TIMEOUT_MS",
            api_defaults.download_timeout,
        ),
        events_poll_interval: env_duration_ms(
            "RUNLENS_EVENTS_POLL_MS",
            api_defaults.events_poll_interval,
        ),
        events_keepalive_interval: env_duration_ms(
            "RUNLENS_EVENTS_KEEPALIVE_MS",
            api_defaults.events_keepalive_interval,
        ),
        default_runs_per_page: env_u32(
            "RUNLENS_DEFAULT_RUNS_PER_PAGE",
            api_defaults.default_runs_per_page,
        ),
        allow_bearer_tokens: env_bool("RUNLENS_ALLOW_BEARER_TOKENS", true),
        enable_response_compression: env_bool("RUNLENS_ENABLE_RESPONSE_COMPRESSION", true),
        compression_min_bytes: env_usize(
            "RUNLENS_COMPRESSION_MIN_BYTES",
            api_defaults.compression_min_bytes,
        ),
        ..api_defaults
    };

    let report_defaults = ReportConfig::default();
    let max_artifact_bytes = env_u64(
        "RUNLENS_MAX_ARTIFACT_BYTES",
        report_defaults.max_artifact_bytes,
    );
    let reports = ReportConfig {
        served_root: env_string("RUNLENS_REPORTS_ROOT")
            .map(PathBuf::from)
            .unwrap_or(report_defaults.served_root.clone()),
        max_artifact_bytes,
        max_extracted_bytes: env_u64(
            "RUNLENS_MAX_EXTRACTED_BYTES",
            max_artifact_bytes.saturating_mul(4),
        ),
        max_archive_entries: env_usize(
            "RUNLENS_MAX_ARCHIVE_ENTRIES",
            report_defaults.max_archive_entries,
        ),
        retention_max_age: env_duration_ms(
            "RUNLENS_RETENTION_MAX_AGE_MS",
            report_defaults.retention_max_age,
        ),
        sweep_interval: env_duration_ms(
            "RUNLENS_SWEEP_INTERVAL_MS",
            report_defaults.sweep_interval,
        ),
        viewer_idle_ttl: env_duration_ms(
            "RUNLENS_VIEWER_IDLE_TTL_MS",
            report_defaults.viewer_idle_ttl,
        ),
        viewer_reap_interval: env_duration_ms(
            "RUNLENS_VIEWER_REAP_INTERVAL_MS",
            report_defaults.viewer_reap_interval,
        ),
        default_artifact_format: env_string("RUNLENS_ARTIFACT_FORMAT")
            .and_then(|v| runlens_api::ArtifactFormat::parse(&v))
            .unwrap_or(report_defaults.default_artifact_format),
        default_viewer_strategy: env_string("RUNLENS_VIEWER_STRATEGY")
            .and_then(|v| runlens_api::ReportStrategy::parse(&v))
            .unwrap_or(report_defaults.default_viewer_strategy),
        ..report_defaults
    };

    let auth_defaults = AuthConfig::default();
    let auth = AuthConfig {
        client_id: env_string("AUTH_GITHUB_ID"),
        client_secret: env_string("AUTH_GITHUB_SECRET"),
        redirect_url: env_string("RUNLENS_OAUTH_REDIRECT_URL"),
        session_ttl: env_duration_ms("RUNLENS_SESSION_TTL_MS", auth_defaults.session_ttl),
        cookie_secure: env_bool("RUNLENS_COOKIE_SECURE", true),
        post_login_redirect: env_string("RUNLENS_POST_LOGIN_REDIRECT")
            .unwrap_or(auth_defaults.post_login_redirect.clone()),
        ..auth_defaults
    };
    (api, reports, auth)
}

#[tokio::main]
async fn main() -> Result<(), String> {
    init_tracing();
    let (api_cfg, report_cfg, auth_cfg) = load_config();
    validate_startup_config_contract(&api_cfg, &report_cfg, &auth_cfg)?;

    let upstream = GithubBackend::new(&api_cfg.github_api_base, api_cfg.download_timeout)
        .map_err(|e| format!("upstream client init failed: {e}"))?;
    let identity: Option<Arc<dyn IdentityProvider>> =
        GithubOAuth::from_config(&auth_cfg, api_cfg.upstream_timeout)
            .map_err(|e| format!("oauth client init failed: {e}"))?
            .map(|oauth| Arc::new(oauth) as Arc<dyn IdentityProvider>);
    if identity.is_none() {
        warn!("AUTH_GITHUB_ID not set; sign-in disabled, bearer tokens only");
    }

    let bind_addr = api_cfg.bind_addr.clone();
    let sweep_interval = report_cfg.sweep_interval;
    let state = AppState::with_config(
        Arc::new(upstream),
        identity,
        api_cfg,
        report_cfg,
        auth_cfg,
    );
    let sweeper = (!sweep_interval.is_zero()).then(|| {
        spawn_retention_sweeper(
            state.reports.served_root.clone(),
            state.reports.retention_max_age,
            sweep_interval,
        )
    });
    let reap_interval = state.reports.viewer_reap_interval;
    let reaper =
        (!reap_interval.is_zero()).then(|| spawn_viewer_reaper(state.clone(), reap_interval));
    let app = build_router(state.clone());

    let addr: std::net::SocketAddr = bind_addr
        .parse()
        .map_err(|e| format!("invalid bind addr {bind_addr}: {e}"))?;
    let socket = if addr.is_ipv4() {
        tokio::net::TcpSocket::new_v4().map_err(|e| format!("socket v4 failed: {e}"))?
    } else {
        tokio::net::TcpSocket::new_v6().map_err(|e| format!("socket v6 failed: {e}"))?
    };
    socket
        .set_reuseaddr(true)
        .map_err(|e| format!("set_reuseaddr failed: {e}"))?;
    socket
        .set_keepalive(env_bool("RUNLENS_TCP_KEEPALIVE_ENABLED", true))
        .map_err(|e| format!("set_keepalive failed: {e}"))?;
    socket.bind(addr).map_err(|e| format!("bind failed: {e}"))?;
    let listener: TcpListener = socket
        .listen(1024)
        .map_err(|e| format!("listen failed: {e}"))?;
    info!(
        bind = %bind_addr,
        served_root = %state.reports.served_root.display(),
        max_artifact_bytes = state.reports.max_artifact_bytes,
        "runlens-server listening"
    );

    let ready = state.ready.clone();
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            wait_for_shutdown_signal().await;
            ready.store(false, Ordering::Relaxed);
            info!("shutdown signal received; draining");
        })
        .await
        .map_err(|e| format!("server failed: {e}"));
    for handle in [sweeper, reaper].into_iter().flatten() {
        handle.abort();
    }
    result
}
