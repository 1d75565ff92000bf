use runlens_api::params::{DEFAULT_RUNS_PER_PAGE, MAX_RUNS_PER_PAGE};
use runlens_api::{ArtifactFormat, ReportStrategy};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

pub const CONFIG_SCHEMA_VERSION: &str = "1";

pub const DEFAULT_MAX_ARTIFACT_BYTES: u64 = 100 * 1024 * 1024;
pub const DEFAULT_GITHUB_API_BASE: &str = "https://api.github.com";

#[derive(Debug, Clone, Serialize)]
pub struct ApiConfig {
    pub bind_addr: String,
    pub github_api_base: String,
    pub upstream_timeout: Duration,
    pub download_timeout: Duration,
    pub events_poll_interval: Duration,
    pub events_keepalive_interval: Duration,
    pub default_runs_per_page: u32,
    pub max_runs_per_page: u32,
    pub max_log_bytes: u64,
    pub allow_bearer_tokens: bool,
    pub enable_response_compression: bool,
    pub compression_min_bytes: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            github_api_base: DEFAULT_GITHUB_API_BASE.to_string(),
            upstream_timeout: Duration::from_secs(30),
            download_timeout: Duration::from_secs(120),
            events_poll_interval: Duration::from_secs(10),
            events_keepalive_interval: Duration::from_secs(30),
            default_runs_per_page: DEFAULT_RUNS_PER_PAGE,
            max_runs_per_page: MAX_RUNS_PER_PAGE,
            max_log_bytes: 8 * 1024 * 1024,
            allow_bearer_tokens: true,
            enable_response_compression: true,
            compression_min_bytes: 4096,
        }
    }
}

/// Limits and locations for turning artifact archives into served reports.
#[derive(Debug, Clone, Serialize)]
pub struct ReportConfig {
    /// Directory persisted reports are extracted under, one subdirectory per artifact id.
    pub served_root: PathBuf,
    /// URL prefix the served root is mounted at.
    pub served_url_prefix: String,
    pub max_artifact_bytes: u64,
    pub max_extracted_bytes: u64,
    pub max_archive_entries: usize,
    pub entry_point: String,
    /// Leading directory dropped from every entry name when present.
    pub strip_prefix: String,
    pub retention_max_age: Duration,
    /// Zero disables the in-process sweeper.
    pub sweep_interval: Duration,
    /// Settled viewers untouched this long are closed and their memory released.
    pub viewer_idle_ttl: Duration,
    /// How often expired sessions and idle viewers are reaped. Zero disables it.
    pub viewer_reap_interval: Duration,
    pub default_artifact_format: ArtifactFormat,
    pub default_viewer_strategy: ReportStrategy,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            served_root: PathBuf::from("public/playwright-reports"),
            served_url_prefix: "/playwright-reports".to_string(),
            max_artifact_bytes: DEFAULT_MAX_ARTIFACT_BYTES,
            max_extracted_bytes: 4 * DEFAULT_MAX_ARTIFACT_BYTES,
            max_archive_entries: 20_000,
            entry_point: "index.html".to_string(),
            strip_prefix: "playwright-report/".to_string(),
            retention_max_age: Duration::from_secs(24 * 60 * 60),
            sweep_interval: Duration::from_secs(60 * 60),
            viewer_idle_ttl: Duration::from_secs(30 * 60),
            viewer_reap_interval: Duration::from_secs(60),
            default_artifact_format: ArtifactFormat::Extract,
            default_viewer_strategy: ReportStrategy::Cache,
        }
    }
}

impl ReportConfig {
    /// Ceiling expressed in whole megabytes for user-facing messages.
    #[must_use]
    pub fn max_artifact_megabytes(&self) -> u64 {
        self.max_artifact_bytes / (1024 * 1024)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthConfig {
    pub client_id: Option<String>,
    #[serde(skip_serializing)]
    pub client_secret: Option<String>,
    pub redirect_url: Option<String>,
    pub authorize_url: String,
    pub token_url: String,
    pub scope: String,
    pub session_ttl: Duration,
    pub cookie_secure: bool,
    pub post_login_redirect: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            redirect_url: None,
            authorize_url: "https://github.com/login/oauth/authorize".to_string(),
            token_url: "https://github.com/login/oauth/access_token".to_string(),
            scope: "read:user repo".to_string(),
            session_ttl: Duration::from_secs(8 * 60 * 60),
            cookie_secure: true,
            post_login_redirect: "/dashboard".to_string(),
        }
    }
}

impl AuthConfig {
    #[must_use]
    pub fn oauth_enabled(&self) -> bool {
        self.client_id.as_deref().is_some_and(|v| !v.is_empty())
    }
}

pub fn validate_startup_config_contract(
    api: &ApiConfig,
    reports: &ReportConfig,
    auth: &AuthConfig,
) -> Result<(), String> {
    if api.upstream_timeout.is_zero() || api.download_timeout.is_zero() {
        return Err("upstream timeouts must be > 0".to_string());
    }
    if api.events_poll_interval.is_zero() || api.events_keepalive_interval.is_zero() {
        return Err("event stream intervals must be > 0".to_string());
    }
    if api.default_runs_per_page == 0 || api.default_runs_per_page > api.max_runs_per_page {
        return Err("default_runs_per_page must be within 1..=max_runs_per_page".to_string());
    }
    if !api.github_api_base.starts_with("http://") && !api.github_api_base.starts_with("https://")
    {
        return Err("github_api_base must be an http(s) url".to_string());
    }
    if reports.max_artifact_bytes == 0 {
        return Err("max_artifact_bytes must be > 0".to_string());
    }
    if reports.max_extracted_bytes < reports.max_artifact_bytes {
        return Err("max_extracted_bytes must be >= max_artifact_bytes".to_string());
    }
    if reports.max_archive_entries == 0 {
        return Err("max_archive_entries must be > 0".to_string());
    }
    if reports.entry_point.is_empty() || reports.entry_point.contains("..") {
        return Err("entry_point must be a plain relative file name".to_string());
    }
    if !reports.served_url_prefix.starts_with('/') || reports.served_url_prefix.ends_with('/') {
        return Err("served_url_prefix must start with '/' and not end with '/'".to_string());
    }
    if reports.retention_max_age.is_zero() {
        return Err("retention_max_age must be > 0".to_string());
    }
    if reports.viewer_idle_ttl.is_zero() {
        return Err("viewer_idle_ttl must be > 0".to_string());
    }
    if auth.oauth_enabled() {
        if auth.client_secret.as_deref().map_or(true, str::is_empty) {
            return Err("oauth client id is set but client secret is missing".to_string());
        }
        if auth.redirect_url.as_deref().map_or(true, str::is_empty) {
            return Err("oauth client id is set but redirect url is missing".to_string());
        }
    }
    if auth.session_ttl.is_zero() {
        return Err("session_ttl must be > 0".to_string());
    }
    Ok(())
}
