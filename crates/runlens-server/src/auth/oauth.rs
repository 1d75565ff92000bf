// SPDX-License-Identifier: Apache-2.0

use super::Credential;
use crate::config::AuthConfig;
use crate::upstream::{classify_status, UpstreamError};
use async_trait::async_trait;
use reqwest::header::{HeaderValue, ACCEPT};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::instrument;

/// OAuth sign-in against the CI host.
#[async_trait]
pub trait IdentityProvider: Send + Sync + 'static {
    /// Browser redirect target that starts the sign-in flow.
    fn authorize_url(&self, state: &str) -> Result<String, UpstreamError>;

    /// Trades the callback `code` for an access token.
    async fn exchange_code(&self, code: &str) -> Result<Credential, UpstreamError>;
}

pub struct GithubOAuth {
    client_id: String,
    client_secret: secrecy::SecretString,
    redirect_url: String,
    authorize_url: String,
    token_url: String,
    scope: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct TokenRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    code: &'a str,
    redirect_uri: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

impl GithubOAuth {
    /// Returns `None` when the client id or secret is not configured.
    pub fn from_config(cfg: &AuthConfig, timeout: Duration) -> Result<Option<Self>, UpstreamError> {
        let (Some(client_id), Some(secret), Some(redirect_url)) = (
            cfg.client_id.clone().filter(|v| !v.is_empty()),
            cfg.client_secret.clone().filter(|v| !v.is_empty()),
            cfg.redirect_url.clone().filter(|v| !v.is_empty()),
        ) else {
            return Ok(None);
        };
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("runlens/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| UpstreamError::Transport(format!("http client init failed: {e}")))?;
        Ok(Some(Self {
            client_id,
            client_secret: secrecy::SecretString::from(secret),
            redirect_url,
            authorize_url: cfg.authorize_url.clone(),
            token_url: cfg.token_url.clone(),
            scope: cfg.scope.clone(),
            client,
        }))
    }
}

#[async_trait]
impl IdentityProvider for GithubOAuth {
    fn authorize_url(&self, state: &str) -> Result<String, UpstreamError> {
        reqwest::Url::parse_with_params(
            &self.authorize_url,
            &[
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", self.redirect_url.as_str()),
                ("scope", self.scope.as_str()),
                ("state", state),
            ],
        )
        .map(String::from)
        .map_err(|e| UpstreamError::Transport(format!("invalid authorize url: {e}")))
    }

    #[instrument(name = "oauth_exchange_code", skip_all)]
    async fn exchange_code(&self, code: &str) -> Result<Credential, UpstreamError> {
        use secrecy::ExposeSecret;
        let body = TokenRequest {
            client_id: &self.client_id,
            client_secret: self.client_secret.expose_secret(),
            code,
            redirect_uri: &self.redirect_url,
        };
        let resp = self
            .client
            .post(&self.token_url)
            .header(ACCEPT, HeaderValue::from_static("application/json"))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    UpstreamError::Timeout
                } else {
                    UpstreamError::Transport(e.to_string())
                }
            })?;
        if !resp.status().is_success() {
            return Err(classify_status(resp.status().as_u16(), "oauth token exchange"));
        }
        let parsed: TokenResponse = resp
            .json()
            .await
            .map_err(|e| UpstreamError::Decode(format!("oauth token response: {e}")))?;
        if let Some(error) = parsed.error {
            tracing::warn!(
                error = %error,
                description = parsed.error_description.as_deref().unwrap_or(""),
                "oauth code exchange rejected"
            );
            return Err(UpstreamError::Unauthorized);
        }
        parsed
            .access_token
            .and_then(Credential::new)
            .ok_or_else(|| UpstreamError::Decode("oauth response carried no access token".to_string()))
    }
}

/// Identity provider that maps fixed codes to tokens.
#[derive(Default)]
pub struct FakeIdentity {
    pub codes: Mutex<HashMap<String, String>>,
}

impl FakeIdentity {
    pub async fn with_code(code: &str, token: &str) -> Self {
        let fake = Self::default();
        fake.codes
            .lock()
            .await
            .insert(code.to_string(), token.to_string());
        fake
    }
}

#[async_trait]
impl IdentityProvider for FakeIdentity {
    fn authorize_url(&self, state: &str) -> Result<String, UpstreamError> {
        Ok(format!("https://github.test/login/oauth/authorize?state={state}"))
    }

    async fn exchange_code(&self, code: &str) -> Result<Credential, UpstreamError> {
        self.codes
            .lock()
            .await
            .remove(code)
            .and_then(Credential::new)
            .ok_or(UpstreamError::Unauthorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorize_url_encodes_scope_and_redirect() {
        let cfg = AuthConfig {
            client_id: Some("Iv1.client".to_string()),
            client_secret: Some("secret".to_string()),
            redirect_url: Some("http://localhost:8080/auth/callback".to_string()),
            ..AuthConfig::default()
        };
        let oauth = GithubOAuth::from_config(&cfg, Duration::from_secs(5))
            .expect("client")
            .expect("configured");
        let url = oauth.authorize_url("st-1").expect("url");
        assert!(url.starts_with("https://github.com/login/oauth/authorize?"));
        assert!(url.contains("client_id=Iv1.client"));
        assert!(url.contains("scope=read%3Auser+repo"));
        assert!(url.contains("redirect_uri=http%3A%2F%2Flocalhost%3A8080%2Fauth%2Fcallback"));
        assert!(url.contains("state=st-1"));
    }

    #[test]
    fn unconfigured_oauth_is_absent() {
        let oauth = GithubOAuth::from_config(&AuthConfig::default(), Duration::from_secs(5))
            .expect("no error");
        assert!(oauth.is_none());
    }
}
