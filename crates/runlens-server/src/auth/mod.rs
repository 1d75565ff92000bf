// SPDX-License-Identifier: Apache-2.0

//! Session handling and credential gating.
//!
//! The access token obtained at sign-in lives only inside [`Credential`]; it
//! is never serialized, logged, or returned to the browser. Everything that
//! needs to refer to "whose request is this" uses the fingerprint instead.

use runlens_model::sha256_hex;
use secrecy::{ExposeSecret, SecretString};
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

mod guard;
mod oauth;
mod session;

pub(crate) use guard::session_cookie;
pub use guard::{require_credential, SESSION_COOKIE};
pub use oauth::{FakeIdentity, GithubOAuth, IdentityProvider};
pub use session::{SessionStore, StoredSession};

const MAX_TOKEN_LEN: usize = 512;

#[derive(Clone)]
pub struct Credential {
    token: Arc<SecretString>,
    fingerprint: String,
}

impl Credential {
    /// Wraps a raw access token. Returns `None` for values that cannot be a
    /// token (empty, oversized, or containing whitespace).
    pub fn new(token: impl Into<String>) -> Option<Self> {
        let token = token.into();
        if token.is_empty()
            || token.len() > MAX_TOKEN_LEN
            || token.chars().any(|c| c.is_whitespace() || c.is_control())
        {
            return None;
        }
        let fingerprint = sha256_hex(token.as_bytes())[..16].to_string();
        Some(Self {
            token: Arc::new(SecretString::from(token)),
            fingerprint,
        })
    }

    /// Stable, non-reversible identifier for scoping per-user state.
    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub(crate) fn expose(&self) -> &str {
        self.token.expose_secret()
    }
}

impl Debug for Credential {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}
