// SPDX-License-Identifier: Apache-2.0

use super::Credential;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const PENDING_STATE_TTL: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Clone)]
pub struct StoredSession {
    pub credential: Credential,
    pub login: Option<String>,
}

struct SessionEntry {
    session: StoredSession,
    expires_at: Instant,
}

/// Server-side session table keyed by the opaque cookie value.
///
/// Expired entries stay in the table until [`SessionStore::take_expired`]
/// hands them to the caller, which owns releasing what they opened.
pub struct SessionStore {
    ttl: Duration,
    sessions: Mutex<HashMap<String, SessionEntry>>,
    pending_states: Mutex<HashMap<String, Instant>>,
}

impl SessionStore {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            sessions: Mutex::new(HashMap::new()),
            pending_states: Mutex::new(HashMap::new()),
        }
    }

    pub async fn create(&self, credential: Credential, login: Option<String>) -> String {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let now = Instant::now();
        let mut sessions = self.sessions.lock().await;
        sessions.insert(
            id.clone(),
            SessionEntry {
                session: StoredSession { credential, login },
                expires_at: now + self.ttl,
            },
        );
        id
    }

    /// Live session for `session_id`; expired sessions are treated as absent.
    pub async fn lookup(&self, session_id: &str) -> Option<StoredSession> {
        self.sessions
            .lock()
            .await
            .get(session_id)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.session.clone())
    }

    /// Removes every expired session. Returns the removed sessions whose
    /// credential is not also held by a session that is still live.
    pub async fn take_expired(&self) -> Vec<StoredSession> {
        let now = Instant::now();
        let mut sessions = self.sessions.lock().await;
        let expired: Vec<String> = sessions
            .iter()
            .filter(|(_, e)| e.expires_at <= now)
            .map(|(id, _)| id.clone())
            .collect();
        let removed: Vec<StoredSession> = expired
            .iter()
            .filter_map(|id| sessions.remove(id))
            .map(|e| e.session)
            .collect();
        let live: HashSet<&str> = sessions
            .values()
            .map(|e| e.session.credential.fingerprint())
            .collect();
        let mut seen = HashSet::new();
        let mut released = Vec::new();
        for session in removed {
            let fingerprint = session.credential.fingerprint();
            if !live.contains(fingerprint) && seen.insert(fingerprint.to_string()) {
                released.push(session);
            }
        }
        released
    }

    /// Whether any live session signs in with `fingerprint`.
    pub async fn holds_fingerprint(&self, fingerprint: &str) -> bool {
        let now = Instant::now();
        self.sessions
            .lock()
            .await
            .values()
            .any(|e| e.expires_at > now && e.session.credential.fingerprint() == fingerprint)
    }

    pub async fn remove(&self, session_id: &str) -> Option<StoredSession> {
        self.sessions
            .lock()
            .await
            .remove(session_id)
            .map(|e| e.session)
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Issues a one-shot anti-forgery value for the sign-in redirect.
    pub async fn issue_state(&self) -> String {
        let state = uuid::Uuid::new_v4().simple().to_string();
        let now = Instant::now();
        let mut pending = self.pending_states.lock().await;
        pending.retain(|_, issued| now.duration_since(*issued) < PENDING_STATE_TTL);
        pending.insert(state.clone(), now);
        state
    }

    pub async fn consume_state(&self, state: &str) -> bool {
        self.pending_states
            .lock()
            .await
            .remove(state)
            .is_some_and(|issued| issued.elapsed() < PENDING_STATE_TTL)
    }
}
