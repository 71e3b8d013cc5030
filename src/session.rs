//! Conversation session store
//!
//! Provides:
//! - A `SessionStore` trait so handlers never touch a global map
//! - An in-memory, lock-guarded implementation with time-based expiry
//!
//! Expiry is opportunistic: `sweep` runs inline at the start of each query,
//! there is no background timer.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use tracing::info;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::ConversationTurn;

/// Default idle time before a session is dropped (one hour).
pub const DEFAULT_EXPIRY_SECS: i64 = 3600;

/// Storage for per-session conversation history.
pub trait SessionStore: Send + Sync {
    /// Resolve a session id, generating one when absent or blank, and return
    /// its turns (empty for new or unknown sessions).
    fn get_or_create(&self, session_id: Option<&str>) -> (String, Vec<ConversationTurn>);

    /// Record `now` as the session's last activity.
    fn touch(&self, session_id: &str, now: DateTime<Utc>);

    /// Append one turn to the session history.
    fn append(&self, session_id: &str, turn: ConversationTurn);

    /// Drop every session idle for longer than the expiry; returns removed ids.
    fn sweep(&self, now: DateTime<Utc>) -> Vec<String>;

    /// Snapshot of all sessions.
    fn list_all(&self) -> BTreeMap<String, Vec<ConversationTurn>>;

    /// Remove a session.
    fn delete(&self, session_id: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
struct Session {
    turns: Vec<ConversationTurn>,
    last_activity: DateTime<Utc>,
}

/// Mutex-guarded in-memory session store.
#[derive(Debug)]
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<String, Session>>,
    expiry: Duration,
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new(Duration::seconds(DEFAULT_EXPIRY_SECS))
    }
}

impl InMemorySessionStore {
    pub fn new(expiry: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            expiry,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Session>> {
        // A panic while holding the lock cannot leave a session half-written,
        // so a poisoned map is still consistent.
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl SessionStore for InMemorySessionStore {
    fn get_or_create(&self, session_id: Option<&str>) -> (String, Vec<ConversationTurn>) {
        match session_id.filter(|id| !id.trim().is_empty()) {
            Some(id) => {
                let turns = self
                    .lock()
                    .get(id)
                    .map(|s| s.turns.clone())
                    .unwrap_or_default();
                (id.to_string(), turns)
            }
            None => {
                let id = Uuid::new_v4().to_string();
                info!("Created new conversation session: {}", id);
                (id, Vec::new())
            }
        }
    }

    fn touch(&self, session_id: &str, now: DateTime<Utc>) {
        self.lock()
            .entry(session_id.to_string())
            .and_modify(|s| s.last_activity = now)
            .or_insert_with(|| Session {
                turns: Vec::new(),
                last_activity: now,
            });
    }

    fn append(&self, session_id: &str, turn: ConversationTurn) {
        let mut sessions = self.lock();
        let session = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Session {
                turns: Vec::new(),
                last_activity: Utc::now(),
            });
        session.turns.push(turn);
    }

    fn sweep(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut sessions = self.lock();
        let expired: Vec<String> = sessions
            .iter()
            .filter(|(_, s)| now - s.last_activity > self.expiry)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            sessions.remove(id);
            info!("Cleaned up expired session: {}", id);
        }

        expired
    }

    fn list_all(&self) -> BTreeMap<String, Vec<ConversationTurn>> {
        self.lock()
            .iter()
            .map(|(id, s)| (id.clone(), s.turns.clone()))
            .collect()
    }

    fn delete(&self, session_id: &str) -> Result<()> {
        match self.lock().remove(session_id) {
            Some(_) => Ok(()),
            None => Err(Error::SessionNotFound(session_id.to_string())),
        }
    }
}
