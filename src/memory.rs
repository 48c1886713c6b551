//! In-memory session store.
//!
//! Same expiration rules as the SQL store, kept in a process-local map.
//! NOT durable - use for testing session middleware only.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::DEFAULT_EXPIRATION;
use crate::error::Result;
use crate::expiry::{expiration_for, now_unix};
use crate::store::{SessionRecord, SessionStats, SessionStore};

#[derive(Debug, Clone)]
struct MemoryEntry {
    expires: i64,
    data: Value,
}

/// In-memory implementation of [`SessionStore`].
#[derive(Debug, Clone)]
pub struct MemorySessionStore {
    sessions: Arc<RwLock<BTreeMap<String, MemoryEntry>>>,
    expiration: Duration,
    disable_touch: bool,
}

impl MemorySessionStore {
    /// Empty store with the default session lifetime.
    pub fn new() -> Self {
        Self::with_expiration(DEFAULT_EXPIRATION)
    }

    /// Empty store with a custom default session lifetime.
    pub fn with_expiration(expiration: Duration) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(BTreeMap::new())),
            expiration,
            disable_touch: false,
        }
    }

    pub fn with_disable_touch(mut self, disabled: bool) -> Self {
        self.disable_touch = disabled;
        self
    }

    /// Stored entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Remove expired entries, returning how many were removed.
    pub fn clear_expired_sessions(&self) -> u64 {
        let now = now_unix();
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, entry| entry.expires >= now);
        (before - sessions.len()) as u64
    }

    pub fn get_session_stats(&self) -> SessionStats {
        let now = now_unix();
        let sessions = self.sessions.read();
        let active = sessions.values().filter(|e| e.expires >= now).count() as u64;
        SessionStats {
            active,
            expired: sessions.len() as u64 - active,
        }
    }

    /// Raw rows, including expired ones.
    pub fn records(&self) -> Vec<SessionRecord> {
        self.sessions
            .read()
            .iter()
            .map(|(id, entry)| SessionRecord {
                session_id: id.clone(),
                expires: entry.expires,
                data: Some(entry.data.to_string()),
            })
            .collect()
    }
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, session_id: &str) -> Result<Option<Value>> {
        let now = now_unix();
        Ok(self
            .sessions
            .read()
            .get(session_id)
            .filter(|entry| entry.expires >= now)
            .map(|entry| entry.data.clone()))
    }

    async fn set(&self, session_id: &str, session: &Value) -> Result<()> {
        let expires = expiration_for(session, self.expiration)?;
        self.sessions.write().insert(
            session_id.to_string(),
            MemoryEntry {
                expires,
                data: session.clone(),
            },
        );
        Ok(())
    }

    async fn touch(&self, session_id: &str, session: &Value) -> Result<()> {
        if self.disable_touch {
            return Ok(());
        }
        let expires = expiration_for(session, self.expiration)?;
        if let Some(entry) = self.sessions.write().get_mut(session_id) {
            entry.expires = expires;
        }
        Ok(())
    }

    async fn destroy(&self, session_id: &str) -> Result<()> {
        self.sessions.write().remove(session_id);
        Ok(())
    }

    async fn all(&self) -> Result<BTreeMap<String, Value>> {
        let now = now_unix();
        Ok(self
            .sessions
            .read()
            .iter()
            .filter(|(_, entry)| entry.expires >= now)
            .map(|(id, entry)| (id.clone(), entry.data.clone()))
            .collect())
    }

    async fn length(&self) -> Result<u64> {
        Ok(self.get_session_stats().active)
    }

    async fn clear(&self) -> Result<()> {
        self.sessions.write().clear();
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
