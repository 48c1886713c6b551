//! SessionStore trait - the operation surface a session middleware consumes.
//!
//! Payloads are arbitrary JSON values. A session is "not found" once its
//! expiration is in the past, whether or not the row has been swept yet.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::Result;

/// A raw session row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    /// Unix timestamp in whole seconds.
    pub expires: i64,
    /// Serialized payload as stored.
    pub data: Option<String>,
}

impl SessionRecord {
    /// Decode the stored payload.
    pub fn payload(&self) -> Result<Value> {
        match &self.data {
            Some(data) => Ok(serde_json::from_str(data)?),
            None => Ok(Value::Null),
        }
    }
}

/// Active/expired row counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    pub active: u64,
    pub expired: u64,
}

/// One entry of a session export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedSession {
    pub session_id: String,
    pub data: Value,
    pub expires: i64,
}

/// The session store capability set.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Get a session payload.
    ///
    /// Returns `None` if the session does not exist or has expired.
    async fn get(&self, session_id: &str) -> Result<Option<Value>>;

    /// Create or replace a session.
    ///
    /// The expiration comes from the payload's cookie, else the default TTL.
    async fn set(&self, session_id: &str, session: &Value) -> Result<()>;

    /// Extend a session's expiration without rewriting its payload.
    ///
    /// A missing session is not an error.
    async fn touch(&self, session_id: &str, session: &Value) -> Result<()>;

    /// Delete a session. A missing session is not an error.
    async fn destroy(&self, session_id: &str) -> Result<()>;

    /// All unexpired sessions keyed by id.
    async fn all(&self) -> Result<BTreeMap<String, Value>>;

    /// Number of unexpired sessions.
    async fn length(&self) -> Result<u64>;

    /// Delete every session.
    async fn clear(&self) -> Result<()>;

    /// Release resources held by the store.
    async fn close(&self) -> Result<()>;

    /// Get a session and deserialize it.
    async fn get_json<T>(&self, session_id: &str) -> Result<Option<T>>
    where
        Self: Sized,
        T: DeserializeOwned + Send,
    {
        match self.get(session_id).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Serialize and store a session.
    async fn set_json<T>(&self, session_id: &str, session: &T) -> Result<()>
    where
        Self: Sized,
        T: Serialize + Send + Sync,
    {
        let value = serde_json::to_value(session)?;
        self.set(session_id, &value).await
    }

    /// Check if an unexpired session exists.
    async fn exists(&self, session_id: &str) -> Result<bool> {
        Ok(self.get(session_id).await?.is_some())
    }

    /// Shallow-merge `fields` over the stored payload and write it back.
    ///
    /// Returns `false` (and writes nothing) if the session is not found.
    async fn update_session_data(&self, session_id: &str, fields: &Value) -> Result<bool> {
        let Some(existing) = self.get(session_id).await? else {
            return Ok(false);
        };
        let merged = merge_shallow(existing, fields);
        self.set(session_id, &merged).await?;
        Ok(true)
    }
}

/// Top-level keys of `fields` replace those of `base`.
///
/// Non-object inputs contribute no keys.
pub fn merge_shallow(base: Value, fields: &Value) -> Value {
    let mut merged = match base {
        Value::Object(map) => map,
        _ => serde_json::Map::new(),
    };
    if let Value::Object(overrides) = fields {
        for (key, value) in overrides {
            merged.insert(key.clone(), value.clone());
        }
    }
    Value::Object(merged)
}
