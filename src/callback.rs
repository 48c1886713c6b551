//! Completion-callback adapter.
//!
//! For hosts that expect `callback(err, result)`-style stores. Each method
//! runs the async operation, reports the outcome to the optional callback,
//! and still returns the outcome to the caller.

use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;

use crate::error::{Result, StoreError};
use crate::store::SessionStore;

/// Completion callback: `Ok(&result)` on success, `Err(&error)` on failure.
pub type Completion<T> = Box<dyn FnOnce(std::result::Result<&T, &StoreError>) + Send>;

/// Await `operation`, report its outcome to `callback` if present, return it.
pub async fn complete<T, F>(operation: F, callback: Option<Completion<T>>) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let result = operation.await;
    if let Some(callback) = callback {
        callback(result.as_ref());
    }
    result
}

/// Callback-style view over any [`SessionStore`].
#[derive(Debug)]
pub struct CallbackAdapter<'a, S: SessionStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: SessionStore + ?Sized> CallbackAdapter<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    pub async fn get(
        &self,
        session_id: &str,
        callback: Option<Completion<Option<Value>>>,
    ) -> Result<Option<Value>> {
        complete(self.store.get(session_id), callback).await
    }

    pub async fn set(
        &self,
        session_id: &str,
        session: &Value,
        callback: Option<Completion<()>>,
    ) -> Result<()> {
        complete(self.store.set(session_id, session), callback).await
    }

    pub async fn touch(
        &self,
        session_id: &str,
        session: &Value,
        callback: Option<Completion<()>>,
    ) -> Result<()> {
        complete(self.store.touch(session_id, session), callback).await
    }

    pub async fn destroy(&self, session_id: &str, callback: Option<Completion<()>>) -> Result<()> {
        complete(self.store.destroy(session_id), callback).await
    }

    pub async fn all(
        &self,
        callback: Option<Completion<BTreeMap<String, Value>>>,
    ) -> Result<BTreeMap<String, Value>> {
        complete(self.store.all(), callback).await
    }

    pub async fn length(&self, callback: Option<Completion<u64>>) -> Result<u64> {
        complete(self.store.length(), callback).await
    }

    pub async fn clear(&self, callback: Option<Completion<()>>) -> Result<()> {
        complete(self.store.clear(), callback).await
    }

    pub async fn close(&self, callback: Option<Completion<()>>) -> Result<()> {
        complete(self.store.close(), callback).await
    }
}
