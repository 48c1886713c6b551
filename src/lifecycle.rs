//! Store lifecycle.
//!
//! `Uninitialized → Initializing → Initialized → Closing → Closed`, forward
//! only. Bring-up reports its outcome once through a [`ReadySignal`]; late
//! subscribers still observe it.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

use crate::error::{Result, StoreError};

/// Lifecycle state of a store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum LifecycleState {
    #[default]
    Uninitialized,
    Initializing,
    Initialized,
    Closing,
    Closed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Uninitialized => "UNINITIALIZED",
            LifecycleState::Initializing => "INITIALIZING",
            LifecycleState::Initialized => "INITIALIZED",
            LifecycleState::Closing => "CLOSING",
            LifecycleState::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}

/// Lifecycle state guarded for shared access.
#[derive(Debug, Default)]
pub(crate) struct StateCell {
    state: Mutex<LifecycleState>,
}

impl StateCell {
    pub(crate) fn get(&self) -> LifecycleState {
        *self.state.lock()
    }

    /// Move forward to `next`. Returns false (and changes nothing) if the
    /// state is already at or past `next`.
    pub(crate) fn advance(&self, next: LifecycleState) -> bool {
        let mut state = self.state.lock();
        if *state >= next {
            return false;
        }
        *state = next;
        true
    }

    /// Move from exactly `from` to `to`.
    pub(crate) fn transition(&self, from: LifecycleState, to: LifecycleState) -> bool {
        let mut state = self.state.lock();
        if *state != from || to <= from {
            return false;
        }
        *state = to;
        true
    }
}

type Outcome = std::result::Result<(), Arc<StoreError>>;

/// Broadcast-once completion signal for store bring-up.
#[derive(Debug)]
pub(crate) struct ReadySignal {
    tx: watch::Sender<Option<Outcome>>,
}

impl ReadySignal {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Report success. Ignored if an outcome was already reported.
    pub(crate) fn resolve(&self) -> bool {
        self.complete(Ok(()))
    }

    /// Report failure. Ignored if an outcome was already reported.
    pub(crate) fn reject(&self, error: StoreError) -> bool {
        self.complete(Err(Arc::new(error)))
    }

    fn complete(&self, outcome: Outcome) -> bool {
        self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(outcome);
            true
        })
    }

    /// Wait for the outcome.
    pub(crate) async fn wait(&self) -> Result<()> {
        let mut rx = self.tx.subscribe();
        let outcome = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| StoreError::Connection("store dropped during initialization".to_string()))?
            .clone();

        match outcome {
            Some(Err(err)) => Err(StoreError::Startup(err)),
            Some(Ok(())) | None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_only_moves_forward() {
        let cell = StateCell::default();
        assert_eq!(cell.get(), LifecycleState::Uninitialized);

        assert!(cell.advance(LifecycleState::Initializing));
        assert!(cell.advance(LifecycleState::Initialized));
        assert!(!cell.advance(LifecycleState::Initializing));
        assert!(!cell.advance(LifecycleState::Initialized));
        assert_eq!(cell.get(), LifecycleState::Initialized);
    }

    #[test]
    fn test_transition_requires_exact_state() {
        let cell = StateCell::default();
        cell.advance(LifecycleState::Initializing);

        assert!(!cell.transition(LifecycleState::Initialized, LifecycleState::Closing));
        cell.advance(LifecycleState::Initialized);
        assert!(cell.transition(LifecycleState::Initialized, LifecycleState::Closing));
        assert!(!cell.transition(LifecycleState::Initialized, LifecycleState::Closing));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(LifecycleState::Initialized.to_string(), "INITIALIZED");
        assert_eq!(LifecycleState::Closed.to_string(), "CLOSED");
    }

    #[tokio::test]
    async fn test_ready_resolves_all_waiters() {
        let signal = Arc::new(ReadySignal::new());

        let early = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.wait().await })
        };
        tokio::task::yield_now().await;

        assert!(signal.resolve());
        assert!(early.await.unwrap().is_ok());

        // Late subscriber sees the same outcome.
        assert!(signal.wait().await.is_ok());
    }

    #[tokio::test]
    async fn test_ready_completes_once() {
        let signal = ReadySignal::new();
        assert!(signal.reject(StoreError::Connection("refused".to_string())));
        assert!(!signal.resolve());

        let err = signal.wait().await.unwrap_err();
        assert!(matches!(err, StoreError::Startup(_)));
        assert!(err.to_string().contains("refused"));
    }
}
