//! Session change notifications.
//!
//! Events are broadcast in-process after a statement succeeds. Delivery is
//! best effort: a subscriber that falls behind skips the events it missed.

use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::Stream;
use tracing::debug;

/// A change to the session table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Session written (created or replaced).
    Set { session_id: String, expires: i64 },
    /// Session expiration extended.
    Touched { session_id: String, expires: i64 },
    /// Session deleted.
    Destroyed { session_id: String },
    /// Every session deleted.
    Cleared,
    /// Expired sessions swept.
    ExpiredCleared { removed: u64 },
    /// A user holds more than one active session.
    SimultaneousSessions { user_id: String, count: u64 },
}

impl SessionEvent {
    /// The session this event concerns, if it concerns a single one.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            SessionEvent::Set { session_id, .. }
            | SessionEvent::Touched { session_id, .. }
            | SessionEvent::Destroyed { session_id } => Some(session_id),
            _ => None,
        }
    }
}

/// A stream of session events matching a pattern.
///
/// Pattern is an exact session id or ends with `*` for prefix matching.
/// Events that are not about a single session always match.
pub struct EventStream {
    inner: BroadcastStream<SessionEvent>,
    pattern: String,
}

impl EventStream {
    pub fn new(receiver: broadcast::Receiver<SessionEvent>, pattern: impl Into<String>) -> Self {
        Self {
            inner: BroadcastStream::new(receiver),
            pattern: pattern.into(),
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    fn matches(&self, event: &SessionEvent) -> bool {
        let Some(session_id) = event.session_id() else {
            return true;
        };
        match self.pattern.strip_suffix('*') {
            Some(prefix) => session_id.starts_with(prefix),
            None => session_id == self.pattern,
        }
    }
}

impl Stream for EventStream {
    type Item = SessionEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(event))) => {
                    if self.matches(&event) {
                        return Poll::Ready(Some(event));
                    }
                }
                Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(skipped)))) => {
                    debug!(skipped, "Session event subscriber lagged");
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Handle for publishing session events.
#[derive(Debug, Clone)]
pub struct EventSender {
    sender: broadcast::Sender<SessionEvent>,
}

impl EventSender {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish to current subscribers; dropped if there are none.
    pub fn send(&self, event: SessionEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self, pattern: impl Into<String>) -> EventStream {
        EventStream::new(self.sender.subscribe(), pattern)
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventSender {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    fn set(id: &str) -> SessionEvent {
        SessionEvent::Set {
            session_id: id.to_string(),
            expires: 1,
        }
    }

    #[test]
    fn test_event_serialize() {
        let json = serde_json::to_string(&SessionEvent::Destroyed {
            session_id: "abc".to_string(),
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"destroyed","session_id":"abc"}"#);
    }

    #[test]
    fn test_pattern_matching() {
        let sender = EventSender::new(16);
        let stream = sender.subscribe("user-1:*");

        assert!(stream.matches(&set("user-1:abc")));
        assert!(!stream.matches(&set("user-2:abc")));
        assert!(stream.matches(&SessionEvent::Cleared));
    }

    #[test]
    fn test_exact_pattern() {
        let sender = EventSender::new(16);
        let stream = sender.subscribe("abc");

        assert!(stream.matches(&set("abc")));
        assert!(!stream.matches(&set("abcd")));
    }

    #[tokio::test]
    async fn test_stream_filters_events() {
        let sender = EventSender::new(16);
        let mut stream = sender.subscribe("abc");

        sender.send(set("other"));
        sender.send(set("abc"));
        sender.send(SessionEvent::ExpiredCleared { removed: 2 });

        assert_eq!(stream.next().await, Some(set("abc")));
        assert_eq!(
            stream.next().await,
            Some(SessionEvent::ExpiredCleared { removed: 2 })
        );
    }

    #[tokio::test]
    async fn test_lagged_subscriber_skips() {
        let sender = EventSender::new(2);
        let mut stream = sender.subscribe("*");

        for id in ["a", "b", "c", "d"] {
            sender.send(set(id));
        }

        assert_eq!(stream.next().await, Some(set("c")));
        assert_eq!(stream.next().await, Some(set("d")));
    }

    #[test]
    fn test_send_without_subscribers() {
        let sender = EventSender::default();
        sender.send(SessionEvent::Cleared);
        assert_eq!(sender.receiver_count(), 0);
    }
}
