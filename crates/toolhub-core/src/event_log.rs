//! Bounded history of a session's outbound messages for reconnection support.

use std::{
    collections::VecDeque,
    sync::{PoisonError, RwLock},
};

use crate::{Outbound, ServerMessage};

/// Default history size limit (1 MiB per session).
pub const DEFAULT_HISTORY_BYTES: usize = 1024 * 1024;

struct StoredEvent {
    event: Outbound,
    bytes: usize,
}

struct Inner {
    history: VecDeque<StoredEvent>,
    total_bytes: usize,
    next_id: u64,
}

/// Event log with monotonically increasing ids.
///
/// Essential for reconnection: a resuming client presents the last id it saw
/// and receives everything newer before switching to live delivery. The
/// oldest entries are evicted once the byte budget is exceeded.
pub struct EventLog {
    inner: RwLock<Inner>,
    limit_bytes: usize,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog {
    /// Create a log with the default byte budget.
    #[must_use]
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_HISTORY_BYTES)
    }

    /// Create a log bounded to `limit_bytes`.
    #[must_use]
    pub fn with_limit(limit_bytes: usize) -> Self {
        Self {
            inner: RwLock::new(Inner {
                history: VecDeque::with_capacity(32),
                total_bytes: 0,
                next_id: 1,
            }),
            limit_bytes,
        }
    }

    /// Record a message, returning it tagged with its event id.
    pub fn push(&self, message: ServerMessage) -> Outbound {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);

        let event = Outbound {
            event_id: Some(inner.next_id),
            message,
        };
        inner.next_id += 1;
        let bytes = event.approx_bytes();

        while inner.total_bytes.saturating_add(bytes) > self.limit_bytes {
            if let Some(front) = inner.history.pop_front() {
                inner.total_bytes = inner.total_bytes.saturating_sub(front.bytes);
            } else {
                break;
            }
        }
        inner.history.push_back(StoredEvent {
            event: event.clone(),
            bytes,
        });
        inner.total_bytes = inner.total_bytes.saturating_add(bytes);

        event
    }

    /// Events newer than `cursor`, oldest first. `None` returns everything retained.
    #[must_use]
    pub fn since(&self, cursor: Option<u64>) -> Vec<Outbound> {
        let after = cursor.unwrap_or(0);
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .history
            .iter()
            .filter(|s| s.event.event_id.is_some_and(|id| id > after))
            .map(|s| s.event.clone())
            .collect()
    }

    /// Id of the most recently logged event.
    #[must_use]
    pub fn last_id(&self) -> Option<u64> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.next_id.checked_sub(1).filter(|id| *id > 0)
    }

    /// Number of retained events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .history
            .len()
    }

    /// Whether no events are retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn event(n: u64) -> ServerMessage {
        ServerMessage::Event {
            topic: "t".into(),
            payload: json!({ "n": n }),
        }
    }

    #[test]
    fn test_ids_are_monotonic() {
        let log = EventLog::new();
        assert_eq!(log.last_id(), None);
        assert_eq!(log.push(event(1)).event_id, Some(1));
        assert_eq!(log.push(event(2)).event_id, Some(2));
        assert_eq!(log.last_id(), Some(2));
    }

    #[test]
    fn test_since_cursor() {
        let log = EventLog::new();
        for n in 1..=4 {
            log.push(event(n));
        }
        let ids: Vec<_> = log.since(Some(2)).iter().filter_map(|e| e.event_id).collect();
        assert_eq!(ids, vec![3, 4]);
        assert_eq!(log.since(None).len(), 4);
        assert!(log.since(Some(4)).is_empty());
    }

    #[test]
    fn test_history_is_bounded() {
        let one = Outbound {
            event_id: Some(1),
            message: event(1),
        }
        .approx_bytes();
        let log = EventLog::with_limit(one * 2 + 1);
        for n in 1..=5 {
            log.push(event(n));
        }
        assert_eq!(log.len(), 2);
        let ids: Vec<_> = log.since(None).iter().filter_map(|e| e.event_id).collect();
        assert_eq!(ids, vec![4, 5]);
    }
}
