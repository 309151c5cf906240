//! Ordered response streaming for one session.
//!
//! Producers reserve a slot when a request is submitted and fill it when the
//! response is ready. A single drain task walks the slots in reservation
//! order, so a slow early response holds back every later one. Each
//! replayable message is appended to the session's [`EventLog`] and then
//! handed to the bound transport channel.

use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicBool, Ordering},
};

use tokio::sync::{mpsc, oneshot, watch};
use toolhub_core::{EventLog, Outbound, RoutingError, ServerMessage, SessionId};

use crate::session::Activity;

/// Sending half of a transport's outbound channel.
pub type OutboundTx = mpsc::UnboundedSender<Outbound>;
/// Receiving half, owned by the transport's forward task.
pub type OutboundRx = mpsc::UnboundedReceiver<Outbound>;

enum Slot {
    Ready(ServerMessage),
    Pending(oneshot::Receiver<ServerMessage>),
}

/// A reserved position in the response order.
#[derive(Debug)]
pub struct ResponseSlot {
    tx: oneshot::Sender<ServerMessage>,
}

impl ResponseSlot {
    /// Complete the slot.
    ///
    /// # Errors
    /// Returns [`RoutingError::Transport`] when the session's writer has
    /// stopped, so the message can no longer be delivered.
    pub fn fill(self, message: ServerMessage) -> Result<(), RoutingError> {
        self.tx
            .send(message)
            .map_err(|_| RoutingError::Transport("session writer has stopped".into()))
    }
}

/// Why the drain task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainExit {
    /// The writer was closed.
    Closed,
    /// Delivery to the bound transport failed.
    Broken(RoutingError),
}

#[derive(Default)]
struct Binding {
    tx: Option<OutboundTx>,
    generation: u64,
}

struct Shared {
    session_id: SessionId,
    log: Arc<EventLog>,
    activity: Activity,
    binding: Mutex<Binding>,
    closed: AtomicBool,
}

impl Shared {
    fn binding(&self) -> std::sync::MutexGuard<'_, Binding> {
        self.binding.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Log (when replayable) and forward one message. Both happen under the
    /// binding lock so a concurrent resume sees each event exactly once.
    fn deliver(&self, message: ServerMessage) -> Result<(), RoutingError> {
        self.activity.touch();
        let mut binding = self.binding();
        let outbound = if message.is_replayable() {
            self.log.push(message)
        } else {
            Outbound::unlogged(message)
        };
        let Some(tx) = &binding.tx else {
            return Ok(());
        };
        if tx.send(outbound).is_err() {
            binding.tx = None;
            return Err(RoutingError::Transport("outbound channel closed".into()));
        }
        Ok(())
    }
}

/// Per-session ordered writer.
pub struct ResponseWriter {
    shared: Arc<Shared>,
    queue: mpsc::UnboundedSender<Slot>,
    close_tx: watch::Sender<bool>,
}

impl ResponseWriter {
    /// Create a writer and the drain future that must be spawned for it.
    ///
    /// Every queued message that reaches the drain refreshes `activity`.
    pub fn new(
        session_id: SessionId,
        log: Arc<EventLog>,
        activity: Activity,
    ) -> (Self, impl Future<Output = DrainExit> + Send + 'static) {
        let shared = Arc::new(Shared {
            session_id,
            log,
            activity,
            binding: Mutex::new(Binding::default()),
            closed: AtomicBool::new(false),
        });
        let (queue, queue_rx) = mpsc::unbounded_channel();
        let (close_tx, close_rx) = watch::channel(false);
        let drain = drain(Arc::clone(&shared), queue_rx, close_rx);
        (
            Self {
                shared,
                queue,
                close_tx,
            },
            drain,
        )
    }

    /// Reserve the next response position.
    ///
    /// Never fails; if the writer has stopped, filling the slot reports it.
    #[must_use]
    pub fn reserve(&self) -> ResponseSlot {
        let (tx, rx) = oneshot::channel();
        if self.queue.send(Slot::Pending(rx)).is_err() {
            tracing::debug!(session_id = %self.shared.session_id, "reserved slot on stopped writer");
        }
        ResponseSlot { tx }
    }

    /// Queue a message that is already complete (ordered after earlier slots).
    ///
    /// # Errors
    /// Returns [`RoutingError::Transport`] when the writer has stopped.
    pub fn emit(&self, message: ServerMessage) -> Result<(), RoutingError> {
        self.queue
            .send(Slot::Ready(message))
            .map_err(|_| RoutingError::Transport("session writer has stopped".into()))
    }

    /// Send an unlogged control message (heartbeat, pong) ahead of the queue.
    ///
    /// # Errors
    /// Returns [`RoutingError::Transport`] when the bound channel is gone.
    pub fn send_now(&self, message: ServerMessage) -> Result<(), RoutingError> {
        if self.is_closed() {
            return Err(RoutingError::Transport("session writer has stopped".into()));
        }
        let binding = self.shared.binding();
        match &binding.tx {
            Some(tx) => tx
                .send(Outbound::unlogged(message))
                .map_err(|_| RoutingError::Transport("outbound channel closed".into())),
            None => Ok(()),
        }
    }

    /// Bind a transport channel, replacing (and so ending) any previous one.
    ///
    /// Returns the binding generation for a later [`detach`](Self::detach).
    pub fn attach(&self, tx: OutboundTx) -> u64 {
        self.resume(Some(u64::MAX), tx).0
    }

    /// Replay logged events newer than `cursor` into `tx`, then bind it.
    ///
    /// Returns the binding generation and how many events were replayed.
    pub fn resume(&self, cursor: Option<u64>, tx: OutboundTx) -> (u64, usize) {
        let mut binding = self.shared.binding();
        let backlog = self.shared.log.since(cursor);
        let replayed = backlog.len();
        for event in backlog {
            if tx.send(event).is_err() {
                break;
            }
        }
        binding.generation += 1;
        binding.tx = Some(tx);
        (binding.generation, replayed)
    }

    /// Unbind the transport if it is still the one bound at `generation`.
    ///
    /// Later messages are only logged until the next resume.
    pub fn detach(&self, generation: u64) {
        let mut binding = self.shared.binding();
        if binding.generation == generation {
            binding.tx = None;
            tracing::debug!(session_id = %self.shared.session_id, generation, "transport detached");
        }
    }

    /// Whether a transport is currently bound.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.shared.binding().tx.is_some()
    }

    /// Whether the transport bound at `generation` is still the bound one.
    #[must_use]
    pub fn is_bound(&self, generation: u64) -> bool {
        let binding = self.shared.binding();
        binding.generation == generation && binding.tx.is_some()
    }

    /// Generation of the most recent binding.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.shared.binding().generation
    }

    /// Stop the writer: the drain ends, pending slots fail, the binding drops.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.close_tx.send_replace(true);
        self.shared.binding().tx = None;
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }
}

async fn drain(
    shared: Arc<Shared>,
    mut queue: mpsc::UnboundedReceiver<Slot>,
    mut close_rx: watch::Receiver<bool>,
) -> DrainExit {
    loop {
        let slot = tokio::select! {
            biased;
            _ = close_rx.changed() => return DrainExit::Closed,
            slot = queue.recv() => match slot {
                Some(slot) => slot,
                None => return DrainExit::Closed,
            },
        };

        let message = match slot {
            Slot::Ready(message) => message,
            Slot::Pending(rx) => tokio::select! {
                biased;
                _ = close_rx.changed() => return DrainExit::Closed,
                filled = rx => match filled {
                    Ok(message) => message,
                    // Producer was cancelled; nothing to send for this slot.
                    Err(_) => continue,
                },
            },
        };

        if let Err(err) = shared.deliver(message) {
            tracing::warn!(session_id = %shared.session_id, error = %err, "delivery failed, stopping writer");
            shared.closed.store(true, Ordering::SeqCst);
            return DrainExit::Broken(err);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use uuid::Uuid;

    use super::*;

    fn result(n: i64) -> ServerMessage {
        ServerMessage::Result {
            id: Some(n.into()),
            tool: "t".into(),
            content: json!(n),
        }
    }

    fn writer() -> (ResponseWriter, tokio::task::JoinHandle<DrainExit>) {
        let (writer, drain) = ResponseWriter::new(Uuid::new_v4(), Arc::new(EventLog::new()), Activity::new());
        (writer, tokio::spawn(drain))
    }

    #[tokio::test]
    async fn test_slots_drain_in_reservation_order() {
        let (writer, _drain) = writer();
        let (tx, mut rx) = mpsc::unbounded_channel();
        writer.attach(tx);

        let first = writer.reserve();
        let second = writer.reserve();
        second.fill(result(2)).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());

        first.fill(result(1)).unwrap();
        assert_eq!(rx.recv().await.unwrap().message, result(1));
        let next = rx.recv().await.unwrap();
        assert_eq!(next.message, result(2));
        assert_eq!(next.event_id, Some(2));
    }

    #[tokio::test]
    async fn test_cancelled_slot_is_skipped() {
        let (writer, _drain) = writer();
        let (tx, mut rx) = mpsc::unbounded_channel();
        writer.attach(tx);

        drop(writer.reserve());
        writer.emit(result(7)).unwrap();
        assert_eq!(rx.recv().await.unwrap().message, result(7));
    }

    #[tokio::test]
    async fn test_unbound_messages_are_logged_and_replayed() {
        let (writer, _drain) = writer();
        writer.emit(result(1)).unwrap();
        writer.emit(result(2)).unwrap();
        writer.emit(result(3)).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let (_, replayed) = writer.resume(Some(1), tx);
        assert_eq!(replayed, 2);
        assert_eq!(rx.recv().await.unwrap().event_id, Some(2));
        assert_eq!(rx.recv().await.unwrap().event_id, Some(3));

        writer.emit(result(4)).unwrap();
        assert_eq!(rx.recv().await.unwrap().event_id, Some(4));
    }

    #[tokio::test]
    async fn test_attach_replaces_previous_transport() {
        let (writer, _drain) = writer();
        let (old_tx, mut old_rx) = mpsc::unbounded_channel();
        let old = writer.attach(old_tx);
        let (new_tx, mut new_rx) = mpsc::unbounded_channel();
        writer.attach(new_tx);

        // The replaced channel's sender is gone, so its stream ends.
        assert!(old_rx.recv().await.is_none());

        // A stale detach does not unbind the new transport.
        assert!(!writer.is_bound(old));
        writer.detach(old);
        assert!(writer.is_bound(writer.generation()));
        writer.emit(result(1)).unwrap();
        assert_eq!(new_rx.recv().await.unwrap().message, result(1));
    }

    #[tokio::test]
    async fn test_delivery_failure_breaks_writer_and_fails_pending() {
        let (writer, drain) = writer();
        let (tx, rx) = mpsc::unbounded_channel();
        writer.attach(tx);
        drop(rx);

        let later = writer.reserve();
        writer.emit(result(1)).unwrap();
        // The first emitted message is queued behind `later`; fill it so the
        // drain reaches the failing delivery.
        later.fill(result(0)).unwrap();

        assert!(matches!(drain.await.unwrap(), DrainExit::Broken(_)));
        assert!(writer.is_closed());
        assert!(writer.reserve().fill(result(2)).is_err());
    }

    #[tokio::test]
    async fn test_close_fails_pending_producers() {
        let (writer, drain) = writer();
        let pending = writer.reserve();
        writer.close();
        assert_eq!(drain.await.unwrap(), DrainExit::Closed);
        assert!(pending.fill(result(1)).is_err());
        assert!(writer.emit(result(2)).is_err());
    }

    #[tokio::test]
    async fn test_delivery_refreshes_activity() {
        let activity = Activity::new();
        let (writer, drain) =
            ResponseWriter::new(Uuid::new_v4(), Arc::new(EventLog::new()), activity.clone());
        tokio::spawn(drain);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(activity.idle_for() >= Duration::from_millis(40));

        // Unbound: logged only, still counts.
        writer.emit(result(1)).unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(activity.idle_for() < Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_control_messages_skip_the_log() {
        let log = Arc::new(EventLog::new());
        let (writer, drain) = ResponseWriter::new(Uuid::new_v4(), Arc::clone(&log), Activity::new());
        tokio::spawn(drain);
        let (tx, mut rx) = mpsc::unbounded_channel();
        writer.attach(tx);

        writer.send_now(ServerMessage::Pong).unwrap();
        let pong = rx.recv().await.unwrap();
        assert_eq!(pong.event_id, None);
        assert!(log.is_empty());
    }
}
