//! A live session.

use std::{
    fmt,
    future::Future,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use tokio::task::JoinSet;
use toolhub_core::{CallerContext, EventLog, ServerMessage, SessionId};

use crate::ResponseWriter;

/// Last-activity clock shared by a session and its writer.
#[derive(Debug, Clone)]
pub struct Activity(Arc<Mutex<Instant>>);

impl Activity {
    #[must_use]
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(Instant::now())))
    }

    pub fn touch(&self) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).elapsed()
    }
}

impl Default for Activity {
    fn default() -> Self {
        Self::new()
    }
}

/// Counts a request as in flight until dropped.
#[derive(Debug)]
pub struct RequestGuard(Arc<AtomicUsize>);

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// One logical client conversation.
///
/// Owned by the [`SessionManager`](crate::SessionManager); transports hold an
/// `Arc` only while a connection is open. Handlers never see it.
pub struct Session {
    id: SessionId,
    context: CallerContext,
    created_at: Instant,
    activity: Activity,
    requests: Arc<AtomicUsize>,
    log: Arc<EventLog>,
    writer: ResponseWriter,
    tasks: Mutex<JoinSet<()>>,
    closed: AtomicBool,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("principal", &self.context.principal)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Session {
    pub(crate) fn new(
        id: SessionId,
        context: CallerContext,
        activity: Activity,
        log: Arc<EventLog>,
        writer: ResponseWriter,
    ) -> Self {
        Self {
            id,
            context,
            created_at: Instant::now(),
            activity,
            requests: Arc::new(AtomicUsize::new(0)),
            log,
            writer,
            tasks: Mutex::new(JoinSet::new()),
            closed: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    /// Caller context captured at handshake.
    #[must_use]
    pub const fn context(&self) -> &CallerContext {
        &self.context
    }

    #[must_use]
    pub const fn writer(&self) -> &ResponseWriter {
        &self.writer
    }

    #[must_use]
    pub fn log(&self) -> &EventLog {
        &self.log
    }

    /// Record activity, postponing idle reaping.
    ///
    /// The writer also records every message it delivers or logs.
    pub fn touch(&self) {
        self.activity.touch();
    }

    /// Time since the last inbound or outbound message.
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.activity.idle_for()
    }

    /// Mark a request as in flight until the guard drops.
    #[must_use]
    pub fn begin_request(&self) -> RequestGuard {
        self.requests.fetch_add(1, Ordering::SeqCst);
        RequestGuard(Arc::clone(&self.requests))
    }

    /// Requests submitted and not yet answered or cancelled.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn lifetime(&self) -> Duration {
        self.created_at.elapsed()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Run `fut` as a task owned by this session; closing the session aborts it.
    ///
    /// Returns `false` (and drops `fut`) if the session is already closed.
    pub fn spawn<F>(&self, fut: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_closed() {
            return false;
        }
        while tasks.try_join_next().is_some() {}
        tasks.spawn(fut);
        true
    }

    /// Number of tasks still running.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        while tasks.try_join_next().is_some() {}
        tasks.len()
    }

    /// Send heartbeats on a fixed interval to the transport bound at
    /// `generation`, until it is replaced or the session closes.
    pub fn spawn_heartbeat(self: &Arc<Self>, every: Duration, generation: u64) {
        let weak = Arc::downgrade(self);
        self.spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(session) = weak.upgrade() else {
                    return;
                };
                if !session.writer.is_bound(generation) {
                    return;
                }
                if session.writer.send_now(ServerMessage::Heartbeat { at: unix_millis() }).is_err() {
                    return;
                }
            }
        });
    }

    /// Abort tasks and stop the writer. Returns `false` if already closed.
    pub(crate) fn shutdown(&self) -> bool {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        tasks.abort_all();
        drop(tasks);
        self.writer.close();
        true
    }
}

fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
}
