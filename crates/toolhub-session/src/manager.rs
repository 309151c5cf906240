//! Session manager: owns every live session.

use std::{
    collections::HashMap,
    sync::{Arc, Weak},
    time::Duration,
};

use serde_json::{Map, Value};
use tokio::{sync::RwLock, task::JoinHandle};
use toolhub_core::{
    Authenticator, CallerContext, EventLog, Principal, RoutingError, ServerMessage, SessionId,
    event_log::DEFAULT_HISTORY_BYTES,
};
use uuid::Uuid;

use crate::{
    Activity, CloseReason, DrainExit, OutboundTx, ResponseWriter, Session, SessionObserver, TracingObserver,
};

/// Session limits and timers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub max_sessions: usize,
    pub idle_timeout: Duration,
    pub reap_interval: Duration,
    pub history_bytes: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_sessions: 1024,
            idle_timeout: Duration::from_secs(900),
            reap_interval: Duration::from_secs(30),
            history_bytes: DEFAULT_HISTORY_BYTES,
        }
    }
}

/// What a client presents when opening a session.
#[derive(Debug, Clone, Default)]
pub struct Handshake {
    pub api_key: Option<String>,
    /// Tenant, access token and metadata supplied by the client.
    pub overrides: Map<String, Value>,
}

impl Handshake {
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    #[must_use]
    pub fn with_override(mut self, key: impl Into<String>, value: Value) -> Self {
        self.overrides.insert(key.into(), value);
        self
    }
}

struct Inner {
    config: SessionConfig,
    authenticator: Arc<dyn Authenticator>,
    observer: Arc<dyn SessionObserver>,
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
}

/// Owns the session map.
///
/// Every insert and removal goes through the single write lock; reads take
/// the read lock only long enough to clone an `Arc`.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    #[must_use]
    pub fn new(config: SessionConfig, authenticator: Arc<dyn Authenticator>) -> Self {
        Self::with_observer(config, authenticator, Arc::new(TracingObserver))
    }

    #[must_use]
    pub fn with_observer(
        config: SessionConfig,
        authenticator: Arc<dyn Authenticator>,
        observer: Arc<dyn SessionObserver>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                authenticator,
                observer,
                sessions: RwLock::new(HashMap::new()),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn observer(&self) -> &Arc<dyn SessionObserver> {
        &self.inner.observer
    }

    /// Check an API key without opening anything.
    ///
    /// # Errors
    /// Returns [`RoutingError::Authentication`] for a missing or unknown key.
    pub fn authenticate(&self, api_key: Option<&str>) -> Result<Principal, RoutingError> {
        self.inner.authenticator.authenticate(api_key)
    }

    /// Open a session, optionally binding a transport channel right away.
    ///
    /// The first logged event is `session_opened`.
    ///
    /// # Errors
    /// [`RoutingError::Authentication`] or [`RoutingError::Capacity`]; no
    /// session exists afterwards in either case.
    pub async fn open(
        &self,
        handshake: Handshake,
        outbound: Option<OutboundTx>,
    ) -> Result<Arc<Session>, RoutingError> {
        let principal = self.authenticate(handshake.api_key.as_deref())?;

        let mut sessions = self.inner.sessions.write().await;
        if sessions.len() >= self.inner.config.max_sessions {
            tracing::warn!(limit = self.inner.config.max_sessions, "refusing session, at capacity");
            return Err(RoutingError::Capacity {
                limit: self.inner.config.max_sessions,
            });
        }
        let mut id = Uuid::new_v4();
        while sessions.contains_key(&id) {
            id = Uuid::new_v4();
        }

        let mut context = CallerContext::for_session(id).with_principal(principal.label);
        context.apply_overrides(&handshake.overrides);

        let log = Arc::new(EventLog::with_limit(self.inner.config.history_bytes));
        let activity = Activity::new();
        let (writer, drain) = ResponseWriter::new(id, Arc::clone(&log), activity.clone());
        let session = Arc::new(Session::new(id, context, activity, log, writer));
        sessions.insert(id, Arc::clone(&session));
        drop(sessions);

        self.watch_drain(id, drain);

        if let Some(tx) = outbound {
            session.writer().attach(tx);
        }
        session
            .writer()
            .emit(ServerMessage::SessionOpened { session_id: id })?;
        self.inner
            .observer
            .session_opened(id, session.context().principal.as_deref());
        Ok(session)
    }

    fn watch_drain(&self, id: SessionId, drain: impl Future<Output = DrainExit> + Send + 'static) {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            if let DrainExit::Broken(err) = drain.await {
                tracing::warn!(session_id = %id, error = %err, "closing session after transport failure");
                if let Some(inner) = weak.upgrade() {
                    Self { inner }.close(id, CloseReason::TransportError).await;
                }
            }
        });
    }

    /// Rebind a live session to a new transport, replaying events after `cursor`.
    ///
    /// Returns the session and the binding generation to pass to
    /// [`ResponseWriter::detach`] when the transport goes away.
    ///
    /// # Errors
    /// [`RoutingError::UnknownSession`] when the id is not live.
    pub async fn resume(
        &self,
        session_id: SessionId,
        cursor: Option<u64>,
        outbound: OutboundTx,
    ) -> Result<(Arc<Session>, u64), RoutingError> {
        let session = self
            .get(session_id)
            .await
            .ok_or_else(|| RoutingError::UnknownSession(session_id.to_string()))?;
        session.touch();
        let (generation, replayed) = session.writer().resume(cursor, outbound);
        self.inner
            .observer
            .session_resumed(session_id, cursor, replayed);
        Ok((session, generation))
    }

    /// Live session by id.
    pub async fn get(&self, session_id: SessionId) -> Option<Arc<Session>> {
        self.inner
            .sessions
            .read()
            .await
            .get(&session_id)
            .filter(|s| !s.is_closed())
            .cloned()
    }

    /// Live session by id, provided `api_key` authenticates as its owner.
    ///
    /// # Errors
    /// [`RoutingError::Authentication`] for a bad key;
    /// [`RoutingError::UnknownSession`] when the id is not live or belongs to
    /// another principal.
    pub async fn get_owned(
        &self,
        session_id: SessionId,
        api_key: Option<&str>,
    ) -> Result<Arc<Session>, RoutingError> {
        let principal = self.authenticate(api_key)?;
        self.get(session_id)
            .await
            .filter(|s| s.context().principal.as_deref() == Some(principal.label.as_str()))
            .ok_or_else(|| RoutingError::UnknownSession(session_id.to_string()))
    }

    /// Close a session. Closing an unknown or already closed session is a no-op.
    ///
    /// Returns whether this call closed it.
    pub async fn close(&self, session_id: SessionId, reason: CloseReason) -> bool {
        let removed = self.inner.sessions.write().await.remove(&session_id);
        let Some(session) = removed else {
            return false;
        };
        if !session.shutdown() {
            return false;
        }
        self.inner
            .observer
            .session_closed(session_id, reason, session.lifetime());
        true
    }

    /// Close every session idle longer than the configured timeout.
    ///
    /// A session with a request still running is never idle.
    pub async fn reap_idle(&self) -> usize {
        let idle: Vec<SessionId> = self
            .inner
            .sessions
            .read()
            .await
            .values()
            .filter(|s| s.pending_requests() == 0)
            .filter(|s| s.idle_for() >= self.inner.config.idle_timeout)
            .map(|s| s.id())
            .collect();

        let mut reaped = 0;
        for id in idle {
            if self.close(id, CloseReason::Idle).await {
                reaped += 1;
            }
        }
        if reaped > 0 {
            tracing::info!(reaped, "reaped idle sessions");
        }
        reaped
    }

    /// Run [`reap_idle`](Self::reap_idle) every `reap_interval` until the
    /// manager is dropped.
    #[must_use]
    pub fn spawn_reaper(&self) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        let every = self.inner.config.reap_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                Self { inner }.reap_idle().await;
            }
        })
    }

    /// Close every session.
    pub async fn shutdown(&self) -> usize {
        let ids: Vec<SessionId> = self.inner.sessions.read().await.keys().copied().collect();
        let mut closed = 0;
        for id in ids {
            if self.close(id, CloseReason::Shutdown).await {
                closed += 1;
            }
        }
        tracing::info!(closed, "closed all sessions");
        closed
    }

    /// Number of live sessions.
    pub async fn len(&self) -> usize {
        self.inner.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
