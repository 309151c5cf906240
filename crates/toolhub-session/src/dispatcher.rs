//! Request dispatch.

use std::{
    any::Any,
    panic::AssertUnwindSafe,
    sync::Arc,
    time::{Duration, Instant},
};

use futures::FutureExt;
use serde_json::{Map, Value};
use toolhub_core::{
    CallerContext, CorrelationId, DispatchTable, RequestEnvelope, RoutingError, ServerMessage,
    SessionId,
};
use tracing::Instrument;

use crate::{Session, SessionObserver, TracingObserver};

/// Routes decoded requests to their handlers.
#[derive(Clone)]
pub struct Dispatcher {
    table: Arc<DispatchTable>,
    observer: Arc<dyn SessionObserver>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(table: Arc<DispatchTable>) -> Self {
        Self::with_observer(table, Arc::new(TracingObserver))
    }

    #[must_use]
    pub fn with_observer(table: Arc<DispatchTable>, observer: Arc<dyn SessionObserver>) -> Self {
        Self { table, observer }
    }

    #[must_use]
    pub const fn table(&self) -> &Arc<DispatchTable> {
        &self.table
    }

    /// Accept one payload on `session`.
    ///
    /// The response position is reserved before this returns, so responses
    /// leave in submission order. The work runs on a task owned by the
    /// session; closing the session cancels it.
    ///
    /// # Errors
    /// Returns [`RoutingError::UnknownSession`] if the session is closed.
    pub fn submit(
        &self,
        session: &Session,
        payload: Vec<u8>,
        overrides: Map<String, Value>,
    ) -> Result<(), RoutingError> {
        if session.is_closed() {
            return Err(RoutingError::UnknownSession(session.id().to_string()));
        }
        session.touch();

        let slot = session.writer().reserve();
        let pending = session.begin_request();
        let this = self.clone();
        let session_id = session.id();
        let base = session.context().clone();
        let spawned = session.spawn(async move {
            let _pending = pending;
            let response = this.dispatch(session_id, &base, &payload, &overrides).await;
            if let Err(err) = slot.fill(response) {
                tracing::debug!(%session_id, error = %err, "response dropped");
            }
        });
        if spawned {
            Ok(())
        } else {
            Err(RoutingError::UnknownSession(session_id.to_string()))
        }
    }

    /// Decode, route, validate and run one request, producing its response.
    pub async fn dispatch(
        &self,
        session_id: SessionId,
        base: &CallerContext,
        payload: &[u8],
        overrides: &Map<String, Value>,
    ) -> ServerMessage {
        let started = Instant::now();
        let envelope = match RequestEnvelope::decode(payload, session_id) {
            Ok(envelope) => envelope,
            Err(failure) => {
                tracing::debug!(%session_id, error = %failure.error, "undecodable request");
                self.observer
                    .request_completed(session_id, "", Some(failure.error.kind()), started.elapsed());
                return ServerMessage::error(failure.id, None, &failure.error);
            }
        };

        let span = tracing::info_span!(
            "dispatch",
            %session_id,
            tool = %envelope.name,
            correlation_id = envelope.id.as_ref().map(tracing::field::display),
        );
        let id = envelope.id.clone();
        let tool = envelope.name.clone();
        let outcome = self.route(envelope, base, overrides).instrument(span).await;
        let elapsed = started.elapsed();
        self.observer.request_completed(
            session_id,
            &tool,
            outcome.as_ref().err().map(RoutingError::kind),
            elapsed,
        );
        respond(id, tool, outcome)
    }

    async fn route(
        &self,
        envelope: RequestEnvelope,
        base: &CallerContext,
        overrides: &Map<String, Value>,
    ) -> Result<Value, RoutingError> {
        let binding = self
            .table
            .lookup(&envelope.name)
            .ok_or_else(|| RoutingError::UnknownTool(envelope.name.clone()))?;
        let args = binding.schema().validate(envelope.arguments)?;

        let mut ctx = base.clone();
        ctx.apply_overrides(overrides);
        ctx.apply_overrides(&envelope.meta);

        let handler = Arc::clone(binding.handler());
        let scoped = ctx.clone().scope(async move {
            AssertUnwindSafe(handler.call(args, &ctx)).catch_unwind().await
        });

        let outcome = match binding.timeout() {
            Some(limit) => tokio::time::timeout(limit, scoped)
                .await
                .map_err(|_| RoutingError::ToolTimeout {
                    tool: binding.name().to_owned(),
                    timeout_ms: millis(limit),
                })?,
            None => scoped.await,
        };

        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(failure)) => Err(RoutingError::ToolExecution {
                tool: binding.name().to_owned(),
                message: failure.message().to_owned(),
            }),
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(tool = %binding.name(), panic = %message, "handler panicked");
                Err(RoutingError::ToolExecution {
                    tool: binding.name().to_owned(),
                    message: format!("handler panicked: {message}"),
                })
            }
        }
    }
}

fn respond(id: Option<CorrelationId>, tool: String, outcome: Result<Value, RoutingError>) -> ServerMessage {
    match outcome {
        Ok(content) => ServerMessage::Result { id, tool, content },
        Err(err) => {
            tracing::debug!(tool = %tool, error = %err, "request failed");
            ServerMessage::error(id, Some(tool), &err)
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_owned())
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::sync::mpsc;
    use toolhub_core::{ErrorKind, Outbound, ToolBinding};

    use super::*;
    use crate::{
        Handshake, OutboundRx,
        testing::{Adder, Failing, KEY, Panicking, Recorder, Sleepy, Tenant, manager},
    };

    fn table() -> Arc<DispatchTable> {
        Arc::new(DispatchTable::from_bindings([
            ToolBinding::new("add", Arc::new(Adder)),
            ToolBinding::new("sleep", Arc::new(Sleepy)),
            ToolBinding::new("fail", Arc::new(Failing)),
            ToolBinding::new("panic", Arc::new(Panicking)),
            ToolBinding::new("tenant", Arc::new(Tenant)),
            ToolBinding::new("slow", Arc::new(Sleepy)).with_timeout(Duration::from_millis(20)),
        ]))
    }

    async fn open(manager: &crate::SessionManager) -> (Arc<Session>, OutboundRx) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = manager
            .open(Handshake::default().with_api_key(KEY), Some(tx))
            .await
            .unwrap();
        let greeting = rx.recv().await.unwrap();
        assert!(matches!(greeting.message, ServerMessage::SessionOpened { .. }));
        (session, rx)
    }

    fn send(dispatcher: &Dispatcher, session: &Session, payload: Value) {
        dispatcher
            .submit(session, serde_json::to_vec(&payload).unwrap(), Map::new())
            .unwrap();
    }

    async fn next(rx: &mut OutboundRx) -> Outbound {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap()
    }

    fn error_kind(out: &Outbound) -> ErrorKind {
        match &out.message {
            ServerMessage::Error { kind, .. } => *kind,
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_add_returns_sum() {
        let manager = manager();
        let dispatcher = Dispatcher::new(table());
        let (session, mut rx) = open(&manager).await;

        send(&dispatcher, &session, json!({"id": 1, "name": "add", "args": {"a": 2, "b": 3}}));
        let out = next(&mut rx).await;
        assert_eq!(
            out.message,
            ServerMessage::Result {
                id: Some(1_i64.into()),
                tool: "add".into(),
                content: json!(5),
            }
        );
    }

    #[tokio::test]
    async fn test_unknown_tool_keeps_session_usable() {
        let manager = manager();
        let dispatcher = Dispatcher::new(table());
        let (session, mut rx) = open(&manager).await;

        send(&dispatcher, &session, json!({"id": "a", "name": "nonexistent", "args": {}}));
        let out = next(&mut rx).await;
        assert_eq!(error_kind(&out), ErrorKind::UnknownTool);
        let ServerMessage::Error { message, id, .. } = &out.message else {
            unreachable!()
        };
        assert!(message.contains("nonexistent"));
        assert_eq!(id, &Some(CorrelationId::from("a")));

        send(&dispatcher, &session, json!({"id": "b", "name": "add", "arguments": {"a": 1, "b": 1}}));
        assert!(matches!(next(&mut rx).await.message, ServerMessage::Result { .. }));
        assert!(manager.get(session.id()).await.is_some());
    }

    #[tokio::test]
    async fn test_responses_follow_submission_order() {
        let manager = manager();
        let dispatcher = Dispatcher::new(table());
        let (session, mut rx) = open(&manager).await;

        send(&dispatcher, &session, json!({"id": 1, "name": "sleep", "args": {"ms": 80, "tag": "r1"}}));
        send(&dispatcher, &session, json!({"id": 2, "name": "sleep", "args": {"ms": 5, "tag": "r2"}}));
        send(&dispatcher, &session, json!({"id": 3, "name": "sleep", "args": {"ms": 0, "tag": "r3"}}));

        let mut tags = Vec::new();
        for _ in 0..3 {
            if let ServerMessage::Result { content, .. } = next(&mut rx).await.message {
                tags.push(content);
            }
        }
        assert_eq!(tags, vec![json!("r1"), json!("r2"), json!("r3")]);
    }

    #[tokio::test]
    async fn test_handler_error_then_follow_up_succeeds() {
        let manager = manager();
        let dispatcher = Dispatcher::new(table());
        let (session, mut rx) = open(&manager).await;

        send(&dispatcher, &session, json!({"name": "fail"}));
        let out = next(&mut rx).await;
        assert_eq!(error_kind(&out), ErrorKind::ToolExecutionError);

        send(&dispatcher, &session, json!({"name": "add", "args": {"a": 4, "b": 4}}));
        let ServerMessage::Result { content, .. } = next(&mut rx).await.message else {
            panic!("expected result");
        };
        assert_eq!(content, json!(8));
    }

    #[tokio::test]
    async fn test_panic_becomes_execution_error() {
        let manager = manager();
        let dispatcher = Dispatcher::new(table());
        let (session, mut rx) = open(&manager).await;

        send(&dispatcher, &session, json!({"name": "panic"}));
        let out = next(&mut rx).await;
        assert_eq!(error_kind(&out), ErrorKind::ToolExecutionError);

        send(&dispatcher, &session, json!({"name": "add", "args": {"a": 1, "b": 2}}));
        assert!(matches!(next(&mut rx).await.message, ServerMessage::Result { .. }));
    }

    #[tokio::test]
    async fn test_timeout() {
        let manager = manager();
        let dispatcher = Dispatcher::new(table());
        let (session, mut rx) = open(&manager).await;

        send(&dispatcher, &session, json!({"name": "slow", "args": {"ms": 1000}}));
        let out = next(&mut rx).await;
        assert_eq!(error_kind(&out), ErrorKind::ToolTimeout);
    }

    #[tokio::test]
    async fn test_malformed_and_invalid_requests() {
        let dispatcher = Dispatcher::new(table());
        let ctx = CallerContext::new();
        let sid = uuid::Uuid::new_v4();

        let garbage = dispatcher.dispatch(sid, &ctx, b"{not json", &Map::new()).await;
        assert!(matches!(
            garbage,
            ServerMessage::Error { kind: ErrorKind::MalformedRequest, .. }
        ));

        let payload = serde_json::to_vec(&json!({"id": 9, "name": "add", "args": {"a": "two", "b": 1}})).unwrap();
        let invalid = dispatcher.dispatch(sid, &ctx, &payload, &Map::new()).await;
        let ServerMessage::Error { kind, message, id, .. } = invalid else {
            panic!("expected error");
        };
        assert_eq!(kind, ErrorKind::InvalidArguments);
        assert!(message.contains('a'));
        assert_eq!(id, Some(9_i64.into()));
    }

    #[tokio::test]
    async fn test_reload_replaces_binding() {
        let table = table();
        let dispatcher = Dispatcher::new(Arc::clone(&table));
        let ctx = CallerContext::new();
        let sid = uuid::Uuid::new_v4();
        let payload = serde_json::to_vec(&json!({"name": "add", "args": {"a": 1, "b": 1}})).unwrap();

        table.register(ToolBinding::new("add", Arc::new(Failing)));
        let out = dispatcher.dispatch(sid, &ctx, &payload, &Map::new()).await;
        assert!(matches!(
            out,
            ServerMessage::Error { kind: ErrorKind::ToolExecutionError, .. }
        ));
    }

    #[tokio::test]
    async fn test_context_overrides_are_per_request() {
        let dispatcher = Dispatcher::new(table());
        let base = CallerContext::new().with_tenant("base");
        let sid = uuid::Uuid::new_v4();

        let mut headers = Map::new();
        headers.insert("tenant_id".into(), json!("from-header"));
        let payload = serde_json::to_vec(&json!({"name": "tenant", "meta": {"tenant_id": "from-meta"}})).unwrap();
        let out = dispatcher.dispatch(sid, &base, &payload, &headers).await;
        let ServerMessage::Result { content, .. } = out else {
            panic!("expected result");
        };
        assert_eq!(content, json!({"explicit": "from-meta", "ambient": "from-meta"}));

        let plain = serde_json::to_vec(&json!({"name": "tenant"})).unwrap();
        let out = dispatcher.dispatch(sid, &base, &plain, &Map::new()).await;
        let ServerMessage::Result { content, .. } = out else {
            panic!("expected result");
        };
        assert_eq!(content["ambient"], "base");
        assert!(CallerContext::current().is_none());
    }

    #[tokio::test]
    async fn test_close_cancels_in_flight_requests() {
        let recorder = Arc::new(Recorder::default());
        let manager = manager();
        let dispatcher = Dispatcher::with_observer(table(), recorder.clone());
        let (session, mut rx) = open(&manager).await;

        send(&dispatcher, &session, json!({"name": "sleep", "args": {"ms": 5000}}));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(session.in_flight(), 1);

        manager.close(session.id(), crate::CloseReason::Client).await;
        assert!(rx.recv().await.is_none());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(session.in_flight(), 0);
        assert!(recorder.completed().is_empty());
        assert!(dispatcher.submit(&session, b"{}".to_vec(), Map::new()).is_err());
    }
}
