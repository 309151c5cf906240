//! Server-sent events transport.
//!
//! The outbound half of a send/receive-pair session. Requests arrive on
//! `POST /sessions/{id}/messages`; responses stream here. Dropping the
//! stream only unbinds it; the session stays live until closed or reaped, so
//! a client can reconnect with `Last-Event-ID` and miss nothing.

use std::{
    convert::Infallible,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::sse::{Event, KeepAlive, KeepAliveStream, Sse},
};
use futures::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use toolhub_core::Outbound;
use toolhub_session::Session;

use crate::{
    ApiError,
    router::{AppState, owned_session},
};

/// Interval between keep-alive comments.
pub const KEEP_ALIVE: Duration = Duration::from_secs(15);

const LAST_EVENT_ID: &str = "last-event-id";

/// Convert an outbound message to an SSE frame.
///
/// `id` is the event id (absent for unlogged messages), `event` the message
/// type, `data` the JSON encoding.
#[must_use]
pub fn to_event(outbound: &Outbound) -> Event {
    let mut event = Event::default().event(outbound.message.type_name());
    if let Some(id) = outbound.event_id {
        event = event.id(id.to_string());
    }
    match serde_json::to_string(outbound) {
        Ok(data) => event.data(data),
        Err(err) => {
            tracing::error!("Failed to serialize message: {err}");
            event.data("{}")
        }
    }
}

/// Outbound stream bound to a session; unbinds itself when dropped.
pub struct EventStream {
    inner: UnboundedReceiverStream<Outbound>,
    session: Arc<Session>,
    generation: u64,
}

impl Stream for EventStream {
    type Item = Result<Event, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner)
            .poll_next(cx)
            .map(|next| next.map(|outbound| Ok(to_event(&outbound))))
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.session.writer().detach(self.generation);
    }
}

fn last_event_id(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(LAST_EVENT_ID)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// `GET /sessions/{id}/events`
///
/// Without `Last-Event-ID` the whole retained history is replayed first,
/// starting with `session_opened`.
pub async fn events_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Sse<KeepAliveStream<EventStream>>, ApiError> {
    let session = owned_session(&state, &id, &headers).await?;
    let cursor = last_event_id(&headers);
    let (tx, rx) = mpsc::unbounded_channel();
    let (session, generation) = state.manager.resume(session.id(), cursor, tx).await?;
    tracing::debug!(session_id = %session.id(), ?cursor, generation, "event stream attached");

    let stream = EventStream {
        inner: UnboundedReceiverStream::new(rx),
        session,
        generation,
    };
    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(KEEP_ALIVE).text("keep-alive")))
}
