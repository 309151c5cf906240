//! WebSocket duplex transport.
//!
//! One socket carries both directions of a session. The socket is the
//! session's transport: when it closes the session closes, unless another
//! connection has resumed the session in the meantime.

use axum::{
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::HeaderMap,
    response::Response,
};
use futures::{SinkExt, StreamExt, stream::SplitSink};
use serde::Deserialize;
use serde_json::Map;
use tokio::sync::mpsc;
use toolhub_core::{Outbound, RoutingError, ServerMessage, SessionId};
use toolhub_session::{CloseReason, Handshake, OutboundRx, Session};

use crate::{
    ApiError, FrameKind, protocol,
    router::{AppState, context_overrides, header_api_key, parse_session_id},
};

/// Query parameters accepted on `GET /ws`.
#[derive(Debug, Default, Deserialize)]
pub struct WsQuery {
    /// Alternative to the `x-api-key` header for clients that cannot set headers.
    pub api_key: Option<String>,
    /// Resume this session instead of opening a new one.
    pub session_id: Option<String>,
    /// Replay only events after this id when resuming.
    pub cursor: Option<u64>,
}

enum Target {
    Open(Handshake),
    Resume { id: SessionId, cursor: Option<u64> },
}

/// WebSocket upgrade handler.
///
/// Authentication and session lookup happen before the upgrade, so a bad key
/// or unknown session gets a plain HTTP error.
pub async fn ws_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let api_key = header_api_key(&headers).or(query.api_key.as_deref());
    state.manager.authenticate(api_key)?;

    let target = match query.session_id.as_deref() {
        Some(raw) => {
            let id = parse_session_id(raw)?;
            state.manager.get_owned(id, api_key).await?;
            Target::Resume {
                id,
                cursor: query.cursor,
            }
        }
        None => Target::Open(Handshake {
            api_key: api_key.map(str::to_owned),
            overrides: context_overrides(&headers)?,
        }),
    };

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, target)))
}

async fn handle_socket(socket: WebSocket, state: AppState, target: Target) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel();

    let bound = match target {
        Target::Open(handshake) => state
            .manager
            .open(handshake, Some(tx))
            .await
            .map(|session| {
                let generation = session.writer().generation();
                (session, generation)
            }),
        Target::Resume { id, cursor } => state.manager.resume(id, cursor, tx).await,
    };
    let (session, generation) = match bound {
        Ok(bound) => bound,
        Err(err) => {
            tracing::warn!(error = %err, "websocket session setup failed");
            let refusal = Outbound::unlogged(ServerMessage::error(None, None, &err));
            if let Ok(json) = protocol::encode(&refusal) {
                let _ = sender.send(Message::Text(json.into())).await;
            }
            let _ = sender.close().await;
            return;
        }
    };

    let session_id = session.id();
    session.spawn_heartbeat(state.heartbeat, generation);
    tracing::info!(%session_id, generation, "websocket connected");

    // Spawn task to forward session output to the socket
    let mut send_task = tokio::spawn(forward(sender, rx));

    let reason = loop {
        tokio::select! {
            // Output ended before input did.
            _ = &mut send_task => break CloseReason::TransportError,
            msg = receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    handle_frame(&state, &session, text.as_str().as_bytes().to_vec());
                }
                Some(Ok(Message::Binary(data))) => handle_frame(&state, &session, data.to_vec()),
                Some(Ok(Message::Close(_))) | None => break CloseReason::Client,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!(%session_id, "WebSocket error: {e}");
                    break CloseReason::TransportError;
                }
            },
        }
    };

    if session.writer().is_bound(generation) {
        state.manager.close(session_id, reason).await;
    } else {
        tracing::debug!(%session_id, generation, "websocket released without closing session");
    }
    send_task.abort();
    tracing::info!(%session_id, %reason, "websocket disconnected");
}

async fn forward(mut sender: SplitSink<WebSocket, Message>, mut rx: OutboundRx) {
    while let Some(outbound) = rx.recv().await {
        let json = match protocol::encode(&outbound) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!("Failed to serialize message: {e}");
                continue;
            }
        };
        if sender.send(Message::Text(json.into())).await.is_err() {
            return;
        }
    }
    let _ = sender.close().await;
}

/// Handle one inbound frame on `session`.
///
/// Calls go to the dispatcher with no per-frame overrides (the envelope's
/// `meta` carries those); pings are answered immediately, ahead of queued
/// responses.
pub fn handle_frame(state: &AppState, session: &Session, frame: Vec<u8>) {
    let outcome = match FrameKind::classify(&frame) {
        FrameKind::Call => state.dispatcher.submit(session, frame, Map::new()),
        FrameKind::Ping => {
            session.touch();
            session.writer().send_now(ServerMessage::Pong)
        }
        FrameKind::Unknown(kind) => {
            let err = RoutingError::MalformedRequest(format!("unknown frame type `{kind}`"));
            session.writer().emit(ServerMessage::error(None, None, &err))
        }
    };
    if let Err(err) = outcome {
        tracing::debug!(session_id = %session.id(), error = %err, "frame not accepted");
    }
}
