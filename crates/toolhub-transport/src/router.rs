//! HTTP router.

use std::{collections::HashMap, sync::Arc, time::Duration};

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::{delete, get, post},
};
use bytes::Bytes;
use serde_json::{Map, Value, json};
use toolhub_core::{AuthFlow, AuthReply, CallerContext, RoutingError, SessionId};
use toolhub_session::{CloseReason, Dispatcher, Handshake, Session, SessionManager};
use toolhub_tools::ToolRegistry;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{ApiError, sse, websocket};

/// Header carrying the API key.
pub const API_KEY_HEADER: &str = "x-api-key";
/// Header returning the id of a newly opened session.
pub const SESSION_HEADER: &str = "mcp-session-id";
/// Header carrying a JSON object of caller-context overrides.
pub const USER_CONTEXT_HEADER: &str = "user-context";
/// Header naming the caller's tenant.
pub const TENANT_HEADER: &str = "x-tenant-id";

/// Default interval between WebSocket heartbeats.
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(15);

/// Shared state behind every route.
#[derive(Clone)]
pub struct AppState {
    pub manager: SessionManager,
    pub dispatcher: Dispatcher,
    pub registry: Arc<ToolRegistry>,
    pub heartbeat: Duration,
}

impl AppState {
    #[must_use]
    pub fn new(manager: SessionManager, dispatcher: Dispatcher, registry: Arc<ToolRegistry>) -> Self {
        Self {
            manager,
            dispatcher,
            registry,
            heartbeat: DEFAULT_HEARTBEAT,
        }
    }

    #[must_use]
    pub const fn with_heartbeat(mut self, every: Duration) -> Self {
        self.heartbeat = every;
        self
    }
}

/// Build the application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/ws", get(websocket::ws_handler))
        .route("/sessions", post(open_session))
        .route("/sessions/{id}", delete(close_session))
        .route("/sessions/{id}/messages", post(submit_message))
        .route("/sessions/{id}/events", get(sse::events_handler))
        .route("/tools", get(list_tools))
        .route("/admin/reload", post(reload))
        .route("/oauth/{tool}/authorize", get(oauth_authorize))
        .route("/oauth/{tool}/callback", get(oauth_callback))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub(crate) fn header_api_key(headers: &HeaderMap) -> Option<&str> {
    headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok())
}

/// Caller-context overrides carried by request headers.
///
/// `user-context` is applied first; `x-tenant-id` and a bearer
/// `authorization` header win over the same keys inside it.
///
/// # Errors
/// [`RoutingError::MalformedRequest`] for a header that is not valid text or
/// a `user-context` that is not a JSON object.
pub fn context_overrides(headers: &HeaderMap) -> Result<Map<String, Value>, RoutingError> {
    let mut overrides = match header_text(headers, USER_CONTEXT_HEADER)? {
        Some(raw) => CallerContext::parse_user_context(raw)
            .map_err(|e| RoutingError::MalformedRequest(format!("{USER_CONTEXT_HEADER} header: {e}")))?,
        None => Map::new(),
    };
    if let Some(tenant) = header_text(headers, TENANT_HEADER)? {
        overrides.insert("tenant_id".into(), Value::String(tenant.to_owned()));
    }
    if let Some(token) =
        header_text(headers, "authorization")?.and_then(|v| v.strip_prefix("Bearer "))
    {
        overrides.insert("access_token".into(), Value::String(token.trim().to_owned()));
    }
    Ok(overrides)
}

fn header_text<'a>(headers: &'a HeaderMap, name: &str) -> Result<Option<&'a str>, RoutingError> {
    headers
        .get(name)
        .map(|v| {
            v.to_str()
                .map_err(|_| RoutingError::MalformedRequest(format!("{name} header is not valid text")))
        })
        .transpose()
}

pub(crate) fn parse_session_id(raw: &str) -> Result<SessionId, RoutingError> {
    raw.parse()
        .map_err(|_| RoutingError::UnknownSession(raw.to_owned()))
}

/// Authenticate, then look up a session owned by the caller.
pub(crate) async fn owned_session(
    state: &AppState,
    raw_id: &str,
    headers: &HeaderMap,
) -> Result<Arc<Session>, RoutingError> {
    let api_key = header_api_key(headers);
    state.manager.authenticate(api_key)?;
    let id = parse_session_id(raw_id)?;
    state.manager.get_owned(id, api_key).await
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn open_session(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let handshake = Handshake {
        api_key: header_api_key(&headers).map(str::to_owned),
        overrides: context_overrides(&headers)?,
    };
    let session = state.manager.open(handshake, None).await?;
    let id = session.id().to_string();
    Ok((
        StatusCode::CREATED,
        [(SESSION_HEADER, id.clone())],
        Json(json!({ "session_id": id })),
    ))
}

async fn submit_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let session = owned_session(&state, &id, &headers).await?;
    let overrides = context_overrides(&headers)?;
    state.dispatcher.submit(&session, body.to_vec(), overrides)?;
    Ok(StatusCode::ACCEPTED)
}

async fn close_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let session = owned_session(&state, &id, &headers).await?;
    state.manager.close(session.id(), CloseReason::Client).await;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_tools(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    state.manager.authenticate(header_api_key(&headers))?;
    Ok(Json(json!({
        "tools": state.dispatcher.table().catalog(),
        "agents": state.registry.agents(),
    })))
}

async fn reload(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<Value>, ApiError> {
    let principal = state.manager.authenticate(header_api_key(&headers))?;
    let outcome = state.registry.reload(state.dispatcher.table()).await?;
    tracing::info!(
        principal = %principal.label,
        added = outcome.report.added.len(),
        removed = outcome.report.removed.len(),
        replaced = outcome.report.replaced.len(),
        failed = outcome.failed_sources.len(),
        "tool table reloaded"
    );
    Ok(Json(json!({
        "added": outcome.report.added,
        "removed": outcome.report.removed,
        "replaced": outcome.report.replaced,
        "failed_sources": outcome.failed_sources,
        "tools": state.dispatcher.table().len(),
    })))
}

fn auth_flow(state: &AppState, tool: &str) -> Result<Arc<dyn AuthFlow>, RoutingError> {
    state
        .dispatcher
        .table()
        .lookup(tool)
        .and_then(|binding| binding.auth_flow().cloned())
        .ok_or_else(|| RoutingError::UnknownTool(tool.to_owned()))
}

fn auth_reply(reply: AuthReply) -> Response {
    match reply {
        AuthReply::Redirect(url) => Redirect::to(&url).into_response(),
        AuthReply::Json(body) => Json(body).into_response(),
    }
}

async fn oauth_authorize(
    State(state): State<AppState>,
    Path(tool): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    let flow = auth_flow(&state, &tool)?;
    let reply = flow.authorize(&query).await.map_err(ApiError::AuthFlow)?;
    Ok(auth_reply(reply))
}

async fn oauth_callback(
    State(state): State<AppState>,
    Path(tool): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    let flow = auth_flow(&state, &tool)?;
    let reply = flow.callback(&query).await.map_err(ApiError::AuthFlow)?;
    tracing::info!(%tool, "authorization flow completed");
    Ok(auth_reply(reply))
}
