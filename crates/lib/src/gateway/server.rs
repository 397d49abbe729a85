//! Gateway HTTP + WebSocket server (single port).

use crate::agents::{AgentDirectory, WorkerIdentity};
use crate::config::{self, Config};
use crate::gateway::protocol::{
    AgentStatusResponse, ErrorBody, HistoryQuery, HistoryResponse, PollQuery, PollResponse,
    ReplyParams, ReplyResponse, SendParams, StatusParams, UnreadQuery,
};
use crate::notifier::{ChannelAddress, PushEvent, PushNotifier};
use crate::relay::{
    self, PollStatus, RelayDispatcher, RelayError, StaticFallback, Submission, Unread,
};
use crate::session::{UserId, UserSessions};
use crate::store::{MemoryMessageStore, MessageStore};
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use serde_json::json;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;

const MAX_HISTORY_LIMIT: usize = 500;

/// Shared state for the gateway handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<Config>,
    pub store: Arc<dyn MessageStore>,
    pub agents: Arc<AgentDirectory>,
    pub sessions: Arc<UserSessions>,
    /// Worker subscriptions (push transport).
    pub notifier: Arc<PushNotifier>,
    pub dispatcher: Arc<RelayDispatcher>,
}

impl GatewayState {
    /// Wire the relay components around the given store and registries, with the
    /// static fallback responder.
    pub fn new(
        config: Config,
        store: Arc<dyn MessageStore>,
        agents: Arc<AgentDirectory>,
        sessions: Arc<UserSessions>,
    ) -> Self {
        let notifier = Arc::new(PushNotifier::new(config.relay.event_buffer));
        let dispatcher = Arc::new(RelayDispatcher::new(
            store.clone(),
            notifier.clone(),
            Arc::new(StaticFallback::from_config(&config.fallback)),
            config.fallback.agent_name.clone(),
        ));
        Self {
            config: Arc::new(config),
            store,
            agents,
            sessions,
            notifier,
            dispatcher,
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let error = match &self {
            RelayError::Store(_) | RelayError::Internal(_) => {
                log::error!("request failed: {}", self);
                "internal error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(ErrorBody { error })).into_response()
    }
}

/// Token from `Authorization: Bearer <token>`.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

async fn authenticate_user(state: &GatewayState, headers: &HeaderMap) -> Result<UserId, RelayError> {
    let token = bearer_token(headers).ok_or(RelayError::Unauthorized)?;
    state
        .sessions
        .authenticate(token)
        .await
        .ok_or(RelayError::Unauthorized)
}

async fn authenticate_worker(
    state: &GatewayState,
    headers: &HeaderMap,
) -> Result<WorkerIdentity, RelayError> {
    let token = bearer_token(headers).ok_or(RelayError::Unauthorized)?;
    state
        .agents
        .authenticate(token)
        .await
        .ok_or(RelayError::Unauthorized)
}

/// Parse a JSON body after authentication, so a bad credential is always 401.
fn parse_body<T: serde::de::DeserializeOwned>(body: &Bytes) -> Result<T, RelayError> {
    serde_json::from_slice(body).map_err(|e| RelayError::BadRequest(format!("invalid JSON body: {}", e)))
}

/// Gateway routes over the given state.
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/", get(health_http))
        .route("/api/chat/send", post(send_message))
        .route("/api/chat/poll", get(poll_reply))
        .route("/api/chat/history", get(chat_history))
        .route("/api/chat/reply", post(ingest_reply))
        .route("/api/chat/unread", get(chat_unread))
        .route("/api/agent/status", patch(update_agent_status))
        .route("/api/agent/subscribe", get(subscribe_handler))
        .with_state(state)
}

/// Serve on an already-bound listener until `shutdown` completes. Runs the
/// subscription heartbeat alongside.
pub async fn serve<F>(listener: tokio::net::TcpListener, state: GatewayState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let heartbeat = tokio::spawn(run_heartbeat(
        state.notifier.clone(),
        state.config.relay.heartbeat_interval(),
    ));
    let notifier = state.notifier.clone();
    let result = axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            shutdown.await;
            log::info!("shutdown signal received, closing worker subscriptions");
            notifier.broadcast(PushEvent::Shutdown).await;
        })
        .await
        .context("gateway server exited");
    heartbeat.abort();
    result
}

/// Run the gateway server; binds to config.gateway.bind:config.gateway.port.
/// Loads the agent registry next to `config_path` and blocks until shutdown (e.g. Ctrl+C).
pub async fn run_gateway(config: Config, config_path: PathBuf) -> Result<()> {
    let bind = config.gateway.bind.trim().to_string();
    if !config::is_loopback_bind(&bind) {
        log::warn!(
            "gateway bound to non-loopback address {}; tokens travel in clear text unless a TLS proxy fronts it",
            bind
        );
    }

    let registry_path = config::resolve_registry_path(&config, &config_path);
    let agents = Arc::new(AgentDirectory::load(&registry_path).await);
    log::info!("agent registry: {}", registry_path.display());
    let sessions = Arc::new(UserSessions::from_config(&config));
    if config.users.is_empty() {
        log::warn!("no users configured; chat endpoints will reject every session");
    }
    let store: Arc<dyn MessageStore> = Arc::new(MemoryMessageStore::new());

    let bind_addr = format!("{}:{}", bind, config.gateway.port);
    let state = GatewayState::new(config, store, agents, sessions);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("gateway listening on {}", bind_addr);

    serve(listener, state, shutdown_signal()).await?;
    log::info!("gateway stopped");
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Periodic `ping` on every subscription so idle connections survive proxies.
async fn run_heartbeat(notifier: Arc<PushNotifier>, every: std::time::Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let n = notifier.broadcast(PushEvent::Ping).await;
        log::debug!("heartbeat sent to {} subscription(s)", n);
    }
}

/// GET / returns a simple health JSON (for probes).
async fn health_http(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    Json(json!({
        "runtime": "running",
        "port": state.config.gateway.port,
        "subscribers": state.notifier.subscriber_count().await,
    }))
}

/// POST /api/chat/send: route a user message to the live worker or the fallback.
async fn send_message(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Submission>, RelayError> {
    let user_id = authenticate_user(&state, &headers).await?;
    let params: SendParams = parse_body(&body)?;
    let content = params.content.unwrap_or_default();
    let agent = state.agents.for_user(&user_id).await;
    let submission = state
        .dispatcher
        .submit(&user_id, &content, agent.as_ref())
        .await?;
    Ok(Json(submission))
}

/// GET /api/chat/poll?msgId=: `{ready:false}` until the placeholder resolves.
async fn poll_reply(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Query(query): Query<PollQuery>,
) -> Result<Json<PollResponse>, RelayError> {
    let user_id = authenticate_user(&state, &headers).await?;
    let status = relay::poll_message(state.store.as_ref(), &user_id, query.msg_id.as_deref()).await?;
    Ok(Json(match status {
        PollStatus::Pending => PollResponse::pending(),
        PollStatus::Ready(view) => PollResponse::ready(view),
    }))
}

/// GET /api/chat/history?limit=: resolved messages, oldest first.
async fn chat_history(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, RelayError> {
    let user_id = authenticate_user(&state, &headers).await?;
    let limit = query
        .limit
        .and_then(|s| s.trim().parse::<usize>().ok())
        .unwrap_or(state.config.relay.history_limit)
        .clamp(1, MAX_HISTORY_LIMIT);
    let messages = relay::history(state.store.as_ref(), &user_id, limit).await?;
    Ok(Json(HistoryResponse { messages }))
}

/// POST /api/chat/reply: worker resolves a placeholder.
async fn ingest_reply(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ReplyResponse>, RelayError> {
    let worker = authenticate_worker(&state, &headers).await?;
    let params: ReplyParams = parse_body(&body)?;
    let message = relay::ingest_reply(
        state.store.as_ref(),
        &worker,
        params.msg_id.as_deref(),
        params.content.as_deref(),
    )
    .await?;
    let message = message
        .view()
        .ok_or_else(|| anyhow::anyhow!("resolved message has no view"))?;
    Ok(Json(ReplyResponse { ok: true, message }))
}

/// GET /api/chat/unread?since=: worker catch-up after a missed push.
async fn chat_unread(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Query(query): Query<UnreadQuery>,
) -> Result<Json<Unread>, RelayError> {
    let worker = authenticate_worker(&state, &headers).await?;
    let since = query.since.as_deref().and_then(|s| {
        chrono::DateTime::parse_from_rfc3339(s.trim())
            .map(|d| d.with_timezone(&chrono::Utc))
            .ok()
    });
    let unread = relay::unread(state.store.as_ref(), &worker, since).await?;
    Ok(Json(unread))
}

/// PATCH /api/agent/status: worker reports its liveness.
async fn update_agent_status(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<AgentStatusResponse>, RelayError> {
    let worker = authenticate_worker(&state, &headers).await?;
    let params: StatusParams = parse_body(&body)?;
    let record = state
        .agents
        .set_status(&worker.agent_id, params.status)
        .await?
        .ok_or(RelayError::NotFound)?;
    log::info!("agent {} is now {:?}", record.id, record.status);
    Ok(Json(record.into()))
}

/// GET /api/agent/subscribe upgrades to WebSocket; the worker then receives its push events.
async fn subscribe_handler(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let worker = match authenticate_worker(&state, &headers).await {
        Ok(w) => w,
        Err(e) => return e.into_response(),
    };
    ws.on_upgrade(move |socket| handle_subscription(socket, state, worker))
}

async fn handle_subscription(mut socket: WebSocket, state: GatewayState, worker: WorkerIdentity) {
    let address = ChannelAddress::new(worker.user_id.clone(), worker.agent_id.clone());
    let mut event_rx = state.notifier.subscribe(address).await;
    log::info!("worker subscribed: user {} agent {}", worker.user_id, worker.agent_id);

    loop {
        tokio::select! {
            biased;

            event = event_rx.recv() => {
                match event {
                    Ok(event) => {
                        let is_shutdown = event == PushEvent::Shutdown;
                        let Ok(text) = serde_json::to_string(&event) else { continue };
                        if socket.send(WsMessage::Text(text)).await.is_err() || is_shutdown {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        log::debug!("worker subscription lagged {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => continue,
                }
            }
        }
    }

    drop(event_rx);
    state.notifier.prune().await;
    log::info!("worker unsubscribed: user {} agent {}", worker.user_id, worker.agent_id);
}
