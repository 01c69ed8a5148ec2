//! Connection handlers for the Convoy server.
//!
//! This module wires the core into axum: the WebSocket lifecycle (join,
//! chat, pushes, heartbeat) and the background sweeper.

use crate::api;
use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use bytes::BytesMut;
use convoy_core::{
    outbox, ChatReceipt, ChatSession, Connection, DeliveryError, DeliveryRouter, Inbox,
    NotificationStore, PresenceRegistry, Push,
};
use convoy_protocol::{codes, Encoded, Encoding, Frame, FrameCodec, SenderInfo};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Shared server state.
pub struct AppState {
    /// Live connections.
    pub registry: Arc<PresenceRegistry>,
    /// Durable notifications.
    pub store: Arc<NotificationStore>,
    /// Persist-resolve-push orchestration.
    pub router: DeliveryRouter,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state backed by the in-memory notification store.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let registry = Arc::new(PresenceRegistry::new());
        let store = Arc::new(NotificationStore::with_config(
            Arc::new(convoy_core::MemoryBackend::new()),
            config.notifications.store_config(),
        ));

        Self {
            router: DeliveryRouter::new(Arc::clone(&store), Arc::clone(&registry)),
            registry,
            store,
            config,
        }
    }
}

/// Build the HTTP application.
pub fn app(state: Arc<AppState>) -> Router {
    let ws_path = state.config.transport.websocket_path.clone();
    Router::new()
        .route(&ws_path, get(ws_handler))
        .route("/health", get(health_handler))
        .merge(api::routes())
        .with_state(state)
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let sweeper = spawn_sweeper(Arc::clone(&state));

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Convoy server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Periodically reclaim expired notifications and evict silent connections.
pub fn spawn_sweeper(state: Arc<AppState>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(state.config.notifications.sweep_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            sweep_once(&state).await;
        }
    })
}

async fn sweep_once(state: &AppState) {
    match state.store.sweep_expired().await {
        Ok(removed) => metrics::record_reclaimed(removed),
        Err(e) => {
            warn!(error = %e, "Expiry sweep failed");
            metrics::record_error("sweep");
        }
    }

    let evicted = state.registry.evict_stale(state.config.heartbeat.timeout());
    if !evicted.is_empty() {
        debug!(count = evicted.len(), "Evicted stale connections");
        metrics::record_evictions(evicted.len());
    }
    metrics::set_online(&state.registry.stats());
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.registry.stats();
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": stats.connections,
        "users": stats.users
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let max = state.config.limits.max_message_size;
    ws.max_message_size(max)
        .on_upgrade(move |socket| handle_websocket(socket, state))
}

type WsSink = SplitSink<WebSocket, Message>;

/// Per-connection state held by the transport task.
struct Session {
    id: String,
    codec: FrameCodec,
    inbox: Option<Inbox>,
    chat: Option<ChatSession>,
}

impl Session {
    fn is_joined(&self) -> bool {
        self.chat.is_some()
    }
}

/// Next push for this connection; pends until the connection has joined.
///
/// Returns `None` once the registry drops the connection's outbox.
async fn next_push(inbox: &mut Option<Inbox>) -> Option<Arc<Push>> {
    match inbox {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let mut session = Session {
        id: Uuid::new_v4().to_string(),
        codec: FrameCodec::default(),
        inbox: None,
        chat: None,
    };
    debug!(connection = %session.id, "WebSocket connected");

    let (mut sender, mut receiver) = socket.split();

    let heartbeat = state.config.heartbeat.interval_ms.min(u64::from(u32::MAX)) as u32;
    let connected = Frame::connected(&session.id, heartbeat);
    if let Err(e) = send_frame(&mut sender, &session.codec, &connected).await {
        error!(connection = %session.id, error = %e, "Failed to send Connected frame");
        return;
    }

    // Read buffer for partial frames
    let mut read_buffer = BytesMut::with_capacity(4096);

    let timeout = state.config.heartbeat.timeout();
    let idle = tokio::time::sleep(timeout);
    tokio::pin!(idle);

    loop {
        tokio::select! {
            biased;

            push = next_push(&mut session.inbox) => {
                let Some(push) = push else {
                    debug!(connection = %session.id, "Outbox closed, dropping connection");
                    break;
                };
                if send_frame(&mut sender, &session.codec, &push.to_frame()).await.is_err() {
                    break;
                }
            }

            msg = receiver.next() => {
                idle.as_mut().reset(Instant::now() + timeout);
                if session.is_joined() {
                    state.registry.touch(&session.id);
                }

                let keep_going = match msg {
                    Some(Ok(Message::Binary(data))) => {
                        session.codec.set_encoding(Encoding::MessagePack);
                        read_buffer.extend_from_slice(&data);
                        handle_binary(&mut read_buffer, &mut session, &state, &mut sender).await
                    }
                    Some(Ok(Message::Text(text))) => {
                        session.codec.set_encoding(Encoding::Json);
                        match session.codec.decode_text(&text) {
                            Ok(frame) => handle_frame(frame, &mut session, &state, &mut sender).await,
                            Err(e) => reject(&mut sender, &session, e.to_string()).await,
                        }
                    }
                    Some(Ok(Message::Ping(data))) => sender.send(Message::Pong(data)).await.map_err(Into::into),
                    Some(Ok(Message::Pong(_))) => Ok(()),
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %session.id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %session.id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(connection = %session.id, "WebSocket stream ended");
                        break;
                    }
                };

                if let Err(e) = keep_going {
                    debug!(connection = %session.id, error = %e, "Send failed, closing");
                    break;
                }
            }

            () = &mut idle => {
                debug!(connection = %session.id, "Heartbeat timeout");
                break;
            }
        }
    }

    if session.is_joined() {
        state.registry.unregister(&session.id);
        metrics::set_online(&state.registry.stats());
    }

    debug!(connection = %session.id, "WebSocket disconnected");
}

/// Decode and handle every complete binary frame in the buffer.
async fn handle_binary(
    buffer: &mut BytesMut,
    session: &mut Session,
    state: &Arc<AppState>,
    sender: &mut WsSink,
) -> Result<()> {
    loop {
        match session.codec.decode_from(buffer) {
            Ok(Some(frame)) => handle_frame(frame, session, state, sender).await?,
            Ok(None) => return Ok(()),
            Err(e) => {
                buffer.clear();
                return reject(sender, session, e.to_string()).await;
            }
        }
    }
}

async fn reject(sender: &mut WsSink, session: &Session, reason: String) -> Result<()> {
    warn!(connection = %session.id, error = %reason, "Invalid frame");
    metrics::record_error("protocol");
    send_frame(
        sender,
        &session.codec,
        &Frame::error(0, codes::INVALID_FRAME, reason),
    )
    .await
}

/// Handle a decoded frame.
async fn handle_frame(
    frame: Frame,
    session: &mut Session,
    state: &Arc<AppState>,
    sender: &mut WsSink,
) -> Result<()> {
    let response = match frame {
        Frame::Join {
            user_id,
            user_type,
            display_name,
        } => {
            if user_id.trim().is_empty() {
                Frame::error(0, codes::VALIDATION_FAILED, "userId is required")
            } else {
                let (tx, rx) = outbox();
                let connection =
                    Connection::new(session.id.clone(), user_id, user_type, display_name, tx);
                let identity: SenderInfo = connection.sender_info();

                // Swap the inbox before registering so nothing pushed on
                // registration is lost.
                session.inbox = Some(rx);
                state.registry.register(connection);
                session.chat = Some(ChatSession::new(state.router.clone(), identity));

                metrics::record_join(user_type);
                metrics::set_online(&state.registry.stats());
                debug!(connection = %session.id, user_type = %user_type, "Joined");
                Frame::joined(&session.id)
            }
        }

        Frame::SendDirectMessage {
            id,
            to_user_id,
            body,
        } => match &session.chat {
            Some(chat) => {
                let result = chat.send_direct(&to_user_id, &body).await;
                metrics::record_chat("direct");
                chat_response(id, result)
            }
            None => Frame::error(id, codes::NOT_JOINED, "join before sending messages"),
        },

        Frame::SendBroadcast {
            id,
            to_user_type,
            body,
        } => match &session.chat {
            Some(chat) => {
                let result = chat.send_broadcast(to_user_type, &body).await;
                metrics::record_chat("broadcast");
                chat_response(id, result)
            }
            None => Frame::error(id, codes::NOT_JOINED, "join before sending messages"),
        },

        Frame::Ping { timestamp } => Frame::pong(timestamp),

        other => {
            warn!(connection = %session.id, frame_type = ?other.frame_type(), "Unexpected frame type");
            Frame::error(0, codes::INVALID_FRAME, "unexpected frame type")
        }
    };

    send_frame(sender, &session.codec, &response).await
}

fn chat_response(id: u64, result: Result<ChatReceipt, DeliveryError>) -> Frame {
    match result {
        Ok(receipt) => {
            metrics::record_pushes("receive_message", receipt.delivered, receipt.dropped);
            Frame::ack(id, receipt.delivered.min(u32::MAX as usize) as u32)
        }
        Err(DeliveryError::Validation(reason)) => {
            Frame::error(id, codes::VALIDATION_FAILED, reason)
        }
        Err(e) => {
            error!(error = %e, "Chat delivery failed");
            metrics::record_error("chat");
            Frame::error(id, codes::INTERNAL, e.to_string())
        }
    }
}

/// Send a frame in the connection's encoding.
async fn send_frame(sender: &mut WsSink, codec: &FrameCodec, frame: &Frame) -> Result<()> {
    let message = match codec.encode(frame)? {
        Encoded::Binary(data) => Message::Binary(data.to_vec()),
        Encoded::Text(text) => Message::Text(text),
    };
    sender.send(message).await?;
    Ok(())
}
