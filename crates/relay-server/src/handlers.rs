//! Connection handlers for Relay server.
//!
//! This module handles the connection lifecycle, message processing and the
//! small HTTP surface around the WebSocket endpoint.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use bytes::BytesMut;
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use relay_protocol::{codec, codes, Encoding, Frame, ProtocolError, Version, PROTOCOL_VERSION};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;
use tenvis_relay_core::{
    Account, ConnectionGuard, ConnectionManager, Credentials, GatewayError, Handshake, Identity,
    InMemoryAccountStore, ManagerConfig, Outbound, ResolveError, SessionResolver, TokenIssuer,
};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// WebSocket close code sent when the gateway is full.
const CLOSE_TRY_AGAIN_LATER: u16 = 1013;

/// Shared server state.
pub struct AppState {
    /// Live connections and presence.
    pub manager: Arc<ConnectionManager>,
    /// Credential resolver, present when a token secret is configured.
    pub resolver: Option<SessionResolver>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let manager_config = ManagerConfig {
            max_connections: config.limits.max_connections,
        };

        let resolver = config.auth.jwt_secret.as_deref().map(|secret| {
            let issuer = TokenIssuer::with_ttl(secret.as_bytes(), config.auth.token_ttl());
            let accounts = InMemoryAccountStore::with_accounts(
                config.auth.accounts.iter().map(|id| Account::new(id.as_str())),
            );
            SessionResolver::new(issuer, Arc::new(accounts))
        });

        Self {
            manager: Arc::new(ConnectionManager::with_config(manager_config)),
            resolver,
            config,
        }
    }
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {:#}", e);
        }
    }

    let addr = config.bind_addr()?;
    let state = Arc::new(AppState::new(config));
    if state.resolver.is_none() {
        warn!("auth.jwt_secret is not set, /auth/status is disabled");
    }

    let app = build_router(Arc::clone(&state));

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Relay server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, state.config.transport.websocket_path
    );

    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the HTTP router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let mut app = Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .route("/presence", get(presence_handler));

    if state.resolver.is_some() {
        app = app.route("/auth/status", get(auth_status_handler));
    }

    app.with_state(state)
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Current presence snapshot, for clients that missed a broadcast.
async fn presence_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.manager.broadcaster().current();
    Json(serde_json::json!({
        "revision": snapshot.revision,
        "userIds": snapshot.user_ids,
    }))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusQuery {
    session_id: Option<String>,
}

/// Resolve the caller's `(user, session)` from its credential tokens.
async fn auth_status_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<StatusQuery>,
) -> Result<Json<Identity>, AuthRejection> {
    let resolver = state
        .resolver
        .as_ref()
        .ok_or(AuthRejection(ResolveError::Unauthenticated))?;

    let mut credentials = credentials_from_headers(&headers, &state.config.auth.cookie_prefix);
    if let Some(hint) = query.session_id {
        credentials = credentials.with_session_hint(hint);
    }

    match resolver.resolve(&credentials).await {
        Ok(identity) => Ok(Json(identity)),
        Err(e) => {
            debug!(error = %e, "Credential resolution failed");
            Err(AuthRejection(e))
        }
    }
}

/// Collect credential tokens: the bearer token first, then every cookie whose
/// name starts with `cookie_prefix`, in header order.
fn credentials_from_headers(headers: &HeaderMap, cookie_prefix: &str) -> Credentials {
    let mut credentials = Credentials::new();

    if let Some(token) = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
    {
        credentials = credentials.with_token(token.trim());
    }

    let cookies = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='));

    for (name, value) in cookies {
        if name.starts_with(cookie_prefix) {
            credentials = credentials.with_token(value);
        }
    }

    credentials
}

/// A failed credential resolution as an HTTP response.
#[derive(Debug)]
struct AuthRejection(ResolveError);

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ResolveError::Unauthenticated | ResolveError::InvalidToken(_) => {
                StatusCode::UNAUTHORIZED
            }
            ResolveError::IdentitySubjectMissing(_) => StatusCode::NOT_FOUND,
            ResolveError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        let body = Json(serde_json::json!({ "message": self.0.to_string() }));
        (status, body).into_response()
    }
}

/// Handshake query parameters.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HandshakeParams {
    user_id: Option<String>,
    session_id: Option<String>,
    encoding: Option<String>,
    version: Option<String>,
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(params): Query<HandshakeParams>,
) -> Response {
    let encoding = match params.encoding.as_deref() {
        None => state.config.transport.default_encoding,
        Some(raw) => match raw.parse::<Encoding>() {
            Ok(encoding) => encoding,
            Err(e) => return (StatusCode::BAD_REQUEST, e).into_response(),
        },
    };

    if let Some(raw) = params.version.as_deref() {
        let compatible = raw
            .parse::<Version>()
            .is_ok_and(|v| v.is_compatible_with(&PROTOCOL_VERSION));
        if !compatible {
            return (
                StatusCode::BAD_REQUEST,
                format!("Unsupported protocol version {raw}, server speaks {PROTOCOL_VERSION}"),
            )
                .into_response();
        }
    }

    let handshake = Handshake {
        user_id: params.user_id,
        session_id: params.session_id,
    };

    ws.max_message_size(state.config.limits.max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, state, handshake, encoding))
}

/// Write half of a WebSocket, encoding frames with the negotiated encoding.
struct FrameSink {
    sender: SplitSink<WebSocket, Message>,
    encoding: Encoding,
}

impl FrameSink {
    async fn send(&mut self, frame: &Frame) -> Result<()> {
        let (message, len) = match self.encoding {
            Encoding::Msgpack => {
                let data = codec::encode(frame)?;
                let len = data.len();
                (Message::Binary(data.to_vec()), len)
            }
            Encoding::Json => {
                let text = codec::encode_json(frame)?;
                let len = text.len();
                (Message::Text(text), len)
            }
        };
        metrics::record_bytes(len, "outbound");
        self.sender.send(message).await?;
        Ok(())
    }

    /// Send an error frame, then close the socket.
    async fn close_with_error(&mut self, code: u16, close_code: u16, reason: &str) -> Result<()> {
        self.send(&Frame::error(0, code, reason)).await?;
        self.sender
            .send(Message::Close(Some(CloseFrame {
                code: close_code,
                reason: reason.to_owned().into(),
            })))
            .await?;
        Ok(())
    }
}

/// Handle a WebSocket connection.
async fn handle_websocket(
    socket: WebSocket,
    state: Arc<AppState>,
    handshake: Handshake,
    encoding: Encoding,
) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let (sender, mut receiver) = socket.split();
    let mut sink = FrameSink { sender, encoding };

    let (guard, mut outbound) = match state.manager.connect(&handshake) {
        Ok(accepted) => accepted,
        Err(e) => {
            warn!(error = %e, "Rejecting connection");
            metrics::record_error("capacity");
            if let Err(e) = sink
                .close_with_error(error_code(&e), CLOSE_TRY_AGAIN_LATER, &e.to_string())
                .await
            {
                debug!(error = %e, "Failed to send rejection");
            }
            return;
        }
    };

    let connection_id = guard.id().clone();
    metrics::record_presence(state.manager.stats(), guard.identity().is_some());

    debug!(
        connection = %connection_id,
        user = handshake.user_id.as_deref().unwrap_or("-"),
        encoding = ?encoding,
        "WebSocket connected"
    );

    // Connected goes out before anything queued by the manager.
    let identity = guard
        .identity()
        .map(|i| (i.user_id.to_string(), i.session_id.to_string()));
    let connected = Frame::connected(connection_id.as_str(), PROTOCOL_VERSION.major, identity);
    if let Err(e) = sink.send(&connected).await {
        error!(connection = %connection_id, error = %e, "Failed to send Connected frame");
        let changed = guard.close();
        metrics::record_presence(state.manager.stats(), changed);
        return;
    }

    // Read buffer for partial frames
    let mut read_buffer = BytesMut::with_capacity(4096);

    // Unbiased: a busy outbound queue must not starve the socket reader.
    loop {
        tokio::select! {
            item = outbound.recv() => match item {
                Some(Outbound::Frame(frame)) => {
                    if sink.send(&frame).await.is_err() {
                        break;
                    }
                }
                Some(Outbound::Close { code, reason }) => {
                    debug!(connection = %connection_id, code, reason = %reason, "Closing on request");
                    if let Err(e) = sink.close_with_error(code, code, &reason).await {
                        debug!(connection = %connection_id, error = %e, "Failed to send close");
                    }
                    break;
                }
                None => break,
            },

            msg = receiver.next() => match msg {
                Some(Ok(Message::Binary(data))) => {
                    metrics::record_bytes(data.len(), "inbound");
                    read_buffer.extend_from_slice(&data);
                    if process_buffer(&mut read_buffer, &guard, &mut sink).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Text(text))) => {
                    metrics::record_bytes(text.len(), "inbound");
                    let handled = match codec::decode_json(&text) {
                        Ok(frame) => handle_frame(frame, &guard, &mut sink).await,
                        Err(e) => reject_frame(&e, &guard, &mut sink).await,
                    };
                    if handled.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                    // Control frames are answered by the transport.
                }
                Some(Ok(Message::Close(_))) => {
                    debug!(connection = %connection_id, "Received close frame");
                    break;
                }
                Some(Err(e)) => {
                    warn!(connection = %connection_id, error = %e, "WebSocket error");
                    metrics::record_error("websocket");
                    break;
                }
                None => {
                    debug!(connection = %connection_id, "WebSocket stream ended");
                    break;
                }
            },
        }
    }

    let changed = guard.close();
    metrics::record_presence(state.manager.stats(), changed);

    debug!(connection = %connection_id, presence_changed = changed, "WebSocket disconnected");
}

/// Decode and handle every complete frame in the buffer.
async fn process_buffer(
    buffer: &mut BytesMut,
    guard: &ConnectionGuard,
    sink: &mut FrameSink,
) -> Result<()> {
    loop {
        match codec::decode_from(buffer) {
            Ok(Some(frame)) => handle_frame(frame, guard, sink).await?,
            Ok(None) => return Ok(()),
            Err(e) => {
                // The stream position is lost; start over with the next message.
                buffer.clear();
                return reject_frame(&e, guard, sink).await;
            }
        }
    }
}

/// Answer an undecodable frame with an error frame.
async fn reject_frame(
    error: &ProtocolError,
    guard: &ConnectionGuard,
    sink: &mut FrameSink,
) -> Result<()> {
    warn!(connection = %guard.id(), error = %error, "Invalid frame");
    metrics::record_error("decode");

    let code = match error {
        ProtocolError::FrameTooLarge(_) => codes::FRAME_TOO_LARGE,
        _ => codes::MALFORMED_FRAME,
    };
    sink.send(&Frame::error(0, code, error.to_string())).await
}

/// Handle a decoded frame.
async fn handle_frame(frame: Frame, guard: &ConnectionGuard, sink: &mut FrameSink) -> Result<()> {
    match frame {
        Frame::MessageSend { id, message } => {
            let start = Instant::now();
            let receiver = message.receiver_id.clone();

            match guard.send_message(message) {
                Ok(fan_out) => {
                    metrics::record_fan_out(&fan_out, start.elapsed().as_secs_f64());
                    debug!(
                        connection = %guard.id(),
                        receiver = %receiver,
                        to_receiver = fan_out.to_receiver,
                        to_sender = fan_out.to_sender,
                        "Message routed"
                    );
                    if let Some(id) = id {
                        sink.send(&Frame::ack(id)).await?;
                    }
                }
                Err(e) => {
                    warn!(connection = %guard.id(), error = %e, "Message rejected");
                    metrics::record_error("message");
                    sink.send(&Frame::error(id.unwrap_or(0), error_code(&e), e.to_string()))
                        .await?;
                }
            }
        }

        Frame::Ping { timestamp } => {
            sink.send(&Frame::pong(timestamp)).await?;
        }

        Frame::Pong { .. } => {}

        other => {
            warn!(connection = %guard.id(), frame_type = ?other.frame_type(), "Unexpected frame type");
            sink.send(&Frame::error(
                0,
                codes::UNEXPECTED_FRAME,
                format!("Unexpected frame type {:?}", other.frame_type()),
            ))
            .await?;
        }
    }

    Ok(())
}

fn error_code(error: &GatewayError) -> u16 {
    match error {
        GatewayError::CapacityReached(_) => codes::CAPACITY_REACHED,
        GatewayError::Anonymous => codes::ANONYMOUS_CONNECTION,
        GatewayError::SenderMismatch { .. } => codes::SENDER_MISMATCH,
    }
}
