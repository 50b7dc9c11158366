//! HTTP surface: endpoint routing, WebSocket upgrade and session glue.
//!
//! One router is built per listening port from a set of handler flags, so
//! any subset of client WebSocket, HTTP API, admin socket and debug
//! endpoints can be served on each port.

use std::fmt;
use std::ops::BitOr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use centrifugo_core::commands::Frame;
use centrifugo_core::{auth, error::close, Response as ApiResponse, VERSION};

use crate::admin::AdminClient;
use crate::client::{Client, Session, SessionError};
use crate::node::Node;

/// Which endpoints a port serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HandlerFlags(u8);

impl HandlerFlags {
    pub const NONE: HandlerFlags = HandlerFlags(0);
    /// Raw WebSocket client endpoint at `/connection/websocket`.
    pub const RAW_WS: HandlerFlags = HandlerFlags(1);
    /// HTTP API at `/api`.
    pub const API: HandlerFlags = HandlerFlags(1 << 1);
    /// Admin WebSocket at `/socket` plus the admin info page.
    pub const ADMIN: HandlerFlags = HandlerFlags(1 << 2);
    /// Debug endpoint at `/debug`.
    pub const DEBUG: HandlerFlags = HandlerFlags(1 << 3);

    pub fn contains(self, other: HandlerFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for HandlerFlags {
    type Output = HandlerFlags;

    fn bitor(self, rhs: HandlerFlags) -> HandlerFlags {
        HandlerFlags(self.0 | rhs.0)
    }
}

impl fmt::Display for HandlerFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.contains(HandlerFlags::RAW_WS) {
            names.push("websocket");
        }
        if self.contains(HandlerFlags::API) {
            names.push("api");
        }
        if self.contains(HandlerFlags::ADMIN) {
            names.push("admin");
        }
        if self.contains(HandlerFlags::DEBUG) {
            names.push("debug");
        }
        write!(f, "{}", names.join(" | "))
    }
}

/// Options for building one port's router.
#[derive(Debug, Clone, Default)]
pub struct MuxOptions {
    pub flags: HandlerFlags,
    /// URL prefix to nest all endpoints under, e.g. `/centrifugo`.
    pub prefix: String,
}

/// Build the router serving the requested endpoints.
pub fn build_router(node: Arc<Node>, opts: MuxOptions) -> Router {
    let mut router = Router::new();

    if opts.flags.contains(HandlerFlags::RAW_WS) {
        router = router.route("/connection/websocket", get(client_ws_handler));
    }
    if opts.flags.contains(HandlerFlags::API) {
        router = router
            .route("/api", post(api_handler))
            .route("/api/", post(api_handler));
    }
    if opts.flags.contains(HandlerFlags::ADMIN) {
        router = router
            .route("/socket", get(admin_ws_handler))
            .route("/", get(info_handler));
    }
    if opts.flags.contains(HandlerFlags::DEBUG) {
        router = router.route("/debug", get(debug_handler));
    }

    if !opts.prefix.is_empty() {
        router = Router::new().nest(&opts.prefix, router);
    }

    router
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(node)
}

// ============================================================================
// WebSocket session glue
// ============================================================================

enum Outbound {
    Text(String),
    Ping,
    Close(u16, String),
}

/// [`Session`] implementation over a WebSocket writer task.
struct WsSession {
    tx: mpsc::Sender<Outbound>,
}

#[async_trait]
impl Session for WsSession {
    async fn send(&self, data: String) -> Result<(), SessionError> {
        self.tx
            .send(Outbound::Text(data))
            .await
            .map_err(|e| SessionError(e.to_string()))
    }

    async fn close(&self, code: u16, reason: &str) {
        let _ = self.tx.send(Outbound::Close(code, reason.to_string())).await;
    }
}

/// Split a socket and spawn the single-writer task owning the sink.
fn spawn_ws_writer(
    socket: WebSocket,
) -> (
    mpsc::Sender<Outbound>,
    futures_util::stream::SplitStream<WebSocket>,
) {
    let (mut sink, stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Outbound>(64);
    tokio::spawn(async move {
        while let Some(out) = rx.recv().await {
            match out {
                Outbound::Text(text) => {
                    if sink.send(WsMessage::Text(text)).await.is_err() {
                        break;
                    }
                }
                Outbound::Ping => {
                    if sink.send(WsMessage::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
                Outbound::Close(code, reason) => {
                    let _ = sink
                        .send(WsMessage::Close(Some(CloseFrame {
                            code,
                            reason: reason.into(),
                        })))
                        .await;
                    break;
                }
            }
        }
    });
    (tx, stream)
}

async fn client_ws_handler(
    State(node): State<Arc<Node>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_client_socket(node, socket))
}

async fn handle_client_socket(node: Arc<Node>, socket: WebSocket) {
    let ping_interval = node.config().ping_interval.max(1);
    let (tx, mut stream) = spawn_ws_writer(socket);
    let session = Arc::new(WsSession { tx: tx.clone() });
    let client = Client::new(node, session);
    debug!(client = %client.uid(), "websocket connection accepted");

    let mut ping = tokio::time::interval(Duration::from_secs(ping_interval));
    ping.tick().await;

    loop {
        tokio::select! {
            _ = ping.tick() => {
                if tx.send(Outbound::Ping).await.is_err() {
                    break;
                }
            }
            msg = stream.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        if let Err(e) = client.handle(&text).await {
                            client.close(close::NORMAL, e.as_str()).await;
                            return;
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }
    client.close(close::NORMAL, "connection closed").await;
}

async fn admin_ws_handler(
    State(node): State<Arc<Node>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_admin_socket(node, socket))
}

async fn handle_admin_socket(node: Arc<Node>, socket: WebSocket) {
    let ping_interval = node.config().ping_interval.max(1);
    let (tx, mut stream) = spawn_ws_writer(socket);
    let session = Arc::new(WsSession { tx: tx.clone() });
    let admin = AdminClient::new(node, session);
    debug!(admin = %admin.uid(), "admin connection accepted");

    let mut ping = tokio::time::interval(Duration::from_secs(ping_interval));
    ping.tick().await;

    loop {
        tokio::select! {
            _ = ping.tick() => {
                if tx.send(Outbound::Ping).await.is_err() {
                    break;
                }
            }
            msg = stream.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        if let Err(e) = admin.handle(&text).await {
                            admin.close(close::NORMAL, e.as_str()).await;
                            return;
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }
    admin.close(close::NORMAL, "connection closed").await;
}

// ============================================================================
// HTTP API
// ============================================================================

async fn api_handler(
    State(node): State<Arc<Node>>,
    headers: HeaderMap,
    body: Bytes,
) -> axum::response::Response {
    let cfg = node.config();

    if !cfg.insecure_api {
        let sign = headers
            .get("X-API-Sign")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if cfg.secret.is_empty() || !auth::check_api_sign(&cfg.secret, &body, sign) {
            info!("API request with invalid sign");
            return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
        }
    }

    let Ok(text) = std::str::from_utf8(&body) else {
        return (StatusCode::BAD_REQUEST, "invalid body").into_response();
    };
    let Ok(frame) = Frame::parse(text) else {
        return (StatusCode::BAD_REQUEST, "invalid message").into_response();
    };

    let mut responses: Vec<ApiResponse> = Vec::new();
    for req in frame.into_requests() {
        responses.push(node.api_cmd(&req).await);
    }
    Json(responses).into_response()
}

async fn info_handler(State(node): State<Arc<Node>>) -> impl IntoResponse {
    Json(node.info_body())
}

async fn debug_handler(State(node): State<Arc<Node>>) -> impl IntoResponse {
    Json(json!({
        "version": VERSION,
        "node": node.own_info(),
        "channels": node.local_channels(),
        "engine": node.engine_name(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_flags_combine() {
        let flags = HandlerFlags::RAW_WS | HandlerFlags::API;
        assert!(flags.contains(HandlerFlags::RAW_WS));
        assert!(flags.contains(HandlerFlags::API));
        assert!(!flags.contains(HandlerFlags::ADMIN));
        assert_eq!(flags.to_string(), "websocket | api");
        assert!(HandlerFlags::NONE.is_empty());
    }
}
