//! Admin connection.
//!
//! Admins authenticate with a short-lived HMAC token (unless the node
//! runs with `insecure_admin`) and implicitly receive the global admin
//! stream; there is no subscription book.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

use centrifugo_core::commands::{ConnectAdminCommand, Frame, Request};
use centrifugo_core::{auth, ClientError, ConnId, Response};

use crate::client::Session;
use crate::node::Node;
use crate::queue::{ByteQueue, PushError};

pub struct AdminClient {
    uid: ConnId,
    node: Arc<Node>,
    session: Arc<dyn Session>,
    queue: ByteQueue,
    authenticated: AtomicBool,
    closed: AtomicBool,
}

impl AdminClient {
    pub fn new(node: Arc<Node>, session: Arc<dyn Session>) -> Arc<Self> {
        let cfg = node.config();
        let admin = Arc::new(Self {
            uid: Uuid::new_v4().to_string(),
            node,
            session,
            queue: ByteQueue::new(cfg.client_queue_max_size),
            authenticated: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });
        admin.spawn_write_loop();
        admin
    }

    pub fn uid(&self) -> &ConnId {
        &self.uid
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::Relaxed)
    }

    fn spawn_write_loop(self: &Arc<Self>) {
        let admin = self.clone();
        tokio::spawn(async move {
            while let Some(frame) = admin.queue.pop().await {
                let text = String::from_utf8_lossy(&frame).into_owned();
                if admin.session.send(text).await.is_err() {
                    admin
                        .close(centrifugo_core::error::close::NORMAL, "error sending message")
                        .await;
                    return;
                }
            }
        });
    }

    /// Enqueue an admin stream frame.
    pub fn enqueue(self: &Arc<Self>, frame: Bytes) {
        if !self.is_authenticated() {
            return;
        }
        match self.queue.push(frame) {
            Ok(()) => {}
            Err(PushError::Full) => {
                let admin = self.clone();
                tokio::spawn(async move {
                    admin
                        .close(centrifugo_core::error::close::SLOW, "slow client")
                        .await;
                });
            }
            Err(PushError::Closed) => {}
        }
    }

    /// Handle one inbound frame. A returned error is fatal.
    pub async fn handle(self: &Arc<Self>, raw: &str) -> Result<(), ClientError> {
        let frame = Frame::parse(raw)?;
        let batch = frame.is_batch();
        let requests = frame.into_requests();
        if requests.is_empty() {
            return Err(ClientError::InvalidMessage);
        }

        let mut responses = Vec::with_capacity(requests.len());
        for req in requests {
            responses.push(self.handle_request(req)?);
        }
        let payload = if batch {
            serde_json::to_string(&responses)
        } else {
            serde_json::to_string(&responses[0])
        }
        .map_err(|_| ClientError::Internal)?;

        if self.queue.push(Bytes::from(payload)).is_err() {
            return Err(ClientError::Internal);
        }
        Ok(())
    }

    fn handle_request(self: &Arc<Self>, req: Request) -> Result<Response, ClientError> {
        if req.method != "connect" && !self.is_authenticated() {
            return Err(ClientError::Unauthorized);
        }
        let mut resp = match req.method.as_str() {
            "connect" => self.handle_connect(&req)?,
            "info" => Response::new("info").with_body(json!({ "data": self.node.info_body() })),
            "ping" => Response::new("ping").with_body(json!("pong")),
            _ => return Err(ClientError::MethodNotFound),
        };
        resp.uid = req.uid;
        Ok(resp)
    }

    fn handle_connect(self: &Arc<Self>, req: &Request) -> Result<Response, ClientError> {
        let cfg = self.node.config();
        let mut resp = Response::new("connect");

        if self.is_authenticated() {
            resp.body = json!(true);
            return Ok(resp);
        }

        if !cfg.insecure_admin {
            let cmd: ConnectAdminCommand = req.decode_params()?;
            let secret = cfg.admin_token_secret();
            if secret.is_empty() || !auth::check_admin_token(secret, &cmd.token) {
                warn!("invalid admin token");
                return Err(ClientError::Unauthorized);
            }
        }

        self.authenticated.store(true, Ordering::Relaxed);
        self.node.admins.add(&self.uid, self.clone());
        debug!(admin = %self.uid, "admin connected");
        resp.body = json!(true);
        Ok(resp)
    }

    /// Close the admin connection. Idempotent.
    pub async fn close(&self, code: u16, reason: &str) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.node.admins.remove(&self.uid);
        self.queue.close();
        self.session.close(code, reason).await;
    }
}
