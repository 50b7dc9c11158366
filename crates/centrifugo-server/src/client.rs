//! Client connection: command dispatch, auth, subscriptions, outbound
//! queue.
//!
//! Every connection owns three concurrent tasks: the transport read loop
//! (driven by the HTTP layer calling [`Client::handle`]), the write loop
//! draining the byte-bounded outbound queue, and timers for staleness,
//! expiry and presence pings. Close is idempotent and driven through a
//! stop signal all tasks watch.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::json;
use serde_json::value::RawValue;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

use centrifugo_core::commands::{
    ConnectCommand, Frame, HistoryCommand, PresenceCommand, PublishCommand, RefreshCommand,
    Request, SubscribeCommand, UnsubscribeCommand,
};
use centrifugo_core::{
    auth, error::close, timestamp_secs, Channel, ClientError, ClientInfo, ConnId, Message,
    Response, UserId, VERSION,
};

use crate::channel::{parse_channel, resolve_opts};
use crate::config::Config;
use crate::node::Node;
use crate::queue::{ByteQueue, PushError};

#[derive(Debug, Error)]
#[error("session send failed: {0}")]
pub struct SessionError(pub String);

/// Transport seam between the connection state machine and whatever
/// carries the frames (WebSocket here; a SockJS-style layer would plug in
/// the same way).
#[async_trait]
pub trait Session: Send + Sync {
    /// Send one text frame to the peer.
    async fn send(&self, data: String) -> Result<(), SessionError>;

    /// Close the transport with a code and reason.
    async fn close(&self, code: u16, reason: &str);
}

struct State {
    authenticated: bool,
    user: UserId,
    /// Absolute expiry time (Unix seconds), 0 when the connection does
    /// not expire.
    exp: u64,
    default_info: Option<Box<RawValue>>,
    /// Subscribed channels with their per-channel info.
    channels: HashMap<Channel, Option<Box<RawValue>>>,
}

pub struct Client {
    uid: ConnId,
    node: Arc<Node>,
    session: Arc<dyn Session>,
    queue: ByteQueue,
    state: Mutex<State>,
    closed: AtomicBool,
    stop_tx: watch::Sender<bool>,
}

impl Client {
    pub fn new(node: Arc<Node>, session: Arc<dyn Session>) -> Arc<Self> {
        let cfg = node.config();
        let (stop_tx, _) = watch::channel(false);
        let client = Arc::new(Self {
            uid: Uuid::new_v4().to_string(),
            node,
            session,
            queue: ByteQueue::new(cfg.client_queue_max_size),
            state: Mutex::new(State {
                authenticated: false,
                user: String::new(),
                exp: 0,
                default_info: None,
                channels: HashMap::new(),
            }),
            closed: AtomicBool::new(false),
            stop_tx,
        });
        client.spawn_write_loop(cfg.message_send_timeout);
        client.spawn_stale_timer(cfg.stale_connection_close_delay);
        client
    }

    pub fn uid(&self) -> &ConnId {
        &self.uid
    }

    pub fn user(&self) -> UserId {
        self.state.lock().user.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.lock().authenticated
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    /// Channels this connection is subscribed to.
    pub fn channels(&self) -> Vec<Channel> {
        self.state.lock().channels.keys().cloned().collect()
    }

    /// Queued outbound bytes, for debug introspection.
    pub fn queue_size(&self) -> usize {
        self.queue.size()
    }

    // ========================================================================
    // Outbound path
    // ========================================================================

    /// Enqueue a frame for delivery. Never blocks: when the frame would
    /// take the queue over its byte cap the connection is closed as too
    /// slow.
    pub fn enqueue(self: &Arc<Self>, frame: Bytes) {
        match self.queue.push(frame) {
            Ok(()) => {}
            Err(PushError::Full) => {
                warn!(client = %self.uid, queued = self.queue.size(), "closing slow client");
                let client = self.clone();
                tokio::spawn(async move {
                    client.close(close::SLOW, "slow client").await;
                });
            }
            Err(PushError::Closed) => {}
        }
    }

    fn spawn_write_loop(self: &Arc<Self>, send_timeout: u64) {
        let client = self.clone();
        tokio::spawn(async move {
            while let Some(frame) = client.queue.pop().await {
                let text = String::from_utf8_lossy(&frame).into_owned();
                let sent = if send_timeout > 0 {
                    match tokio::time::timeout(
                        Duration::from_secs(send_timeout),
                        client.session.send(text),
                    )
                    .await
                    {
                        Ok(result) => result,
                        Err(_) => {
                            client.close(close::SLOW, "slow").await;
                            return;
                        }
                    }
                } else {
                    client.session.send(text).await
                };
                if sent.is_err() {
                    client.close(close::NORMAL, "error sending message").await;
                    return;
                }
            }
        });
    }

    fn spawn_stale_timer(self: &Arc<Self>, delay: u64) {
        let client = self.clone();
        let mut stop = self.stop_tx.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(delay)) => {
                    if !client.is_authenticated() {
                        client.close(close::STALE, "stale").await;
                    }
                }
                _ = stop.changed() => {}
            }
        });
    }

    fn spawn_presence_ping(self: &Arc<Self>) {
        let client = self.clone();
        let mut stop = self.stop_tx.subscribe();
        tokio::spawn(async move {
            loop {
                let interval = client.node.config().presence_ping_interval.max(1);
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(interval)) => {
                        client.update_channel_presence().await;
                    }
                    _ = stop.changed() => return,
                }
            }
        });
    }

    /// Refresh presence for every subscribed channel that maintains it.
    async fn update_channel_presence(&self) {
        let cfg = self.node.config();
        for channel in self.channels() {
            let Ok(parsed) = parse_channel(&cfg, &channel) else {
                continue;
            };
            let Ok(opts) = resolve_opts(&cfg, &parsed) else {
                continue;
            };
            if opts.presence {
                let info = self.client_info(&channel);
                let _ = self.node.add_presence(&channel, &self.uid, info).await;
            }
        }
    }

    fn spawn_expire_timer(self: &Arc<Self>) {
        let client = self.clone();
        let mut stop = self.stop_tx.subscribe();
        tokio::spawn(async move {
            loop {
                let exp = client.state.lock().exp;
                if exp == 0 {
                    return;
                }
                let grace = client.node.config().expired_connection_close_delay;
                let now = timestamp_secs();
                let deadline = exp + grace;
                if now >= deadline {
                    // The grace window passed and no refresh extended the
                    // connection.
                    client.close(close::EXPIRED, "expired").await;
                    return;
                }
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(deadline - now)) => {}
                    _ = stop.changed() => return,
                }
            }
        });
    }

    // ========================================================================
    // Inbound command handling
    // ========================================================================

    /// Handle one inbound frame. A returned error is fatal: the caller
    /// must close the connection.
    pub async fn handle(self: &Arc<Self>, raw: &str) -> Result<(), ClientError> {
        let cfg = self.node.config();
        if raw.len() > cfg.client_request_max_size {
            return Err(ClientError::LimitExceeded);
        }
        self.node
            .metrics
            .num_client_requests
            .fetch_add(1, Ordering::Relaxed);

        let frame = Frame::parse(raw)?;
        let batch = frame.is_batch();
        let requests = frame.into_requests();
        if requests.is_empty() {
            return Err(ClientError::InvalidMessage);
        }

        let mut responses = Vec::with_capacity(requests.len());
        for req in requests {
            responses.push(self.handle_request(&cfg, req).await?);
        }

        let payload = if batch {
            serde_json::to_string(&responses)
        } else {
            serde_json::to_string(&responses[0])
        }
        .map_err(|_| ClientError::Internal)?;
        self.enqueue(Bytes::from(payload));
        Ok(())
    }

    async fn handle_request(
        self: &Arc<Self>,
        cfg: &Config,
        req: Request,
    ) -> Result<Response, ClientError> {
        if req.method != "connect" && !self.is_authenticated() {
            return Err(ClientError::Unauthorized);
        }
        let mut resp = match req.method.as_str() {
            "connect" => self.handle_connect(cfg, &req)?,
            "refresh" => self.handle_refresh(cfg, &req)?,
            "subscribe" => self.handle_subscribe(cfg, &req).await?,
            "unsubscribe" => self.handle_unsubscribe(cfg, &req).await?,
            "publish" => self.handle_publish(cfg, &req).await?,
            "presence" => self.handle_presence(cfg, &req).await?,
            "history" => self.handle_history(cfg, &req).await?,
            "ping" => Response::new("ping").with_body(json!("pong")),
            _ => return Err(ClientError::MethodNotFound),
        };
        resp.uid = req.uid;
        Ok(resp)
    }

    fn handle_connect(self: &Arc<Self>, cfg: &Config, req: &Request) -> Result<Response, ClientError> {
        let mut resp = Response::new("connect");

        if self.is_authenticated() {
            // Repeated connect is idempotent and returns the existing
            // client id.
            let exp = self.state.lock().exp;
            resp.body = connect_body(&self.uid, exp, false);
            return Ok(resp);
        }

        let cmd: ConnectCommand = req.decode_params()?;

        // The token signs the raw info string, before the empty-info
        // normalization.
        if !cfg.insecure
            && !auth::check_connect_token(&cfg.secret, &cmd.user, &cmd.exp, &cmd.info, &cmd.sign)
        {
            warn!(user = %cmd.user, "invalid connect token");
            return Err(ClientError::InvalidToken);
        }
        let info = normalize_info(cmd.info);

        let exp = if cfg.insecure {
            0
        } else {
            parse_exp(&cmd.exp)?
        };
        let now = timestamp_secs();
        if exp > 0 && exp <= now {
            resp.body = connect_body(&self.uid, exp, true);
            resp.set_error(ClientError::ConnectionExpired);
            return Ok(resp);
        }

        let default_info = match RawValue::from_string(info) {
            Ok(v) if v.get() != "{}" => Some(v),
            Ok(_) => None,
            Err(_) => {
                warn!(user = %cmd.user, "connect info is not valid JSON, ignoring");
                None
            }
        };

        {
            let mut st = self.state.lock();
            st.authenticated = true;
            st.user = cmd.user.clone();
            st.exp = exp;
            st.default_info = default_info;
        }
        self.node.add_conn(&self.uid, &cmd.user, self.clone());
        self.spawn_presence_ping();
        if exp > 0 {
            self.spawn_expire_timer();
        }

        debug!(client = %self.uid, user = %cmd.user, "client connected");
        resp.body = connect_body(&self.uid, exp, false);
        Ok(resp)
    }

    fn handle_refresh(&self, cfg: &Config, req: &Request) -> Result<Response, ClientError> {
        let mut resp = Response::new("refresh");
        let cmd: RefreshCommand = req.decode_params()?;

        if !cfg.insecure
            && !auth::check_connect_token(&cfg.secret, &cmd.user, &cmd.exp, &cmd.info, &cmd.sign)
        {
            warn!(user = %cmd.user, "invalid refresh token");
            return Err(ClientError::InvalidToken);
        }

        let exp = parse_exp(&cmd.exp)?;
        let now = timestamp_secs();
        if exp > 0 && exp <= now {
            resp.body = json!({ "ttl": null, "expired": true });
            return Ok(resp);
        }

        self.state.lock().exp = exp;
        let ttl = if exp > 0 { Some(exp - now) } else { None };
        resp.body = json!({ "ttl": ttl, "expired": false });
        Ok(resp)
    }

    async fn handle_subscribe(
        self: &Arc<Self>,
        cfg: &Config,
        req: &Request,
    ) -> Result<Response, ClientError> {
        let cmd: SubscribeCommand = req.decode_params()?;
        if cmd.channel.is_empty() {
            return Err(ClientError::InvalidMessage);
        }
        let mut resp = Response::new("subscribe");
        resp.body = json!({ "channel": cmd.channel, "status": false });

        let parsed = match parse_channel(cfg, &cmd.channel) {
            Ok(p) => p,
            Err(e) => {
                resp.set_error(e);
                return Ok(resp);
            }
        };
        let opts = match resolve_opts(cfg, &parsed) {
            Ok(o) => o,
            Err(e) => {
                resp.set_error(e);
                return Ok(resp);
            }
        };

        {
            let st = self.state.lock();
            if st.channels.contains_key(&cmd.channel) {
                resp.set_error(ClientError::AlreadySubscribed);
                return Ok(resp);
            }
            if st.channels.len() >= cfg.client_channel_limit {
                resp.set_error(ClientError::LimitExceeded);
                return Ok(resp);
            }
        }

        let user = self.user();
        if !parsed.user_allowed(&user) || !parsed.client_allowed(&self.uid) {
            resp.set_error(ClientError::PermissionDenied);
            return Ok(resp);
        }
        if user.is_empty() && !opts.anonymous && !cfg.insecure {
            resp.set_error(ClientError::PermissionDenied);
            return Ok(resp);
        }
        if parsed.private
            && !cfg.insecure
            && !auth::check_channel_sign(&cfg.secret, &self.uid, &cmd.channel, &cmd.info, &cmd.sign)
        {
            resp.set_error(ClientError::PermissionDenied);
            return Ok(resp);
        }

        let channel_info = if cmd.info.is_empty() {
            None
        } else {
            RawValue::from_string(cmd.info.clone()).ok()
        };

        if self.node.add_sub(&cmd.channel, &self.uid).await.is_err() {
            resp.set_error(ClientError::Internal);
            return Ok(resp);
        }
        self.state
            .lock()
            .channels
            .insert(cmd.channel.clone(), channel_info);

        let info = self.client_info(&cmd.channel);
        if opts.presence {
            let _ = self.node.add_presence(&cmd.channel, &self.uid, info.clone()).await;
        }
        if opts.join_leave {
            let _ = self.node.publish_join(&cmd.channel, info).await;
        }

        let mut body = json!({ "channel": cmd.channel, "status": true });
        if opts.history_recover {
            if cmd.recover {
                let (messages, recovered) = self.recover(&cmd.channel, cmd.last.as_deref()).await;
                body["messages"] = json!(messages);
                body["recovered"] = json!(recovered);
            } else {
                // Hand the client the uid of the newest message so it can
                // ask for recovery after a reconnect.
                let last = self
                    .node
                    .history(&cmd.channel, 1)
                    .await
                    .ok()
                    .and_then(|h| h.first().map(|m| m.uid.clone()))
                    .unwrap_or_default();
                body["last"] = json!(last);
            }
        }
        resp.body = body;
        Ok(resp)
    }

    /// Collect messages published after `last`, oldest first. `recovered`
    /// is true only when `last` itself was still found in history, i.e.
    /// nothing in between was lost.
    async fn recover(&self, channel: &str, last: Option<&str>) -> (Vec<Message>, bool) {
        let history = self.node.history(channel, 0).await.unwrap_or_default();
        match last {
            Some(last) if !last.is_empty() => {
                let mut missed = Vec::new();
                let mut found = false;
                for msg in &history {
                    if msg.uid == last {
                        found = true;
                        break;
                    }
                    missed.push(msg.clone());
                }
                missed.reverse();
                (missed, found)
            }
            _ => (Vec::new(), false),
        }
    }

    async fn handle_unsubscribe(
        &self,
        _cfg: &Config,
        req: &Request,
    ) -> Result<Response, ClientError> {
        let cmd: UnsubscribeCommand = req.decode_params()?;
        if cmd.channel.is_empty() {
            return Err(ClientError::InvalidMessage);
        }
        let mut resp = Response::new("unsubscribe");
        resp.body = json!({ "channel": cmd.channel, "status": true });
        if let Err(e) = self.unsubscribe_channel(&cmd.channel).await {
            resp.set_error(e);
        }
        Ok(resp)
    }

    /// Remove one channel subscription with its presence entry and leave
    /// notification. No-op when not subscribed.
    pub async fn unsubscribe_channel(&self, channel: &str) -> Result<(), ClientError> {
        let removed = self.state.lock().channels.remove(channel);
        let Some(channel_info) = removed else {
            return Ok(());
        };
        let info = {
            let st = self.state.lock();
            ClientInfo {
                user: st.user.clone(),
                client: self.uid.clone(),
                default_info: st.default_info.clone(),
                channel_info,
            }
        };

        let cfg = self.node.config();
        if let Ok(parsed) = parse_channel(&cfg, channel) {
            if let Ok(opts) = resolve_opts(&cfg, &parsed) {
                if opts.presence {
                    let _ = self.node.remove_presence(channel, &self.uid).await;
                }
                if opts.join_leave {
                    let _ = self.node.publish_leave(channel, info).await;
                }
            }
        }
        self.node
            .remove_sub(channel, &self.uid)
            .await
            .map_err(|_| ClientError::Internal)
    }

    async fn handle_publish(&self, cfg: &Config, req: &Request) -> Result<Response, ClientError> {
        let cmd: PublishCommand = req.decode_params()?;
        let mut resp = Response::new("publish");
        resp.body = json!({ "channel": cmd.channel, "status": false });

        if !self.state.lock().channels.contains_key(&cmd.channel) {
            resp.set_error(ClientError::PermissionDenied);
            return Ok(resp);
        }
        let parsed = match parse_channel(cfg, &cmd.channel) {
            Ok(p) => p,
            Err(e) => {
                resp.set_error(e);
                return Ok(resp);
            }
        };
        let opts = match resolve_opts(cfg, &parsed) {
            Ok(o) => o,
            Err(e) => {
                resp.set_error(e);
                return Ok(resp);
            }
        };
        if !opts.publish && !cfg.insecure {
            resp.set_error(ClientError::PermissionDenied);
            return Ok(resp);
        }

        let info = self.client_info(&cmd.channel);
        match self
            .node
            .publish_with_opts(cfg, &opts, &cmd.channel, cmd.data, Some(self.uid.clone()), Some(info))
            .await
        {
            Ok(()) => resp.body = json!({ "channel": cmd.channel, "status": true }),
            Err(e) => resp.set_error(e),
        }
        Ok(resp)
    }

    async fn handle_presence(&self, cfg: &Config, req: &Request) -> Result<Response, ClientError> {
        let cmd: PresenceCommand = req.decode_params()?;
        let mut resp = Response::new("presence");
        resp.body = json!({ "channel": cmd.channel });

        let opts = match parse_channel(cfg, &cmd.channel).and_then(|p| resolve_opts(cfg, &p)) {
            Ok(o) => o,
            Err(e) => {
                resp.set_error(e);
                return Ok(resp);
            }
        };
        if !opts.presence {
            resp.set_error(ClientError::NotAvailable);
            return Ok(resp);
        }
        match self.node.presence(&cmd.channel).await {
            Ok(data) => resp.body = json!({ "channel": cmd.channel, "data": data }),
            Err(e) => resp.set_error(e),
        }
        Ok(resp)
    }

    async fn handle_history(&self, cfg: &Config, req: &Request) -> Result<Response, ClientError> {
        let cmd: HistoryCommand = req.decode_params()?;
        let mut resp = Response::new("history");
        resp.body = json!({ "channel": cmd.channel });

        let opts = match parse_channel(cfg, &cmd.channel).and_then(|p| resolve_opts(cfg, &p)) {
            Ok(o) => o,
            Err(e) => {
                resp.set_error(e);
                return Ok(resp);
            }
        };
        if !opts.history_enabled() {
            resp.set_error(ClientError::NotAvailable);
            return Ok(resp);
        }
        match self.node.history(&cmd.channel, 0).await {
            Ok(data) => resp.body = json!({ "channel": cmd.channel, "data": data }),
            Err(e) => resp.set_error(e),
        }
        Ok(resp)
    }

    /// Client info for presence entries and publication attribution on a
    /// given channel.
    pub fn client_info(&self, channel: &str) -> ClientInfo {
        let st = self.state.lock();
        ClientInfo {
            user: st.user.clone(),
            client: self.uid.clone(),
            default_info: st.default_info.clone(),
            channel_info: st.channels.get(channel).and_then(|ci| ci.clone()),
        }
    }

    // ========================================================================
    // Close
    // ========================================================================

    /// Close the connection: remove subscriptions, presence entries and
    /// the hub registration, stop all tasks and close the transport.
    /// Idempotent.
    pub async fn close(&self, code: u16, reason: &str) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(client = %self.uid, code, reason, "closing client connection");

        let (authenticated, user, channels) = {
            let st = self.state.lock();
            (
                st.authenticated,
                st.user.clone(),
                st.channels.keys().cloned().collect::<Vec<_>>(),
            )
        };
        for channel in channels {
            let _ = self.unsubscribe_channel(&channel).await;
        }
        if authenticated {
            self.node.remove_conn(&self.uid, &user);
        }
        let _ = self.stop_tx.send(true);
        self.queue.close();
        self.session.close(code, reason).await;
    }
}

fn normalize_info(info: String) -> String {
    if info.is_empty() {
        "{}".to_string()
    } else {
        info
    }
}

fn parse_exp(exp: &str) -> Result<u64, ClientError> {
    if exp.is_empty() {
        return Ok(0);
    }
    exp.parse().map_err(|_| ClientError::InvalidMessage)
}

fn connect_body(uid: &str, exp: u64, expired: bool) -> serde_json::Value {
    let expires = exp > 0;
    let now = timestamp_secs();
    let ttl = if expires { Some(exp.saturating_sub(now)) } else { None };
    json!({
        "client": uid,
        "version": VERSION,
        "expires": expires,
        "expired": expired,
        "ttl": ttl,
    })
}
