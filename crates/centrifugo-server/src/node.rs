//! The node: global state and hub of everything.
//!
//! All cross-component operations funnel through here: client and admin
//! registration, the channel subscription book, publish paths, control
//! plane exchange with peer nodes, and the API command dispatcher.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use serde_json::value::RawValue;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use centrifugo_core::codec::{self, Payload};
use centrifugo_core::commands::{
    BroadcastApiCommand, DisconnectApiCommand, HistoryApiCommand, PresenceApiCommand,
    PublishApiCommand, Request, UnsubscribeApiCommand,
};
use centrifugo_core::message::{control, DisconnectControl, UnsubscribeControl};
use centrifugo_core::{
    error::close, AdminMessage, Channel, ClientError, ClientInfo, ConnId, ControlMessage,
    JoinMessage, LeaveMessage, Message, NodeInfo, Push, Response, UserId, VERSION,
};

use crate::channel::{parse_channel, resolve_opts};
use crate::client::Client;
use crate::config::{ChannelOptions, Config};
use crate::engine::{publish_outcome, Engine, EngineError, EngineResult};
use crate::hub::{AdminHub, ClientHub};

/// Counters exposed through `stats` and the node ping control message.
#[derive(Default)]
pub struct Metrics {
    pub num_msg_published: AtomicI64,
    pub num_msg_sent: AtomicI64,
    pub num_client_requests: AtomicI64,
    pub num_api_requests: AtomicI64,
    pub num_connects: AtomicI64,
    pub num_subscribes: AtomicI64,
}

impl Metrics {
    fn snapshot(&self) -> HashMap<String, i64> {
        let mut m = HashMap::new();
        m.insert(
            "num_msg_published".into(),
            self.num_msg_published.load(Ordering::Relaxed),
        );
        m.insert(
            "num_msg_sent".into(),
            self.num_msg_sent.load(Ordering::Relaxed),
        );
        m.insert(
            "num_client_requests".into(),
            self.num_client_requests.load(Ordering::Relaxed),
        );
        m.insert(
            "num_api_requests".into(),
            self.num_api_requests.load(Ordering::Relaxed),
        );
        m.insert(
            "num_connects".into(),
            self.num_connects.load(Ordering::Relaxed),
        );
        m.insert(
            "num_subscribes".into(),
            self.num_subscribes.load(Ordering::Relaxed),
        );
        m
    }
}

struct PeerEntry {
    info: NodeInfo,
    updated: Instant,
}

pub struct Node {
    uid: String,
    started: u64,
    config: RwLock<Config>,
    engine: OnceLock<Arc<dyn Engine>>,
    pub(crate) clients: ClientHub,
    pub(crate) admins: AdminHub,
    peers: Mutex<HashMap<String, PeerEntry>>,
    pub metrics: Metrics,
    shutdown_tx: watch::Sender<bool>,
    shutting_down: AtomicBool,
}

impl Node {
    pub fn new(mut config: Config) -> Arc<Self> {
        config.initialize();
        if config.name.is_empty() {
            config.name = std::env::var("HOSTNAME").unwrap_or_else(|_| "centrifugo".to_string());
        }
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            uid: Uuid::new_v4().to_string(),
            started: centrifugo_core::timestamp_secs(),
            config: RwLock::new(config),
            engine: OnceLock::new(),
            clients: ClientHub::new(),
            admins: AdminHub::new(),
            peers: Mutex::new(HashMap::new()),
            metrics: Metrics::default(),
            shutdown_tx,
            shutting_down: AtomicBool::new(false),
        })
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    /// Snapshot of the current configuration. In-flight commands keep
    /// using the snapshot they observed even across a SIGHUP reload.
    pub fn config(&self) -> Config {
        self.config.read().clone()
    }

    /// Atomically swap the configuration (SIGHUP reload path).
    pub fn set_config(&self, mut config: Config) {
        config.initialize();
        *self.config.write() = config;
        info!("configuration updated");
    }

    pub fn set_engine(&self, engine: Arc<dyn Engine>) {
        if self.engine.set(engine).is_err() {
            warn!("engine already set");
        }
    }

    fn engine(&self) -> EngineResult<&Arc<dyn Engine>> {
        self.engine.get().ok_or(EngineError::NotRunning)
    }

    pub fn engine_name(&self) -> &'static str {
        self.engine.get().map(|e| e.name()).unwrap_or("none")
    }

    /// Channel closed when the node shuts down.
    pub fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Relaxed)
    }

    /// Start the engine, subscribe the control plane channels and spawn
    /// background tickers.
    pub async fn run(self: &Arc<Self>) -> EngineResult<()> {
        let engine = self.engine()?.clone();
        engine.run().await?;

        let cfg = self.config();
        engine.subscribe(cfg.admin_channel()).await?;
        engine.subscribe(cfg.control_channel()).await?;

        self.spawn_node_ping();
        self.spawn_peer_clean();
        self.spawn_metrics_snapshot();
        info!(engine = engine.name(), node = %cfg.name, "node running");
        Ok(())
    }

    /// Close every connection and stop the engine. Idempotent.
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("node shutting down");
        let _ = self.shutdown_tx.send(true);

        for admin in self.admins.all() {
            admin.close(close::SHUTDOWN, "shutdown").await;
        }
        for client in self.clients.all_conns() {
            client.close(close::SHUTDOWN, "shutdown").await;
        }
        if let Ok(engine) = self.engine() {
            engine.shutdown().await;
        }
    }

    // ========================================================================
    // Connection registry and subscription book
    // ========================================================================

    pub fn add_conn(&self, uid: &ConnId, user: &UserId, client: Arc<Client>) {
        self.clients.add(uid, user, client);
        self.metrics.num_connects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn remove_conn(&self, uid: &ConnId, user: &UserId) {
        self.clients.remove(uid, user);
    }

    /// Add a local subscription; the engine is subscribed exactly on the
    /// 0→1 transition of local subscribers.
    pub async fn add_sub(&self, channel: &str, uid: &ConnId) -> EngineResult<()> {
        let ch_id = self.config.read().channel_id(channel);
        self.metrics.num_subscribes.fetch_add(1, Ordering::Relaxed);
        if self.clients.add_sub(&ch_id, uid) {
            self.engine()?.subscribe(ch_id).await?;
        }
        Ok(())
    }

    /// Remove a local subscription; the engine is unsubscribed exactly on
    /// the 1→0 transition.
    pub async fn remove_sub(&self, channel: &str, uid: &ConnId) -> EngineResult<()> {
        let ch_id = self.config.read().channel_id(channel);
        if self.clients.remove_sub(&ch_id, uid) {
            self.engine()?.unsubscribe(ch_id).await?;
        }
        Ok(())
    }

    pub fn num_subscribers(&self, ch_id: &str) -> usize {
        self.clients.num_subscribers(ch_id)
    }

    /// User-facing names of channels with local subscribers.
    pub fn local_channels(&self) -> Vec<Channel> {
        let prefix = format!("{}.", self.config.read().channel_prefix);
        self.clients
            .channels()
            .into_iter()
            .filter_map(|ch_id| ch_id.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }

    // ========================================================================
    // Publish paths
    // ========================================================================

    /// Publish a message into a channel. Returns after the engine
    /// acknowledged the publish.
    pub async fn publish(
        &self,
        channel: &str,
        data: Box<RawValue>,
        client: Option<ConnId>,
        info: Option<ClientInfo>,
    ) -> Result<(), ClientError> {
        let cfg = self.config();
        let parsed = parse_channel(&cfg, channel)?;
        let opts = resolve_opts(&cfg, &parsed)?;
        self.publish_with_opts(&cfg, &opts, channel, data, client, info)
            .await
    }

    pub(crate) async fn publish_with_opts(
        &self,
        cfg: &Config,
        opts: &ChannelOptions,
        channel: &str,
        data: Box<RawValue>,
        client: Option<ConnId>,
        info: Option<ClientInfo>,
    ) -> Result<(), ClientError> {
        if opts.watch {
            let params = json!({ "channel": channel, "data": &data });
            self.publish_admin_message("message", params);
        }

        let message = Message::new(channel.to_string(), data, client, info);
        self.metrics.num_msg_published.fetch_add(1, Ordering::Relaxed);

        let engine = self.engine().map_err(|_| ClientError::Internal)?;
        let rx = engine.publish_message(cfg.channel_id(channel), message, opts);
        publish_outcome(rx).await.map_err(|e| {
            error!(channel, error = %e, "publish failed");
            ClientError::Internal
        })
    }

    pub async fn publish_join(&self, channel: &str, info: ClientInfo) -> Result<(), ClientError> {
        let ch_id = self.config.read().channel_id(channel);
        let engine = self.engine().map_err(|_| ClientError::Internal)?;
        let rx = engine.publish_join(
            ch_id,
            JoinMessage {
                channel: channel.to_string(),
                data: info,
            },
        );
        publish_outcome(rx).await.map_err(|_| ClientError::Internal)
    }

    pub async fn publish_leave(&self, channel: &str, info: ClientInfo) -> Result<(), ClientError> {
        let ch_id = self.config.read().channel_id(channel);
        let engine = self.engine().map_err(|_| ClientError::Internal)?;
        let rx = engine.publish_leave(
            ch_id,
            LeaveMessage {
                channel: channel.to_string(),
                data: info,
            },
        );
        publish_outcome(rx).await.map_err(|_| ClientError::Internal)
    }

    /// Broadcast an admin message to every admin on every node. Errors are
    /// logged, not surfaced: the admin stream is advisory.
    pub fn publish_admin_message(&self, kind: &str, params: serde_json::Value) {
        let Ok(engine) = self.engine() else { return };
        let Ok(params) = RawValue::from_string(params.to_string()) else {
            return;
        };
        let _ = engine.publish_admin(AdminMessage {
            kind: kind.to_string(),
            params,
        });
    }

    fn publish_control(&self, method: &str, params: serde_json::Value) {
        let Ok(engine) = self.engine() else { return };
        let Ok(params) = RawValue::from_string(params.to_string()) else {
            return;
        };
        let _ = engine.publish_control(ControlMessage {
            uid: self.uid.clone(),
            method: method.to_string(),
            params,
        });
    }

    // ========================================================================
    // Presence and history wrappers
    // ========================================================================

    pub async fn add_presence(
        &self,
        channel: &str,
        uid: &str,
        info: ClientInfo,
    ) -> Result<(), ClientError> {
        let ch_id = self.config.read().channel_id(channel);
        self.engine()
            .map_err(|_| ClientError::Internal)?
            .add_presence(&ch_id, uid, info)
            .await
            .map_err(|_| ClientError::Internal)
    }

    pub async fn remove_presence(&self, channel: &str, uid: &str) -> Result<(), ClientError> {
        let ch_id = self.config.read().channel_id(channel);
        self.engine()
            .map_err(|_| ClientError::Internal)?
            .remove_presence(&ch_id, uid)
            .await
            .map_err(|_| ClientError::Internal)
    }

    pub async fn presence(
        &self,
        channel: &str,
    ) -> Result<HashMap<ConnId, ClientInfo>, ClientError> {
        let ch_id = self.config.read().channel_id(channel);
        self.engine()
            .map_err(|_| ClientError::Internal)?
            .presence(&ch_id)
            .await
            .map_err(|_| ClientError::Internal)
    }

    pub async fn history(&self, channel: &str, limit: usize) -> Result<Vec<Message>, ClientError> {
        let ch_id = self.config.read().channel_id(channel);
        self.engine()
            .map_err(|_| ClientError::Internal)?
            .history(&ch_id, limit)
            .await
            .map_err(|_| ClientError::Internal)
    }

    // ========================================================================
    // Inbound dispatch (from engines)
    // ========================================================================

    /// Dispatch a raw broker payload by channel kind. This is the entry
    /// point of the broker engine's pub/sub loop.
    pub async fn handle_raw(&self, ch_id: &str, payload: &[u8]) {
        let (admin_ch, control_ch) = {
            let cfg = self.config.read();
            (cfg.admin_channel(), cfg.control_channel())
        };

        let decoded = match codec::decode(payload) {
            Ok(p) => p,
            Err(e) => {
                error!(channel = ch_id, error = %e, "dropping undecodable broker payload");
                return;
            }
        };

        if ch_id == control_ch {
            if let Payload::Control(msg) = decoded {
                self.control_msg(msg).await;
            } else {
                warn!("non-control payload on control channel");
            }
            return;
        }
        if ch_id == admin_ch {
            if let Payload::Admin(msg) = decoded {
                self.admin_msg(&msg);
            } else {
                warn!("non-admin payload on admin channel");
            }
            return;
        }

        match decoded {
            Payload::Message(msg) => self.client_msg(&msg),
            Payload::Join(msg) => self.join_msg(&msg),
            Payload::Leave(msg) => self.leave_msg(&msg),
            _ => warn!(channel = ch_id, "unexpected payload kind on client channel"),
        }
    }

    fn fan_out<T: serde::Serialize>(&self, channel: &str, push: &Push<T>) {
        let ch_id = self.config.read().channel_id(channel);
        let frame = match serde_json::to_string(push) {
            Ok(f) => Bytes::from(f),
            Err(e) => {
                error!(error = %e, "failed to encode push");
                return;
            }
        };
        let subscribers = self.clients.clients_for(&ch_id);
        let delivered = subscribers.len() as i64;
        for client in subscribers {
            client.enqueue(frame.clone());
        }
        self.metrics.num_msg_sent.fetch_add(delivered, Ordering::Relaxed);
    }

    /// Deliver a publication to every local subscriber.
    pub fn client_msg(&self, msg: &Message) {
        self.fan_out(&msg.channel, &Push::new("message", msg));
    }

    pub fn join_msg(&self, msg: &JoinMessage) {
        self.fan_out(&msg.channel, &Push::new("join", msg));
    }

    pub fn leave_msg(&self, msg: &LeaveMessage) {
        self.fan_out(&msg.channel, &Push::new("leave", msg));
    }

    /// Deliver an admin message to every locally connected admin.
    pub fn admin_msg(&self, msg: &AdminMessage) {
        let frame = match serde_json::to_string(msg) {
            Ok(f) => Bytes::from(f),
            Err(e) => {
                error!(error = %e, "failed to encode admin message");
                return;
            }
        };
        for admin in self.admins.all() {
            admin.enqueue(frame.clone());
        }
    }

    /// Handle a control message from a peer (or this node's own ping).
    pub async fn control_msg(&self, msg: ControlMessage) {
        // Own broadcasts already had their local effect, except pings
        // which feed the shared peer registry.
        if msg.uid == self.uid && msg.method != control::PING {
            return;
        }
        match msg.method.as_str() {
            control::PING => match serde_json::from_str::<NodeInfo>(msg.params.get()) {
                Ok(info) => self.register_peer(info),
                Err(e) => error!(error = %e, "bad ping control params"),
            },
            control::UNSUBSCRIBE => {
                match serde_json::from_str::<UnsubscribeControl>(msg.params.get()) {
                    Ok(cmd) => self.unsubscribe_user(&cmd.user, cmd.channel.as_deref()).await,
                    Err(e) => error!(error = %e, "bad unsubscribe control params"),
                }
            }
            control::DISCONNECT => {
                match serde_json::from_str::<DisconnectControl>(msg.params.get()) {
                    Ok(cmd) => self.disconnect_user(&cmd.user).await,
                    Err(e) => error!(error = %e, "bad disconnect control params"),
                }
            }
            other => warn!(method = other, "unknown control method"),
        }
    }

    // ========================================================================
    // Peer registry
    // ========================================================================

    fn register_peer(&self, info: NodeInfo) {
        let mut peers = self.peers.lock();
        peers.insert(
            info.uid.clone(),
            PeerEntry {
                info,
                updated: Instant::now(),
            },
        );
    }

    fn clean_peers(&self, max_delay: Duration) {
        let mut peers = self.peers.lock();
        peers.retain(|_, entry| entry.updated.elapsed() <= max_delay);
    }

    fn peer_infos(&self) -> Vec<NodeInfo> {
        self.peers.lock().values().map(|e| e.info.clone()).collect()
    }

    /// This node's own info, as sent in ping control messages.
    pub fn own_info(&self) -> NodeInfo {
        let mut metrics = self.metrics.snapshot();
        metrics.insert("num_clients".into(), self.clients.num_clients() as i64);
        metrics.insert("num_unique_clients".into(), self.clients.num_users() as i64);
        metrics.insert("num_channels".into(), self.clients.num_channels() as i64);
        NodeInfo {
            name: self.config.read().name.clone(),
            uid: self.uid.clone(),
            started: self.started,
            metrics,
        }
    }

    // ========================================================================
    // User-level operations (API + control plane)
    // ========================================================================

    /// Unsubscribe local connections of a user from one channel, or all
    /// of them when no channel is given.
    pub async fn unsubscribe_user(&self, user: &str, channel: Option<&str>) {
        for client in self.clients.user_conns(user) {
            match channel {
                Some(ch) => {
                    if let Err(e) = client.unsubscribe_channel(ch).await {
                        debug!(user, channel = ch, error = %e, "unsubscribe failed");
                    }
                }
                None => {
                    for ch in client.channels() {
                        if let Err(e) = client.unsubscribe_channel(&ch).await {
                            debug!(user, channel = %ch, error = %e, "unsubscribe failed");
                        }
                    }
                }
            }
        }
    }

    /// Close every local connection of a user.
    pub async fn disconnect_user(&self, user: &str) {
        for client in self.clients.user_conns(user) {
            client.close(close::NORMAL, "disconnect").await;
        }
    }

    // ========================================================================
    // API dispatcher
    // ========================================================================

    /// Handle one API command, from the HTTP API handler or the broker
    /// work queue.
    pub async fn api_cmd(&self, req: &Request) -> Response {
        self.metrics.num_api_requests.fetch_add(1, Ordering::Relaxed);
        let mut resp = Response::new(req.method.clone());
        resp.uid = req.uid.clone();

        let result = match req.method.as_str() {
            "publish" => self.api_publish(req, &mut resp).await,
            "broadcast" => self.api_broadcast(req, &mut resp).await,
            "unsubscribe" => self.api_unsubscribe(req).await,
            "disconnect" => self.api_disconnect(req).await,
            "presence" => self.api_presence(req, &mut resp).await,
            "history" => self.api_history(req, &mut resp).await,
            "channels" => self.api_channels(&mut resp).await,
            "stats" => {
                let cfg = self.config();
                let mut nodes = self.peer_infos();
                if nodes.is_empty() {
                    nodes.push(self.own_info());
                }
                resp.body = json!({
                    "data": {
                        "nodes": nodes,
                        "metrics_interval": cfg.node_metrics_interval,
                    }
                });
                Ok(())
            }
            "node" => {
                resp.body = json!({ "data": self.own_info() });
                Ok(())
            }
            "ping" => {
                resp.body = json!("pong");
                Ok(())
            }
            _ => Err(ClientError::MethodNotFound),
        };

        if let Err(e) = result {
            resp.set_error(e);
        }
        resp
    }

    async fn api_publish(&self, req: &Request, resp: &mut Response) -> Result<(), ClientError> {
        let cmd: PublishApiCommand = req.decode_params()?;
        resp.body = json!({ "channel": &cmd.channel });
        self.publish(&cmd.channel, cmd.data, cmd.client, None).await
    }

    async fn api_broadcast(&self, req: &Request, resp: &mut Response) -> Result<(), ClientError> {
        let cmd: BroadcastApiCommand = req.decode_params()?;
        if cmd.channels.is_empty() {
            return Err(ClientError::InvalidMessage);
        }
        let mut first_err = None;
        for channel in &cmd.channels {
            if let Err(e) = self
                .publish(channel, cmd.data.clone(), cmd.client.clone(), None)
                .await
            {
                warn!(channel = %channel, error = %e.as_str(), "broadcast publish failed");
                first_err.get_or_insert(e);
            }
        }
        resp.body = json!({ "channels": cmd.channels.len() });
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn api_unsubscribe(&self, req: &Request) -> Result<(), ClientError> {
        let cmd: UnsubscribeApiCommand = req.decode_params()?;
        if cmd.user.is_empty() {
            return Err(ClientError::InvalidMessage);
        }
        let channel = cmd.channel.as_deref().filter(|c| !c.is_empty());
        self.unsubscribe_user(&cmd.user, channel).await;
        self.publish_control(
            control::UNSUBSCRIBE,
            json!({ "user": cmd.user, "channel": channel }),
        );
        Ok(())
    }

    async fn api_disconnect(&self, req: &Request) -> Result<(), ClientError> {
        let cmd: DisconnectApiCommand = req.decode_params()?;
        if cmd.user.is_empty() {
            return Err(ClientError::InvalidMessage);
        }
        self.disconnect_user(&cmd.user).await;
        self.publish_control(control::DISCONNECT, json!({ "user": cmd.user }));
        Ok(())
    }

    async fn api_presence(&self, req: &Request, resp: &mut Response) -> Result<(), ClientError> {
        let cmd: PresenceApiCommand = req.decode_params()?;
        let cfg = self.config();
        let parsed = parse_channel(&cfg, &cmd.channel)?;
        let opts = resolve_opts(&cfg, &parsed)?;
        if !opts.presence {
            return Err(ClientError::NotAvailable);
        }
        let data = self.presence(&cmd.channel).await?;
        resp.body = json!({ "channel": cmd.channel, "data": data });
        Ok(())
    }

    async fn api_history(&self, req: &Request, resp: &mut Response) -> Result<(), ClientError> {
        let cmd: HistoryApiCommand = req.decode_params()?;
        let cfg = self.config();
        let parsed = parse_channel(&cfg, &cmd.channel)?;
        let opts = resolve_opts(&cfg, &parsed)?;
        if !opts.history_enabled() {
            return Err(ClientError::NotAvailable);
        }
        let data = self.history(&cmd.channel, 0).await?;
        resp.body = json!({ "channel": cmd.channel, "data": data });
        Ok(())
    }

    async fn api_channels(&self, resp: &mut Response) -> Result<(), ClientError> {
        let data = self
            .engine()
            .map_err(|_| ClientError::Internal)?
            .channels()
            .await
            .map_err(|_| ClientError::Internal)?;
        resp.body = json!({ "data": data });
        Ok(())
    }

    // ========================================================================
    // Background tickers
    // ========================================================================

    fn spawn_node_ping(self: &Arc<Self>) {
        let node = self.clone();
        let mut shutdown = self.shutdown_rx();
        tokio::spawn(async move {
            loop {
                let interval = node.config.read().node_ping_interval.max(1);
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(interval)) => {
                        let info = node.own_info();
                        match serde_json::to_value(&info) {
                            Ok(params) => node.publish_control(control::PING, params),
                            Err(e) => error!(error = %e, "failed to encode node info"),
                        }
                    }
                    _ = shutdown.changed() => return,
                }
            }
        });
    }

    fn spawn_peer_clean(self: &Arc<Self>) {
        let node = self.clone();
        let mut shutdown = self.shutdown_rx();
        tokio::spawn(async move {
            loop {
                let (interval, max_delay) = {
                    let cfg = node.config.read();
                    (cfg.node_info_clean_interval.max(1), cfg.node_info_max_delay)
                };
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(interval)) => {
                        node.clean_peers(Duration::from_secs(max_delay));
                    }
                    _ = shutdown.changed() => return,
                }
            }
        });
    }

    fn spawn_metrics_snapshot(self: &Arc<Self>) {
        let node = self.clone();
        let mut shutdown = self.shutdown_rx();
        tokio::spawn(async move {
            loop {
                let interval = node.config.read().node_metrics_interval.max(1);
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(interval)) => {
                        // Refresh our own registry entry so `stats` stays
                        // current even between control pings.
                        let info = node.own_info();
                        node.register_peer(info);
                    }
                    _ = shutdown.changed() => return,
                }
            }
        });
    }

    /// Body of the admin `info` command.
    pub fn info_body(&self) -> serde_json::Value {
        let cfg = self.config();
        json!({
            "version": VERSION,
            "engine": self.engine_name(),
            "node_name": cfg.name,
            "insecure": cfg.insecure,
        })
    }
}
