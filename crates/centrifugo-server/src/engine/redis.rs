//! Redis-backed engine.
//!
//! Pub/sub fan-out goes through a dedicated subscriber connection owned by
//! a supervisor task that reconnects with exponential backoff and replays
//! the full subscription set. Presence lives in a sorted-set/hash pair and
//! history in a capped list, all with per-key TTLs. An optional work queue
//! lets the backend push API commands through Redis lists instead of HTTP.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::Mutex;
use redis::aio::MultiplexedConnection;
use serde::Deserialize;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use centrifugo_core::codec;
use centrifugo_core::commands::Request;
use centrifugo_core::{
    AdminMessage, Channel, ChannelId, ClientInfo, ConnId, ControlMessage, JoinMessage,
    LeaveMessage, Message,
};

use super::{resolved, Engine, EngineError, EngineResult, PublishResult};
use crate::config::ChannelOptions;
use crate::node::Node;

const MAX_RECONNECT_DELAY_SECS: u64 = 32;
const API_POP_TIMEOUT_SECS: u64 = 1;

#[derive(Debug, Clone)]
pub struct RedisEngineConfig {
    pub host: String,
    pub port: u16,
    pub password: String,
    pub db: u32,
    /// Full connection URL. Takes precedence over host/port/password/db.
    pub url: String,
    /// Consume API commands from the broker work queue.
    pub api: bool,
    /// Extra API queue shards (`<prefix>.api.0..n-1`) drained in parallel.
    pub num_api_shards: usize,
}

impl Default for RedisEngineConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            password: String::new(),
            db: 0,
            url: String::new(),
            api: false,
            num_api_shards: 0,
        }
    }
}

impl RedisEngineConfig {
    fn connection_url(&self) -> String {
        if !self.url.is_empty() {
            return self.url.clone();
        }
        if self.password.is_empty() {
            format!("redis://{}:{}/{}", self.host, self.port, self.db)
        } else {
            format!("redis://:{}@{}:{}/{}", self.password, self.host, self.port, self.db)
        }
    }
}

enum PubSubCmd {
    Subscribe(ChannelId),
    Unsubscribe(ChannelId),
}

pub struct RedisEngine {
    node: Arc<Node>,
    config: RedisEngineConfig,
    client: redis::Client,
    conn: Mutex<Option<MultiplexedConnection>>,
    cmd_tx: Mutex<Option<mpsc::UnboundedSender<PubSubCmd>>>,
    subs: Arc<Mutex<HashSet<ChannelId>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl RedisEngine {
    pub fn new(node: Arc<Node>, config: RedisEngineConfig) -> EngineResult<Self> {
        let client = redis::Client::open(config.connection_url().as_str())?;
        let (shutdown_tx, _) = watch::channel(false);
        info!(
            host = %config.host,
            port = config.port,
            db = config.db,
            using_password = !config.password.is_empty(),
            "redis engine configured"
        );
        Ok(Self {
            node,
            config,
            client,
            conn: Mutex::new(None),
            cmd_tx: Mutex::new(None),
            subs: Arc::new(Mutex::new(HashSet::new())),
            shutdown_tx,
        })
    }

    fn connection(&self) -> EngineResult<MultiplexedConnection> {
        self.conn.lock().clone().ok_or(EngineError::NotRunning)
    }

    fn channel_prefix(&self) -> String {
        self.node.config().channel_prefix
    }

    fn presence_hash_key(&self, ch_id: &str) -> String {
        format!("{}.presence.hash.{}", self.channel_prefix(), ch_id)
    }

    fn presence_set_key(&self, ch_id: &str) -> String {
        format!("{}.presence.set.{}", self.channel_prefix(), ch_id)
    }

    fn history_key(&self, ch_id: &str) -> String {
        format!("{}.history.list.{}", self.channel_prefix(), ch_id)
    }

    fn publish_payload(&self, ch_id: ChannelId, payload: Vec<u8>) -> PublishResult {
        let conn = self.conn.lock().clone();
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let result = async {
                let mut conn = conn.ok_or(EngineError::NotRunning)?;
                let _: i64 = redis::cmd("PUBLISH")
                    .arg(&ch_id)
                    .arg(payload.as_slice())
                    .query_async(&mut conn)
                    .await?;
                Ok(())
            }
            .await;
            let _ = tx.send(result);
        });
        rx
    }
}

#[async_trait]
impl Engine for RedisEngine {
    fn name(&self) -> &'static str {
        "Redis"
    }

    async fn run(&self) -> EngineResult<()> {
        let conn = self.client.get_multiplexed_tokio_connection().await?;
        *self.conn.lock() = Some(conn);

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        *self.cmd_tx.lock() = Some(cmd_tx);

        spawn_pubsub_supervisor(
            self.client.clone(),
            self.node.clone(),
            self.subs.clone(),
            cmd_rx,
            self.shutdown_tx.subscribe(),
        );

        if self.config.api {
            let prefix = self.channel_prefix();
            let mut queues = vec![format!("{prefix}.api")];
            for shard in 0..self.config.num_api_shards {
                queues.push(format!("{prefix}.api.{shard}"));
            }
            for queue in queues {
                let conn = self.client.get_multiplexed_tokio_connection().await?;
                spawn_api_worker(queue, conn, self.node.clone(), self.shutdown_tx.subscribe());
            }
        }
        Ok(())
    }

    async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        *self.cmd_tx.lock() = None;
    }

    fn publish_message(
        &self,
        ch_id: ChannelId,
        message: Message,
        opts: &ChannelOptions,
    ) -> PublishResult {
        let payload = match codec::encode_message(&message) {
            Ok(p) => p.to_vec(),
            Err(e) => return resolved(Err(e.into())),
        };

        if !opts.history_enabled() {
            return self.publish_payload(ch_id, payload);
        }

        let conn = self.conn.lock().clone();
        let key = self.history_key(&ch_id);
        let opts = opts.clone();
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let result = async {
                let mut conn = conn.ok_or(EngineError::NotRunning)?;
                let push_cmd = if opts.history_drop_inactive {
                    "LPUSHX"
                } else {
                    "LPUSH"
                };
                let mut pipe = redis::pipe();
                pipe.atomic();
                pipe.cmd(push_cmd).arg(&key).arg(payload.as_slice()).ignore();
                // LTRIM and EXPIRE are no-ops in Redis when the key does
                // not exist, which is exactly what LPUSHX needs.
                pipe.cmd("LTRIM")
                    .arg(&key)
                    .arg(0)
                    .arg(opts.history_size as i64 - 1)
                    .ignore();
                pipe.cmd("EXPIRE").arg(&key).arg(opts.history_lifetime).ignore();
                pipe.query_async::<()>(&mut conn).await?;

                let _: i64 = redis::cmd("PUBLISH")
                    .arg(&ch_id)
                    .arg(payload.as_slice())
                    .query_async(&mut conn)
                    .await?;
                Ok(())
            }
            .await;
            let _ = tx.send(result);
        });
        rx
    }

    fn publish_join(&self, ch_id: ChannelId, message: JoinMessage) -> PublishResult {
        match codec::encode_join(&message) {
            Ok(p) => self.publish_payload(ch_id, p.to_vec()),
            Err(e) => resolved(Err(e.into())),
        }
    }

    fn publish_leave(&self, ch_id: ChannelId, message: LeaveMessage) -> PublishResult {
        match codec::encode_leave(&message) {
            Ok(p) => self.publish_payload(ch_id, p.to_vec()),
            Err(e) => resolved(Err(e.into())),
        }
    }

    fn publish_control(&self, message: ControlMessage) -> PublishResult {
        let ch_id = self.node.config().control_channel();
        match codec::encode_control(&message) {
            Ok(p) => self.publish_payload(ch_id, p.to_vec()),
            Err(e) => resolved(Err(e.into())),
        }
    }

    fn publish_admin(&self, message: AdminMessage) -> PublishResult {
        let ch_id = self.node.config().admin_channel();
        match codec::encode_admin(&message) {
            Ok(p) => self.publish_payload(ch_id, p.to_vec()),
            Err(e) => resolved(Err(e.into())),
        }
    }

    async fn subscribe(&self, ch_id: ChannelId) -> EngineResult<()> {
        debug!(channel = %ch_id, "subscribe on redis channel");
        self.subs.lock().insert(ch_id.clone());
        let tx = self.cmd_tx.lock().clone().ok_or(EngineError::NotRunning)?;
        tx.send(PubSubCmd::Subscribe(ch_id))
            .map_err(|_| EngineError::NotRunning)
    }

    async fn unsubscribe(&self, ch_id: ChannelId) -> EngineResult<()> {
        debug!(channel = %ch_id, "unsubscribe from redis channel");
        self.subs.lock().remove(&ch_id);
        let tx = self.cmd_tx.lock().clone().ok_or(EngineError::NotRunning)?;
        tx.send(PubSubCmd::Unsubscribe(ch_id))
            .map_err(|_| EngineError::NotRunning)
    }

    async fn channels(&self) -> EngineResult<Vec<Channel>> {
        let mut conn = self.connection()?;
        let prefix = format!("{}.", self.channel_prefix());
        let pattern = format!("{prefix}*");
        let raw: Vec<String> = redis::cmd("PUBSUB")
            .arg("CHANNELS")
            .arg(&pattern)
            .query_async(&mut conn)
            .await?;
        Ok(raw
            .into_iter()
            .filter_map(|ch_id| ch_id.strip_prefix(&prefix).map(str::to_string))
            .filter(|ch| ch != "admin" && ch != "control")
            .collect())
    }

    async fn add_presence(&self, ch_id: &str, uid: &str, info: ClientInfo) -> EngineResult<()> {
        let mut conn = self.connection()?;
        let expire = self.node.config().presence_expire_interval;
        let expire_at = centrifugo_core::timestamp_secs() + expire;
        let info_json = serde_json::to_string(&info).map_err(centrifugo_core::CodecError::Json)?;
        let hash_key = self.presence_hash_key(ch_id);
        let set_key = self.presence_set_key(ch_id);

        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.cmd("ZADD").arg(&set_key).arg(expire_at).arg(uid).ignore();
        pipe.cmd("HSET").arg(&hash_key).arg(uid).arg(&info_json).ignore();
        pipe.cmd("EXPIRE").arg(&set_key).arg(expire).ignore();
        pipe.cmd("EXPIRE").arg(&hash_key).arg(expire).ignore();
        pipe.query_async::<()>(&mut conn).await?;
        Ok(())
    }

    async fn remove_presence(&self, ch_id: &str, uid: &str) -> EngineResult<()> {
        let mut conn = self.connection()?;
        let hash_key = self.presence_hash_key(ch_id);
        let set_key = self.presence_set_key(ch_id);

        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.cmd("HDEL").arg(&hash_key).arg(uid).ignore();
        pipe.cmd("ZREM").arg(&set_key).arg(uid).ignore();
        pipe.query_async::<()>(&mut conn).await?;
        Ok(())
    }

    async fn presence(&self, ch_id: &str) -> EngineResult<HashMap<ConnId, ClientInfo>> {
        let mut conn = self.connection()?;
        let hash_key = self.presence_hash_key(ch_id);
        let set_key = self.presence_set_key(ch_id);
        let now = centrifugo_core::timestamp_secs();

        let expired: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(&set_key)
            .arg(0)
            .arg(now)
            .query_async(&mut conn)
            .await?;
        if !expired.is_empty() {
            let mut pipe = redis::pipe();
            pipe.atomic();
            pipe.cmd("ZREMRANGEBYSCORE").arg(&set_key).arg(0).arg(now).ignore();
            for uid in &expired {
                pipe.cmd("HDEL").arg(&hash_key).arg(uid).ignore();
            }
            pipe.query_async::<()>(&mut conn).await?;
        }

        let raw: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(&hash_key)
            .query_async(&mut conn)
            .await?;
        let mut result = HashMap::with_capacity(raw.len());
        for (uid, value) in raw {
            match serde_json::from_str::<ClientInfo>(&value) {
                Ok(info) => {
                    result.insert(uid, info);
                }
                Err(e) => warn!(channel = ch_id, error = %e, "bad presence entry, skipping"),
            }
        }
        Ok(result)
    }

    async fn history(&self, ch_id: &str, limit: usize) -> EngineResult<Vec<Message>> {
        let mut conn = self.connection()?;
        let key = self.history_key(ch_id);
        let bound: i64 = if limit > 0 { limit as i64 - 1 } else { -1 };
        let raw: Vec<Vec<u8>> = redis::cmd("LRANGE")
            .arg(&key)
            .arg(0)
            .arg(bound)
            .query_async(&mut conn)
            .await?;
        let mut messages = Vec::with_capacity(raw.len());
        for item in raw {
            messages.push(codec::decode_message(&item)?);
        }
        Ok(messages)
    }
}

// ============================================================================
// Pub/sub supervision
// ============================================================================

fn spawn_pubsub_supervisor(
    client: redis::Client,
    node: Arc<Node>,
    subs: Arc<Mutex<HashSet<ChannelId>>>,
    mut cmd_rx: mpsc::UnboundedReceiver<PubSubCmd>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        let mut delay = 1u64;
        loop {
            match run_pubsub(&client, &node, &subs, &mut cmd_rx, &mut shutdown_rx, &mut delay).await
            {
                Ok(()) => {
                    info!("redis pub/sub loop stopped");
                    return;
                }
                Err(e) => {
                    error!(error = %e, "redis pub/sub connection lost, reconnecting in {delay}s");
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(delay)) => {}
                        _ = shutdown_rx.changed() => return,
                    }
                    delay = (delay * 2).min(MAX_RECONNECT_DELAY_SECS);
                }
            }
        }
    });
}

async fn run_pubsub(
    client: &redis::Client,
    node: &Arc<Node>,
    subs: &Arc<Mutex<HashSet<ChannelId>>>,
    cmd_rx: &mut mpsc::UnboundedReceiver<PubSubCmd>,
    shutdown_rx: &mut watch::Receiver<bool>,
    delay: &mut u64,
) -> EngineResult<()> {
    let pubsub = client.get_async_pubsub().await?;
    let (mut sink, mut stream) = pubsub.split();

    // Control plane first, then every currently active channel.
    let cfg = node.config();
    sink.subscribe(cfg.admin_channel()).await?;
    sink.subscribe(cfg.control_channel()).await?;
    let active: Vec<ChannelId> = subs.lock().iter().cloned().collect();
    for ch_id in active {
        sink.subscribe(ch_id).await?;
    }
    *delay = 1;
    info!("redis pub/sub connected");

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(PubSubCmd::Subscribe(ch_id)) => sink.subscribe(ch_id).await?,
                Some(PubSubCmd::Unsubscribe(ch_id)) => sink.unsubscribe(ch_id).await?,
                None => return Ok(()),
            },
            msg = stream.next() => match msg {
                Some(msg) => {
                    let ch_id = msg.get_channel_name().to_string();
                    match msg.get_payload::<Vec<u8>>() {
                        Ok(payload) => node.handle_raw(&ch_id, &payload).await,
                        Err(e) => warn!(channel = %ch_id, error = %e, "bad pub/sub payload"),
                    }
                }
                None => return Err(EngineError::Connection("message stream ended".to_string())),
            },
            _ = shutdown_rx.changed() => return Ok(()),
        }
    }
}

// ============================================================================
// API work queue
// ============================================================================

#[derive(Deserialize)]
struct ApiQueueRequest {
    data: Vec<Request>,
}

fn spawn_api_worker(
    queue: String,
    mut conn: MultiplexedConnection,
    node: Arc<Node>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        info!(queue = %queue, "starting redis API queue worker");
        loop {
            let mut blpop_cmd = redis::cmd("BLPOP");
            blpop_cmd.arg(&queue).arg(API_POP_TIMEOUT_SECS);
            let pop = blpop_cmd.query_async::<Option<(String, Vec<u8>)>>(&mut conn);
            tokio::select! {
                result = pop => match result {
                    Ok(Some((_, body))) => {
                        match serde_json::from_slice::<ApiQueueRequest>(&body) {
                            Ok(req) => {
                                for cmd in &req.data {
                                    let resp = node.api_cmd(cmd).await;
                                    if let Some(err) = resp.error {
                                        warn!(queue = %queue, method = %resp.method, error = %err, "queued API command failed");
                                    }
                                }
                            }
                            Err(e) => warn!(queue = %queue, error = %e, "bad API queue payload"),
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(queue = %queue, error = %e, "API queue pop failed");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                },
                _ = shutdown_rx.changed() => {
                    info!(queue = %queue, "stopping redis API queue worker");
                    return;
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_url_from_parts() {
        let mut cfg = RedisEngineConfig::default();
        assert_eq!(cfg.connection_url(), "redis://127.0.0.1:6379/0");

        cfg.password = "pass".into();
        cfg.db = 2;
        assert_eq!(cfg.connection_url(), "redis://:pass@127.0.0.1:6379/2");
    }

    #[test]
    fn explicit_url_takes_precedence() {
        let cfg = RedisEngineConfig {
            url: "redis://example.com:6380/1".into(),
            host: "ignored".into(),
            ..RedisEngineConfig::default()
        };
        assert_eq!(cfg.connection_url(), "redis://example.com:6380/1");
    }
}
