//! Engine abstraction: pluggable pub/sub, presence and history backend.
//!
//! Two production implementations exist: [`memory::MemoryEngine`] for
//! single-node deployments and [`redis::RedisEngine`] for clusters sharing
//! a broker. All methods must be safe for concurrent callers; subscribe
//! and unsubscribe are idempotent at this layer.

pub mod memory;
pub mod redis;

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::oneshot;

use centrifugo_core::{
    AdminMessage, Channel, ChannelId, ClientInfo, CodecError, ConnId, ControlMessage, JoinMessage,
    LeaveMessage, Message,
};

use crate::config::ChannelOptions;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine was used before `run` or after shutdown.
    #[error("engine not running")]
    NotRunning,

    /// A publish task was dropped before reporting a result.
    #[error("publish dropped")]
    Dropped,

    /// The broker connection went away.
    #[error("broker connection lost: {0}")]
    Connection(String),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// A receiver yielding the outcome of one publish operation. Await it for
/// a broker ack, or drop it for fire-and-forget.
pub type PublishResult = oneshot::Receiver<EngineResult<()>>;

/// Helper to await a [`PublishResult`], mapping a dropped sender to an
/// engine error.
pub async fn publish_outcome(rx: PublishResult) -> EngineResult<()> {
    rx.await.unwrap_or(Err(EngineError::Dropped))
}

pub(crate) fn resolved(result: EngineResult<()>) -> PublishResult {
    let (tx, rx) = oneshot::channel();
    let _ = tx.send(result);
    rx
}

#[async_trait]
pub trait Engine: Send + Sync {
    /// Name of the concrete implementation, for logs and the admin info
    /// command.
    fn name(&self) -> &'static str;

    /// Start the engine. Called once just after it is attached to the
    /// node.
    async fn run(&self) -> EngineResult<()>;

    /// Stop background work. Part of node shutdown.
    async fn shutdown(&self);

    /// Publish a message into a channel, maintaining its history when the
    /// channel options ask for it. Delivery reaches every subscriber on
    /// every node, including this one.
    fn publish_message(
        &self,
        ch_id: ChannelId,
        message: Message,
        opts: &ChannelOptions,
    ) -> PublishResult;

    /// Publish a join notification into a channel.
    fn publish_join(&self, ch_id: ChannelId, message: JoinMessage) -> PublishResult;

    /// Publish a leave notification into a channel.
    fn publish_leave(&self, ch_id: ChannelId, message: LeaveMessage) -> PublishResult;

    /// Publish a control message to all nodes.
    fn publish_control(&self, message: ControlMessage) -> PublishResult;

    /// Publish an admin message to all connected admins on all nodes.
    fn publish_admin(&self, message: AdminMessage) -> PublishResult;

    /// Start receiving messages published into the channel.
    async fn subscribe(&self, ch_id: ChannelId) -> EngineResult<()>;

    /// Stop receiving messages published into the channel.
    async fn unsubscribe(&self, ch_id: ChannelId) -> EngineResult<()>;

    /// Channels with at least one subscriber across the whole cluster.
    async fn channels(&self) -> EngineResult<Vec<Channel>>;

    /// Set or refresh presence info of a connection in a channel.
    async fn add_presence(
        &self,
        ch_id: &str,
        uid: &str,
        info: ClientInfo,
    ) -> EngineResult<()>;

    /// Remove presence info of a connection in a channel.
    async fn remove_presence(&self, ch_id: &str, uid: &str) -> EngineResult<()>;

    /// Presence info for a channel. Never returns expired entries.
    async fn presence(&self, ch_id: &str) -> EngineResult<HashMap<ConnId, ClientInfo>>;

    /// History messages for a channel, newest first. `limit` 0 means all
    /// stored messages.
    async fn history(&self, ch_id: &str, limit: usize) -> EngineResult<Vec<Message>>;
}
