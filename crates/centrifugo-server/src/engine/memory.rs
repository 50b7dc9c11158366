//! In-process engine for single-node deployments.
//!
//! Fan-out is local: a publish walks the node's subscriber book directly.
//! Presence and history live in process memory with the same TTL
//! semantics the broker engine gets from key expiry.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use centrifugo_core::{
    AdminMessage, Channel, ChannelId, ClientInfo, ConnId, ControlMessage, JoinMessage,
    LeaveMessage, Message,
};

use super::{resolved, Engine, EngineResult, PublishResult};
use crate::config::ChannelOptions;
use crate::node::Node;

struct PresenceEntry {
    expires_at: Instant,
    info: ClientInfo,
}

struct HistoryItem {
    messages: VecDeque<Message>,
    expires_at: Instant,
}

pub struct MemoryEngine {
    node: Arc<Node>,
    presence: Mutex<HashMap<ChannelId, HashMap<ConnId, PresenceEntry>>>,
    history: Mutex<HashMap<ChannelId, HistoryItem>>,
}

impl MemoryEngine {
    pub fn new(node: Arc<Node>) -> Self {
        Self {
            node,
            presence: Mutex::new(HashMap::new()),
            history: Mutex::new(HashMap::new()),
        }
    }

    /// Append to a channel history per the channel options. With
    /// `history_drop_inactive` a publish does not recreate a list that has
    /// been reaped while nobody was subscribed.
    fn add_history(&self, ch_id: &str, message: Message, opts: &ChannelOptions) {
        let mut history = self.history.lock();
        let now = Instant::now();

        let exists = match history.get(ch_id) {
            Some(item) if item.expires_at > now => true,
            Some(_) => {
                history.remove(ch_id);
                false
            }
            None => false,
        };

        if !exists && opts.history_drop_inactive && self.node.num_subscribers(ch_id) == 0 {
            return;
        }

        let item = history.entry(ch_id.to_string()).or_insert_with(|| HistoryItem {
            messages: VecDeque::with_capacity(opts.history_size),
            expires_at: now,
        });
        item.messages.push_front(message);
        item.messages.truncate(opts.history_size);
        item.expires_at = now + Duration::from_secs(opts.history_lifetime);
    }
}

#[async_trait]
impl Engine for MemoryEngine {
    fn name(&self) -> &'static str {
        "In memory – single node only"
    }

    async fn run(&self) -> EngineResult<()> {
        Ok(())
    }

    async fn shutdown(&self) {}

    fn publish_message(
        &self,
        ch_id: ChannelId,
        message: Message,
        opts: &ChannelOptions,
    ) -> PublishResult {
        if opts.history_enabled() {
            self.add_history(&ch_id, message.clone(), opts);
        }
        self.node.client_msg(&message);
        resolved(Ok(()))
    }

    fn publish_join(&self, _ch_id: ChannelId, message: JoinMessage) -> PublishResult {
        self.node.join_msg(&message);
        resolved(Ok(()))
    }

    fn publish_leave(&self, _ch_id: ChannelId, message: LeaveMessage) -> PublishResult {
        self.node.leave_msg(&message);
        resolved(Ok(()))
    }

    fn publish_control(&self, message: ControlMessage) -> PublishResult {
        let node = self.node.clone();
        let (tx, rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            node.control_msg(message).await;
            let _ = tx.send(Ok(()));
        });
        rx
    }

    fn publish_admin(&self, message: AdminMessage) -> PublishResult {
        self.node.admin_msg(&message);
        resolved(Ok(()))
    }

    async fn subscribe(&self, _ch_id: ChannelId) -> EngineResult<()> {
        Ok(())
    }

    async fn unsubscribe(&self, _ch_id: ChannelId) -> EngineResult<()> {
        Ok(())
    }

    async fn channels(&self) -> EngineResult<Vec<Channel>> {
        Ok(self.node.local_channels())
    }

    async fn add_presence(&self, ch_id: &str, uid: &str, info: ClientInfo) -> EngineResult<()> {
        let expire = Duration::from_secs(self.node.config().presence_expire_interval);
        let mut presence = self.presence.lock();
        presence.entry(ch_id.to_string()).or_default().insert(
            uid.to_string(),
            PresenceEntry {
                expires_at: Instant::now() + expire,
                info,
            },
        );
        Ok(())
    }

    async fn remove_presence(&self, ch_id: &str, uid: &str) -> EngineResult<()> {
        let mut presence = self.presence.lock();
        if let Some(entries) = presence.get_mut(ch_id) {
            entries.remove(uid);
            if entries.is_empty() {
                presence.remove(ch_id);
            }
        }
        Ok(())
    }

    async fn presence(&self, ch_id: &str) -> EngineResult<HashMap<ConnId, ClientInfo>> {
        let mut presence = self.presence.lock();
        let Some(entries) = presence.get_mut(ch_id) else {
            return Ok(HashMap::new());
        };
        let now = Instant::now();
        entries.retain(|_, entry| entry.expires_at > now);
        let result = entries
            .iter()
            .map(|(uid, entry)| (uid.clone(), entry.info.clone()))
            .collect();
        if entries.is_empty() {
            presence.remove(ch_id);
        }
        Ok(result)
    }

    async fn history(&self, ch_id: &str, limit: usize) -> EngineResult<Vec<Message>> {
        let mut history = self.history.lock();
        match history.get(ch_id) {
            Some(item) if item.expires_at > Instant::now() => {
                let take = if limit == 0 { item.messages.len() } else { limit };
                Ok(item.messages.iter().take(take).cloned().collect())
            }
            Some(_) => {
                history.remove(ch_id);
                Ok(Vec::new())
            }
            None => Ok(Vec::new()),
        }
    }
}
