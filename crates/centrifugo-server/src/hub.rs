//! Connection hubs and the channel subscription book.
//!
//! The client hub keeps three views that must stay consistent: connections
//! by id, connection ids by user, and subscriber sets by channel id. All
//! mutations happen under a single lock; readers get cloned snapshots so
//! no lock is ever held across I/O.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;

use centrifugo_core::{ChannelId, ConnId, UserId};

use crate::admin::AdminClient;
use crate::client::Client;

#[derive(Default)]
struct HubState {
    conns: HashMap<ConnId, Arc<Client>>,
    users: HashMap<UserId, HashSet<ConnId>>,
    subs: HashMap<ChannelId, HashSet<ConnId>>,
}

/// Hub of authenticated client connections.
#[derive(Default)]
pub struct ClientHub {
    state: RwLock<HubState>,
}

impl ClientHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an authenticated connection.
    pub fn add(&self, uid: &ConnId, user: &UserId, client: Arc<Client>) {
        let mut state = self.state.write();
        state.conns.insert(uid.clone(), client);
        state.users.entry(user.clone()).or_default().insert(uid.clone());
    }

    /// Drop a connection and its user index entry. Channel subscriptions
    /// must already have been removed by the owning client.
    pub fn remove(&self, uid: &ConnId, user: &UserId) {
        let mut state = self.state.write();
        state.conns.remove(uid);
        if let Some(set) = state.users.get_mut(user) {
            set.remove(uid);
            if set.is_empty() {
                state.users.remove(user);
            }
        }
    }

    /// Add a subscription to the book. Returns `true` when this was the
    /// first local subscriber on the channel, i.e. the 0→1 transition the
    /// node must mirror with an engine subscribe.
    pub fn add_sub(&self, ch_id: &ChannelId, uid: &ConnId) -> bool {
        let mut state = self.state.write();
        let set = state.subs.entry(ch_id.clone()).or_default();
        let was_empty = set.is_empty();
        set.insert(uid.clone());
        was_empty
    }

    /// Remove a subscription. Returns `true` when this was the last local
    /// subscriber, i.e. the 1→0 transition the node must mirror with an
    /// engine unsubscribe.
    pub fn remove_sub(&self, ch_id: &ChannelId, uid: &ConnId) -> bool {
        let mut state = self.state.write();
        if let Some(set) = state.subs.get_mut(ch_id) {
            set.remove(uid);
            if set.is_empty() {
                state.subs.remove(ch_id);
                return true;
            }
        }
        false
    }

    /// Snapshot of subscribers on a channel.
    pub fn clients_for(&self, ch_id: &str) -> Vec<Arc<Client>> {
        let state = self.state.read();
        match state.subs.get(ch_id) {
            Some(set) => set
                .iter()
                .filter_map(|uid| state.conns.get(uid).cloned())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Snapshot of all connections of one user.
    pub fn user_conns(&self, user: &str) -> Vec<Arc<Client>> {
        let state = self.state.read();
        match state.users.get(user) {
            Some(set) => set
                .iter()
                .filter_map(|uid| state.conns.get(uid).cloned())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Snapshot of every registered connection.
    pub fn all_conns(&self) -> Vec<Arc<Client>> {
        self.state.read().conns.values().cloned().collect()
    }

    pub fn num_clients(&self) -> usize {
        self.state.read().conns.len()
    }

    pub fn num_users(&self) -> usize {
        self.state.read().users.len()
    }

    pub fn num_channels(&self) -> usize {
        self.state.read().subs.len()
    }

    pub fn num_subscribers(&self, ch_id: &str) -> usize {
        self.state
            .read()
            .subs
            .get(ch_id)
            .map(|s| s.len())
            .unwrap_or(0)
    }

    /// Channel ids with at least one local subscriber.
    pub fn channels(&self) -> Vec<ChannelId> {
        self.state.read().subs.keys().cloned().collect()
    }
}

/// Hub of connected admins. Admins have no subscription book; every admin
/// message goes to all of them.
#[derive(Default)]
pub struct AdminHub {
    conns: RwLock<HashMap<ConnId, Arc<AdminClient>>>,
}

impl AdminHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, uid: &ConnId, admin: Arc<AdminClient>) {
        self.conns.write().insert(uid.clone(), admin);
    }

    pub fn remove(&self, uid: &ConnId) {
        self.conns.write().remove(uid);
    }

    pub fn all(&self) -> Vec<Arc<AdminClient>> {
        self.conns.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.conns.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.conns.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The subscription book is exercised here on bare ids; the conns view
    // is covered by the node integration tests.

    #[test]
    fn sub_transitions_are_reported_exactly_once() {
        let hub = ClientHub::new();
        let ch = "centrifugo.news".to_string();

        assert!(hub.add_sub(&ch, &"c1".to_string()));
        assert!(!hub.add_sub(&ch, &"c2".to_string()));
        // Duplicate subscribe of the same connection is not a transition.
        assert!(!hub.add_sub(&ch, &"c1".to_string()));
        assert_eq!(hub.num_subscribers(&ch), 2);

        assert!(!hub.remove_sub(&ch, &"c1".to_string()));
        assert!(hub.remove_sub(&ch, &"c2".to_string()));
        assert_eq!(hub.num_subscribers(&ch), 0);
        assert_eq!(hub.num_channels(), 0);
    }

    #[test]
    fn remove_sub_on_unknown_channel_is_a_noop() {
        let hub = ClientHub::new();
        assert!(!hub.remove_sub(&"centrifugo.ghost".to_string(), &"c1".to_string()));
    }

    #[test]
    fn book_stays_consistent_under_mixed_operations() {
        let hub = ClientHub::new();
        let channels: Vec<ChannelId> = (0..4).map(|i| format!("centrifugo.ch{i}")).collect();
        let conns: Vec<ConnId> = (0..8).map(|i| format!("conn{i}")).collect();

        for (i, conn) in conns.iter().enumerate() {
            for ch in channels.iter().skip(i % 2) {
                hub.add_sub(ch, conn);
            }
        }

        let total: usize = channels.iter().map(|ch| hub.num_subscribers(ch)).sum();
        assert_eq!(hub.num_channels(), 4);

        for conn in conns.iter().take(4) {
            for ch in &channels {
                hub.remove_sub(ch, conn);
            }
        }
        let total_after: usize = channels.iter().map(|ch| hub.num_subscribers(ch)).sum();
        assert!(total_after < total);

        for conn in conns.iter().skip(4) {
            for ch in &channels {
                hub.remove_sub(ch, conn);
            }
        }
        assert_eq!(hub.num_channels(), 0);
    }
}
