//! Protocol record types.
//!
//! These records travel between nodes through the broker (binary encoded,
//! see [`crate::codec`]) and to clients as JSON pushes.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use uuid::Uuid;

use crate::types::{Channel, ConnId, UserId};

/// Information about a connected client, attached to publications and
/// presence entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub user: UserId,
    pub client: ConnId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_info: Option<Box<RawValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_info: Option<Box<RawValue>>,
}

impl ClientInfo {
    pub fn new(user: UserId, client: ConnId) -> Self {
        Self {
            user,
            client,
            default_info: None,
            channel_info: None,
        }
    }
}

/// A publication delivered to every channel subscriber.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub uid: String,
    pub timestamp: u64,
    pub channel: Channel,
    pub data: Box<RawValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<ConnId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<ClientInfo>,
}

impl Message {
    /// Build a new message stamped with a fresh UID and the current time.
    pub fn new(
        channel: Channel,
        data: Box<RawValue>,
        client: Option<ConnId>,
        info: Option<ClientInfo>,
    ) -> Self {
        Self {
            uid: Uuid::new_v4().to_string(),
            timestamp: crate::timestamp_secs(),
            channel,
            data,
            client,
            info,
        }
    }
}

/// Presence lifecycle notification sent when a client joins a channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinMessage {
    pub channel: Channel,
    pub data: ClientInfo,
}

/// Presence lifecycle notification sent when a client leaves a channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaveMessage {
    pub channel: Channel,
    pub data: ClientInfo,
}

/// Inter-node notification travelling over the control channel.
///
/// `uid` is the unique id of the sending node so nodes can skip their own
/// broadcasts where appropriate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlMessage {
    pub uid: String,
    pub method: String,
    pub params: Box<RawValue>,
}

/// Control message methods.
pub mod control {
    pub const PING: &str = "ping";
    pub const UNSUBSCRIBE: &str = "unsubscribe";
    pub const DISCONNECT: &str = "disconnect";
}

/// Parameters of an `unsubscribe` control message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnsubscribeControl {
    pub user: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<Channel>,
}

/// Parameters of a `disconnect` control message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisconnectControl {
    pub user: UserId,
}

/// Message broadcast to every connected admin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub params: Box<RawValue>,
}

/// Information about one node of the cluster, exchanged via `ping` control
/// messages and returned by the `stats` API call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    pub name: String,
    pub uid: String,
    pub started: u64,
    #[serde(default)]
    pub metrics: HashMap<String, i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(s: &str) -> Box<RawValue> {
        RawValue::from_string(s.to_string()).unwrap()
    }

    #[test]
    fn message_stamps_uid_and_timestamp() {
        let m = Message::new("news".into(), raw(r#"{"x":1}"#), None, None);
        assert_eq!(m.channel, "news");
        assert_eq!(m.uid.len(), 36);
        assert!(m.timestamp > 0);

        let m2 = Message::new("news".into(), raw(r#"{"x":1}"#), None, None);
        assert_ne!(m.uid, m2.uid);
    }

    #[test]
    fn message_json_shape() {
        let info = ClientInfo {
            user: "42".into(),
            client: "c1".into(),
            default_info: Some(raw(r#"{"name":"bob"}"#)),
            channel_info: None,
        };
        let m = Message::new(
            "news".into(),
            raw(r#"{"input":"hello"}"#),
            Some("c1".into()),
            Some(info),
        );
        let v: serde_json::Value = serde_json::from_str(&serde_json::to_string(&m).unwrap()).unwrap();
        assert_eq!(v["channel"], "news");
        assert_eq!(v["data"]["input"], "hello");
        assert_eq!(v["client"], "c1");
        assert_eq!(v["info"]["user"], "42");
        assert_eq!(v["info"]["default_info"]["name"], "bob");
        // Absent optional fields are omitted entirely.
        assert!(v["info"].get("channel_info").is_none());
    }

    #[test]
    fn admin_message_type_field() {
        let m = AdminMessage {
            kind: "message".into(),
            params: raw("{}"),
        };
        let s = serde_json::to_string(&m).unwrap();
        assert!(s.contains(r#""type":"message""#));
    }
}
