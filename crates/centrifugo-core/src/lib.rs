//! Centrifugo core
//!
//! Protocol primitives shared by the server and its tooling:
//! - Protocol record types ([`Message`], [`ClientInfo`], [`ControlMessage`])
//! - Binary broker wire codec ([`codec`])
//! - Client / API / admin command envelopes ([`commands`])
//! - Response shapes ([`Response`])
//! - Token signing and verification ([`auth`])

pub mod auth;
pub mod codec;
pub mod commands;
pub mod error;
pub mod message;
pub mod response;
pub mod types;

pub use error::{ClientError, CodecError};
pub use message::{
    AdminMessage, ClientInfo, ControlMessage, JoinMessage, LeaveMessage, Message, NodeInfo,
};
pub use response::{MultiResponse, Push, Response};
pub use types::{Channel, ChannelId, ConnId, NamespaceKey, UserId};

/// Server version reported in connect replies and `version` output.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Current Unix time in seconds.
pub fn timestamp_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
