//! Command envelopes for the client, API and admin surfaces.
//!
//! An inbound frame is either a single `{method, params, uid?}` object or
//! an array of them. The envelope is decoded first, then `params` is
//! decoded per-method into the typed command structs below.

use serde::Deserialize;
use serde_json::value::RawValue;

use crate::error::ClientError;
use crate::types::{Channel, ConnId, UserId};

/// One request object as received from a client, API caller or admin.
#[derive(Debug, Deserialize)]
pub struct Request {
    pub method: String,
    #[serde(default)]
    pub params: Option<Box<RawValue>>,
    #[serde(default)]
    pub uid: Option<String>,
}

/// A complete inbound frame: one request or a batch.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum Frame {
    Single(Request),
    Batch(Vec<Request>),
}

impl Frame {
    /// Parse a raw UTF-8 JSON frame.
    pub fn parse(raw: &str) -> Result<Frame, ClientError> {
        serde_json::from_str(raw).map_err(|_| ClientError::InvalidMessage)
    }

    pub fn is_batch(&self) -> bool {
        matches!(self, Frame::Batch(_))
    }

    pub fn into_requests(self) -> Vec<Request> {
        match self {
            Frame::Single(r) => vec![r],
            Frame::Batch(rs) => rs,
        }
    }
}

impl Request {
    /// Decode `params` into a typed command, treating a missing params
    /// object as `{}`.
    pub fn decode_params<'de, T: Deserialize<'de>>(&'de self) -> Result<T, ClientError> {
        let raw = self.params.as_deref().map(RawValue::get).unwrap_or("{}");
        serde_json::from_str(raw).map_err(|_| ClientError::InvalidMessage)
    }
}

// ============================================================================
// CLIENT COMMANDS
// ============================================================================

/// `connect` authorizes a connection: user id, optional absolute expiry
/// time (Unix seconds, as a string, `"0"` meaning no expiry), optional
/// connection info JSON and the HMAC sign over `user + exp + info`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ConnectCommand {
    pub user: UserId,
    pub exp: String,
    pub info: String,
    pub sign: String,
}

/// `refresh` prolongs an expiring connection with a newly signed `exp`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RefreshCommand {
    pub user: UserId,
    pub exp: String,
    pub info: String,
    pub sign: String,
}

/// `subscribe` on a channel. `client`, `info` and `sign` are required for
/// private channels; `recover`/`last` request missed-message recovery.
#[derive(Debug, Deserialize)]
pub struct SubscribeCommand {
    pub channel: Channel,
    #[serde(default)]
    pub client: Option<ConnId>,
    #[serde(default)]
    pub info: String,
    #[serde(default)]
    pub sign: String,
    #[serde(default)]
    pub recover: bool,
    #[serde(default)]
    pub last: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UnsubscribeCommand {
    pub channel: Channel,
}

#[derive(Debug, Deserialize)]
pub struct PublishCommand {
    pub channel: Channel,
    pub data: Box<RawValue>,
}

#[derive(Debug, Deserialize)]
pub struct PresenceCommand {
    pub channel: Channel,
}

#[derive(Debug, Deserialize)]
pub struct HistoryCommand {
    pub channel: Channel,
}

// ============================================================================
// API COMMANDS
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct PublishApiCommand {
    pub channel: Channel,
    pub data: Box<RawValue>,
    #[serde(default)]
    pub client: Option<ConnId>,
}

#[derive(Debug, Deserialize)]
pub struct BroadcastApiCommand {
    pub channels: Vec<Channel>,
    pub data: Box<RawValue>,
    #[serde(default)]
    pub client: Option<ConnId>,
}

#[derive(Debug, Deserialize)]
pub struct UnsubscribeApiCommand {
    pub user: UserId,
    #[serde(default)]
    pub channel: Option<Channel>,
}

#[derive(Debug, Deserialize)]
pub struct DisconnectApiCommand {
    pub user: UserId,
}

#[derive(Debug, Deserialize)]
pub struct PresenceApiCommand {
    pub channel: Channel,
}

#[derive(Debug, Deserialize)]
pub struct HistoryApiCommand {
    pub channel: Channel,
}

// ============================================================================
// ADMIN COMMANDS
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ConnectAdminCommand {
    pub token: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_single_object_frame() {
        let frame = Frame::parse(r#"{"method":"ping","params":{}}"#).unwrap();
        assert!(!frame.is_batch());
        let reqs = frame.into_requests();
        assert_eq!(reqs.len(), 1);
        assert_eq!(reqs[0].method, "ping");
    }

    #[test]
    fn parse_array_frame_preserves_order() {
        let frame = Frame::parse(
            r#"[{"method":"connect","params":{"user":"42"}},{"method":"subscribe","params":{"channel":"news"}}]"#,
        )
        .unwrap();
        assert!(frame.is_batch());
        let reqs = frame.into_requests();
        assert_eq!(reqs[0].method, "connect");
        assert_eq!(reqs[1].method, "subscribe");
    }

    #[test]
    fn parse_rejects_scalar_frame() {
        assert!(Frame::parse(r#""ping""#).is_err());
        assert!(Frame::parse("42").is_err());
        assert!(Frame::parse("not json").is_err());
    }

    #[test]
    fn decode_connect_params() {
        let frame =
            Frame::parse(r#"{"method":"connect","params":{"user":"42","exp":"0","info":"","sign":"ab"}}"#)
                .unwrap();
        let req = &frame.into_requests()[0];
        let cmd: ConnectCommand = req.decode_params().unwrap();
        assert_eq!(cmd.user, "42");
        assert_eq!(cmd.exp, "0");
        assert_eq!(cmd.sign, "ab");
    }

    #[test]
    fn missing_params_decode_as_defaults() {
        let frame = Frame::parse(r#"{"method":"ping"}"#).unwrap();
        let req = &frame.into_requests()[0];
        let cmd: ConnectCommand = req.decode_params().unwrap();
        assert_eq!(cmd.user, "");
    }

    #[test]
    fn subscribe_recover_fields() {
        let frame = Frame::parse(
            r#"{"method":"subscribe","params":{"channel":"chat","recover":true,"last":"u7"}}"#,
        )
        .unwrap();
        let req = &frame.into_requests()[0];
        let cmd: SubscribeCommand = req.decode_params().unwrap();
        assert!(cmd.recover);
        assert_eq!(cmd.last.as_deref(), Some("u7"));
    }
}
