//! Error types for the Centrifugo protocol layer.

use thiserror::Error;

/// Errors surfaced to clients and API callers in the `error` field of a
/// response. The string forms are part of the wire protocol and must stay
/// stable.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientError {
    #[error("invalid message")]
    InvalidMessage,

    #[error("method not found")]
    MethodNotFound,

    #[error("unauthorized")]
    Unauthorized,

    #[error("permission denied")]
    PermissionDenied,

    #[error("project not found")]
    ProjectNotFound,

    #[error("namespace not found")]
    NamespaceNotFound,

    #[error("invalid token")]
    InvalidToken,

    #[error("connection expired")]
    ConnectionExpired,

    #[error("limit exceeded")]
    LimitExceeded,

    #[error("not available")]
    NotAvailable,

    #[error("already subscribed")]
    AlreadySubscribed,

    #[error("internal server error")]
    Internal,
}

impl ClientError {
    /// Stable protocol string for this error kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientError::InvalidMessage => "invalid message",
            ClientError::MethodNotFound => "method not found",
            ClientError::Unauthorized => "unauthorized",
            ClientError::PermissionDenied => "permission denied",
            ClientError::ProjectNotFound => "project not found",
            ClientError::NamespaceNotFound => "namespace not found",
            ClientError::InvalidToken => "invalid token",
            ClientError::ConnectionExpired => "connection expired",
            ClientError::LimitExceeded => "limit exceeded",
            ClientError::NotAvailable => "not available",
            ClientError::AlreadySubscribed => "already subscribed",
            ClientError::Internal => "internal server error",
        }
    }
}

/// Close codes sent with transport close frames. Clients are expected to
/// reconnect with backoff on any of these except a clean shutdown.
pub mod close {
    /// Generic close.
    pub const NORMAL: u16 = 3000;
    /// Node is shutting down.
    pub const SHUTDOWN: u16 = 3001;
    /// Connection never authenticated within the stale window.
    pub const STALE: u16 = 3002;
    /// Client can not keep up with the outbound queue.
    pub const SLOW: u16 = 3003;
    /// Connection credentials expired without refresh.
    pub const EXPIRED: u16 = 3004;
}

/// Errors from the binary broker wire codec.
#[derive(Error, Debug)]
pub enum CodecError {
    /// Buffer ended before a complete record was read.
    #[error("buffer too small: need {needed} bytes, have {have}")]
    BufferTooSmall { needed: usize, have: usize },

    /// First byte did not name a known record kind.
    #[error("unknown record kind: 0x{0:02x}")]
    UnknownKind(u8),

    /// Field length would overflow the length prefix.
    #[error("field too large: {0} bytes")]
    FieldTooLarge(usize),

    /// A string field was not valid UTF-8.
    #[error("invalid utf-8 in field: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// Embedded JSON payload failed to parse.
    #[error("invalid json payload: {0}")]
    Json(#[from] serde_json::Error),
}
