//! Identifier aliases used across the protocol.

/// User-facing channel name, e.g. `news` or `public:chat`.
pub type Channel = String;

/// Broker-level channel identifier, prefixed with the configured
/// channel prefix, e.g. `centrifugo.news`.
pub type ChannelId = String;

/// Unique connection identifier (UUIDv4 assigned per connection).
pub type ConnId = String;

/// Opaque application user identifier.
pub type UserId = String;

/// Namespace key, must match `^[-A-Za-z0-9_]{2,}$`.
pub type NamespaceKey = String;
