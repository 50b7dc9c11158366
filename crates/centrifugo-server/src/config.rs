//! Node configuration.
//!
//! Loaded from a JSON file, overridable through `CENTRIFUGO_`-prefixed
//! environment variables and CLI flags, and swappable at runtime on
//! SIGHUP. Read paths always work on a snapshot taken under the node's
//! config lock.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use centrifugo_core::{ChannelId, ClientError, NamespaceKey};

/// Channel behaviour flags and history knobs, applied per namespace or as
/// the process-wide default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelOptions {
    /// Mirror publications into the admin stream.
    pub watch: bool,
    /// Allow clients to publish into the channel directly.
    pub publish: bool,
    /// Allow anonymous (empty user id) subscribers.
    pub anonymous: bool,
    /// Maintain presence information.
    pub presence: bool,
    /// Emit join/leave notifications into the channel.
    pub join_leave: bool,
    /// Maximum number of messages kept in history. 0 disables history.
    pub history_size: usize,
    /// Seconds a history list survives after the last publish. 0 disables
    /// history.
    pub history_lifetime: u64,
    /// Allow clients to recover missed messages on subscribe.
    #[serde(rename = "recover")]
    pub history_recover: bool,
    /// Do not recreate a reaped history list for channels nobody is
    /// subscribed to.
    pub history_drop_inactive: bool,
}

impl ChannelOptions {
    pub fn history_enabled(&self) -> bool {
        self.history_size > 0 && self.history_lifetime > 0
    }
}

/// A namespace scopes its own [`ChannelOptions`] to channels named
/// `<namespace>:<rest>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Namespace {
    pub name: NamespaceKey,
    #[serde(flatten)]
    pub options: ChannelOptions,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config read error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("config error: {0}")]
    Invalid(String),
}

/// Process-wide configuration. Field names match the JSON config keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Unique, human readable node name. Filled from the host name when
    /// left empty.
    pub name: String,

    /// Secret key used to sign API requests and client connection tokens.
    pub secret: String,

    /// Secret used for admin socket tokens. Falls back to `secret` when
    /// empty.
    pub admin_secret: String,

    /// No client authentication: anonymous access and publish allowed
    /// everywhere, no connection checks. For demos and local hacking.
    pub insecure: bool,
    /// Skip the `X-API-Sign` check on the HTTP API.
    pub insecure_api: bool,
    /// Skip token auth on the admin socket.
    pub insecure_admin: bool,

    /// Prefix for every broker-level channel id.
    pub channel_prefix: String,
    /// Maximum length of a channel name.
    pub max_channel_length: usize,

    /// Seconds between server pings to clients.
    pub ping_interval: u64,
    /// Seconds between `ping` control messages to peers.
    pub node_ping_interval: u64,
    /// Seconds between sweeps of stale peer info.
    pub node_info_clean_interval: u64,
    /// Seconds after which peer info is considered stale.
    pub node_info_max_delay: u64,
    /// Seconds between metrics snapshots.
    pub node_metrics_interval: u64,

    /// Seconds between presence refreshes from connected clients.
    pub presence_ping_interval: u64,
    /// Seconds a presence entry stays valid after the last refresh.
    pub presence_expire_interval: u64,

    /// Grace window in seconds for `refresh` after credentials expire.
    pub expired_connection_close_delay: u64,
    /// Seconds an unauthenticated connection may exist before it is
    /// closed as stale.
    pub stale_connection_close_delay: u64,
    /// Seconds a single send to a client may take before the client is
    /// disconnected. 0 disables the limit.
    pub message_send_timeout: u64,

    /// Maximum channels per client connection.
    pub client_channel_limit: usize,
    /// Maximum size of one inbound client frame in bytes.
    pub client_request_max_size: usize,
    /// Cap on queued outbound bytes per client before it is dropped as
    /// too slow.
    pub client_queue_max_size: usize,

    /// Prefix marking a channel as private (signed subscribe required).
    pub private_channel_prefix: String,
    /// Separator between namespace and the rest of a channel name.
    pub namespace_channel_boundary: String,
    /// Separator before the allowed-users part of a channel name.
    pub user_channel_boundary: String,
    /// Separator between user ids inside the allowed-users part.
    pub user_channel_separator: String,
    /// Separator before a client connection id in a client-limited
    /// channel.
    pub client_channel_boundary: String,

    /// Default channel options, embedded at the top level of the config
    /// file.
    #[serde(flatten)]
    pub channel_options: ChannelOptions,

    /// Namespaces with their own channel options.
    pub namespaces: Vec<Namespace>,

    #[serde(skip)]
    namespace_map: HashMap<NamespaceKey, ChannelOptions>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: String::new(),
            secret: String::new(),
            admin_secret: String::new(),
            insecure: false,
            insecure_api: false,
            insecure_admin: false,
            channel_prefix: "centrifugo".to_string(),
            max_channel_length: 255,
            ping_interval: 25,
            node_ping_interval: 3,
            node_info_clean_interval: 9,
            node_info_max_delay: 7,
            node_metrics_interval: 60,
            presence_ping_interval: 25,
            presence_expire_interval: 60,
            expired_connection_close_delay: 25,
            stale_connection_close_delay: 25,
            message_send_timeout: 0,
            client_channel_limit: 100,
            client_request_max_size: 65536,
            client_queue_max_size: 10 * 1024 * 1024,
            private_channel_prefix: "$".to_string(),
            namespace_channel_boundary: ":".to_string(),
            user_channel_boundary: "#".to_string(),
            user_channel_separator: ",".to_string(),
            client_channel_boundary: "&".to_string(),
            channel_options: ChannelOptions::default(),
            namespaces: Vec::new(),
            namespace_map: HashMap::new(),
        }
    }
}

const NAMESPACE_NAME_MIN: usize = 2;

fn valid_namespace_name(name: &str) -> bool {
    name.len() >= NAMESPACE_NAME_MIN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

impl Config {
    /// Load configuration from a JSON file and initialize helper state.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let mut cfg: Config = serde_json::from_str(&raw)?;
        cfg.initialize();
        Ok(cfg)
    }

    /// Build the namespace lookup map. Must run after any mutation of
    /// `namespaces`.
    pub fn initialize(&mut self) {
        self.namespace_map = self
            .namespaces
            .iter()
            .map(|n| (n.name.clone(), n.options.clone()))
            .collect();
    }

    /// Apply `CENTRIFUGO_`-prefixed environment overrides for scalar
    /// fields.
    pub fn apply_env(&mut self) {
        for (key, value) in std::env::vars() {
            let Some(rest) = key.strip_prefix("CENTRIFUGO_") else {
                continue;
            };
            match rest.to_ascii_lowercase().as_str() {
                "name" => self.name = value,
                "secret" => self.secret = value,
                "admin_secret" => self.admin_secret = value,
                "channel_prefix" => self.channel_prefix = value,
                "insecure" => set_bool(&mut self.insecure, &value),
                "insecure_api" => set_bool(&mut self.insecure_api, &value),
                "insecure_admin" => set_bool(&mut self.insecure_admin, &value),
                "watch" => set_bool(&mut self.channel_options.watch, &value),
                "publish" => set_bool(&mut self.channel_options.publish, &value),
                "anonymous" => set_bool(&mut self.channel_options.anonymous, &value),
                "presence" => set_bool(&mut self.channel_options.presence, &value),
                "join_leave" => set_bool(&mut self.channel_options.join_leave, &value),
                "recover" => set_bool(&mut self.channel_options.history_recover, &value),
                "history_drop_inactive" => {
                    set_bool(&mut self.channel_options.history_drop_inactive, &value)
                }
                "history_size" => set_num(&mut self.channel_options.history_size, &value),
                "history_lifetime" => set_num(&mut self.channel_options.history_lifetime, &value),
                _ => {}
            }
        }
    }

    /// Validate namespace names and uniqueness.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen: Vec<&str> = Vec::new();
        for n in &self.namespaces {
            if !valid_namespace_name(&n.name) {
                return Err(ConfigError::Invalid(format!(
                    "wrong namespace name – {}",
                    n.name
                )));
            }
            if seen.contains(&n.name.as_str()) {
                return Err(ConfigError::Invalid(
                    "namespace name must be unique".to_string(),
                ));
            }
            seen.push(&n.name);
        }
        Ok(())
    }

    /// Options for a namespace key; `None` means the default options.
    pub fn channel_opts(&self, namespace: Option<&str>) -> Result<ChannelOptions, ClientError> {
        match namespace {
            None => Ok(self.channel_options.clone()),
            Some(key) => self
                .namespace_map
                .get(key)
                .cloned()
                .ok_or(ClientError::NamespaceNotFound),
        }
    }

    /// Broker-level channel id for a user-facing channel name.
    pub fn channel_id(&self, channel: &str) -> ChannelId {
        format!("{}.{}", self.channel_prefix, channel)
    }

    /// Channel carrying admin broadcasts.
    pub fn admin_channel(&self) -> ChannelId {
        format!("{}.admin", self.channel_prefix)
    }

    /// Channel carrying inter-node control messages.
    pub fn control_channel(&self) -> ChannelId {
        format!("{}.control", self.channel_prefix)
    }

    /// Secret used for admin tokens.
    pub fn admin_token_secret(&self) -> &str {
        if self.admin_secret.is_empty() {
            &self.secret
        } else {
            &self.admin_secret
        }
    }
}

fn set_bool(target: &mut bool, value: &str) {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => *target = true,
        "0" | "false" | "no" | "off" => *target = false,
        _ => {}
    }
}

fn set_num<T: std::str::FromStr>(target: &mut T, value: &str) {
    if let Ok(v) = value.parse() {
        *target = v;
    }
}
