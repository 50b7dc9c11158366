//! Channel name parsing and access rules.
//!
//! A channel name can carry several markers, all configurable:
//!
//! ```text
//! $public:chat#2694,3019&7a37e561-...
//! │ │      │   │         └ client-limited part (one connection id)
//! │ │      │   └ allowed-users whitelist
//! │ │      └ rest of the name
//! │ └ namespace key
//! └ private prefix (signed subscribe required)
//! ```

use centrifugo_core::ClientError;

use crate::config::{ChannelOptions, Config};

/// The decomposed form of a channel name. Borrows from the input.
#[derive(Debug, PartialEq, Eq)]
pub struct ParsedChannel<'a> {
    /// The full channel name as given.
    pub channel: &'a str,
    /// Namespace key, if the name contains the namespace boundary.
    pub namespace: Option<&'a str>,
    /// Allowed user ids. Empty means no restriction.
    pub users: Vec<&'a str>,
    /// Connection id this channel is bound to, if any.
    pub client: Option<&'a str>,
    /// Whether the channel requires a signed subscribe.
    pub private: bool,
}

impl<'a> ParsedChannel<'a> {
    /// Whether `user` may subscribe with respect to the allowed-users
    /// part of the name.
    pub fn user_allowed(&self, user: &str) -> bool {
        self.users.is_empty() || self.users.contains(&user)
    }

    /// Whether the connection `conn_id` may subscribe with respect to the
    /// client-limited part of the name.
    pub fn client_allowed(&self, conn_id: &str) -> bool {
        match self.client {
            Some(bound) => bound == conn_id,
            None => true,
        }
    }
}

/// Parse a channel name against the current config. Pure function of the
/// config snapshot and the name.
pub fn parse_channel<'a>(cfg: &Config, channel: &'a str) -> Result<ParsedChannel<'a>, ClientError> {
    if channel.is_empty() {
        return Err(ClientError::InvalidMessage);
    }
    if channel.len() > cfg.max_channel_length {
        return Err(ClientError::LimitExceeded);
    }

    let mut rest = channel;

    // Client-limited part comes last: "client&<conn id>".
    let mut client = None;
    if let Some((head, conn)) = rest.split_once(cfg.client_channel_boundary.as_str()) {
        client = Some(conn);
        rest = head;
    }

    // Allowed-users part: "dialog#2694,3019".
    let mut users = Vec::new();
    if let Some((head, user_part)) = rest.split_once(cfg.user_channel_boundary.as_str()) {
        users = user_part
            .split(cfg.user_channel_separator.as_str())
            .filter(|u| !u.is_empty())
            .collect();
        rest = head;
    }

    let private = channel.starts_with(cfg.private_channel_prefix.as_str());

    // Namespace is looked up with the private prefix stripped, so
    // "$public:chat" uses the "public" namespace.
    let trimmed = rest
        .strip_prefix(cfg.private_channel_prefix.as_str())
        .unwrap_or(rest);
    let namespace = trimmed
        .split_once(cfg.namespace_channel_boundary.as_str())
        .map(|(ns, _)| ns);

    Ok(ParsedChannel {
        channel,
        namespace,
        users,
        client,
        private,
    })
}

/// Resolve the channel options applying to a parsed channel.
pub fn resolve_opts(cfg: &Config, parsed: &ParsedChannel<'_>) -> Result<ChannelOptions, ClientError> {
    cfg.channel_opts(parsed.namespace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Namespace;

    fn config() -> Config {
        let mut cfg = Config::default();
        cfg.namespaces = vec![Namespace {
            name: "public".into(),
            options: ChannelOptions {
                presence: true,
                ..ChannelOptions::default()
            },
        }];
        cfg.initialize();
        cfg
    }

    #[test]
    fn plain_channel() {
        let cfg = config();
        let p = parse_channel(&cfg, "news").unwrap();
        assert_eq!(p.namespace, None);
        assert!(p.users.is_empty());
        assert_eq!(p.client, None);
        assert!(!p.private);
    }

    #[test]
    fn namespaced_channel() {
        let cfg = config();
        let p = parse_channel(&cfg, "public:chat").unwrap();
        assert_eq!(p.namespace, Some("public"));
        assert!(resolve_opts(&cfg, &p).unwrap().presence);
    }

    #[test]
    fn unknown_namespace_fails_resolution() {
        let cfg = config();
        let p = parse_channel(&cfg, "ghost:chat").unwrap();
        assert_eq!(
            resolve_opts(&cfg, &p).unwrap_err(),
            ClientError::NamespaceNotFound
        );
    }

    #[test]
    fn private_channel_detection() {
        let cfg = config();
        let p = parse_channel(&cfg, "$gossips").unwrap();
        assert!(p.private);
        assert_eq!(p.namespace, None);

        // Namespace lookup strips the private prefix first.
        let p = parse_channel(&cfg, "$public:gossips").unwrap();
        assert!(p.private);
        assert_eq!(p.namespace, Some("public"));
    }

    #[test]
    fn user_limited_channel() {
        let cfg = config();
        let p = parse_channel(&cfg, "dialog#2694,3019").unwrap();
        assert_eq!(p.users, vec!["2694", "3019"]);
        assert!(p.user_allowed("2694"));
        assert!(p.user_allowed("3019"));
        assert!(!p.user_allowed("1"));
        assert!(!p.user_allowed(""));

        let p = parse_channel(&cfg, "user#2694").unwrap();
        assert_eq!(p.users, vec!["2694"]);
    }

    #[test]
    fn client_limited_channel() {
        let cfg = config();
        let p = parse_channel(&cfg, "updates&7a37e561-c720").unwrap();
        assert_eq!(p.client, Some("7a37e561-c720"));
        assert!(p.client_allowed("7a37e561-c720"));
        assert!(!p.client_allowed("other"));
    }

    #[test]
    fn combined_markers() {
        let cfg = config();
        let p = parse_channel(&cfg, "$public:dialog#42&conn-1").unwrap();
        assert!(p.private);
        assert_eq!(p.namespace, Some("public"));
        assert_eq!(p.users, vec!["42"]);
        assert_eq!(p.client, Some("conn-1"));
    }

    #[test]
    fn length_and_empty_checks() {
        let cfg = config();
        assert_eq!(
            parse_channel(&cfg, "").unwrap_err(),
            ClientError::InvalidMessage
        );
        let long = "x".repeat(cfg.max_channel_length + 1);
        assert_eq!(
            parse_channel(&cfg, &long).unwrap_err(),
            ClientError::LimitExceeded
        );
        let max = "x".repeat(cfg.max_channel_length);
        assert!(parse_channel(&cfg, &max).is_ok());
    }
}
