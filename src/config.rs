//! Typed client configuration, replacing the shape-sniffed runtime
//! config of the source implementation with a builder that can fail
//! loudly and early (see REDESIGN FLAGS).

use std::time::Duration;

use crate::error::{Error, Result};

/// One server within a [`GroupSpec`], as `host:port` or `host:port:weight`
/// (weight defaults to 1).
#[derive(Debug, Clone)]
pub struct ServerSpec {
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) weight: u32,
}

impl ServerSpec {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port, weight: 1 }
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    /// Parse `host:port` or `host:port:weight`.
    pub fn parse(spec: &str) -> Result<Self> {
        let parts: Vec<&str> = spec.split(':').collect();
        match parts.as_slice() {
            [host, port] => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| Error::Argument(format!("invalid port in server spec: {}", spec)))?;
                Ok(Self::new(*host, port))
            }
            [host, port, weight] => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| Error::Argument(format!("invalid port in server spec: {}", spec)))?;
                let weight = weight
                    .parse::<u32>()
                    .map_err(|_| Error::Argument(format!("invalid weight in server spec: {}", spec)))?;
                Ok(Self::new(*host, port).with_weight(weight))
            }
            _ => Err(Error::Argument(format!("malformed server spec: {}", spec))),
        }
    }
}

/// One named replication group: a set of servers, one of which will be
/// elected master.
#[derive(Debug, Clone)]
pub struct GroupSpec {
    pub(crate) name: String,
    pub(crate) weight: u32,
    pub(crate) servers: Vec<ServerSpec>,
}

impl GroupSpec {
    pub fn new(name: impl Into<String>, servers: Vec<ServerSpec>) -> Self {
        Self { name: name.into(), weight: 1, servers }
    }

    /// The group's share of continuum points, relative to every other
    /// group's weight. Defaults to 1.
    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }
}

/// Builder for a [`crate::client::Client`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub(crate) groups: Vec<GroupSpec>,
    pub(crate) namespace: String,
    pub(crate) namespace_separator: String,
    pub(crate) timeout: Option<Duration>,
    pub(crate) failover: bool,
    pub(crate) multithread: bool,
    pub(crate) readonly: bool,
    pub(crate) no_reply: bool,
    pub(crate) check_size: bool,
    pub(crate) autofix_keys: bool,
}

impl ClientConfig {
    pub fn new(groups: Vec<GroupSpec>) -> Self {
        Self {
            groups,
            namespace: String::new(),
            namespace_separator: ":".to_string(),
            timeout: Some(Duration::from_millis(500)),
            failover: true,
            multithread: true,
            readonly: false,
            no_reply: false,
            check_size: true,
            autofix_keys: true,
        }
    }

    /// Prefixed onto every key (and stripped from `VALUE`/multi-get
    /// replies) as `"<namespace><separator><key>"`.
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Inserted between the namespace and the key. Defaults to `":"`.
    pub fn namespace_separator(mut self, separator: impl Into<String>) -> Self {
        self.namespace_separator = separator.into();
        self
    }

    /// Socket connect/read/write timeout. `None` blocks indefinitely.
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Whether a dead server triggers up to 19 additional routing
    /// attempts against other groups (`true`, the default) or an
    /// immediate error (`false`).
    pub fn failover(mut self, failover: bool) -> Self {
        self.failover = failover;
        self
    }

    /// Whether the client will be shared across threads. When `true`
    /// (the default), every socket operation takes an internal lock
    /// instead of asserting single-thread ownership.
    pub fn multithread(mut self, multithread: bool) -> Self {
        self.multithread = multithread;
        self
    }

    /// Reject every mutating operation with [`crate::Error::Argument`].
    pub fn readonly(mut self, readonly: bool) -> Self {
        self.readonly = readonly;
        self
    }

    /// Write commands append ` noreply` and skip reading a response.
    pub fn no_reply(mut self, no_reply: bool) -> Self {
        self.no_reply = no_reply;
        self
    }

    /// Reject values over 1 MiB before writing anything to a socket.
    /// Default `true`.
    pub fn check_size(mut self, check_size: bool) -> Self {
        self.check_size = check_size;
        self
    }

    /// SHA-1-rewrite keys that contain whitespace or would exceed 250
    /// bytes once namespaced. Default `true`.
    pub fn autofix_keys(mut self, autofix_keys: bool) -> Self {
        self.autofix_keys = autofix_keys;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.groups.is_empty() {
            return Err(Error::Argument("at least one group is required".into()));
        }
        for group in &self.groups {
            if group.servers.is_empty() {
                return Err(Error::Argument(format!(
                    "group {} has no servers",
                    group.name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_spec_parse_without_weight() {
        let spec = ServerSpec::parse("127.0.0.1:11211").unwrap();
        assert_eq!("127.0.0.1", spec.host);
        assert_eq!(11211, spec.port);
        assert_eq!(1, spec.weight);
    }

    #[test]
    fn test_server_spec_parse_with_weight() {
        let spec = ServerSpec::parse("127.0.0.1:11211:3").unwrap();
        assert_eq!(3, spec.weight);
    }

    #[test]
    fn test_server_spec_parse_rejects_malformed() {
        assert!(ServerSpec::parse("not-a-spec").is_err());
        assert!(ServerSpec::parse("host:not-a-port").is_err());
    }

    #[test]
    fn test_group_spec_weight_defaults_to_one() {
        let group = GroupSpec::new("g", vec![ServerSpec::new("localhost", 11211)]);
        assert_eq!(1, group.weight);
        let group = group.with_weight(5);
        assert_eq!(5, group.weight);
    }

    #[test]
    fn test_config_requires_groups() {
        let config = ClientConfig::new(vec![]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_requires_servers_per_group() {
        let config = ClientConfig::new(vec![GroupSpec::new("g", vec![])]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_defaults() {
        let config = ClientConfig::new(vec![GroupSpec::new(
            "g",
            vec![ServerSpec::new("localhost", 11211)],
        )]);
        assert!(config.validate().is_ok());
        assert!(config.failover);
        assert!(config.multithread);
        assert!(config.check_size);
        assert!(config.autofix_keys);
        assert!(!config.readonly);
        assert_eq!(":", config.namespace_separator);
        assert_eq!(Some(Duration::from_millis(500)), config.timeout);
    }
}
