// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Client environment keys and the TOML server configuration.
// Author: Lukas Bower

//! Configuration surfaces.
//!
//! Clients carry an [`Environment`] of string keys. The server daemon reads
//! a [`ServerConfig`] from TOML.

use std::collections::BTreeMap;
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::NamingError;
use crate::permission::PermissionGrant;

/// Comma-separated provider URLs tried in order.
pub const PROVIDER_URL: &str = "naming.provider.url";
/// Local address client sockets bind to.
pub const LOCAL_ADDRESS: &str = "nd.localAddress";
/// Local port client sockets bind to.
pub const LOCAL_PORT: &str = "nd.localPort";
/// `true` disables multicast discovery for this context.
pub const DISABLE_DISCOVERY: &str = "nd.disableDiscovery";
/// Partition discovery is restricted to.
pub const PARTITION_NAME: &str = "nd.partitionName";
/// Multicast group discovery requests are sent to.
pub const DISCOVERY_GROUP: &str = "nd.discoveryGroup";
/// Port discovery requests are sent to.
pub const DISCOVERY_PORT: &str = "nd.discoveryPort";
/// Multicast time-to-live for discovery requests.
pub const DISCOVERY_TTL: &str = "nd.discoveryTTL";
/// Milliseconds to wait for a discovery reply.
pub const DISCOVERY_TIMEOUT: &str = "nd.discoveryTimeout";
/// Connect timeout in milliseconds.
pub const CONNECT_TIMEOUT: &str = "nd.timeout";
/// Read timeout in milliseconds.
pub const READ_TIMEOUT: &str = "nd.sotimeout";
/// Attempts made when a connection is refused.
pub const MAX_RETRIES: &str = "nd.maxRetries";
/// `true` returns deserialized copies instead of shared in-process values.
pub const CALL_BY_VALUE: &str = "nd.callByValue";
/// `true` hands relative names to the object-reconstruction hook.
pub const USE_RELATIVE_NAME: &str = "nd.useRelativeName";

/// Default discovery multicast group.
pub const DEFAULT_DISCOVERY_GROUP: &str = "230.0.0.4";
/// Default discovery port.
pub const DEFAULT_DISCOVERY_PORT: u16 = 1102;
/// Default discovery time-to-live.
pub const DEFAULT_DISCOVERY_TTL: u32 = 16;
/// Default discovery timeout.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_millis(5000);
/// Default socket timeout for connect and read.
pub const DEFAULT_SOCKET_TIMEOUT: Duration = Duration::from_secs(5);
/// Default connect attempts.
pub const DEFAULT_MAX_RETRIES: u32 = 1;

/// String-keyed client configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    entries: BTreeMap<String, String>,
}

impl Environment {
    /// Empty environment.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Value for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Insert a value, returning the previous one.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.entries.insert(key.into(), value.into())
    }

    /// Remove a value, returning it.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.remove(key)
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Iterate over entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entry is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn parsed<T: FromStr>(&self, key: &str) -> Result<Option<T>, NamingError> {
        match self.get(key).map(str::trim) {
            None | Some("") => Ok(None),
            Some(text) => text.parse().map(Some).map_err(|_| {
                NamingError::Configuration(format!("invalid value {text:?} for {key}"))
            }),
        }
    }

    fn flag(&self, key: &str) -> bool {
        self.get(key)
            .map(|value| value.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    fn millis(&self, key: &str) -> Result<Option<Duration>, NamingError> {
        Ok(self
            .parsed::<u64>(key)?
            .filter(|millis| *millis > 0)
            .map(Duration::from_millis))
    }

    /// Provider URLs, trimmed, empty entries dropped.
    #[must_use]
    pub fn provider_urls(&self) -> Vec<String> {
        self.get(PROVIDER_URL)
            .map(|urls| {
                urls.split(',')
                    .map(str::trim)
                    .filter(|url| !url.is_empty())
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Raw per-context discovery flag, if present.
    #[must_use]
    pub fn disable_discovery(&self) -> Option<&str> {
        self.get(DISABLE_DISCOVERY)
    }

    /// Configured partition.
    #[must_use]
    pub fn partition_name(&self) -> Option<&str> {
        self.get(PARTITION_NAME).filter(|name| !name.is_empty())
    }

    /// Local address for client sockets.
    pub fn local_address(&self) -> Result<Option<IpAddr>, NamingError> {
        self.parsed(LOCAL_ADDRESS)
    }

    /// Local port for client sockets.
    pub fn local_port(&self) -> Result<u16, NamingError> {
        Ok(self.parsed(LOCAL_PORT)?.unwrap_or(0))
    }

    /// Discovery group.
    pub fn discovery_group(&self) -> Result<IpAddr, NamingError> {
        match self.parsed(DISCOVERY_GROUP)? {
            Some(group) => Ok(group),
            None => DEFAULT_DISCOVERY_GROUP.parse().map_err(|_| {
                NamingError::Configuration("invalid default discovery group".into())
            }),
        }
    }

    /// Discovery port.
    pub fn discovery_port(&self) -> Result<u16, NamingError> {
        Ok(self.parsed(DISCOVERY_PORT)?.unwrap_or(DEFAULT_DISCOVERY_PORT))
    }

    /// Discovery time-to-live.
    pub fn discovery_ttl(&self) -> Result<u32, NamingError> {
        Ok(self.parsed(DISCOVERY_TTL)?.unwrap_or(DEFAULT_DISCOVERY_TTL))
    }

    /// Discovery timeout.
    pub fn discovery_timeout(&self) -> Result<Duration, NamingError> {
        Ok(self.millis(DISCOVERY_TIMEOUT)?.unwrap_or(DEFAULT_DISCOVERY_TIMEOUT))
    }

    /// Connect timeout.
    pub fn connect_timeout(&self) -> Result<Duration, NamingError> {
        Ok(self.millis(CONNECT_TIMEOUT)?.unwrap_or(DEFAULT_SOCKET_TIMEOUT))
    }

    /// Read timeout.
    pub fn read_timeout(&self) -> Result<Duration, NamingError> {
        Ok(self.millis(READ_TIMEOUT)?.unwrap_or(DEFAULT_SOCKET_TIMEOUT))
    }

    /// Connect attempts, at least one.
    pub fn max_retries(&self) -> Result<u32, NamingError> {
        Ok(self
            .parsed(MAX_RETRIES)?
            .unwrap_or(DEFAULT_MAX_RETRIES)
            .max(1))
    }

    /// Whether lookups return deserialized copies.
    #[must_use]
    pub fn call_by_value(&self) -> bool {
        self.flag(CALL_BY_VALUE)
    }

    /// Whether the reconstruction hook sees absolute names.
    #[must_use]
    pub fn use_absolute_name(&self) -> bool {
        !self.flag(USE_RELATIVE_NAME)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Environment {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }
}

/// Errors loading a server configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// Offending path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The TOML was malformed.
    #[error("invalid server configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Discovery responder settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DiscoveryConfig {
    /// Whether the responder runs.
    pub enabled: bool,
    /// Address the responder binds to.
    pub bind_address: String,
    /// Multicast group joined when it is a multicast address.
    pub group: String,
    /// UDP port.
    pub port: u16,
    /// Partition answered for; requests naming another partition are ignored.
    pub partition: Option<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: "0.0.0.0".into(),
            group: DEFAULT_DISCOVERY_GROUP.into(),
            port: DEFAULT_DISCOVERY_PORT,
            partition: None,
        }
    }
}

/// Naming daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Addresses the bootstrap listener binds to.
    pub bind_addresses: Vec<String>,
    /// Bootstrap port; `0` picks an ephemeral port and a negative value disables the listener.
    pub port: i32,
    /// Accept backlog; values of zero or less fall back to the default.
    pub backlog: i32,
    /// Worker threads for the bootstrap listener; defaults to addresses + 1.
    pub pool_size: Option<usize>,
    /// Address the naming RPC endpoint binds to.
    pub rpc_bind_address: String,
    /// Naming RPC port; `0` picks an ephemeral port.
    pub rpc_port: u16,
    /// Host written into vended handles; defaults to the RPC bind address.
    pub advertised_host: Option<String>,
    /// Socket timeout for server connections, in milliseconds.
    pub timeout_ms: u64,
    /// Return deserialized copies to in-process lookups.
    pub call_by_value: bool,
    /// Install the tree as the process-local server.
    pub install_global: bool,
    /// Discovery responder.
    pub discovery: DiscoveryConfig,
    /// Granted permissions; empty allows everything.
    pub permissions: Vec<PermissionGrant>,
}

/// Default bootstrap backlog.
pub const DEFAULT_BACKLOG: i32 = 50;
/// Default naming RPC port.
pub const DEFAULT_RPC_PORT: u16 = 1098;

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addresses: vec!["0.0.0.0".into()],
            port: i32::from(crate::name::DEFAULT_BOOTSTRAP_PORT),
            backlog: DEFAULT_BACKLOG,
            pool_size: None,
            rpc_bind_address: "0.0.0.0".into(),
            rpc_port: DEFAULT_RPC_PORT,
            advertised_host: None,
            timeout_ms: DEFAULT_SOCKET_TIMEOUT.as_millis() as u64,
            call_by_value: false,
            install_global: true,
            discovery: DiscoveryConfig::default(),
            permissions: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Parse TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Load from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Backlog with non-positive values replaced by the default.
    #[must_use]
    pub fn effective_backlog(&self) -> u32 {
        if self.backlog <= 0 {
            DEFAULT_BACKLOG as u32
        } else {
            self.backlog as u32
        }
    }

    /// Socket timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn typed_accessors_fall_back_to_defaults() {
        let env = Environment::new();
        assert_eq!(env.discovery_port().unwrap(), DEFAULT_DISCOVERY_PORT);
        assert_eq!(env.discovery_ttl().unwrap(), 16);
        assert_eq!(env.discovery_timeout().unwrap(), Duration::from_millis(5000));
        assert_eq!(env.max_retries().unwrap(), 1);
        assert_eq!(env.discovery_group().unwrap().to_string(), "230.0.0.4");
        assert!(env.use_absolute_name());
        assert!(!env.call_by_value());
    }

    #[test]
    fn bad_values_are_configuration_errors() {
        let env = Environment::new().with(DISCOVERY_PORT, "not-a-port");
        match env.discovery_port() {
            Err(NamingError::Configuration(message)) => assert!(message.contains(DISCOVERY_PORT)),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn provider_urls_split_on_commas() {
        let env = Environment::new().with(PROVIDER_URL, " nd://a:1 ,, b:2 ");
        assert_eq!(env.provider_urls(), vec!["nd://a:1", "b:2"]);
    }

    #[test]
    fn loads_server_config_from_toml_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(
            file,
            r#"
bind_addresses = ["127.0.0.1"]
port = 0
backlog = -3
rpc_port = 0

[discovery]
enabled = true
bind_address = "127.0.0.1"
partition = "east"

[[permissions]]
path = "path1/*"
actions = "lookup,list"
"#
        )
        .expect("write config");
        let config = ServerConfig::load(file.path()).expect("load config");
        assert_eq!(config.bind_addresses, vec!["127.0.0.1"]);
        assert_eq!(config.port, 0);
        assert_eq!(config.effective_backlog(), 50);
        assert!(config.discovery.enabled);
        assert_eq!(config.discovery.port, DEFAULT_DISCOVERY_PORT);
        assert_eq!(config.discovery.partition.as_deref(), Some("east"));
        assert_eq!(config.permissions.len(), 1);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(ServerConfig::from_toml_str("prot = 1099").is_err());
    }
}
