use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConstructionError;

/// Well-known configuration keys.
pub mod options {
    /// Coordinator host. Always overwritten by the connection target.
    pub const COORDINATOR_ADDRESS: &str = "coordinator.rpc.address";
    /// Coordinator port. Always overwritten by the connection target.
    pub const COORDINATOR_PORT: &str = "coordinator.rpc.port";
    /// Default parallelism for operators that don't set one.
    pub const DEFAULT_PARALLELISM: &str = "parallelism.default";
    pub const CONNECT_TIMEOUT_MS: &str = "client.connect-timeout-ms";
    pub const RPC_TIMEOUT_MS: &str = "client.rpc-timeout-ms";
    pub const CLIENT_ID: &str = "client.id";
    pub const SSL_ENABLED: &str = "security.ssl.enabled";
    pub const SSL_CA_CERT: &str = "security.ssl.ca-cert";
    pub const SSL_CERT: &str = "security.ssl.cert";
    pub const SSL_KEY: &str = "security.ssl.key";
    pub const SSL_DOMAIN_NAME: &str = "security.ssl.domain-name";
}

/// Key/value options used to parametrize the coordinator client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Configuration {
    entries: BTreeMap<String, String>,
}

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_string(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    pub fn set_integer(&mut self, key: impl Into<String>, value: i64) -> &mut Self {
        self.set_string(key, value.to_string())
    }

    pub fn set_bool(&mut self, key: impl Into<String>, value: bool) -> &mut Self {
        self.set_string(key, value.to_string())
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn get_integer(&self, key: &str) -> Result<Option<i64>, ConstructionError> {
        self.parse(key, |v| v.trim().parse::<i64>().ok())
    }

    pub fn get_bool(&self, key: &str) -> Result<Option<bool>, ConstructionError> {
        self.parse(key, |v| match v.trim().to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        })
    }

    /// Millisecond option as a duration. Negative values are rejected.
    pub fn get_duration_ms(&self, key: &str) -> Result<Option<Duration>, ConstructionError> {
        self.parse(key, |v| v.trim().parse::<u64>().ok().map(Duration::from_millis))
    }

    fn parse<T>(
        &self,
        key: &str,
        f: impl FnOnce(&str) -> Option<T>,
    ) -> Result<Option<T>, ConstructionError> {
        match self.entries.get(key) {
            None => Ok(None),
            Some(value) => f(value)
                .map(Some)
                .ok_or_else(|| ConstructionError::InvalidConfigValue {
                    key: key.to_string(),
                    value: value.clone(),
                }),
        }
    }

    /// Copy every entry of `other` into this configuration, replacing existing keys.
    pub fn add_all(&mut self, other: &Configuration) -> &mut Self {
        for (key, value) in &other.entries {
            self.entries.insert(key.clone(), value.clone());
        }
        self
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Configuration {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Validated coordinator address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionTarget {
    host: String,
    port: u16,
}

impl ConnectionTarget {
    /// Accepts ports in `1..65535`; 0 and 65535 are rejected.
    pub fn new(host: impl Into<String>, port: u32) -> Result<Self, ConstructionError> {
        let host = host.into();
        if host.trim().is_empty() {
            return Err(ConstructionError::InvalidHost);
        }
        if !(1..0xffff).contains(&port) {
            return Err(ConstructionError::PortOutOfRange(port));
        }
        Ok(Self {
            host,
            port: port as u16,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Connection target plus the caller's base configuration.
#[derive(Debug, Clone)]
pub struct ConnectionParams {
    target: ConnectionTarget,
    base: Configuration,
}

impl ConnectionParams {
    pub fn new(
        host: impl Into<String>,
        port: u32,
        base: Option<Configuration>,
    ) -> Result<Self, ConstructionError> {
        let target = ConnectionTarget::new(host, port)?;
        let base = base.unwrap_or_default();
        // Fail construction rather than submission on a bad override.
        if let Some(parallelism) = base.get_integer(options::DEFAULT_PARALLELISM)? {
            if parallelism < 1 {
                return Err(ConstructionError::InvalidParallelism(parallelism));
            }
        }
        Ok(Self { target, base })
    }

    pub fn target(&self) -> &ConnectionTarget {
        &self.target
    }

    /// The configuration exactly as the caller supplied it.
    pub fn base_configuration(&self) -> &Configuration {
        &self.base
    }

    /// Base configuration with the coordinator address and port forced to the target.
    pub fn effective_configuration(&self) -> Configuration {
        let mut configuration = Configuration::new();
        configuration.add_all(&self.base);
        configuration.set_string(options::COORDINATOR_ADDRESS, self.target.host());
        configuration.set_integer(options::COORDINATOR_PORT, i64::from(self.target.port()));
        configuration
    }

    /// Parallelism override taken from the base configuration, if any.
    pub fn default_parallelism(&self) -> Option<u32> {
        self.base
            .get_integer(options::DEFAULT_PARALLELISM)
            .ok()
            .flatten()
            .and_then(|p| u32::try_from(p).ok())
    }
}

/// TLS configuration for the coordinator channel.
///
/// A CA certificate is required to verify the coordinator. A client
/// certificate and key are optional and, when both are present, enable mTLS.
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    /// Enable TLS. If false, all other TLS settings are ignored.
    pub enabled: bool,

    /// Path to the CA certificate (PEM format).
    pub ca_cert_path: Option<PathBuf>,

    /// Path to the client certificate (PEM format).
    pub cert_path: Option<PathBuf>,

    /// Path to the client private key (PEM format).
    pub key_path: Option<PathBuf>,

    /// Name to verify the coordinator certificate against. Defaults to the host.
    pub domain_name: Option<String>,
}

impl TlsConfig {
    pub fn from_configuration(config: &Configuration) -> Result<Self, ConstructionError> {
        let path = |key: &str| config.get_string(key).map(PathBuf::from);
        Ok(Self {
            enabled: config.get_bool(options::SSL_ENABLED)?.unwrap_or(false),
            ca_cert_path: path(options::SSL_CA_CERT),
            cert_path: path(options::SSL_CERT),
            key_path: path(options::SSL_KEY),
            domain_name: config.get_string(options::SSL_DOMAIN_NAME).map(str::to_string),
        })
    }

    /// True when both halves of a client identity are configured.
    pub fn has_client_identity(&self) -> bool {
        self.cert_path.is_some() && self.key_path.is_some()
    }
}
