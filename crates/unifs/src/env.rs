//! The environment map handed to a backend when a filesystem is created.
//!
//! An environment is a string-keyed map of typed values, built once and
//! treated as immutable afterwards. Typed getters fail with
//! [`Error::InvalidProperty`] naming the key, never the value, since
//! several keys carry credentials.

use std::collections::HashMap;
use std::time::Duration;

use unifs_pool::PoolConfig;

use crate::duration::parse_duration;
use crate::{Error, Result};

/// Well-known environment keys.
pub mod keys {
    pub const USERNAME: &str = "username";
    pub const PASSWORD: &str = "password";
    pub const BUCKET: &str = "bucket";
    pub const PROTOCOL: &str = "protocol";
    pub const PORT: &str = "port";
    pub const CONNECT_TIMEOUT: &str = "connectTimeout";
    pub const TIMEOUT: &str = "timeout";
    pub const IDENTITIES: &str = "identities";
    pub const KNOWN_HOSTS: &str = "knownHosts";
    pub const PROXY: &str = "proxy";
    pub const POOL_CONFIG: &str = "poolConfig";
    pub const DEFAULT_DIR: &str = "defaultDir";
    pub const CONFIG: &str = "config";
}

/// The application protocol an object-store endpoint speaks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Protocol {
    #[default]
    Http,
    Https,
}

/// One typed environment value.
#[derive(Debug, Clone, PartialEq)]
pub enum EnvValue {
    String(String),
    Int(i64),
    Bool(bool),
    Duration(Duration),
    StringList(Vec<String>),
    StringMap(HashMap<String, String>),
    PoolConfig(PoolConfig),
}

impl From<&str> for EnvValue {
    fn from(value: &str) -> Self {
        EnvValue::String(value.to_string())
    }
}

impl From<String> for EnvValue {
    fn from(value: String) -> Self {
        EnvValue::String(value)
    }
}

impl From<i64> for EnvValue {
    fn from(value: i64) -> Self {
        EnvValue::Int(value)
    }
}

impl From<bool> for EnvValue {
    fn from(value: bool) -> Self {
        EnvValue::Bool(value)
    }
}

impl From<Duration> for EnvValue {
    fn from(value: Duration) -> Self {
        EnvValue::Duration(value)
    }
}

impl From<PoolConfig> for EnvValue {
    fn from(value: PoolConfig) -> Self {
        EnvValue::PoolConfig(value)
    }
}

impl From<Vec<String>> for EnvValue {
    fn from(value: Vec<String>) -> Self {
        EnvValue::StringList(value)
    }
}

impl From<HashMap<String, String>> for EnvValue {
    fn from(value: HashMap<String, String>) -> Self {
        EnvValue::StringMap(value)
    }
}

/// The typed key→value map passed to a backend factory.
///
/// Logically immutable once published to a filesystem; build it up front
/// with [`with`][FileSystemEnvironment::with].
#[derive(Debug, Clone, Default)]
pub struct FileSystemEnvironment {
    values: HashMap<String, EnvValue>,
}

impl FileSystemEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry, builder style.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<EnvValue>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&EnvValue> {
        self.values.get(key)
    }

    /// An optional string entry.
    pub fn string(&self, key: &str) -> Result<Option<&str>> {
        match self.values.get(key) {
            None => Ok(None),
            Some(EnvValue::String(s)) => Ok(Some(s)),
            Some(_) => Err(Error::invalid_property(key)),
        }
    }

    /// A required string entry.
    pub fn require_string(&self, key: &str) -> Result<&str> {
        self.string(key)?.ok_or_else(|| Error::invalid_property(key))
    }

    /// An optional integer entry.
    pub fn int(&self, key: &str) -> Result<Option<i64>> {
        match self.values.get(key) {
            None => Ok(None),
            Some(EnvValue::Int(i)) => Ok(Some(*i)),
            Some(_) => Err(Error::invalid_property(key)),
        }
    }

    /// An optional boolean entry.
    pub fn boolean(&self, key: &str) -> Result<Option<bool>> {
        match self.values.get(key) {
            None => Ok(None),
            Some(EnvValue::Bool(b)) => Ok(Some(*b)),
            Some(_) => Err(Error::invalid_property(key)),
        }
    }

    /// An optional duration entry. String values are parsed with the
    /// duration grammar; a parse failure is reported against the key.
    pub fn duration(&self, key: &str) -> Result<Option<Duration>> {
        match self.values.get(key) {
            None => Ok(None),
            Some(EnvValue::Duration(d)) => Ok(Some(*d)),
            Some(EnvValue::String(s)) => {
                parse_duration(s).map(Some).map_err(|_| Error::invalid_property(key))
            }
            Some(_) => Err(Error::invalid_property(key)),
        }
    }

    /// An optional list-of-strings entry.
    pub fn string_list(&self, key: &str) -> Result<Option<&[String]>> {
        match self.values.get(key) {
            None => Ok(None),
            Some(EnvValue::StringList(list)) => Ok(Some(list)),
            Some(_) => Err(Error::invalid_property(key)),
        }
    }

    /// An optional nested string-map entry (protocol-specific options).
    pub fn string_map(&self, key: &str) -> Result<Option<&HashMap<String, String>>> {
        match self.values.get(key) {
            None => Ok(None),
            Some(EnvValue::StringMap(map)) => Ok(Some(map)),
            Some(_) => Err(Error::invalid_property(key)),
        }
    }

    /// The TCP port, defaulting to 80.
    pub fn port(&self) -> Result<u16> {
        match self.int(keys::PORT)? {
            None => Ok(80),
            Some(port) if (1..=65535).contains(&port) => Ok(port as u16),
            Some(_) => Err(Error::invalid_property(keys::PORT)),
        }
    }

    /// The object-store protocol, defaulting to HTTP.
    pub fn protocol(&self) -> Result<Protocol> {
        match self.string(keys::PROTOCOL)? {
            None => Ok(Protocol::default()),
            Some("http") => Ok(Protocol::Http),
            Some("https") => Ok(Protocol::Https),
            Some(_) => Err(Error::invalid_property(keys::PROTOCOL)),
        }
    }

    /// The pool configuration, synthesizing the default (initial 5, max 10,
    /// unbounded waits) when none is supplied.
    pub fn pool_config(&self) -> Result<PoolConfig> {
        match self.values.get(keys::POOL_CONFIG) {
            None => Ok(PoolConfig::default()),
            Some(EnvValue::PoolConfig(config)) => Ok(config.clone()),
            Some(_) => Err(Error::invalid_property(keys::POOL_CONFIG)),
        }
    }
}
