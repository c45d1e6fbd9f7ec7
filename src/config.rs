use std::time::Duration;

use crate::constants::convert_character_value;
use crate::errors::{ProtoError, ProtoResult};

use dakv_logger::prelude::*;
use serde_json::{Map, Value};

/// Key-value configuration handed to the client factory.
pub type ConfigRecord = Map<String, Value>;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 3306;
pub const DEFAULT_USERNAME: &str = "vertx";
pub const DEFAULT_PASSWORD: &str = "password";
pub const DEFAULT_DATABASE: &str = "testdb";
pub const DEFAULT_CHARSET: &str = "utf8";
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

const KNOWN_KEYS: &[&str] = &[
    "host",
    "port",
    "username",
    "password",
    "database",
    "charset",
    "connectTimeout",
];

/// Typed view of a `ConfigRecord`, missing keys take the defaults above.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: String,
    pub charset: u8,
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            username: DEFAULT_USERNAME.to_string(),
            password: DEFAULT_PASSWORD.to_string(),
            database: DEFAULT_DATABASE.to_string(),
            charset: convert_character_value(DEFAULT_CHARSET).unwrap_or_default(),
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
        }
    }
}

impl ClientConfig {
    pub fn from_record(record: &ConfigRecord) -> ProtoResult<Self> {
        let mut config = ClientConfig::default();
        for key in record.keys() {
            if !KNOWN_KEYS.contains(&key.as_str()) {
                debug!("Ignore unknown config key {}", key);
            }
        }
        if let Some(host) = get_str(record, "host")? {
            if host.trim().is_empty() {
                return Err(invalid("host", "must not be empty"));
            }
            config.host = host;
        }
        if let Some(port) = get_u64(record, "port")? {
            if port == 0 || port > u16::max_value() as u64 {
                return Err(invalid("port", format!("{} is out of range", port)));
            }
            config.port = port as u16;
        }
        if let Some(username) = get_str(record, "username")? {
            config.username = username;
        }
        if let Some(password) = get_str(record, "password")? {
            config.password = password;
        }
        if let Some(database) = get_str(record, "database")? {
            config.database = database;
        }
        if let Some(charset) = get_str(record, "charset")? {
            config.charset = convert_character_value(&charset)
                .ok_or_else(|| invalid("charset", format!("unknown charset {}", charset)))?;
        }
        if let Some(ms) = get_u64(record, "connectTimeout")? {
            // Sockets reject a zero timeout.
            if ms == 0 {
                return Err(invalid("connectTimeout", "must be greater than 0"));
            }
            config.connect_timeout = Duration::from_millis(ms);
        }
        Ok(config)
    }

    /// "host:port", ready for `ToSocketAddrs`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn invalid<S: Into<String>>(key: &str, reason: S) -> ProtoError {
    ProtoError::InvalidConfig(key.to_string(), reason.into())
}

fn get_str(record: &ConfigRecord, key: &str) -> ProtoResult<Option<String>> {
    match record.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(invalid(key, format!("expected a string, got {}", other))),
    }
}

fn get_u64(record: &ConfigRecord, key: &str) -> ProtoResult<Option<u64>> {
    match record.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .map(Some)
            .ok_or_else(|| invalid(key, format!("expected a positive integer, got {}", n))),
        Some(other) => Err(invalid(key, format!("expected an integer, got {}", other))),
    }
}
