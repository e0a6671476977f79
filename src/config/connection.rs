use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Where the subscription server lives and how channels to it behave
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ConnectionConfig {
    /// Server addresses, e.g. `http://127.0.0.1:9083`
    #[serde(default = "default_endpoints")]
    pub endpoints: Vec<String>,

    /// Database every subscription belongs to
    #[serde(default = "default_database")]
    pub database: String,

    #[serde(default = "default_connect_timeout_in_ms")]
    pub connect_timeout_in_ms: u64,

    /// Deadline of unary operation calls
    #[serde(default = "default_request_timeout_in_ms")]
    pub request_timeout_in_ms: u64,

    #[serde(default = "default_tcp_keepalive_in_secs")]
    pub tcp_keepalive_in_secs: u64,

    #[serde(default = "default_http2_keep_alive_interval_in_secs")]
    pub http2_keep_alive_interval_in_secs: u64,

    #[serde(default = "default_http2_keep_alive_timeout_in_secs")]
    pub http2_keep_alive_timeout_in_secs: u64,

    /// Gzip request and response bodies
    #[serde(default = "default_enable_compression")]
    pub enable_compression: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            endpoints: default_endpoints(),
            database: default_database(),
            connect_timeout_in_ms: default_connect_timeout_in_ms(),
            request_timeout_in_ms: default_request_timeout_in_ms(),
            tcp_keepalive_in_secs: default_tcp_keepalive_in_secs(),
            http2_keep_alive_interval_in_secs: default_http2_keep_alive_interval_in_secs(),
            http2_keep_alive_timeout_in_secs: default_http2_keep_alive_timeout_in_secs(),
            enable_compression: default_enable_compression(),
        }
    }
}

impl ConnectionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_in_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_in_ms)
    }

    pub fn tcp_keepalive(&self) -> Duration {
        Duration::from_secs(self.tcp_keepalive_in_secs)
    }

    pub fn http2_keep_alive_interval(&self) -> Duration {
        Duration::from_secs(self.http2_keep_alive_interval_in_secs)
    }

    pub fn http2_keep_alive_timeout(&self) -> Duration {
        Duration::from_secs(self.http2_keep_alive_timeout_in_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.endpoints.is_empty() {
            return Err(Error::Config(ConfigError::Message(
                "at least one endpoint is required".into(),
            )));
        }
        for endpoint in &self.endpoints {
            if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                return Err(Error::Config(ConfigError::Message(format!(
                    "endpoint {endpoint} must start with http:// or https://"
                ))));
            }
        }
        if self.database.trim().is_empty() {
            return Err(Error::Config(ConfigError::Message(
                "database cannot be empty".into(),
            )));
        }
        if self.connect_timeout_in_ms == 0 || self.request_timeout_in_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "connect and request timeouts must be greater than 0".into(),
            )));
        }
        if self.http2_keep_alive_timeout_in_secs >= self.http2_keep_alive_interval_in_secs {
            return Err(Error::Config(ConfigError::Message(format!(
                "http2_keep_alive_timeout_in_secs ({}) must be shorter than the interval ({})",
                self.http2_keep_alive_timeout_in_secs, self.http2_keep_alive_interval_in_secs
            ))));
        }
        Ok(())
    }
}

fn default_endpoints() -> Vec<String> {
    vec!["http://127.0.0.1:9083".to_string()]
}
fn default_database() -> String {
    "default".to_string()
}
fn default_connect_timeout_in_ms() -> u64 {
    1000
}
fn default_request_timeout_in_ms() -> u64 {
    3000
}
fn default_tcp_keepalive_in_secs() -> u64 {
    60
}
fn default_http2_keep_alive_interval_in_secs() -> u64 {
    30
}
fn default_http2_keep_alive_timeout_in_secs() -> u64 {
    10
}
fn default_enable_compression() -> bool {
    true
}
