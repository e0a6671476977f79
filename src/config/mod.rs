//! Configuration management for subscription clients.
//!
//! Provides hierarchical configuration loading and validation with:
//! - Default values as code base
//! - Configuration file support
//! - Environment variable overrides
//! - Section-wise validation
mod connection;
mod monitoring;
mod retry;
mod tls;
mod worker;
pub use connection::*;
pub use monitoring::*;
pub use retry::*;
pub use tls::*;
pub use worker::*;


use std::env;

use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::Result;

/// Prefix of environment variable overrides, e.g. `DOCSUB__WORKER__MAX_DOCS_PER_BATCH`
pub const ENV_PREFIX: &str = "DOCSUB";

/// Root configuration of a subscription client
///
/// Sources are merged in this order, later ones winning:
/// 1. Default values from code
/// 2. Configuration file named by `CONFIG_PATH`
/// 3. Environment variables prefixed with `DOCSUB__`
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct SubscriptionsConfig {
    /// Server endpoints, database and channel parameters
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Defaults for every worker created by the client
    #[serde(default)]
    pub worker: WorkerConfig,
    /// Retry policies for operation calls
    #[serde(default)]
    pub retry: RetryPolicies,
    /// TLS settings of the gRPC channels
    #[serde(default)]
    pub tls: TlsConfig,
    /// Prometheus exporter
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

impl SubscriptionsConfig {
    /// Loads configuration from hierarchical sources without validation.
    ///
    /// Callers MUST call [`validate`](Self::validate) before use, after any
    /// further [`with_override_config`](Self::with_override_config).
    ///
    /// # Examples
    /// ```ignore
    /// std::env::set_var("CONFIG_PATH", "config/docsub.toml");
    /// std::env::set_var("DOCSUB__WORKER__MAX_DOCS_PER_BATCH", "100");
    /// let cfg = SubscriptionsConfig::new()?.validate()?;
    /// ```
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var("CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        builder = builder.add_source(env_source());

        let config: Self = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Applies additional overrides from `path` without validation.
    ///
    /// Environment variables are re-applied on top so they keep the highest
    /// priority.
    pub fn with_override_config(
        &self,
        path: &str,
    ) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path))
            .add_source(env_source())
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Validates every section and returns the validated instance
    pub fn validate(self) -> Result<Self> {
        self.connection.validate()?;
        self.worker.validate()?;
        self.retry.validate()?;
        self.tls.validate()?;
        self.monitoring.validate()?;
        Ok(self)
    }
}

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .ignore_empty(true)
        .try_parsing(true)
}
