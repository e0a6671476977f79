use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;
use crate::SubscriptionOpeningStrategy;

/// Default settings of subscription workers
///
/// Seeds [`SubscriptionWorkerOptions`](crate::SubscriptionWorkerOptions);
/// individual workers override through the options builder.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct WorkerConfig {
    #[serde(default)]
    pub strategy: SubscriptionOpeningStrategy,

    #[serde(default = "default_max_docs_per_batch")]
    pub max_docs_per_batch: u32,

    /// Continuous downtime tolerated before the worker gives up
    #[serde(default = "default_max_erroneous_period_in_ms")]
    pub max_erroneous_period_in_ms: u64,

    #[serde(default = "default_time_to_wait_before_connection_retry_in_ms")]
    pub time_to_wait_before_connection_retry_in_ms: u64,

    #[serde(default)]
    pub ignore_subscriber_errors: bool,

    #[serde(default)]
    pub close_when_no_docs_left: bool,

    /// Deadline of the connection handshake and of each acknowledgment
    #[serde(default = "default_request_timeout_in_ms")]
    pub request_timeout_in_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            strategy: SubscriptionOpeningStrategy::default(),
            max_docs_per_batch: default_max_docs_per_batch(),
            max_erroneous_period_in_ms: default_max_erroneous_period_in_ms(),
            time_to_wait_before_connection_retry_in_ms: default_time_to_wait_before_connection_retry_in_ms(),
            ignore_subscriber_errors: false,
            close_when_no_docs_left: false,
            request_timeout_in_ms: default_request_timeout_in_ms(),
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_docs_per_batch == 0 {
            return Err(Error::Config(ConfigError::Message(
                "max_docs_per_batch must be greater than 0".into(),
            )));
        }
        if self.time_to_wait_before_connection_retry_in_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "time_to_wait_before_connection_retry_in_ms must be greater than 0".into(),
            )));
        }
        if self.max_erroneous_period_in_ms < self.time_to_wait_before_connection_retry_in_ms {
            return Err(Error::Config(ConfigError::Message(format!(
                "max_erroneous_period_in_ms ({}) must not be shorter than the retry wait ({})",
                self.max_erroneous_period_in_ms, self.time_to_wait_before_connection_retry_in_ms
            ))));
        }
        if self.request_timeout_in_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "request_timeout_in_ms must be greater than 0".into(),
            )));
        }
        Ok(())
    }
}

fn default_max_docs_per_batch() -> u32 {
    4096
}
fn default_max_erroneous_period_in_ms() -> u64 {
    5 * 60 * 1000
}
fn default_time_to_wait_before_connection_retry_in_ms() -> u64 {
    5000
}
fn default_request_timeout_in_ms() -> u64 {
    30_000
}
