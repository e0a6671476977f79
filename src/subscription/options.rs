use std::time::Duration;

use config::ConfigError;

use crate::Error;
use crate::Result;
use crate::SubscriptionOpeningStrategy;
use crate::WorkerConfig;

/// Settings of one subscription worker
///
/// Built through [`SubscriptionWorkerOptions::builder`]; the worker takes
/// ownership on construction, so the options cannot change while a
/// connection is established.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionWorkerOptions {
    subscription_name: String,
    strategy: SubscriptionOpeningStrategy,
    max_docs_per_batch: u32,
    max_erroneous_period: Duration,
    time_to_wait_before_connection_retry: Duration,
    ignore_subscriber_errors: bool,
    close_when_no_docs_left: bool,
    request_timeout: Duration,
}

impl SubscriptionWorkerOptions {
    /// Options with the built-in defaults
    pub fn new(subscription_name: impl Into<String>) -> Self {
        Self::from_config(subscription_name, &WorkerConfig::default())
    }

    /// Options seeded from the `worker` configuration section
    pub fn from_config(
        subscription_name: impl Into<String>,
        config: &WorkerConfig,
    ) -> Self {
        Self {
            subscription_name: subscription_name.into(),
            strategy: config.strategy,
            max_docs_per_batch: config.max_docs_per_batch,
            max_erroneous_period: Duration::from_millis(config.max_erroneous_period_in_ms),
            time_to_wait_before_connection_retry: Duration::from_millis(
                config.time_to_wait_before_connection_retry_in_ms,
            ),
            ignore_subscriber_errors: config.ignore_subscriber_errors,
            close_when_no_docs_left: config.close_when_no_docs_left,
            request_timeout: Duration::from_millis(config.request_timeout_in_ms),
        }
    }

    pub fn builder(subscription_name: impl Into<String>) -> SubscriptionWorkerOptionsBuilder {
        SubscriptionWorkerOptionsBuilder {
            options: Self::new(subscription_name),
        }
    }

    pub fn subscription_name(&self) -> &str {
        &self.subscription_name
    }

    pub fn strategy(&self) -> SubscriptionOpeningStrategy {
        self.strategy
    }

    pub fn max_docs_per_batch(&self) -> u32 {
        self.max_docs_per_batch
    }

    pub fn max_erroneous_period(&self) -> Duration {
        self.max_erroneous_period
    }

    pub fn time_to_wait_before_connection_retry(&self) -> Duration {
        self.time_to_wait_before_connection_retry
    }

    pub fn ignore_subscriber_errors(&self) -> bool {
        self.ignore_subscriber_errors
    }

    pub fn close_when_no_docs_left(&self) -> bool {
        self.close_when_no_docs_left
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn validate(&self) -> Result<()> {
        if self.subscription_name.trim().is_empty() {
            return Err(invalid("subscription_name cannot be empty"));
        }
        if self.max_docs_per_batch == 0 {
            return Err(invalid("max_docs_per_batch must be greater than 0"));
        }
        if self.time_to_wait_before_connection_retry.is_zero() {
            return Err(invalid("time_to_wait_before_connection_retry must be greater than 0"));
        }
        if self.max_erroneous_period.is_zero() {
            return Err(invalid("max_erroneous_period must be greater than 0"));
        }
        if self.request_timeout.is_zero() {
            return Err(invalid("request_timeout must be greater than 0"));
        }
        Ok(())
    }
}

fn invalid(message: &str) -> Error {
    Error::Config(ConfigError::Message(message.to_string()))
}

pub struct SubscriptionWorkerOptionsBuilder {
    options: SubscriptionWorkerOptions,
}

impl SubscriptionWorkerOptionsBuilder {
    /// Connection arbitration policy (default: OpenIfFree)
    pub fn strategy(
        mut self,
        strategy: SubscriptionOpeningStrategy,
    ) -> Self {
        self.options.strategy = strategy;
        self
    }

    /// Upper bound on items per batch (default: 4096)
    pub fn max_docs_per_batch(
        mut self,
        max: u32,
    ) -> Self {
        self.options.max_docs_per_batch = max;
        self
    }

    /// Continuous downtime tolerated before giving up (default: 5 minutes)
    pub fn max_erroneous_period(
        mut self,
        period: Duration,
    ) -> Self {
        self.options.max_erroneous_period = period;
        self
    }

    /// Pause between reconnect attempts (default: 5 seconds)
    pub fn time_to_wait_before_connection_retry(
        mut self,
        wait: Duration,
    ) -> Self {
        self.options.time_to_wait_before_connection_retry = wait;
        self
    }

    /// Acknowledge batches even when the callback fails (default: false)
    pub fn ignore_subscriber_errors(
        mut self,
        ignore: bool,
    ) -> Self {
        self.options.ignore_subscriber_errors = ignore;
        self
    }

    /// Complete the run once the server has nothing left to send (default: false)
    pub fn close_when_no_docs_left(
        mut self,
        close: bool,
    ) -> Self {
        self.options.close_when_no_docs_left = close;
        self
    }

    /// Deadline for connection handshakes and acknowledgments (default: 30 seconds)
    pub fn request_timeout(
        mut self,
        timeout: Duration,
    ) -> Self {
        self.options.request_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<SubscriptionWorkerOptions> {
        self.options.validate()?;
        Ok(self.options)
    }
}
