use std::time::Duration;

use tokio::time::Instant;

/// What to do after a recoverable failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep this long, then reconnect
    Retry(Duration),
    /// Downtime budget exhausted
    Escalate,
}

/// Erroneous-period bookkeeping of one worker
///
/// The downtime clock starts at the first failure after the last
/// successful batch delivery and only stops on the next one; a successful
/// reconnect alone does not reset it.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    max_erroneous_period: Duration,
    retry_wait: Duration,
    failing_since: Option<Instant>,
}

impl ReconnectPolicy {
    pub fn new(
        max_erroneous_period: Duration,
        retry_wait: Duration,
    ) -> Self {
        Self {
            max_erroneous_period,
            retry_wait,
            failing_since: None,
        }
    }

    /// Record a failure observed at `now`
    pub fn on_failure(
        &mut self,
        now: Instant,
    ) -> RetryDecision {
        let since = *self.failing_since.get_or_insert(now);
        if now.saturating_duration_since(since) >= self.max_erroneous_period {
            RetryDecision::Escalate
        } else {
            RetryDecision::Retry(self.retry_wait)
        }
    }

    /// A batch was processed and its acknowledgment confirmed
    pub fn on_batch_delivered(&mut self) {
        self.failing_since = None;
    }

    pub fn failing_since(&self) -> Option<Instant> {
        self.failing_since
    }

    /// Continuous downtime as of `now`
    pub fn downtime(
        &self,
        now: Instant,
    ) -> Duration {
        self.failing_since
            .map(|since| now.saturating_duration_since(since))
            .unwrap_or_default()
    }

    pub fn max_erroneous_period(&self) -> Duration {
        self.max_erroneous_period
    }
}
