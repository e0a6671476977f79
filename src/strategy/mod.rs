//! Connection arbitration between workers targeting the same subscription.
//!
//! The resolver is a pure decision table: given the strategy of the worker
//! trying to connect and what currently occupies the subscription slot, it
//! says whether to acquire, join, reject, evict the holders or queue up.
//! Servers (the embedded one included) consult it on every connection
//! attempt, reconnects included.

mod resolver;
pub use resolver::*;


use std::fmt;

use serde::Deserialize;
use serde::Serialize;

/// How a worker contends for a subscription that may already be held
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionOpeningStrategy {
    /// Fail with a connection-in-use error while another connection is active
    #[default]
    OpenIfFree,
    /// Disconnect the current holder and take the subscription over
    TakeOver,
    /// Queue until the current holder goes away; waiters are served FIFO
    WaitForFree,
    /// Share the subscription with other concurrent workers
    Concurrent,
}

impl fmt::Display for SubscriptionOpeningStrategy {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let name = match self {
            SubscriptionOpeningStrategy::OpenIfFree => "OpenIfFree",
            SubscriptionOpeningStrategy::TakeOver => "TakeOver",
            SubscriptionOpeningStrategy::WaitForFree => "WaitForFree",
            SubscriptionOpeningStrategy::Concurrent => "Concurrent",
        };
        f.write_str(name)
    }
}
