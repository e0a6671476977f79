//! Subscription worker: connection lifecycle, batch processing and
//! acknowledgment, reconnect policy and per-worker observers.

mod listeners;
mod processor;
mod reconnect;
mod state;
#[allow(clippy::module_inception)]
mod worker;

pub use listeners::AckInfo;
pub(crate) use listeners::WorkerListeners;
pub(crate) use processor::process_batch;
pub use processor::BatchProcessor;
pub use reconnect::*;
pub use state::*;
pub use worker::*;
