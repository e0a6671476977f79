//! Subscription data model
//!
//! - [`ChangeVector`] - revision token used as the checkpoint unit
//! - [`SubscriptionCreationOptions`] / [`SubscriptionUpdateOptions`] - definitions
//! - [`SubscriptionState`] - read-only server snapshot
//! - [`SubscriptionWorkerOptions`] - per-worker settings
//! - [`SubscriptionBatch`] - decoded batch handed to the batch processor

mod batch;
mod change_vector;
mod definition;
mod options;
mod state;

pub use batch::*;
pub use change_vector::*;
pub use definition::*;
pub use options::*;
pub use state::*;
