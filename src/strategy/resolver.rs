use super::SubscriptionOpeningStrategy;

/// Who currently holds a subscription slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotOccupancy {
    /// No active connection
    Free,
    /// One exclusive connection, opened with `strategy`
    Exclusive { strategy: SubscriptionOpeningStrategy },
    /// One or more connections opened with `Concurrent`
    Concurrent { holders: usize },
}

/// Outcome of arbitration for one connection attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Take the free slot exclusively
    Acquire,
    /// Add one more concurrent holder
    Join,
    /// Fail with a connection-in-use error
    Reject,
    /// Close every current holder with `TakenOver`, then acquire
    Evict,
    /// Queue until the slot is free
    Wait,
}

pub struct StrategyResolver;

impl StrategyResolver {
    pub fn resolve(
        strategy: SubscriptionOpeningStrategy,
        occupancy: &SlotOccupancy,
    ) -> Resolution {
        use SubscriptionOpeningStrategy::*;

        match (occupancy, strategy) {
            (SlotOccupancy::Free, Concurrent) => Resolution::Join,
            (SlotOccupancy::Free, _) => Resolution::Acquire,

            (_, WaitForFree) => Resolution::Wait,

            // A TakeOver holder cannot itself be taken over
            (SlotOccupancy::Exclusive { strategy: TakeOver }, TakeOver) => Resolution::Reject,
            (_, TakeOver) => Resolution::Evict,

            (SlotOccupancy::Concurrent { .. }, Concurrent) => Resolution::Join,
            (_, OpenIfFree) | (_, Concurrent) => Resolution::Reject,
        }
    }
}
