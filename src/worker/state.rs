use std::fmt;

/// Lifecycle of a subscription worker
///
/// ```text
/// Idle -> Connecting -> Streaming -> Processing -> Acknowledging -> Streaming ...
///                                                        any -> Closed | Faulted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerState {
    /// Constructed, `run` not called yet
    Idle,
    /// Handshake in flight, or waiting to reconnect
    Connecting,
    /// Connected, waiting for the next frame
    Streaming,
    /// The batch processor is running
    Processing,
    /// Waiting for the server to confirm an acknowledgment
    Acknowledging,
    /// Finished cleanly: closed by the caller, by an administrator or by a takeover
    Closed,
    /// Finished on an unrecoverable error
    Faulted,
}

impl WorkerState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkerState::Closed | WorkerState::Faulted)
    }
}

impl fmt::Display for WorkerState {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
