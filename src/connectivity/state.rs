//! Connection identity and connectivity state types.

use serde::Serialize;
use std::fmt;

/// Opaque identifier of a pooled connection.
///
/// Handles are minted by the host runtime; the pool only stores and compares
/// them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ConnectionHandle(u64);

impl ConnectionHandle {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl From<u64> for ConnectionHandle {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Connectivity state of a single pooled connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Idle,
    Connecting,
    Ready,
    TransientFailure,
    Shutdown,
}

impl ConnectionState {
    pub fn is_ready(self) -> bool {
        self == ConnectionState::Ready
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Idle => "IDLE",
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Ready => "READY",
            ConnectionState::TransientFailure => "TRANSIENT_FAILURE",
            ConnectionState::Shutdown => "SHUTDOWN",
        };
        f.write_str(s)
    }
}

/// Pool-wide connectivity summary.
///
/// `Idle` is only observed before the first transition is recorded.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateState {
    #[default]
    Idle = 0,
    Connecting = 1,
    Ready = 2,
    TransientFailure = 3,
}

impl AggregateState {
    pub fn is_transient_failure(self) -> bool {
        self == AggregateState::TransientFailure
    }
}

impl fmt::Display for AggregateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AggregateState::Idle => "IDLE",
            AggregateState::Connecting => "CONNECTING",
            AggregateState::Ready => "READY",
            AggregateState::TransientFailure => "TRANSIENT_FAILURE",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_display() {
        let handle = ConnectionHandle::from(7);
        assert_eq!(handle.as_u64(), 7);
        assert_eq!(handle.to_string(), "conn-7");
    }

    #[test]
    fn test_aggregate_default_is_idle() {
        assert_eq!(AggregateState::default(), AggregateState::Idle);
        assert!(!AggregateState::Ready.is_transient_failure());
        assert!(AggregateState::TransientFailure.is_transient_failure());
    }
}
