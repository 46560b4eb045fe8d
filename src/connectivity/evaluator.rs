//! Connectivity state aggregation.
//!
//! Turns the stream of per-connection transitions into a single pool-wide
//! state. Only Ready, Connecting and TransientFailure are counted; Idle and
//! Shutdown are driven by the host and do not contribute.

use crate::connectivity::state::{AggregateState, ConnectionState};

/// Counter-based evaluator of the aggregate pool state.
///
/// Must be fed every observed transition exactly once, serialized by the
/// caller (the pool manager holds it under its lock).
#[derive(Debug, Default, Clone)]
pub struct ConnectivityStateEvaluator {
    num_ready: u64,
    num_connecting: u64,
    num_transient_failure: u64,
}

impl ConnectivityStateEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one connection moving from `old` to `new` and return the
    /// resulting aggregate state.
    pub fn record_transition(
        &mut self,
        old: ConnectionState,
        new: ConnectionState,
    ) -> AggregateState {
        if let Some(counter) = self.counter_mut(old) {
            *counter = counter.saturating_sub(1);
        }
        if let Some(counter) = self.counter_mut(new) {
            *counter += 1;
        }
        self.evaluate()
    }

    /// Current aggregate state without recording anything.
    pub fn evaluate(&self) -> AggregateState {
        if self.num_ready > 0 {
            AggregateState::Ready
        } else if self.num_connecting > 0 {
            AggregateState::Connecting
        } else {
            AggregateState::TransientFailure
        }
    }

    pub fn ready_count(&self) -> u64 {
        self.num_ready
    }

    pub fn connecting_count(&self) -> u64 {
        self.num_connecting
    }

    pub fn transient_failure_count(&self) -> u64 {
        self.num_transient_failure
    }

    fn counter_mut(&mut self, state: ConnectionState) -> Option<&mut u64> {
        match state {
            ConnectionState::Ready => Some(&mut self.num_ready),
            ConnectionState::Connecting => Some(&mut self.num_connecting),
            ConnectionState::TransientFailure => Some(&mut self.num_transient_failure),
            ConnectionState::Idle | ConnectionState::Shutdown => None,
        }
    }
}
