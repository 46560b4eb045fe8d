//! Connectivity tracking subsystem.
//!
//! # Data Flow
//! ```text
//! Host reports per-connection transition (old → new)
//!     → state.rs (ConnectionState / AggregateState types)
//!     → evaluator.rs (counter update, aggregate re-evaluation)
//!     → pool manager decides whether to republish the picker
//! ```
//!
//! # Design Decisions
//! - Aggregate state is derived from counters, never set directly
//! - Idle and Shutdown are transparent to aggregation
//! - The evaluator is not thread-safe; it lives under the pool lock

pub mod evaluator;
pub mod state;

pub use evaluator::ConnectivityStateEvaluator;
pub use state::{AggregateState, ConnectionHandle, ConnectionState};
