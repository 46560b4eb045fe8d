//! Session-affinity connection pool for RPC clients.
//!
//! Keeps a bounded pool of multiplexed connections to one logical service,
//! folds their connectivity into a single routing state, and pins calls that
//! carry an affinity key to the connection their session was bound to.
//!
//! # Architecture Overview
//!
//! ```text
//!   resolver ──▶ ┌──────────────┐ ──create/connect──▶ host runtime
//!                │ PoolManager  │ ◀──state changes─── (ConnectionHost)
//!                │  + affinity  │
//!                │  + evaluator │ ──publish(state, picker)──▶ host
//!                └──────┬───────┘
//!                       │ ready set + weak back-reference
//!                       ▼
//!   call ──▶ CallRouter ──▶ Picker ──▶ Pick (stream guard) ──▶ bind / unbind
//! ```

pub mod config;
pub mod connectivity;
pub mod observability;
pub mod picker;
pub mod pool;
pub mod routing;

pub use config::PoolConfig;
pub use connectivity::{AggregateState, ConnectionHandle, ConnectionState};
pub use picker::{Pick, PickError, PickInfo, Picker, RoutingSnapshot};
pub use pool::{Address, ConnectionHost, PoolManager};
pub use routing::CallRouter;

/// Name under which hosts register this policy.
pub const POLICY_NAME: &str = "affinity_pool";
