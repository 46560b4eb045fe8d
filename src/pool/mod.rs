//! Connection pool subsystem.
//!
//! # Data Flow
//! ```text
//! Resolver → on_addresses_resolved
//!     → manager.rs (replace address set, create first connection
//!       or push addresses to existing ones)
//!     → host.rs (create / connect / update addresses)
//!
//! Host → on_connection_state_change
//!     → manager.rs (record state, reconnect Idle, drop Shutdown)
//!     → connectivity evaluator (aggregate state)
//!     → picker regeneration + publish when readiness flips
//!
//! Picker / completed call
//!     → affinity.rs (bind / unbind / lookup)
//!     → conn_ref.rs (atomic affinity & stream counts)
//! ```
//!
//! # Design Decisions
//! - One mutex guards connection tracking, affinity table and addresses
//! - Counters on each connection are atomics touched without that mutex
//! - The host is never called with the mutex held
//! - Published routing snapshots are swapped atomically (arc-swap)

pub mod affinity;
pub mod conn_ref;
pub mod host;
pub mod manager;

pub use affinity::AffinityTable;
pub use conn_ref::{ConnectionRef, ConnectionStats, StreamGuard};
pub use host::{Address, ConnectionHost, HostError, NewConnectionOptions, ResolveError};
pub use manager::PoolManager;
