//! Per-call connection selection.
//!
//! # Data Flow
//! ```text
//! Pool manager state change
//!     → regenerate: ready set + limits + weak pool back-reference
//!     → PickerBuilder::build → Arc<dyn Picker>
//!     → RoutingSnapshot { state, picker } swapped in atomically
//!
//! Outgoing call
//!     → Picker::pick(PickInfo { method, affinity_key })
//!         - bound key on a Ready connection → that connection
//!         - bound key on a non-Ready connection → BoundConnectionNotReady
//!         - otherwise least-loaded ready connection
//!     → Pick (stream guard) → bind / unbind through the back-reference
//! ```
//!
//! # Design Decisions
//! - Pickers are immutable snapshots; a new one is built on every relevant
//!   state change
//! - Pickers never own pool membership: the back-reference is weak and the
//!   ready set is only used for counter access
//! - Every pick failure is typed and, except `Closed`, retryable

pub mod err_picker;
pub mod least_streams;

pub use err_picker::ErrPicker;
pub use least_streams::{LeastStreamsPicker, LeastStreamsPickerBuilder};

use std::fmt;
use std::sync::{Arc, Weak};
use thiserror::Error;

use crate::config::ChannelPoolConfig;
use crate::connectivity::{AggregateState, ConnectionHandle};
use crate::pool::conn_ref::{ConnectionRef, StreamGuard};

/// Reasons a pick can fail.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PickError {
    /// No connection is ready yet.
    #[error("no connection available")]
    NoConnectionAvailable,

    /// The whole pool is in transient failure.
    #[error("all connections are in transient failure")]
    TransientFailure,

    /// The key is bound, but its connection is not Ready.
    #[error("connection bound to affinity key {key:?} is not ready")]
    BoundConnectionNotReady { key: String },

    /// The pool was closed.
    #[error("connection pool is closed")]
    Closed,
}

impl PickError {
    /// Whether the caller may retry the call later.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, PickError::Closed)
    }

    /// Metric label for this failure.
    pub fn label(&self) -> &'static str {
        match self {
            PickError::NoConnectionAvailable => "no_connection",
            PickError::TransientFailure => "transient_failure",
            PickError::BoundConnectionNotReady { .. } => "bound_not_ready",
            PickError::Closed => "closed",
        }
    }
}

/// Per-call input to a picker.
#[derive(Debug, Clone, Copy, Default)]
pub struct PickInfo<'a> {
    /// Fully-qualified method name.
    pub method: &'a str,
    /// Affinity key of a call that must reuse its bound connection.
    pub affinity_key: Option<&'a str>,
}

/// What the pool knows about an affinity key.
#[derive(Debug, Clone)]
pub enum Binding {
    /// The key was never bound (or its binding was released).
    Unbound,
    /// The key is bound but its connection is not Ready.
    NotReady,
    /// The key is bound to a Ready connection.
    Ready(Arc<ConnectionRef>),
}

/// Pool operations available to pickers and completed calls.
pub trait PoolAccess: Send + Sync {
    fn bound_connection(&self, key: &str) -> Binding;

    fn bind_key(&self, key: &str, handle: ConnectionHandle);

    fn unbind_key(&self, key: &str);

    fn pool_size(&self) -> usize;

    /// Request one more connection; subject to the pool's creation guard.
    fn request_connection(&self);
}

/// Pool size and per-connection stream limits handed to pickers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolLimits {
    pub max_size: usize,
    pub max_streams: u32,
}

impl From<&ChannelPoolConfig> for PoolLimits {
    fn from(cfg: &ChannelPoolConfig) -> Self {
        Self {
            max_size: cfg.max_size as usize,
            max_streams: cfg.max_concurrent_streams_low_watermark,
        }
    }
}

impl Default for PoolLimits {
    fn default() -> Self {
        Self::from(&ChannelPoolConfig::default())
    }
}

/// A connection handed out for one call.
///
/// Holds the stream open until dropped.
pub struct Pick {
    guard: StreamGuard,
    pool: Weak<dyn PoolAccess>,
}

impl Pick {
    pub fn new(conn: Arc<ConnectionRef>, pool: Weak<dyn PoolAccess>) -> Self {
        Self {
            guard: StreamGuard::open(conn),
            pool,
        }
    }

    pub fn handle(&self) -> ConnectionHandle {
        self.guard.handle()
    }

    pub fn connection(&self) -> &Arc<ConnectionRef> {
        self.guard.connection()
    }

    /// Bind `key` to the picked connection. Returns false if the pool is gone.
    pub fn bind(&self, key: &str) -> bool {
        match self.pool.upgrade() {
            Some(pool) => {
                pool.bind_key(key, self.handle());
                true
            }
            None => false,
        }
    }

    /// Release one binding of `key`. Returns false if the pool is gone.
    pub fn unbind(&self, key: &str) -> bool {
        match self.pool.upgrade() {
            Some(pool) => {
                pool.unbind_key(key);
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for Pick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pick")
            .field("handle", &self.handle())
            .field("streams", &self.guard.stream_count())
            .finish()
    }
}

/// Chooses a connection for each outgoing call.
pub trait Picker: Send + Sync {
    fn pick(&self, info: &PickInfo<'_>) -> Result<Pick, PickError>;
}

/// Builds a picker from a snapshot of the pool's Ready connections.
pub trait PickerBuilder: Send + Sync {
    fn build(
        &self,
        ready: Vec<Arc<ConnectionRef>>,
        pool: Weak<dyn PoolAccess>,
        limits: PoolLimits,
    ) -> Arc<dyn Picker>;
}

/// Aggregate state and picker published together to the host.
#[derive(Clone)]
pub struct RoutingSnapshot {
    pub state: AggregateState,
    pub picker: Arc<dyn Picker>,
}

impl RoutingSnapshot {
    pub fn new(state: AggregateState, picker: Arc<dyn Picker>) -> Self {
        Self { state, picker }
    }

    pub fn pick(&self, info: &PickInfo<'_>) -> Result<Pick, PickError> {
        self.picker.pick(info)
    }
}

impl fmt::Debug for RoutingSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutingSnapshot")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
