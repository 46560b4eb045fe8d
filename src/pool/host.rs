//! Host runtime contract.
//!
//! The pool never dials, resolves or frames anything itself. Everything that
//! touches the network goes through `ConnectionHost`, which the embedding RPC
//! runtime implements. All calls are fire-and-forget except connection
//! creation; results come back through the pool manager's event methods.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::connectivity::ConnectionHandle;
use crate::picker::RoutingSnapshot;

/// One resolved backend endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    /// Network address, e.g. "10.0.0.1:443".
    pub addr: String,
    /// Name used for authority / TLS verification, if it differs from `addr`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
}

impl Address {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            server_name: None,
        }
    }

    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.server_name {
            Some(name) => write!(f, "{} ({})", self.addr, name),
            None => f.write_str(&self.addr),
        }
    }
}

/// Options passed with every connection creation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewConnectionOptions {
    pub health_check_enabled: bool,
}

impl Default for NewConnectionOptions {
    fn default() -> Self {
        Self {
            health_check_enabled: true,
        }
    }
}

/// Errors reported by the host runtime.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HostError {
    /// The host refused to create the connection.
    #[error("connection creation rejected: {0}")]
    Rejected(String),

    /// The host is shutting down and accepts no new connections.
    #[error("host runtime is closed")]
    Closed,
}

/// Error delivered by the name resolver instead of an address set.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("address resolution failed: {message}")]
pub struct ResolveError {
    pub message: String,
}

impl ResolveError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Operations the pool requests from the host runtime.
///
/// None of these are invoked while the pool lock is held, so implementations
/// may call back into the pool manager synchronously.
pub trait ConnectionHost: Send + Sync + 'static {
    /// Create a new connection for `addresses`. The connection starts Idle.
    fn create_connection(
        &self,
        addresses: &[Address],
        options: NewConnectionOptions,
    ) -> Result<ConnectionHandle, HostError>;

    /// Ask the connection to start connecting.
    fn connect(&self, handle: ConnectionHandle);

    /// Replace the address set a connection dials.
    fn update_addresses(&self, handle: ConnectionHandle, addresses: &[Address]);

    /// Tear a connection down. The host reports Shutdown afterwards.
    fn remove_connection(&self, handle: ConnectionHandle);

    /// Install a new routing snapshot for subsequent calls.
    fn publish(&self, snapshot: Arc<RoutingSnapshot>);
}

impl<H: ConnectionHost> ConnectionHost for Arc<H> {
    fn create_connection(
        &self,
        addresses: &[Address],
        options: NewConnectionOptions,
    ) -> Result<ConnectionHandle, HostError> {
        (**self).create_connection(addresses, options)
    }

    fn connect(&self, handle: ConnectionHandle) {
        (**self).connect(handle)
    }

    fn update_addresses(&self, handle: ConnectionHandle, addresses: &[Address]) {
        (**self).update_addresses(handle, addresses)
    }

    fn remove_connection(&self, handle: ConnectionHandle) {
        (**self).remove_connection(handle)
    }

    fn publish(&self, snapshot: Arc<RoutingSnapshot>) {
        (**self).publish(snapshot)
    }
}
