//! Affinity table: sticky key → connection bindings.
//!
//! # Responsibilities
//! - Map affinity keys to the connection handle they are bound to
//! - Keep a per-key binding count; the target's affinity count is the sum of
//!   the counts of all keys bound to it
//! - Drop keys whose count reaches zero, or whose connection left the pool
//!
//! The table stores handles only. Counters live on the `ConnectionRef`s owned
//! by the pool manager, reached through `ConnectionLookup`.

use std::collections::HashMap;
use std::sync::Arc;

use crate::connectivity::ConnectionHandle;
use crate::pool::conn_ref::ConnectionRef;

/// Resolves a handle to the connection record that carries its counters.
pub trait ConnectionLookup {
    fn connection(&self, handle: ConnectionHandle) -> Option<&ConnectionRef>;
}

impl ConnectionLookup for HashMap<ConnectionHandle, Arc<ConnectionRef>> {
    fn connection(&self, handle: ConnectionHandle) -> Option<&ConnectionRef> {
        self.get(&handle).map(|c| c.as_ref())
    }
}

#[derive(Debug, Clone, Copy)]
struct Binding {
    handle: ConnectionHandle,
    refs: u32,
}

/// Result of a bind request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindOutcome {
    /// The key was new and is now bound to the requested connection.
    Inserted,
    /// The key was already bound; one more reference was added to its
    /// existing target, which may differ from the requested one.
    Referenced { bound_to: ConnectionHandle, refs: u32 },
    /// The requested connection is not tracked; nothing changed.
    UnknownConnection,
}

/// Result of an unbind request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnbindOutcome {
    NotBound,
    Released { remaining: u32 },
    Removed,
}

/// Key → connection binding table. Not synchronized; lives under the pool lock.
#[derive(Debug, Default)]
pub struct AffinityTable {
    entries: HashMap<String, Binding>,
}

impl AffinityTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind<L: ConnectionLookup>(
        &mut self,
        key: &str,
        handle: ConnectionHandle,
        conns: &L,
    ) -> BindOutcome {
        if let Some(bound_to) = self.lookup(key) {
            if let Some(conn) = conns.connection(bound_to) {
                conn.affinity_incr();
                let refs = self.entries.get_mut(key).map_or(0, |b| {
                    b.refs += 1;
                    b.refs
                });
                return BindOutcome::Referenced { bound_to, refs };
            }
            // Entries always point at tracked connections; repair if not.
            self.entries.remove(key);
        }

        let Some(conn) = conns.connection(handle) else {
            return BindOutcome::UnknownConnection;
        };
        conn.affinity_incr();
        self.entries.insert(key.to_string(), Binding { handle, refs: 1 });
        BindOutcome::Inserted
    }

    /// Release one reference of `key`. The key is removed when its own count
    /// reaches zero, whatever other keys still hold on the same connection.
    pub fn unbind<L: ConnectionLookup>(&mut self, key: &str, conns: &L) -> UnbindOutcome {
        let Some(binding) = self.entries.get_mut(key) else {
            return UnbindOutcome::NotBound;
        };
        if let Some(conn) = conns.connection(binding.handle) {
            conn.affinity_decr();
        }
        binding.refs = binding.refs.saturating_sub(1);
        if binding.refs == 0 {
            self.entries.remove(key);
            UnbindOutcome::Removed
        } else {
            UnbindOutcome::Released {
                remaining: binding.refs,
            }
        }
    }

    /// Handle bound to `key`, regardless of that connection's state.
    pub fn lookup(&self, key: &str) -> Option<ConnectionHandle> {
        self.entries.get(key).map(|b| b.handle)
    }

    /// Remove every key bound to `handle`. Returns the number of keys removed.
    pub fn evict_connection(&mut self, handle: ConnectionHandle) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, b| b.handle != handle);
        before - self.entries.len()
    }

    pub fn keys_for(&self, handle: ConnectionHandle) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, b)| b.handle == handle)
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
