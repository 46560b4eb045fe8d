//! Per-connection reference counting.
//!
//! # Responsibilities
//! - Identify one pooled connection by its handle
//! - Count affinity keys bound to the connection
//! - Count streams currently open on the connection
//!
//! Both counters are atomics so the per-call path never takes the pool lock.

use serde::Serialize;
use std::ops::Deref;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::connectivity::ConnectionHandle;

/// Reference-count record for a single pooled connection.
#[derive(Debug)]
pub struct ConnectionRef {
    handle: ConnectionHandle,
    /// Number of affinity bindings pointing at this connection.
    affinity_count: AtomicU32,
    /// Number of streams currently open on this connection.
    stream_count: AtomicU32,
}

/// Point-in-time counters of a connection, for reporting.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ConnectionStats {
    pub handle: u64,
    pub state: crate::connectivity::ConnectionState,
    pub affinity_count: u32,
    pub stream_count: u32,
}

impl ConnectionRef {
    pub fn new(handle: ConnectionHandle) -> Self {
        Self {
            handle,
            affinity_count: AtomicU32::new(0),
            stream_count: AtomicU32::new(0),
        }
    }

    pub fn handle(&self) -> ConnectionHandle {
        self.handle
    }

    pub fn affinity_count(&self) -> u32 {
        self.affinity_count.load(Ordering::Acquire)
    }

    pub fn stream_count(&self) -> u32 {
        self.stream_count.load(Ordering::Acquire)
    }

    pub fn affinity_incr(&self) {
        self.affinity_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Decrement the affinity count, saturating at zero. Returns the new value.
    pub fn affinity_decr(&self) -> u32 {
        saturating_decr(&self.affinity_count)
    }

    /// Drop every affinity reference at once (connection left the pool).
    pub fn clear_affinity(&self) {
        self.affinity_count.store(0, Ordering::Release);
    }

    pub fn streams_incr(&self) {
        self.stream_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Decrement the stream count, saturating at zero. Returns the new value.
    pub fn streams_decr(&self) -> u32 {
        saturating_decr(&self.stream_count)
    }
}

fn saturating_decr(counter: &AtomicU32) -> u32 {
    let mut prev = counter.load(Ordering::Acquire);
    loop {
        if prev == 0 {
            return 0;
        }
        match counter.compare_exchange_weak(prev, prev - 1, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => return prev - 1,
            Err(actual) => prev = actual,
        }
    }
}

/// A RAII guard for one open stream on a connection.
///
/// Created by a picker when it hands out a connection; the stream count is
/// released when the guard is dropped.
#[derive(Debug)]
pub struct StreamGuard {
    conn: Arc<ConnectionRef>,
}

impl StreamGuard {
    pub fn open(conn: Arc<ConnectionRef>) -> Self {
        conn.streams_incr();
        Self { conn }
    }

    pub fn connection(&self) -> &Arc<ConnectionRef> {
        &self.conn
    }
}

impl Deref for StreamGuard {
    type Target = ConnectionRef;
    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.conn.streams_decr();
    }
}
