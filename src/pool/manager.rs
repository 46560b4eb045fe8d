//! Pool manager: connection lifecycle, aggregate state and publication.
//!
//! # Responsibilities
//! - Track every pooled connection with its last reported state
//! - Create connections on demand, at most one pending at a time
//! - Keep the affinity table consistent with pool membership
//! - Regenerate and publish the routing snapshot on readiness changes

use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::config::ChannelPoolConfig;
use crate::connectivity::{
    AggregateState, ConnectionHandle, ConnectionState, ConnectivityStateEvaluator,
};
use crate::observability::metrics;
use crate::picker::{
    Binding, ErrPicker, LeastStreamsPickerBuilder, Pick, PickError, PickInfo, Picker,
    PickerBuilder, PoolAccess, PoolLimits, RoutingSnapshot,
};
use crate::pool::affinity::{AffinityTable, BindOutcome, ConnectionLookup, UnbindOutcome};
use crate::pool::conn_ref::{ConnectionRef, ConnectionStats};
use crate::pool::host::{Address, ConnectionHost, NewConnectionOptions, ResolveError};

const HEALTH_CHECK_ENABLED: bool = true;

#[derive(Debug)]
struct TrackedConnection {
    state: ConnectionState,
    conn: Arc<ConnectionRef>,
}

impl ConnectionLookup for HashMap<ConnectionHandle, TrackedConnection> {
    fn connection(&self, handle: ConnectionHandle) -> Option<&ConnectionRef> {
        self.get(&handle).map(|t| t.conn.as_ref())
    }
}

#[derive(Debug)]
struct PoolInner {
    addresses: Vec<Address>,
    conns: HashMap<ConnectionHandle, TrackedConnection>,
    affinity: AffinityTable,
    evaluator: ConnectivityStateEvaluator,
    state: AggregateState,
    limits: PoolLimits,
    /// A create request is out at the host.
    creating: bool,
    closed: bool,
}

impl PoolInner {
    /// Idle connections always have a connect request outstanding, so they
    /// count as pending alongside Connecting ones.
    fn has_pending_connection(&self) -> bool {
        self.creating
            || self.conns.values().any(|t| {
                matches!(t.state, ConnectionState::Idle | ConnectionState::Connecting)
            })
    }
}

/// Manages a pool of connections to one logical backend service.
pub struct PoolManager<H: ConnectionHost> {
    host: H,
    picker_builder: Box<dyn PickerBuilder>,
    inner: Mutex<PoolInner>,
    snapshot: ArcSwap<RoutingSnapshot>,
    weak_self: Weak<Self>,
}

impl<H: ConnectionHost> PoolManager<H> {
    /// Create a pool manager using the least-streams picker.
    pub fn new(host: H, config: &ChannelPoolConfig) -> Arc<Self> {
        Self::with_picker_builder(host, config, LeastStreamsPickerBuilder)
    }

    pub fn with_picker_builder<B>(host: H, config: &ChannelPoolConfig, builder: B) -> Arc<Self>
    where
        B: PickerBuilder + 'static,
    {
        // Until a connection is ready every call fails with a retryable error.
        let initial = RoutingSnapshot::new(
            AggregateState::Idle,
            Arc::new(ErrPicker::new(PickError::NoConnectionAvailable)),
        );

        Arc::new_cyclic(|weak_self| Self {
            host,
            picker_builder: Box::new(builder),
            inner: Mutex::new(PoolInner {
                addresses: Vec::new(),
                conns: HashMap::new(),
                affinity: AffinityTable::new(),
                evaluator: ConnectivityStateEvaluator::new(),
                state: AggregateState::Idle,
                limits: PoolLimits::from(config),
                creating: false,
                closed: false,
            }),
            snapshot: ArcSwap::from_pointee(initial),
            weak_self: weak_self.clone(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, PoolInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    /// Handle a resolver update.
    ///
    /// Errors keep the previous address set and pool untouched.
    pub fn on_addresses_resolved(&self, result: Result<Vec<Address>, ResolveError>) {
        let addresses = match result {
            Ok(addresses) => addresses,
            Err(e) => {
                tracing::warn!(error = %e, "Address resolution failed, keeping previous addresses");
                return;
            }
        };
        tracing::info!(count = addresses.len(), addresses = ?addresses, "Got new resolved addresses");

        let mut existing: Vec<ConnectionHandle> = {
            let mut inner = self.lock();
            if inner.closed {
                tracing::debug!("Pool closed, ignoring resolved addresses");
                return;
            }
            inner.addresses = addresses.clone();
            inner.conns.keys().copied().collect()
        };

        if existing.is_empty() {
            if addresses.is_empty() {
                tracing::warn!("Resolved an empty address set, not creating a connection");
                return;
            }
            self.create_connection();
            return;
        }

        existing.sort();
        for handle in existing {
            self.host.update_addresses(handle, &addresses);
            self.host.connect(handle);
        }
    }

    /// Ask the host for a new connection.
    ///
    /// Skipped while another connection is pending, when the pool is full,
    /// and after close. Creation failures are logged; the next trigger
    /// retries. Returns the new handle if one was created.
    pub fn create_connection(&self) -> Option<ConnectionHandle> {
        let addresses = {
            let mut inner = self.lock();
            if inner.closed {
                return None;
            }
            if inner.has_pending_connection() {
                tracing::debug!("A connection is already pending, skipping creation");
                return None;
            }
            if inner.conns.len() >= inner.limits.max_size {
                tracing::debug!(
                    pool_size = inner.conns.len(),
                    max_size = inner.limits.max_size,
                    "Pool is full, skipping creation"
                );
                return None;
            }
            inner.creating = true;
            inner.addresses.clone()
        };

        let options = NewConnectionOptions {
            health_check_enabled: HEALTH_CHECK_ENABLED,
        };
        let result = self.host.create_connection(&addresses, options);

        let (handle, closed, rotated) = {
            let mut inner = self.lock();
            inner.creating = false;
            let handle = match result {
                Ok(handle) => handle,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to create connection");
                    metrics::record_connection_creation_failed();
                    return None;
                }
            };
            if !inner.closed {
                inner.conns.insert(
                    handle,
                    TrackedConnection {
                        state: ConnectionState::Idle,
                        conn: Arc::new(ConnectionRef::new(handle)),
                    },
                );
                metrics::record_pool_size(inner.conns.len());
            }
            // A resolution that landed while the host was creating skipped
            // this handle; it must still learn the newer address set.
            let rotated = (inner.addresses != addresses).then(|| inner.addresses.clone());
            (handle, inner.closed, rotated)
        };

        if closed {
            // Closed while the host was creating it.
            self.host.remove_connection(handle);
            return None;
        }

        metrics::record_connection_created();
        tracing::info!(handle = %handle, "Created connection");
        if let Some(latest) = rotated {
            tracing::info!(handle = %handle, addresses = ?latest, "Addresses changed during creation, updating");
            self.host.update_addresses(handle, &latest);
        }
        self.host.connect(handle);
        Some(handle)
    }

    /// Look up the connection bound to `key`.
    pub fn bound_connection(&self, key: &str) -> Binding {
        let inner = self.lock();
        let Some(handle) = inner.affinity.lookup(key) else {
            return Binding::Unbound;
        };
        match inner.conns.get(&handle) {
            Some(tracked) if tracked.state.is_ready() => Binding::Ready(tracked.conn.clone()),
            _ => Binding::NotReady,
        }
    }

    /// Bind `key` to `handle`, or add a reference to its existing binding.
    pub fn bind_key(&self, key: &str, handle: ConnectionHandle) {
        let (outcome, keys) = {
            let mut guard = self.lock();
            let inner = &mut *guard;
            let outcome = inner.affinity.bind(key, handle, &inner.conns);
            (outcome, inner.affinity.len())
        };
        metrics::record_affinity_keys(keys);

        match outcome {
            BindOutcome::Inserted => {
                tracing::debug!(key = %key, handle = %handle, "Bound affinity key");
            }
            BindOutcome::Referenced { bound_to, refs } if bound_to != handle => {
                tracing::warn!(
                    key = %key,
                    requested = %handle,
                    bound_to = %bound_to,
                    refs,
                    "Affinity key already bound to another connection, keeping existing binding"
                );
            }
            BindOutcome::Referenced { refs, .. } => {
                tracing::debug!(key = %key, handle = %handle, refs, "Added affinity reference");
            }
            BindOutcome::UnknownConnection => {
                tracing::info!(key = %key, handle = %handle, "Cannot bind to an untracked connection");
            }
        }
    }

    /// Release one reference of `key`'s binding.
    pub fn unbind_key(&self, key: &str) {
        let (outcome, keys) = {
            let mut guard = self.lock();
            let inner = &mut *guard;
            let outcome = inner.affinity.unbind(key, &inner.conns);
            (outcome, inner.affinity.len())
        };
        metrics::record_affinity_keys(keys);

        match outcome {
            UnbindOutcome::NotBound => tracing::debug!(key = %key, "Unbind of unknown affinity key"),
            UnbindOutcome::Released { remaining } => {
                tracing::debug!(key = %key, remaining, "Released affinity reference")
            }
            UnbindOutcome::Removed => tracing::debug!(key = %key, "Removed affinity key"),
        }
    }

    /// Build a new picker from the current pool state and swap it in.
    ///
    /// Called with the lock held so state and picker change together.
    fn regenerate_picker(&self, inner: &PoolInner) {
        let picker: Arc<dyn Picker> = if inner.closed {
            Arc::new(ErrPicker::new(PickError::Closed))
        } else if inner.state.is_transient_failure() {
            Arc::new(ErrPicker::new(PickError::TransientFailure))
        } else {
            let mut ready: Vec<Arc<ConnectionRef>> = inner
                .conns
                .values()
                .filter(|t| t.state.is_ready())
                .map(|t| t.conn.clone())
                .collect();
            ready.sort_by_key(|c| c.handle());
            tracing::debug!(ready = ready.len(), state = %inner.state, "Regenerating picker");
            let pool: Weak<dyn PoolAccess> = self.weak_self.clone();
            self.picker_builder.build(ready, pool, inner.limits)
        };
        self.snapshot
            .store(Arc::new(RoutingSnapshot::new(inner.state, picker)));
    }

    /// Hand the newest snapshot to the host. Called without the lock; a
    /// publisher that lost a race re-publishes the newer snapshot, so the
    /// host always ends on the latest one.
    fn publish_latest(&self) {
        self.host.publish(self.snapshot.load_full());
    }

    /// Handle a connectivity change reported by the host.
    pub fn on_connection_state_change(&self, handle: ConnectionHandle, new: ConnectionState) {
        let publish = {
            let mut guard = self.lock();
            let inner = &mut *guard;
            if inner.closed {
                tracing::debug!(handle = %handle, state = %new, "Pool closed, ignoring state change");
                return;
            }
            let Some(tracked) = inner.conns.get_mut(&handle) else {
                tracing::info!(
                    handle = %handle,
                    state = %new,
                    "Got state change for an unknown connection, ignoring"
                );
                return;
            };
            let old = tracked.state;
            tracked.state = new;
            metrics::record_state_change(new);

            if new == ConnectionState::Shutdown {
                if let Some(removed) = inner.conns.remove(&handle) {
                    removed.conn.clear_affinity();
                }
                let evicted = inner.affinity.evict_connection(handle);
                if evicted > 0 {
                    tracing::info!(handle = %handle, evicted, "Evicted affinity keys of shut down connection");
                }
                metrics::record_pool_size(inner.conns.len());
                metrics::record_affinity_keys(inner.affinity.len());
            }

            let old_aggregate = inner.state;
            inner.state = inner.evaluator.record_transition(old, new);
            metrics::record_aggregate_state(inner.state);
            tracing::debug!(
                handle = %handle,
                from = %old,
                to = %new,
                aggregate = %inner.state,
                "Connection state changed"
            );

            let publish = old.is_ready() != new.is_ready()
                || old_aggregate.is_transient_failure() != inner.state.is_transient_failure();
            if publish {
                self.regenerate_picker(inner);
            }
            publish
        };

        // The pool never rests in Idle.
        if new == ConnectionState::Idle {
            self.host.connect(handle);
        }
        if publish {
            self.publish_latest();
        }
    }

    /// Apply new pool limits and republish the picker with them.
    pub fn update_pool_config(&self, config: &ChannelPoolConfig) {
        {
            let mut inner = self.lock();
            if inner.closed {
                return;
            }
            inner.limits = PoolLimits::from(config);
            tracing::info!(
                max_size = inner.limits.max_size,
                max_streams = inner.limits.max_streams,
                "Pool limits updated"
            );
            if !inner.state.is_transient_failure() {
                self.regenerate_picker(&inner);
            }
        }
        self.publish_latest();
    }

    /// Close the pool: drop all tracking, remove every connection at the
    /// host, and fail subsequent picks with `PickError::Closed`.
    pub fn close(&self) {
        let handles: Vec<ConnectionHandle> = {
            let mut inner = self.lock();
            if inner.closed {
                return;
            }
            inner.closed = true;
            inner.affinity.clear();
            let mut handles: Vec<_> = inner
                .conns
                .drain()
                .map(|(handle, tracked)| {
                    tracked.conn.clear_affinity();
                    handle
                })
                .collect();
            handles.sort();
            inner.evaluator = ConnectivityStateEvaluator::new();
            inner.state = AggregateState::TransientFailure;
            self.regenerate_picker(&inner);
            metrics::record_pool_size(0);
            metrics::record_affinity_keys(0);
            handles
        };

        tracing::info!(connections = handles.len(), "Closing connection pool");
        for handle in handles {
            self.host.remove_connection(handle);
        }
        self.publish_latest();
    }

    /// Currently published routing snapshot.
    pub fn snapshot(&self) -> Arc<RoutingSnapshot> {
        self.snapshot.load_full()
    }

    /// Pick through the currently published picker.
    pub fn pick(&self, info: &PickInfo<'_>) -> Result<Pick, PickError> {
        self.snapshot.load().pick(info)
    }

    pub fn aggregate_state(&self) -> AggregateState {
        self.lock().state
    }

    pub fn pool_size(&self) -> usize {
        self.lock().conns.len()
    }

    pub fn addresses(&self) -> Vec<Address> {
        self.lock().addresses.clone()
    }

    pub fn connection_state(&self, handle: ConnectionHandle) -> Option<ConnectionState> {
        self.lock().conns.get(&handle).map(|t| t.state)
    }

    pub fn connection(&self, handle: ConnectionHandle) -> Option<Arc<ConnectionRef>> {
        self.lock().conns.get(&handle).map(|t| t.conn.clone())
    }

    /// Handle currently bound to `key`, whatever its state.
    pub fn bound_handle(&self, key: &str) -> Option<ConnectionHandle> {
        self.lock().affinity.lookup(key)
    }

    pub fn affinity_len(&self) -> usize {
        self.lock().affinity.len()
    }

    pub fn limits(&self) -> PoolLimits {
        self.lock().limits
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Per-connection counters, ordered by handle.
    pub fn connection_stats(&self) -> Vec<ConnectionStats> {
        let inner = self.lock();
        let mut stats: Vec<ConnectionStats> = inner
            .conns
            .iter()
            .map(|(handle, t)| ConnectionStats {
                handle: handle.as_u64(),
                state: t.state,
                affinity_count: t.conn.affinity_count(),
                stream_count: t.conn.stream_count(),
            })
            .collect();
        stats.sort_by_key(|s| s.handle);
        stats
    }
}

impl<H: ConnectionHost> PoolAccess for PoolManager<H> {
    fn bound_connection(&self, key: &str) -> Binding {
        PoolManager::bound_connection(self, key)
    }

    fn bind_key(&self, key: &str, handle: ConnectionHandle) {
        PoolManager::bind_key(self, key, handle)
    }

    fn unbind_key(&self, key: &str) {
        PoolManager::unbind_key(self, key)
    }

    fn pool_size(&self) -> usize {
        PoolManager::pool_size(self)
    }

    fn request_connection(&self) {
        self.create_connection();
    }
}
