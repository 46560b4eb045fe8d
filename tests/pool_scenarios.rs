//! Pool manager behaviour against a recording host.

use std::sync::{Arc, Mutex, OnceLock, Weak};

use affinity_pool::config::ChannelPoolConfig;
use affinity_pool::picker::Binding;
use affinity_pool::pool::{HostError, NewConnectionOptions, ResolveError};
use affinity_pool::{
    Address, AggregateState, ConnectionHandle, ConnectionHost, ConnectionState, PickError,
    PickInfo, PoolManager, RoutingSnapshot,
};

mod common;
use common::{
    addr, bring_ready, handle, new_pool, new_recording_pool, ready_pool, HostCall, RecordingHost,
};

fn unbound() -> PickInfo<'static> {
    PickInfo {
        method: "/svc.Sessions/Execute",
        affinity_key: None,
    }
}

#[test]
fn test_first_resolution_creates_one_connection() {
    let (host, pool) = new_pool(ChannelPoolConfig::default());
    pool.on_addresses_resolved(Ok(vec![addr(1)]));

    assert_eq!(
        host.calls(),
        vec![HostCall::Create(vec![addr(1)]), HostCall::Connect(handle(1))]
    );
    assert_eq!(pool.pool_size(), 1);
    assert_eq!(pool.connection_state(handle(1)), Some(ConnectionState::Idle));
    let stats = pool.connection_stats();
    assert_eq!(stats[0].affinity_count, 0);
    assert_eq!(stats[0].stream_count, 0);
}

#[test]
fn test_ready_transition_publishes_single_ready_ref() {
    let (host, builder, pool) = new_recording_pool(ChannelPoolConfig::default());
    pool.on_addresses_resolved(Ok(vec![addr(1)]));
    host.take_calls();

    pool.on_connection_state_change(handle(1), ConnectionState::Connecting);
    assert_eq!(pool.aggregate_state(), AggregateState::Connecting);
    assert!(host.published().is_empty());
    assert_eq!(pool.pick(&unbound()).unwrap_err(), PickError::NoConnectionAvailable);

    pool.on_connection_state_change(handle(1), ConnectionState::Ready);
    assert_eq!(pool.aggregate_state(), AggregateState::Ready);
    assert_eq!(builder.builds(), vec![vec![handle(1)]]);
    assert_eq!(host.calls(), vec![HostCall::Publish(AggregateState::Ready)]);

    let published = host.published();
    let pick = published[0].pick(&unbound()).unwrap();
    assert_eq!(pick.handle(), handle(1));
}

#[test]
fn test_bind_is_reference_counted() {
    let (_host, pool) = ready_pool(1, ChannelPoolConfig::default());
    let c = handle(1);

    pool.bind_key("session1", c);
    pool.bind_key("session1", c);
    assert_eq!(pool.connection(c).unwrap().affinity_count(), 2);

    pool.unbind_key("session1");
    assert_eq!(pool.connection(c).unwrap().affinity_count(), 1);
    assert_eq!(pool.bound_handle("session1"), Some(c));

    pool.unbind_key("session1");
    assert_eq!(pool.connection(c).unwrap().affinity_count(), 0);
    assert_eq!(pool.bound_handle("session1"), None);
    assert_eq!(pool.affinity_len(), 0);
}

#[test]
fn test_one_failure_keeps_pool_ready() {
    let (host, builder, pool) = new_recording_pool(ChannelPoolConfig::default());
    pool.on_addresses_resolved(Ok(vec![addr(1)]));
    bring_ready(&pool, handle(1));
    pool.create_connection();
    bring_ready(&pool, handle(2));
    assert_eq!(builder.builds().last().unwrap(), &vec![handle(1), handle(2)]);
    host.take_calls();

    pool.on_connection_state_change(handle(1), ConnectionState::TransientFailure);
    assert_eq!(pool.aggregate_state(), AggregateState::Ready);
    assert_eq!(builder.builds().last().unwrap(), &vec![handle(2)]);
    assert_eq!(host.calls(), vec![HostCall::Publish(AggregateState::Ready)]);

    for _ in 0..3 {
        assert_eq!(pool.pick(&unbound()).unwrap().handle(), handle(2));
    }
}

#[test]
fn test_shutdown_evicts_affinity_bindings() {
    let (_host, pool) = ready_pool(2, ChannelPoolConfig::default());
    pool.bind_key("session1", handle(1));
    pool.bind_key("session2", handle(2));

    pool.on_connection_state_change(handle(1), ConnectionState::Shutdown);

    assert_eq!(pool.pool_size(), 1);
    assert_eq!(pool.connection_state(handle(1)), None);
    assert!(pool.connection(handle(1)).is_none());
    assert_eq!(pool.bound_handle("session1"), None);
    assert!(matches!(pool.bound_connection("session1"), Binding::Unbound));
    assert_eq!(pool.bound_handle("session2"), Some(handle(2)));

    // A call for the evicted session is spread across the pool again.
    let info = PickInfo {
        method: "/svc.Sessions/Execute",
        affinity_key: Some("session1"),
    };
    assert_eq!(pool.pick(&info).unwrap().handle(), handle(2));

    // Late notifications for the removed connection are ignored.
    pool.on_connection_state_change(handle(1), ConnectionState::Ready);
    assert_eq!(pool.pool_size(), 1);
}

#[test]
fn test_bound_connection_not_ready() {
    let (_host, pool) = ready_pool(2, ChannelPoolConfig::default());
    pool.bind_key("session1", handle(1));
    assert!(matches!(pool.bound_connection("session1"), Binding::Ready(c) if c.handle() == handle(1)));

    pool.on_connection_state_change(handle(1), ConnectionState::TransientFailure);
    assert!(matches!(pool.bound_connection("session1"), Binding::NotReady));
    assert!(matches!(pool.bound_connection("never-bound"), Binding::Unbound));

    let info = PickInfo {
        method: "/svc.Sessions/Execute",
        affinity_key: Some("session1"),
    };
    let err = pool.pick(&info).unwrap_err();
    assert_eq!(
        err,
        PickError::BoundConnectionNotReady {
            key: "session1".into()
        }
    );
    assert!(err.is_retryable());
}

#[test]
fn test_idle_connection_is_reconnected() {
    let (host, pool) = ready_pool(1, ChannelPoolConfig::default());
    host.take_calls();

    pool.on_connection_state_change(handle(1), ConnectionState::Idle);
    assert_eq!(
        host.calls(),
        vec![
            HostCall::Connect(handle(1)),
            HostCall::Publish(AggregateState::TransientFailure),
        ]
    );
    assert_eq!(pool.pick(&unbound()).unwrap_err(), PickError::TransientFailure);
}

#[test]
fn test_pool_transient_failure_and_recovery() {
    let (host, pool) = new_pool(ChannelPoolConfig::default());
    pool.on_addresses_resolved(Ok(vec![addr(1)]));
    pool.on_connection_state_change(handle(1), ConnectionState::Connecting);
    pool.on_connection_state_change(handle(1), ConnectionState::TransientFailure);

    assert_eq!(pool.aggregate_state(), AggregateState::TransientFailure);
    assert_eq!(pool.snapshot().state, AggregateState::TransientFailure);
    assert_eq!(pool.pick(&unbound()).unwrap_err(), PickError::TransientFailure);

    pool.on_connection_state_change(handle(1), ConnectionState::Idle);
    bring_ready(&pool, handle(1));
    assert_eq!(pool.pick(&unbound()).unwrap().handle(), handle(1));
    let states: Vec<_> = host.published().iter().map(|s| s.state).collect();
    // Leaving transient failure republishes before any connection is Ready.
    assert_eq!(
        states,
        vec![
            AggregateState::TransientFailure,
            AggregateState::Connecting,
            AggregateState::Ready,
        ]
    );
}

#[test]
fn test_new_addresses_are_pushed_to_existing_connections() {
    let (host, pool) = ready_pool(2, ChannelPoolConfig::default());
    host.take_calls();

    pool.on_addresses_resolved(Ok(vec![addr(7), addr(8)]));
    assert_eq!(
        host.calls(),
        vec![
            HostCall::UpdateAddresses(handle(1), vec![addr(7), addr(8)]),
            HostCall::Connect(handle(1)),
            HostCall::UpdateAddresses(handle(2), vec![addr(7), addr(8)]),
            HostCall::Connect(handle(2)),
        ]
    );
    assert_eq!(pool.pool_size(), 2);
}

#[test]
fn test_resolution_error_is_a_no_op() {
    let (host, pool) = ready_pool(1, ChannelPoolConfig::default());
    host.take_calls();

    pool.on_addresses_resolved(Err(ResolveError::new("resolver unavailable")));
    assert!(host.calls().is_empty());
    assert_eq!(pool.addresses(), vec![addr(1)]);
}

#[test]
fn test_empty_pool_after_shutdown_recreates_on_resolution() {
    let (host, pool) = ready_pool(1, ChannelPoolConfig::default());
    pool.on_connection_state_change(handle(1), ConnectionState::Shutdown);
    assert_eq!(pool.pool_size(), 0);
    host.take_calls();

    pool.on_addresses_resolved(Ok(vec![addr(2)]));
    assert_eq!(
        host.calls(),
        vec![HostCall::Create(vec![addr(2)]), HostCall::Connect(handle(2))]
    );
}

#[test]
fn test_creation_failure_then_retry() {
    let (host, pool) = new_pool(ChannelPoolConfig::default());
    host.set_fail_creates(true);
    pool.on_addresses_resolved(Ok(vec![addr(1)]));
    assert_eq!(pool.pool_size(), 0);
    assert_eq!(host.calls(), vec![HostCall::Create(vec![addr(1)])]);

    host.set_fail_creates(false);
    pool.on_addresses_resolved(Ok(vec![addr(1)]));
    assert_eq!(pool.pool_size(), 1);
}

#[test]
fn test_at_most_one_connection_pending() {
    let config = ChannelPoolConfig {
        max_size: 5,
        max_concurrent_streams_low_watermark: 1,
    };
    let (_host, pool) = ready_pool(1, config);

    // Saturate the only connection so every pick asks for growth.
    let held: Vec<_> = (0..4).map(|_| pool.pick(&unbound()).unwrap()).collect();
    assert_eq!(pool.pool_size(), 2);

    let connecting = |pool: &common::TestPool| {
        pool.connection_stats()
            .iter()
            .filter(|s| s.state == ConnectionState::Connecting)
            .count()
    };
    pool.on_connection_state_change(handle(2), ConnectionState::Connecting);
    for _ in 0..4 {
        let _ = pool.pick(&unbound()).unwrap();
        assert!(pool.create_connection().is_none());
        assert_eq!(connecting(&pool), 1);
    }
    assert_eq!(pool.pool_size(), 2);

    pool.on_connection_state_change(handle(2), ConnectionState::Ready);
    drop(held);
    assert_eq!(connecting(&pool), 0);
}

#[test]
fn test_pool_growth_stops_at_max_size() {
    let config = ChannelPoolConfig {
        max_size: 2,
        max_concurrent_streams_low_watermark: 1,
    };
    let (_host, pool) = ready_pool(2, config);

    let held: Vec<_> = (0..6).map(|_| pool.pick(&unbound()).unwrap()).collect();
    assert_eq!(pool.pool_size(), 2);
    let stats = pool.connection_stats();
    assert_eq!(stats[0].stream_count + stats[1].stream_count, 6);
    assert_eq!(stats[0].stream_count, 3);

    drop(held);
    assert!(pool.connection_stats().iter().all(|s| s.stream_count == 0));
}

#[test]
fn test_close_removes_connections() {
    let (host, pool) = ready_pool(2, ChannelPoolConfig::default());
    pool.bind_key("session1", handle(1));
    host.take_calls();

    pool.close();
    assert!(pool.is_closed());
    assert_eq!(pool.pool_size(), 0);
    assert_eq!(pool.affinity_len(), 0);
    assert_eq!(
        host.calls(),
        vec![
            HostCall::Remove(handle(1)),
            HostCall::Remove(handle(2)),
            HostCall::Publish(AggregateState::TransientFailure),
        ]
    );
    let err = pool.pick(&unbound()).unwrap_err();
    assert_eq!(err, PickError::Closed);
    assert!(!err.is_retryable());

    // Terminal: later events do nothing.
    host.take_calls();
    pool.on_connection_state_change(handle(1), ConnectionState::Shutdown);
    pool.on_addresses_resolved(Ok(vec![addr(3)]));
    assert!(pool.create_connection().is_none());
    pool.close();
    assert!(host.calls().is_empty());
}

/// Host whose resolver fires again while a connection is being created.
#[derive(Default)]
struct ResolvingHost {
    inner: RecordingHost,
    pool: OnceLock<Weak<PoolManager<Arc<ResolvingHost>>>>,
    resolve_during_create: Mutex<Option<Vec<Address>>>,
}

impl ConnectionHost for ResolvingHost {
    fn create_connection(
        &self,
        addresses: &[Address],
        options: NewConnectionOptions,
    ) -> Result<ConnectionHandle, HostError> {
        let pending = self.resolve_during_create.lock().unwrap().take();
        if let (Some(rotated), Some(pool)) = (pending, self.pool.get().and_then(Weak::upgrade)) {
            pool.on_addresses_resolved(Ok(rotated));
        }
        self.inner.create_connection(addresses, options)
    }

    fn connect(&self, handle: ConnectionHandle) {
        self.inner.connect(handle)
    }

    fn update_addresses(&self, handle: ConnectionHandle, addresses: &[Address]) {
        self.inner.update_addresses(handle, addresses)
    }

    fn remove_connection(&self, handle: ConnectionHandle) {
        self.inner.remove_connection(handle)
    }

    fn publish(&self, snapshot: Arc<RoutingSnapshot>) {
        self.inner.publish(snapshot)
    }
}

fn resolving_pool() -> (Arc<ResolvingHost>, Arc<PoolManager<Arc<ResolvingHost>>>) {
    let host = Arc::new(ResolvingHost::default());
    let pool = PoolManager::new(host.clone(), &ChannelPoolConfig::default());
    host.pool.set(Arc::downgrade(&pool)).ok();
    (host, pool)
}

#[test]
fn test_resolution_during_first_creation_reaches_new_connection() {
    let (host, pool) = resolving_pool();
    *host.resolve_during_create.lock().unwrap() = Some(vec![addr(2)]);

    pool.on_addresses_resolved(Ok(vec![addr(1)]));

    assert_eq!(pool.addresses(), vec![addr(2)]);
    assert_eq!(pool.pool_size(), 1);
    assert_eq!(
        host.inner.calls(),
        vec![
            HostCall::Create(vec![addr(1)]),
            HostCall::UpdateAddresses(handle(1), vec![addr(2)]),
            HostCall::Connect(handle(1)),
        ]
    );
}

#[test]
fn test_resolution_during_growth_reaches_every_connection() {
    let (host, pool) = resolving_pool();
    pool.on_addresses_resolved(Ok(vec![addr(1)]));
    pool.on_connection_state_change(handle(1), ConnectionState::Connecting);
    pool.on_connection_state_change(handle(1), ConnectionState::Ready);
    host.inner.take_calls();
    *host.resolve_during_create.lock().unwrap() = Some(vec![addr(3)]);

    assert_eq!(pool.create_connection(), Some(handle(2)));

    assert_eq!(
        host.inner.calls(),
        vec![
            HostCall::UpdateAddresses(handle(1), vec![addr(3)]),
            HostCall::Connect(handle(1)),
            HostCall::Create(vec![addr(1)]),
            HostCall::UpdateAddresses(handle(2), vec![addr(3)]),
            HostCall::Connect(handle(2)),
        ]
    );
}

#[test]
fn test_unchanged_addresses_skip_update_on_creation() {
    let (host, pool) = resolving_pool();
    *host.resolve_during_create.lock().unwrap() = Some(vec![addr(1)]);

    pool.on_addresses_resolved(Ok(vec![addr(1)]));

    assert_eq!(
        host.inner.calls(),
        vec![HostCall::Create(vec![addr(1)]), HostCall::Connect(handle(1))]
    );
}
