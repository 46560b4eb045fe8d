//! Shared utilities for integration tests.
#![allow(dead_code)]

use affinity_pool::config::ChannelPoolConfig;
use affinity_pool::picker::{LeastStreamsPickerBuilder, Picker, PickerBuilder, PoolAccess, PoolLimits};
use affinity_pool::pool::{ConnectionRef, HostError, NewConnectionOptions};
use affinity_pool::{
    Address, AggregateState, ConnectionHandle, ConnectionHost, ConnectionState, PoolManager,
    RoutingSnapshot,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// Outbound request observed by the recording host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCall {
    Create(Vec<Address>),
    Connect(ConnectionHandle),
    UpdateAddresses(ConnectionHandle, Vec<Address>),
    Remove(ConnectionHandle),
    Publish(AggregateState),
}

/// Host that records every request and hands out sequential handles.
#[derive(Default)]
pub struct RecordingHost {
    next_id: AtomicU64,
    fail_creates: AtomicBool,
    calls: Mutex<Vec<HostCall>>,
    published: Mutex<Vec<Arc<RoutingSnapshot>>>,
}

impl RecordingHost {
    pub fn calls(&self) -> Vec<HostCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn take_calls(&self) -> Vec<HostCall> {
        std::mem::take(&mut *self.calls.lock().unwrap())
    }

    pub fn published(&self) -> Vec<Arc<RoutingSnapshot>> {
        self.published.lock().unwrap().clone()
    }

    pub fn set_fail_creates(&self, fail: bool) {
        self.fail_creates.store(fail, Ordering::SeqCst);
    }

    fn record(&self, call: HostCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl ConnectionHost for RecordingHost {
    fn create_connection(
        &self,
        addresses: &[Address],
        options: NewConnectionOptions,
    ) -> Result<ConnectionHandle, HostError> {
        assert!(options.health_check_enabled);
        self.record(HostCall::Create(addresses.to_vec()));
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(HostError::Rejected("injected failure".into()));
        }
        Ok(ConnectionHandle::new(self.next_id.fetch_add(1, Ordering::SeqCst) + 1))
    }

    fn connect(&self, handle: ConnectionHandle) {
        self.record(HostCall::Connect(handle));
    }

    fn update_addresses(&self, handle: ConnectionHandle, addresses: &[Address]) {
        self.record(HostCall::UpdateAddresses(handle, addresses.to_vec()));
    }

    fn remove_connection(&self, handle: ConnectionHandle) {
        self.record(HostCall::Remove(handle));
    }

    fn publish(&self, snapshot: Arc<RoutingSnapshot>) {
        self.record(HostCall::Publish(snapshot.state));
        self.published.lock().unwrap().push(snapshot);
    }
}

/// Picker builder that remembers the ready set of every build.
#[derive(Default, Clone)]
pub struct RecordingPickerBuilder {
    pub builds: Arc<Mutex<Vec<Vec<ConnectionHandle>>>>,
}

impl RecordingPickerBuilder {
    pub fn builds(&self) -> Vec<Vec<ConnectionHandle>> {
        self.builds.lock().unwrap().clone()
    }
}

impl PickerBuilder for RecordingPickerBuilder {
    fn build(
        &self,
        ready: Vec<Arc<ConnectionRef>>,
        pool: Weak<dyn PoolAccess>,
        limits: PoolLimits,
    ) -> Arc<dyn Picker> {
        self.builds
            .lock()
            .unwrap()
            .push(ready.iter().map(|c| c.handle()).collect());
        LeastStreamsPickerBuilder.build(ready, pool, limits)
    }
}

pub type TestPool = PoolManager<Arc<RecordingHost>>;

pub fn addr(n: u8) -> Address {
    Address::new(format!("10.0.0.{n}:443"))
}

pub fn handle(id: u64) -> ConnectionHandle {
    ConnectionHandle::new(id)
}

pub fn new_pool(config: ChannelPoolConfig) -> (Arc<RecordingHost>, Arc<TestPool>) {
    let host = Arc::new(RecordingHost::default());
    let pool = PoolManager::new(host.clone(), &config);
    (host, pool)
}

pub fn new_recording_pool(
    config: ChannelPoolConfig,
) -> (Arc<RecordingHost>, RecordingPickerBuilder, Arc<TestPool>) {
    let host = Arc::new(RecordingHost::default());
    let builder = RecordingPickerBuilder::default();
    let pool = PoolManager::with_picker_builder(host.clone(), &config, builder.clone());
    (host, builder, pool)
}

pub fn bring_ready(pool: &TestPool, h: ConnectionHandle) {
    pool.on_connection_state_change(h, ConnectionState::Connecting);
    pool.on_connection_state_change(h, ConnectionState::Ready);
}

/// Resolve one address and create `n` Ready connections (handles 1..=n).
pub fn ready_pool(n: u64, config: ChannelPoolConfig) -> (Arc<RecordingHost>, Arc<TestPool>) {
    let (host, pool) = new_pool(config);
    pool.on_addresses_resolved(Ok(vec![addr(1)]));
    bring_ready(&pool, handle(1));
    for id in 2..=n {
        assert_eq!(pool.create_connection(), Some(handle(id)));
        bring_ready(&pool, handle(id));
    }
    (host, pool)
}
