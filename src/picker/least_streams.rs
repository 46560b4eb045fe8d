//! Least-streams picker with affinity support.
//!
//! Bound calls go to their bound connection when it is Ready. Everything else
//! goes to the Ready connection with the fewest open streams; in case of a
//! tie the first one (lowest handle) is selected. When even the least loaded
//! connection has reached the stream watermark, the pool is asked to grow
//! (bounded by `max_size`) and the call is still served.

use std::sync::{Arc, Weak};

use crate::observability::metrics;
use crate::picker::{
    Binding, Pick, PickError, PickInfo, Picker, PickerBuilder, PoolAccess, PoolLimits,
};
use crate::pool::conn_ref::ConnectionRef;

pub struct LeastStreamsPicker {
    ready: Vec<Arc<ConnectionRef>>,
    pool: Weak<dyn PoolAccess>,
    limits: PoolLimits,
}

impl LeastStreamsPicker {
    pub fn new(ready: Vec<Arc<ConnectionRef>>, pool: Weak<dyn PoolAccess>, limits: PoolLimits) -> Self {
        Self { ready, pool, limits }
    }

    fn least_loaded(&self) -> Option<&Arc<ConnectionRef>> {
        self.ready.iter().min_by_key(|c| c.stream_count())
    }

    fn grow_if_saturated(&self, least: &ConnectionRef) {
        if least.stream_count() < self.limits.max_streams {
            return;
        }
        let Some(pool) = self.pool.upgrade() else {
            return;
        };
        let size = pool.pool_size();
        if size < self.limits.max_size {
            tracing::debug!(
                handle = %least.handle(),
                streams = least.stream_count(),
                pool_size = size,
                "All ready connections saturated, requesting another"
            );
            pool.request_connection();
        }
    }
}

impl Picker for LeastStreamsPicker {
    fn pick(&self, info: &PickInfo<'_>) -> Result<Pick, PickError> {
        if let (Some(key), Some(pool)) = (info.affinity_key, self.pool.upgrade()) {
            match pool.bound_connection(key) {
                Binding::Ready(conn) => {
                    tracing::debug!(key = %key, handle = %conn.handle(), "Affinity hit");
                    metrics::record_pick("bound");
                    return Ok(Pick::new(conn, self.pool.clone()));
                }
                Binding::NotReady => {
                    let err = PickError::BoundConnectionNotReady {
                        key: key.to_string(),
                    };
                    metrics::record_pick(err.label());
                    return Err(err);
                }
                Binding::Unbound => {}
            }
        }

        let Some(least) = self.least_loaded() else {
            metrics::record_pick(PickError::NoConnectionAvailable.label());
            return Err(PickError::NoConnectionAvailable);
        };
        self.grow_if_saturated(least);

        tracing::debug!(
            method = %info.method,
            handle = %least.handle(),
            streams = least.stream_count(),
            "Connection selected"
        );
        metrics::record_pick("least_streams");
        Ok(Pick::new(least.clone(), self.pool.clone()))
    }
}

/// Builds `LeastStreamsPicker`s; the pool manager's default.
#[derive(Debug, Default, Clone, Copy)]
pub struct LeastStreamsPickerBuilder;

impl PickerBuilder for LeastStreamsPickerBuilder {
    fn build(
        &self,
        ready: Vec<Arc<ConnectionRef>>,
        pool: Weak<dyn PoolAccess>,
        limits: PoolLimits,
    ) -> Arc<dyn Picker> {
        Arc::new(LeastStreamsPicker::new(ready, pool, limits))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::ConnectionHandle;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakePool {
        bindings: Mutex<HashMap<String, Option<Arc<ConnectionRef>>>>,
        size: AtomicUsize,
        growth_requests: AtomicUsize,
    }

    impl PoolAccess for FakePool {
        fn bound_connection(&self, key: &str) -> Binding {
            match self.bindings.lock().unwrap().get(key) {
                None => Binding::Unbound,
                Some(None) => Binding::NotReady,
                Some(Some(conn)) => Binding::Ready(conn.clone()),
            }
        }
        fn bind_key(&self, _key: &str, _handle: ConnectionHandle) {}
        fn unbind_key(&self, _key: &str) {}
        fn pool_size(&self) -> usize {
            self.size.load(Ordering::SeqCst)
        }
        fn request_connection(&self) {
            self.growth_requests.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn conn(id: u64) -> Arc<ConnectionRef> {
        Arc::new(ConnectionRef::new(ConnectionHandle::new(id)))
    }

    fn picker(
        ready: Vec<Arc<ConnectionRef>>,
        pool: &Arc<FakePool>,
        max_size: usize,
        max_streams: u32,
    ) -> LeastStreamsPicker {
        let weak: Weak<dyn PoolAccess> = Arc::downgrade(pool) as Weak<dyn PoolAccess>;
        LeastStreamsPicker::new(ready, weak, PoolLimits { max_size, max_streams })
    }

    fn unbound(method: &str) -> PickInfo<'_> {
        PickInfo {
            method,
            affinity_key: None,
        }
    }

    #[test]
    fn test_picks_least_streams() {
        let pool = Arc::new(FakePool::default());
        let (c1, c2) = (conn(1), conn(2));
        let p = picker(vec![c1.clone(), c2.clone()], &pool, 10, 100);

        let first = p.pick(&unbound("/svc/A")).unwrap();
        assert_eq!(first.handle(), c1.handle());
        let second = p.pick(&unbound("/svc/A")).unwrap();
        assert_eq!(second.handle(), c2.handle());

        drop(first);
        let third = p.pick(&unbound("/svc/A")).unwrap();
        assert_eq!(third.handle(), c1.handle());
    }

    #[test]
    fn test_empty_ready_set() {
        let pool = Arc::new(FakePool::default());
        let p = picker(vec![], &pool, 10, 100);
        assert_eq!(
            p.pick(&unbound("/svc/A")).unwrap_err(),
            PickError::NoConnectionAvailable
        );
    }

    #[test]
    fn test_bound_key_routing() {
        let pool = Arc::new(FakePool::default());
        let (c1, c2) = (conn(1), conn(2));
        pool.bindings
            .lock()
            .unwrap()
            .insert("ready-key".into(), Some(c2.clone()));
        pool.bindings.lock().unwrap().insert("cold-key".into(), None);
        let p = picker(vec![c1.clone(), c2.clone()], &pool, 10, 100);

        let info = PickInfo {
            method: "/svc/A",
            affinity_key: Some("ready-key"),
        };
        assert_eq!(p.pick(&info).unwrap().handle(), c2.handle());

        let info = PickInfo {
            method: "/svc/A",
            affinity_key: Some("cold-key"),
        };
        assert_eq!(
            p.pick(&info).unwrap_err(),
            PickError::BoundConnectionNotReady {
                key: "cold-key".into()
            }
        );

        // Unknown keys fall back to least-streams selection.
        let info = PickInfo {
            method: "/svc/A",
            affinity_key: Some("fresh"),
        };
        assert_eq!(p.pick(&info).unwrap().handle(), c1.handle());
    }

    #[test]
    fn test_requests_growth_at_watermark() {
        let pool = Arc::new(FakePool::default());
        pool.size.store(1, Ordering::SeqCst);
        let c1 = conn(1);
        let p = picker(vec![c1.clone()], &pool, 2, 1);

        let _held = p.pick(&unbound("/svc/A")).unwrap();
        assert_eq!(pool.growth_requests.load(Ordering::SeqCst), 0);

        // Saturated: still served, but growth is requested.
        let second = p.pick(&unbound("/svc/A")).unwrap();
        assert_eq!(second.handle(), c1.handle());
        assert_eq!(pool.growth_requests.load(Ordering::SeqCst), 1);

        // At max size no further growth is requested.
        pool.size.store(2, Ordering::SeqCst);
        let _third = p.pick(&unbound("/svc/A")).unwrap();
        assert_eq!(pool.growth_requests.load(Ordering::SeqCst), 1);
    }
}
