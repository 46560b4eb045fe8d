//! Affinity-aware call flow on top of the pool's published picker.

use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

use crate::config::{AffinityCommand, AffinityConfig};
use crate::connectivity::ConnectionHandle;
use crate::picker::{Pick, PickError, PickInfo};
use crate::pool::{ConnectionHost, PoolManager};
use crate::routing::locator::{extract_affinity_key, LocatorError};
use crate::routing::method::MethodAffinityMap;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RouteError {
    #[error(transparent)]
    Pick(#[from] PickError),

    #[error("cannot extract affinity key for {method}: {source}")]
    AffinityKey {
        method: String,
        #[source]
        source: LocatorError,
    },
}

impl RouteError {
    pub fn is_retryable(&self) -> bool {
        match self {
            RouteError::Pick(e) => e.is_retryable(),
            RouteError::AffinityKey { .. } => false,
        }
    }
}

/// Routes calls through the pool, applying per-method affinity rules.
pub struct CallRouter<H: ConnectionHost> {
    pool: Arc<PoolManager<H>>,
    methods: Arc<MethodAffinityMap>,
}

impl<H: ConnectionHost> CallRouter<H> {
    pub fn new(pool: Arc<PoolManager<H>>, methods: Arc<MethodAffinityMap>) -> Self {
        Self { pool, methods }
    }

    pub fn pool(&self) -> &Arc<PoolManager<H>> {
        &self.pool
    }

    pub fn methods(&self) -> &Arc<MethodAffinityMap> {
        &self.methods
    }

    /// Pick a connection for `method`. BOUND and UNBIND methods route by the
    /// key found in `request`.
    pub fn begin(&self, method: &str, request: &Value) -> Result<Call, RouteError> {
        let affinity = self.methods.get(method);
        let key = match &affinity {
            Some(cfg) if cfg.command != AffinityCommand::Bind => Some(
                extract_affinity_key(&cfg.affinity_key, request).map_err(|source| {
                    RouteError::AffinityKey {
                        method: method.to_string(),
                        source,
                    }
                })?,
            ),
            _ => None,
        };

        let info = PickInfo {
            method,
            affinity_key: key.as_deref(),
        };
        let pick = self.pool.pick(&info)?;

        Ok(Call {
            method: method.to_string(),
            affinity,
            key,
            pick,
        })
    }
}

/// One in-flight call. Holds its stream open until finished or dropped.
#[derive(Debug)]
pub struct Call {
    method: String,
    affinity: Option<AffinityConfig>,
    key: Option<String>,
    pick: Pick,
}

impl Call {
    pub fn handle(&self) -> ConnectionHandle {
        self.pick.handle()
    }

    /// Key the call was routed by, if any.
    pub fn affinity_key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// Complete the call. `response` is `None` when the call failed.
    ///
    /// BIND binds the key found in a successful response to the connection
    /// used; UNBIND releases its key whatever the outcome.
    pub fn finish(self, response: Option<&Value>) -> Result<(), RouteError> {
        let Some(affinity) = &self.affinity else {
            return Ok(());
        };

        match affinity.command {
            AffinityCommand::Bind => {
                let Some(response) = response else {
                    return Ok(());
                };
                let key = extract_affinity_key(&affinity.affinity_key, response).map_err(
                    |source| RouteError::AffinityKey {
                        method: self.method.clone(),
                        source,
                    },
                )?;
                self.pick.bind(&key);
            }
            AffinityCommand::Unbind => {
                if let Some(key) = &self.key {
                    self.pick.unbind(key);
                }
            }
            AffinityCommand::Bound => {}
        }
        Ok(())
    }
}
