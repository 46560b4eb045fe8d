//! Method → affinity rule table.

use dashmap::DashMap;
use std::collections::HashSet;

use crate::config::{AffinityConfig, MethodConfig};

/// Concurrent lookup of affinity rules by fully-qualified method name.
#[derive(Debug, Default)]
pub struct MethodAffinityMap {
    methods: DashMap<String, AffinityConfig>,
}

impl MethodAffinityMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(methods: &[MethodConfig]) -> Self {
        let map = Self::new();
        map.reload(methods);
        map
    }

    /// Replace the rule set. New rules are inserted before stale ones are
    /// dropped, so concurrent lookups never see an empty table.
    pub fn reload(&self, methods: &[MethodConfig]) {
        let mut names = HashSet::new();
        for method in methods {
            let Some(affinity) = &method.affinity else {
                continue;
            };
            for name in &method.name {
                self.methods.insert(name.clone(), affinity.clone());
                names.insert(name.as_str());
            }
        }
        self.methods.retain(|name, _| names.contains(name.as_str()));
        tracing::info!(methods = self.methods.len(), "Method affinity rules loaded");
    }

    pub fn get(&self, method: &str) -> Option<AffinityConfig> {
        self.methods.get(method).map(|r| r.value().clone())
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}
