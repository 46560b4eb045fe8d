//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (pool limits > 0)
//! - Detect duplicate or empty method names and empty affinity keys
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: PoolConfig → Result<(), Vec<ValidationError>>

use std::collections::HashSet;
use std::net::SocketAddr;
use thiserror::Error;

use crate::config::schema::PoolConfig;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("channel_pool.max_size must be greater than zero")]
    ZeroPoolSize,

    #[error("channel_pool.max_concurrent_streams_low_watermark must be greater than zero")]
    ZeroStreamWatermark,

    #[error("methods[{index}] has no method names")]
    NoMethodNames { index: usize },

    #[error("methods[{index}] has an empty method name")]
    EmptyMethodName { index: usize },

    #[error("method {name:?} is configured more than once")]
    DuplicateMethod { name: String },

    #[error("methods[{index}] has an empty affinity_key")]
    EmptyAffinityKey { index: usize },

    #[error("observability.metrics_address {address:?} is not a socket address")]
    InvalidMetricsAddress { address: String },
}

pub fn validate_config(config: &PoolConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.channel_pool.max_size == 0 {
        errors.push(ValidationError::ZeroPoolSize);
    }
    if config.channel_pool.max_concurrent_streams_low_watermark == 0 {
        errors.push(ValidationError::ZeroStreamWatermark);
    }

    let mut seen = HashSet::new();
    for (index, method) in config.methods.iter().enumerate() {
        if method.name.is_empty() {
            errors.push(ValidationError::NoMethodNames { index });
        }
        for name in &method.name {
            if name.trim().is_empty() {
                errors.push(ValidationError::EmptyMethodName { index });
            } else if !seen.insert(name.as_str()) {
                errors.push(ValidationError::DuplicateMethod { name: name.clone() });
            }
        }
        if let Some(affinity) = &method.affinity {
            if affinity.affinity_key.trim().is_empty() {
                errors.push(ValidationError::EmptyAffinityKey { index });
            }
        }
    }

    let obs = &config.observability;
    if obs.metrics_enabled && obs.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidMetricsAddress {
            address: obs.metrics_address.clone(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
