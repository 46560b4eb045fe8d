//! Picker that fails every call with a fixed error.

use crate::observability::metrics;
use crate::picker::{Pick, PickError, PickInfo, Picker};

/// Used before any connection is ready, while the pool is in transient
/// failure, and after the pool is closed.
#[derive(Debug, Clone)]
pub struct ErrPicker {
    error: PickError,
}

impl ErrPicker {
    pub fn new(error: PickError) -> Self {
        Self { error }
    }
}

impl Picker for ErrPicker {
    fn pick(&self, info: &PickInfo<'_>) -> Result<Pick, PickError> {
        tracing::debug!(method = %info.method, error = %self.error, "Pick rejected");
        metrics::record_pick(self.error.label());
        Err(self.error.clone())
    }
}
