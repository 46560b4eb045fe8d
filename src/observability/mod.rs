//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Pool manager, pickers, call router produce:
//!     → logging.rs (structured tracing events)
//!     → metrics.rs (counters and gauges via the `metrics` facade)
//!
//! Consumers:
//!     → stdout (tracing-subscriber fmt layer)
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - Metric updates are no-ops until a recorder is installed, so the library
//!   never requires an exporter
//! - Pool composition changes log at info, per-call decisions at debug

pub mod logging;
pub mod metrics;
