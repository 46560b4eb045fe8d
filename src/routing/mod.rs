//! Call-level affinity routing.
//!
//! # Data Flow
//! ```text
//! Outgoing call (method, request message)
//!     → method.rs (method → affinity rule)
//!     → locator.rs (BOUND / UNBIND: key from request)
//!     → pool snapshot picker (bound connection or least-loaded)
//!     → call runs on the picked connection
//!     → call.rs finish:
//!         - BIND: key from response, bound to the picked connection
//!         - UNBIND: key released
//! ```
//!
//! # Design Decisions
//! - Messages are inspected as `serde_json::Value`; the locator is a dotted
//!   field path
//! - A key that cannot be extracted fails the call instead of silently
//!   routing it elsewhere
//! - The method table is concurrent so it can be reloaded under traffic

pub mod call;
pub mod locator;
pub mod method;

pub use call::{Call, CallRouter, RouteError};
pub use locator::{extract_affinity_key, LocatorError};
pub use method::MethodAffinityMap;
