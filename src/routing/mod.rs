//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! /api/{service}/{rest}
//!     → service_label (metrics, fault decisions)
//!     → ServiceRegistry::upstream_uri → {base}/{service}/{rest}
//! ```
//!
//! # Design Decisions
//! - Immutable after construction, shared without locks
//! - Unknown services are an explicit `None`, answered with 404

pub mod registry;

pub use registry::{service_label, ServiceRegistry, UNKNOWN_SERVICE};
