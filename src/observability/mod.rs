//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! RequestPipeline / Upstream / RateLimiter
//!     → aggregator.rs (in-process totals, percentiles, top routes)
//!         → GET /metrics/summary
//!     → metrics.rs (labelled counters and histograms)
//!         → GET /metrics
//!     → logging.rs (structured tracing output)
//! ```
//!
//! # Design Decisions
//! - One aggregator per gateway, owned by the composition root
//! - The Prometheus recorder is the only process-global piece

pub mod aggregator;
pub mod logging;
pub mod metrics;

pub use aggregator::{GatewaySummary, MetricsAggregator, MetricsSnapshot, RequestOutcome, RouteSummary};
