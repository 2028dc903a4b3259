//! Chaos gateway library.
//!
//! An API gateway that fronts a set of downstream services and wraps every
//! proxied request in a resilience and telemetry pipeline:
//!
//! ```text
//!   client ──▶ FaultInjector ──▶ RateLimiter ──▶ downstream service
//!                   │                 │                 │
//!                   └────────┬────────┴─────────────────┘
//!                            ▼
//!                    MetricsAggregator ──▶ /metrics, /metrics/summary
//!                            │
//!                    EventPublisher ──▶ chaos service event trail
//! ```
//!
//! The fault policy is pulled from the chaos service in the background by
//! [`chaos::PolicySync`] and swapped in atomically.

pub mod admin;
pub mod chaos;
pub mod config;
pub mod events;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod routing;
pub mod security;

pub use config::GatewayConfig;
pub use http::GatewayServer;
pub use lifecycle::Shutdown;
