//! Event trail subsystem.
//!
//! # Data Flow
//! ```text
//! FaultInjector / RateLimiter
//!     → publisher.rs (enqueue, never awaited on the request path)
//!     → drain task
//!     → sink.rs (POST /chaos/event-publish)
//! ```
//!
//! # Design Decisions
//! - Best-effort: no retries, failures are logged and counted
//! - Bounded queue: overload drops events instead of growing memory

pub mod publisher;
pub mod sink;

pub use publisher::EventPublisher;
pub use sink::{EventSink, GatewayEvent, HttpEventSink, PublishError};
