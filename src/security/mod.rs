//! Admission control.
//!
//! # Data Flow
//! ```text
//! RequestPipeline
//!     → client_identity (peer IP or trusted X-Forwarded-For)
//!     → RateLimiter::admit
//!         → RedisCounterStore (shared window)
//!         → LocalWindowStore (when Redis fails)
//! ```

pub mod rate_limit;

pub use rate_limit::{
    client_identity, Admission, CounterStore, LocalWindowStore, RateLimitDecision, RateLimiter,
    RedisCounterStore, StoreError, WindowCount,
};
