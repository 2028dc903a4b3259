//! Resilience helpers.
//!
//! - backoff.rs: waits between policy fetch retries
//! - timeouts.rs: the injected-timeout watchdog race

pub mod backoff;
pub mod timeouts;

pub use backoff::calculate_backoff;
pub use timeouts::{race_deadline, Race};
