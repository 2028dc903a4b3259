//! Fault injection subsystem.
//!
//! # Data Flow
//! ```text
//! sync.rs (background) ──replace──▶ policy.rs (ArcSwap snapshot)
//!                                        │ load per request
//!                                        ▼
//!                                 injector.rs → Decision
//! ```
//!
//! # Design Decisions
//! - The policy is replaced whole, never mutated field by field
//! - Startup policy is disabled until the first successful sync or push

pub mod injector;
pub mod policy;
pub mod sync;

pub use injector::{Decision, FastRandom, FaultInjector, RandomSource, INJECTED_TIMEOUT};
pub use policy::{FaultPolicy, PolicyHandle};
pub use sync::{HttpPolicySource, PolicySource, PolicySync, SyncError};
