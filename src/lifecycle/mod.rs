//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Install metrics → Assemble components → Bind listener
//!
//! Shutdown (shutdown.rs):
//!     Signal received → broadcast → sync loop, event drain and server stop
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//! ```

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use signals::shutdown_signal;
pub use startup::{assemble, install_metrics, GatewayParts, StartupError};
