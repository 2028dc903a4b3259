//! HTTP front end.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (router, request ID, tracing, timeout, body limit)
//!     → pipeline.rs (fault injection, rate limiting, request accounting)
//!     → upstream.rs (forward to the downstream service)
//!     → response.rs (gateway-generated JSON answers)
//! ```

pub mod pipeline;
pub mod response;
pub mod server;
pub mod upstream;

pub use pipeline::{pipeline_middleware, RequestPipeline};
pub use server::{AppState, GatewayServer, SERVICE_NAME};
pub use upstream::{Upstream, UpstreamError};
