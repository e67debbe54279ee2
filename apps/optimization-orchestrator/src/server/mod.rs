//! HTTP server implementation.
//!
//! Two routers share one [`AppState`]: the public `/api/v1/optimizations`
//! surface that browsers and API clients hit, and the `/internal` surface
//! a delegating web tier drives when this process owns the job store. A
//! deployment behind a remote orchestrator mounts only the public router.

mod http;
mod internal;
mod rate_limit;

pub use http::{AppState, create_public_router};
pub use internal::create_internal_router;
pub use rate_limit::{RateDecision, RateLimiter};
