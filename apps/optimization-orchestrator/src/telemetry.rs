//! Tracing Setup
//!
//! Initializes console logging with an `EnvFilter` driven by `RUST_LOG`.
//! Log events carry structured fields (`job_id`, `owner_id`, `request_id`,
//! `phase`, timings) rather than formatted strings so downstream collectors
//! can index them.
//!
//! # Usage
//!
//! ```rust,ignore
//! use optimization_orchestrator::telemetry::init_telemetry;
//!
//! #[tokio::main]
//! async fn main() {
//!     init_telemetry();
//!     // ... application code
//! }
//! ```

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Respects `RUST_LOG` when set; defaults to `info` with noisy HTTP
/// internals capped at `warn`.
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
pub fn init_telemetry() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,hyper=warn,h2=warn"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
