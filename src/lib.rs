// src/lib.rs
// Public library surface for the service binary, the watch-renew job and integration tests.

pub mod api;
pub mod auth;
pub mod bootstrap;
pub mod classify;
pub mod config;
pub mod error;
pub mod gmail;
pub mod ingest;
pub mod metrics;
pub mod retry;
pub mod secrets;
pub mod store;

// ---- Re-exports for stable public API ----
pub use crate::api::{create_router, AppState};
pub use crate::bootstrap::Services;
pub use crate::config::AppConfig;
pub use crate::ingest::{InboundRequest, IngestionPipeline, PipelineResponse};

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` drives the filter (default `info`); `LOG_FORMAT=json` switches to JSON lines.
/// Uses `try_init`, so a subscriber already installed by the hosting runtime wins.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let res = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .try_init()
    };
    if res.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
