//! Trade-alert ingestion service: binary entrypoint.
//! Boots the Axum HTTP server and, when enabled, the inbox watch renewal task.

use shuttle_axum::ShuttleAxum;
use tracing::info;

use trade_alert_ingest::gmail::spawn_watch_scheduler;
use trade_alert_ingest::metrics::Metrics;
use trade_alert_ingest::{create_router, init_tracing, AppConfig, Services};

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = AppConfig::load()?;
    let services = Services::from_config(&cfg)?;

    let mut router = create_router(services.app_state());
    if cfg.metrics_enabled {
        let metrics = Metrics::init()?;
        router = router.merge(metrics.router());
    }

    if let Some((manager, schedule)) = services.watch.clone() {
        info!(
            target: "watch",
            interval_secs = schedule.interval_secs,
            margin_secs = schedule.margin_secs,
            "starting watch renewal task"
        );
        spawn_watch_scheduler(manager, schedule);
    }

    Ok(router.into())
}
