//! One-shot inbox watch renewal for external schedulers (cron, Cloud Scheduler).
//! Exits non-zero when the registration fails.

use anyhow::{Context, Result};

use trade_alert_ingest::bootstrap::{build_credentials, build_watch};
use trade_alert_ingest::gmail::GmailClient;
use trade_alert_ingest::{init_tracing, AppConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let mut cfg = AppConfig::load()?;
    cfg.watch.enabled = true;

    let credentials = build_credentials(&cfg.secrets);
    let gmail = GmailClient::new(&cfg.gmail, credentials)?;
    let (manager, _schedule) = build_watch(&cfg, gmail)?;

    let renewal = manager.renew().await.context("renewing gmail watch")?;
    println!(
        "watch renewed: expires {} (history {})",
        renewal.expiration.to_rfc3339(),
        renewal.history_id.as_deref().unwrap_or("-")
    );
    Ok(())
}
