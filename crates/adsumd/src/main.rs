use anyhow::Result;
use chrono::{Duration as ChronoDuration, Local};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus;
mod engine;
mod service;

use config::Config;
use service::KioskService;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("adsumd starting");

    let config = Config::from_env();
    let store = Arc::new(adsum_store::Store::open(&config.db_path)?);

    let engine = engine::spawn_onnx_engine(
        &config.detect_model_path(),
        &config.embed_model_path(),
        config.engine_queue,
    )?;

    let service = Arc::new(KioskService::new(
        store,
        engine,
        config.faces_dir(),
    ));

    let loaded = service.warm_index()?;
    tracing::info!(embeddings = loaded, "matching index warmed");

    let _connection = zbus::connection::Builder::session()?
        .name("org.adsum.Kiosk1")?
        .serve_at("/org/adsum/Kiosk1", dbus::KioskInterface::new(service.clone()))?
        .build()
        .await?;

    tokio::spawn(midnight_sweep(service.clone()));

    tracing::info!("adsumd ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("adsumd shutting down");

    Ok(())
}

/// Run the absence sweep for the previous day a few minutes after each
/// midnight. The D-Bus method covers manual and catch-up runs; both paths
/// share the same idempotent insert.
async fn midnight_sweep(service: Arc<KioskService>) {
    loop {
        let now = Local::now().naive_local();
        let next_run = (now.date() + ChronoDuration::days(1))
            .and_hms_opt(0, 5, 0)
            .expect("valid time");
        let wait = (next_run - now)
            .to_std()
            .unwrap_or(std::time::Duration::from_secs(60));
        tokio::time::sleep(wait).await;

        let swept_day = Local::now().date_naive() - ChronoDuration::days(1);
        match service.sweep_absences(swept_day) {
            Ok(reply) => {
                tracing::info!(date = %reply.date, inserted = reply.inserted, swept = reply.swept, "midnight sweep");
            }
            Err(e) => tracing::error!(error = %e, "midnight sweep failed"),
        }
    }
}
