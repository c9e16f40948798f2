use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::{net::TcpListener, signal};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use energy_monitor_service::{
    api::{self, AppState},
    config::Config,
    control::CommandRelay,
    db,
    ingest::{run_listener, IngestService},
    mqtt::MqttCommandPublisher,
    store::{MemoryStore, PgStore, Store},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env (ignore error if file absent; env vars may be set externally)
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;
    let catalog = Arc::new(config.devices.clone());

    let store = match &config.database_url {
        Some(url) => {
            let pool = db::create_pool(url, config.store_timeout).await?;
            db::run_migrations(&pool).await?;
            info!("Database ready");
            Store::new(PgStore::new(pool), config.store_timeout)
        }
        None => {
            warn!("DATABASE_URL not set; readings are kept in memory and lost on exit");
            Store::new(MemoryStore::new(), config.store_timeout)
        }
    };

    let device_ids: Vec<String> = catalog.ids().map(str::to_owned).collect();
    store
        .ensure_device_statuses(&device_ids, Utc::now())
        .await
        .context("failed to initialise device states")?;
    info!(devices = ?device_ids, "Device catalog loaded");

    // Outbound command channel
    let (publisher, _relay_task) = MqttCommandPublisher::spawn(&config.mqtt);
    let relay = Arc::new(CommandRelay::new(Arc::new(publisher), store.clone(), catalog.clone()));

    // Inbound telemetry; the listener is the only writer of readings
    tokio::spawn(run_listener(
        config.mqtt.clone(),
        IngestService::new(store.clone(), catalog.clone()),
    ));

    let state = AppState::new(store, relay, catalog, config.default_tariff);

    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr = %addr, "HTTP server listening");

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
