use std::sync::Arc;

use anyhow::Result;
use tokio::{net::TcpListener, signal, sync::watch};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use soil_telemetry_service::{
    api::{self, AppState},
    config::{Config, StorageBackend},
    db::{
        self,
        postgres::{PgDeviceRegistry, PgReadingStore},
    },
    monitor::LivenessPolicy,
    notify::{LogNotifier, Notifier, WebhookNotifier},
    store::{DeviceRegistry, MemoryDeviceRegistry, MemoryReadingStore, ReadingStore},
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

    let (readings, devices): (Arc<dyn ReadingStore>, Arc<dyn DeviceRegistry>) = match &config.storage {
        StorageBackend::Memory => {
            info!("Using in-memory storage; data is lost on restart");
            (
                Arc::new(MemoryReadingStore::new()),
                Arc::new(MemoryDeviceRegistry::new()),
            )
        }
        StorageBackend::Postgres { database_url } => {
            let pool = db::create_pool(database_url, config.store_timeout).await?;
            db::run_migrations(&pool).await?;
            info!("Database ready");
            (
                Arc::new(PgReadingStore::new(pool.clone(), config.store_timeout)),
                Arc::new(PgDeviceRegistry::new(pool, config.store_timeout)),
            )
        }
    };

    let notifier: Arc<dyn Notifier> = match &config.alert_webhook_url {
        Some(url) => {
            info!(url = %url, "Offline alerts go to webhook");
            Arc::new(WebhookNotifier::new(url.clone(), config.alert_webhook_secret.clone())?)
        }
        None => Arc::new(LogNotifier),
    };

    let policy = LivenessPolicy::new(config.stale_threshold, config.alert_cooldown)?;
    let state = AppState::new(readings, devices, notifier, policy, config.monitor_interval);

    // Liveness monitor stops when the server does.
    let (stop_tx, stop_rx) = watch::channel(false);
    let monitor = tokio::spawn(state.monitor.clone().run(stop_rx));

    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, "HTTP server listening");

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = stop_tx.send(true);
    monitor.await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
