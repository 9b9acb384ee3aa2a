use bedmon_ingest::{
    CommandGateway, EventBus, LiveStore, Server, ServerConfig, SnapshotScheduler,
};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bedmon_ingest=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("🚀 Starting bedmon ingest server");

    let config = ServerConfig::from_env()?;
    info!(
        snapshot_dir = %config.snapshot_dir.display(),
        "configuration loaded"
    );

    let store = LiveStore::new(config.max_buffered_samples);
    let gateway = CommandGateway::new();
    let events = EventBus::new(config.event_capacity);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // minute-aligned snapshot flushing runs beside the sessions
    let scheduler = SnapshotScheduler::new(store.clone(), &config, shutdown_rx.clone());
    tokio::spawn(scheduler.run());

    let server = Server::new(config, store, gateway, events);
    let server_task = tokio::spawn(server.run(shutdown_rx));

    tokio::signal::ctrl_c().await?;
    info!("🛑 shutdown signal received, closing connections");
    let _ = shutdown_tx.send(true);
    server_task.await??;

    info!("🧹 server shut down");
    Ok(())
}
