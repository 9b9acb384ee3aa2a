//! TCP listener accepting MCU connections and spawning device sessions.

use crate::config::ServerConfig;
use crate::events::EventBus;
use crate::gateway::CommandGateway;
use crate::session::DeviceSession;
use crate::store::LiveStore;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

pub struct Server {
    config: ServerConfig,
    store: LiveStore,
    gateway: CommandGateway,
    events: EventBus,
}

impl Server {
    pub fn new(
        config: ServerConfig,
        store: LiveStore,
        gateway: CommandGateway,
        events: EventBus,
    ) -> Self {
        Self {
            config,
            store,
            gateway,
            events,
        }
    }

    /// Bind and serve until shutdown is requested.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.config.bind_address()).await?;
        info!("🎧 Listening for MCUs on {}", listener.local_addr()?);
        self.serve(listener, shutdown).await
    }

    /// Accept loop. Each accepted connection gets its own session task, so
    /// no session ever blocks acceptance of the next device.
    pub async fn serve(
        self,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("listener shutting down");
                    break;
                }
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!("accept failed: {e}");
                            continue;
                        }
                    };
                    let conn_key = peer.to_string();
                    info!(%conn_key, "✅ new MCU connection");
                    let session = DeviceSession::new(
                        conn_key,
                        self.store.clone(),
                        self.gateway.clone(),
                        self.events.clone(),
                        &self.config,
                        shutdown.clone(),
                    );
                    tokio::spawn(session.run(stream));
                }
            }
        }
        Ok(())
    }
}
