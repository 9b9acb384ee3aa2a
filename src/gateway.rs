//! Out-of-band command path from the API layer to a connected MCU.
//!
//! Sessions share their write half with the gateway; a command is written
//! straight to the socket, fire-and-forget, with no correlated response.
//! The tokio mutex around each writer keeps a command from interleaving
//! with an in-flight poll frame.

use crate::frame::{build_autoscaling_frame, FRAME_LEN};
use crate::types::ConnKey;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tracing::info;

pub type SharedWriter = Arc<tokio::sync::Mutex<OwnedWriteHalf>>;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("device not connected: {0}")]
    NotConnected(ConnKey),

    #[error("command write failed: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Clone, Default)]
pub struct CommandGateway {
    writers: Arc<RwLock<HashMap<ConnKey, SharedWriter>>>,
}

impl CommandGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, conn_key: &str, writer: SharedWriter) {
        self.writers.write().insert(conn_key.to_string(), writer);
    }

    pub(crate) fn unregister(&self, conn_key: &str) {
        self.writers.write().remove(conn_key);
    }

    /// Write one command frame to the named connection. A missing
    /// connection is reported without any I/O; other sessions are never
    /// affected.
    pub async fn send_command(
        &self,
        conn_key: &str,
        frame: &[u8; FRAME_LEN],
    ) -> Result<(), GatewayError> {
        let writer = {
            let writers = self.writers.read();
            writers
                .get(conn_key)
                .cloned()
                .ok_or_else(|| GatewayError::NotConnected(conn_key.to_string()))?
        };
        let mut writer = writer.lock().await;
        writer.write_all(frame).await?;
        Ok(())
    }

    /// Command call interface for the API layer.
    pub async fn start_autoscaling(&self, conn_key: &str) -> Result<(), GatewayError> {
        self.send_command(conn_key, &build_autoscaling_frame()).await?;
        info!(%conn_key, "autoscaling command sent");
        Ok(())
    }
}
