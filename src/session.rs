//! Per-device session: handshake, poll loop, teardown.
//!
//! One session owns one MCU connection and moves through
//! Connecting -> AwaitingCheck -> AwaitingIdentity -> Polling -> Closed.
//! Frames are sent and their responses consumed strictly in request order.
//! Any failure after identification tears down every trace of the device
//! and emits exactly one disconnect notification.

use crate::config::ServerConfig;
use crate::decoder::{decode_cycle, rssi_bucket};
use crate::events::EventBus;
use crate::frame::{self, CodecError, DATA_RESPONSE_TYPE, TYPE_OFFSET};
use crate::gateway::{CommandGateway, SharedWriter};
use crate::store::LiveStore;
use crate::types::{ConnKey, ConnStatus, DeviceId, LiveVitals};
use chrono::{DateTime, FixedOffset, Utc};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Read buffer large enough for one frame plus slack, matching what the
/// devices actually send per burst.
const READ_BUF_LEN: usize = 1400;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("handshake verification failed")]
    HandshakeFailed,

    #[error("peer closed the connection")]
    PeerClosed,

    #[error("no response within the read timeout")]
    ReadTimeout,

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("server shutting down")]
    Shutdown,
}

pub struct DeviceSession {
    conn_key: ConnKey,
    store: LiveStore,
    gateway: CommandGateway,
    events: EventBus,
    timezone: FixedOffset,
    read_timeout: Duration,
    poll_interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl DeviceSession {
    pub fn new(
        conn_key: ConnKey,
        store: LiveStore,
        gateway: CommandGateway,
        events: EventBus,
        config: &ServerConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            conn_key,
            store,
            gateway,
            events,
            timezone: config.timezone,
            read_timeout: Duration::from_secs(config.read_timeout_seconds),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            shutdown,
        }
    }

    /// Drive the session to completion. Consumes the socket; on return the
    /// connection is closed and, if the device was ever identified, its
    /// state has been purged and one disconnect notice published.
    pub async fn run(mut self, stream: TcpStream) {
        let (mut reader, writer) = stream.into_split();
        let writer: SharedWriter = Arc::new(tokio::sync::Mutex::new(writer));

        let device_id = match self.handshake(&mut reader, &writer).await {
            Ok(id) => id,
            Err(e) => {
                // verification failed: drop the connection, no state created
                info!(conn_key = %self.conn_key, "handshake failed: {e}");
                return;
            }
        };

        info!(
            conn_key = %self.conn_key,
            device_id = %device_id,
            "MCU identified, polling"
        );
        self.store.register_device(&device_id, &self.conn_key);
        self.gateway.register(&self.conn_key, writer.clone());

        if let Err(e) = self.poll_loop(&mut reader, &writer, &device_id).await {
            match e {
                SessionError::Shutdown => {
                    info!(conn_key = %self.conn_key, device_id = %device_id, "session closed by shutdown");
                }
                SessionError::ReadTimeout | SessionError::PeerClosed => {
                    info!(
                        conn_key = %self.conn_key,
                        device_id = %device_id,
                        "MCU disconnected: {e}"
                    );
                }
                e => {
                    warn!(
                        conn_key = %self.conn_key,
                        device_id = %device_id,
                        phase = "polling",
                        "session ended with error: {e}"
                    );
                }
            }
        }
        self.teardown(&device_id);
    }

    /// AwaitingCheck then AwaitingIdentity: verify the device answers the
    /// check frame with a data-typed reply, then pull its identifier out of
    /// the first poll response.
    async fn handshake(
        &mut self,
        reader: &mut OwnedReadHalf,
        writer: &SharedWriter,
    ) -> Result<DeviceId, SessionError> {
        let mut buf = [0u8; READ_BUF_LEN];

        self.send(writer, &frame::build_check_frame()).await?;
        let n = self.read_reply(reader, &mut buf).await?;
        if !frame::is_valid_reply(&buf[..n]) {
            return Err(SessionError::HandshakeFailed);
        }

        self.send(writer, &frame::build_poll_frame(&self.time_tag()))
            .await?;
        let n = self.read_reply(reader, &mut buf).await?;
        Ok(frame::device_id(&buf[..n])?)
    }

    async fn poll_loop(
        &mut self,
        reader: &mut OwnedReadHalf,
        writer: &SharedWriter,
        device_id: &str,
    ) -> Result<(), SessionError> {
        let mut buf = [0u8; READ_BUF_LEN];
        let mut last_position: u16 = 0;

        loop {
            self.send(writer, &frame::build_poll_frame(&self.time_tag()))
                .await?;
            let n = self.read_reply(reader, &mut buf).await?;
            let data = &buf[..n];

            if data.get(TYPE_OFFSET).copied() != Some(DATA_RESPONSE_TYPE) {
                // not a data cycle, poll again
                debug!(conn_key = %self.conn_key, "skipping non-data response");
                continue;
            }

            let reading = decode_cycle(data, last_position)?;
            last_position = reading.position;

            let timestamp = self.timestamp();
            let vitals = LiveVitals {
                heart_rate: reading.heart_rate,
                resp_rate: reading.resp_rate,
                movement: reading.movement,
                outofbed: reading.outofbed,
                autoscaling: reading.autoscaling,
                timestamp: timestamp.clone(),
                rssi: rssi_bucket(reading.rssi_dbm),
                name: device_id.to_string(),
                addr: self.conn_key.clone(),
                status: ConnStatus::Connected,
            };
            if self.store.upsert_vitals(&self.conn_key, vitals) {
                self.store
                    .append_cycle(device_id, &self.conn_key, &reading, &timestamp);
                self.events.publish_update(self.store.vitals_map());
            } else {
                // a reconnect superseded this session; the cycle is dropped
                // and the dead socket will time out on its own
                debug!(conn_key = %self.conn_key, device_id = %device_id, "connection superseded");
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// One bounded read. An empty read means the peer closed; a shutdown
    /// signal unblocks the wait immediately.
    async fn read_reply(
        &mut self,
        reader: &mut OwnedReadHalf,
        buf: &mut [u8],
    ) -> Result<usize, SessionError> {
        tokio::select! {
            _ = self.shutdown.changed() => Err(SessionError::Shutdown),
            result = timeout(self.read_timeout, reader.read(buf)) => match result {
                Err(_) => Err(SessionError::ReadTimeout),
                Ok(Ok(0)) => Err(SessionError::PeerClosed),
                Ok(Ok(n)) => Ok(n),
                Ok(Err(e)) => Err(SessionError::Io(e)),
            },
        }
    }

    async fn send(
        &self,
        writer: &SharedWriter,
        frame: &[u8; frame::FRAME_LEN],
    ) -> Result<(), SessionError> {
        let mut writer = writer.lock().await;
        writer.write_all(frame).await?;
        Ok(())
    }

    /// Closed: purge the session from every store, exactly one disconnect
    /// notice.
    fn teardown(&self, device_id: &str) {
        self.gateway.unregister(&self.conn_key);
        self.store.remove(&self.conn_key, device_id);
        self.events.publish_disconnect(&self.conn_key);
        info!(conn_key = %self.conn_key, device_id = %device_id, "session closed");
    }

    fn now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&self.timezone)
    }

    /// 12-character tag stamped into every poll frame header.
    fn time_tag(&self) -> String {
        self.now().format("%y%m%d%H%M%S").to_string()
    }

    fn timestamp(&self) -> String {
        self.now().format("%Y-%m-%d %H:%M:%S").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{DEVICE_ID_OFFSET, FRAME_LEN};
    use std::path::PathBuf;
    use tokio::net::TcpListener;

    fn test_config() -> ServerConfig {
        ServerConfig {
            bind_addr: "127.0.0.1".to_string(),
            port: 0,
            snapshot_dir: PathBuf::from("/tmp"),
            timezone: FixedOffset::east_opt(8 * 3600).unwrap(),
            read_timeout_seconds: 2,
            poll_interval_ms: 20,
            max_buffered_samples: 60_000,
            event_capacity: 64,
        }
    }

    async fn loopback_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (server, client)
    }

    #[tokio::test]
    async fn invalid_check_reply_closes_without_state() {
        let (server_stream, mut mcu) = loopback_pair().await;
        let store = LiveStore::new(60_000);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let session = DeviceSession::new(
            "test-conn".to_string(),
            store.clone(),
            CommandGateway::new(),
            EventBus::new(8),
            &test_config(),
            shutdown_rx,
        );
        let handle = tokio::spawn(session.run(server_stream));

        let mut check = [0u8; FRAME_LEN];
        mcu.read_exact(&mut check).await.unwrap();
        assert_eq!(check, frame::build_check_frame());

        // wrong discriminant: verification must fail
        let mut reply = [0u8; 13];
        reply[TYPE_OFFSET] = 1;
        mcu.write_all(&reply).await.unwrap();

        handle.await.unwrap();
        assert!(store.vitals_map().is_empty());
        // server side dropped the socket
        let mut probe = [0u8; 1];
        assert_eq!(mcu.read(&mut probe).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn bad_identity_frame_closes_without_state() {
        let (server_stream, mut mcu) = loopback_pair().await;
        let store = LiveStore::new(60_000);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let session = DeviceSession::new(
            "test-conn".to_string(),
            store.clone(),
            CommandGateway::new(),
            EventBus::new(8),
            &test_config(),
            shutdown_rx,
        );
        let handle = tokio::spawn(session.run(server_stream));

        let mut buf = [0u8; FRAME_LEN];
        mcu.read_exact(&mut buf).await.unwrap();
        let mut reply = [0u8; FRAME_LEN];
        reply[TYPE_OFFSET] = DATA_RESPONSE_TYPE;
        mcu.write_all(&reply).await.unwrap();

        // identity poll answered with a non-ASCII identifier
        mcu.read_exact(&mut buf).await.unwrap();
        let mut identity = [0u8; FRAME_LEN];
        identity[TYPE_OFFSET] = DATA_RESPONSE_TYPE;
        identity[DEVICE_ID_OFFSET] = 0xC3;
        identity[DEVICE_ID_OFFSET + 1] = 0x28;
        mcu.write_all(&identity).await.unwrap();

        handle.await.unwrap();
        assert!(store.vitals_map().is_empty());
        assert!(store.device_ids().is_empty());
    }
}
