//! Minute-aligned snapshot scheduler.
//!
//! Runs beside the device sessions and, whenever the wall-clock second
//! component hits zero, drains every device's accumulating buffers into one
//! JSON file under a per-day directory. The post-flush one-second sleep
//! keeps a single minute boundary from flushing twice. A failed write puts
//! the drained data back instead of losing it.

use crate::config::ServerConfig;
use crate::store::LiveStore;
use crate::types::{DeviceBuffers, DeviceId};
use anyhow::Context;
use chrono::{DateTime, FixedOffset, Timelike, Utc};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub struct SnapshotScheduler {
    store: LiveStore,
    snapshot_dir: PathBuf,
    timezone: FixedOffset,
    shutdown: watch::Receiver<bool>,
}

impl SnapshotScheduler {
    pub fn new(store: LiveStore, config: &ServerConfig, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            store,
            snapshot_dir: config.snapshot_dir.clone(),
            timezone: config.timezone,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        info!(dir = %self.snapshot_dir.display(), "snapshot scheduler started");
        loop {
            let now = Utc::now().with_timezone(&self.timezone);
            let pause = self.tick(now).await;
            if self.wait(pause).await {
                break;
            }
        }
        info!("snapshot scheduler stopped");
    }

    /// One scheduler step: flush if the wall clock sits on a minute
    /// boundary, then say how long to wait before the next check. The
    /// post-flush one-second wait carries the next check past the rest of
    /// the zero-second window, so each boundary flushes at most once.
    async fn tick(&self, now: DateTime<FixedOffset>) -> Duration {
        if now.second() == 0 {
            if let Err(e) = self.flush(now).await {
                warn!("snapshot flush failed: {e:#}");
            }
            Duration::from_secs(1)
        } else {
            Duration::from_millis(500)
        }
    }

    /// Sleep for `duration`, returning true if shutdown was requested.
    async fn wait(&mut self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.shutdown.changed() => true,
            _ = tokio::time::sleep(duration) => false,
        }
    }

    /// Drain every device and write one snapshot document. On any error the
    /// drained buffers are restored so the data survives until the next
    /// boundary.
    async fn flush(&self, now: DateTime<FixedOffset>) -> anyhow::Result<()> {
        let rate_timestamp = now.format("%H:%M").to_string();
        let drained = self.store.drain_buffers(&rate_timestamp);
        if drained.is_empty() {
            debug!("no devices connected, skipping snapshot");
            return Ok(());
        }

        let dated_dir = self.snapshot_dir.join(now.format("%Y-%m-%d").to_string());
        let file_path = dated_dir.join(format!(
            "snapshot_{}.json",
            now.format("%Y-%m-%d_%H-%M-%S")
        ));

        match write_snapshot(&dated_dir, &file_path, &drained).await {
            Ok(()) => {
                let cycles: usize = drained.iter().map(|(_, b)| b.cycle_count()).sum();
                info!(
                    file = %file_path.display(),
                    devices = drained.len(),
                    cycles,
                    "snapshot written"
                );
                Ok(())
            }
            Err(e) => {
                self.store.restore_buffers(drained);
                Err(e)
            }
        }
    }
}

async fn write_snapshot(
    dated_dir: &std::path::Path,
    file_path: &std::path::Path,
    drained: &[(DeviceId, DeviceBuffers)],
) -> anyhow::Result<()> {
    let document: BTreeMap<&str, &DeviceBuffers> = drained
        .iter()
        .map(|(id, buffers)| (id.as_str(), buffers))
        .collect();
    let json = serde_json::to_vec_pretty(&document).context("serializing snapshot")?;

    tokio::fs::create_dir_all(dated_dir)
        .await
        .with_context(|| format!("creating {}", dated_dir.display()))?;
    tokio::fs::write(file_path, json)
        .await
        .with_context(|| format!("writing {}", file_path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::CycleReading;

    fn reading(heart_rate: u8) -> CycleReading {
        CycleReading {
            position: 2,
            heart_rate,
            resp_rate: 16,
            movement: 0,
            outofbed: 0,
            autoscaling: 0,
            rssi_dbm: -60,
            samples: vec![(1, 2), (3, 4)],
        }
    }

    fn test_scheduler(
        store: LiveStore,
        snapshot_dir: PathBuf,
    ) -> (SnapshotScheduler, watch::Sender<bool>) {
        let (tx, shutdown) = watch::channel(false);
        let scheduler = SnapshotScheduler {
            store,
            snapshot_dir,
            timezone: FixedOffset::east_opt(8 * 3600).unwrap(),
            shutdown,
        };
        (scheduler, tx)
    }

    fn boundary() -> DateTime<FixedOffset> {
        use chrono::TimeZone;
        FixedOffset::east_opt(8 * 3600)
            .unwrap()
            .with_ymd_and_hms(2026, 8, 26, 12, 30, 0)
            .unwrap()
    }

    fn temp_dir(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("bedmon-{tag}-{}", std::process::id()))
    }

    #[tokio::test]
    async fn flush_writes_dated_file_and_resets_buffers() {
        let root = temp_dir("flush");
        let _ = std::fs::remove_dir_all(&root);

        let store = LiveStore::new(60_000);
        store.register_device("DEV001", "10.0.0.1:4000");
        store.append_cycle("DEV001", "10.0.0.1:4000", &reading(72), "2026-08-26 12:29:59");

        let (scheduler, _shutdown_tx) = test_scheduler(store.clone(), root.clone());
        scheduler.flush(boundary()).await.unwrap();

        let file = root
            .join("2026-08-26")
            .join("snapshot_2026-08-26_12-30-00.json");
        let content = std::fs::read_to_string(&file).unwrap();
        let document: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(document["DEV001"]["heart_rate"], serde_json::json!([72]));
        assert_eq!(document["DEV001"]["raw"], serde_json::json!([1, 3]));

        // buffers reset, minute average recorded
        assert!(store.buffers_snapshot("DEV001").unwrap().is_empty());
        let window = store.realtime_window("DEV001").unwrap();
        assert_eq!(window.heart_rate, vec![72.0]);
        assert_eq!(window.rate_timestamp, vec!["12:30"]);

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn failed_write_restores_buffers() {
        let root = temp_dir("flush-fail");
        let _ = std::fs::remove_dir_all(&root);
        // a plain file where the snapshot root should be makes
        // create_dir_all fail
        std::fs::write(&root, b"in the way").unwrap();

        let store = LiveStore::new(60_000);
        store.register_device("DEV001", "10.0.0.1:4000");
        store.append_cycle("DEV001", "10.0.0.1:4000", &reading(72), "2026-08-26 12:29:59");

        let (scheduler, _shutdown_tx) = test_scheduler(store.clone(), root.clone());
        assert!(scheduler.flush(boundary()).await.is_err());

        let buffers = store.buffers_snapshot("DEV001").unwrap();
        assert_eq!(buffers.heart_rate, vec![72]);
        assert_eq!(buffers.raw, vec![1, 3]);

        let _ = std::fs::remove_file(&root);
    }

    #[tokio::test]
    async fn minute_boundary_flushes_at_most_once() {
        let root = temp_dir("tick");
        let _ = std::fs::remove_dir_all(&root);

        let store = LiveStore::new(60_000);
        store.register_device("DEV001", "10.0.0.1:4000");
        store.append_cycle("DEV001", "10.0.0.1:4000", &reading(72), "2026-08-26 12:29:59");

        let (scheduler, _shutdown_tx) = test_scheduler(store.clone(), root.clone());

        // on the boundary: flush, then a full second's pause
        let first = boundary();
        let pause = scheduler.tick(first).await;
        assert_eq!(pause, Duration::from_secs(1));

        // the pause lands the next check past the zero-second window
        store.append_cycle("DEV001", "10.0.0.1:4000", &reading(74), "2026-08-26 12:30:00");
        let next = first + chrono::Duration::from_std(pause).unwrap();
        let pause = scheduler.tick(next).await;
        assert_eq!(pause, Duration::from_millis(500));

        // exactly one snapshot file for the minute, later data still buffered
        let dated_dir = root.join("2026-08-26");
        let files = std::fs::read_dir(&dated_dir).unwrap().count();
        assert_eq!(files, 1);
        assert_eq!(
            store.buffers_snapshot("DEV001").unwrap().heart_rate,
            vec![74]
        );

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn flush_with_no_devices_writes_nothing() {
        let root = temp_dir("flush-empty");
        let _ = std::fs::remove_dir_all(&root);

        let (scheduler, _shutdown_tx) = test_scheduler(LiveStore::new(60_000), root.clone());
        scheduler.flush(boundary()).await.unwrap();
        assert!(!root.exists());
    }
}
