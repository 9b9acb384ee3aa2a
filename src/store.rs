use crate::decoder::CycleReading;
use crate::types::{ConnKey, DeviceBuffers, DeviceId, LiveVitals, RealtimeSnapshot, RealtimeWindow};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Mutable per-device state: accumulating buffers plus the bounded
/// real-time window. Kept behind one `Mutex` so a session's append and the
/// scheduler's drain+reset are mutually exclusive critical sections.
#[derive(Debug, Default)]
pub struct DeviceRecord {
    pub buffers: DeviceBuffers,
    pub window: RealtimeWindow,
}

/// In-memory store of live state for every connected MCU.
///
/// Keyed two ways: by connection (`ip:port`) for the display vitals, and by
/// device identifier for the buffers, window, and reverse lookup to the
/// current connection. Cheap to clone; all clones share the same maps.
#[derive(Clone)]
pub struct LiveStore {
    vitals: Arc<RwLock<HashMap<ConnKey, LiveVitals>>>,
    devices: Arc<RwLock<HashMap<DeviceId, Arc<Mutex<DeviceRecord>>>>>,
    device_conn: Arc<RwLock<HashMap<DeviceId, ConnKey>>>,
    max_buffered_samples: usize,
}

impl LiveStore {
    pub fn new(max_buffered_samples: usize) -> Self {
        Self {
            vitals: Arc::new(RwLock::new(HashMap::new())),
            devices: Arc::new(RwLock::new(HashMap::new())),
            device_conn: Arc::new(RwLock::new(HashMap::new())),
            max_buffered_samples,
        }
    }

    /// Register a freshly-identified device. A reconnect with the same
    /// identifier supersedes the previous session: its vitals entry is
    /// dropped and the buffers start over.
    pub fn register_device(&self, device_id: &str, conn_key: &str) {
        let previous = self
            .device_conn
            .write()
            .insert(device_id.to_string(), conn_key.to_string());
        if let Some(old_conn) = previous {
            if old_conn != conn_key {
                self.vitals.write().remove(&old_conn);
            }
        }
        self.devices.write().insert(
            device_id.to_string(),
            Arc::new(Mutex::new(DeviceRecord::default())),
        );
        self.vitals
            .write()
            .insert(conn_key.to_string(), LiveVitals::waiting(device_id, conn_key));
    }

    /// Replace the display vitals for one connection. A write from a
    /// session that no longer owns its device (a reconnect superseded it)
    /// is dropped, so a stale poll cycle cannot resurrect a removed entry.
    pub fn upsert_vitals(&self, conn_key: &str, vitals: LiveVitals) -> bool {
        if !self.owns_device(&vitals.name, conn_key) {
            return false;
        }
        self.vitals.write().insert(conn_key.to_string(), vitals);
        true
    }

    /// Append one decoded poll cycle to the device's buffers and status
    /// window. Returns false if the device is no longer registered or the
    /// connection has been superseded by a reconnect.
    pub fn append_cycle(
        &self,
        device_id: &str,
        conn_key: &str,
        reading: &CycleReading,
        timestamp: &str,
    ) -> bool {
        if !self.owns_device(device_id, conn_key) {
            return false;
        }
        let record = self.devices.read().get(device_id).cloned();
        let Some(record) = record else {
            return false;
        };
        let mut record = record.lock();

        let buffers = &mut record.buffers;
        for &(raw, heart) in &reading.samples {
            buffers.raw.push(raw);
            buffers.heart.push(heart);
        }
        buffers.heart_rate.push(reading.heart_rate);
        buffers.resp_rate.push(reading.resp_rate);
        buffers.movement.push(reading.movement);
        buffers.outofbed.push(reading.outofbed);
        buffers.timestamp.push(timestamp.to_string());
        buffers.rssi_list.push(reading.rssi_dbm);
        buffers.enforce_cap(self.max_buffered_samples);

        let code = if reading.outofbed == 1 {
            -1
        } else if reading.movement != 0 {
            1
        } else {
            0
        };
        record.window.push_status(code, timestamp);
        true
    }

    /// Does `conn_key` currently serve `device_id`?
    fn owns_device(&self, device_id: &str, conn_key: &str) -> bool {
        self.device_conn.read().get(device_id).map(String::as_str) == Some(conn_key)
    }

    /// Atomically purge every trace of one session. All three maps are
    /// locked before any mutation so a concurrent lookup sees either the
    /// full record or nothing.
    pub fn remove(&self, conn_key: &str, device_id: &str) {
        let mut vitals = self.vitals.write();
        let mut devices = self.devices.write();
        let mut device_conn = self.device_conn.write();

        vitals.remove(conn_key);
        // a superseded session must not purge the device entries now owned
        // by its replacement
        if device_conn.get(device_id).map(String::as_str) == Some(conn_key) {
            device_conn.remove(device_id);
            devices.remove(device_id);
        }
    }

    /// Current live-vitals mapping, as pushed to the API layer.
    pub fn vitals_map(&self) -> HashMap<ConnKey, LiveVitals> {
        self.vitals.read().clone()
    }

    /// Reverse lookup: which connection currently serves this device?
    pub fn connection_for(&self, device_id: &str) -> Option<ConnKey> {
        self.device_conn.read().get(device_id).cloned()
    }

    /// Copy of the device's real-time rolling window.
    pub fn realtime_window(&self, device_id: &str) -> Option<RealtimeSnapshot> {
        let record = self.devices.read().get(device_id).cloned()?;
        let record = record.lock();
        Some(record.window.snapshot())
    }

    /// Copy of the device's accumulating buffers (test and diagnostics
    /// helper; the scheduler uses [`drain_buffers`](Self::drain_buffers)).
    pub fn buffers_snapshot(&self, device_id: &str) -> Option<DeviceBuffers> {
        let record = self.devices.read().get(device_id).cloned()?;
        let record = record.lock();
        Some(record.buffers.clone())
    }

    pub fn device_ids(&self) -> Vec<DeviceId> {
        self.devices.read().keys().cloned().collect()
    }

    /// Take every device's buffers, resetting them to empty, and append
    /// this minute's positive-mean heart/resp rates to each rolling window.
    /// Each device is drained under its own record lock, so no cycle can be
    /// appended between the copy and the reset.
    pub fn drain_buffers(&self, rate_timestamp: &str) -> Vec<(DeviceId, DeviceBuffers)> {
        let records: Vec<(DeviceId, Arc<Mutex<DeviceRecord>>)> = self
            .devices
            .read()
            .iter()
            .map(|(id, record)| (id.clone(), record.clone()))
            .collect();

        let mut drained = Vec::with_capacity(records.len());
        for (device_id, record) in records {
            let mut record = record.lock();
            let taken = std::mem::take(&mut record.buffers);
            let heart_avg = positive_mean(&taken.heart_rate);
            let resp_avg = positive_mean(&taken.resp_rate);
            record.window.push_rate(heart_avg, resp_avg, rate_timestamp);
            drop(record);
            drained.push((device_id, taken));
        }
        drained
    }

    /// Undo a drain whose snapshot write failed: the drained data goes back
    /// in front of anything appended since. Data for a device that
    /// disconnected in between is dropped.
    pub fn restore_buffers(&self, drained: Vec<(DeviceId, DeviceBuffers)>) {
        for (device_id, old) in drained {
            let record = self.devices.read().get(&device_id).cloned();
            match record {
                Some(record) => record.lock().buffers.restore_front(old),
                None => warn!(
                    device_id = %device_id,
                    "device disconnected during failed flush, dropping its drained data"
                ),
            }
        }
    }
}

/// Mean over the strictly positive samples, 0.0 if there are none.
fn positive_mean(values: &[u8]) -> f64 {
    let mut sum = 0u32;
    let mut count = 0u32;
    for &v in values {
        if v > 0 {
            sum += u32::from(v);
            count += 1;
        }
    }
    if count == 0 {
        0.0
    } else {
        f64::from(sum) / f64::from(count)
    }
}
