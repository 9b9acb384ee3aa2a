use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// ASCII identifier reported by the MCU, stable across reconnects
pub type DeviceId = String;

/// Connection key in `ip:port` form
pub type ConnKey = String;

/// Cap on the per-cycle status window (about 4 minutes of cycles).
pub const STATUS_WINDOW_CAP: usize = 24_000;
/// Cap on the per-minute averaged rate window (about 4 hours of points).
pub const RATE_WINDOW_CAP: usize = 240;

/// Connectivity of one MCU connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnStatus {
    /// Identified, polling, data flowing
    Connected,
    /// Registered but no data cycle seen yet
    Waiting,
    Disconnected,
}

/// Latest-known display state for one connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveVitals {
    pub heart_rate: u8,
    pub resp_rate: u8,
    pub movement: u8,
    pub outofbed: u8,
    pub autoscaling: u8,
    pub timestamp: String,
    /// Display bucket (-1..=4), not raw dBm
    pub rssi: i8,
    pub name: DeviceId,
    pub addr: ConnKey,
    pub status: ConnStatus,
}

impl LiveVitals {
    /// Placeholder record created at identity exchange, before the first
    /// data cycle arrives.
    pub fn waiting(name: &str, addr: &str) -> Self {
        Self {
            heart_rate: 0,
            resp_rate: 0,
            movement: 0,
            outofbed: 0,
            autoscaling: 0,
            timestamp: String::new(),
            rssi: -1,
            name: name.to_string(),
            addr: addr.to_string(),
            status: ConnStatus::Waiting,
        }
    }
}

/// Time series accumulated between snapshot flushes.
///
/// `raw`/`heart` grow by 0..=100 entries per poll cycle; every other field
/// gains exactly one entry per cycle. Field names match the snapshot file
/// layout consumed by the download/analysis services.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceBuffers {
    pub raw: Vec<u16>,
    pub heart: Vec<u16>,
    pub heart_rate: Vec<u8>,
    pub resp_rate: Vec<u8>,
    pub movement: Vec<u8>,
    pub outofbed: Vec<u8>,
    pub timestamp: Vec<String>,
    pub rssi_list: Vec<i8>,
}

impl DeviceBuffers {
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty() && self.heart_rate.is_empty()
    }

    /// Number of poll cycles currently buffered.
    pub fn cycle_count(&self) -> usize {
        self.heart_rate.len()
    }

    /// Trim oldest-first so a stalled scheduler cannot grow the buffers
    /// without bound. `max_samples` bounds the waveform vectors; the
    /// per-cycle vectors are bounded proportionally (one cycle delivers at
    /// most 100 waveform samples).
    pub fn enforce_cap(&mut self, max_samples: usize) {
        for samples in [&mut self.raw, &mut self.heart] {
            if samples.len() > max_samples {
                let excess = samples.len() - max_samples;
                samples.drain(..excess);
            }
        }
        let max_cycles = max_samples / 100;
        let len = self.heart_rate.len();
        if len > max_cycles {
            let excess = len - max_cycles;
            self.heart_rate.drain(..excess);
            self.resp_rate.drain(..excess);
            self.movement.drain(..excess);
            self.outofbed.drain(..excess);
            self.timestamp.drain(..excess);
            self.rssi_list.drain(..excess);
        }
    }

    /// Put `older` data back in front of whatever accumulated since it was
    /// drained. Used when a snapshot write fails so nothing is silently
    /// dropped.
    pub fn restore_front(&mut self, mut older: DeviceBuffers) {
        older.raw.append(&mut self.raw);
        self.raw = older.raw;
        older.heart.append(&mut self.heart);
        self.heart = older.heart;
        older.heart_rate.append(&mut self.heart_rate);
        self.heart_rate = older.heart_rate;
        older.resp_rate.append(&mut self.resp_rate);
        self.resp_rate = older.resp_rate;
        older.movement.append(&mut self.movement);
        self.movement = older.movement;
        older.outofbed.append(&mut self.outofbed);
        self.outofbed = older.outofbed;
        older.timestamp.append(&mut self.timestamp);
        self.timestamp = older.timestamp;
        older.rssi_list.append(&mut self.rssi_list);
        self.rssi_list = older.rssi_list;
    }
}

/// Bounded short-term history backing the real-time charts.
///
/// Two series with independent caps: one status code per poll cycle, and one
/// averaged heart/resp pair per flushed minute. Oldest entries are evicted
/// on overflow.
#[derive(Debug, Default)]
pub struct RealtimeWindow {
    status: VecDeque<i8>,
    status_timestamp: VecDeque<String>,
    heart_rate: VecDeque<f64>,
    resp_rate: VecDeque<f64>,
    rate_timestamp: VecDeque<String>,
}

impl RealtimeWindow {
    /// Append one per-cycle status code: -1 out of bed, 0 measuring,
    /// +1 movement.
    pub fn push_status(&mut self, code: i8, timestamp: &str) {
        if self.status.len() >= STATUS_WINDOW_CAP {
            self.status.pop_front();
            self.status_timestamp.pop_front();
        }
        self.status.push_back(code);
        self.status_timestamp.push_back(timestamp.to_string());
    }

    /// Append one per-minute averaged heart/resp point.
    pub fn push_rate(&mut self, heart_rate: f64, resp_rate: f64, timestamp: &str) {
        if self.heart_rate.len() >= RATE_WINDOW_CAP {
            self.heart_rate.pop_front();
            self.resp_rate.pop_front();
            self.rate_timestamp.pop_front();
        }
        self.heart_rate.push_back(heart_rate);
        self.resp_rate.push_back(resp_rate);
        self.rate_timestamp.push_back(timestamp.to_string());
    }

    pub fn status_len(&self) -> usize {
        self.status.len()
    }

    /// Serializable copy in the shape the real-time chart endpoint expects.
    pub fn snapshot(&self) -> RealtimeSnapshot {
        RealtimeSnapshot {
            heart_rate: self.heart_rate.iter().copied().collect(),
            resp_rate: self.resp_rate.iter().copied().collect(),
            rate_timestamp: self.rate_timestamp.iter().cloned().collect(),
            status: self.status.iter().copied().collect(),
            status_timestamp: self.status_timestamp.iter().cloned().collect(),
        }
    }
}

/// Point-in-time copy of a device's [`RealtimeWindow`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeSnapshot {
    pub heart_rate: Vec<f64>,
    pub resp_rate: Vec<f64>,
    pub rate_timestamp: Vec<String>,
    pub status: Vec<i8>,
    pub status_timestamp: Vec<String>,
}
