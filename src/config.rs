use chrono::FixedOffset;
use std::env;
use std::path::PathBuf;

/// Server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (0.0.0.0 for LAN, 127.0.0.1 for localhost)
    pub bind_addr: String,
    /// TCP port the MCUs dial in to
    pub port: u16,
    /// Root directory for per-day snapshot files
    pub snapshot_dir: PathBuf,
    /// Wall-clock timezone used for timestamps and flush alignment
    pub timezone: FixedOffset,
    /// Per-read timeout during polling, in seconds
    pub read_timeout_seconds: u64,
    /// Pacing delay between poll cycles, in milliseconds
    pub poll_interval_ms: u64,
    /// Defensive cap on buffered waveform samples per device
    pub max_buffered_samples: usize,
    /// Capacity of the push-notification broadcast channel
    pub event_capacity: usize,
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let tz_offset_hours: i32 = env::var("TZ_OFFSET_HOURS")
            .unwrap_or_else(|_| "8".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("TZ_OFFSET_HOURS must be an integer".to_string()))?;
        let timezone = FixedOffset::east_opt(tz_offset_hours * 3600).ok_or_else(|| {
            ConfigError::InvalidValue("TZ_OFFSET_HOURS must be within -23..=23".to_string())
        })?;

        Ok(Self {
            bind_addr: env::var("BEDMON_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("BEDMON_PORT")
                .unwrap_or_else(|_| "5001".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidPort)?,
            snapshot_dir: env::var("SNAPSHOT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/app/snapshots")),
            timezone,
            read_timeout_seconds: env::var("READ_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .unwrap_or(10),
            poll_interval_ms: env::var("POLL_INTERVAL_MS")
                .unwrap_or_else(|_| "500".to_string())
                .parse()
                .unwrap_or(500),
            max_buffered_samples: env::var("MAX_BUFFERED_SAMPLES")
                .unwrap_or_else(|_| "60000".to_string())
                .parse()
                .unwrap_or(60_000),
            event_capacity: env::var("EVENT_CAPACITY")
                .unwrap_or_else(|_| "1024".to_string())
                .parse()
                .unwrap_or(1024),
        })
    }

    /// Get the full bind address (addr:port)
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid port number")]
    InvalidPort,
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_address_joins_addr_and_port() {
        let config = ServerConfig {
            bind_addr: "127.0.0.1".to_string(),
            port: 5001,
            snapshot_dir: PathBuf::from("/tmp"),
            timezone: FixedOffset::east_opt(8 * 3600).unwrap(),
            read_timeout_seconds: 10,
            poll_interval_ms: 500,
            max_buffered_samples: 60_000,
            event_capacity: 1024,
        };
        assert_eq!(config.bind_address(), "127.0.0.1:5001");
    }
}
