//! Connection configuration.
//!
//! [`ConnectionConfig`] carries every tunable of a connection. It can be
//! built in code through [`ConnectionBuilder`](crate::ConnectionBuilder) or
//! loaded from JSON; missing fields take their defaults.
//!
//! # Example
//!
//! ```
//! use kvwire_client::ConnectionConfig;
//!
//! let config = ConnectionConfig::from_json(r#"{ "request_timeout_ms": 250 }"#).unwrap();
//! assert_eq!(config.request_timeout_ms, Some(250));
//! assert_eq!(config.max_pending, 65_536);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{KvError, Result};
use crate::protocol::{ABSOLUTE_MAX_FRAME_SIZE, DEFAULT_MAX_FRAME_SIZE};
use crate::writer::{
    WriterConfig, DEFAULT_BACKPRESSURE_TIMEOUT, DEFAULT_CHANNEL_CAPACITY,
    DEFAULT_MAX_PENDING_FRAMES,
};

/// Default maximum number of requests awaiting a response.
pub const DEFAULT_MAX_PENDING: usize = 65_536;

/// Default interval of the deadline sweep.
pub const DEFAULT_TIMEOUT_SWEEP_INTERVAL: Duration = Duration::from_millis(10);

/// Default socket read buffer size.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 64 * 1024;

/// Tunables for one connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Maximum requests awaiting a response.
    pub max_pending: usize,
    /// Maximum frames queued for the writer before backpressure applies.
    pub max_pending_frames: usize,
    /// Capacity of the writer channel.
    pub channel_capacity: usize,
    /// How long a send waits for backpressure to clear.
    pub backpressure_timeout_ms: u64,
    /// Per-request deadline. `None` disables deadlines.
    pub request_timeout_ms: Option<u64>,
    /// How often expired requests are swept.
    pub timeout_sweep_interval_ms: u64,
    /// Largest frame payload accepted in either direction.
    pub max_frame_size: u32,
    /// Size of the socket read buffer.
    pub read_buffer_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_pending: DEFAULT_MAX_PENDING,
            max_pending_frames: DEFAULT_MAX_PENDING_FRAMES,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            backpressure_timeout_ms: DEFAULT_BACKPRESSURE_TIMEOUT.as_millis() as u64,
            request_timeout_ms: None,
            timeout_sweep_interval_ms: DEFAULT_TIMEOUT_SWEEP_INTERVAL.as_millis() as u64,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }
}

impl ConnectionConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every value is usable.
    pub fn validate(&self) -> Result<()> {
        let non_zero = [
            ("max_pending", self.max_pending as u64),
            ("max_pending_frames", self.max_pending_frames as u64),
            ("channel_capacity", self.channel_capacity as u64),
            ("timeout_sweep_interval_ms", self.timeout_sweep_interval_ms),
            ("max_frame_size", u64::from(self.max_frame_size)),
            ("read_buffer_size", self.read_buffer_size as u64),
        ];
        for (name, value) in non_zero {
            if value == 0 {
                return Err(KvError::Config(format!("{} must be greater than 0", name)));
            }
        }

        if self.request_timeout_ms == Some(0) {
            return Err(KvError::Config(
                "request_timeout_ms must be greater than 0".into(),
            ));
        }

        if self.max_frame_size > ABSOLUTE_MAX_FRAME_SIZE {
            return Err(KvError::Config(format!(
                "max_frame_size {} exceeds absolute maximum {}",
                self.max_frame_size, ABSOLUTE_MAX_FRAME_SIZE
            )));
        }

        Ok(())
    }

    /// Per-request deadline, if enabled.
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }

    /// Interval of the deadline sweep.
    pub fn timeout_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.timeout_sweep_interval_ms)
    }

    /// Settings for the writer task.
    pub fn writer_config(&self) -> WriterConfig {
        WriterConfig {
            max_pending_frames: self.max_pending_frames,
            channel_capacity: self.channel_capacity,
            backpressure_timeout: Duration::from_millis(self.backpressure_timeout_ms),
        }
    }
}
