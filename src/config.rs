use std::path::PathBuf;
use std::time::Duration;

/// Size of the remote display in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub width: u32,
    pub height: u32,
}

impl Geometry {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for Geometry {
    fn default() -> Self {
        Self::new(1280, 720)
    }
}

/// How long to wait between reconnection attempts
#[derive(Debug, Clone, PartialEq)]
pub enum BackoffPolicy {
    /// Grow the delay by `factor` per failure up to `max`, forever
    Multiplicative {
        base: Duration,
        factor: f64,
        max: Duration,
    },
    /// Exponential with ±`jitter` spread, giving up after `max_retries`
    Jittered {
        base: Duration,
        max: Duration,
        jitter: f64,
        max_retries: u32,
    },
}

impl BackoffPolicy {
    pub fn jittered(max_retries: u32) -> Self {
        BackoffPolicy::Jittered {
            base: Duration::from_millis(1000),
            max: Duration::from_millis(30_000),
            jitter: 0.3,
            max_retries,
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy::Multiplicative {
            base: Duration::from_millis(1000),
            factor: 1.5,
            max: Duration::from_millis(30_000),
        }
    }
}

/// Every tunable of a receiver session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub host: String,
    pub port: u16,
    pub geometry: Geometry,
    /// Phone app build reported by INIT
    pub app_version: u32,
    /// Skip the hardware decoder
    pub force_software: bool,
    pub night: bool,
    pub heartbeat_interval: Duration,
    pub watchdog_timeout: Duration,
    /// Ask for a keyframe this long after open if nothing has arrived
    pub keyframe_check_delay: Duration,
    /// ACK is sent while fewer frames than this remain queued
    pub ack_threshold: usize,
    pub texture_pool_capacity: usize,
    /// Consecutive malformed messages that release direct mode
    pub unlatch_after: u32,
    /// Split legacy buffers that carry several NAL units
    pub split_concatenated_units: bool,
    pub backoff: BackoffPolicy,
    pub stats_interval: Duration,
    /// Number of one-second samples in the fps average
    pub fps_window: usize,
}

impl SessionConfig {
    pub fn url(&self) -> String {
        format!("wss://{}:{}", self.host, self.port)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host: "taada.top".to_string(),
            port: 8081,
            geometry: Geometry::default(),
            app_version: crate::protocol::MIN_APP_VERSION,
            force_software: false,
            night: false,
            heartbeat_interval: Duration::from_secs(1),
            watchdog_timeout: Duration::from_secs(10),
            keyframe_check_delay: Duration::from_secs(1),
            ack_threshold: 5,
            texture_pool_capacity: 5,
            unlatch_after: 3,
            split_concatenated_units: false,
            backoff: BackoffPolicy::default(),
            stats_interval: Duration::from_secs(1),
            fps_window: 10,
        }
    }
}

pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            let mut buf = PathBuf::from(home);
            buf.push(stripped);
            return buf;
        }
    }
    PathBuf::from(path)
}
