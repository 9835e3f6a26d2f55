//! Tunables for syncers and socket cleaners

use serde::{Deserialize, Serialize};

/// Default number of offsets in the jitter window
pub const ROLLING_VARIANCE_SAMPLE_SIZE: usize = 10;
/// Offset standard deviation (ms) above which a slow down is requested
pub const SLOW_DOWN_THRESHOLD_MS: f64 = 50.0;
/// Minimum spacing between slow down requests
pub const SLOW_DOWN_MIN_WAIT_MS: u64 = 5_000;
/// Quiet period after which a speed up is requested
pub const SPEED_UP_QUIET_TIME_MS: u64 = 30_000;
/// Offset increase above which the extrapolator takes over
pub const EXTRAPOLATION_THRESHOLD_MS: f64 = 20.0;
/// Factor applied to the update interval on less/more data requests
pub const RATE_ADJUSTMENT: f64 = 1.2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CleanerConfig {
    pub rolling_variance_sample_size: usize,
    pub slow_down_threshold: f64,
    pub slow_down_min_wait: u64,
    pub speed_up_quiet_time: u64,
    pub extrapolation_threshold: f64,
}

impl Default for CleanerConfig {
    fn default() -> Self {
        Self {
            rolling_variance_sample_size: ROLLING_VARIANCE_SAMPLE_SIZE,
            slow_down_threshold: SLOW_DOWN_THRESHOLD_MS,
            slow_down_min_wait: SLOW_DOWN_MIN_WAIT_MS,
            speed_up_quiet_time: SPEED_UP_QUIET_TIME_MS,
            extrapolation_threshold: EXTRAPOLATION_THRESHOLD_MS,
        }
    }
}

/// Options for [`WorldSyncer::connect`](crate::WorldSyncer::connect).
///
/// With `update_interval` set, outbound changes are coalesced and flushed once
/// per interval instead of being sent as they happen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncOptions {
    pub update_interval: Option<f64>,
    pub socket_cleaner: bool,
    pub cleaner: CleanerConfig,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            update_interval: None,
            socket_cleaner: true,
            cleaner: CleanerConfig::default(),
        }
    }
}

impl SyncOptions {
    pub fn with_update_interval(mut self, interval_ms: f64) -> Self {
        self.update_interval = Some(interval_ms);
        self
    }

    pub fn without_socket_cleaner(mut self) -> Self {
        self.socket_cleaner = false;
        self
    }
}
