//! Tunables of the poller. Hosts usually keep the defaults and only feed the
//! debug polling override through
//! [`BatteryMonitor::set_polling_override`](crate::BatteryMonitor::set_polling_override)

use core::time::Duration;

/// Number of entries in the retry delay table, which is also the retry budget
pub const RETRY_ATTEMPTS: usize = 5;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PollingConfig {
    /// Regular cadence
    pub default_interval: Duration,
    /// Cadence while draining a nearly empty pack with AC attached
    pub quick_interval: Duration,
    /// Ceiling for one full register sweep
    pub read_timeout: Duration,
    /// Consecutive stall-triggered restarts before giving up
    pub max_stall_restarts: u8,
    /// Polls that are always rescheduled after startup, whatever the charge state
    pub initial_polls: u8,
    /// Delay before the n-th consecutive retry of the same command
    pub retry_delays: [Duration; RETRY_ATTEMPTS],
    /// Delays shorter than this are busy-waited, longer ones go through the retry timer
    pub busy_wait_threshold: Duration,
    /// Debug override in seconds. Zero polls back to back
    pub polling_override: Option<u32>,
}

impl PollingConfig {
    pub const fn new() -> Self {
        Self {
            default_interval: Duration::from_secs(30),
            quick_interval: Duration::from_secs(1),
            read_timeout: Duration::from_secs(10),
            max_stall_restarts: 10,
            initial_polls: 5,
            retry_delays: [
                Duration::from_micros(10),
                Duration::from_micros(100),
                Duration::from_millis(1),
                Duration::from_millis(10),
                Duration::from_millis(250),
            ],
            busy_wait_threshold: Duration::from_millis(1),
            polling_override: None,
        }
    }

    pub const fn with_polling_override(mut self, seconds: Option<u32>) -> Self {
        self.polling_override = seconds;
        self
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self::new()
    }
}
