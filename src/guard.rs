//! Watchdog bounding one full register sweep

use core::time::Duration;

use crate::config::PollingConfig;

/// What to do about a stalled sweep
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StallAction {
    /// Start over from scratch, reading the identity registers too
    Restart,
    /// Restart budget is gone, stop hammering the device
    GiveUp,
}

#[derive(Copy, Clone, Debug)]
pub struct TimeoutGuard {
    timeout: Duration,
    max_restarts: u8,
    restarts_left: u8,
    armed: bool,
}

impl TimeoutGuard {
    pub fn new(config: &PollingConfig) -> Self {
        Self {
            timeout: config.read_timeout,
            max_restarts: config.max_stall_restarts,
            restarts_left: config.max_stall_restarts,
            armed: false,
        }
    }

    /// Marks the guard armed and returns the timeout to program
    pub fn arm(&mut self) -> Duration {
        self.armed = true;
        self.timeout
    }

    /// Returns whether the guard was armed
    pub fn disarm(&mut self) -> bool {
        core::mem::replace(&mut self.armed, false)
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn restarts_left(&self) -> u8 {
        self.restarts_left
    }

    /// Spends one restart from the budget if there is any left
    pub fn charge_restart(&mut self) -> StallAction {
        if self.restarts_left == 0 {
            return StallAction::GiveUp;
        }

        self.restarts_left -= 1;
        StallAction::Restart
    }

    /// The timer fired
    pub fn on_expired(&mut self) -> StallAction {
        self.armed = false;
        self.charge_restart()
    }

    /// A sweep made it to the end
    pub fn record_success(&mut self) {
        self.restarts_left = self.max_restarts;
    }
}

impl Default for TimeoutGuard {
    fn default() -> Self {
        Self::new(&PollingConfig::default())
    }
}
