//! When to poll next

use core::time::Duration;

use crate::config::PollingConfig;
use crate::snapshot::BatterySnapshot;

/// What to do once a sweep has finished
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NextPoll {
    /// Debug mode with a zero override: go again right away
    Immediately,
    /// Arm the poll timer
    After(Duration),
    /// Leave the poll timer off until an external event asks for a poll
    WaitForEvent,
}

/// Picks the polling cadence. Owns its intervals, so two monitors never
/// step on each other's settings
#[derive(Copy, Clone, Debug)]
pub struct PollScheduler {
    default_interval: Duration,
    quick_interval: Duration,
    polling_override: Option<u32>,
    quick: bool,
    initial_polls_left: u8,
}

impl PollScheduler {
    pub fn new(config: &PollingConfig) -> Self {
        Self {
            default_interval: config.default_interval,
            quick_interval: config.quick_interval,
            polling_override: config.polling_override,
            quick: false,
            initial_polls_left: config.initial_polls,
        }
    }

    pub fn is_overridden(&self) -> bool {
        self.polling_override.is_some()
    }

    pub fn is_quick(&self) -> bool {
        self.quick
    }

    /// Debug override in seconds. `Some(0)` polls back to back, `None`
    /// returns to the automatic cadence
    pub fn set_override(&mut self, seconds: Option<u32>) {
        self.polling_override = seconds;
    }

    /// Changes the regular cadence. Has no effect while overridden
    pub fn set_default_interval(&mut self, interval: Duration) {
        if !self.is_overridden() {
            self.default_interval = interval;
        }
    }

    /// Interval the poll timer would be armed with right now
    pub fn interval(&self) -> Duration {
        match self.polling_override {
            Some(seconds) => Duration::from_secs(seconds as u64),
            None if self.quick => self.quick_interval,
            None => self.default_interval,
        }
    }

    /// Quick polling covers a pack under 5% while AC is reported connected,
    /// which in practice is an inflow-disabled drain. An unknown full charge
    /// capacity keeps the previous choice
    fn select_interval(&mut self, snapshot: &BatterySnapshot) {
        if self.is_overridden() {
            return;
        }

        if let Some(percent) = snapshot.charge_percent() {
            self.quick = percent < 5 && snapshot.ac_connected;
        }
    }

    pub fn on_sequence_complete(&mut self, snapshot: &BatterySnapshot) -> NextPoll {
        self.select_interval(snapshot);

        if self.polling_override == Some(0) {
            return NextPoll::Immediately;
        }

        // An idle, fully charged pack on AC needs no refresh until something
        // changes, once the boot-time polls are done
        let keep_polling = self.initial_polls_left > 0
            || !snapshot.ac_connected
            || (!snapshot.fully_charged && snapshot.present)
            || self.is_overridden();

        if !keep_polling {
            debug!("letting the poll timer expire");
            return NextPoll::WaitForEvent;
        }

        self.initial_polls_left = self.initial_polls_left.saturating_sub(1);

        NextPoll::After(self.interval())
    }
}

impl Default for PollScheduler {
    fn default() -> Self {
        Self::new(&PollingConfig::default())
    }
}
