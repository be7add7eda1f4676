//! The polling engine.
//!
//! [`BatteryMonitor`] is driven entirely by its host: every public method is
//! one event (a transaction completed, a timer fired, a battery was plugged
//! in...) and must be called from the same serialized context that delivers
//! transaction completions. Nothing here blocks except the sub-millisecond
//! retry delays, which are busy-waited on the provided [`DelayNs`].

use core::time::Duration;

use embedded_hal::delay::DelayNs;

use crate::config::PollingConfig;
use crate::error::{ErrorKind, ReadError};
use crate::guard::{StallAction, TimeoutGuard};
use crate::retry::{RetryPolicy, Verdict};
use crate::scheduler::{NextPoll, PollScheduler};
use crate::sequence::{self, DecodeContext, MachinePath, PollSession, SequenceState, Transition};
use crate::snapshot::BatterySnapshot;
use crate::transaction::{Completion, Request, Status, Transport};

/// Timers the host runs on behalf of the monitor. Expiry is reported back
/// through [`BatteryMonitor::on_timer`]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimerId {
    /// Next automatic poll
    Poll,
    /// Ceiling for one full sweep
    ReadTimeout,
    /// Delayed retry of a failed transaction
    Retry,
}

pub trait Timers {
    /// (Re)arms a one-shot timer, replacing any pending expiry
    fn arm(&mut self, timer: TimerId, after: Duration);
    fn cancel(&mut self, timer: TimerId);
}

/// Consumer of finished snapshots
pub trait SnapshotSink {
    fn publish(&mut self, snapshot: &BatterySnapshot);

    /// AC adapter plugged or unplugged, as seen by the latest read
    fn ac_adapter_changed(&mut self, _connected: bool) {}

    /// The pack just reported itself fully discharged. Platforms use this to
    /// lift inflow-disable
    fn full_discharge(&mut self) {}
}

pub struct BatteryMonitor<T, K, S, D> {
    transport: T,
    timers: K,
    sink: S,
    delay: D,
    config: PollingConfig,
    session: PollSession,
    ctx: DecodeContext,
    retry: RetryPolicy,
    scheduler: PollScheduler,
    guard: TimeoutGuard,
    /// Accumulates the sweep in progress
    working: BatterySnapshot,
    /// What consumers last saw
    published: BatterySnapshot,
}

impl<T, K, S, D> BatteryMonitor<T, K, S, D>
where
    T: Transport,
    K: Timers,
    S: SnapshotSink,
    D: DelayNs,
{
    /// Creates the monitor. Nothing happens on the bus until [`start`](Self::start)
    pub fn new(transport: T, timers: K, sink: S, delay: D, config: PollingConfig) -> Self {
        Self {
            transport,
            timers,
            sink,
            delay,
            retry: RetryPolicy::new(&config),
            scheduler: PollScheduler::new(&config),
            guard: TimeoutGuard::new(&config),
            config,
            session: PollSession::new(MachinePath::NewBattery),
            ctx: DecodeContext::default(),
            working: BatterySnapshot::default(),
            published: BatterySnapshot::default(),
        }
    }

    /// Kicks off the first full sweep
    pub fn start(&mut self) {
        info!("battery monitor starting");
        self.request_poll(MachinePath::NewBattery);
    }

    /// Last published snapshot
    pub fn snapshot(&self) -> &BatterySnapshot {
        &self.published
    }

    pub fn session(&self) -> &PollSession {
        &self.session
    }

    pub fn config(&self) -> &PollingConfig {
        &self.config
    }

    pub fn is_polling(&self) -> bool {
        self.session.active
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn timers(&self) -> &K {
        &self.timers
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn delay(&self) -> &D {
        &self.delay
    }

    /// Asks for a sweep. If one is already running it is restarted from the
    /// first register at the next transaction boundary; two sweeps never
    /// run at once
    pub fn request_poll(&mut self, path: MachinePath) {
        if self.session.stalled {
            debug!("poll request ignored, bus is stalled");
            return;
        }
        if self.session.awaiting_insertion {
            debug!("poll request ignored, no battery until the next insertion");
            return;
        }

        if !self.session.active {
            self.session.path = path;
            self.begin_sequence();
        } else if self.session.outstanding.is_some() {
            self.session.restart_requested = true;

            // Cancelled sweeps run without a watchdog. The restart needs one
            // in case the outstanding transaction never completes
            if !self.guard.is_armed() {
                let timeout = self.guard.arm();
                self.timers.arm(TimerId::ReadTimeout, timeout);
            }
        } else {
            // Only a delayed retry is pending, so this is a boundary already
            self.timers.cancel(TimerId::Retry);
            self.restart_sequence();
        }
    }

    /// Feeds back the result of the request last handed to the transport
    pub fn on_transaction_complete(&mut self, completion: Completion) {
        match self.session.outstanding {
            Some(request) if request == completion.request => {}
            _ => {
                debug!(
                    "dropping stale completion for cmd {:#x}",
                    completion.request.command
                );
                return;
            }
        }
        self.session.outstanding = None;

        trace!(
            "state {:?}: status {:?}, {} bytes",
            self.session.state,
            completion.status,
            completion.data.len()
        );

        if self.session.restart_requested {
            self.restart_sequence();
            return;
        }

        if self.session.cancel_requested {
            debug!("sweep cancelled");
            self.session.cancel_requested = false;
            self.session.active = false;
            return;
        }

        if completion.status == Status::Aborted {
            warn!("transport aborted cmd {:#x}", completion.request.command);
            match self.guard.charge_restart() {
                StallAction::Restart => self.begin_sequence(),
                StallAction::GiveUp => self.give_up(),
            }
            return;
        }

        let state = self.session.state;
        let verdict = self.retry.evaluate(
            &mut self.session,
            state,
            &completion,
            self.working.fully_discharged,
        );

        match verdict {
            Verdict::Retry(delay) => self.schedule_retry(completion.request, delay),
            Verdict::Proceed(error) => {
                if let Some(error) = error {
                    self.record(error);
                }
                let reading = completion.status.is_ok().then_some(&completion);
                self.step(reading);
            }
        }
    }

    pub fn on_timer(&mut self, timer: TimerId) {
        match timer {
            TimerId::Poll => {
                if !self.session.active {
                    self.request_poll(MachinePath::ExistingBattery);
                }
            }
            TimerId::ReadTimeout => self.on_read_timeout(),
            TimerId::Retry => {
                if let Some(request) = self.session.retry_pending.take() {
                    self.reissue(request);
                }
            }
        }
    }

    pub fn battery_inserted(&mut self) {
        info!("battery inserted");
        self.session.awaiting_insertion = false;
        self.working.permanent_failure = false;
        self.request_poll(MachinePath::NewBattery);
    }

    /// Drops the sweep in progress and reports the battery gone. Polling
    /// stays off until [`battery_inserted`](Self::battery_inserted)
    pub fn battery_removed(&mut self) {
        info!("battery removed");

        if self.session.active {
            self.cancel_sequence();
        }
        self.timers.cancel(TimerId::Poll);
        self.session.awaiting_insertion = true;

        self.working.clear_battery();
        self.publish();
    }

    /// Someone else needs the bus. While stalled no transaction is issued
    pub fn set_stalled(&mut self, stalled: bool) {
        if stalled {
            info!("bus stalled by external request");
            self.session.stalled = true;
            self.timers.cancel(TimerId::Poll);

            if self.session.active {
                self.cancel_sequence();
            }
        } else {
            info!("bus released");
            self.session.stalled = false;
            self.request_poll(MachinePath::NewBattery);
        }
    }

    pub fn set_inflow_disabled(&mut self, disabled: bool) {
        self.ctx.inflow_disabled = disabled;
        self.request_poll(MachinePath::ExistingBattery);
    }

    pub fn set_charge_inhibited(&mut self, inhibited: bool) {
        self.ctx.charge_inhibited = inhibited;
        self.request_poll(MachinePath::ExistingBattery);
    }

    /// Debug polling period in seconds, `Some(0)` for back to back polling
    pub fn set_polling_override(&mut self, seconds: Option<u32>) {
        self.scheduler.set_override(seconds);

        if self.session.active || self.session.stalled || self.session.awaiting_insertion {
            return;
        }

        match seconds {
            Some(0) => self.request_poll(MachinePath::NewBattery),
            _ => self.timers.arm(TimerId::Poll, self.scheduler.interval()),
        }
    }

    pub fn set_default_interval(&mut self, interval: Duration) {
        self.scheduler.set_default_interval(interval);
    }

    fn begin_sequence(&mut self) {
        let path = self.session.path;
        self.session.reset(path);
        self.session.active = true;

        debug!("starting {:?} sweep", path);

        // A sweep triggered by an event replaces the scheduled one
        self.timers.cancel(TimerId::Poll);
        self.timers.cancel(TimerId::Retry);
        self.timers.cancel(TimerId::ReadTimeout);
        let timeout = self.guard.arm();
        self.timers.arm(TimerId::ReadTimeout, timeout);

        self.step(None);
    }

    /// Mid-sweep restarts always re-read the pack identity
    fn restart_sequence(&mut self) {
        self.session.path = MachinePath::NewBattery;
        self.begin_sequence();
    }

    fn cancel_sequence(&mut self) {
        self.timers.cancel(TimerId::ReadTimeout);
        self.guard.disarm();
        self.session.restart_requested = false;

        if self.session.outstanding.is_some() {
            // The pending transaction cannot be recalled, its completion
            // will be swallowed instead
            self.session.cancel_requested = true;
        } else {
            self.timers.cancel(TimerId::Retry);
            self.session.retry_pending = None;
            self.session.active = false;
        }
    }

    fn on_read_timeout(&mut self) {
        if !self.guard.is_armed() {
            return;
        }

        self.record(ReadError::new(ErrorKind::OverallTimeout));

        match self.guard.on_expired() {
            StallAction::Restart => {
                // Whatever was on the bus is presumed lost
                self.session.outstanding = None;
                self.restart_sequence();
            }
            StallAction::GiveUp => self.give_up(),
        }
    }

    /// The device does not answer: stop and report the battery absent
    fn give_up(&mut self) {
        error!("battery unresponsive, giving up until the next event");

        self.timers.cancel(TimerId::Retry);
        self.timers.cancel(TimerId::ReadTimeout);
        self.guard.disarm();
        self.session.outstanding = None;
        self.session.retry_pending = None;
        self.session.active = false;

        self.working.clear_battery();
        self.publish();
    }

    fn schedule_retry(&mut self, request: Request, delay: Duration) {
        if delay < self.config.busy_wait_threshold {
            self.delay
                .delay_us(u32::try_from(delay.as_micros()).unwrap_or(u32::MAX));
            self.reissue(request);
        } else {
            self.session.retry_pending = Some(request);
            self.timers.arm(TimerId::Retry, delay);
        }
    }

    /// Decodes the reading for the current state and moves on
    fn step(&mut self, reading: Option<&Completion>) {
        let state = self.session.state;
        let ac_before = self.working.ac_connected;
        let discharged_before = self.working.fully_discharged;

        let step = sequence::advance(state, self.session.path, reading, self.ctx, &mut self.working);

        if let Some(error) = step.error {
            self.record(error);
        }

        if state == SequenceState::ControllerStatus && ac_before != self.working.ac_connected {
            self.sink.ac_adapter_changed(self.working.ac_connected);
        }
        if state == SequenceState::BatteryStatus && !discharged_before && self.working.fully_discharged {
            self.sink.full_discharge();
        }

        match step.next {
            Transition::Read(next) => {
                self.session.state = next;
                self.issue(next);
            }
            Transition::Absent => self.finish_absent(),
            Transition::PermanentFailure => self.finish_failed(),
            Transition::Complete => self.finish(),
        }
    }

    fn issue(&mut self, state: SequenceState) {
        if let Some(request) = state.request(self.session.tag) {
            self.reissue(request);
        }
    }

    fn reissue(&mut self, request: Request) {
        if self.session.stalled {
            debug!("not issuing cmd {:#x}, bus is stalled", request.command);
            self.timers.cancel(TimerId::ReadTimeout);
            self.guard.disarm();
            self.session.active = false;
            return;
        }

        self.session.outstanding = Some(request);
        self.transport.begin_transaction(request);
    }

    fn stop_sweep(&mut self) {
        self.timers.cancel(TimerId::ReadTimeout);
        self.guard.disarm();
        self.session.active = false;
    }

    fn finish(&mut self) {
        self.stop_sweep();
        self.guard.record_success();
        self.working.permanent_failure = false;

        let next = self.scheduler.on_sequence_complete(&self.working);
        self.working.quick_poll = self.scheduler.is_quick();
        self.publish();

        match next {
            NextPoll::Immediately => self.request_poll(MachinePath::NewBattery),
            NextPoll::After(interval) => self.timers.arm(TimerId::Poll, interval),
            NextPoll::WaitForEvent => {}
        }
    }

    /// No battery behind the manager. Nothing more to read until one shows up
    fn finish_absent(&mut self) {
        debug!("no battery present");
        self.stop_sweep();
        self.session.awaiting_insertion = true;
        self.working.clear_battery();
        self.publish();
    }

    fn finish_failed(&mut self) {
        self.stop_sweep();
        self.timers.cancel(TimerId::Poll);
        self.session.awaiting_insertion = true;

        self.working.clear_battery();
        self.working.permanent_failure = true;
        self.publish();
    }

    fn record(&mut self, error: ReadError) {
        error.log();
        self.working.last_error = Some(error);
    }

    fn publish(&mut self) {
        self.working.refresh_legacy_flags();
        self.published = self.working.clone();
        self.sink.publish(&self.published);
    }
}
