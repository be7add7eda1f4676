//! Decides what happens to a finished transaction before the sequencer sees
//! it: retry it, give up on it, or let it through

use core::time::Duration;

use crate::config::{PollingConfig, RETRY_ATTEMPTS};
use crate::error::{ErrorKind, ReadError};
use crate::sequence::{PollSession, SequenceState};
use crate::transaction::{Completion, Status};

/// How a bus status is handled
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StatusClass {
    /// Transient, worth another try
    Retryable,
    /// Logged and not retried
    NonRecoverable,
    /// Not retried. The state still takes its failure path unless the
    /// status is [`Status::Ok`]
    Ok,
}

pub fn classify(status: Status) -> StatusClass {
    match status {
        Status::DeviceAddressNotAcknowledged
        | Status::DeviceCommandAccessDenied
        | Status::DeviceAccessDenied
        | Status::UnknownHostError
        | Status::UnknownFailure
        | Status::DeviceError
        | Status::Timeout
        | Status::Busy => StatusClass::Retryable,
        Status::HostUnsupportedProtocol | Status::PecError => StatusClass::NonRecoverable,
        _ => StatusClass::Ok,
    }
}

/// Outcome of [`RetryPolicy::evaluate`]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Verdict {
    /// Re-issue the same request after the delay
    Retry(Duration),
    /// Hand the completion to the sequencer. Carries the error to record, if any
    Proceed(Option<ReadError>),
}

#[derive(Copy, Clone, Debug)]
pub struct RetryPolicy {
    delays: [Duration; RETRY_ATTEMPTS],
}

impl RetryPolicy {
    pub fn new(config: &PollingConfig) -> Self {
        Self {
            delays: config.retry_delays,
        }
    }

    /// Delay before the retry following `attempts` earlier retries
    pub fn delay_for(&self, attempts: u8) -> Duration {
        self.delays[(attempts as usize).min(RETRY_ATTEMPTS - 1)]
    }

    /// Judges a completion for `state`. Bumps or resets the retry counter
    /// held in the session.
    ///
    /// A zero capacity is absurd for full-charge and design capacity, and
    /// for remaining capacity unless the pack already says it is fully
    /// discharged; such reads are retried like bus errors.
    pub fn evaluate(
        &self,
        session: &mut PollSession,
        state: SequenceState,
        completion: &Completion,
        fully_discharged: bool,
    ) -> Verdict {
        let mut needs_retry = false;
        let mut error = None;

        match classify(completion.status) {
            StatusClass::Retryable => needs_retry = true,
            StatusClass::NonRecoverable => {
                error = Some(ReadError::for_transaction(
                    ErrorKind::NonRecoverableStatus,
                    completion,
                ));
            }
            StatusClass::Ok => {}
        }

        if completion.status.is_ok() {
            if state.zero_is_absurd(fully_discharged) && completion.word() == 0 {
                debug!(
                    "retrying cmd {:#x}: absurd value zero",
                    completion.request.command
                );
                needs_retry = true;
            } else if session.retry_attempts != 0 {
                debug!(
                    "cmd {:#x} succeeded on retry {}",
                    completion.request.command, session.retry_attempts
                );
                session.retry_attempts = 0;
            }
        }

        if needs_retry && session.retry_attempts as usize >= RETRY_ATTEMPTS {
            info!(
                "giving up on ({:#x}, {:#x}) after {} retries",
                completion.request.address, completion.request.command, session.retry_attempts
            );
            session.retry_attempts = 0;
            return Verdict::Proceed(Some(ReadError::for_transaction(
                ErrorKind::RetryAttemptsExceeded,
                completion,
            )));
        }

        if needs_retry {
            let delay = self.delay_for(session.retry_attempts);
            session.retry_attempts += 1;

            debug!(
                "cmd {:#x} failed with {:?}; retry {} of {}",
                completion.request.command,
                completion.status,
                session.retry_attempts,
                RETRY_ATTEMPTS
            );

            return Verdict::Retry(delay);
        }

        Verdict::Proceed(error)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(&PollingConfig::default())
    }
}
