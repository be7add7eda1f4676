use core::fmt;

use crate::transaction::Completion;

/// Kinds of trouble the poller recovers from on its own
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ErrorKind {
    /// A register kept failing after the whole retry budget
    RetryAttemptsExceeded,
    /// The host controller reported a status that retrying cannot fix
    NonRecoverableStatus,
    /// A capacity register read zero after the whole retry budget
    ZeroCapacity,
    /// The full read did not finish before the read timeout
    OverallTimeout,
    /// The pack raised both terminate alarms
    PermanentFailure,
}

impl ErrorKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::RetryAttemptsExceeded => "Read Retry Attempts Exceeded",
            ErrorKind::NonRecoverableStatus => "Non-recoverable status failure",
            ErrorKind::ZeroCapacity => "Capacity Read Zero",
            ErrorKind::OverallTimeout => "Overall Read Timeout Expired",
            ErrorKind::PermanentFailure => "Permanent Battery Failure",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured error record. Never returned to the caller: it is logged and
/// kept in [`BatterySnapshot::last_error`](crate::BatterySnapshot::last_error)
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ReadError {
    pub kind: ErrorKind,
    pub address: Option<u8>,
    pub command: Option<u8>,
    /// Raw SMBus status code
    pub status: Option<u8>,
}

impl ReadError {
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            address: None,
            command: None,
            status: None,
        }
    }

    /// Error attributed to a specific transaction
    pub fn for_transaction(kind: ErrorKind, completion: &Completion) -> Self {
        Self {
            kind,
            address: Some(completion.request.address),
            command: Some(completion.request.command),
            status: Some(completion.status.code()),
        }
    }

    /// Emits the record on the log sink
    pub(crate) fn log(&self) {
        match self.kind {
            ErrorKind::PermanentFailure | ErrorKind::OverallTimeout => error!(
                "{}: addr={:?} cmd={:?} status={:?}",
                self.kind.as_str(),
                self.address,
                self.command,
                self.status
            ),
            _ => warn!(
                "{}: addr={:?} cmd={:?} status={:?}",
                self.kind.as_str(),
                self.address,
                self.command,
                self.status
            ),
        }
    }
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;

        if let (Some(address), Some(command)) = (self.address, self.command) {
            write!(f, " (addr={:#04x} cmd={:#04x}", address, command)?;
            if let Some(status) = self.status {
                write!(f, " status={:#04x}", status)?;
            }
            write!(f, ")")?;
        }

        Ok(())
    }
}
