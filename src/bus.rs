//! Runs SMBus reads on top of an async I2C peripheral.
//!
//! SMBus read-word and read-block are plain I2C write-then-read
//! transactions, so any [`embedded_hal_async::i2c::I2c`] implementation can
//! serve as the transport. Hosts with an async executor park the monitor's
//! requests in a [`QueuedTransport`] and let [`SmbusBus::pump`] run them.

use embedded_hal::delay::DelayNs;
use embedded_hal_async::i2c::{self, Error as _, ErrorKind, NoAcknowledgeSource};

use crate::monitor::{BatteryMonitor, SnapshotSink, Timers};
use crate::registers::MAX_BLOCK_LEN;
use crate::transaction::{Completion, Protocol, Request, Status, Transport};

/// Translates an I2C failure to the closest SMBus status
pub fn status_from_kind(kind: ErrorKind) -> Status {
    match kind {
        ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address) => Status::DeviceAddressNotAcknowledged,
        ErrorKind::NoAcknowledge(_) => Status::DeviceError,
        ErrorKind::ArbitrationLoss => Status::Busy,
        ErrorKind::Bus => Status::UnknownHostError,
        ErrorKind::Overrun => Status::DeviceError,
        _ => Status::UnknownFailure,
    }
}

/// SMBus host on top of an I2C bus
pub struct SmbusBus<I> {
    i2c: I,
}

impl<I, E> SmbusBus<I>
where
    I: i2c::I2c<Error = E>,
    E: i2c::Error,
{
    pub fn new(i2c: I) -> Self {
        Self { i2c }
    }

    pub fn release(self) -> I {
        self.i2c
    }

    /// Performs one read. Bus errors are folded into the completion status
    pub async fn execute(&mut self, request: Request) -> Completion {
        match request.protocol {
            Protocol::ReadWord => {
                let mut response = [0u8; 2];

                match self
                    .i2c
                    .write_read(request.address, &[request.command], &mut response)
                    .await
                {
                    Ok(()) => Completion::ok(request, &response),
                    Err(e) => Completion::failed(request, status_from_kind(e.kind())),
                }
            }
            Protocol::ReadBlock => {
                // Byte count first, then the payload
                let mut response = [0u8; MAX_BLOCK_LEN + 1];

                match self
                    .i2c
                    .write_read(request.address, &[request.command], &mut response)
                    .await
                {
                    Ok(()) => {
                        let count = (response[0] as usize).min(MAX_BLOCK_LEN);
                        Completion::ok(request, &response[1..=count])
                    }
                    Err(e) => Completion::failed(request, status_from_kind(e.kind())),
                }
            }
        }
    }

    /// Runs the monitor's requests until it stops asking for more. Returns
    /// when the monitor waits on a timer or has nothing left to do
    pub async fn pump<K, S, D>(&mut self, monitor: &mut BatteryMonitor<QueuedTransport, K, S, D>)
    where
        K: Timers,
        S: SnapshotSink,
        D: DelayNs,
    {
        while let Some(request) = monitor.transport_mut().take() {
            let completion = self.execute(request).await;
            monitor.on_transaction_complete(completion);
        }
    }
}

/// Transport that just parks the request for an async runner to pick up
#[derive(Debug, Default)]
pub struct QueuedTransport {
    pending: Option<Request>,
}

impl QueuedTransport {
    pub const fn new() -> Self {
        Self { pending: None }
    }

    pub fn take(&mut self) -> Option<Request> {
        self.pending.take()
    }

    pub fn peek(&self) -> Option<&Request> {
        self.pending.as_ref()
    }
}

impl Transport for QueuedTransport {
    fn begin_transaction(&mut self, request: Request) {
        if let Some(dropped) = self.pending.replace(request) {
            debug!("replacing unserviced request for cmd {:#x}", dropped.command);
        }
    }
}
