#![no_std]

//! Telemetry poller for Smart Battery (SBS) packs sitting behind a Smart
//! Battery System Manager on a shared SMBus.
//!
//! The bus is slow and flaky: transactions fail, devices report busy, packs
//! come and go. [`BatteryMonitor`] reads the whole register set one
//! transaction at a time, retries what can be retried, restarts sweeps that
//! stall, and only ever hands complete [`BatterySnapshot`]s to its consumer.
//!
//! The monitor is event driven and never blocks its caller. The host
//! provides a [`Transport`] that starts transactions, [`Timers`], a
//! [`SnapshotSink`] and a delay for sub-millisecond retry back-off, then
//! feeds completions and timer expiries back in. For async hosts,
//! [`bus::SmbusBus`] runs the requests over any
//! [`embedded_hal_async::i2c::I2c`] peripheral.

pub(crate) mod fmt;

pub mod bus;
pub mod config;
pub mod error;
pub mod guard;
pub mod monitor;
pub mod registers;
pub mod retry;
pub mod scheduler;
pub mod sequence;
pub mod snapshot;
pub mod transaction;

pub use config::PollingConfig;
pub use error::{ErrorKind, ReadError};
pub use monitor::{BatteryMonitor, SnapshotSink, TimerId, Timers};
pub use sequence::{MachinePath, PollSession, SequenceState};
pub use snapshot::{BatterySnapshot, LegacyFlags, ManufactureDate};
pub use transaction::{Completion, Protocol, Request, Status, Transport};
