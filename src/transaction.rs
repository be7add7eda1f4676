//! One SMBus transaction as seen by the poller: the request we hand to the
//! transport and the completion it hands back

use byteorder::{ByteOrder, LittleEndian};
use heapless::Vec;

use crate::registers::MAX_BLOCK_LEN;

/// SMBus read protocol used for a command
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Protocol {
    ReadWord,
    ReadBlock,
}

/// Transaction status as reported by the SMBus host controller
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Status {
    Ok,
    UnknownFailure,
    DeviceAddressNotAcknowledged,
    DeviceError,
    DeviceCommandAccessDenied,
    UnknownHostError,
    DeviceAccessDenied,
    Timeout,
    HostUnsupportedProtocol,
    Busy,
    PecError,
    /// The transport dropped the transaction without running it
    Aborted,
    Other(u8),
}

impl Status {
    pub fn is_ok(&self) -> bool {
        matches!(self, Status::Ok)
    }

    /// Raw status code, ACPI SMBus numbering
    pub fn code(&self) -> u8 {
        match self {
            Status::Ok => 0x00,
            Status::UnknownFailure => 0x07,
            Status::DeviceAddressNotAcknowledged => 0x10,
            Status::DeviceError => 0x11,
            Status::DeviceCommandAccessDenied => 0x12,
            Status::UnknownHostError => 0x13,
            Status::DeviceAccessDenied => 0x17,
            Status::Timeout => 0x18,
            Status::HostUnsupportedProtocol => 0x19,
            Status::Busy => 0x1A,
            Status::PecError => 0x1F,
            Status::Aborted => 0xFF,
            Status::Other(code) => *code,
        }
    }
}

impl From<u8> for Status {
    fn from(code: u8) -> Self {
        match code {
            0x00 => Self::Ok,
            0x07 => Self::UnknownFailure,
            0x10 => Self::DeviceAddressNotAcknowledged,
            0x11 => Self::DeviceError,
            0x12 => Self::DeviceCommandAccessDenied,
            0x13 => Self::UnknownHostError,
            0x17 => Self::DeviceAccessDenied,
            0x18 => Self::Timeout,
            0x19 => Self::HostUnsupportedProtocol,
            0x1A => Self::Busy,
            0x1F => Self::PecError,
            0xFF => Self::Aborted,
            other => Self::Other(other),
        }
    }
}

/// A read the poller wants performed. The tag is opaque to the transport
/// and must be echoed back in the matching [`Completion`]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Request {
    pub address: u8,
    pub command: u8,
    pub protocol: Protocol,
    pub tag: u16,
}

/// Finished transaction, handed back to
/// [`BatteryMonitor::on_transaction_complete`](crate::BatteryMonitor::on_transaction_complete)
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Completion {
    pub request: Request,
    pub status: Status,
    pub data: Vec<u8, MAX_BLOCK_LEN>,
}

impl Completion {
    /// Builds a completion carrying received bytes. Anything past the
    /// SMBus block limit is dropped
    pub fn new(request: Request, status: Status, received: &[u8]) -> Self {
        let len = received.len().min(MAX_BLOCK_LEN);
        let mut data = Vec::new();
        // Cannot overflow, the slice is clamped above
        let _ = data.extend_from_slice(&received[..len]);

        Self {
            request,
            status,
            data,
        }
    }

    pub fn ok(request: Request, received: &[u8]) -> Self {
        Self::new(request, Status::Ok, received)
    }

    pub fn failed(request: Request, status: Status) -> Self {
        Self::new(request, status, &[])
    }

    /// Little-endian word made of the first two received bytes.
    /// Short reads are zero-padded
    pub fn word(&self) -> u16 {
        let mut raw = [0u8; 2];
        let len = self.data.len().min(2);
        raw[..len].copy_from_slice(&self.data[..len]);

        LittleEndian::read_u16(&raw)
    }

    pub fn signed_word(&self) -> i16 {
        self.word() as i16
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }
}

/// The bus side of the poller. Must not block: the transaction runs in the
/// background and its [`Completion`] is delivered back to the monitor on the
/// same execution context. Only one request is ever outstanding
pub trait Transport {
    fn begin_transaction(&mut self, request: Request);
}
