//! The externally visible battery state and the facts derived from raw
//! register values

use core::fmt::Write;

use heapless::String;

use crate::error::ReadError;
use crate::fmt::bitflags;
use crate::registers::MAX_BLOCK_LEN;

/// Identity strings are at most one SMBus block long
pub type BlockString = String<MAX_BLOCK_LEN>;

/// Packed date as stored by the pack: bits 0..4 day, 5..8 month,
/// 9..15 years since 1980
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ManufactureDate(pub u16);

impl ManufactureDate {
    pub fn day(&self) -> u8 {
        (self.0 & 0x1F) as u8
    }

    pub fn month(&self) -> u8 {
        ((self.0 >> 5) & 0x0F) as u8
    }

    pub fn year(&self) -> u16 {
        1980 + (self.0 >> 9)
    }
}

bitflags! {
    /// Flags word of the legacy battery info record
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct LegacyFlags: u32 {
        const CHARGING = 1 << 1;
        const BATTERY_INSTALLED = 1 << 2;
        const AC_INSTALLED = 1 << 0;
    }
}

impl Default for LegacyFlags {
    fn default() -> Self {
        Self::empty()
    }
}

/// Snapshot of everything the poller knows about the pack. Only complete
/// snapshots ever leave the monitor
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BatterySnapshot {
    pub present: bool,
    pub ac_connected: bool,
    pub charge_capable: bool,
    pub charging: bool,
    pub fully_charged: bool,
    pub fully_discharged: bool,
    pub permanent_failure: bool,
    pub quick_poll: bool,

    /// mAh
    pub remaining_capacity: u16,
    /// mAh
    pub full_charge_capacity: u16,
    /// mAh
    pub design_capacity: u16,
    /// mA, negative while discharging
    pub average_current: i16,
    /// mV
    pub voltage: u16,
    /// Percent
    pub max_error: u16,
    pub cycle_count: u16,
    /// Minutes
    pub average_time_to_empty: u16,
    /// Minutes
    pub average_time_to_full: u16,
    /// Minutes, picked from the two above by the sign of the average current
    pub time_remaining: u16,
    /// 0.1 K
    pub temperature: u16,
    /// mV
    pub cell_voltages: [u16; 4],
    /// mA
    pub current: i16,

    pub manufacturer: Option<BlockString>,
    pub device_name: Option<BlockString>,
    pub serial: Option<BlockString>,
    pub manufacture_date: ManufactureDate,

    /// Refreshed on every publish
    pub legacy_flags: LegacyFlags,
    pub last_error: Option<ReadError>,
}

impl BatterySnapshot {
    /// Resets everything that belongs to the pack. External power facts
    /// and the last error annotation survive
    pub fn clear_battery(&mut self) {
        let ac_connected = self.ac_connected;
        let charge_capable = self.charge_capable;
        let last_error = self.last_error;

        *self = Self {
            ac_connected,
            charge_capable,
            last_error,
            ..Self::default()
        };
    }

    /// Integer remaining/full ratio, `None` when the full charge capacity is unknown
    pub fn charge_percent(&self) -> Option<u32> {
        if self.full_charge_capacity == 0 {
            return None;
        }

        Some(100 * self.remaining_capacity as u32 / self.full_charge_capacity as u32)
    }

    pub(crate) fn refresh_legacy_flags(&mut self) {
        let mut flags = LegacyFlags::empty();

        flags.set(LegacyFlags::AC_INSTALLED, self.ac_connected);
        flags.set(LegacyFlags::BATTERY_INSTALLED, self.present);
        flags.set(LegacyFlags::CHARGING, self.charging);

        self.legacy_flags = flags;
    }

    pub(crate) fn update_time_remaining(&mut self) {
        self.time_remaining = if self.average_current < 0 {
            self.average_time_to_empty
        } else if self.average_current > 0 {
            self.average_time_to_full
        } else {
            0
        };
    }
}

/// Block read payload as text. Stops at the first NUL, non-ASCII bytes
/// become '?'
pub(crate) fn block_text(bytes: &[u8]) -> BlockString {
    let mut text = BlockString::new();

    for &byte in bytes.iter().take_while(|b| **b != 0) {
        let c = if byte.is_ascii() { byte as char } else { '?' };
        // Input is bounded by the block size
        let _ = text.push(c);
    }

    text
}

pub(crate) fn serial_text(serial: u16) -> BlockString {
    let mut text = BlockString::new();
    let _ = write!(text, "{}", serial);
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, ReadError};

    #[test]
    fn date_fields() {
        // 2006-03-15
        let date = ManufactureDate((26 << 9) | (3 << 5) | 15);
        assert_eq!(date.year(), 2006);
        assert_eq!(date.month(), 3);
        assert_eq!(date.day(), 15);
    }

    #[test]
    fn clear_keeps_power_and_error() {
        let mut snapshot = BatterySnapshot {
            present: true,
            ac_connected: true,
            charge_capable: true,
            remaining_capacity: 1000,
            manufacturer: Some(block_text(b"ACME")),
            last_error: Some(ReadError::new(ErrorKind::ZeroCapacity)),
            ..Default::default()
        };

        snapshot.clear_battery();

        assert!(!snapshot.present);
        assert!(snapshot.ac_connected);
        assert!(snapshot.charge_capable);
        assert_eq!(snapshot.remaining_capacity, 0);
        assert_eq!(snapshot.manufacturer, None);
        assert_eq!(snapshot.last_error, Some(ReadError::new(ErrorKind::ZeroCapacity)));
    }

    #[test]
    fn charge_percent_rounds_down() {
        let snapshot = BatterySnapshot {
            remaining_capacity: 249,
            full_charge_capacity: 5000,
            ..Default::default()
        };
        assert_eq!(snapshot.charge_percent(), Some(4));
        assert_eq!(BatterySnapshot::default().charge_percent(), None);
    }

    #[test]
    fn time_remaining_follows_current_sign() {
        let mut snapshot = BatterySnapshot {
            average_time_to_empty: 90,
            average_time_to_full: 40,
            average_current: -700,
            ..Default::default()
        };
        snapshot.update_time_remaining();
        assert_eq!(snapshot.time_remaining, 90);

        snapshot.average_current = 1200;
        snapshot.update_time_remaining();
        assert_eq!(snapshot.time_remaining, 40);

        snapshot.average_current = 0;
        snapshot.update_time_remaining();
        assert_eq!(snapshot.time_remaining, 0);
    }

    #[test]
    fn block_text_stops_at_nul() {
        assert_eq!(block_text(b"SMP\0garbage").as_str(), "SMP");
        assert_eq!(block_text(&[b'A', 0xC3, b'B']).as_str(), "A?B");
        assert_eq!(serial_text(40213).as_str(), "40213");
    }

    #[test]
    fn legacy_flags_mirror_snapshot() {
        let mut snapshot = BatterySnapshot {
            present: true,
            charging: true,
            ..Default::default()
        };
        snapshot.refresh_legacy_flags();
        assert_eq!(
            snapshot.legacy_flags,
            LegacyFlags::BATTERY_INSTALLED | LegacyFlags::CHARGING
        );

        snapshot.clear_battery();
        snapshot.refresh_legacy_flags();
        assert_eq!(snapshot.legacy_flags, LegacyFlags::empty());
    }
}
