//! These are low-level definitions for Smart Battery Data (SBD) batteries
//! and the Smart Battery System Manager sitting in front of them

use crate::fmt::bitflags;

/// 7-bit SMBus addresses of the devices we talk to
pub mod address {
    pub const MANAGER: u8 = 0x0A;
    pub const BATTERY: u8 = 0x0B;
}

/// Smart Battery System Manager commands
pub mod manager_commands {
    #![allow(dead_code)]
    pub const BATTERY_SYSTEM_STATE: u8 = 0x01;
    pub const BATTERY_SYSTEM_STATE_CONT: u8 = 0x02;
    pub const BATTERY_SYSTEM_INFO: u8 = 0x04;
}

/// This is a list of commands (i.e *registers*) supported by the battery
pub mod commands {
    #![allow(dead_code)]
    pub const MANUFACTURER_ACCESS: u8 = 0x00;
    pub const REMAINING_CAPACITY_ALARM: u8 = 0x01;
    pub const REMAINING_TIME_ALARM: u8 = 0x02;
    pub const BATTERY_MODE: u8 = 0x03;
    pub const TEMPERATURE: u8 = 0x08;
    pub const VOLTAGE: u8 = 0x09;
    pub const CURRENT: u8 = 0x0A;
    pub const AVERAGE_CURRENT: u8 = 0x0B;
    pub const MAX_ERROR: u8 = 0x0C;
    pub const RELATIVE_STATE_OF_CHARGE: u8 = 0x0D;
    pub const ABSOLUTE_STATE_OF_CHARGE: u8 = 0x0E;
    pub const REMAINING_CAPACITY: u8 = 0x0F;
    pub const FULL_CHARGE_CAPACITY: u8 = 0x10;
    pub const RUN_TIME_TO_EMPTY: u8 = 0x11;
    pub const AVERAGE_TIME_TO_EMPTY: u8 = 0x12;
    pub const AVERAGE_TIME_TO_FULL: u8 = 0x13;
    pub const BATTERY_STATUS: u8 = 0x16;
    pub const CYCLE_COUNT: u8 = 0x17;
    pub const DESIGN_CAPACITY: u8 = 0x18;
    pub const DESIGN_VOLTAGE: u8 = 0x19;
    pub const MANUFACTURE_DATE: u8 = 0x1B;
    pub const SERIAL_NUMBER: u8 = 0x1C;
    pub const MANUFACTURER_NAME: u8 = 0x20;
    pub const DEVICE_NAME: u8 = 0x21;
    pub const DEVICE_CHEMISTRY: u8 = 0x22;

    // Optional manufacturer-specific cell voltage registers, counting down
    pub const CELL_VOLTAGE_4: u8 = 0x3C;
    pub const CELL_VOLTAGE_3: u8 = 0x3D;
    pub const CELL_VOLTAGE_2: u8 = 0x3E;
    pub const CELL_VOLTAGE_1: u8 = 0x3F;
}

/// Largest payload an SMBus block read may return
pub const MAX_BLOCK_LEN: usize = 32;

bitflags! {
    /// BatterySystemStateCont, the manager's view of external power
    pub struct ControllerStatus: u16 {
        const POWER_NOT_GOOD = 1 << 1;
        const AC_PRESENT = 1 << 0;
    }
}

bitflags! {
    /// BatterySystemState. Only slot A is used, the other slots are
    /// kept so the raw value survives a round trip
    pub struct ManagerState: u16 {
        const POWERED_BY_D = 1 << 11;
        const POWERED_BY_C = 1 << 10;
        const POWERED_BY_B = 1 << 9;
        const POWERED_BY_A = 1 << 8;
        const CHARGING_D = 1 << 7;
        const CHARGING_C = 1 << 6;
        const CHARGING_B = 1 << 5;
        const CHARGING_A = 1 << 4;
        const PRESENT_D = 1 << 3;
        const PRESENT_C = 1 << 2;
        const PRESENT_B = 1 << 1;
        const PRESENT_A = 1 << 0;
    }
}

bitflags! {
    /// Contents of the BatteryStatus register
    pub struct BatteryStatus: u16 {
        const OVER_CHARGED_ALARM = 1 << 15;
        const TERMINATE_CHARGE_ALARM = 1 << 14;
        const OVER_TEMP_ALARM = 1 << 12;
        const TERMINATE_DISCHARGE_ALARM = 1 << 11;
        const REMAINING_CAPACITY_ALARM = 1 << 9;
        const REMAINING_TIME_ALARM = 1 << 8;
        const INITIALIZED = 1 << 7;
        const DISCHARGING = 1 << 6;
        const FULLY_CHARGED = 1 << 5;
        const FULLY_DISCHARGED = 1 << 4;
    }
}

impl BatteryStatus {
    /// Both terminate alarms at once is how a pack reports it is dead
    pub fn is_permanent_failure(&self) -> bool {
        self.contains(Self::TERMINATE_CHARGE_ALARM | Self::TERMINATE_DISCHARGE_ALARM)
    }
}

impl From<u16> for BatteryStatus {
    fn from(value: u16) -> Self {
        BatteryStatus::from_bits_truncate(value)
    }
}

impl From<u16> for ControllerStatus {
    fn from(value: u16) -> Self {
        ControllerStatus::from_bits_truncate(value)
    }
}

impl From<u16> for ManagerState {
    fn from(value: u16) -> Self {
        ManagerState::from_bits_truncate(value)
    }
}
