//! The register sweep as an explicit state machine.
//!
//! A poll walks the states below in order, one bus transaction per state.
//! [`advance`] is the whole transition table: it decodes the reading taken
//! for the current state into the snapshot and names the state to read next.
//! It never touches the bus, the timers or the session, which keeps it easy
//! to test; the [`BatteryMonitor`](crate::BatteryMonitor) owns all of that.
//!
//! ```text
//! Start -> ControllerStatus -> BatteryState -> BatteryStatus
//!                                                  |
//!          +-------------- NewBattery -------------+---- ExistingBattery --+
//!          v                                                              |
//!   ManufacturerName -> ManufactureDate -> DeviceName -> SerialNumber     |
//!          -> DesignCapacity --------------------------------------------+
//!                                                                          v
//!   RemainingCapacity -> FullChargeCapacity -> AverageCurrent -> Voltage -> MaxError
//!   -> CycleCount -> AverageTimeToEmpty -> AverageTimeToFull -> Temperature
//!   -> CellVoltage1..4 -> Current -> done
//! ```

use crate::error::{ErrorKind, ReadError};
use crate::registers::{self, address, commands, manager_commands};
use crate::snapshot::{block_text, serial_text, BatterySnapshot, ManufactureDate as DateCode};
use crate::transaction::{Completion, Protocol, Request};

/// Which flavour of sweep to run
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MachinePath {
    /// Also reads the identity registers, which only change with the pack
    NewBattery,
    ExistingBattery,
}

/// The register whose reading the sequencer is waiting for
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SequenceState {
    Start,
    ControllerStatus,
    /// Presence and charging, as seen by the manager
    BatteryState,
    /// The pack's own status bits
    BatteryStatus,
    ManufacturerName,
    ManufactureDate,
    DeviceName,
    SerialNumber,
    DesignCapacity,
    RemainingCapacity,
    FullChargeCapacity,
    AverageCurrent,
    Voltage,
    MaxError,
    CycleCount,
    AverageTimeToEmpty,
    AverageTimeToFull,
    Temperature,
    CellVoltage1,
    CellVoltage2,
    CellVoltage3,
    CellVoltage4,
    Current,
}

impl SequenceState {
    /// (address, command, protocol) read in this state
    pub fn register(&self) -> Option<(u8, u8, Protocol)> {
        use Protocol::*;
        use SequenceState::*;

        let battery = |command| Some((address::BATTERY, command, ReadWord));

        match self {
            Start => None,
            ControllerStatus => Some((
                address::MANAGER,
                manager_commands::BATTERY_SYSTEM_STATE_CONT,
                ReadWord,
            )),
            BatteryState => Some((
                address::MANAGER,
                manager_commands::BATTERY_SYSTEM_STATE,
                ReadWord,
            )),
            BatteryStatus => battery(commands::BATTERY_STATUS),
            ManufacturerName => Some((address::BATTERY, commands::MANUFACTURER_NAME, ReadBlock)),
            ManufactureDate => battery(commands::MANUFACTURE_DATE),
            DeviceName => Some((address::BATTERY, commands::DEVICE_NAME, ReadBlock)),
            SerialNumber => battery(commands::SERIAL_NUMBER),
            DesignCapacity => battery(commands::DESIGN_CAPACITY),
            RemainingCapacity => battery(commands::REMAINING_CAPACITY),
            FullChargeCapacity => battery(commands::FULL_CHARGE_CAPACITY),
            AverageCurrent => battery(commands::AVERAGE_CURRENT),
            Voltage => battery(commands::VOLTAGE),
            MaxError => battery(commands::MAX_ERROR),
            CycleCount => battery(commands::CYCLE_COUNT),
            AverageTimeToEmpty => battery(commands::AVERAGE_TIME_TO_EMPTY),
            AverageTimeToFull => battery(commands::AVERAGE_TIME_TO_FULL),
            Temperature => battery(commands::TEMPERATURE),
            CellVoltage1 => battery(commands::CELL_VOLTAGE_1),
            CellVoltage2 => battery(commands::CELL_VOLTAGE_2),
            CellVoltage3 => battery(commands::CELL_VOLTAGE_3),
            CellVoltage4 => battery(commands::CELL_VOLTAGE_4),
            Current => battery(commands::CURRENT),
        }
    }

    /// Builds the bus request for this state
    pub fn request(&self, tag: u16) -> Option<Request> {
        self.register().map(|(address, command, protocol)| Request {
            address,
            command,
            protocol,
            tag,
        })
    }

    /// Whether a zero reading in this state is implausible
    pub fn zero_is_absurd(&self, fully_discharged: bool) -> bool {
        match self {
            SequenceState::FullChargeCapacity | SequenceState::DesignCapacity => true,
            SequenceState::RemainingCapacity => !fully_discharged,
            _ => false,
        }
    }
}

/// State of one logical poll, possibly spanning many transactions
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PollSession {
    pub path: MachinePath,
    pub state: SequenceState,
    /// Consecutive retries of the current request
    pub retry_attempts: u8,
    pub cancel_requested: bool,
    pub restart_requested: bool,
    /// External stall: no transaction may be issued while set
    pub stalled: bool,
    /// The pack was removed, found missing or failed for good. Only an
    /// insertion starts the next sweep
    pub awaiting_insertion: bool,
    /// A sweep is in progress
    pub active: bool,
    /// Identifies the sweep the outstanding request belongs to
    pub tag: u16,
    /// Request on the bus, awaiting its completion
    pub outstanding: Option<Request>,
    /// Request waiting for the retry timer
    pub retry_pending: Option<Request>,
}

impl PollSession {
    pub const fn new(path: MachinePath) -> Self {
        Self {
            path,
            state: SequenceState::Start,
            retry_attempts: 0,
            cancel_requested: false,
            restart_requested: false,
            stalled: false,
            awaiting_insertion: false,
            active: false,
            tag: 0,
            outstanding: None,
            retry_pending: None,
        }
    }

    /// Back to the start state. The stall and insertion flags belong to the
    /// outside world and survive; the tag moves on so late completions are
    /// recognised
    pub fn reset(&mut self, path: MachinePath) {
        *self = Self {
            path,
            stalled: self.stalled,
            awaiting_insertion: self.awaiting_insertion,
            tag: self.tag.wrapping_add(1),
            ..Self::new(path)
        };
    }
}

/// Externally toggled flags that change how registers are interpreted
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DecodeContext {
    /// The system draws no power from AC even if it is plugged in
    pub inflow_disabled: bool,
    /// The pack will not charge even with AC attached
    pub charge_inhibited: bool,
}

/// Where the sweep goes after a state has been decoded
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Transition {
    Read(SequenceState),
    /// The manager reports no battery; stop reading
    Absent,
    /// The pack declared itself dead; stop reading
    PermanentFailure,
    /// Last register read, the snapshot is final
    Complete,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Step {
    pub next: Transition,
    /// Error to record alongside the decoded value
    pub error: Option<ReadError>,
}

impl Step {
    fn read(state: SequenceState) -> Self {
        Self {
            next: Transition::Read(state),
            error: None,
        }
    }
}

/// Decodes `reading` (`None` when the read failed for good) for `state`
/// into `snapshot` and picks the next state.
pub fn advance(
    state: SequenceState,
    path: MachinePath,
    reading: Option<&Completion>,
    ctx: DecodeContext,
    snapshot: &mut BatterySnapshot,
) -> Step {
    use SequenceState::*;

    let word = reading.map(Completion::word);

    match state {
        Start => Step::read(ControllerStatus),

        ControllerStatus => {
            match word.map(registers::ControllerStatus::from) {
                Some(bits) => {
                    // With inflow disabled the AC bit still reads set, but no
                    // power is drawn from the adapter
                    snapshot.ac_connected =
                        !ctx.inflow_disabled && bits.contains(registers::ControllerStatus::AC_PRESENT);
                    snapshot.charge_capable =
                        !bits.contains(registers::ControllerStatus::POWER_NOT_GOOD);
                }
                None => {
                    snapshot.ac_connected = false;
                    snapshot.charge_capable = false;
                }
            }
            Step::read(BatteryState)
        }

        BatteryState => {
            match word.map(registers::ManagerState::from) {
                Some(bits) => {
                    snapshot.present = bits.contains(registers::ManagerState::PRESENT_A);
                    snapshot.charging = !ctx.charge_inhibited
                        && bits.contains(registers::ManagerState::CHARGING_A);
                }
                None => {
                    snapshot.present = false;
                    snapshot.charging = false;
                }
            }

            if snapshot.present {
                Step::read(BatteryStatus)
            } else {
                Step {
                    next: Transition::Absent,
                    error: None,
                }
            }
        }

        BatteryStatus => {
            match word.map(registers::BatteryStatus::from) {
                Some(bits) => {
                    snapshot.fully_charged = bits.contains(registers::BatteryStatus::FULLY_CHARGED);
                    snapshot.fully_discharged =
                        bits.contains(registers::BatteryStatus::FULLY_DISCHARGED);

                    if bits.is_permanent_failure() {
                        let error = reading.map(|completion| {
                            ReadError::for_transaction(ErrorKind::PermanentFailure, completion)
                        });
                        return Step {
                            next: Transition::PermanentFailure,
                            error,
                        };
                    }
                }
                None => {
                    snapshot.fully_charged = false;
                    snapshot.fully_discharged = false;
                }
            }

            match path {
                MachinePath::NewBattery => Step::read(ManufacturerName),
                MachinePath::ExistingBattery => Step::read(RemainingCapacity),
            }
        }

        ManufacturerName => {
            match reading {
                Some(completion) if !completion.bytes().is_empty() => {
                    snapshot.manufacturer = Some(block_text(completion.bytes()));
                }
                Some(_) => {}
                None => snapshot.manufacturer = None,
            }
            Step::read(ManufactureDate)
        }

        ManufactureDate => {
            snapshot.manufacture_date = DateCode(word.unwrap_or(0));
            Step::read(DeviceName)
        }

        DeviceName => {
            match reading {
                Some(completion) if !completion.bytes().is_empty() => {
                    snapshot.device_name = Some(block_text(completion.bytes()));
                }
                Some(_) => {}
                None => snapshot.device_name = None,
            }
            Step::read(SerialNumber)
        }

        SerialNumber => {
            snapshot.serial = word.map(serial_text);
            Step::read(DesignCapacity)
        }

        DesignCapacity => {
            snapshot.design_capacity = word.unwrap_or(0);
            Step {
                next: Transition::Read(RemainingCapacity),
                error: zero_capacity(state, reading, snapshot),
            }
        }

        RemainingCapacity => {
            snapshot.remaining_capacity = word.unwrap_or(0);
            Step {
                next: Transition::Read(FullChargeCapacity),
                error: zero_capacity(state, reading, snapshot),
            }
        }

        FullChargeCapacity => {
            snapshot.full_charge_capacity = word.unwrap_or(0);
            Step {
                next: Transition::Read(AverageCurrent),
                error: zero_capacity(state, reading, snapshot),
            }
        }

        AverageCurrent => {
            snapshot.average_current = reading.map(Completion::signed_word).unwrap_or(0);
            Step::read(Voltage)
        }

        Voltage => {
            snapshot.voltage = word.unwrap_or(0);
            Step::read(MaxError)
        }

        MaxError => {
            snapshot.max_error = word.unwrap_or(0);
            Step::read(CycleCount)
        }

        CycleCount => {
            snapshot.cycle_count = word.unwrap_or(0);
            Step::read(AverageTimeToEmpty)
        }

        AverageTimeToEmpty => {
            snapshot.average_time_to_empty = word.unwrap_or(0);
            Step::read(AverageTimeToFull)
        }

        AverageTimeToFull => {
            snapshot.average_time_to_full = word.unwrap_or(0);
            snapshot.update_time_remaining();
            Step::read(Temperature)
        }

        Temperature => {
            snapshot.temperature = word.unwrap_or(0);
            Step::read(CellVoltage1)
        }

        CellVoltage1 => {
            snapshot.cell_voltages[0] = word.unwrap_or(0);
            Step::read(CellVoltage2)
        }

        CellVoltage2 => {
            snapshot.cell_voltages[1] = word.unwrap_or(0);
            Step::read(CellVoltage3)
        }

        CellVoltage3 => {
            snapshot.cell_voltages[2] = word.unwrap_or(0);
            Step::read(CellVoltage4)
        }

        CellVoltage4 => {
            snapshot.cell_voltages[3] = word.unwrap_or(0);
            Step::read(Current)
        }

        Current => {
            snapshot.current = reading.map(Completion::signed_word).unwrap_or(0);
            Step {
                next: Transition::Complete,
                error: None,
            }
        }
    }
}

/// A zero that made it this far has already used up its retries
fn zero_capacity(
    state: SequenceState,
    reading: Option<&Completion>,
    snapshot: &BatterySnapshot,
) -> Option<ReadError> {
    let completion = reading?;

    if completion.word() == 0 && state.zero_is_absurd(snapshot.fully_discharged) {
        Some(ReadError::for_transaction(ErrorKind::ZeroCapacity, completion))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    extern crate std;
    use std::vec::Vec;

    use super::*;

    fn ok(state: SequenceState, data: &[u8]) -> Completion {
        Completion::ok(state.request(0).unwrap(), data)
    }

    /// Walks the machine feeding `word` to every state until it stops
    fn walk(path: MachinePath, word: impl Fn(SequenceState) -> u16) -> (Vec<SequenceState>, Transition) {
        let mut snapshot = BatterySnapshot::default();
        let mut visited = Vec::new();
        let mut state = SequenceState::Start;
        let mut reading = None;

        loop {
            let step = advance(state, path, reading.as_ref(), DecodeContext::default(), &mut snapshot);
            match step.next {
                Transition::Read(next) => {
                    visited.push(next);
                    reading = Some(ok(next, &word(next).to_le_bytes()));
                    state = next;
                }
                other => return (visited, other),
            }
        }
    }

    fn healthy(state: SequenceState) -> u16 {
        match state {
            SequenceState::BatteryState => 0x0011,
            _ => 1000,
        }
    }

    #[test]
    fn existing_battery_skips_identity() {
        use SequenceState::*;

        let (visited, end) = walk(MachinePath::ExistingBattery, healthy);
        assert_eq!(end, Transition::Complete);
        assert_eq!(
            visited,
            [
                ControllerStatus,
                BatteryState,
                BatteryStatus,
                RemainingCapacity,
                FullChargeCapacity,
                AverageCurrent,
                Voltage,
                MaxError,
                CycleCount,
                AverageTimeToEmpty,
                AverageTimeToFull,
                Temperature,
                CellVoltage1,
                CellVoltage2,
                CellVoltage3,
                CellVoltage4,
                Current,
            ]
        );
    }

    #[test]
    fn new_battery_reads_identity_then_rejoins() {
        use SequenceState::*;

        let (visited, end) = walk(MachinePath::NewBattery, healthy);
        assert_eq!(end, Transition::Complete);
        assert_eq!(
            &visited[..9],
            &[
                ControllerStatus,
                BatteryState,
                BatteryStatus,
                ManufacturerName,
                ManufactureDate,
                DeviceName,
                SerialNumber,
                DesignCapacity,
                RemainingCapacity,
            ]
        );
        assert_eq!(visited.len(), 22);
    }

    #[test]
    fn absent_battery_short_circuits() {
        let (visited, end) = walk(MachinePath::NewBattery, |_| 0);
        assert_eq!(end, Transition::Absent);
        assert_eq!(visited, [SequenceState::ControllerStatus, SequenceState::BatteryState]);
    }

    #[test]
    fn both_terminate_alarms_stop_the_sweep() {
        let (visited, end) = walk(MachinePath::ExistingBattery, |state| match state {
            SequenceState::BatteryState => 0x0001,
            SequenceState::BatteryStatus => 0x4800,
            _ => 1000,
        });
        assert_eq!(end, Transition::PermanentFailure);
        assert_eq!(visited.last(), Some(&SequenceState::BatteryStatus));
    }

    #[test]
    fn inflow_disabled_hides_ac() {
        let mut snapshot = BatterySnapshot::default();
        let reading = ok(SequenceState::ControllerStatus, &[0x01, 0x00]);

        let ctx = DecodeContext {
            inflow_disabled: true,
            charge_inhibited: false,
        };
        advance(SequenceState::ControllerStatus, MachinePath::NewBattery, Some(&reading), ctx, &mut snapshot);
        assert!(!snapshot.ac_connected);
        assert!(snapshot.charge_capable);

        advance(
            SequenceState::ControllerStatus,
            MachinePath::NewBattery,
            Some(&reading),
            DecodeContext::default(),
            &mut snapshot,
        );
        assert!(snapshot.ac_connected);
    }

    #[test]
    fn charge_inhibit_hides_charging() {
        let mut snapshot = BatterySnapshot::default();
        let reading = ok(SequenceState::BatteryState, &[0x11, 0x00]);

        let ctx = DecodeContext {
            inflow_disabled: false,
            charge_inhibited: true,
        };
        advance(SequenceState::BatteryState, MachinePath::NewBattery, Some(&reading), ctx, &mut snapshot);
        assert!(snapshot.present);
        assert!(!snapshot.charging);
    }

    #[test]
    fn failed_capacity_reads_reset_to_zero() {
        let mut snapshot = BatterySnapshot {
            remaining_capacity: 4000,
            full_charge_capacity: 5000,
            ..Default::default()
        };

        advance(
            SequenceState::RemainingCapacity,
            MachinePath::ExistingBattery,
            None,
            DecodeContext::default(),
            &mut snapshot,
        );
        advance(
            SequenceState::FullChargeCapacity,
            MachinePath::ExistingBattery,
            None,
            DecodeContext::default(),
            &mut snapshot,
        );

        assert_eq!(snapshot.remaining_capacity, 0);
        assert_eq!(snapshot.full_charge_capacity, 0);
    }

    #[test]
    fn accepted_zero_capacity_is_recorded() {
        let mut snapshot = BatterySnapshot::default();
        let zero = ok(SequenceState::FullChargeCapacity, &[0, 0]);

        let step = advance(
            SequenceState::FullChargeCapacity,
            MachinePath::ExistingBattery,
            Some(&zero),
            DecodeContext::default(),
            &mut snapshot,
        );
        assert_eq!(step.error.map(|e| e.kind), Some(ErrorKind::ZeroCapacity));

        snapshot.fully_discharged = true;
        let zero = ok(SequenceState::RemainingCapacity, &[0, 0]);
        let step = advance(
            SequenceState::RemainingCapacity,
            MachinePath::ExistingBattery,
            Some(&zero),
            DecodeContext::default(),
            &mut snapshot,
        );
        assert_eq!(step.error, None);
    }

    #[test]
    fn identity_strings() {
        let mut snapshot = BatterySnapshot::default();

        let name = ok(SequenceState::ManufacturerName, b"SMP");
        advance(SequenceState::ManufacturerName, MachinePath::NewBattery, Some(&name), DecodeContext::default(), &mut snapshot);
        assert_eq!(snapshot.manufacturer.as_deref(), Some("SMP"));

        // An empty block leaves the previous value alone
        let empty = ok(SequenceState::ManufacturerName, &[]);
        advance(SequenceState::ManufacturerName, MachinePath::NewBattery, Some(&empty), DecodeContext::default(), &mut snapshot);
        assert_eq!(snapshot.manufacturer.as_deref(), Some("SMP"));

        let serial = ok(SequenceState::SerialNumber, &[0x39, 0x30]);
        advance(SequenceState::SerialNumber, MachinePath::NewBattery, Some(&serial), DecodeContext::default(), &mut snapshot);
        assert_eq!(snapshot.serial.as_deref(), Some("12345"));

        advance(SequenceState::DeviceName, MachinePath::NewBattery, None, DecodeContext::default(), &mut snapshot);
        assert_eq!(snapshot.device_name, None);
    }
}
