#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use embedded_hal::delay::DelayNs;
use smartbatt::registers::{address, commands, manager_commands};
use smartbatt::{
    BatteryMonitor, BatterySnapshot, Completion, PollingConfig, Protocol, Request, SnapshotSink,
    Status, TimerId, Timers, Transport,
};

#[derive(Default)]
pub struct RecordingTransport {
    pub requests: Vec<Request>,
}

impl Transport for RecordingTransport {
    fn begin_transaction(&mut self, request: Request) {
        self.requests.push(request);
    }
}

#[derive(Default)]
pub struct FakeTimers {
    pending: [Option<Duration>; 3],
    pub armed: Vec<(TimerId, Duration)>,
}

fn slot(timer: TimerId) -> usize {
    match timer {
        TimerId::Poll => 0,
        TimerId::ReadTimeout => 1,
        TimerId::Retry => 2,
    }
}

impl FakeTimers {
    pub fn pending(&self, timer: TimerId) -> Option<Duration> {
        self.pending[slot(timer)]
    }
}

impl Timers for FakeTimers {
    fn arm(&mut self, timer: TimerId, after: Duration) {
        self.pending[slot(timer)] = Some(after);
        self.armed.push((timer, after));
    }

    fn cancel(&mut self, timer: TimerId) {
        self.pending[slot(timer)] = None;
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub published: Vec<BatterySnapshot>,
    pub ac_changes: Vec<bool>,
    pub full_discharges: usize,
}

impl SnapshotSink for RecordingSink {
    fn publish(&mut self, snapshot: &BatterySnapshot) {
        self.published.push(snapshot.clone());
    }

    fn ac_adapter_changed(&mut self, connected: bool) {
        self.ac_changes.push(connected);
    }

    fn full_discharge(&mut self) {
        self.full_discharges += 1;
    }
}

/// Records requested waits in nanoseconds
#[derive(Default)]
pub struct RecordingDelay {
    pub waits_ns: Vec<u32>,
}

impl DelayNs for RecordingDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.waits_ns.push(ns);
    }
}

pub type Monitor = BatteryMonitor<RecordingTransport, FakeTimers, RecordingSink, RecordingDelay>;

pub fn monitor(config: PollingConfig) -> Monitor {
    BatteryMonitor::new(
        RecordingTransport::default(),
        FakeTimers::default(),
        RecordingSink::default(),
        RecordingDelay::default(),
        config,
    )
}

/// Scripted battery + manager
pub struct Device {
    pub words: HashMap<(u8, u8), u16>,
    pub blocks: HashMap<(u8, u8), Vec<u8>>,
    /// 1-based transaction number -> injected status
    pub faults: HashMap<usize, Status>,
    /// Commands that always fail with the given status
    pub broken: HashMap<u8, Status>,
    /// Commands the device never answers
    pub silent: HashSet<u8>,
    pub transactions: usize,
}

impl Device {
    /// A 3S pack on battery power, discharging
    pub fn healthy() -> Self {
        let mut words = HashMap::new();

        words.insert((address::MANAGER, manager_commands::BATTERY_SYSTEM_STATE_CONT), 0x0000);
        words.insert((address::MANAGER, manager_commands::BATTERY_SYSTEM_STATE), 0x0001);

        let battery = [
            (commands::BATTERY_STATUS, 0x00C0),
            (commands::MANUFACTURE_DATE, (26 << 9) | (3 << 5) | 15),
            (commands::SERIAL_NUMBER, 12345),
            (commands::DESIGN_CAPACITY, 5000),
            (commands::REMAINING_CAPACITY, 3000),
            (commands::FULL_CHARGE_CAPACITY, 4800),
            (commands::AVERAGE_CURRENT, (-1200i16) as u16),
            (commands::VOLTAGE, 12100),
            (commands::MAX_ERROR, 2),
            (commands::CYCLE_COUNT, 87),
            (commands::AVERAGE_TIME_TO_EMPTY, 150),
            (commands::AVERAGE_TIME_TO_FULL, 65535),
            (commands::TEMPERATURE, 2981),
            (commands::CELL_VOLTAGE_1, 4030),
            (commands::CELL_VOLTAGE_2, 4035),
            (commands::CELL_VOLTAGE_3, 4028),
            (commands::CELL_VOLTAGE_4, 0),
            (commands::CURRENT, (-1180i16) as u16),
        ];
        for (command, value) in battery {
            words.insert((address::BATTERY, command), value);
        }

        let mut blocks = HashMap::new();
        blocks.insert((address::BATTERY, commands::MANUFACTURER_NAME), b"SMP".to_vec());
        blocks.insert((address::BATTERY, commands::DEVICE_NAME), b"bq20z451".to_vec());

        Self {
            words,
            blocks,
            faults: HashMap::new(),
            broken: HashMap::new(),
            silent: HashSet::new(),
            transactions: 0,
        }
    }

    pub fn set(&mut self, addr: u8, command: u8, value: u16) {
        self.words.insert((addr, command), value);
    }

    pub fn set_battery(&mut self, command: u8, value: u16) {
        self.set(address::BATTERY, command, value);
    }

    /// Answers a request, `None` if the device stays silent
    pub fn respond(&mut self, request: Request) -> Option<Completion> {
        self.transactions += 1;

        if self.silent.contains(&request.command) {
            return None;
        }
        if let Some(status) = self.faults.get(&self.transactions) {
            return Some(Completion::failed(request, *status));
        }
        if let Some(status) = self.broken.get(&request.command) {
            return Some(Completion::failed(request, *status));
        }

        let key = (request.address, request.command);
        let completion = match request.protocol {
            Protocol::ReadWord => {
                let value = self.words.get(&key).copied().unwrap_or(0);
                Completion::ok(request, &value.to_le_bytes())
            }
            Protocol::ReadBlock => {
                let data = self.blocks.get(&key).cloned().unwrap_or_default();
                Completion::ok(request, &data)
            }
        };

        Some(completion)
    }
}

/// Answers outstanding requests and fires retry timers until the monitor
/// goes quiet. Returns how many transactions were served
pub fn run(monitor: &mut Monitor, device: &mut Device) -> usize {
    let mut served = 0;

    for _ in 0..1000 {
        if let Some(request) = monitor.session().outstanding {
            served += 1;
            match device.respond(request) {
                Some(completion) => monitor.on_transaction_complete(completion),
                None => return served,
            }
        } else if monitor.session().retry_pending.is_some() {
            monitor.on_timer(TimerId::Retry);
        } else {
            return served;
        }
    }

    panic!("monitor never settled");
}

/// Snapshot the healthy device should produce on a new-battery sweep
pub fn healthy_snapshot() -> BatterySnapshot {
    let mut expected = BatterySnapshot {
        present: true,
        ac_connected: false,
        charge_capable: true,
        charging: false,
        remaining_capacity: 3000,
        full_charge_capacity: 4800,
        design_capacity: 5000,
        average_current: -1200,
        voltage: 12100,
        max_error: 2,
        cycle_count: 87,
        average_time_to_empty: 150,
        average_time_to_full: 65535,
        time_remaining: 150,
        temperature: 2981,
        cell_voltages: [4030, 4035, 4028, 0],
        current: -1180,
        manufacture_date: smartbatt::ManufactureDate((26 << 9) | (3 << 5) | 15),
        legacy_flags: smartbatt::LegacyFlags::BATTERY_INSTALLED,
        ..Default::default()
    };
    expected.manufacturer = Some("SMP".try_into().unwrap());
    expected.device_name = Some("bq20z451".try_into().unwrap());
    expected.serial = Some("12345".try_into().unwrap());
    expected
}

pub fn commands_of(monitor: &Monitor) -> Vec<u8> {
    monitor.transport().requests.iter().map(|r| r.command).collect()
}
