// src/sensor/sim.rs

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use log::{debug, trace};
use parking_lot::Mutex;

use super::parser::{params_are_valid, parse_command_packet};
use crate::common::{
    command::{analog_channel, status, Command, CommandCode, NvMemTarget},
    device::{DeviceIdentifier, DeviceKind, NvMemoryLocation, VERNIER_VENDOR_ID},
    hal_traits::{DeviceConnector, PacketChannel},
    packet::{encode_measurement, encode_response, Packet},
    timing,
};
use crate::dds::{self, defaults, DdsRecord, DDS_RECORD_LEN};

const FIRMWARE_VERSION: (u8, u8) = (1, 6);
/// `GetStatus` flag set while streaming.
pub const STATUS_FLAG_MEASURING: u8 = 0x01;

/// Errors produced by the simulated transport.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SimError {
    /// The device was unplugged (see [`SimulatedSensor::disconnect`]).
    Disconnected,
    /// No simulated device with that identifier is attached.
    UnknownDevice,
}

#[derive(Debug)]
struct SimState {
    kind: DeviceKind,
    sensor_number: u8,
    nv_memory: [u8; DDS_RECORD_LEN],
    outbound: VecDeque<Packet>,
    measuring: bool,
    period_ticks: u32,
    analog_channel: u8,
    sequence: u8,
    received: Vec<Command>,
    failures: HashMap<CommandCode, u8>,
    unresponsive: bool,
    disconnected: bool,
}

fn default_period_ticks(kind: DeviceKind) -> u32 {
    (timing::DEFAULT_MEASUREMENT_PERIOD / kind.measurement_tick()).round() as u32
}

impl SimState {
    fn period_seconds(&self) -> f64 {
        self.period_ticks as f64 * self.kind.measurement_tick()
    }

    fn packet_size(&self) -> usize {
        timing::packet_size_for_period(self.period_seconds())
            .min(self.kind.sample_format().max_samples_per_packet())
    }

    fn nv_target_matches(&self, target: u8) -> bool {
        match self.kind.nv_memory() {
            NvMemoryLocation::Local => target == NvMemTarget::Local as u8,
            NvMemoryLocation::Remote => {
                target == NvMemTarget::Remote as u8 && dds::is_smart_sensor(self.sensor_number)
            }
            NvMemoryLocation::None => false,
        }
    }

    fn nv_range(&self, addr: u8, count: u8) -> Option<std::ops::Range<usize>> {
        let start = addr as usize;
        let end = start + count as usize;
        (end <= DDS_RECORD_LEN).then_some(start..end)
    }

    /// Executes one command. `None` means the device stays silent.
    fn handle(&mut self, command: &Command) -> Option<(u8, Vec<u8>)> {
        if self.unresponsive {
            return None;
        }
        if let Some(&fail) = self.failures.get(&command.code) {
            return Some((fail, Vec::new()));
        }
        if !params_are_valid(command) {
            return Some((status::INVALID_PARAMETER, Vec::new()));
        }
        let p = command.params.as_slice();
        let ok = |payload: Vec<u8>| -> Option<(u8, Vec<u8>)> { Some((status::SUCCESS, payload)) };
        let err = |code: u8| -> Option<(u8, Vec<u8>)> { Some((code, Vec::new())) };

        match command.code {
            CommandCode::Init => {
                self.measuring = false;
                self.outbound.clear();
                self.period_ticks = default_period_ticks(self.kind);
                self.sequence = 0;
                ok(Vec::new())
            }
            CommandCode::GetStatus => {
                let flags = if self.measuring { STATUS_FLAG_MEASURING } else { 0 };
                ok(vec![flags, FIRMWARE_VERSION.0, FIRMWARE_VERSION.1])
            }
            CommandCode::GetSensorId => {
                if !self.kind.reports_sensor_id() {
                    return err(status::CMD_NOT_SUPPORTED);
                }
                ok(vec![self.sensor_number])
            }
            CommandCode::ReadLocalNvMem | CommandCode::ReadRemoteNvMem => {
                let target = match command.code {
                    CommandCode::ReadLocalNvMem => NvMemTarget::Local,
                    _ => NvMemTarget::Remote,
                };
                if self.kind.nv_memory() == NvMemoryLocation::None {
                    return err(status::CMD_NOT_SUPPORTED);
                }
                if !self.nv_target_matches(target as u8) {
                    return err(status::INVALID_PARAMETER);
                }
                if self.measuring
                    && self.period_seconds() < timing::SINGLE_SAMPLE_PERIOD_THRESHOLD
                {
                    return err(status::CANNOT_READ_NV_MEM_BLK_WHILE_COLLECTING_FAST);
                }
                match self.nv_range(p[0], p[1]) {
                    Some(range) => ok(self.nv_memory[range].to_vec()),
                    None => err(status::INVALID_PARAMETER),
                }
            }
            CommandCode::WriteNvMem => {
                if self.kind.nv_memory() == NvMemoryLocation::None {
                    return err(status::CMD_NOT_SUPPORTED);
                }
                if self.measuring {
                    return err(status::CANNOT_WRITE_FLASH_WHILE_COLLECTING);
                }
                if !self.nv_target_matches(p[0]) {
                    return err(status::INVALID_PARAMETER);
                }
                match self.nv_range(p[1], p[2]) {
                    Some(range) => {
                        self.nv_memory[range].copy_from_slice(&p[3..]);
                        ok(Vec::new())
                    }
                    None => err(status::INVALID_PARAMETER),
                }
            }
            CommandCode::SetMeasurementPeriod => {
                if self.measuring {
                    return err(status::CANNOT_CHANGE_PERIOD_WHILE_COLLECTING);
                }
                let ticks = u32::from_le_bytes([p[0], p[1], p[2], p[3]]);
                let seconds = ticks as f64 * self.kind.measurement_tick();
                // Half a tick of slack for float rounding at the limits
                let slack = self.kind.measurement_tick() / 2.0;
                if seconds + slack < self.kind.min_measurement_period()
                    || seconds - slack > self.kind.max_measurement_period()
                {
                    return err(status::INVALID_PARAMETER);
                }
                self.period_ticks = ticks;
                ok(Vec::new())
            }
            CommandCode::GetMeasurementPeriod => ok(self.period_ticks.to_le_bytes().to_vec()),
            CommandCode::SetAnalogInputChannel => {
                if !self.kind.has_probe_dependent_channel() {
                    return err(status::CMD_NOT_SUPPORTED);
                }
                if !matches!(p[0], 1 | 2) {
                    return err(status::INVALID_PARAMETER);
                }
                self.analog_channel = p[0];
                ok(Vec::new())
            }
            CommandCode::GetAnalogInputChannel => {
                if !self.kind.has_probe_dependent_channel() {
                    return err(status::CMD_NOT_SUPPORTED);
                }
                ok(vec![self.analog_channel])
            }
            CommandCode::StartMeasurements => {
                self.measuring = true;
                self.sequence = 0;
                ok(Vec::new())
            }
            CommandCode::StopMeasurements => {
                self.measuring = false;
                ok(Vec::new())
            }
            // Handled by the host; a real device does not know it
            CommandCode::ClearIo => err(status::CMD_NOT_SUPPORTED),
        }
    }
}

/// In-memory Go! device speaking the packet protocol.
///
/// Clones share one device: hand one clone to the session as its channel and keep another to
/// script the device (inject samples, failures, silence) and inspect what it received.
#[derive(Debug, Clone)]
pub struct SimulatedSensor {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedSensor {
    /// A device of class `kind` with its class defaults.
    ///
    /// A Go!Temp holds the default temperature record in its local memory. Go!Link and Mini GC
    /// start with no sensor attached.
    pub fn new(kind: DeviceKind) -> Self {
        let nv_memory = match kind.nv_memory() {
            NvMemoryLocation::Local => {
                defaults::for_device(kind, 0, Default::default()).to_bytes()
            }
            _ => [0; DDS_RECORD_LEN],
        };
        SimulatedSensor {
            state: Arc::new(Mutex::new(SimState {
                kind,
                sensor_number: 0,
                nv_memory,
                outbound: VecDeque::new(),
                measuring: false,
                period_ticks: default_period_ticks(kind),
                analog_channel: analog_channel::ANALOG_5V,
                sequence: 0,
                received: Vec::new(),
                failures: HashMap::new(),
                unresponsive: false,
                disconnected: false,
            })),
        }
    }

    /// Reports `sensor_number` from `GetSensorId`.
    pub fn with_sensor_number(self, sensor_number: u8) -> Self {
        self.state.lock().sensor_number = sensor_number;
        self
    }

    /// Stores `record` as the device's DDS memory, byte for byte (stored checksum included).
    ///
    /// For devices that read the record from the sensor, the record's sensor number is also
    /// reported as the attached sensor.
    pub fn with_dds_record(self, record: &DdsRecord) -> Self {
        {
            let mut state = self.state.lock();
            state.nv_memory = record.to_bytes();
            if state.kind.nv_memory() == NvMemoryLocation::Remote {
                state.sensor_number = record.sensor_number();
            }
        }
        self
    }

    pub fn kind(&self) -> DeviceKind {
        self.state.lock().kind
    }

    pub fn nv_memory(&self) -> [u8; DDS_RECORD_LEN] {
        self.state.lock().nv_memory
    }

    /// The DDS memory decoded as a record.
    pub fn dds_record(&self) -> DdsRecord {
        DdsRecord::from_bytes(&self.state.lock().nv_memory)
    }

    /// Makes every later `code` command fail with `status`.
    pub fn fail_command(&self, code: CommandCode, status: u8) {
        self.state.lock().failures.insert(code, status);
    }

    pub fn clear_failures(&self) {
        self.state.lock().failures.clear();
    }

    /// While set, commands are recorded but never answered.
    pub fn set_unresponsive(&self, unresponsive: bool) {
        self.state.lock().unresponsive = unresponsive;
    }

    /// Every later read and write fails with [`SimError::Disconnected`].
    pub fn disconnect(&self) {
        self.state.lock().disconnected = true;
    }

    pub fn is_measuring(&self) -> bool {
        self.state.lock().measuring
    }

    pub fn period_ticks(&self) -> u32 {
        self.state.lock().period_ticks
    }

    pub fn analog_channel(&self) -> u8 {
        self.state.lock().analog_channel
    }

    /// Samples per measurement packet at the current period.
    pub fn packet_size(&self) -> usize {
        self.state.lock().packet_size()
    }

    /// Every command received so far, in order.
    pub fn commands(&self) -> Vec<Command> {
        self.state.lock().received.clone()
    }

    pub fn command_codes(&self) -> Vec<CommandCode> {
        self.state.lock().received.iter().map(|c| c.code).collect()
    }

    /// Streams `samples`, grouped into packets the way the device would at its current period.
    ///
    /// Samples are only emitted while measuring.
    ///
    /// # Returns
    ///
    /// The number of packets queued.
    pub fn push_samples(&self, samples: &[i32]) -> usize {
        let mut state = self.state.lock();
        if !state.measuring {
            debug!("Simulated {} not measuring, {} samples dropped", state.kind, samples.len());
            return 0;
        }
        let format = state.kind.sample_format();
        let size = state.packet_size();
        let mut queued = 0;
        for chunk in samples.chunks(size) {
            if let Some(packet) = encode_measurement(state.sequence, chunk, format) {
                state.outbound.push_back(packet);
                state.sequence = state.sequence.wrapping_add(1);
                queued += 1;
            }
        }
        queued
    }

    /// Queues an arbitrary inbound packet.
    pub fn push_raw(&self, packet: Packet) {
        self.state.lock().outbound.push_back(packet);
    }
}

impl PacketChannel for SimulatedSensor {
    type Error = SimError;

    fn read_packet(&mut self) -> nb::Result<Packet, Self::Error> {
        let mut state = self.state.lock();
        if state.disconnected {
            return Err(nb::Error::Other(SimError::Disconnected));
        }
        state.outbound.pop_front().ok_or(nb::Error::WouldBlock)
    }

    fn write_packet(&mut self, packet: &Packet) -> nb::Result<(), Self::Error> {
        let mut state = self.state.lock();
        if state.disconnected {
            return Err(nb::Error::Other(SimError::Disconnected));
        }
        let reply = match parse_command_packet(packet) {
            Ok(command) => {
                trace!("Simulated {} received {}", state.kind, command.code);
                let reply = state.handle(&command);
                state.received.push(command);
                reply
            }
            Err(e) => {
                debug!("Simulated {} rejected packet {:02x?}: {}", state.kind, packet, e);
                Some((status::CMD_NOT_SUPPORTED, Vec::new()))
            }
        };
        if let Some((code, payload)) = reply {
            let chunks = encode_response(packet[0], code, &payload);
            state.outbound.extend(chunks);
        }
        Ok(())
    }
}

// --- Simulated bus ---

/// A set of simulated devices that can be enumerated and connected to.
#[derive(Debug, Clone, Default)]
pub struct SimulatedConnector {
    devices: Vec<(DeviceIdentifier, SimulatedSensor)>,
}

impl SimulatedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plugs in `sensor` under `name`.
    pub fn attach(&mut self, name: &str, sensor: SimulatedSensor) -> DeviceIdentifier {
        let id = DeviceIdentifier::new(name, VERNIER_VENDOR_ID, sensor.kind().product_id());
        self.devices.push((id.clone(), sensor));
        id
    }

    /// Unplugs the device named `name`.
    pub fn detach(&mut self, name: &str) -> Option<SimulatedSensor> {
        let at = self.devices.iter().position(|(id, _)| id.name == name)?;
        Some(self.devices.remove(at).1)
    }
}

impl DeviceConnector for SimulatedConnector {
    type Channel = SimulatedSensor;

    fn list_devices(&mut self, vendor_id: u16, product_id: u16) -> Vec<DeviceIdentifier> {
        self.devices
            .iter()
            .filter(|(id, _)| id.vendor_id == vendor_id && id.product_id == product_id)
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn connect(&mut self, id: &DeviceIdentifier) -> Result<SimulatedSensor, SimError> {
        self.devices
            .iter()
            .find(|(known, _)| known == id)
            .map(|(_, sensor)| sensor.clone())
            .ok_or(SimError::UnknownDevice)
    }
}
