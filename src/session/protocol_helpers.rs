// src/session/protocol_helpers.rs

use std::time::{Duration, Instant};

use log::{debug, warn};

use super::Session;
use crate::common::{
    command::{analog_channel, Command, CommandCode, NvMemTarget, MAX_NV_WRITE_CHUNK},
    device::{DeviceKind, NvMemoryLocation},
    error::GoIoError,
    hal_traits::PacketChannel,
    response::{Response, ResponseParseError},
    timing,
    types::{ChecksumStatus, ProbeType, ValidationMode},
};
use crate::dds::{self, defaults, DdsRecord, DDS_RECORD_LEN};

/// Steps of the sequence run while opening a session.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum InitState {
    Init,
    GetSensorId,
    ReadNvMem,
    ConfigureChannel,
    Ready,
}

/// Step that follows once a DDS record (read or default) is in place.
fn after_record(kind: DeviceKind) -> InitState {
    if kind.has_probe_dependent_channel() {
        InitState::ConfigureChannel
    } else {
        InitState::Ready
    }
}

impl<C> Session<C>
where
    C: PacketChannel + Send + 'static,
    C::Error: Send + 'static,
{
    // --- Open sequence ---

    /// Brings a freshly bound device to a known state and fills the DDS mirror.
    pub(super) fn run_open_sequence(&self) -> Result<(), GoIoError<C::Error>> {
        let kind = self.inner.kind;
        let timeout = self.inner.config.command_timeout;
        let mut sensor_number = 0;
        let mut state = InitState::Init;

        while state != InitState::Ready {
            debug!("{}: open step {:?}", self.inner.id.name, state);
            state = match state {
                InitState::Init => {
                    self.send(&Command::new(CommandCode::Init), timeout)?;
                    if kind.reports_sensor_id() {
                        InitState::GetSensorId
                    } else if kind.nv_memory() == NvMemoryLocation::Local {
                        InitState::ReadNvMem
                    } else {
                        self.install_default_record(sensor_number);
                        after_record(kind)
                    }
                }
                InitState::GetSensorId => {
                    sensor_number = self.query_sensor_number(timeout)?;
                    if dds::is_smart_sensor(sensor_number) {
                        InitState::ReadNvMem
                    } else {
                        debug!("{}: sensor {} has no DDS memory", self.inner.id.name, sensor_number);
                        self.install_default_record(sensor_number);
                        after_record(kind)
                    }
                }
                InitState::ReadNvMem => {
                    match self.load_dds_record() {
                        Ok(_) => {}
                        Err(GoIoError::ChecksumInvalid { stored, calculated }) => {
                            warn!(
                                "{}: DDS checksum mismatch (stored {:#04x}, calculated {:#04x}), using defaults",
                                self.inner.id.name, stored, calculated
                            );
                            self.install_default_record(sensor_number);
                        }
                        Err(e) => return Err(e),
                    }
                    after_record(kind)
                }
                InitState::ConfigureChannel => {
                    self.configure_analog_input(timeout)?;
                    InitState::Ready
                }
                InitState::Ready => InitState::Ready,
            };
        }

        let probe = self.probe_type();
        let rec = self.dds();
        debug!(
            "{}: ready, sensor {} ({}), probe {:?}",
            self.inner.id.name,
            rec.sensor_number(),
            rec.long_name(),
            probe
        );
        Ok(())
    }

    fn install_default_record(&self, sensor_number: u8) {
        *self.dds() = defaults::for_device(self.inner.kind, sensor_number, self.inner.config.checksum);
    }

    /// Where this device class keeps its DDS record.
    fn nv_target(&self) -> Option<NvMemTarget> {
        match self.inner.kind.nv_memory() {
            NvMemoryLocation::Local => Some(NvMemTarget::Local),
            NvMemoryLocation::Remote => Some(NvMemTarget::Remote),
            NvMemoryLocation::None => None,
        }
    }

    // --- DDS memory ---

    /// Reads the whole DDS record from the device and validates its checksum.
    ///
    /// The local mirror is only replaced when validation passes (or under
    /// [`ValidationMode::Lax`], where a mismatch is reported but accepted).
    ///
    /// # Returns
    ///
    /// * `Ok(ChecksumStatus::Valid)` or `Ok(ChecksumStatus::Mismatch { .. })` (lax only).
    /// * `Err(GoIoError::ChecksumInvalid)` on mismatch under strict validation.
    /// * `Err(GoIoError::InvalidParameter)` if the device class has no DDS memory.
    pub fn read_dds_record(
        &self,
        validation: ValidationMode,
        timeout: Duration,
    ) -> Result<ChecksumStatus, GoIoError<C::Error>> {
        self.ensure_owner()?;
        let target = self
            .nv_target()
            .ok_or(GoIoError::InvalidParameter("device has no DDS memory"))?;

        let response = self.send(&Command::read_nv_mem(target, 0, DDS_RECORD_LEN as u8), timeout)?;
        let image = response.payload.get(..DDS_RECORD_LEN).ok_or(GoIoError::InvalidResponse(
            ResponseParseError::TooShort { expected: DDS_RECORD_LEN, got: response.payload.len() },
        ))?;
        let record = DdsRecord::from_slice(image).map_err(GoIoError::from_unit)?;
        let status = record
            .validate(validation, self.inner.config.checksum)
            .map_err(GoIoError::from_unit)?;
        if let ChecksumStatus::Mismatch { stored, calculated } = status {
            warn!(
                "{}: accepting DDS record with bad checksum (stored {:#04x}, calculated {:#04x})",
                self.inner.id.name, stored, calculated
            );
        }

        *self.dds() = record;
        Ok(status)
    }

    /// Writes the local mirror to the device, recomputing its checksum first.
    ///
    /// The record goes out in 3-byte chunks; `timeout` bounds the whole write.
    pub fn write_dds_record(&self, timeout: Duration) -> Result<(), GoIoError<C::Error>> {
        self.ensure_owner()?;
        let target = self
            .nv_target()
            .ok_or(GoIoError::InvalidParameter("device has no DDS memory"))?;

        let image = {
            let mut rec = self.dds();
            rec.update_checksum(self.inner.config.checksum);
            rec.to_bytes()
        };

        let deadline = timing::deadline_after(timeout);
        for (i, chunk) in image.chunks(MAX_NV_WRITE_CHUNK).enumerate() {
            let remaining = match deadline {
                Some(at) => at.saturating_duration_since(Instant::now()),
                None => timeout,
            };
            if remaining.is_zero() {
                warn!("{}: DDS write timed out at byte {}", self.inner.id.name, i * MAX_NV_WRITE_CHUNK);
                return Err(GoIoError::Timeout);
            }
            let addr = (i * MAX_NV_WRITE_CHUNK) as u8;
            let command = Command::write_nv_mem(target, addr, chunk).map_err(GoIoError::from_unit)?;
            self.send(&command, remaining)?;
        }
        debug!("{}: DDS record written", self.inner.id.name);
        Ok(())
    }

    /// [`Session::read_dds_record`] with the session's validation mode and record read timeout.
    pub fn load_dds_record(&self) -> Result<ChecksumStatus, GoIoError<C::Error>> {
        self.read_dds_record(self.inner.config.validation, self.inner.config.read_record_timeout)
    }

    /// [`Session::write_dds_record`] with the session's record write timeout.
    pub fn save_dds_record(&self) -> Result<(), GoIoError<C::Error>> {
        self.write_dds_record(self.inner.config.write_record_timeout)
    }

    /// Selects the analog input matching the probe type in the DDS mirror.
    ///
    /// Only meaningful for devices whose input channel depends on the probe.
    pub fn configure_analog_input(&self, timeout: Duration) -> Result<(), GoIoError<C::Error>> {
        if !self.inner.kind.has_probe_dependent_channel() {
            return Err(GoIoError::InvalidParameter("device has a fixed input channel"));
        }
        let channel = match self.probe_type() {
            ProbeType::Analog10V => analog_channel::ANALOG_10V,
            _ => analog_channel::ANALOG_5V,
        };
        self.send(&Command::set_analog_input_channel(channel), timeout)?;
        Ok(())
    }

    // --- Measurement period ---

    /// Programs the nearest legal period to `seconds`.
    ///
    /// # Returns
    ///
    /// The period actually set, in seconds.
    pub fn set_measurement_period(
        &self,
        seconds: f64,
        timeout: Duration,
    ) -> Result<f64, GoIoError<C::Error>> {
        let legal = self.calculate_nearest_legal_period(seconds);
        let ticks = (legal / self.measurement_tick()).round() as u32;
        self.send(&Command::set_measurement_period(ticks), timeout)?;
        debug!("{}: measurement period {} s ({} ticks)", self.inner.id.name, legal, ticks);
        Ok(self.measurement_period())
    }

    /// Reads the period from the device and refreshes the cached value.
    pub fn query_measurement_period(&self, timeout: Duration) -> Result<f64, GoIoError<C::Error>> {
        let response = self.send(&Command::new(CommandCode::GetMeasurementPeriod), timeout)?;
        match response.decode()? {
            Response::MeasurementPeriod { ticks } => {
                let seconds = ticks as f64 * self.measurement_tick();
                self.set_cached_period(seconds);
                Ok(seconds)
            }
            _ => Err(GoIoError::InvalidPacket),
        }
    }
}
