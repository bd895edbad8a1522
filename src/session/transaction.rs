// src/session/transaction.rs

use std::sync::atomic::Ordering;
use std::time::Duration;

use log::{debug, warn};

use super::Session;
use crate::common::{
    command::{status, Command, CommandCode},
    error::GoIoError,
    hal_traits::PacketChannel,
    packet,
    response::{parse::parse_response_body, CommandResponse, Response},
    timing,
    types::LastCommandStatus,
};

/// Decoded `GetStatus` response.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DeviceStatus {
    pub flags: u8,
    pub firmware_major: u8,
    pub firmware_minor: u8,
}

impl<C> Session<C>
where
    C: PacketChannel + Send + 'static,
    C::Error: Send + 'static,
{
    /// Sends one command and waits for its response.
    ///
    /// The whole round trip is serialized with other commands on this session. `ClearIo` is
    /// handled on the host and never reaches the device.
    ///
    /// Responses still queued from earlier commands are dropped before sending. A reply that
    /// arrives only after that (the late answer to a command that already timed out) is taken
    /// as this command's answer when both share a command code.
    ///
    /// # Arguments
    ///
    /// * `command` - Command code and parameter block.
    /// * `timeout` - Maximum time to wait for the complete response. `Duration::MAX` waits
    ///   until the device answers or the session closes.
    ///
    /// # Returns
    ///
    /// * `Ok(response)` with status 0 and the payload bytes.
    /// * `Err(GoIoError::DeviceReportedError)` if the device answered with a non-zero status.
    /// * `Err(GoIoError::CommunicationFailure)` if no response arrived in time.
    /// * `Err(GoIoError::DeviceBusy)` for `StartMeasurements` while samples are still buffered.
    pub fn send(
        &self,
        command: &Command,
        timeout: Duration,
    ) -> Result<CommandResponse, GoIoError<C::Error>> {
        self.ensure_owner()?;
        if command.code.is_host_only() {
            self.clear_io()?;
            return Ok(CommandResponse {
                command: command.code,
                status: status::SUCCESS,
                payload: Vec::new(),
            });
        }

        let link = &self.inner.link;
        let mut last = self.inner.transaction.lock();

        if command.code == CommandCode::StartMeasurements && !link.measurements().is_empty() {
            debug!("{}: refusing to start with samples still buffered", self.inner.id.name);
            return Err(GoIoError::DeviceBusy);
        }

        let stale = link.responses().clear();
        if stale > 0 {
            debug!("{}: dropped {} stale responses before {}", self.inner.id.name, stale, command.code);
        }

        let deadline = timing::deadline_after(timeout);
        last.last_command = Some(command.code);
        debug!("{}: sending {} {:02x?}", self.inner.id.name, command.code, command.params.as_slice());

        let wire = packet::encode_command(command);
        let body = match link.write_packet(&wire, timing::PACKET_WRITE_TIMEOUT.min(timeout)) {
            Ok(()) => link.wait_for_response(command.code.as_u8(), deadline),
            Err(GoIoError::Timeout) => Ok(None),
            Err(e) => Err(e),
        };
        let body = match body {
            Ok(Some(body)) => body,
            Ok(None) => {
                record_error(&mut last, command.code, status::ERROR_COMMUNICATION);
                warn!("{}: no response to {} within {:?}", self.inner.id.name, command.code, timeout);
                return Err(GoIoError::CommunicationFailure);
            }
            Err(e) => {
                record_error(&mut last, command.code, status::ERROR_COMMUNICATION);
                return Err(e);
            }
        };

        let response = match parse_response_body(command.code, &body) {
            Ok(response) => response,
            Err(e) => {
                record_error(&mut last, command.code, status::ERROR_COMMUNICATION);
                return Err(e.into());
            }
        };
        last.last_status = response.status;
        if !response.is_success() {
            record_error(&mut last, command.code, response.status);
            debug!(
                "{}: {} failed with status {:#04x}",
                self.inner.id.name, command.code, response.status
            );
            return Err(GoIoError::DeviceReportedError {
                command: command.code,
                status: response.status,
            });
        }

        self.apply_command_effects(command);
        Ok(response)
    }

    /// Host-side state changes implied by a successful command.
    fn apply_command_effects(&self, command: &Command) {
        match command.code {
            CommandCode::Init => {
                self.inner.measuring.store(false, Ordering::Release);
                {
                    let mut buffer = self.inner.link.measurements();
                    buffer.clear();
                    buffer.reset_sequence();
                }
                self.set_cached_period(
                    self.calculate_nearest_legal_period(timing::DEFAULT_MEASUREMENT_PERIOD),
                );
            }
            CommandCode::StartMeasurements => {
                self.inner.link.measurements().reset_sequence();
                self.inner.measuring.store(true, Ordering::Release);
            }
            CommandCode::StopMeasurements => {
                self.inner.measuring.store(false, Ordering::Release);
            }
            CommandCode::SetMeasurementPeriod => {
                if let [a, b, c, d] = command.params.as_slice() {
                    let ticks = u32::from_le_bytes([*a, *b, *c, *d]);
                    self.set_cached_period(ticks as f64 * self.measurement_tick());
                }
            }
            _ => {}
        }
    }

    // --- Convenience commands ---

    /// Sends `command` with the session's command timeout and decodes the response.
    pub fn query(&self, command: &Command) -> Result<Response, GoIoError<C::Error>> {
        let response = self.send(command, self.inner.config.command_timeout)?;
        Ok(response.decode()?)
    }

    pub fn start_measurements(&self) -> Result<(), GoIoError<C::Error>> {
        self.send(&Command::new(CommandCode::StartMeasurements), self.inner.config.command_timeout)
            .map(|_| ())
    }

    pub fn stop_measurements(&self) -> Result<(), GoIoError<C::Error>> {
        self.send(&Command::new(CommandCode::StopMeasurements), self.inner.config.command_timeout)
            .map(|_| ())
    }

    pub fn get_status(&self) -> Result<DeviceStatus, GoIoError<C::Error>> {
        match self.query(&Command::new(CommandCode::GetStatus))? {
            Response::Status { flags, firmware_major, firmware_minor } => {
                Ok(DeviceStatus { flags, firmware_major, firmware_minor })
            }
            _ => Err(GoIoError::InvalidPacket),
        }
    }

    /// Asks the device which sensor is attached (0 when none).
    pub fn query_sensor_number(&self, timeout: Duration) -> Result<u8, GoIoError<C::Error>> {
        let response = self.send(&Command::new(CommandCode::GetSensorId), timeout)?;
        match response.decode()? {
            Response::SensorId { sensor_number } => Ok(sensor_number),
            _ => Err(GoIoError::InvalidPacket),
        }
    }
}

fn record_error(last: &mut LastCommandStatus, command: CommandCode, status: u8) {
    last.last_status = status;
    last.last_command_with_error = Some(command);
    last.last_error = status;
}
