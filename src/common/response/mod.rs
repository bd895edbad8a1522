// src/common/response/mod.rs

mod error;
pub mod parse;

pub use error::ResponseParseError;
pub use parse::{decode_response, parse_response_body};

use crate::common::command::CommandCode;

// --- Raw response ---

/// Status byte plus payload as returned for one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResponse {
    pub command: CommandCode,
    /// 0 on success.
    pub status: u8,
    /// Bytes that followed the status byte (possibly fewer than the full shape).
    pub payload: Vec<u8>,
}

impl CommandResponse {
    pub fn is_success(&self) -> bool {
        self.status == crate::common::command::status::SUCCESS
    }

    /// Decodes the payload according to the command's response shape.
    pub fn decode(&self) -> Result<Response, ResponseParseError> {
        decode_response(self.command, &self.payload)
    }
}

// --- Typed response ---

/// Typed response payload, keyed by command code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Status-only response.
    Default,
    /// `GetStatus`: status flags and firmware version.
    Status { flags: u8, firmware_major: u8, firmware_minor: u8 },
    /// `GetSensorId`: id of the attached sensor (0 when nothing is attached).
    SensorId { sensor_number: u8 },
    /// `ReadLocalNvMem` / `ReadRemoteNvMem`: raw memory bytes.
    NvMemory(Vec<u8>),
    /// `GetMeasurementPeriod`: period in device ticks.
    MeasurementPeriod { ticks: u32 },
    /// `GetAnalogInputChannel`.
    AnalogInputChannel { channel: u8 },
}
