// src/common/response/parse.rs

use super::error::ResponseParseError;
use super::{CommandResponse, Response};

use crate::common::command::{CommandCode, ResponseShape};

// --- Internal Helpers ---
#[inline]
fn require(payload: &[u8], expected: usize) -> Result<&[u8], ResponseParseError> {
    payload
        .get(..expected)
        .ok_or(ResponseParseError::TooShort { expected, got: payload.len() })
}

// --- Public Parsing Functions ---

/// Splits a reassembled response body (status byte followed by payload) into a
/// [`CommandResponse`].
///
/// A body of a single byte is still a valid response: the status is decoded and the payload is
/// empty. Only an empty body is rejected.
pub fn parse_response_body(
    command: CommandCode,
    body: &[u8],
) -> Result<CommandResponse, ResponseParseError> {
    let (&status, payload) = body.split_first().ok_or(ResponseParseError::EmptyInput)?;
    Ok(CommandResponse { command, status, payload: payload.to_vec() })
}

/// Decodes a payload field by field according to the shape of `command`.
pub fn decode_response(command: CommandCode, payload: &[u8]) -> Result<Response, ResponseParseError> {
    match command.response_shape() {
        ResponseShape::Default => Ok(Response::Default),
        ResponseShape::Status => {
            let p = require(payload, 3)?;
            Ok(Response::Status { flags: p[0], firmware_major: p[1], firmware_minor: p[2] })
        }
        ResponseShape::SensorId => {
            let p = require(payload, 1)?;
            Ok(Response::SensorId { sensor_number: p[0] })
        }
        ResponseShape::NvMemory => Ok(Response::NvMemory(payload.to_vec())),
        ResponseShape::MeasurementPeriod => {
            let p = require(payload, 4)?;
            Ok(Response::MeasurementPeriod { ticks: u32::from_le_bytes([p[0], p[1], p[2], p[3]]) })
        }
        ResponseShape::AnalogInputChannel => {
            let p = require(payload, 1)?;
            Ok(Response::AnalogInputChannel { channel: p[0] })
        }
    }
}
