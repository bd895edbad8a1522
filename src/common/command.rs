//! Go! device command definitions.
//!
//! Numeric codes below are the default assignment used by the crate's packet codec and by the
//! loopback sensor. They are plain constants and can be changed in one place.

use arrayvec::ArrayVec;
use core::fmt;

use super::error::GoIoError;

/// Maximum number of parameter bytes carried by one command packet.
pub const MAX_PARAM_LEN: usize = 6;

/// Fixed-capacity parameter block of a command.
pub type ParamBlock = ArrayVec<u8, MAX_PARAM_LEN>;

/// Status byte values reported in the first byte of every command response.
pub mod status {
    pub const SUCCESS: u8 = 0x00;
    pub const NOT_READY_FOR_NEW_CMD: u8 = 0x30;
    pub const CMD_NOT_SUPPORTED: u8 = 0x31;
    pub const INTERNAL_ERROR1: u8 = 0x32;
    pub const INTERNAL_ERROR2: u8 = 0x33;
    pub const CANNOT_CHANGE_PERIOD_WHILE_COLLECTING: u8 = 0x34;
    pub const CANNOT_READ_NV_MEM_BLK_WHILE_COLLECTING_FAST: u8 = 0x35;
    pub const INVALID_PARAMETER: u8 = 0x36;
    pub const CANNOT_WRITE_FLASH_WHILE_COLLECTING: u8 = 0x37;
    /// Host-side marker recorded when no response arrived at all.
    pub const ERROR_COMMUNICATION: u8 = 0xF0;
}

/// Command code taxonomy.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CommandCode {
    GetStatus = 0x10,
    WriteNvMem = 0x11,
    ReadLocalNvMem = 0x17,
    StartMeasurements = 0x18,
    StopMeasurements = 0x19,
    Init = 0x1A,
    SetMeasurementPeriod = 0x1B,
    GetMeasurementPeriod = 0x1C,
    SetAnalogInputChannel = 0x21,
    GetAnalogInputChannel = 0x22,
    ReadRemoteNvMem = 0x27,
    GetSensorId = 0x28,
    /// Host-side pseudo-command. Sending it clears the session's buffers; it never reaches the wire.
    ClearIo = 0xFE,
}

impl CommandCode {
    /// Tries to convert a raw code byte into a `CommandCode`.
    pub fn from_u8(value: u8) -> Option<Self> {
        use CommandCode::*;
        let code = match value {
            0x10 => GetStatus,
            0x11 => WriteNvMem,
            0x17 => ReadLocalNvMem,
            0x18 => StartMeasurements,
            0x19 => StopMeasurements,
            0x1A => Init,
            0x1B => SetMeasurementPeriod,
            0x1C => GetMeasurementPeriod,
            0x21 => SetAnalogInputChannel,
            0x22 => GetAnalogInputChannel,
            0x27 => ReadRemoteNvMem,
            0x28 => GetSensorId,
            0xFE => ClearIo,
            _ => return None,
        };
        Some(code)
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Returns the response layout the device uses for this command.
    pub fn response_shape(self) -> ResponseShape {
        match self {
            CommandCode::GetStatus => ResponseShape::Status,
            CommandCode::GetSensorId => ResponseShape::SensorId,
            CommandCode::ReadLocalNvMem | CommandCode::ReadRemoteNvMem => ResponseShape::NvMemory,
            CommandCode::GetMeasurementPeriod => ResponseShape::MeasurementPeriod,
            CommandCode::GetAnalogInputChannel => ResponseShape::AnalogInputChannel,
            _ => ResponseShape::Default,
        }
    }

    /// True for codes handled entirely on the host.
    pub fn is_host_only(self) -> bool {
        matches!(self, CommandCode::ClearIo)
    }
}

impl fmt::Display for CommandCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({:#04x})", self, self.as_u8())
    }
}

/// Shape of the payload that follows the status byte in a response.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ResponseShape {
    /// Status byte only.
    Default,
    /// Status flags plus firmware version.
    Status,
    /// One byte sensor number.
    SensorId,
    /// Raw nonvolatile memory bytes, length given by the request.
    NvMemory,
    /// Measurement period in ticks, u32 LE.
    MeasurementPeriod,
    /// One byte channel number.
    AnalogInputChannel,
}

/// Where a NV memory write is directed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum NvMemTarget {
    /// Memory inside the interface (Go!Temp).
    Local = 0,
    /// Memory inside the attached smart sensor (Go!Link, Mini GC).
    Remote = 1,
}

/// Analog input channel numbers for `SetAnalogInputChannel`.
pub mod analog_channel {
    pub const ANALOG_10V: u8 = 1;
    pub const ANALOG_5V: u8 = 2;
}

/// A command code with its parameter block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub code: CommandCode,
    pub params: ParamBlock,
}

impl Command {
    /// Command with no parameters.
    pub fn new(code: CommandCode) -> Self {
        Command { code, params: ParamBlock::new() }
    }

    /// Command with an explicit parameter block.
    ///
    /// # Returns
    ///
    /// * `Err(GoIoError::InvalidParameter)` if `params` exceeds [`MAX_PARAM_LEN`].
    pub fn with_params(code: CommandCode, params: &[u8]) -> Result<Self, GoIoError> {
        let mut block = ParamBlock::new();
        block
            .try_extend_from_slice(params)
            .map_err(|_| GoIoError::InvalidParameter("parameter block longer than 6 bytes"))?;
        Ok(Command { code, params: block })
    }

    /// Read `count` bytes of NV memory starting at `addr`.
    pub fn read_nv_mem(target: NvMemTarget, addr: u8, count: u8) -> Self {
        let code = match target {
            NvMemTarget::Local => CommandCode::ReadLocalNvMem,
            NvMemTarget::Remote => CommandCode::ReadRemoteNvMem,
        };
        let mut params = ParamBlock::new();
        params.push(addr);
        params.push(count);
        Command { code, params }
    }

    /// Write up to 3 bytes of NV memory starting at `addr`.
    ///
    /// Parameters on the wire: `[target, addr, count, data...]`.
    pub fn write_nv_mem(target: NvMemTarget, addr: u8, data: &[u8]) -> Result<Self, GoIoError> {
        if data.is_empty() || data.len() > MAX_NV_WRITE_CHUNK {
            return Err(GoIoError::InvalidParameter("NV write chunk must be 1..=3 bytes"));
        }
        let mut params = ParamBlock::new();
        params.push(target as u8);
        params.push(addr);
        params.push(data.len() as u8);
        params
            .try_extend_from_slice(data)
            .map_err(|_| GoIoError::InvalidParameter("NV write chunk must be 1..=3 bytes"))?;
        Ok(Command { code: CommandCode::WriteNvMem, params })
    }

    /// Set the measurement period in device ticks.
    pub fn set_measurement_period(ticks: u32) -> Self {
        let mut params = ParamBlock::new();
        for b in ticks.to_le_bytes() {
            params.push(b);
        }
        Command { code: CommandCode::SetMeasurementPeriod, params }
    }

    pub fn set_analog_input_channel(channel: u8) -> Self {
        let mut params = ParamBlock::new();
        params.push(channel);
        Command { code: CommandCode::SetAnalogInputChannel, params }
    }

    /// Number of payload bytes a successful response is expected to carry, when fixed.
    pub fn expected_payload_len(&self) -> Option<usize> {
        match self.code.response_shape() {
            ResponseShape::Default => Some(0),
            ResponseShape::Status => Some(3),
            ResponseShape::SensorId => Some(1),
            ResponseShape::NvMemory => self.params.get(1).map(|n| *n as usize),
            ResponseShape::MeasurementPeriod => Some(4),
            ResponseShape::AnalogInputChannel => Some(1),
        }
    }
}

/// Data bytes carried by one `WriteNvMem` packet.
pub const MAX_NV_WRITE_CHUNK: usize = MAX_PARAM_LEN - 3;
