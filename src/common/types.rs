// src/common/types.rs

use core::fmt;

use super::command::CommandCode;

// --- Probe Type ---

/// DDS operation type value that selects the ±10 V analog input.
pub const OPERATION_TYPE_ANALOG_10V: u8 = 14;

/// Electrical interface class of the attached sensor.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ProbeType {
    /// 0..5 V analog input.
    Analog5V = 0,
    /// -10..10 V analog input.
    Analog10V = 1,
    /// Distance reported directly by a motion detector.
    Motion = 2,
}

impl ProbeType {
    /// Probe type implied by a DDS operation type on an analog interface.
    pub fn from_operation_type(operation_type: u8) -> Self {
        if operation_type == OPERATION_TYPE_ANALOG_10V {
            ProbeType::Analog10V
        } else {
            ProbeType::Analog5V
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

// --- Validation ---

/// Checksum enforcement policy applied when reading a DDS record.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum ValidationMode {
    /// A checksum mismatch fails the read.
    #[default]
    Strict,
    /// A checksum mismatch is reported but the record is accepted.
    Lax,
}

/// Outcome of a checksum check that did not fail the call.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ChecksumStatus {
    Valid,
    /// Only returned under [`ValidationMode::Lax`].
    Mismatch { stored: u8, calculated: u8 },
}

impl ChecksumStatus {
    pub fn is_valid(&self) -> bool {
        matches!(self, ChecksumStatus::Valid)
    }
}

// --- Calibration Equations (DDS CalibrationEquation field) ---

/// Calibration equation selector stored in the DDS record.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(i8)]
pub enum CalibrationEquation {
    /// `y = x`
    None = 0,
    /// `y = a + b*x`
    Linear = 1,
    /// `y = a + b*x + c*x^2`
    Quadratic = 2,
    /// `y = a * x^b`
    Power = 3,
    /// `y = a * b^x`
    ModifiedPower = 4,
    /// `y = a * e^(b*x)`
    Exponential = 5,
    /// `y = a + b*ln(x)`
    Logarithmic = 6,
    /// Thermistor resistance to degrees Celsius.
    SteinhartHart = 12,
}

impl CalibrationEquation {
    /// Tries to convert a raw DDS selector into a `CalibrationEquation`.
    pub fn from_i8(value: i8) -> Option<Self> {
        let eq = match value {
            0 => CalibrationEquation::None,
            1 => CalibrationEquation::Linear,
            2 => CalibrationEquation::Quadratic,
            3 => CalibrationEquation::Power,
            4 => CalibrationEquation::ModifiedPower,
            5 => CalibrationEquation::Exponential,
            6 => CalibrationEquation::Logarithmic,
            12 => CalibrationEquation::SteinhartHart,
            _ => return None,
        };
        Some(eq)
    }

    pub fn as_i8(self) -> i8 {
        self as i8
    }
}

impl fmt::Display for CalibrationEquation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// --- Last command bookkeeping ---

/// Last command and status pairs recorded by a session.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct LastCommandStatus {
    /// Most recent command sent (or attempted).
    pub last_command: Option<CommandCode>,
    /// Status of that command; `status::ERROR_COMMUNICATION` if nothing came back.
    pub last_status: u8,
    /// Most recent command that failed.
    pub last_command_with_error: Option<CommandCode>,
    /// Status reported for that failure.
    pub last_error: u8,
}
