// src/common/error.rs

use super::command::CommandCode;
use super::response::ResponseParseError;

#[derive(Debug, thiserror::Error)]
pub enum GoIoError<E = ()>
where
    E: core::fmt::Debug, // Transport errors only need Debug for the message
{
    /// Underlying I/O error from the transport channel.
    #[error("I/O error: {0:?}")]
    Io(E),

    /// No device matching the identifier is attached (or the ids name no known device class).
    #[error("Device not found")]
    DeviceNotFound,

    /// The device is already bound to an open session.
    #[error("Device is already open")]
    AlreadyOpen,

    /// The library context has not been initialized (or was torn down).
    #[error("Library not initialized")]
    NotInitialized,

    /// The session was closed; the handle can no longer be used.
    #[error("Session closed")]
    SessionClosed,

    /// The calling thread does not own the session.
    #[error("Calling thread does not own the session")]
    OwnershipViolation,

    /// Another thread holds the session lock and no wait was requested.
    #[error("Session is locked by another thread")]
    AlreadyLocked,

    /// `unlock()` was called by a thread that is not the owner.
    #[error("Calling thread is not the session owner")]
    NotOwner,

    /// Operation timed out.
    #[error("Operation timed out")]
    Timeout,

    /// No response arrived from the device within the command timeout.
    #[error("No response from device")]
    CommunicationFailure,

    /// Device answered with a non-zero status byte.
    #[error("Device reported error {status:#04x} for command {command:?}")]
    DeviceReportedError { command: CommandCode, status: u8 },

    /// Stored DDS checksum does not match the one calculated over the record.
    #[error("DDS checksum mismatch: stored {stored:#04x}, calculated {calculated:#04x}")]
    ChecksumInvalid { stored: u8, calculated: u8 },

    /// START_MEASUREMENTS requested while the measurement buffer still holds samples.
    #[error("Measurement buffer not empty; drain it or clear IO before restarting")]
    DeviceBusy,

    /// A drain would split a packet and the session is configured to reject that.
    #[error("Drain of {requested} samples would discard {discarded} samples")]
    SampleLoss { requested: usize, discarded: usize },

    /// Argument outside of what the device or record accepts.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(&'static str),

    /// Response arrived but could not be decoded into the command's shape.
    #[error("Invalid response: {0}")]
    InvalidResponse(ResponseParseError),

    /// Packet from the channel had an impossible header.
    #[error("Invalid packet received")]
    InvalidPacket,

    /// Calibration equation selector has no known formula.
    #[error("Unsupported calibration equation {0}")]
    UnsupportedEquation(i8),
}

impl<E: core::fmt::Debug> From<ResponseParseError> for GoIoError<E> {
    fn from(e: ResponseParseError) -> Self {
        GoIoError::InvalidResponse(e)
    }
}

impl<E: core::fmt::Debug> GoIoError<E> {
    /// Re-types errors that carry no transport payload.
    ///
    /// Used where a value-level error (`GoIoError<()>`, e.g. from record setters) has to
    /// surface through an API typed over a channel error.
    pub fn from_unit(e: GoIoError<()>) -> Self {
        match e {
            GoIoError::Io(()) => GoIoError::CommunicationFailure,
            GoIoError::DeviceNotFound => GoIoError::DeviceNotFound,
            GoIoError::AlreadyOpen => GoIoError::AlreadyOpen,
            GoIoError::NotInitialized => GoIoError::NotInitialized,
            GoIoError::SessionClosed => GoIoError::SessionClosed,
            GoIoError::OwnershipViolation => GoIoError::OwnershipViolation,
            GoIoError::AlreadyLocked => GoIoError::AlreadyLocked,
            GoIoError::NotOwner => GoIoError::NotOwner,
            GoIoError::Timeout => GoIoError::Timeout,
            GoIoError::CommunicationFailure => GoIoError::CommunicationFailure,
            GoIoError::DeviceReportedError { command, status } => {
                GoIoError::DeviceReportedError { command, status }
            }
            GoIoError::ChecksumInvalid { stored, calculated } => {
                GoIoError::ChecksumInvalid { stored, calculated }
            }
            GoIoError::DeviceBusy => GoIoError::DeviceBusy,
            GoIoError::SampleLoss { requested, discarded } => {
                GoIoError::SampleLoss { requested, discarded }
            }
            GoIoError::InvalidParameter(msg) => GoIoError::InvalidParameter(msg),
            GoIoError::InvalidResponse(e) => GoIoError::InvalidResponse(e),
            GoIoError::InvalidPacket => GoIoError::InvalidPacket,
            GoIoError::UnsupportedEquation(eq) => GoIoError::UnsupportedEquation(eq),
        }
    }

    /// True for failures of the transport itself (nothing usable came back).
    pub fn is_transport_failure(&self) -> bool {
        matches!(
            self,
            GoIoError::Io(_) | GoIoError::Timeout | GoIoError::CommunicationFailure
        )
    }
}
