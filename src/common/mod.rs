// src/common/mod.rs

// --- Declare all public modules within common ---
pub mod command;
pub mod crc;
pub mod device;
pub mod error;
pub mod hal_traits;
pub mod packet;
pub mod response;
pub mod timing;
pub mod types;

// --- Re-export key types/traits/functions for easier access ---

// From command.rs
pub use command::{status, Command, CommandCode, NvMemTarget, ResponseShape};

// From crc.rs
pub use crc::ChecksumAlgorithm;

// From device.rs
pub use device::{DeviceIdentifier, DeviceKind, NvMemoryLocation, SampleFormat, VERNIER_VENDOR_ID};

// From error.rs
pub use error::GoIoError;

// From hal_traits.rs
pub use hal_traits::{DeviceConnector, PacketChannel};

// From packet.rs
pub use packet::{InboundPacket, Packet, PACKET_LEN};

// From response/mod.rs
pub use response::{CommandResponse, Response, ResponseParseError};

// From types.rs
pub use types::{
    CalibrationEquation, ChecksumStatus, LastCommandStatus, ProbeType, ValidationMode,
};
