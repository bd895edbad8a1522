// src/lib.rs

//! Host-side session and protocol layer for Go!-family data-acquisition devices
//! (Go!Temp, Go!Link, Go!Motion, Mini GC).
//!
//! The physical transport is abstracted behind [`PacketChannel`] and device discovery behind
//! [`DeviceConnector`]; [`sensor::SimulatedSensor`] implements both sides in memory.

pub mod common;
pub mod conversion;
pub mod dds;
pub mod library;
pub mod sensor;
pub mod session;

// Re-export key types for convenience
pub use common::{
    ChecksumAlgorithm, Command, CommandCode, CommandResponse, DeviceConnector, DeviceIdentifier,
    DeviceKind, GoIoError, PacketChannel, ProbeType, Response, ValidationMode,
};
pub use dds::DdsRecord;
pub use library::Library;
pub use session::{BufferStats, DrainPolicy, OverflowPolicy, OwnerToken, Session, SessionConfig};
