// src/sensor/mod.rs

// Device side of the packet protocol: a simulated Go! device used for loopback testing
// and for running host code without hardware.

pub mod parser; // Raw command packet -> Command
pub mod sim; // In-memory device and bus

// --- Public Re-exports ---
pub use parser::parse_command_packet;
pub use sim::{SimError, SimulatedConnector, SimulatedSensor};
