// src/common/hal_traits.rs

use super::device::DeviceIdentifier;
use super::packet::Packet;
use core::fmt::Debug;

/// Abstraction for non-blocking packet I/O with one Go! device.
///
/// Implemented by the platform USB/HID layer (or by [`crate::sensor::SimulatedSensor`]).
/// Blocking with a timeout is layered on top by the session.
pub trait PacketChannel {
    /// Associated error type for communication errors.
    type Error: Debug;

    /// Attempts to read one inbound packet.
    ///
    /// Returns `Ok(packet)` if a packet was available, or `Err(nb::Error::WouldBlock)`
    /// if nothing has arrived yet. Other errors are returned as `Err(nb::Error::Other(Self::Error))`.
    fn read_packet(&mut self) -> nb::Result<Packet, Self::Error>;

    /// Attempts to write one outbound packet.
    ///
    /// Returns `Ok(())` if the packet was accepted for transmission, or `Err(nb::Error::WouldBlock)`
    /// if the channel cannot take it yet.
    fn write_packet(&mut self, packet: &Packet) -> nb::Result<(), Self::Error>;
}

/// Device enumeration and connection, supplied by the platform layer.
pub trait DeviceConnector {
    type Channel: PacketChannel + Send + 'static;

    /// Lists the attached devices matching the given ids.
    fn list_devices(&mut self, vendor_id: u16, product_id: u16) -> Vec<DeviceIdentifier>;

    /// Opens a transport channel to one device.
    fn connect(
        &mut self,
        id: &DeviceIdentifier,
    ) -> Result<Self::Channel, <Self::Channel as PacketChannel>::Error>;
}
