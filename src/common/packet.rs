// src/common/packet.rs

//! Fixed 8-byte packet codec.
//!
//! Every transport message is one packet. Layouts:
//!
//! * command (host to device): `[code, n_params, params[0..6]]`
//! * measurement (device to host): `[count, sequence, samples...]`, bit 7 of byte 0 clear,
//!   bits 0-1 hold the sample count; samples are `i16` LE (up to 3) or one `i32` LE
//! * response chunk (device to host): `[0x80 | final | len, command, data[0..6]]`
//!
//! The concatenated data of all chunks for one command is the status byte followed by the
//! payload.

use arrayvec::ArrayVec;

use super::command::{Command, MAX_PARAM_LEN};
use super::device::SampleFormat;

pub const PACKET_LEN: usize = 8;

/// One raw transport message.
pub type Packet = [u8; PACKET_LEN];

/// Set on byte 0 of every response chunk.
pub const RESPONSE_FLAG: u8 = 0x80;
/// Set on byte 0 of the last chunk of a response.
pub const RESPONSE_FINAL_FLAG: u8 = 0x40;
const RESPONSE_LEN_MASK: u8 = 0x07;
const MEASUREMENT_COUNT_MASK: u8 = 0x03;

/// Data bytes carried by one response chunk.
pub const CHUNK_DATA_LEN: usize = PACKET_LEN - 2;

/// Samples decoded from one measurement packet.
pub type PacketSamples = ArrayVec<i32, 3>;

/// Decoded device-to-host packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundPacket {
    Measurement { sequence: u8, samples: PacketSamples },
    ResponseChunk { command: u8, is_final: bool, data: ArrayVec<u8, CHUNK_DATA_LEN> },
}

/// Error produced when a packet header is impossible.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PacketError {
    /// Measurement header declares 0 samples or more than the format allows.
    BadSampleCount(u8),
    /// Response chunk declares more data bytes than fit in a packet.
    BadChunkLength(u8),
}

/// Encodes a command into its wire packet. Unused parameter bytes are zero.
pub fn encode_command(command: &Command) -> Packet {
    let mut packet = [0u8; PACKET_LEN];
    packet[0] = command.code.as_u8();
    packet[1] = command.params.len() as u8;
    packet[2..2 + command.params.len()].copy_from_slice(&command.params);
    packet
}

/// Decodes one inbound packet field by field.
pub fn decode_inbound(packet: &Packet, format: SampleFormat) -> Result<InboundPacket, PacketError> {
    let header = packet[0];
    if header & RESPONSE_FLAG != 0 {
        let len = header & RESPONSE_LEN_MASK;
        if len as usize > CHUNK_DATA_LEN {
            return Err(PacketError::BadChunkLength(len));
        }
        let mut data = ArrayVec::new();
        // Bounded by CHUNK_DATA_LEN above
        data.extend(packet[2..2 + len as usize].iter().copied());
        return Ok(InboundPacket::ResponseChunk {
            command: packet[1],
            is_final: header & RESPONSE_FINAL_FLAG != 0,
            data,
        });
    }

    let count = header & MEASUREMENT_COUNT_MASK;
    if count == 0 || count as usize > format.max_samples_per_packet() {
        return Err(PacketError::BadSampleCount(count));
    }
    let mut samples = PacketSamples::new();
    match format {
        SampleFormat::I16 => {
            for i in 0..count as usize {
                let at = 2 + i * 2;
                samples.push(i16::from_le_bytes([packet[at], packet[at + 1]]) as i32);
            }
        }
        SampleFormat::I32 => {
            samples.push(i32::from_le_bytes([packet[2], packet[3], packet[4], packet[5]]));
        }
    }
    Ok(InboundPacket::Measurement { sequence: packet[1], samples })
}

/// Encodes a measurement packet. Used by the loopback sensor.
///
/// # Returns
///
/// `None` if `samples` is empty or holds more than the format allows.
pub fn encode_measurement(sequence: u8, samples: &[i32], format: SampleFormat) -> Option<Packet> {
    if samples.is_empty() || samples.len() > format.max_samples_per_packet() {
        return None;
    }
    let mut packet = [0u8; PACKET_LEN];
    packet[0] = samples.len() as u8;
    packet[1] = sequence;
    match format {
        SampleFormat::I16 => {
            for (i, s) in samples.iter().enumerate() {
                let at = 2 + i * 2;
                packet[at..at + 2].copy_from_slice(&(*s as i16).to_le_bytes());
            }
        }
        SampleFormat::I32 => packet[2..6].copy_from_slice(&samples[0].to_le_bytes()),
    }
    Some(packet)
}

/// Splits `status + payload` into response chunks for `command`.
pub fn encode_response(command: u8, status: u8, payload: &[u8]) -> Vec<Packet> {
    let mut body = Vec::with_capacity(payload.len() + 1);
    body.push(status);
    body.extend_from_slice(payload);

    let mut chunks: Vec<Packet> = body
        .chunks(CHUNK_DATA_LEN)
        .map(|chunk| {
            let mut packet = [0u8; PACKET_LEN];
            packet[0] = RESPONSE_FLAG | chunk.len() as u8;
            packet[1] = command;
            packet[2..2 + chunk.len()].copy_from_slice(chunk);
            packet
        })
        .collect();
    if let Some(last) = chunks.last_mut() {
        last[0] |= RESPONSE_FINAL_FLAG;
    }
    chunks
}

/// Splits a command packet back into code byte and parameters. Used by the loopback sensor.
pub fn split_command(packet: &Packet) -> Option<(u8, &[u8])> {
    let n = packet[1] as usize;
    if n > MAX_PARAM_LEN {
        return None;
    }
    Some((packet[0], &packet[2..2 + n]))
}
