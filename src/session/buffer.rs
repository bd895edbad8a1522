// src/session/buffer.rs

use std::collections::VecDeque;

use log::warn;

use super::config::{DrainPolicy, OverflowPolicy};
use crate::common::error::GoIoError;
use crate::common::packet::PacketSamples;

/// Counters describing the measurement buffer.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct BufferStats {
    /// Samples currently buffered.
    pub available: usize,
    /// Packets currently buffered.
    pub packets: usize,
    /// Capacity in packets.
    pub capacity: usize,
    /// Packets lost to overflow since open.
    pub overrun_packets: u64,
    /// Samples lost to overflow since open.
    pub overrun_samples: u64,
    /// Samples discarded by drains that split a packet.
    pub samples_discarded: u64,
    /// Gaps seen in the device's packet sequence numbers.
    pub sequence_gaps: u64,
}

/// Bounded FIFO of measurement packets.
///
/// Filled by the listener thread, drained by the session owner. Packets are kept whole so a
/// drain always knows where packet boundaries fall.
#[derive(Debug)]
pub struct MeasurementBuffer {
    packets: VecDeque<PacketSamples>,
    available: usize,
    capacity: usize,
    overflow: OverflowPolicy,
    latest: Option<i32>,
    last_sequence: Option<u8>,
    stats: BufferStats,
}

impl MeasurementBuffer {
    pub fn new(capacity: usize, overflow: OverflowPolicy) -> Self {
        let capacity = capacity.max(1);
        MeasurementBuffer {
            packets: VecDeque::with_capacity(capacity.min(4096)),
            available: 0,
            capacity,
            overflow,
            latest: None,
            last_sequence: None,
            stats: BufferStats { capacity, ..BufferStats::default() },
        }
    }

    /// Stores one packet. Never blocks; on overflow the configured policy decides what is lost.
    ///
    /// # Returns
    ///
    /// `true` if the incoming packet was stored.
    pub fn push_packet(&mut self, sequence: u8, samples: PacketSamples) -> bool {
        if samples.is_empty() {
            return false;
        }
        if let Some(last) = self.last_sequence {
            if sequence != last.wrapping_add(1) {
                self.stats.sequence_gaps += 1;
            }
        }
        self.last_sequence = Some(sequence);

        if self.packets.len() >= self.capacity {
            self.stats.overrun_packets += 1;
            match self.overflow {
                OverflowPolicy::DropOldest => {
                    if let Some(old) = self.packets.pop_front() {
                        self.available -= old.len();
                        self.stats.overrun_samples += old.len() as u64;
                    }
                    warn!("Measurement buffer full, dropped oldest packet");
                }
                OverflowPolicy::DropNewest => {
                    self.stats.overrun_samples += samples.len() as u64;
                    warn!("Measurement buffer full, dropped incoming packet");
                    return false;
                }
            }
        }

        self.latest = samples.last().copied();
        self.available += samples.len();
        self.packets.push_back(samples);
        true
    }

    /// Number of buffered samples.
    pub fn available(&self) -> usize {
        self.available
    }

    pub fn is_empty(&self) -> bool {
        self.available == 0
    }

    /// Removes up to `max_count` samples in arrival order. Never waits for data.
    ///
    /// If `max_count` ends inside a packet, the remainder of that packet is discarded
    /// (`DrainPolicy::Discard`) or the call fails with `SampleLoss` and removes nothing
    /// (`DrainPolicy::Reject`).
    pub fn drain(&mut self, max_count: usize, policy: DrainPolicy) -> Result<Vec<i32>, GoIoError> {
        // Find where the request ends relative to packet boundaries before touching anything
        let mut whole_packets = 0;
        let mut taken = 0;
        let mut split: Option<(usize, usize)> = None; // (samples kept, samples lost)
        for packet in &self.packets {
            let remaining = max_count - taken;
            if remaining == 0 {
                break;
            }
            if packet.len() <= remaining {
                whole_packets += 1;
                taken += packet.len();
            } else {
                split = Some((remaining, packet.len() - remaining));
                break;
            }
        }

        if let Some((_, lost)) = split {
            if policy == DrainPolicy::Reject {
                return Err(GoIoError::SampleLoss { requested: max_count, discarded: lost });
            }
        }

        let mut out = Vec::with_capacity(taken + split.map_or(0, |(kept, _)| kept));
        for packet in self.packets.drain(..whole_packets) {
            out.extend_from_slice(&packet);
        }
        self.available -= taken;

        if let Some((kept, lost)) = split {
            if let Some(packet) = self.packets.pop_front() {
                out.extend_from_slice(&packet[..kept]);
                self.available -= packet.len();
            }
            self.stats.samples_discarded += lost as u64;
            warn!(
                "Drain of {} samples split a packet, discarded {} samples",
                max_count, lost
            );
        }
        Ok(out)
    }

    /// Most recently buffered sample (0 if none arrived since creation). Empties the buffer.
    pub fn take_latest(&mut self) -> i32 {
        self.clear();
        self.latest.unwrap_or(0)
    }

    /// Discards every buffered sample. The latest-sample memory is kept.
    pub fn clear(&mut self) {
        self.packets.clear();
        self.available = 0;
    }

    /// Forgets the packet sequence so the next packet is not counted as a gap.
    pub fn reset_sequence(&mut self) {
        self.last_sequence = None;
    }

    pub fn stats(&self) -> BufferStats {
        BufferStats { available: self.available, packets: self.packets.len(), ..self.stats }
    }
}
