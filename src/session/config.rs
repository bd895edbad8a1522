// src/session/config.rs

use core::time::Duration;

use crate::common::crc::ChecksumAlgorithm;
use crate::common::timing;
use crate::common::types::ValidationMode;

/// Default measurement buffer capacity, in packets.
pub const DEFAULT_BUFFER_CAPACITY: usize = 2000;

/// What the listener does with a packet that arrives while the buffer is full.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Evict the oldest buffered packet to make room.
    #[default]
    DropOldest,
    /// Discard the incoming packet.
    DropNewest,
}

/// What `drain` does when the requested count ends inside a packet.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum DrainPolicy {
    /// Return the requested samples and discard the rest of the split packet.
    #[default]
    Discard,
    /// Fail with `SampleLoss` and leave the buffer untouched.
    Reject,
}

/// Per-session configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Checksum policy for the DDS read performed while opening.
    pub validation: ValidationMode,
    pub command_timeout: Duration,
    pub read_record_timeout: Duration,
    pub write_record_timeout: Duration,
    /// Measurement buffer capacity in packets.
    pub buffer_capacity: usize,
    pub overflow: OverflowPolicy,
    pub drain: DrainPolicy,
    pub checksum: ChecksumAlgorithm,
    /// Listener sleep when the channel is idle.
    pub poll_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            validation: ValidationMode::Strict,
            command_timeout: timing::TIMEOUT_DEFAULT,
            read_record_timeout: timing::READ_DDS_TIMEOUT,
            write_record_timeout: timing::WRITE_DDS_TIMEOUT,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            overflow: OverflowPolicy::default(),
            drain: DrainPolicy::default(),
            checksum: ChecksumAlgorithm::default(),
            poll_interval: timing::LISTENER_POLL_INTERVAL,
        }
    }
}

impl SessionConfig {
    pub fn with_validation(mut self, validation: ValidationMode) -> Self {
        self.validation = validation;
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn with_record_timeouts(mut self, read: Duration, write: Duration) -> Self {
        self.read_record_timeout = read;
        self.write_record_timeout = write;
        self
    }

    /// Sets the buffer capacity in packets (at least 1).
    pub fn with_buffer_capacity(mut self, packets: usize) -> Self {
        self.buffer_capacity = packets.max(1);
        self
    }

    pub fn with_overflow_policy(mut self, policy: OverflowPolicy) -> Self {
        self.overflow = policy;
        self
    }

    pub fn with_drain_policy(mut self, policy: DrainPolicy) -> Self {
        self.drain = policy;
        self
    }

    pub fn with_checksum(mut self, algorithm: ChecksumAlgorithm) -> Self {
        self.checksum = algorithm;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_recommended_values() {
        let cfg = SessionConfig::default();
        assert_eq!(cfg.validation, ValidationMode::Strict);
        assert_eq!(cfg.command_timeout, Duration::from_millis(2000));
        assert_eq!(cfg.read_record_timeout, Duration::from_millis(2000));
        assert_eq!(cfg.write_record_timeout, Duration::from_millis(4000));
        assert_eq!(cfg.buffer_capacity, 2000);
        assert_eq!(cfg.overflow, OverflowPolicy::DropOldest);
        assert_eq!(cfg.drain, DrainPolicy::Discard);
    }

    #[test]
    fn test_builder_methods() {
        let cfg = SessionConfig::default()
            .with_validation(ValidationMode::Lax)
            .with_buffer_capacity(0)
            .with_drain_policy(DrainPolicy::Reject)
            .with_checksum(ChecksumAlgorithm::Crc8Smbus)
            .with_command_timeout(Duration::from_millis(250));
        assert_eq!(cfg.validation, ValidationMode::Lax);
        assert_eq!(cfg.buffer_capacity, 1);
        assert_eq!(cfg.drain, DrainPolicy::Reject);
        assert_eq!(cfg.checksum, ChecksumAlgorithm::Crc8Smbus);
        assert_eq!(cfg.command_timeout, Duration::from_millis(250));
    }
}
