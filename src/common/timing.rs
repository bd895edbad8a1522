// src/common/timing.rs

use std::time::{Duration, Instant};

// Recommended timeouts. All of them can be overridden per session through `SessionConfig`.

/// Default timeout for a general command round trip.
pub const TIMEOUT_DEFAULT: Duration = Duration::from_millis(2000);
/// Timeout for reading a whole DDS record.
pub const READ_DDS_TIMEOUT: Duration = Duration::from_millis(2000);
/// Timeout for writing a whole DDS record (NV memory writes are slow).
pub const WRITE_DDS_TIMEOUT: Duration = Duration::from_millis(4000);

/// Time allowed for the channel to accept one outbound packet.
pub const PACKET_WRITE_TIMEOUT: Duration = Duration::from_millis(100);
/// Pause between retries of a `WouldBlock` write.
pub const IO_RETRY_DELAY: Duration = Duration::from_micros(100);

/// Listener thread sleep when the channel has nothing to read.
pub const LISTENER_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Point in time `timeout` from now.
///
/// `None` when that lies beyond what `Instant` can represent (for example `Duration::MAX`);
/// callers treat it as an unbounded wait.
pub fn deadline_after(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

/// Whether `deadline` has passed. An unbounded deadline never expires.
pub fn expired(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() >= d)
}

// === Measurement period ===

/// Periods at or above this send one sample per packet (50 Hz and slower).
pub const SINGLE_SAMPLE_PERIOD_THRESHOLD: f64 = 0.020;
/// Measurement period configured by `Init`.
pub const DEFAULT_MEASUREMENT_PERIOD: f64 = 0.1;

/// Number of samples the device groups into one packet at the given period.
///
/// 1 at 50 Hz or slower, otherwise enough samples to keep the packet rate at or below 50 Hz,
/// capped at 3.
pub fn packet_size_for_period(period_seconds: f64) -> usize {
    if period_seconds >= SINGLE_SAMPLE_PERIOD_THRESHOLD || period_seconds <= 0.0 {
        return 1;
    }
    let n = (SINGLE_SAMPLE_PERIOD_THRESHOLD / period_seconds).ceil() as usize;
    n.clamp(1, 3)
}
