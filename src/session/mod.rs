// src/session/mod.rs

mod buffer;
mod config;
mod io_helpers;
mod ownership;
mod protocol_helpers;
mod transaction;

pub use buffer::BufferStats;
pub use config::{DrainPolicy, OverflowPolicy, SessionConfig, DEFAULT_BUFFER_CAPACITY};
pub use ownership::{OpenRegistry, OwnerToken};
pub use transaction::DeviceStatus;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, warn};
use parking_lot::{Mutex, MutexGuard};

use self::buffer::MeasurementBuffer;
use self::io_helpers::Link;
use self::ownership::{NameRegistration, OwnershipLock};
use crate::common::{
    device::{DeviceIdentifier, DeviceKind},
    error::GoIoError,
    hal_traits::PacketChannel,
    timing,
    types::{LastCommandStatus, ProbeType},
};
use crate::conversion;
use crate::dds::DdsRecord;

/// An open, exclusively owned binding to one Go! device.
///
/// `Session` is a cheap handle: clones refer to the same binding and can be moved to other
/// threads, but only the thread that currently owns the session (see [`Session::lock`]) may
/// issue protocol commands or consume measurements. The opening thread is the initial owner.
///
/// Dropping the last handle closes the session. After `close()` every fallible operation
/// fails with `SessionClosed` and nobody owns the session. The infallible accessors (identity,
/// DDS mirror, probe type, period, buffer statistics) keep reporting the state at close.
pub struct Session<C: PacketChannel> {
    inner: Arc<Inner<C>>,
}

impl<C: PacketChannel> Clone for Session<C> {
    fn clone(&self) -> Self {
        Session { inner: Arc::clone(&self.inner) }
    }
}

struct Inner<C: PacketChannel> {
    id: DeviceIdentifier,
    kind: DeviceKind,
    config: SessionConfig,
    link: Arc<Link<C>>,
    ownership: OwnershipLock,
    /// Held for the whole round trip of a command; also the last-status bookkeeping.
    transaction: Mutex<LastCommandStatus>,
    dds: Mutex<DdsRecord>,
    /// Measurement period in seconds.
    period: Mutex<f64>,
    measuring: AtomicBool,
    closed: AtomicBool,
    listener: Mutex<Option<JoinHandle<()>>>,
    registration: Mutex<Option<NameRegistration>>,
}

impl<C: PacketChannel> Inner<C> {
    /// Stops the listener and releases the device name. Returns `false` if already closed.
    fn shutdown(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.link.stop();
        if let Some(handle) = self.listener.lock().take() {
            if handle.join().is_err() {
                warn!("Listener thread for {} panicked", self.id.name);
            }
        }
        self.registration.lock().take();
        debug!("Session {} closed", self.id);
        true
    }
}

impl<C: PacketChannel> Drop for Inner<C> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<C> Session<C>
where
    C: PacketChannel + Send + 'static,
    C::Error: Send + 'static,
{
    /// Opens a session on `channel` and runs the device's initialization sequence.
    ///
    /// The device name is only guarded against double opening within this call; use
    /// [`Session::open_with_registry`] or [`crate::Library::open`] to share that check.
    ///
    /// # Errors
    ///
    /// * `DeviceNotFound` if the identifier names no known device class.
    /// * `CommunicationFailure` / `DeviceReportedError` / `Io` if initialization fails. Every
    ///   resource acquired so far is released before returning.
    pub fn open(
        channel: C,
        id: &DeviceIdentifier,
        config: SessionConfig,
    ) -> Result<Self, GoIoError<C::Error>> {
        Self::open_with_registry(channel, id, config, &OpenRegistry::new())
    }

    /// Like [`Session::open`], claiming the device name in `registry`.
    ///
    /// Fails with `AlreadyOpen` if the name is already claimed.
    pub fn open_with_registry(
        channel: C,
        id: &DeviceIdentifier,
        config: SessionConfig,
        registry: &OpenRegistry,
    ) -> Result<Self, GoIoError<C::Error>> {
        let kind = id.kind().ok_or(GoIoError::DeviceNotFound)?;
        let registration = registry.register(&id.name).ok_or(GoIoError::AlreadyOpen)?;

        let buffer = MeasurementBuffer::new(config.buffer_capacity, config.overflow);
        let link = Arc::new(Link::new(channel, kind.sample_format(), buffer, config.poll_interval));
        let spawned = {
            let link = Arc::clone(&link);
            thread::Builder::new()
                .name(format!("goio-{}", id.name))
                .spawn(move || io_helpers::run_listener(link))
        };
        let listener = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Could not start listener for {}: {}", id, e);
                link.stop();
                return Err(GoIoError::CommunicationFailure);
            }
        };

        let session = Session {
            inner: Arc::new(Inner {
                id: id.clone(),
                kind,
                link,
                ownership: OwnershipLock::owned_by_current(),
                transaction: Mutex::new(LastCommandStatus::default()),
                dds: Mutex::new(DdsRecord::default()),
                period: Mutex::new(clamp_period(kind, timing::DEFAULT_MEASUREMENT_PERIOD)),
                measuring: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                listener: Mutex::new(Some(listener)),
                registration: Mutex::new(Some(registration)),
                config,
            }),
        };
        debug!("Opening {} as {}", id, kind);

        // On failure `session` is dropped here, which stops the listener and frees the name
        session.run_open_sequence()?;
        Ok(session)
    }

    /// Releases the binding. Later operations on any handle fail with `SessionClosed`.
    pub fn close(&self) -> Result<(), GoIoError<C::Error>> {
        if self.inner.shutdown() {
            Ok(())
        } else {
            Err(GoIoError::SessionClosed)
        }
    }

    pub fn is_open(&self) -> bool {
        !self.inner.closed.load(Ordering::Acquire)
    }

    pub(crate) fn ensure_open(&self) -> Result<(), GoIoError<C::Error>> {
        if self.is_open() {
            Ok(())
        } else {
            Err(GoIoError::SessionClosed)
        }
    }

    /// Fails immediately with `OwnershipViolation` unless the calling thread owns the session.
    pub(crate) fn ensure_owner(&self) -> Result<OwnerToken, GoIoError<C::Error>> {
        self.ensure_open()?;
        self.inner.ownership.ensure_owner().map_err(GoIoError::from_unit)
    }

    // --- Ownership ---

    /// Takes ownership of the session for the calling thread.
    ///
    /// # Returns
    ///
    /// * `Ok(token)` if the session was free or already owned by the caller.
    /// * `Err(GoIoError::AlreadyLocked)` if another thread owns it and `timeout` is zero.
    /// * `Err(GoIoError::Timeout)` if another thread still owns it after `timeout`.
    pub fn lock(&self, timeout: Duration) -> Result<OwnerToken, GoIoError<C::Error>> {
        self.ensure_open()?;
        self.inner.ownership.lock(timeout).map_err(GoIoError::from_unit)
    }

    /// Gives up ownership. Fails with `NotOwner` if the caller does not own the session.
    pub fn unlock(&self) -> Result<(), GoIoError<C::Error>> {
        self.ensure_open()?;
        self.inner.ownership.unlock().map_err(GoIoError::from_unit)
    }

    /// Token of the calling thread, if it owns the open session.
    pub fn owner_token(&self) -> Option<OwnerToken> {
        if !self.is_open() {
            return None;
        }
        self.inner.ownership.current_token()
    }

    pub fn is_owned_by_current_thread(&self) -> bool {
        self.owner_token().is_some()
    }

    /// Whether `token` still proves ownership for the calling thread.
    pub fn is_token_valid(&self, token: &OwnerToken) -> bool {
        self.is_open() && self.inner.ownership.is_valid(token)
    }

    // --- Identity and state ---

    pub fn device_identifier(&self) -> &DeviceIdentifier {
        &self.inner.id
    }

    pub fn device_kind(&self) -> DeviceKind {
        self.inner.kind
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Electrical class of the attached probe, derived from the DDS operation type.
    pub fn probe_type(&self) -> ProbeType {
        if self.inner.kind == DeviceKind::GoMotion {
            return ProbeType::Motion;
        }
        ProbeType::from_operation_type(self.dds().operation_type())
    }

    /// Whether the device was last told to stream.
    pub fn is_measuring(&self) -> bool {
        self.inner.measuring.load(Ordering::Acquire)
    }

    /// Last command sent and the status it produced. Transport failures are recorded with
    /// status `ERROR_COMMUNICATION`.
    pub fn last_cmd_response_status(&self) -> LastCommandStatus {
        *self.inner.transaction.lock()
    }

    // --- Measurement buffer ---

    /// Discards buffered measurements and any responses in flight.
    pub fn clear_io(&self) -> Result<(), GoIoError<C::Error>> {
        self.ensure_owner()?;
        {
            let mut buffer = self.inner.link.measurements();
            buffer.clear();
            buffer.reset_sequence();
        }
        let responses = self.inner.link.responses().clear();
        debug!("{}: IO cleared ({} pending responses dropped)", self.inner.id.name, responses);
        Ok(())
    }

    /// Number of buffered samples. Removes nothing.
    pub fn available(&self) -> Result<usize, GoIoError<C::Error>> {
        self.ensure_open()?;
        Ok(self.inner.link.measurements().available())
    }

    /// Removes up to `max_count` samples in arrival order. Never waits for data.
    ///
    /// To avoid loss, pass `available()` or a multiple of the packet size. Otherwise the rest
    /// of the packet the count ends in is discarded, or the call fails with `SampleLoss` under
    /// [`DrainPolicy::Reject`].
    pub fn drain(&self, max_count: usize) -> Result<Vec<i32>, GoIoError<C::Error>> {
        self.ensure_owner()?;
        self.inner
            .link
            .measurements()
            .drain(max_count, self.inner.config.drain)
            .map_err(GoIoError::from_unit)
    }

    /// Most recently buffered sample (0 if none arrived since open). Empties the buffer.
    pub fn latest_raw(&self) -> Result<i32, GoIoError<C::Error>> {
        self.ensure_owner()?;
        Ok(self.inner.link.measurements().take_latest())
    }

    pub fn buffer_stats(&self) -> BufferStats {
        self.inner.link.measurements().stats()
    }

    // --- Measurement period ---

    /// Cached measurement period in seconds.
    pub fn measurement_period(&self) -> f64 {
        *self.inner.period.lock()
    }

    /// Samples per packet at the current period.
    pub fn packet_size(&self) -> usize {
        timing::packet_size_for_period(self.measurement_period())
            .min(self.inner.kind.sample_format().max_samples_per_packet())
    }

    pub fn measurement_tick(&self) -> f64 {
        self.inner.kind.measurement_tick()
    }

    pub fn min_measurement_period(&self) -> f64 {
        self.inner.kind.min_measurement_period()
    }

    pub fn max_measurement_period(&self) -> f64 {
        self.inner.kind.max_measurement_period()
    }

    /// Nearest period the device can run at: clamped to the class limits, rounded to ticks.
    pub fn calculate_nearest_legal_period(&self, seconds: f64) -> f64 {
        clamp_period(self.inner.kind, seconds)
    }

    fn set_cached_period(&self, seconds: f64) {
        *self.inner.period.lock() = seconds;
    }

    // --- Conversion ---

    /// Raw sample to volts (metres for motion) using the session's probe type.
    pub fn convert_to_voltage(&self, raw: i32) -> f64 {
        conversion::raw_to_voltage(raw, self.probe_type())
    }

    /// Applies the DDS record's equation and active calibration page.
    pub fn calibrate(&self, voltage: f64) -> Result<f64, GoIoError<C::Error>> {
        self.ensure_open()?;
        let rec = self.dds();
        let page = rec.active_calibration_page();
        conversion::calibrate_with_selector(
            voltage,
            rec.calibration_equation(),
            page.a as f64,
            page.b as f64,
            page.c as f64,
        )
        .map_err(GoIoError::from_unit)
    }

    // --- DDS mirror ---

    fn dds(&self) -> MutexGuard<'_, DdsRecord> {
        self.inner.dds.lock()
    }

    /// Copy of the local DDS mirror.
    pub fn dds_record(&self) -> DdsRecord {
        self.dds().clone()
    }

    /// Replaces the local mirror. Nothing is sent to the device until `write_dds_record`.
    pub fn set_dds_record(&self, record: DdsRecord) -> Result<(), GoIoError<C::Error>> {
        self.ensure_owner()?;
        *self.dds() = record;
        Ok(())
    }

    /// Edits the local mirror in place.
    pub fn update_dds_record<R>(
        &self,
        f: impl FnOnce(&mut DdsRecord) -> R,
    ) -> Result<R, GoIoError<C::Error>> {
        self.ensure_owner()?;
        Ok(f(&mut self.dds()))
    }

    /// Resets the local mirror to all zeros.
    pub fn clear_dds_record(&self) -> Result<(), GoIoError<C::Error>> {
        self.set_dds_record(DdsRecord::default())
    }

    /// Checksum of the local mirror under the session's checksum algorithm.
    pub fn calculate_dds_checksum(&self) -> u8 {
        self.dds().calculate_checksum(self.inner.config.checksum)
    }
}

fn clamp_period(kind: DeviceKind, seconds: f64) -> f64 {
    let (min, max, tick) =
        (kind.min_measurement_period(), kind.max_measurement_period(), kind.measurement_tick());
    if seconds.is_nan() {
        return min;
    }
    let ticks = (seconds.clamp(min, max) / tick).round();
    (ticks * tick).clamp(min, max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::command::{analog_channel, status, Command, CommandCode};
    use crate::common::device::VERNIER_VENDOR_ID;
    use crate::common::types::{CalibrationEquation, ChecksumStatus, ValidationMode};
    use crate::dds::defaults;
    use crate::sensor::SimulatedSensor;
    use std::sync::mpsc;
    use std::time::Instant;

    const WAIT: Duration = Duration::from_secs(2);

    fn id_for(kind: DeviceKind) -> DeviceIdentifier {
        DeviceIdentifier::new("dev0", VERNIER_VENDOR_ID, kind.product_id())
    }

    fn quick() -> SessionConfig {
        SessionConfig::default().with_command_timeout(Duration::from_millis(500))
    }

    fn open(sim: &SimulatedSensor) -> Session<SimulatedSensor> {
        let _ = env_logger::builder().is_test(true).try_init();
        Session::open(sim.clone(), &id_for(sim.kind()), quick()).unwrap()
    }

    /// Polls until at least `n` samples are buffered or the wait runs out.
    fn wait_for_available(session: &Session<SimulatedSensor>, n: usize) -> usize {
        let deadline = Instant::now() + WAIT;
        loop {
            let available = session.available().unwrap();
            if available >= n || Instant::now() >= deadline {
                return available;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn smart_record(sensor_number: u8, operation_type: u8, name: &str) -> DdsRecord {
        let mut rec = defaults::generic_analog(sensor_number);
        rec.set_operation_type(operation_type);
        rec.set_long_name(name);
        rec.update_checksum(Default::default());
        rec
    }

    #[test]
    fn test_clamp_period() {
        let kind = DeviceKind::GoLink;
        assert!((clamp_period(kind, 0.0) - 0.002).abs() < 1e-12);
        assert!((clamp_period(kind, 1000.0) - 60.0).abs() < 1e-12);
        assert!((clamp_period(kind, 0.0504) - 0.050).abs() < 1e-12);
        assert!((clamp_period(kind, 0.0506) - 0.051).abs() < 1e-12);
        assert!((clamp_period(kind, f64::NAN) - 0.002).abs() < 1e-12);
        assert!((clamp_period(DeviceKind::GoMotion, 0.005) - 0.020).abs() < 1e-12);
    }

    // --- Open sequence ---

    #[test]
    fn test_open_go_temp_reads_local_record() {
        let sim = SimulatedSensor::new(DeviceKind::GoTemp);
        let session = open(&sim);
        assert_eq!(sim.command_codes(), vec![CommandCode::Init, CommandCode::ReadLocalNvMem]);
        assert_eq!(session.dds_record().sensor_number(), 60);
        assert_eq!(session.probe_type(), ProbeType::Analog5V);
        assert!(!session.is_measuring());
        assert!(session.is_owned_by_current_thread());
        assert!((session.measurement_period() - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_open_go_link_plain_sensor_uses_defaults() {
        let sim = SimulatedSensor::new(DeviceKind::GoLink).with_sensor_number(2);
        let session = open(&sim);
        assert_eq!(
            sim.command_codes(),
            vec![CommandCode::Init, CommandCode::GetSensorId, CommandCode::SetAnalogInputChannel]
        );
        assert_eq!(session.dds_record(), defaults::for_device(DeviceKind::GoLink, 2, Default::default()));
        assert_eq!(sim.analog_channel(), analog_channel::ANALOG_5V);
    }

    #[test]
    fn test_open_go_link_smart_sensor_selects_10v_input() {
        let rec = smart_record(30, crate::common::types::OPERATION_TYPE_ANALOG_10V, "Force");
        let sim = SimulatedSensor::new(DeviceKind::GoLink).with_dds_record(&rec);
        let session = open(&sim);
        assert_eq!(
            sim.command_codes(),
            vec![
                CommandCode::Init,
                CommandCode::GetSensorId,
                CommandCode::ReadRemoteNvMem,
                CommandCode::SetAnalogInputChannel
            ]
        );
        assert_eq!(session.dds_record().long_name(), "Force");
        assert_eq!(session.probe_type(), ProbeType::Analog10V);
        assert_eq!(sim.analog_channel(), analog_channel::ANALOG_10V);
    }

    #[test]
    fn test_open_strict_rejects_bad_record_lax_accepts() {
        let mut rec = smart_record(30, 0, "Custom");
        rec.set_checksum(rec.checksum() ^ 0xFF);

        let sim = SimulatedSensor::new(DeviceKind::GoLink).with_dds_record(&rec);
        let strict = open(&sim);
        assert_eq!(strict.dds_record(), defaults::for_device(DeviceKind::GoLink, 30, Default::default()));
        strict.close().unwrap();

        let sim = SimulatedSensor::new(DeviceKind::GoLink).with_dds_record(&rec);
        let lax = Session::open(sim, &id_for(DeviceKind::GoLink), quick().with_validation(ValidationMode::Lax))
            .unwrap();
        assert_eq!(lax.dds_record().long_name(), "Custom");
    }

    #[test]
    fn test_open_go_motion_installs_motion_defaults() {
        let sim = SimulatedSensor::new(DeviceKind::GoMotion);
        let session = open(&sim);
        assert_eq!(sim.command_codes(), vec![CommandCode::Init]);
        assert_eq!(session.probe_type(), ProbeType::Motion);
        assert_eq!(session.dds_record().active_calibration_page().units(), "m");
        assert!((session.convert_to_voltage(1_500_000) - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_failed_open_releases_everything() {
        let registry = OpenRegistry::new();
        let sim = SimulatedSensor::new(DeviceKind::GoTemp);
        sim.fail_command(CommandCode::Init, status::INTERNAL_ERROR1);
        let result = Session::open_with_registry(sim.clone(), &id_for(DeviceKind::GoTemp), quick(), &registry);
        assert!(matches!(
            result,
            Err(GoIoError::DeviceReportedError { command: CommandCode::Init, status: status::INTERNAL_ERROR1 })
        ));
        assert_eq!(registry.open_count(), 0);

        sim.clear_failures();
        sim.set_unresponsive(true);
        let config = quick().with_command_timeout(Duration::from_millis(50));
        let result = Session::open_with_registry(sim.clone(), &id_for(DeviceKind::GoTemp), config, &registry);
        assert!(matches!(result, Err(GoIoError::CommunicationFailure)));
        assert_eq!(registry.open_count(), 0);

        sim.set_unresponsive(false);
        assert!(Session::open_with_registry(sim, &id_for(DeviceKind::GoTemp), quick(), &registry).is_ok());
    }

    #[test]
    fn test_open_twice_in_registry() {
        let registry = OpenRegistry::new();
        let id = id_for(DeviceKind::GoTemp);
        let sim = SimulatedSensor::new(DeviceKind::GoTemp);
        let first = Session::open_with_registry(sim.clone(), &id, quick(), &registry).unwrap();
        assert!(matches!(
            Session::open_with_registry(sim.clone(), &id, quick(), &registry),
            Err(GoIoError::AlreadyOpen)
        ));
        drop(first);
        assert_eq!(registry.open_count(), 0);
    }

    #[test]
    fn test_unknown_device_class() {
        let id = DeviceIdentifier::new("dev0", VERNIER_VENDOR_ID, 0x0099);
        let sim = SimulatedSensor::new(DeviceKind::GoTemp);
        assert!(matches!(Session::open(sim, &id, quick()), Err(GoIoError::DeviceNotFound)));
    }

    // --- Lifecycle and ownership ---

    #[test]
    fn test_close_invalidates_every_handle() {
        let sim = SimulatedSensor::new(DeviceKind::GoTemp);
        let session = open(&sim);
        let other = session.clone();
        session.close().unwrap();
        assert!(!other.is_open());
        assert!(matches!(other.close(), Err(GoIoError::SessionClosed)));
        assert!(matches!(other.get_status(), Err(GoIoError::SessionClosed)));
        assert!(matches!(other.available(), Err(GoIoError::SessionClosed)));
        assert!(matches!(other.lock(Duration::ZERO), Err(GoIoError::SessionClosed)));
        assert!(matches!(other.calibrate(1.0), Err(GoIoError::SessionClosed)));
        assert!(matches!(other.drain(1), Err(GoIoError::SessionClosed)));
        assert!(matches!(other.clear_dds_record(), Err(GoIoError::SessionClosed)));
        assert_eq!(other.owner_token(), None);
        assert!(!session.is_owned_by_current_thread());
        // Plain accessors report the state at close
        assert_eq!(other.dds_record().sensor_number(), 60);
    }

    #[test]
    fn test_unbounded_timeouts() {
        let sim = SimulatedSensor::new(DeviceKind::GoTemp);
        let session = open(&sim);
        let token = session.lock(Duration::MAX).unwrap();
        assert!(session.is_token_valid(&token));

        let response = session.send(&Command::new(CommandCode::GetStatus), Duration::MAX).unwrap();
        assert!(response.is_success());
        session.write_dds_record(Duration::MAX).unwrap();
        assert_eq!(sim.dds_record(), session.dds_record());
    }

    #[test]
    fn test_ownership_transfer_between_threads() {
        let sim = SimulatedSensor::new(DeviceKind::GoTemp);
        let session = open(&sim);
        let worker = session.clone();
        let (to_worker, worker_rx) = mpsc::channel::<()>();
        let (to_main, main_rx) = mpsc::channel();

        let handle = thread::spawn(move || {
            let violation = worker.get_status();
            let busy = worker.lock(Duration::ZERO);
            let not_owner = worker.unlock();
            to_main.send(()).unwrap();
            worker_rx.recv().unwrap();

            let token = worker.lock(WAIT).unwrap();
            let status = worker.get_status();
            worker.unlock().unwrap();
            (violation, busy, not_owner, token, status)
        });

        main_rx.recv().unwrap();
        session.unlock().unwrap();
        assert!(!session.is_owned_by_current_thread());
        assert!(matches!(session.drain(10), Err(GoIoError::OwnershipViolation)));
        to_worker.send(()).unwrap();

        let (violation, busy, not_owner, token, status) = handle.join().unwrap();
        assert!(matches!(violation, Err(GoIoError::OwnershipViolation)));
        assert!(matches!(busy, Err(GoIoError::AlreadyLocked)));
        assert!(matches!(not_owner, Err(GoIoError::NotOwner)));
        assert!(status.is_ok());
        assert!(!session.is_token_valid(&token));

        let mine = session.lock(Duration::ZERO).unwrap();
        assert!(session.is_token_valid(&mine));
        assert_eq!(session.owner_token(), Some(mine));
    }

    // --- Command transport ---

    #[test]
    fn test_device_error_is_recorded() {
        let sim = SimulatedSensor::new(DeviceKind::GoTemp);
        let session = open(&sim);
        sim.fail_command(CommandCode::GetStatus, status::INTERNAL_ERROR2);
        assert!(matches!(
            session.get_status(),
            Err(GoIoError::DeviceReportedError { command: CommandCode::GetStatus, status: status::INTERNAL_ERROR2 })
        ));
        let last = session.last_cmd_response_status();
        assert_eq!(last.last_command, Some(CommandCode::GetStatus));
        assert_eq!(last.last_command_with_error, Some(CommandCode::GetStatus));
        assert_eq!(last.last_error, status::INTERNAL_ERROR2);

        sim.clear_failures();
        let device = session.get_status().unwrap();
        assert_eq!(device.flags, 0);
        let last = session.last_cmd_response_status();
        assert_eq!(last.last_status, status::SUCCESS);
        assert_eq!(last.last_error, status::INTERNAL_ERROR2);
    }

    #[test]
    fn test_timeout_is_communication_failure() {
        let sim = SimulatedSensor::new(DeviceKind::GoTemp);
        let session = open(&sim);
        sim.set_unresponsive(true);
        let result = session.send(&Command::new(CommandCode::GetStatus), Duration::from_millis(50));
        assert!(matches!(result, Err(GoIoError::CommunicationFailure)));
        assert_eq!(session.last_cmd_response_status().last_status, status::ERROR_COMMUNICATION);

        sim.set_unresponsive(false);
        assert!(session.get_status().is_ok());
    }

    #[test]
    fn test_late_reply_purged_before_next_send() {
        let sim = SimulatedSensor::new(DeviceKind::GoTemp);
        let session = open(&sim);
        sim.set_unresponsive(true);
        let result = session.send(&Command::new(CommandCode::GetStatus), Duration::from_millis(20));
        assert!(matches!(result, Err(GoIoError::CommunicationFailure)));

        sim.set_unresponsive(false);
        for chunk in crate::common::packet::encode_response(CommandCode::GetStatus.as_u8(), 0, &[0x55, 9, 9]) {
            sim.push_raw(chunk);
        }
        thread::sleep(Duration::from_millis(50));

        let device = session.get_status().unwrap();
        assert_eq!(device.flags, 0);
        assert_ne!(device.firmware_major, 9);
    }

    #[test]
    fn test_channel_failure_surfaces_as_io() {
        let sim = SimulatedSensor::new(DeviceKind::GoTemp);
        let session = open(&sim);
        sim.disconnect();
        let result = session.get_status();
        assert!(matches!(result, Err(GoIoError::Io(crate::sensor::SimError::Disconnected))));
    }

    #[test]
    fn test_clear_io_never_reaches_device() {
        let sim = SimulatedSensor::new(DeviceKind::GoTemp);
        let session = open(&sim);
        let response = session.send(&Command::new(CommandCode::ClearIo), WAIT).unwrap();
        assert!(response.is_success());
        assert!(!sim.command_codes().contains(&CommandCode::ClearIo));
    }

    // --- Streaming ---

    #[test]
    fn test_end_to_end_strict_open_stream_and_drain() {
        let sim = SimulatedSensor::new(DeviceKind::GoTemp);
        let session = open(&sim);
        assert_eq!(session.probe_type(), ProbeType::Analog5V);

        let actual = session.set_measurement_period(0.05, WAIT).unwrap();
        assert!((actual - 0.05).abs() < 1e-12);
        assert_eq!(session.packet_size(), 1);

        session.start_measurements().unwrap();
        assert!(session.is_measuring());
        let samples: Vec<i32> = (100..120).collect();
        assert_eq!(sim.push_samples(&samples), 20);

        assert_eq!(wait_for_available(&session, 20), 20);
        assert_eq!(session.drain(20).unwrap(), samples);
        assert_eq!(session.available().unwrap(), 0);

        session.stop_measurements().unwrap();
        assert!(!session.is_measuring());
        assert!(!sim.is_measuring());
    }

    #[test]
    fn test_start_refused_until_buffer_cleared() {
        let sim = SimulatedSensor::new(DeviceKind::GoTemp);
        let session = open(&sim);
        session.start_measurements().unwrap();
        sim.push_samples(&[1, 2, 3]);
        assert_eq!(wait_for_available(&session, 3), 3);
        session.stop_measurements().unwrap();

        assert!(matches!(session.start_measurements(), Err(GoIoError::DeviceBusy)));
        let starts = sim.command_codes().iter().filter(|c| **c == CommandCode::StartMeasurements).count();
        assert_eq!(starts, 1);

        session.clear_io().unwrap();
        assert_eq!(session.available().unwrap(), 0);
        session.start_measurements().unwrap();
    }

    #[test]
    fn test_unaligned_drain_discards_rest_of_packet() {
        let sim = SimulatedSensor::new(DeviceKind::GoLink);
        let session = open(&sim);
        session.set_measurement_period(0.008, WAIT).unwrap();
        assert_eq!(session.packet_size(), 3);
        assert_eq!(sim.packet_size(), 3);

        session.start_measurements().unwrap();
        sim.push_samples(&[0, 1, 2, 3, 4, 5]);
        assert_eq!(wait_for_available(&session, 6), 6);

        assert_eq!(session.drain(4).unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(session.available().unwrap(), 0);
        assert_eq!(session.buffer_stats().samples_discarded, 2);
    }

    #[test]
    fn test_reject_policy_keeps_samples() {
        let sim = SimulatedSensor::new(DeviceKind::GoLink);
        let config = quick().with_drain_policy(DrainPolicy::Reject);
        let session = Session::open(sim.clone(), &id_for(DeviceKind::GoLink), config).unwrap();
        session.set_measurement_period(0.010, WAIT).unwrap();
        session.start_measurements().unwrap();
        sim.push_samples(&[7, 8, 9, 10]);
        assert_eq!(wait_for_available(&session, 4), 4);

        assert!(matches!(
            session.drain(3),
            Err(GoIoError::SampleLoss { requested: 3, discarded: 1 })
        ));
        assert_eq!(session.drain(4).unwrap(), vec![7, 8, 9, 10]);
    }

    #[test]
    fn test_latest_raw_empties_buffer() {
        let sim = SimulatedSensor::new(DeviceKind::GoTemp);
        let session = open(&sim);
        assert_eq!(session.latest_raw().unwrap(), 0);
        session.start_measurements().unwrap();
        sim.push_samples(&[11, 22, 33]);
        assert_eq!(wait_for_available(&session, 3), 3);
        assert_eq!(session.latest_raw().unwrap(), 33);
        assert_eq!(session.available().unwrap(), 0);
    }

    // --- Measurement period ---

    #[test]
    fn test_period_rounding_and_limits() {
        let sim = SimulatedSensor::new(DeviceKind::GoLink);
        let session = open(&sim);

        let actual = session.set_measurement_period(0.0104, WAIT).unwrap();
        assert!((actual - 0.010).abs() < 1e-12);
        assert_eq!(sim.period_ticks(), 10);
        assert!((session.query_measurement_period(WAIT).unwrap() - 0.010).abs() < 1e-12);

        let actual = session.set_measurement_period(0.0, WAIT).unwrap();
        assert!((actual - session.min_measurement_period()).abs() < 1e-12);
        let actual = session.set_measurement_period(1.0e6, WAIT).unwrap();
        assert!((actual - session.max_measurement_period()).abs() < 1e-9);
        assert_eq!(sim.period_ticks(), 60_000);

        session.start_measurements().unwrap();
        assert!(matches!(
            session.set_measurement_period(0.5, WAIT),
            Err(GoIoError::DeviceReportedError {
                command: CommandCode::SetMeasurementPeriod,
                status: status::CANNOT_CHANGE_PERIOD_WHILE_COLLECTING
            })
        ));
        assert!((session.measurement_period() - 60.0).abs() < 1e-9);
    }

    // --- DDS record ---

    #[test]
    fn test_dds_write_then_read_round_trip() {
        let sim = SimulatedSensor::new(DeviceKind::GoTemp);
        let session = open(&sim);
        let written = crate::dds::sample_record();
        session.set_dds_record(written.clone()).unwrap();
        session.write_dds_record(crate::common::timing::WRITE_DDS_TIMEOUT).unwrap();

        let stored = sim.dds_record();
        assert_eq!(stored, written);
        assert_eq!(stored.checksum(), session.calculate_dds_checksum());

        session.clear_dds_record().unwrap();
        assert_eq!(session.dds_record(), DdsRecord::default());

        let status = session.read_dds_record(ValidationMode::Strict, WAIT).unwrap();
        assert_eq!(status, ChecksumStatus::Valid);
        assert_eq!(session.dds_record(), written);
        assert_eq!(session.dds_record().to_bytes(), written.to_bytes());
    }

    #[test]
    fn test_save_and_load_use_configured_timeouts() {
        let sim = SimulatedSensor::new(DeviceKind::GoTemp);
        let config = quick().with_record_timeouts(WAIT, Duration::ZERO);
        let session = Session::open(sim.clone(), &id_for(DeviceKind::GoTemp), config).unwrap();
        session.update_dds_record(|rec| rec.set_long_name("Saved")).unwrap();
        assert!(matches!(session.save_dds_record(), Err(GoIoError::Timeout)));
        assert_ne!(sim.dds_record().long_name(), "Saved");

        let config = quick().with_record_timeouts(WAIT, WAIT);
        drop(session);
        let session = Session::open(sim.clone(), &id_for(DeviceKind::GoTemp), config).unwrap();
        session.update_dds_record(|rec| rec.set_long_name("Saved")).unwrap();
        session.save_dds_record().unwrap();
        assert_eq!(sim.dds_record().long_name(), "Saved");

        session.clear_dds_record().unwrap();
        assert_eq!(session.load_dds_record().unwrap(), ChecksumStatus::Valid);
        assert_eq!(session.dds_record().long_name(), "Saved");
    }

    #[test]
    fn test_read_record_strict_keeps_mirror_lax_replaces() {
        let mut corrupt = defaults::go_temp();
        corrupt.set_long_name("Corrupt");
        corrupt.set_checksum(corrupt.calculate_checksum(Default::default()).wrapping_add(1));
        let sim = SimulatedSensor::new(DeviceKind::GoTemp).with_dds_record(&corrupt);
        let session = open(&sim);
        // Open fell back to defaults
        assert_eq!(session.dds_record().long_name(), defaults::go_temp().long_name());

        assert!(matches!(
            session.read_dds_record(ValidationMode::Strict, WAIT),
            Err(GoIoError::ChecksumInvalid { .. })
        ));
        assert_eq!(session.dds_record().long_name(), defaults::go_temp().long_name());

        let status = session.read_dds_record(ValidationMode::Lax, WAIT).unwrap();
        assert!(!status.is_valid());
        assert_eq!(session.dds_record().long_name(), "Corrupt");
    }

    #[test]
    fn test_record_memory_missing_or_fixed_channel() {
        let sim = SimulatedSensor::new(DeviceKind::GoMotion);
        let session = open(&sim);
        assert!(matches!(session.write_dds_record(WAIT), Err(GoIoError::InvalidParameter(_))));
        assert!(matches!(
            session.read_dds_record(ValidationMode::Strict, WAIT),
            Err(GoIoError::InvalidParameter(_))
        ));
        assert!(matches!(session.configure_analog_input(WAIT), Err(GoIoError::InvalidParameter(_))));
    }

    #[test]
    fn test_calibration_follows_record() {
        let sim = SimulatedSensor::new(DeviceKind::GoTemp);
        let session = open(&sim);
        let volts = session.convert_to_voltage(16384);
        assert!((volts - 2.5).abs() < 1e-12);
        assert!((session.calibrate(1.0).unwrap() - 51.2).abs() < 1e-4);

        session.update_dds_record(|rec| rec.set_active_cal_page(1)).unwrap().unwrap();
        assert!((session.calibrate(0.0).unwrap() - 32.0).abs() < 1e-4);

        session
            .update_dds_record(|rec| {
                rec.set_operation_type(crate::common::types::OPERATION_TYPE_ANALOG_10V)
            })
            .unwrap();
        assert_eq!(session.probe_type(), ProbeType::Analog10V);

        session
            .update_dds_record(|rec| rec.set_calibration_equation(CalibrationEquation::SteinhartHart.as_i8() + 1))
            .unwrap();
        assert!(matches!(session.calibrate(1.0), Err(GoIoError::UnsupportedEquation(13))));
    }

    #[test]
    fn test_dds_mutation_requires_ownership() {
        let sim = SimulatedSensor::new(DeviceKind::GoTemp);
        let session = open(&sim);
        session.unlock().unwrap();
        assert!(matches!(session.clear_dds_record(), Err(GoIoError::OwnershipViolation)));
        assert!(matches!(session.clear_io(), Err(GoIoError::OwnershipViolation)));
        // Reads stay available to any thread
        assert_eq!(session.dds_record().sensor_number(), 60);
    }
}
