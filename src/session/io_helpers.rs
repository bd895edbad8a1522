// src/session/io_helpers.rs

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, trace, warn};
use nb::Result as NbResult;
use parking_lot::{Condvar, Mutex, MutexGuard};

use super::buffer::MeasurementBuffer;
use crate::common::{
    error::GoIoError,
    hal_traits::PacketChannel,
    packet::{self, InboundPacket, Packet},
    device::SampleFormat,
    timing,
};

// --- Response routing ---

/// Response bodies reassembled from chunks, waiting for the command transport.
#[derive(Debug)]
pub(super) struct ResponseQueue<E> {
    /// Command code and data of the response being reassembled.
    partial: Option<(u8, Vec<u8>)>,
    completed: VecDeque<(u8, Vec<u8>)>,
    /// Last channel error seen by the listener, reported to the next waiting command.
    fault: Option<E>,
}

impl<E> Default for ResponseQueue<E> {
    fn default() -> Self {
        ResponseQueue { partial: None, completed: VecDeque::new(), fault: None }
    }
}

impl<E> ResponseQueue<E> {
    fn push_chunk(&mut self, command: u8, is_final: bool, data: &[u8]) -> bool {
        let continues = matches!(&self.partial, Some((code, _)) if *code == command);
        if !continues {
            if let Some((stale, _)) = self.partial.take() {
                debug!("Discarding incomplete response for command {:#04x}", stale);
            }
            self.partial = Some((command, Vec::new()));
        }
        if let Some((_, body)) = self.partial.as_mut() {
            body.extend_from_slice(data);
        }
        if is_final {
            if let Some(done) = self.partial.take() {
                self.completed.push_back(done);
            }
        }
        is_final
    }

    /// Drops everything not yet consumed, including a pending channel fault.
    ///
    /// Returns the number of discarded responses.
    pub(super) fn clear(&mut self) -> usize {
        let n = self.completed.len() + usize::from(self.partial.is_some());
        self.completed.clear();
        self.partial = None;
        if self.fault.take().is_some() {
            debug!("Clearing stale channel fault");
        }
        n
    }
}

// --- Channel link shared with the listener ---

/// State shared between a session and its listener thread.
pub(super) struct Link<C: PacketChannel> {
    channel: Mutex<C>,
    format: SampleFormat,
    pub(super) measurements: Mutex<MeasurementBuffer>,
    pub(super) responses: Mutex<ResponseQueue<C::Error>>,
    response_ready: Condvar,
    running: AtomicBool,
    poll_interval: Duration,
}

impl<C: PacketChannel> Link<C> {
    pub(super) fn new(
        channel: C,
        format: SampleFormat,
        buffer: MeasurementBuffer,
        poll_interval: Duration,
    ) -> Self {
        Link {
            channel: Mutex::new(channel),
            format,
            measurements: Mutex::new(buffer),
            responses: Mutex::new(ResponseQueue::default()),
            response_ready: Condvar::new(),
            running: AtomicBool::new(true),
            poll_interval,
        }
    }

    pub(super) fn measurements(&self) -> MutexGuard<'_, MeasurementBuffer> {
        self.measurements.lock()
    }

    pub(super) fn responses(&self) -> MutexGuard<'_, ResponseQueue<C::Error>> {
        self.responses.lock()
    }

    /// Executes a non-blocking channel operation (`f`) repeatedly until it
    /// stops returning `WouldBlock`, returning the final result or a timeout error.
    pub(super) fn execute_blocking_io_with_timeout<FN, T>(
        &self,
        timeout: Duration,
        mut f: FN,
    ) -> Result<T, GoIoError<C::Error>>
    where
        FN: FnMut(&mut C) -> NbResult<T, C::Error>,
    {
        let deadline = timing::deadline_after(timeout);
        loop {
            // Released between attempts so the listener can keep reading
            let mut channel = self.channel.lock();
            let attempt = f(&mut *channel);
            drop(channel);
            match attempt {
                Ok(result) => return Ok(result),
                Err(nb::Error::WouldBlock) => {
                    if timing::expired(deadline) {
                        return Err(GoIoError::Timeout);
                    }
                    thread::sleep(timing::IO_RETRY_DELAY);
                }
                Err(nb::Error::Other(e)) => return Err(GoIoError::Io(e)),
            }
        }
    }

    pub(super) fn write_packet(&self, packet: &Packet, timeout: Duration) -> Result<(), GoIoError<C::Error>> {
        trace!("-> {:02x?}", packet);
        self.execute_blocking_io_with_timeout(timeout, |ch| ch.write_packet(packet))
    }

    /// Reads and routes every packet the channel has ready.
    ///
    /// # Returns
    ///
    /// The number of packets routed, or the channel error that stopped reading.
    pub(super) fn poll_once(&self) -> Result<usize, C::Error> {
        let mut routed = 0;
        loop {
            let read = self.channel.lock().read_packet();
            match read {
                Ok(packet) => {
                    self.route(&packet);
                    routed += 1;
                }
                Err(nb::Error::WouldBlock) => return Ok(routed),
                Err(nb::Error::Other(e)) => return Err(e),
            }
        }
    }

    fn route(&self, raw: &Packet) {
        trace!("<- {:02x?}", raw);
        match packet::decode_inbound(raw, self.format) {
            Ok(InboundPacket::Measurement { sequence, samples }) => {
                self.measurements().push_packet(sequence, samples);
            }
            Ok(InboundPacket::ResponseChunk { command, is_final, data }) => {
                let complete = self.responses().push_chunk(command, is_final, &data);
                if complete {
                    self.response_ready.notify_all();
                }
            }
            Err(e) => warn!("Discarding unreadable packet {:02x?}: {:?}", raw, e),
        }
    }

    /// Blocks until a complete response for `command` arrives or `deadline` passes
    /// (`None` waits until the link stops).
    ///
    /// Responses for other commands are stale and are dropped.
    ///
    /// # Returns
    ///
    /// * `Ok(Some(body))` with the status byte and payload.
    /// * `Ok(None)` if nothing arrived in time.
    /// * `Err(GoIoError::Io)` if the listener hit a channel error while waiting.
    pub(super) fn wait_for_response(
        &self,
        command: u8,
        deadline: Option<Instant>,
    ) -> Result<Option<Vec<u8>>, GoIoError<C::Error>> {
        let mut queue = self.responses();
        loop {
            if let Some(e) = queue.fault.take() {
                return Err(GoIoError::Io(e));
            }
            while let Some((code, body)) = queue.completed.pop_front() {
                if code == command {
                    return Ok(Some(body));
                }
                debug!("Discarding stale response for command {:#04x}", code);
            }
            if timing::expired(deadline) || !self.is_running() {
                return Ok(None);
            }
            match deadline {
                Some(at) => {
                    self.response_ready.wait_until(&mut queue, at);
                }
                None => self.response_ready.wait(&mut queue),
            }
        }
    }

    pub(super) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(super) fn stop(&self) {
        self.running.store(false, Ordering::Release);
        // A waiter between its running check and its wait holds this lock
        drop(self.responses.lock());
        self.response_ready.notify_all();
    }
}

/// Body of the listener thread: routes inbound packets until the link is stopped.
pub(super) fn run_listener<C>(link: Arc<Link<C>>)
where
    C: PacketChannel,
{
    debug!("Listener started");
    while link.is_running() {
        match link.poll_once() {
            Ok(0) => thread::sleep(link.poll_interval),
            Ok(_) => {}
            Err(e) => {
                warn!("Channel read failed: {:?}", e);
                link.responses().fault = Some(e);
                link.response_ready.notify_all();
                thread::sleep(link.poll_interval);
            }
        }
    }
    debug!("Listener stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::packet::{encode_measurement, encode_response};
    use crate::session::config::OverflowPolicy;

    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    struct MockCommError;

    /// Scripted channel: reads come from a queue, writes are logged.
    #[derive(Default)]
    struct MockChannel {
        inbound: VecDeque<NbResult<Packet, MockCommError>>,
        written: Vec<Packet>,
        busy_writes: usize,
    }

    impl PacketChannel for MockChannel {
        type Error = MockCommError;

        fn read_packet(&mut self) -> NbResult<Packet, Self::Error> {
            self.inbound.pop_front().unwrap_or(Err(nb::Error::WouldBlock))
        }

        fn write_packet(&mut self, packet: &Packet) -> NbResult<(), Self::Error> {
            if self.busy_writes > 0 {
                self.busy_writes -= 1;
                return Err(nb::Error::WouldBlock);
            }
            self.written.push(*packet);
            Ok(())
        }
    }

    fn link_with(channel: MockChannel) -> Link<MockChannel> {
        Link::new(
            channel,
            SampleFormat::I16,
            MeasurementBuffer::new(16, OverflowPolicy::DropOldest),
            Duration::from_millis(1),
        )
    }

    #[test]
    fn test_execute_blocking_io_retries_would_block() {
        let link = link_with(MockChannel { busy_writes: 3, ..Default::default() });
        link.write_packet(&[1; 8], Duration::from_millis(500)).unwrap();
        assert_eq!(link.channel.lock().written, vec![[1; 8]]);
    }

    #[test]
    fn test_execute_blocking_io_unbounded_timeout() {
        let link = link_with(MockChannel { busy_writes: 2, ..Default::default() });
        link.write_packet(&[2; 8], Duration::MAX).unwrap();
        assert_eq!(link.channel.lock().written, vec![[2; 8]]);
    }

    #[test]
    fn test_execute_blocking_io_times_out() {
        let link = link_with(MockChannel { busy_writes: usize::MAX, ..Default::default() });
        let result = link.write_packet(&[1; 8], Duration::from_millis(5));
        assert!(matches!(result, Err(GoIoError::Timeout)));
    }

    #[test]
    fn test_poll_routes_measurements_and_responses() {
        let mut channel = MockChannel::default();
        channel.inbound.push_back(Ok(encode_measurement(0, &[5, 6], SampleFormat::I16).unwrap()));
        for chunk in encode_response(0x28, 0, &[24]) {
            channel.inbound.push_back(Ok(chunk));
        }
        channel.inbound.push_back(Ok([0x00; 8])); // zero sample count, unreadable
        let link = link_with(channel);

        assert_eq!(link.poll_once(), Ok(3));
        assert_eq!(link.measurements().available(), 2);
        let body = link.wait_for_response(0x28, Some(Instant::now())).unwrap();
        assert_eq!(body, Some(vec![0, 24]));
    }

    #[test]
    fn test_stale_responses_skipped() {
        let mut channel = MockChannel::default();
        for chunk in encode_response(0x10, 0, &[1, 2, 3]) {
            channel.inbound.push_back(Ok(chunk));
        }
        for chunk in encode_response(0x1A, 0, &[]) {
            channel.inbound.push_back(Ok(chunk));
        }
        let link = link_with(channel);
        link.poll_once().unwrap();
        let body = link.wait_for_response(0x1A, Some(Instant::now())).unwrap();
        assert_eq!(body, Some(vec![0]));
        assert!(link.responses().completed.is_empty());
    }

    #[test]
    fn test_interleaved_partial_response_discarded() {
        let mut queue: ResponseQueue<MockCommError> = ResponseQueue::default();
        assert!(!queue.push_chunk(0x17, false, &[0, 1, 2]));
        // A different command starts before the first finished
        assert!(queue.push_chunk(0x28, true, &[0, 24]));
        assert_eq!(queue.completed.len(), 1);
        assert_eq!(queue.completed[0], (0x28, vec![0, 24]));
        assert!(queue.partial.is_none());
    }

    #[test]
    fn test_wait_times_out_without_response() {
        let link = link_with(MockChannel::default());
        let start = Instant::now();
        let body = link.wait_for_response(0x1A, Some(start + Duration::from_millis(20))).unwrap();
        assert_eq!(body, None);
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_channel_error_surfaces_to_waiter() {
        let mut channel = MockChannel::default();
        channel.inbound.push_back(Err(nb::Error::Other(MockCommError)));
        let link = Arc::new(link_with(channel));

        let listener = {
            let link = Arc::clone(&link);
            thread::spawn(move || run_listener(link))
        };
        let result = link.wait_for_response(0x1A, None);
        link.stop();
        listener.join().unwrap();
        assert!(matches!(result, Err(GoIoError::Io(MockCommError))));
    }
}
