//! Scripted transport and packet builders shared by the unit tests.

use crate::answers::*;
use crate::base::{Error, Result, Transport};
use crate::checksum::PacketChecksum;
use byteorder::{ByteOrder, LittleEndian};
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct MockState {
    rx: VecDeque<u8>,
    written: Vec<u8>,
    replies: Vec<(Vec<u8>, Vec<u8>)>,
    stall_writes: bool,
    fail_reads: usize,
    fail_opens: usize,
    opens: usize,
    is_open: bool,
    line_control: Option<bool>,
}

/// Test-side handle to the state of a `MockTransport`.
#[derive(Debug, Clone, Default)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockHandle {
    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    /// Queues bytes for reading.
    pub fn push(&self, bytes: &[u8]) {
        self.lock().rx.extend(bytes);
    }

    /// Queues `reply` every time exactly `request` is written.
    pub fn reply_to(&self, request: &[u8], reply: &[u8]) {
        self.lock().replies.push((request.to_vec(), reply.to_vec()));
    }

    /// Makes writes report zero progress.
    pub fn stall_writes(&self, stall: bool) {
        self.lock().stall_writes = stall;
    }

    /// Makes the next `count` reads (and availability queries) fail.
    pub fn fail_reads(&self, count: usize) {
        self.lock().fail_reads = count;
    }

    /// Makes the next `count` open attempts fail.
    pub fn fail_opens(&self, count: usize) {
        self.lock().fail_opens = count;
    }

    pub fn written(&self) -> Vec<u8> {
        self.lock().written.clone()
    }

    pub fn clear_written(&self) {
        self.lock().written.clear();
    }

    pub fn pending(&self) -> usize {
        self.lock().rx.len()
    }

    pub fn open_count(&self) -> usize {
        self.lock().opens
    }

    pub fn is_open(&self) -> bool {
        self.lock().is_open
    }

    pub fn line_control(&self) -> Option<bool> {
        self.lock().line_control
    }
}

/// In-memory `Transport` driven through a `MockHandle`.
#[derive(Debug)]
pub struct MockTransport {
    handle: MockHandle,
    byte_time_ns: u64,
}

impl MockTransport {
    /// Creates an open transport with an empty receive queue.
    pub fn new() -> MockTransport {
        let handle = MockHandle::default();
        handle.lock().is_open = true;
        MockTransport {
            handle,
            byte_time_ns: 1_000_000_000 * 10 / 230_400,
        }
    }

    pub fn handle(&self) -> MockHandle {
        self.handle.clone()
    }

    fn read_failure(state: &mut MockState) -> Option<Error> {
        if state.fail_reads > 0 {
            state.fail_reads -= 1;
            Some(Error::IoError(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "device unplugged",
            )))
        } else {
            None
        }
    }
}

impl Transport for MockTransport {
    fn open(&mut self) -> Result<()> {
        let mut state = self.handle.lock();
        if state.fail_opens > 0 {
            state.fail_opens -= 1;
            return Err(Error::IoError(io::Error::new(
                io::ErrorKind::NotFound,
                "no such device",
            )));
        }
        state.opens += 1;
        state.is_open = true;
        Ok(())
    }

    fn close(&mut self) {
        self.handle.lock().is_open = false;
    }

    fn is_open(&self) -> bool {
        self.handle.lock().is_open
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut state = self.handle.lock();
        if let Some(err) = Self::read_failure(&mut state) {
            return Err(err);
        }
        let n = buf.len().min(state.rx.len());
        for (slot, byte) in buf.iter_mut().zip(state.rx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let mut state = self.handle.lock();
        if state.stall_writes {
            return Ok(0);
        }
        state.written.extend_from_slice(buf);
        let replies: Vec<Vec<u8>> = state
            .replies
            .iter()
            .filter(|(request, _)| request.as_slice() == buf)
            .map(|(_, reply)| reply.clone())
            .collect();
        for reply in replies {
            state.rx.extend(reply);
        }
        Ok(buf.len())
    }

    fn available(&mut self) -> Result<usize> {
        let mut state = self.handle.lock();
        if let Some(err) = Self::read_failure(&mut state) {
            return Err(err);
        }
        Ok(state.rx.len())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn set_line_control(&mut self, level: bool) -> Result<()> {
        self.handle.lock().line_control = Some(level);
        Ok(())
    }

    fn byte_time_ns(&self) -> u64 {
        self.byte_time_ns
    }
}

/// `Write` sink whose contents stay readable after it is handed to a `Transcript`.
#[derive(Debug, Clone, Default)]
pub struct SharedSink(Arc<Mutex<Vec<u8>>>);

impl SharedSink {
    pub fn text(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl io::Write for SharedSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Encodes an answer header as sent by the device.
pub fn ans_header_bytes(size: u32, ans_type: u8) -> Vec<u8> {
    let mut bytes = vec![0xA5, 0x5A, 0, 0, 0, 0, ans_type];
    LittleEndian::write_u32(&mut bytes[2..6], size);
    bytes
}

/// Builds well-formed measurement packets.
#[derive(Debug, Clone)]
pub struct PacketBuilder {
    intensity: bool,
    ct: u8,
    first_q6: u16,
    last_q6: u16,
    samples: Vec<(u8, u16)>,
}

impl PacketBuilder {
    pub fn new(intensity: bool) -> PacketBuilder {
        PacketBuilder {
            intensity,
            ct: 0,
            first_q6: 0,
            last_q6: 0,
            samples: Vec::new(),
        }
    }

    /// Marks the packet as ring start with the given frequency (decihertz).
    pub fn ring_start(mut self, frequency: u8) -> PacketBuilder {
        self.ct = frequency << 1 | YDLIDAR_PACKET_CT_RING_START;
        self
    }

    /// First and last angle in q6 units.
    pub fn angles(mut self, first_q6: u16, last_q6: u16) -> PacketBuilder {
        self.first_q6 = first_q6;
        self.last_q6 = last_q6;
        self
    }

    /// Appends a sample: quality byte (ignored in 2-byte mode) and raw distance word.
    pub fn sample(mut self, quality: u8, raw_distance: u16) -> PacketBuilder {
        self.samples.push((quality, raw_distance));
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let first = self.first_q6 << 1 | 1;
        let last = self.last_q6 << 1 | 1;
        let count = self.samples.len() as u8;

        let mut checksum = PacketChecksum::with_seed(YDLIDAR_PACKET_HEADER);
        checksum.push_u16(first);
        checksum.push_u16(last);
        checksum.push_u16(self.ct as u16 | (count as u16) << 8);

        let mut payload = Vec::new();
        for &(quality, raw) in &self.samples {
            let mut word = [0u8; 2];
            LittleEndian::write_u16(&mut word, raw);
            if self.intensity {
                payload.push(quality);
                checksum.push_u16(quality as u16);
            }
            payload.extend_from_slice(&word);
            checksum.push_u16(raw);
        }

        let mut packet = vec![0u8; YDLIDAR_PACKET_HEADER_SIZE];
        LittleEndian::write_u16(&mut packet[0..2], YDLIDAR_PACKET_HEADER);
        packet[2] = self.ct;
        packet[3] = count;
        LittleEndian::write_u16(&mut packet[4..6], first);
        LittleEndian::write_u16(&mut packet[6..8], last);
        LittleEndian::write_u16(&mut packet[8..10], checksum.checksum());
        packet.extend_from_slice(&payload);
        packet
    }
}

/// A packet of `count` valid samples spread over `[first_q6, last_q6]`.
pub fn uniform_packet(intensity: bool, ring_start: bool, first_q6: u16, last_q6: u16, count: usize) -> Vec<u8> {
    let mut builder = PacketBuilder::new(intensity).angles(first_q6, last_q6);
    if ring_start {
        builder = builder.ring_start(70);
    }
    for i in 0..count {
        builder = builder.sample(100, (1000 + i as u16) << 2);
    }
    builder.build()
}
