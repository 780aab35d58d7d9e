use crate::answers::*;
use crate::base::{Error, Result, Transport};
use crate::checksum::PacketChecksum;
use crate::internals::*;
use crate::types::{AngleQ6, DistanceQ2, Sample, SyncFlag, FULL_CIRCLE_Q6};
use crate::utils::host_timestamp_ns;
use byteorder::{ByteOrder, LittleEndian};
use log::{trace, warn};
use std::cmp::min;
use std::f64::consts::PI;
use std::time::{Duration, Instant};

const PACKET_SYNC_BYTES: [u8; 2] = [
    (YDLIDAR_PACKET_HEADER & 0xFF) as u8,
    (YDLIDAR_PACKET_HEADER >> 8) as u8,
];

/// Packet type carried in bit 0 of the CT byte.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PacketType {
    Normal,
    RingStart,
}

/// Header of the measurement packet currently being parsed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PacketHeader {
    pub packet_type: PacketType,
    /// Scan frequency in decihertz; zero unless `RingStart`.
    pub scan_frequency: u8,
    pub ct: u8,
    pub sample_count: u8,
    /// First angle as sent, check-bit included.
    pub first_angle_raw: u16,
    /// Last angle as sent, check-bit included.
    pub last_angle_raw: u16,
    pub checksum: u16,
}

impl PacketHeader {
    fn from_bytes(bytes: &[u8; YDLIDAR_PACKET_HEADER_SIZE]) -> PacketHeader {
        let ct = bytes[2];
        let packet_type = if ct & YDLIDAR_PACKET_CT_RING_START != 0 {
            PacketType::RingStart
        } else {
            PacketType::Normal
        };
        PacketHeader {
            packet_type,
            scan_frequency: match packet_type {
                PacketType::RingStart => ct >> 1,
                PacketType::Normal => 0,
            },
            ct,
            sample_count: bytes[3],
            first_angle_raw: LittleEndian::read_u16(&bytes[4..6]),
            last_angle_raw: LittleEndian::read_u16(&bytes[6..8]),
            checksum: LittleEndian::read_u16(&bytes[8..10]),
        }
    }

    /// First angle in q6 units.
    #[inline]
    pub fn first_angle_q6(&self) -> u16 {
        self.first_angle_raw >> YDLIDAR_RESP_MEASUREMENT_ANGLE_SHIFT
    }

    /// Last angle in q6 units.
    #[inline]
    pub fn last_angle_q6(&self) -> u16 {
        self.last_angle_raw >> YDLIDAR_RESP_MEASUREMENT_ANGLE_SHIFT
    }

    /// Starts the packet checksum with every header field it covers.
    fn checksum_seed(&self) -> PacketChecksum {
        let mut checksum = PacketChecksum::with_seed(YDLIDAR_PACKET_HEADER);
        checksum.push_u16(self.first_angle_raw);
        checksum.push_u16(self.ct as u16 | (self.sample_count as u16) << 8);
        checksum.push_u16(self.last_angle_raw);
        checksum
    }
}

#[derive(Debug, PartialEq)]
enum HeaderStep {
    Pending,
    Skipped,
    Resync(&'static str),
    Complete(PacketHeader),
}

/// Byte-position state machine for the 10-byte packet header.
#[derive(Debug, Clone)]
struct HeaderDecoder {
    pos: usize,
    bytes: [u8; YDLIDAR_PACKET_HEADER_SIZE],
}

impl HeaderDecoder {
    fn new() -> HeaderDecoder {
        HeaderDecoder {
            pos: 0,
            bytes: [0; YDLIDAR_PACKET_HEADER_SIZE],
        }
    }

    fn remaining(&self) -> usize {
        YDLIDAR_PACKET_HEADER_SIZE - self.pos
    }

    fn reset(&mut self) {
        self.pos = 0;
    }

    fn push(&mut self, byte: u8) -> HeaderStep {
        let rejected = match self.pos {
            0 if byte != PACKET_SYNC_BYTES[0] => return HeaderStep::Skipped,
            1 if byte != PACKET_SYNC_BYTES[1] => Some("header error"),
            3 if byte == 0 => Some("empty packet"),
            4 if byte as u16 & YDLIDAR_RESP_MEASUREMENT_CHECKBIT == 0 => {
                Some("first sample angle error")
            }
            6 if byte as u16 & YDLIDAR_RESP_MEASUREMENT_CHECKBIT == 0 => {
                Some("last sample angle error")
            }
            _ => None,
        };

        if let Some(reason) = rejected {
            self.pos = 0;
            return HeaderStep::Resync(reason);
        }

        self.bytes[self.pos] = byte;
        self.pos += 1;
        if self.pos == YDLIDAR_PACKET_HEADER_SIZE {
            self.pos = 0;
            HeaderStep::Complete(PacketHeader::from_bytes(&self.bytes))
        } else {
            HeaderStep::Pending
        }
    }
}

/// Parses measurement packets into samples, one sample per call.
///
/// A packet header is read only when the previous packet is exhausted; the
/// header fields, the angle interval and the checksum verdict are kept
/// until its last sample has been handed out.
#[derive(Debug, Clone)]
pub struct PacketParser {
    intensity: bool,
    baudrate: u32,
    point_time_ns: u64,
    header_decoder: HeaderDecoder,
    header: Option<PacketHeader>,
    payload: Vec<u8>,
    raw_packet: Vec<u8>,
    packet_completed: bool,
    /// Checksum verdict of `raw_packet`, kept past the packet's last sample.
    completed_checksum_ok: bool,
    sample_index: usize,
    checksum_ok: bool,
    interval: f32,
    last_interval: f32,
    checksum_errors: u64,
}

impl PacketParser {
    /// Creates a parser for 3-byte (`intensity`) or 2-byte samples.
    pub fn new(intensity: bool, baudrate: u32) -> PacketParser {
        PacketParser {
            intensity,
            baudrate,
            point_time_ns: YDLIDAR_DEFAULT_POINT_TIME_NS,
            header_decoder: HeaderDecoder::new(),
            header: None,
            payload: Vec::new(),
            raw_packet: Vec::new(),
            packet_completed: false,
            completed_checksum_ok: false,
            sample_index: 0,
            checksum_ok: false,
            interval: 0.0,
            last_interval: 0.0,
            checksum_errors: 0,
        }
    }

    /// Drops any partially parsed packet. The remembered interval survives.
    pub fn reset(&mut self) {
        trace!("Resetting packet parser");
        self.header_decoder.reset();
        self.header = None;
        self.payload.clear();
        self.raw_packet.clear();
        self.packet_completed = false;
        self.completed_checksum_ok = false;
        self.sample_index = 0;
        self.checksum_ok = false;
    }

    pub fn set_intensity(&mut self, intensity: bool) {
        if self.intensity != intensity {
            self.intensity = intensity;
            self.reset();
        }
    }

    pub fn intensity(&self) -> bool {
        self.intensity
    }

    pub fn set_baudrate(&mut self, baudrate: u32) {
        self.baudrate = baudrate;
    }

    /// Nominal time between two samples, refreshed by ring-start packets.
    pub fn point_time_ns(&self) -> u64 {
        self.point_time_ns
    }

    pub fn set_point_time_ns(&mut self, point_time_ns: u64) {
        self.point_time_ns = point_time_ns;
    }

    /// Total number of packets that failed their checksum.
    pub fn checksum_errors(&self) -> u64 {
        self.checksum_errors
    }

    /// Bytes per sample in the current mode.
    pub fn sample_bytes(&self) -> usize {
        if self.intensity {
            YDLIDAR_INTENSITY_SAMPLE_BYTES
        } else {
            YDLIDAR_NORMAL_SAMPLE_BYTES
        }
    }

    /// Typical size of one full packet in the current mode.
    pub fn package_size(&self) -> usize {
        if self.intensity {
            YDLIDAR_INTENSITY_NORMAL_PACKAGE_SIZE
        } else {
            YDLIDAR_NORMAL_PACKAGE_SIZE
        }
    }

    /// Returns the raw bytes and checksum verdict of the packet read by the
    /// last `parse_one` call, if that call read a new packet.
    pub fn take_completed_packet(&mut self) -> Option<(&[u8], bool)> {
        if self.packet_completed {
            self.packet_completed = false;
            Some((&self.raw_packet, self.completed_checksum_ok))
        } else {
            None
        }
    }

    /// Produces the next sample, reading a new packet from `transport` when
    /// the current one is exhausted.
    pub fn parse_one<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        timeout: Duration,
    ) -> Result<Sample> {
        if self.sample_index == 0 || self.header.is_none() {
            self.sample_index = 0;
            self.read_packet(transport, timeout)?;
        }

        let header = match self.header {
            Some(header) => header,
            None => return Err(Error::fail("no packet header")),
        };

        let sample = self.decode_sample(&header, self.sample_index);

        self.sample_index += 1;
        if self.sample_index >= header.sample_count as usize {
            self.sample_index = 0;
            self.checksum_ok = false;
        }

        Ok(sample)
    }

    fn read_packet<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        timeout: Duration,
    ) -> Result<()> {
        self.header = None;
        self.packet_completed = false;
        self.raw_packet.clear();

        let header = self.read_header(transport, timeout)?;
        self.apply_header(&header);

        let payload_len = header.sample_count as usize * self.sample_bytes();
        self.payload.clear();
        let deadline = Instant::now() + timeout;
        while self.payload.len() < payload_len {
            let now = Instant::now();
            if now > deadline {
                break;
            }
            let remaining = payload_len - self.payload.len();
            let available = transport.wait_for_data(remaining, deadline - now)?;
            let mut buf = vec![0u8; min(available, remaining)];
            let read = transport.read(&mut buf)?;
            if read == 0 {
                return Err(Error::fail("packet payload read made no progress"));
            }
            self.payload.extend_from_slice(&buf[..read]);
        }

        if self.payload.len() != payload_len {
            warn!(
                "Packet payload incomplete: {} of {} bytes",
                self.payload.len(),
                payload_len
            );
            return Err(Error::fail("packet payload incomplete"));
        }

        let mut checksum = header.checksum_seed();
        self.push_payload_checksum(&mut checksum);
        self.checksum_ok = checksum.checksum() == header.checksum;
        if !self.checksum_ok {
            self.checksum_errors += 1;
            warn!(
                "Packet checksum mismatch: computed {:04X}, received {:04X}",
                checksum.checksum(),
                header.checksum
            );
        }

        self.raw_packet.extend_from_slice(&self.payload);
        self.completed_checksum_ok = self.checksum_ok;
        self.packet_completed = true;
        self.header = Some(header);
        Ok(())
    }

    fn read_header<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        timeout: Duration,
    ) -> Result<PacketHeader> {
        self.header_decoder.reset();
        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; YDLIDAR_PACKET_HEADER_SIZE];

        loop {
            let now = Instant::now();
            if now > deadline {
                return Err(Error::fail("packet header incomplete"));
            }

            let remaining = self.header_decoder.remaining();
            let available = transport.wait_for_data(remaining, deadline - now)?;
            let to_read = min(available, remaining);
            let read = transport.read(&mut buf[..to_read])?;
            if read == 0 {
                return Err(Error::fail("packet header read made no progress"));
            }

            for &byte in &buf[..read] {
                match self.header_decoder.push(byte) {
                    HeaderStep::Pending => {}
                    HeaderStep::Skipped => trace!("Skipping byte {:02X} before packet", byte),
                    HeaderStep::Resync(reason) => {
                        trace!("Packet resync on {:02X}: {}", byte, reason)
                    }
                    HeaderStep::Complete(header) => {
                        self.raw_packet
                            .extend_from_slice(&self.header_decoder.bytes);
                        return Ok(header);
                    }
                }
            }
        }
    }

    fn apply_header(&mut self, header: &PacketHeader) {
        if header.packet_type == PacketType::RingStart
            && !is_s2_lidar(self.baudrate)
            && header.scan_frequency != 0
        {
            let rate = 480 * header.scan_frequency as u64 / 10;
            self.point_time_ns = 1_000_000_000 / rate;
        }

        let first = header.first_angle_q6() as f32;
        let last = header.last_angle_q6() as f32;
        let count = header.sample_count as f32;

        self.interval = if header.sample_count == 1 {
            0.0
        } else if last >= first {
            self.last_interval = (last - first) / (count - 1.0);
            self.last_interval
        } else if first > (270 * 64) as f32 && last < (90 * 64) as f32 {
            self.last_interval = (FULL_CIRCLE_Q6 as f32 + last - first) / (count - 1.0);
            self.last_interval
        } else {
            self.last_interval
        };
        trace!(
            "Packet header: {:?}, interval {} q6/sample",
            header,
            self.interval
        );
    }

    fn push_payload_checksum(&self, checksum: &mut PacketChecksum) {
        if self.intensity {
            for sample in self.payload.chunks_exact(YDLIDAR_INTENSITY_SAMPLE_BYTES) {
                checksum.push_u16(sample[0] as u16);
                checksum.push_u16(LittleEndian::read_u16(&sample[1..3]));
            }
        } else {
            for word in self.payload.chunks_exact(YDLIDAR_NORMAL_SAMPLE_BYTES) {
                checksum.push_u16(LittleEndian::read_u16(word));
            }
        }
    }

    fn decode_sample(&self, header: &PacketHeader, index: usize) -> Sample {
        let mut sample = Sample {
            index: index as u8,
            timestamp: host_timestamp_ns(),
            ..Sample::default()
        };

        if !self.checksum_ok {
            sample.angle = AngleQ6::check_bit_only();
            sample.error_package = 1;
            return sample;
        }

        if header.packet_type == PacketType::RingStart && index == 0 {
            sample.sync_flag = SyncFlag::Synced;
            sample.scan_frequency = header.scan_frequency;
        }

        let (quality, raw) = if self.intensity {
            let offset = index * YDLIDAR_INTENSITY_SAMPLE_BYTES;
            let raw = LittleEndian::read_u16(&self.payload[offset + 1..offset + 3]);
            let quality = ((raw & 0x03) << YDLIDAR_RESP_MEASUREMENT_ANGLE_SAMPLE_SHIFT)
                | self.payload[offset] as u16;
            (quality, raw)
        } else {
            let offset = index * YDLIDAR_NORMAL_SAMPLE_BYTES;
            let raw = LittleEndian::read_u16(&self.payload[offset..offset + 2]);
            let quality = (0xFC | (raw & 0x03)) << YDLIDAR_RESP_MEASUREMENT_QUALITY_SHIFT;
            (quality, raw)
        };

        let distance = raw >> YDLIDAR_RESP_MEASUREMENT_DISTANCE_SHIFT;
        let correction = angle_correction_q6(distance);
        sample.distance = DistanceQ2(distance);
        sample.quality = if distance == 0 { 0 } else { quality };

        let mut angle =
            header.first_angle_q6() as f32 + self.interval * index as f32 + correction as f32;
        if angle < 0.0 {
            angle += FULL_CIRCLE_Q6 as f32;
        } else if angle >= FULL_CIRCLE_Q6 as f32 {
            angle -= FULL_CIRCLE_Q6 as f32;
        }
        sample.angle = AngleQ6::from_q6(angle as u16);
        sample
    }
}

/// Distance dependent angle correction in q6 units. Zero for no return.
pub fn angle_correction_q6(distance: u16) -> i32 {
    if distance == 0 {
        return 0;
    }
    let d = distance as f64;
    ((21.8 * (155.3 - d) / 155.3 / d).atan() * 180.0 / PI * 64.0) as i32
}
