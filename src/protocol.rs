use crate::answers::AnsHeader;
use crate::base::{Error, Message, ProtocolDecoder, ProtocolEncoder, Result, Transport};
use crate::checksum::Checksum;
use byteorder::{ByteOrder, LittleEndian};
use log::{error, trace};
use std::cmp::min;

const YDLIDAR_CMD_SYNC_BYTE: u8 = 0xA5;
const YDLIDAR_CMDFLAG_HAS_PAYLOAD: u8 = 0x80;

const YDLIDAR_ANS_SYNC_BYTES: [u8; 2] = [0xA5, 0x5A];

const YDLIDAR_ANS_HEADER_SIZE_MASK: u32 = 0x3FFF_FFFF;
const YDLIDAR_ANS_HEADER_SUBTYPE_SHIFT: u32 = 30;

/// The size of the answer header following the two sync bytes (size/subtype word + type byte).
const YDLIDAR_ANS_HEADER_SIZE: usize = 5;

/// Size of an answer header on the wire, sync bytes included.
#[cfg(test)]
pub const YDLIDAR_ANS_HEADER_WIRE_SIZE: usize = YDLIDAR_ANS_SYNC_BYTES.len() + YDLIDAR_ANS_HEADER_SIZE;

const YDLIDAR_MAX_PAYLOAD: usize = 255;

#[derive(Debug, Clone, PartialEq)]
enum DecodeStatus {
    WaitSyncByte(usize),
    WaitAnsHeader,
}

/// The YDLIDAR host communication protocol.
///
/// Encodes command frames (`Message` -> bytes) and frames answer headers out
/// of a noisy byte stream. Measurement packets are not framed here; they are
/// handled by the packet parser once a scan is running.
#[derive(Debug, Clone, PartialEq)]
pub struct YdlidarHostProtocol {
    status: DecodeStatus,
    ans_header: Vec<u8>,
}

impl YdlidarHostProtocol {
    /// Creates a new `YdlidarHostProtocol` instance in its initial state.
    pub fn new() -> YdlidarHostProtocol {
        YdlidarHostProtocol {
            status: DecodeStatus::WaitSyncByte(0),
            ans_header: Vec::with_capacity(YDLIDAR_ANS_HEADER_SIZE),
        }
    }

    fn start_wait_sync_bytes(&mut self, sync_byte_index: usize) {
        self.status = DecodeStatus::WaitSyncByte(sync_byte_index);
        self.ans_header.clear();
    }

    fn start_wait_ans_header(&mut self) {
        trace!("Decoder state -> WaitAnsHeader");
        self.status = DecodeStatus::WaitAnsHeader;
        self.ans_header.clear();
    }

    fn decode_sync_byte(&mut self, i: usize, current_byte: u8) {
        if current_byte == YDLIDAR_ANS_SYNC_BYTES[i] {
            if i == YDLIDAR_ANS_SYNC_BYTES.len() - 1 {
                self.start_wait_ans_header();
            } else {
                self.start_wait_sync_bytes(i + 1);
            }
        } else if i > 0 && current_byte == YDLIDAR_ANS_SYNC_BYTES[0] {
            // the mismatching byte may itself open the next header
            trace!("Sync byte {} mismatch on {:02X}, restarting at 1", i, current_byte);
            self.start_wait_sync_bytes(1);
        } else {
            trace!("Discarding byte {:02X} while waiting for sync", current_byte);
            self.start_wait_sync_bytes(0);
        }
    }

    fn decode_ans_header(&mut self, buf: &[u8]) -> (usize, Option<AnsHeader>) {
        let bytes_to_read = YDLIDAR_ANS_HEADER_SIZE - self.ans_header.len();
        let bytes_actual_read = min(bytes_to_read, buf.len());
        self.ans_header
            .extend_from_slice(&buf[0..bytes_actual_read]);

        if self.ans_header.len() == YDLIDAR_ANS_HEADER_SIZE {
            let size_q30_subtype = LittleEndian::read_u32(&self.ans_header[0..4]);
            let header = AnsHeader {
                size: size_q30_subtype & YDLIDAR_ANS_HEADER_SIZE_MASK,
                subtype: (size_q30_subtype >> YDLIDAR_ANS_HEADER_SUBTYPE_SHIFT) as u8,
                ans_type: self.ans_header[4],
            };
            trace!("Decoded answer header: {:?}", header);
            self.reset_decoder();
            (bytes_actual_read, Some(header))
        } else {
            (bytes_actual_read, None)
        }
    }
}

impl Default for YdlidarHostProtocol {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolDecoder for YdlidarHostProtocol {
    type Output = AnsHeader;

    /// Feeds bytes into the answer-header state machine.
    ///
    /// Garbage preceding `A5 5A` is discarded. Returns as soon as one header
    /// is complete, leaving the rest of `buf` unconsumed.
    fn decode(&mut self, buf: &[u8]) -> Result<(usize, Option<AnsHeader>)> {
        let mut i = 0;
        while i < buf.len() {
            match self.status {
                DecodeStatus::WaitSyncByte(sync_index) => {
                    self.decode_sync_byte(sync_index, buf[i]);
                    i += 1;
                }
                DecodeStatus::WaitAnsHeader => {
                    let (consumed, header) = self.decode_ans_header(&buf[i..]);
                    i += consumed;
                    if header.is_some() {
                        return Ok((i, header));
                    }
                }
            }
        }

        Ok((i, None))
    }

    /// Resets the decoder's internal state, typically after an error or to start fresh.
    fn reset_decoder(&mut self) {
        self.start_wait_sync_bytes(0);
    }
}

impl ProtocolEncoder for YdlidarHostProtocol {
    /// Encodes a command `Message` into the provided byte buffer.
    ///
    /// Handles the sync byte, the has-payload flag, payload length, payload data and checksum.
    fn encode(&mut self, msg: &Message, bytes: &mut [u8]) -> Result<usize> {
        let estimated_encoded_size = self.estimate_encoded_size(msg)?;

        if estimated_encoded_size > bytes.len() {
            error!(
                "Buffer too small: required {}, available {}",
                estimated_encoded_size,
                bytes.len()
            );
            return Err(Error::BufferTooSmall);
        }

        let cmd_byte = if msg.has_payload() {
            msg.cmd | YDLIDAR_CMDFLAG_HAS_PAYLOAD
        } else {
            msg.cmd
        };

        bytes[0] = YDLIDAR_CMD_SYNC_BYTE;
        bytes[1] = cmd_byte;

        if !msg.has_payload() {
            return Ok(2);
        }

        let payload_end = 3 + msg.data.len();
        bytes[2] = msg.data.len() as u8;
        bytes[3..payload_end].copy_from_slice(&msg.data);

        let mut checksum = Checksum::new();
        checksum.push_slice(&bytes[0..payload_end]);
        bytes[payload_end] = checksum.checksum();
        trace!(
            "Encoded command {:02X} with {} byte payload, checksum {:02X}",
            cmd_byte,
            msg.data.len(),
            bytes[payload_end]
        );

        Ok(payload_end + 1)
    }

    /// Estimates the size needed to encode a command `Message`.
    fn estimate_encoded_size(&mut self, msg: &Message) -> Result<usize> {
        if msg.data.len() > YDLIDAR_MAX_PAYLOAD {
            return Err(Error::fail("payload too big"));
        }

        Ok(msg.frame_len())
    }

    /// Encodes a command `Message` and writes it to the transport, chunk by chunk.
    fn write_to<T: Transport + ?Sized>(&mut self, msg: &Message, dest: &mut T) -> Result<usize> {
        let estimated_encoded_size = self.estimate_encoded_size(msg)?;
        let mut buf = vec![0; estimated_encoded_size];
        let encoded_size = self.encode(msg, &mut buf)?;

        let mut written = 0;
        while written < encoded_size {
            let progress = dest.write(&buf[written..encoded_size])?;
            if progress == 0 {
                error!(
                    "Write stalled after {} of {} bytes",
                    written, encoded_size
                );
                return Err(Error::fail("write stalled"));
            }
            written += progress;
        }
        Ok(encoded_size)
    }

    /// Resets the encoder's internal state (a no-op, the encoder is stateless).
    fn reset_encoder(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTransport;

    fn encode<T: ProtocolEncoder>(protocol: &mut T, msg: &Message) -> Result<Vec<u8>> {
        let encoded_bytes = protocol.estimate_encoded_size(msg)?;
        let mut buf = vec![0; encoded_bytes];
        let encoded_bytes = protocol.encode(msg, &mut buf[0..encoded_bytes])?;
        buf.truncate(encoded_bytes);
        Ok(buf)
    }

    fn header_bytes(size: u32, subtype: u8, ans_type: u8) -> Vec<u8> {
        let mut bytes = vec![0xA5, 0x5A];
        let word = (size & YDLIDAR_ANS_HEADER_SIZE_MASK)
            | ((subtype as u32) << YDLIDAR_ANS_HEADER_SUBTYPE_SHIFT);
        bytes.extend_from_slice(&word.to_le_bytes());
        bytes.push(ans_type);
        bytes
    }

    #[test]
    fn protocol_encode() {
        let mut protocol = YdlidarHostProtocol::new();

        assert_eq!(
            encode(&mut protocol, &Message::new(0x60)).unwrap().as_slice(),
            [0xA5, 0x60]
        );

        // 0xA5 ^ 0xE0 ^ 0x02 ^ 0x01 ^ 0x02 = 0x44
        assert_eq!(
            encode(&mut protocol, &Message::with_data(0x60, &[0x01, 0x02]))
                .unwrap()
                .as_slice(),
            [0xA5, 0xE0, 0x02, 0x01, 0x02, 0x44]
        );
    }

    #[test]
    fn protocol_encode_rejects_large_payload() {
        let mut protocol = YdlidarHostProtocol::new();
        let msg = Message::with_data(0x60, &[0; 256]);
        assert!(matches!(
            protocol.estimate_encoded_size(&msg),
            Err(Error::OperationFail { .. })
        ));
    }

    #[test]
    fn protocol_encode_buffer_too_small() {
        let mut protocol = YdlidarHostProtocol::new();
        let mut buf = [0u8; 3];
        assert!(matches!(
            protocol.encode(&Message::with_data(0x60, &[1, 2]), &mut buf),
            Err(Error::BufferTooSmall)
        ));
    }

    #[test]
    fn decode_header() {
        let mut protocol = YdlidarHostProtocol::new();
        let bytes = header_bytes(20, 0, 0x04);
        let (consumed, header) = protocol.decode(&bytes).unwrap();
        assert_eq!(consumed, YDLIDAR_ANS_HEADER_WIRE_SIZE);
        assert_eq!(
            header,
            Some(AnsHeader {
                size: 20,
                subtype: 0,
                ans_type: 0x04
            })
        );
    }

    #[test]
    fn decode_header_split_across_calls() {
        let mut protocol = YdlidarHostProtocol::new();
        let bytes = header_bytes(5, 1, 0x81);
        let (consumed, header) = protocol.decode(&bytes[..4]).unwrap();
        assert_eq!((consumed, header), (4, None));
        let (consumed, header) = protocol.decode(&bytes[4..]).unwrap();
        assert_eq!(consumed, 3);
        assert_eq!(
            header,
            Some(AnsHeader {
                size: 5,
                subtype: 1,
                ans_type: 0x81
            })
        );
    }

    #[test]
    fn decode_resyncs_after_garbage() {
        let mut protocol = YdlidarHostProtocol::new();
        let mut bytes = vec![0x01, 0xA5];
        bytes.extend(header_bytes(3, 0, 0x06));
        let (consumed, header) = protocol.decode(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(
            header,
            Some(AnsHeader {
                size: 3,
                subtype: 0,
                ans_type: 0x06
            })
        );
    }

    #[test]
    fn decode_ignores_lone_second_sync_byte() {
        let mut protocol = YdlidarHostProtocol::new();
        let mut bytes = vec![0x5A, 0x00, 0xA5, 0x00];
        bytes.extend(header_bytes(3, 0, 0x06));
        let (_, header) = protocol.decode(&bytes).unwrap();
        assert_eq!(header.map(|h| h.ans_type), Some(0x06));
    }

    #[test]
    fn decode_leaves_trailing_bytes() {
        let mut protocol = YdlidarHostProtocol::new();
        let mut bytes = header_bytes(3, 0, 0x06);
        bytes.extend_from_slice(&[0x00, 0x00, 0x00]);
        let (consumed, header) = protocol.decode(&bytes).unwrap();
        assert_eq!(consumed, YDLIDAR_ANS_HEADER_WIRE_SIZE);
        assert!(header.is_some());
    }

    #[test]
    fn write_to_fails_on_stalled_transport() {
        let mut protocol = YdlidarHostProtocol::new();
        let mut transport = MockTransport::new();
        transport.handle().stall_writes(true);
        assert!(matches!(
            protocol.write_to(&Message::new(0x65), &mut transport),
            Err(Error::OperationFail { .. })
        ));
    }

    #[test]
    fn write_to_emits_frame() {
        let mut protocol = YdlidarHostProtocol::new();
        let mut transport = MockTransport::new();
        let handle = transport.handle();
        assert_eq!(protocol.write_to(&Message::new(0x65), &mut transport).unwrap(), 2);
        assert_eq!(handle.written(), vec![0xA5, 0x65]);
    }
}
