/// Sync byte and command byte.
const COMMAND_PREFIX_LEN: usize = 2;

/// Length byte and trailing XOR checksum of a payload-carrying frame.
const PAYLOAD_OVERHEAD: usize = 2;

/// A host command before framing.
///
/// Every fixed command of the scanner is a bare two-byte frame; the payload
/// form exists for firmware commands that take arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub cmd: u8,
    pub data: Vec<u8>,
}

impl Message {
    pub fn new(cmd: u8) -> Message {
        Message {
            cmd,
            data: Vec::new(),
        }
    }

    /// A command carrying `data`; at most 255 bytes can be framed.
    pub fn with_data(cmd: u8, data: &[u8]) -> Message {
        Message {
            cmd,
            data: data.to_vec(),
        }
    }

    #[inline]
    pub fn has_payload(&self) -> bool {
        !self.data.is_empty()
    }

    /// Number of bytes the framed command occupies on the wire.
    pub fn frame_len(&self) -> usize {
        if self.has_payload() {
            COMMAND_PREFIX_LEN + self.data.len() + PAYLOAD_OVERHEAD
        } else {
            COMMAND_PREFIX_LEN
        }
    }
}
