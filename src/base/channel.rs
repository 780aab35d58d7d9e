use crate::base::error::{Error, Result};
use crate::base::message::Message;
use crate::base::traits::{ProtocolDecoder, ProtocolEncoder, Transport};
use crate::transcript::Transcript;
use log::{error, trace, warn};
use std::time::{Duration, Instant};

/// Channel encodes commands and frames answers with a protocol, and sends
/// and receives the bytes through a `Transport`.
///
/// # Examples
/// ```ignore
/// let mut channel = Channel::new(YdlidarHostProtocol::new(), Box::new(transport));
///
/// channel.write(&Message::new(0x65)).unwrap();
/// ```
#[derive(Debug)]
pub struct Channel<P, T: ?Sized> {
    protocol: P,
    transcript: Option<Transcript>,
    transport: Box<T>,
}

impl<P, T> Channel<P, T>
where
    P: ProtocolDecoder + ProtocolEncoder,
    T: Transport + ?Sized,
{
    /// Create a new `Channel` over an already constructed transport.
    pub fn new(protocol: P, transport: Box<T>) -> Channel<P, T> {
        let mut chn = Channel {
            protocol,
            transcript: None,
            transport,
        };
        chn.reset();
        chn
    }

    /// Reset the protocol encoder and decoder, usually after a communication error.
    pub fn reset(&mut self) {
        trace!("Resetting Channel protocol encoder and decoder");
        self.protocol.reset_encoder();
        self.protocol.reset_decoder();
    }

    /// (Re)opens the transport and resets the protocol state.
    pub fn open(&mut self) -> Result<()> {
        self.transport.open()?;
        self.reset();
        Ok(())
    }

    pub fn close(&mut self) {
        self.transport.close();
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_open()
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn set_transcript(&mut self, transcript: Option<Transcript>) {
        self.transcript = transcript;
    }

    pub fn transcript_mut(&mut self) -> Option<&mut Transcript> {
        self.transcript.as_mut()
    }

    /// Write message to channel. No response is awaited.
    ///
    /// # Example
    /// ```ignore
    /// channel.write(&Message::new(0x60)).unwrap();
    /// ```
    pub fn write(&mut self, msg: &Message) -> Result<usize> {
        trace!(
            "Channel write called: cmd={:02X}, data_len={}",
            msg.cmd,
            msg.data.len()
        );
        if !self.transport.is_open() {
            warn!("Write of {:02X} on closed transport", msg.cmd);
            return Err(Error::NotConnected);
        }

        let result = self.protocol.write_to(msg, &mut *self.transport);
        if let Some(transcript) = self.transcript.as_mut() {
            let mut frame = vec![0; self.protocol.estimate_encoded_size(msg)?];
            let size = self.protocol.encode(msg, &mut frame)?;
            transcript.sent(&frame[..size], result.is_ok());
        }

        let written = result?;
        self.transport.flush()?;
        Ok(written)
    }

    /// Read one answer frame, failing with `OperationTimeout` if none is
    /// framed before `timeout` elapses.
    ///
    /// Bytes are pulled one at a time so nothing following the frame is
    /// consumed.
    pub fn read_until(&mut self, timeout: Duration) -> Result<P::Output> {
        trace!("Channel read_until called with timeout {:?}", timeout);
        // every call searches for a fresh header
        self.protocol.reset_decoder();
        let result = self.frame_answer(timeout);
        if result.is_err() {
            self.protocol.reset_decoder();
        }
        result
    }

    fn frame_answer(&mut self, timeout: Duration) -> Result<P::Output> {
        let deadline = Instant::now() + timeout;
        let mut byte = [0u8; 1];

        loop {
            let now = Instant::now();
            if now >= deadline {
                trace!("Overall timeout reached while framing answer");
                return Err(Error::OperationTimeout);
            }
            self.transport.wait_for_data(1, deadline - now)?;

            let read = self.transport.read(&mut byte)?;
            if read == 0 {
                continue;
            }

            match self.protocol.decode(&byte) {
                Ok((_, Some(frame))) => return Ok(frame),
                Ok((_, None)) => {}
                Err(e) => {
                    error!("Protocol decode error: {:?}", e);
                    return Err(e);
                }
            }
        }
    }

    /// Read exactly `len` bytes, waiting at most `timeout`.
    pub fn read_payload(&mut self, len: usize, timeout: Duration) -> Result<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        let mut payload = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::OperationTimeout);
            }
            self.transport.wait_for_data(len - filled, deadline - now)?;
            let read = self.transport.read(&mut payload[filled..])?;
            if read == 0 {
                return Err(Error::fail("payload read made no progress"));
            }
            filled += read;
        }
        Ok(payload)
    }

    /// Send a request and wait for the answer header.
    pub fn invoke(&mut self, request: &Message, timeout: Duration) -> Result<P::Output> {
        trace!(
            "Channel invoke called: cmd={:02X}, timeout={:?}",
            request.cmd,
            timeout
        );
        self.write(request)?;
        self.read_until(timeout)
    }

    /// Discard every byte already received.
    pub fn flush_input(&mut self) -> Result<usize> {
        let mut discarded = 0;
        let mut buf = [0u8; 256];
        loop {
            let available = self.transport.available()?;
            if available == 0 {
                break;
            }
            let chunk = available.min(buf.len());
            let read = self.transport.read(&mut buf[..chunk])?;
            if read == 0 {
                break;
            }
            discarded += read;
        }
        if discarded > 0 {
            trace!("Flushed {} stale input bytes", discarded);
        }
        Ok(discarded)
    }

    pub fn set_line_control(&mut self, level: bool) -> Result<()> {
        self.transport.set_line_control(level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::answers::AnsHeader;
    use crate::protocol::YdlidarHostProtocol;
    use crate::testing::{ans_header_bytes, MockTransport};

    fn channel() -> (Channel<YdlidarHostProtocol, MockTransport>, crate::testing::MockHandle) {
        let transport = MockTransport::new();
        let handle = transport.handle();
        (
            Channel::new(YdlidarHostProtocol::new(), Box::new(transport)),
            handle,
        )
    }

    #[test]
    fn read_until_frames_after_noise() {
        let (mut channel, handle) = channel();
        handle.push(&[0x01, 0xA5, 0xA5, 0x5A, 0x03, 0x00, 0x00, 0x00, 0x06, 0xEE]);
        let header = channel.read_until(Duration::from_millis(50)).unwrap();
        assert_eq!(
            header,
            AnsHeader {
                size: 3,
                subtype: 0,
                ans_type: 0x06
            }
        );
        // trailing byte is left for the payload
        assert_eq!(handle.pending(), 1);
    }

    #[test]
    fn read_until_times_out() {
        let (mut channel, handle) = channel();
        handle.push(&[0xA5, 0x5A, 0x03]);
        assert!(matches!(
            channel.read_until(Duration::from_millis(20)),
            Err(Error::OperationTimeout)
        ));
    }

    #[test]
    fn partial_header_does_not_leak_into_next_read() {
        let (mut channel, handle) = channel();
        handle.push(&[0xA5, 0x5A, 0x03]);
        assert!(matches!(
            channel.read_until(Duration::from_millis(20)),
            Err(Error::OperationTimeout)
        ));
        channel.flush_input().unwrap();

        handle.push(&ans_header_bytes(3, 0x06));
        let header = channel.read_until(Duration::from_millis(50)).unwrap();
        assert_eq!(header.ans_type, 0x06);
        assert_eq!(header.size, 3);
    }

    #[test]
    fn invoke_reads_reply() {
        let (mut channel, handle) = channel();
        let mut reply = ans_header_bytes(3, 0x06);
        reply.extend_from_slice(&[0x00, 0x00, 0x00]);
        handle.reply_to(&[0xA5, 0x92], &reply);
        let header = channel
            .invoke(&Message::new(0x92), Duration::from_millis(50))
            .unwrap();
        assert_eq!(header.size, 3);
        let payload = channel
            .read_payload(3, Duration::from_millis(50))
            .unwrap();
        assert_eq!(payload, vec![0, 0, 0]);
    }

    #[test]
    fn write_on_closed_transport_fails() {
        let (mut channel, _handle) = channel();
        channel.close();
        assert!(matches!(
            channel.write(&Message::new(0x65)),
            Err(Error::NotConnected)
        ));
    }

    #[test]
    fn flush_input_discards_pending() {
        let (mut channel, handle) = channel();
        handle.push(&[1, 2, 3, 4]);
        assert_eq!(channel.flush_input().unwrap(), 4);
        assert_eq!(handle.pending(), 0);
    }
}
