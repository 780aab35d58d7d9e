use crate::base::error::{Error, Result};
use crate::base::message::Message;
use log::trace;
use std::thread;
use std::time::{Duration, Instant};

/// Polling period of the default `Transport::wait_for_data` implementation.
const WAIT_FOR_DATA_POLL: Duration = Duration::from_millis(1);

/// Defines the behavior for decoding byte streams into protocol frames.
pub trait ProtocolDecoder {
    /// The frame type produced by this decoder.
    type Output;

    /// Attempts to decode a frame from the provided buffer.
    ///
    /// Returns a `Result` containing a tuple:
    /// * The number of bytes consumed from the buffer.
    /// * An `Option` which is `Some` if a complete frame was decoded, or `None` otherwise.
    ///
    /// Bytes are consumed one frame at a time: once a frame completes, the
    /// remaining input is left for the next call.
    fn decode(&mut self, buf: &[u8]) -> Result<(usize, Option<Self::Output>)>;

    /// Resets the internal state of the decoder.
    /// This is typically called after a communication error or when starting a new session.
    fn reset_decoder(&mut self);
}

/// Defines the behavior for encoding `Message` objects into byte streams.
pub trait ProtocolEncoder {
    /// Encodes a `Message` into the provided byte buffer.
    ///
    /// Returns the number of bytes written to the buffer upon successful encoding.
    fn encode(&mut self, msg: &Message, bytes: &mut [u8]) -> Result<usize>;

    /// Estimates the maximum size in bytes required to encode the given `Message`.
    /// The actual encoded size must be less than or equal to this estimate.
    fn estimate_encoded_size(&mut self, msg: &Message) -> Result<usize>;

    /// Encodes a `Message` and writes it to a `Transport`.
    ///
    /// Returns the number of bytes written. A write making no progress is
    /// reported as a failure instead of being retried.
    fn write_to<T: Transport + ?Sized>(&mut self, msg: &Message, dest: &mut T) -> Result<usize>;

    /// Resets the internal state of the encoder.
    fn reset_encoder(&mut self);
}

/// A byte-oriented connection to the scanner.
///
/// Reads and writes are bounded in time by the implementation; they may
/// return short counts. `set_line_control` drives the output line (DTR on a
/// serial port) that powers the motor of most models.
pub trait Transport: Send {
    /// Opens (or reopens) the underlying connection.
    fn open(&mut self) -> Result<()>;

    /// Closes the connection. Closing a closed transport is a no-op.
    fn close(&mut self);

    /// Returns `true` while the connection is open.
    fn is_open(&self) -> bool;

    /// Reads up to `buf.len()` bytes, returning the number of bytes read.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Writes up to `buf.len()` bytes, returning the number of bytes written.
    fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Number of received bytes that can be read without blocking.
    fn available(&mut self) -> Result<usize>;

    /// Flushes pending output.
    fn flush(&mut self) -> Result<()>;

    /// Sets the level of the line-control output.
    ///
    /// Links without such a line report `Error::OperationNotSupport`.
    fn set_line_control(&mut self, _level: bool) -> Result<()> {
        Err(Error::OperationNotSupport)
    }

    /// Time needed to transmit one byte, in nanoseconds.
    fn byte_time_ns(&self) -> u64;

    /// Blocks until at least `count` bytes are available or `timeout` elapses.
    ///
    /// Returns the number of available bytes (which may exceed `count`), or
    /// `Error::OperationTimeout` when the deadline passes first.
    fn wait_for_data(&mut self, count: usize, timeout: Duration) -> Result<usize> {
        let deadline = Instant::now() + timeout;
        loop {
            let available = self.available()?;
            if available >= count {
                return Ok(available);
            }
            if Instant::now() >= deadline {
                trace!(
                    "wait_for_data timed out: wanted {}, have {}",
                    count,
                    available
                );
                return Err(Error::OperationTimeout);
            }
            thread::sleep(WAIT_FOR_DATA_POLL);
        }
    }
}
