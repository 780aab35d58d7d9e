use crate::base::{Error, Result, Transport};
use log::{debug, trace, warn};
use serialport::SerialPort;
use std::io::{self, Read, Write};
use std::time::Duration;

/// Per-call timeout of reads and writes on the port.
const SERIAL_IO_TIMEOUT: Duration = Duration::from_millis(1);

/// `Transport` over a serial port, 8N1.
pub struct SerialTransport {
    path: String,
    baudrate: u32,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialTransport {
    /// Creates a closed transport for `path`; call `open` to connect.
    pub fn new(path: &str, baudrate: u32) -> SerialTransport {
        SerialTransport {
            path: path.to_owned(),
            baudrate,
            port: None,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn baudrate(&self) -> u32 {
        self.baudrate
    }

    fn port_mut(&mut self) -> Result<&mut Box<dyn SerialPort>> {
        self.port.as_mut().ok_or(Error::NotConnected)
    }
}

impl std::fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialTransport")
            .field("path", &self.path)
            .field("baudrate", &self.baudrate)
            .field("open", &self.port.is_some())
            .finish()
    }
}

impl Transport for SerialTransport {
    fn open(&mut self) -> Result<()> {
        self.close();
        debug!("Opening {} at {} baud", self.path, self.baudrate);
        let port = serialport::new(&self.path, self.baudrate)
            .timeout(SERIAL_IO_TIMEOUT)
            .open()?;
        self.port = Some(port);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(mut port) = self.port.take() {
            trace!("Closing {}", self.path);
            if let Err(err) = port.flush() {
                warn!("Flush on close of {} failed: {}", self.path, err);
            }
        }
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.port_mut()?.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        match self.port_mut()?.write(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn available(&mut self) -> Result<usize> {
        Ok(self.port_mut()?.bytes_to_read()? as usize)
    }

    fn flush(&mut self) -> Result<()> {
        self.port_mut()?.flush()?;
        Ok(())
    }

    fn set_line_control(&mut self, level: bool) -> Result<()> {
        let port = self.port_mut()?;
        port.flush()?;
        port.write_data_terminal_ready(level)?;
        Ok(())
    }

    fn byte_time_ns(&self) -> u64 {
        // start bit, 8 data bits, stop bit
        1_000_000_000 * 10 / self.baudrate.max(1) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_port_reports_not_connected() {
        let mut transport = SerialTransport::new("/dev/null-ydlidar", 230_400);
        assert!(!transport.is_open());
        assert!(matches!(transport.available(), Err(Error::NotConnected)));
        assert!(matches!(
            transport.write(&[0xA5, 0x65]),
            Err(Error::NotConnected)
        ));
    }

    #[test]
    fn byte_time_follows_baudrate() {
        assert_eq!(SerialTransport::new("x", 230_400).byte_time_ns(), 43_402);
        assert_eq!(SerialTransport::new("x", 115_200).byte_time_ns(), 86_805);
    }
}
