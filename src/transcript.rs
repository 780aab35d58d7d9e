use log::warn;
use std::fmt;
use std::io::{self, Write};

/// Write-only diagnostic record of the bytes exchanged with the device.
///
/// Sent frames are recorded as `[send]: a5 60 [success]`, received packets
/// as a hex dump followed by a `[checksum error]` marker when they failed
/// validation. Write errors on the sink are logged and otherwise ignored.
pub struct Transcript {
    sink: Box<dyn Write + Send>,
}

impl Transcript {
    pub fn new<W: Write + Send + 'static>(sink: W) -> Transcript {
        Transcript {
            sink: Box::new(sink),
        }
    }

    /// Records a command frame and whether it was written.
    pub fn sent(&mut self, frame: &[u8], success: bool) {
        let line = format!(
            "[send]: {} [{}]\n",
            hex(frame, " "),
            if success { "success" } else { "failed" }
        );
        self.emit(&line);
    }

    /// Records a received measurement packet.
    pub fn received_packet(&mut self, packet: &[u8], checksum_ok: bool) {
        let mut line = hex(packet, "");
        if !checksum_ok {
            line.push_str("[checksum error]");
        }
        line.push('\n');
        self.emit(&line);
    }

    pub fn note(&mut self, text: &str) {
        self.emit(&format!("[{}]\n", text));
    }

    fn emit(&mut self, line: &str) {
        if let Err(err) = self.write_line(line) {
            warn!("Failed to write transcript: {}", err);
        }
    }

    fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.sink.write_all(line.as_bytes())?;
        self.sink.flush()
    }
}

impl fmt::Debug for Transcript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transcript").finish_non_exhaustive()
    }
}

fn hex(bytes: &[u8], separator: &str) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(separator)
}
