//! # YDLIDAR Driver
//!
//! `ydlidar` is a host driver for YDLIDAR series laser sensors. It frames
//! commands and answers over a byte transport, parses the measurement packet
//! stream on a background thread and hands out complete, timestamped
//! revolutions, reconnecting on its own when the link drops.

extern crate byteorder;
extern crate log;
extern crate serialport;

mod answers;
pub mod base;
mod capture;
mod checksum;
mod cmds;
mod handoff;
mod internals;
pub mod parsers;
mod protocol;
mod serial;
#[cfg(test)]
mod testing;
pub mod transcript;
pub mod types;
pub mod utils;

pub use crate::base::{Channel, Error, Message, Result, Transport};
pub use crate::capture::{transmission_delay_ns, CancelToken};
pub use crate::handoff::{RevolutionHandoff, RevolutionReader};
pub use crate::internals::{MAX_SCAN_NODES, YDLIDAR_DEFAULT_TIMEOUT};
pub use crate::protocol::YdlidarHostProtocol;
pub use crate::serial::SerialTransport;
pub use crate::transcript::Transcript;
pub use crate::types::*;
pub use crate::utils::ascend_scan_data;

use crate::answers::*;
use crate::capture::*;
use crate::cmds::*;
use crate::internals::*;
use crate::parsers::PacketParser;
use log::{debug, error, trace, warn};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// Connection to and control interface for a YDLIDAR device.
///
/// Commands run on the caller's thread; once a scan is started a capture
/// thread owns the measurement stream and publishes each completed
/// revolution for `grab_scan_data` and `RevolutionReader`s to pick up.
pub struct YdlidarDriver<T: Transport + 'static> {
    channel: SharedChannel<T>,
    shared: Arc<Shared>,
    handoff: RevolutionHandoff,
    options: DriverOptions,
    capture: Option<JoinHandle<()>>,
}

impl YdlidarDriver<SerialTransport> {
    /// Opens the serial port at `path` and connects to the device.
    ///
    /// # Example
    /// ```ignore
    /// let mut lidar = ydlidar::YdlidarDriver::connect("/dev/ttyUSB0", 230400)?;
    /// lidar.start_scan(false)?;
    /// let revolution = lidar.grab_scan_data(ydlidar::MAX_SCAN_NODES, ydlidar::YDLIDAR_DEFAULT_TIMEOUT)?;
    /// ```
    pub fn connect(path: &str, baudrate: u32) -> Result<YdlidarDriver<SerialTransport>> {
        trace!("Connecting to {} at {} baud", path, baudrate);
        let mut driver = YdlidarDriver::new(
            SerialTransport::new(path, baudrate),
            DriverOptions::with_baudrate(baudrate),
        );
        driver.connect_transport()?;
        Ok(driver)
    }
}

impl<T: Transport + 'static> YdlidarDriver<T> {
    /// Wraps a transport. Nothing is sent until `connect_transport`.
    pub fn new(transport: T, options: DriverOptions) -> YdlidarDriver<T> {
        trace!("Creating new YdlidarDriver with {:?}", options);
        YdlidarDriver {
            channel: Arc::new(Mutex::new(Channel::new(
                YdlidarHostProtocol::new(),
                Box::new(transport),
            ))),
            shared: Arc::new(Shared::new(options.auto_reconnect)),
            handoff: RevolutionHandoff::new(),
            options,
            capture: None,
        }
    }

    /// Opens the transport if needed, stops any output left running by a
    /// previous session and lowers the line-control output.
    pub fn connect_transport(&mut self) -> Result<()> {
        let mut channel = lock_channel(&self.channel)?;
        if !channel.is_open() {
            if let Err(e) = channel.open() {
                error!("Failed to open transport: {}", e);
                return Err(e);
            }
        }
        self.shared.connected.store(true, Ordering::SeqCst);

        if let Err(e) = send_stop_sequence(&mut channel) {
            warn!("Stop sequence on connect failed: {}", e);
        }
        channel.set_line_control(false)?;
        debug!("Connected");
        Ok(())
    }

    /// Stops scanning and closes the transport.
    pub fn disconnect(&mut self) -> Result<()> {
        if !self.is_connected() {
            return Ok(());
        }
        if let Err(e) = self.stop() {
            warn!("Stop before disconnect failed: {}", e);
        }
        let mut channel = lock_channel(&self.channel)?;
        if let Err(e) = channel.transport_mut().flush() {
            warn!("Flush before close failed: {}", e);
        }
        channel.close();
        self.shared.connected.store(false, Ordering::SeqCst);
        debug!("Disconnected");
        Ok(())
    }

    fn scan_settings(&self, force: bool, timeout: Duration) -> ScanSettings {
        ScanSettings {
            force,
            single_channel: self.options.single_channel,
            support_motor_ctrl: self.options.support_motor_ctrl,
            timeout,
            motor_settle: self.options.motor_settle,
            reconnect_delay: self.options.reconnect_delay,
        }
    }

    /// Starts measuring and spawns the capture thread, using the default timeout.
    ///
    /// A forced scan starts even if the motor is not reported as stable.
    pub fn start_scan(&mut self, force: bool) -> Result<()> {
        self.start_scan_with_timeout(force, self.options.timeout)
    }

    /// Starts measuring with a specified answer timeout.
    pub fn start_scan_with_timeout(&mut self, force: bool, timeout: Duration) -> Result<()> {
        trace!("start_scan(force: {}) with timeout {:?}", force, timeout);
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        if self.is_scanning() {
            trace!("Already scanning");
            return Ok(());
        }
        self.join_capture();

        let settings = self.scan_settings(force, timeout);
        let mut parser = PacketParser::new(self.options.intensity, self.options.baudrate);
        if self.options.single_channel && is_s2_lidar(self.options.baudrate) {
            parser.set_point_time_ns(YDLIDAR_S2_SINGLE_CHANNEL_POINT_TIME_NS);
        }

        {
            let mut channel = lock_channel(&self.channel)?;
            let idle = CancelToken::new();
            set_motor(&mut channel, true, &settings, &idle)?;
            send_stop_sequence(&mut channel)?;
            channel.flush_input()?;
            if let Err(e) = send_scan_command(&mut channel, &settings) {
                error!("Failed to start scan: {}", e);
                return Err(e);
            }
        }

        self.shared.cancel.reset();
        self.shared.update_stats(|s| *s = CaptureStats::default());
        self.handoff.clear();
        self.shared.scanning.store(true, Ordering::SeqCst);

        let capture = CaptureLoop::new(
            self.channel.clone(),
            self.shared.clone(),
            self.handoff.clone(),
            parser,
            settings,
        );
        match capture.spawn() {
            Ok(handle) => {
                self.capture = Some(handle);
                debug!("Scan started");
                Ok(())
            }
            Err(e) => {
                error!("Failed to spawn capture thread: {}", e);
                self.shared.scanning.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    /// Signals the capture thread and waits for it to exit.
    /// Returns `true` if it was reconnecting.
    fn pause_capture(&mut self) -> bool {
        let reconnecting = self.shared.reconnecting.load(Ordering::SeqCst);
        self.shared.scanning.store(false, Ordering::SeqCst);
        self.shared.cancel.cancel();
        self.handoff.wake();
        self.join_capture();
        reconnecting
    }

    fn join_capture(&mut self) {
        if let Some(handle) = self.capture.take() {
            trace!("Joining capture thread");
            if handle.join().is_err() {
                error!("Capture thread panicked");
            }
        }
    }

    /// Stops the capture thread, then the measurement and the motor.
    ///
    /// While reconnecting only the capture thread is stopped; the device is
    /// not reachable then.
    pub fn stop(&mut self) -> Result<()> {
        trace!("Stopping scan");
        if self.pause_capture() {
            debug!("Stopped while reconnecting");
            return Ok(());
        }
        if !self.is_connected() {
            return Ok(());
        }

        let settings = self.scan_settings(false, self.options.timeout);
        let mut channel = lock_channel(&self.channel)?;
        send_stop_sequence(&mut channel)?;
        set_motor(&mut channel, false, &settings, &CancelToken::new())
    }

    /// Waits for the next complete revolution and returns at most `max` samples of it.
    ///
    /// Fails with `OperationTimeout` when none arrives within `timeout` and
    /// with `OperationFail` when the capture stops while waiting.
    pub fn grab_scan_data(&self, max: usize, timeout: Duration) -> Result<Vec<Sample>> {
        self.handoff.retrieve(max, timeout)
    }

    /// A handle for consuming revolutions from another thread.
    pub fn revolution_reader(&self) -> RevolutionReader {
        RevolutionReader::new(self.handoff.clone(), self.options.timeout)
    }

    /// Puts a revolution in ascending angle order, see [`utils::ascend_scan_data`].
    pub fn ascend_scan_data(&self, scan: &mut [Sample]) -> Result<()> {
        ascend_scan_data(scan)
    }

    /// Gets the device health status, using the default timeout.
    pub fn get_health(&mut self) -> Result<DeviceHealth> {
        self.get_health_with_timeout(self.options.timeout)
    }

    /// Gets the device health status with a specified timeout.
    ///
    /// Stops a running capture first. Single-channel devices never answer
    /// and are reported healthy.
    pub fn get_health_with_timeout(&mut self, timeout: Duration) -> Result<DeviceHealth> {
        trace!("Getting device health with timeout {:?}", timeout);
        let payload = self.query(
            YDLIDAR_CMD_GET_DEVICE_HEALTH,
            YDLIDAR_ANS_TYPE_DEVHEALTH,
            YdlidarResponseDeviceHealth::WIRE_SIZE,
            timeout,
        )?;
        match payload {
            Some(payload) => Ok(YdlidarResponseDeviceHealth::decode(&payload)?.into()),
            None => Ok(DeviceHealth::healthy()),
        }
    }

    /// Gets the device information, using the default timeout.
    pub fn get_device_info(&mut self) -> Result<DeviceInfo> {
        self.get_device_info_with_timeout(self.options.timeout)
    }

    /// Gets the device information with a specified timeout.
    ///
    /// Single-channel devices never answer and are reported as model S4.
    pub fn get_device_info_with_timeout(&mut self, timeout: Duration) -> Result<DeviceInfo> {
        trace!("Getting device info with timeout {:?}", timeout);
        let payload = self.query(
            YDLIDAR_CMD_GET_DEVICE_INFO,
            YDLIDAR_ANS_TYPE_DEVINFO,
            YdlidarResponseDeviceInfo::WIRE_SIZE,
            timeout,
        )?;
        match payload {
            Some(payload) => Ok(YdlidarResponseDeviceInfo::decode(&payload)?.into()),
            None => Ok(DeviceInfo::single_channel()),
        }
    }

    /// Sends a query and reads its payload. `None` for single-channel devices.
    fn query(
        &mut self,
        cmd: u8,
        ans_type: u8,
        min_size: usize,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        self.pause_capture();

        let mut channel = lock_channel(&self.channel)?;
        channel.flush_input()?;
        if self.options.single_channel {
            channel.write(&Message::new(cmd))?;
            return Ok(None);
        }

        let header = match channel.invoke(&Message::new(cmd), timeout) {
            Ok(header) => header,
            Err(e) => {
                warn!("No answer to {:02X}: {}", cmd, e);
                return Err(e);
            }
        };
        if header.ans_type != ans_type {
            error!(
                "Unexpected response type: expected {:02X}, got {:02X}",
                ans_type, header.ans_type
            );
            return Err(Error::ProtocolError {
                description: format!(
                    "unexpected response type: expected {:02X}, got {:02X}",
                    ans_type, header.ans_type
                ),
            });
        }
        if (header.size as usize) < min_size {
            return Err(Error::ProtocolError {
                description: format!(
                    "answer too short: expected {}, got {}",
                    min_size, header.size
                ),
            });
        }

        channel.read_payload(header.size as usize, timeout).map(Some)
    }

    /// Sends the reset command to the device core.
    /// The device needs to be re-initialized afterwards.
    pub fn reset(&mut self) -> Result<()> {
        trace!("Sending RESET command ({:02X})", YDLIDAR_CMD_RESET);
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        let mut channel = lock_channel(&self.channel)?;
        channel.write(&Message::new(YDLIDAR_CMD_RESET))?;
        Ok(())
    }

    /// Powers the motor and waits for it to settle.
    pub fn start_motor(&mut self) -> Result<()> {
        self.switch_motor(true)
    }

    /// Cuts motor power and waits for it to settle.
    pub fn stop_motor(&mut self) -> Result<()> {
        self.switch_motor(false)
    }

    fn switch_motor(&mut self, on: bool) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        let settings = self.scan_settings(false, self.options.timeout);
        let mut channel = lock_channel(&self.channel)?;
        set_motor(&mut channel, on, &settings, &CancelToken::new())
    }

    /// Enables or disables reconnecting after a lost connection.
    /// Disabling it also abandons a reconnect in progress.
    pub fn set_auto_reconnect(&mut self, enable: bool) {
        self.options.auto_reconnect = enable;
        self.shared.auto_reconnect.store(enable, Ordering::SeqCst);
    }

    /// Single-channel devices send no answer headers. Applies to the next command.
    pub fn set_single_channel(&mut self, single_channel: bool) {
        self.options.single_channel = single_channel;
    }

    /// Selects 3-byte (with intensity) or 2-byte samples. Applies to the next scan.
    pub fn set_intensity(&mut self, intensity: bool) {
        self.options.intensity = intensity;
    }

    /// Installs or removes the diagnostic transcript.
    pub fn set_transcript(&mut self, transcript: Option<Transcript>) -> Result<()> {
        lock_channel(&self.channel)?.set_transcript(transcript);
        Ok(())
    }

    pub fn options(&self) -> &DriverOptions {
        &self.options
    }

    pub fn state(&self) -> ConnectionState {
        if self.shared.reconnecting.load(Ordering::SeqCst) {
            ConnectionState::Reconnecting
        } else if self.is_scanning() {
            ConnectionState::Scanning
        } else if self.is_connected() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    pub fn capture_state(&self) -> CaptureState {
        self.shared.capture_state()
    }

    pub fn is_scanning(&self) -> bool {
        self.shared.is_scanning()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> CaptureStats {
        self.shared.stats()
    }
}

impl<T: Transport + 'static> Drop for YdlidarDriver<T> {
    fn drop(&mut self) {
        self.pause_capture();
    }
}
