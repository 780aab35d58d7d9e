use crate::answers::*;
use crate::base::{Channel, Error, Message, Result, Transport};
use crate::cmds::*;
use crate::handoff::RevolutionHandoff;
use crate::internals::*;
use crate::parsers::PacketParser;
use crate::protocol::YdlidarHostProtocol;
use crate::types::{CaptureState, CaptureStats, Sample, SyncFlag};
use log::{debug, error, info, trace, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub(crate) type YdlidarChannel<T> = Channel<YdlidarHostProtocol, T>;
pub(crate) type SharedChannel<T> = Arc<Mutex<YdlidarChannel<T>>>;

pub(crate) fn lock_channel<T: Transport>(
    channel: &SharedChannel<T>,
) -> Result<MutexGuard<'_, YdlidarChannel<T>>> {
    channel
        .lock()
        .map_err(|_| Error::fail("channel lock poisoned"))
}

/// Cancellation signal honoured by every sleep of the capture thread.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    pub fn new() -> CancelToken {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        let (lock, cvar) = &*self.inner;
        if let Ok(mut cancelled) = lock.lock() {
            *cancelled = true;
        }
        cvar.notify_all();
    }

    pub fn reset(&self) {
        let (lock, _) = &*self.inner;
        if let Ok(mut cancelled) = lock.lock() {
            *cancelled = false;
        }
    }

    pub fn is_cancelled(&self) -> bool {
        let (lock, _) = &*self.inner;
        lock.lock().map(|cancelled| *cancelled).unwrap_or(true)
    }

    /// Sleeps for `duration` unless cancelled first. Returns `false` when cancelled.
    pub fn sleep(&self, duration: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let deadline = Instant::now() + duration;
        let Ok(mut cancelled) = lock.lock() else {
            return false;
        };
        while !*cancelled {
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            match cvar.wait_timeout(cancelled, deadline - now) {
                Ok((guard, _)) => cancelled = guard,
                Err(_) => return false,
            }
        }
        false
    }
}

/// State shared between the driver and its capture thread.
#[derive(Debug)]
pub(crate) struct Shared {
    pub scanning: AtomicBool,
    pub connected: AtomicBool,
    pub auto_reconnect: AtomicBool,
    pub reconnecting: AtomicBool,
    pub cancel: CancelToken,
    capture_state: Mutex<CaptureState>,
    stats: Mutex<CaptureStats>,
}

impl Shared {
    pub fn new(auto_reconnect: bool) -> Shared {
        Shared {
            scanning: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            auto_reconnect: AtomicBool::new(auto_reconnect),
            reconnecting: AtomicBool::new(false),
            cancel: CancelToken::new(),
            capture_state: Mutex::new(CaptureState::Idle),
            stats: Mutex::new(CaptureStats::default()),
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }

    pub fn capture_state(&self) -> CaptureState {
        self.capture_state
            .lock()
            .map(|state| *state)
            .unwrap_or(CaptureState::Stopped)
    }

    pub fn set_capture_state(&self, state: CaptureState) {
        if let Ok(mut current) = self.capture_state.lock() {
            if *current != state {
                debug!("Capture state {:?} -> {:?}", *current, state);
                *current = state;
            }
        }
    }

    pub fn stats(&self) -> CaptureStats {
        self.stats.lock().map(|s| *s).unwrap_or_default()
    }

    pub fn update_stats<F: FnOnce(&mut CaptureStats)>(&self, f: F) {
        if let Ok(mut stats) = self.stats.lock() {
            f(&mut stats);
        }
    }

    fn keep_reconnecting(&self) -> bool {
        self.is_scanning()
            && self.auto_reconnect.load(Ordering::SeqCst)
            && !self.cancel.is_cancelled()
    }
}

/// Parameters of a scan start, shared by the driver and the reconnect logic.
#[derive(Debug, Clone)]
pub(crate) struct ScanSettings {
    pub force: bool,
    pub single_channel: bool,
    pub support_motor_ctrl: bool,
    pub timeout: Duration,
    pub motor_settle: Duration,
    pub reconnect_delay: Duration,
}

/// Sends force-stop followed by stop. Neither gets an answer.
pub(crate) fn send_stop_sequence<T: Transport>(channel: &mut YdlidarChannel<T>) -> Result<()> {
    channel.write(&Message::new(YDLIDAR_CMD_FORCE_STOP))?;
    thread::sleep(YDLIDAR_STOP_COMMAND_DELAY);
    channel.write(&Message::new(YDLIDAR_CMD_STOP))?;
    thread::sleep(YDLIDAR_STOP_COMMAND_DELAY);
    Ok(())
}

/// Switches the motor through the line-control output and waits for it to settle.
///
/// Models without motor control expect the inverted level.
pub(crate) fn set_motor<T: Transport>(
    channel: &mut YdlidarChannel<T>,
    on: bool,
    settings: &ScanSettings,
    cancel: &CancelToken,
) -> Result<()> {
    let level = if settings.support_motor_ctrl { on } else { !on };
    trace!("Motor {} (line control {})", if on { "on" } else { "off" }, level);
    channel.set_line_control(level)?;
    if !cancel.sleep(settings.motor_settle) {
        return Err(Error::fail("cancelled while waiting for the motor"));
    }
    Ok(())
}

/// Sends the scan command and, unless the device is single-channel,
/// validates the measurement answer header.
pub(crate) fn send_scan_command<T: Transport>(
    channel: &mut YdlidarChannel<T>,
    settings: &ScanSettings,
) -> Result<()> {
    let cmd = if settings.force {
        YDLIDAR_CMD_FORCE_SCAN
    } else {
        YDLIDAR_CMD_SCAN
    };
    channel.write(&Message::new(cmd))?;

    if settings.single_channel {
        return Ok(());
    }

    let header = channel.read_until(settings.timeout)?;
    if header.ans_type != YDLIDAR_ANS_TYPE_MEASUREMENT {
        return Err(Error::ProtocolError {
            description: format!(
                "unexpected response type: expected {:02X}, got {:02X}",
                YDLIDAR_ANS_TYPE_MEASUREMENT, header.ans_type
            ),
        });
    }
    if header.size < YDLIDAR_ANS_MEASUREMENT_MIN_SIZE {
        return Err(Error::ProtocolError {
            description: format!("measurement answer too short: {}", header.size),
        });
    }
    Ok(())
}

/// Restarts measurement on a freshly reopened connection.
fn start_auto_scan<T: Transport>(
    channel: &mut YdlidarChannel<T>,
    settings: &ScanSettings,
    cancel: &CancelToken,
) -> Result<()> {
    send_scan_command(channel, settings)?;
    set_motor(channel, true, settings, cancel)
}

/// Estimated time, in nanoseconds, a ring-start sample spent in transit and
/// in the receive buffer before it was decoded.
///
/// `available` is the number of bytes still buffered when the sample was
/// produced.
pub fn transmission_delay_ns(
    available: usize,
    package_size: usize,
    point_time_ns: u64,
    byte_time_ns: u64,
) -> u64 {
    let mut size = available;
    let mut delay = 0u64;

    if size > YDLIDAR_PACKET_HEADER_SIZE && size < YDLIDAR_PACKET_HEADER_SIZE * package_size {
        let package_num = size / package_size;
        let number = size % package_size;
        delay = package_num as u64 * point_time_ns * package_size as u64 / 2;
        if number > YDLIDAR_PACKET_HEADER_SIZE {
            delay += point_time_ns * ((number - YDLIDAR_PACKET_HEADER_SIZE) / 2) as u64;
        }
        size = number;
        if package_num > 0 && number == 0 {
            size = package_size;
        }
    }

    size as u64 * byte_time_ns + delay
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum ReconnectStep {
    Close,
    Open,
    Settle,
    StartScan(usize),
    Resumed,
}

/// The background capture loop: reads samples, assembles revolutions and
/// hands them off, reconnecting when the transport fails.
pub(crate) struct CaptureLoop<T: Transport> {
    channel: SharedChannel<T>,
    shared: Arc<Shared>,
    handoff: RevolutionHandoff,
    parser: PacketParser,
    settings: ScanSettings,
    revolution: Vec<Sample>,
    timeout_count: u32,
}

impl<T: Transport + 'static> CaptureLoop<T> {
    pub fn new(
        channel: SharedChannel<T>,
        shared: Arc<Shared>,
        handoff: RevolutionHandoff,
        parser: PacketParser,
        settings: ScanSettings,
    ) -> CaptureLoop<T> {
        CaptureLoop {
            channel,
            shared,
            handoff,
            parser,
            settings,
            revolution: Vec::with_capacity(MAX_SCAN_NODES),
            timeout_count: 0,
        }
    }

    /// Runs the loop on a named thread.
    pub fn spawn(self) -> Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("ydlidar-capture".to_owned())
            .spawn(move || self.run())
            .map_err(Error::from)
    }

    fn run(mut self) {
        info!("Capture loop started");
        self.shared.set_capture_state(CaptureState::Running);
        let mut batch = Vec::with_capacity(YDLIDAR_SCAN_BATCH);

        while self.shared.is_scanning() {
            batch.clear();
            match self.wait_scan_data(&mut batch) {
                Ok(()) => self.timeout_count = 0,
                Err(err) if err.is_timeout() && self.timeout_count <= YDLIDAR_DEFAULT_TIMEOUT_COUNT => {
                    self.timeout_count += 1;
                    self.mark_unsynced();
                    self.shared.update_stats(|s| s.timeouts += 1);
                    warn!("Scan data timeout, count: {}", self.timeout_count);
                }
                Err(err) => {
                    if !self.shared.is_scanning() {
                        break;
                    }
                    error!("Capture failed: {}", err);
                    if self.shared.auto_reconnect.load(Ordering::SeqCst) && self.reconnect() {
                        continue;
                    }
                    if self.shared.is_scanning() {
                        self.stop_on_failure();
                        return;
                    }
                    break;
                }
            }

            let checksum_errors = self.parser.checksum_errors();
            self.shared.update_stats(|s| s.checksum_errors = checksum_errors);
            self.collect(&batch);
        }

        self.shared.set_capture_state(CaptureState::Idle);
        info!("Capture loop stopped");
    }

    fn stop_on_failure(&mut self) {
        error!("Exiting capture loop");
        self.shared.scanning.store(false, Ordering::SeqCst);
        self.shared.set_capture_state(CaptureState::Stopped);
        self.handoff.wake();
    }

    fn mark_unsynced(&mut self) {
        if let Some(first) = self.revolution.first_mut() {
            first.sync_flag = SyncFlag::NotSynced;
        }
    }

    /// Fetches up to one batch of samples, returning right after a
    /// ring-start sample, which gets its transmission delay subtracted.
    fn wait_scan_data(&mut self, batch: &mut Vec<Sample>) -> Result<()> {
        let mut channel = lock_channel(&self.channel)?;
        if !channel.is_open() {
            return Err(Error::NotConnected);
        }

        let deadline = Instant::now() + self.settings.timeout;
        while batch.len() < YDLIDAR_SCAN_BATCH {
            let now = Instant::now();
            if now > deadline {
                return Err(Error::fail("scan batch incomplete"));
            }

            let mut sample = parse_sample(&mut channel, &mut self.parser, deadline - now)?;
            if sample.is_sync() {
                let transport = channel.transport_mut();
                let delay = transmission_delay_ns(
                    transport.available()?,
                    self.parser.package_size(),
                    self.parser.point_time_ns(),
                    transport.byte_time_ns(),
                );
                sample.timestamp = sample.timestamp.saturating_sub(delay);
                batch.push(sample);
                return Ok(());
            }
            batch.push(sample);
        }
        Ok(())
    }

    /// Appends samples to the current revolution, publishing it when the
    /// next ring-start marker arrives.
    fn collect(&mut self, batch: &[Sample]) {
        for sample in batch {
            if sample.is_sync() {
                if self.revolution.first().map_or(false, Sample::is_sync) {
                    // counted before readers can see it
                    self.shared.update_stats(|s| s.revolutions += 1);
                    self.handoff.publish(&self.revolution);
                }
                self.revolution.clear();
            }

            if self.revolution.len() < MAX_SCAN_NODES {
                self.revolution.push(sample.clone());
            } else if let Some(last) = self.revolution.last_mut() {
                *last = sample.clone();
                self.shared.update_stats(|s| s.overflowed_samples += 1);
            }
        }
    }

    /// Drives the reconnect state machine. Returns `true` once scanning has
    /// resumed, `false` when cancelled.
    fn reconnect(&mut self) -> bool {
        warn!("Reconnecting lidar");
        self.shared.set_capture_state(CaptureState::Reconnecting);
        self.shared.reconnecting.store(true, Ordering::SeqCst);
        self.shared.update_stats(|s| s.reconnects += 1);
        self.note("reconnecting lidar");

        let mut step = ReconnectStep::Close;
        let resumed = loop {
            if !self.shared.keep_reconnecting() {
                break false;
            }
            trace!("Reconnect step {:?}", step);
            step = match step {
                ReconnectStep::Close => {
                    if let Ok(mut channel) = lock_channel(&self.channel) {
                        channel.close();
                    }
                    self.shared.connected.store(false, Ordering::SeqCst);
                    ReconnectStep::Open
                }
                ReconnectStep::Open => match self.reopen() {
                    Ok(()) => {
                        self.shared.connected.store(true, Ordering::SeqCst);
                        ReconnectStep::Settle
                    }
                    Err(err) => {
                        debug!("Reopen failed: {}", err);
                        if !self.shared.cancel.sleep(self.settings.reconnect_delay) {
                            break false;
                        }
                        ReconnectStep::Open
                    }
                },
                ReconnectStep::Settle => {
                    if !self.shared.cancel.sleep(YDLIDAR_POST_CONNECT_SETTLE) {
                        break false;
                    }
                    ReconnectStep::StartScan(0)
                }
                ReconnectStep::StartScan(attempt) => match self.restart_scan() {
                    Ok(()) => ReconnectStep::Resumed,
                    Err(err) if attempt + 1 < YDLIDAR_RESTART_SCAN_ATTEMPTS => {
                        warn!("Restarting scan failed: {}, retrying", err);
                        ReconnectStep::StartScan(attempt + 1)
                    }
                    Err(err) => {
                        warn!("Restarting scan failed: {}", err);
                        self.note("reconnecting lidar success, start scan failed");
                        ReconnectStep::Close
                    }
                },
                ReconnectStep::Resumed => break true,
            };
        };

        self.shared.reconnecting.store(false, Ordering::SeqCst);
        if resumed {
            info!("Lidar reconnected, scanning resumed");
            self.timeout_count = 0;
            self.parser.reset();
            self.mark_unsynced();
            self.shared.set_capture_state(CaptureState::Running);
        }
        resumed
    }

    fn reopen(&mut self) -> Result<()> {
        let mut channel = lock_channel(&self.channel)?;
        channel.open()?;
        if let Err(err) = send_stop_sequence(&mut channel) {
            warn!("Stop sequence after reopen failed: {}", err);
        }
        channel.set_line_control(false)
    }

    fn restart_scan(&mut self) -> Result<()> {
        let mut channel = lock_channel(&self.channel)?;
        start_auto_scan(&mut channel, &self.settings, &self.shared.cancel)
    }

    fn note(&self, text: &str) {
        if let Ok(mut channel) = lock_channel(&self.channel) {
            if let Some(transcript) = channel.transcript_mut() {
                transcript.note(text);
            }
        }
    }
}

/// Parses one sample and records any packet read on the way.
fn parse_sample<T: Transport>(
    channel: &mut YdlidarChannel<T>,
    parser: &mut PacketParser,
    timeout: Duration,
) -> Result<Sample> {
    let sample = parser.parse_one(channel.transport_mut(), timeout);
    if let Some((packet, checksum_ok)) = parser.take_completed_packet() {
        if let Some(transcript) = channel.transcript_mut() {
            transcript.received_packet(packet, checksum_ok);
        }
    }
    sample
}
