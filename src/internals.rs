use std::time::Duration;

/// Default timeout duration for waiting for responses and measurement bytes.
pub const YDLIDAR_DEFAULT_TIMEOUT: Duration = Duration::from_millis(2000);

/// Consecutive read timeouts tolerated by the capture loop before the
/// failure is treated as a lost connection.
pub const YDLIDAR_DEFAULT_TIMEOUT_COUNT: u32 = 1;

/// Upper bound of samples kept for one revolution.
pub const MAX_SCAN_NODES: usize = 2048;

/// Number of samples fetched per capture-loop iteration.
pub const YDLIDAR_SCAN_BATCH: usize = 128;

/// Interval between reopen attempts while reconnecting.
pub const YDLIDAR_RECONNECT_DELAY: Duration = Duration::from_millis(200);

/// Pause after the port reopens, before the scan is restarted.
pub const YDLIDAR_POST_CONNECT_SETTLE: Duration = Duration::from_millis(100);

/// Time given to the motor to spin up before a scan command is sent.
pub const YDLIDAR_MOTOR_SETTLE: Duration = Duration::from_millis(500);

/// Gap between the commands of the stop sequence.
pub const YDLIDAR_STOP_COMMAND_DELAY: Duration = Duration::from_millis(10);

/// Number of scan-start attempts made by one reconnect cycle.
pub const YDLIDAR_RESTART_SCAN_ATTEMPTS: usize = 2;

/// The S2 variant is identified by its baud rate and does not report
/// a usable scan frequency.
pub const YDLIDAR_S2_BAUDRATE: u32 = 115_200;

/// Nominal time between two samples, in nanoseconds (4 kHz sample rate).
pub const YDLIDAR_DEFAULT_POINT_TIME_NS: u64 = 1_000_000_000 / 4000;

/// Nominal sample time of single-channel S2 devices (3 kHz).
pub const YDLIDAR_S2_SINGLE_CHANNEL_POINT_TIME_NS: u64 = 1_000_000_000 / 3000;

/// Returns `true` for the S2 variant.
#[inline]
pub fn is_s2_lidar(baudrate: u32) -> bool {
    baudrate == YDLIDAR_S2_BAUDRATE
}
