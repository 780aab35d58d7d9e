use crate::answers::*;
use crate::internals::*;
use log::warn;
use std::f32::consts::PI;
use std::time::Duration;

/// Full circle in q6 angle units (degrees * 64).
pub const FULL_CIRCLE_Q6: u32 = 360 * 64;

/// Angle in q6 fixed point with the check-bit attached: `(degrees * 64) << 1 | 1`.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AngleQ6(pub u16);

impl AngleQ6 {
    /// Builds a wire angle from a q6 value, attaching the check-bit.
    #[inline]
    pub fn from_q6(q6: u16) -> AngleQ6 {
        AngleQ6((q6 << YDLIDAR_RESP_MEASUREMENT_ANGLE_SHIFT) | YDLIDAR_RESP_MEASUREMENT_CHECKBIT)
    }

    /// Builds an angle from degrees. Degrees are truncated to q6 resolution.
    #[inline]
    pub fn from_degrees(degrees: f32) -> AngleQ6 {
        AngleQ6::from_q6((degrees * 64.0) as u16)
    }

    /// The bare check-bit, carried by samples of a corrupted packet.
    #[inline]
    pub fn check_bit_only() -> AngleQ6 {
        AngleQ6(YDLIDAR_RESP_MEASUREMENT_CHECKBIT)
    }

    /// Angle in q6 units, without the check-bit.
    #[inline]
    pub fn q6(self) -> u16 {
        self.0 >> YDLIDAR_RESP_MEASUREMENT_ANGLE_SHIFT
    }

    /// Angle in degrees.
    #[inline]
    pub fn degrees(self) -> f32 {
        self.q6() as f32 / 64.0
    }

    /// Angle in radians.
    #[inline]
    pub fn radians(self) -> f32 {
        self.degrees() * PI / 180.0
    }

    #[inline]
    pub fn check_bit(self) -> bool {
        self.0 & YDLIDAR_RESP_MEASUREMENT_CHECKBIT != 0
    }
}

/// Distance in quarter millimetres. Zero means no return.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DistanceQ2(pub u16);

impl DistanceQ2 {
    #[inline]
    pub fn is_valid(self) -> bool {
        self.0 != 0
    }

    /// Distance in millimetres.
    #[inline]
    pub fn millimeters(self) -> f32 {
        self.0 as f32 / 4.0
    }

    /// Distance in meters.
    #[inline]
    pub fn meters(self) -> f32 {
        self.0 as f32 / 4000.0
    }
}

/// Marks the first sample of a revolution.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum SyncFlag {
    #[default]
    NotSynced,
    Synced,
}

/// A single measurement decoded from a packet.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Sample {
    /// `Synced` for the first sample of a ring-start packet.
    pub sync_flag: SyncFlag,
    /// Intensity. Zero when the distance is invalid or the packet was corrupt.
    pub quality: u16,
    pub angle: AngleQ6,
    pub distance: DistanceQ2,
    /// Scan frequency in decihertz, only reported on ring-start samples.
    pub scan_frequency: u8,
    /// Host time of reception in nanoseconds since the Unix epoch.
    pub timestamp: u64,
    pub debug_info: u8,
    /// Position of the sample inside its packet.
    pub index: u8,
    /// 1 when the packet failed its checksum.
    pub error_package: u8,
}

impl Sample {
    /// Returns `true` if this sample marks the start of a revolution.
    #[inline]
    pub fn is_sync(&self) -> bool {
        self.sync_flag == SyncFlag::Synced
    }

    /// Returns `true` if the sample carries a measurement.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.distance.is_valid()
    }
}

/// Health status reported by the device.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    Ok,
    Warning,
    Error,
}

/// Health report: status plus device specific error code.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DeviceHealth {
    pub status: HealthStatus,
    pub error_code: u16,
}

impl DeviceHealth {
    /// The report assumed for devices that cannot be queried.
    pub fn healthy() -> DeviceHealth {
        DeviceHealth {
            status: HealthStatus::Ok,
            error_code: 0,
        }
    }
}

impl From<YdlidarResponseDeviceHealth> for DeviceHealth {
    fn from(resp: YdlidarResponseDeviceHealth) -> DeviceHealth {
        let status = match resp.status {
            YDLIDAR_HEALTH_STATUS_OK => HealthStatus::Ok,
            YDLIDAR_HEALTH_STATUS_WARNING => HealthStatus::Warning,
            YDLIDAR_HEALTH_STATUS_ERROR => HealthStatus::Error,
            other => {
                warn!("Unknown health status {}, treating as error", other);
                HealthStatus::Error
            }
        };
        DeviceHealth {
            status,
            error_code: resp.error_code,
        }
    }
}

/// Identification of the device.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub model: u8,
    pub firmware_major: u8,
    pub firmware_minor: u8,
    pub hardware_version: u8,
    pub serial_number: [u8; 16],
}

impl DeviceInfo {
    /// Info reported on behalf of single-channel devices.
    pub fn single_channel() -> DeviceInfo {
        DeviceInfo {
            model: YDLIDAR_MODEL_S4,
            firmware_major: 0,
            firmware_minor: 0,
            hardware_version: 0,
            serial_number: [0; 16],
        }
    }

    /// Serial number rendered as a digit string.
    pub fn serial_number_string(&self) -> String {
        self.serial_number
            .iter()
            .map(|d| format!("{:X}", d & 0x0F))
            .collect()
    }
}

impl From<YdlidarResponseDeviceInfo> for DeviceInfo {
    fn from(resp: YdlidarResponseDeviceInfo) -> DeviceInfo {
        DeviceInfo {
            model: resp.model,
            firmware_major: (resp.firmware_version >> 8) as u8,
            firmware_minor: (resp.firmware_version & 0xFF) as u8,
            hardware_version: resp.hardware_version,
            serial_number: resp.serialnum,
        }
    }
}

/// Connection state of the driver as seen by callers.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
    Scanning,
    /// Scanning, but the transport is being reopened.
    Reconnecting,
}

/// State of the background capture loop.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum CaptureState {
    #[default]
    Idle,
    Running,
    Reconnecting,
    Stopped,
}

/// Snapshot of the capture loop's diagnostic counters.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct CaptureStats {
    pub revolutions: u64,
    /// Samples written over the last slot of a full revolution.
    pub overflowed_samples: u64,
    pub checksum_errors: u64,
    pub timeouts: u64,
    pub reconnects: u64,
}

/// Options for configuring the driver.
#[derive(Debug, Clone, PartialEq)]
pub struct DriverOptions {
    /// Baud rate of the serial link; also selects S2 specific timing.
    pub baudrate: u32,
    /// Samples carry an intensity byte (3-byte samples) when `true`.
    pub intensity: bool,
    /// Single-channel devices send no answer headers.
    pub single_channel: bool,
    /// Reopen the transport and restart the scan after a hard failure.
    pub auto_reconnect: bool,
    /// The motor is powered through the line-control output.
    pub support_motor_ctrl: bool,
    /// Deadline of every blocking exchange.
    pub timeout: Duration,
    /// Delay between motor start and the scan command.
    pub motor_settle: Duration,
    /// Interval between reopen attempts.
    pub reconnect_delay: Duration,
}

impl DriverOptions {
    /// Creates default options for the given baud rate.
    pub fn with_baudrate(baudrate: u32) -> DriverOptions {
        DriverOptions {
            baudrate,
            ..DriverOptions::default()
        }
    }
}

impl Default for DriverOptions {
    fn default() -> DriverOptions {
        DriverOptions {
            baudrate: 230_400,
            intensity: true,
            single_channel: false,
            auto_reconnect: true,
            support_motor_ctrl: true,
            timeout: YDLIDAR_DEFAULT_TIMEOUT,
            motor_settle: YDLIDAR_MOTOR_SETTLE,
            reconnect_delay: YDLIDAR_RECONNECT_DELAY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn angle_round_trips_through_degrees() {
        let angle = AngleQ6::from_degrees(90.0);
        assert_eq!(angle.0, (90 * 64) << 1 | 1);
        assert!(angle.check_bit());
        assert_eq!(angle.q6(), 5760);
        assert!((angle.degrees() - 90.0).abs() < f32::EPSILON);
        assert!((angle.radians() - PI / 2.0).abs() < 1e-6);
    }

    #[test]
    fn distance_units() {
        let distance = DistanceQ2(4000);
        assert!(distance.is_valid());
        assert!((distance.millimeters() - 1000.0).abs() < f32::EPSILON);
        assert!((distance.meters() - 1.0).abs() < f32::EPSILON);
        assert!(!DistanceQ2(0).is_valid());
    }

    #[test]
    fn health_mapping() {
        let health: DeviceHealth = YdlidarResponseDeviceHealth {
            status: 2,
            error_code: 7,
        }
        .into();
        assert_eq!(health.status, HealthStatus::Error);
        assert_eq!(health.error_code, 7);

        let unknown: DeviceHealth = YdlidarResponseDeviceHealth {
            status: 9,
            error_code: 0,
        }
        .into();
        assert_eq!(unknown.status, HealthStatus::Error);
    }

    #[test]
    fn info_mapping_splits_firmware() {
        let info: DeviceInfo = YdlidarResponseDeviceInfo {
            model: 6,
            firmware_version: 0x0108,
            hardware_version: 2,
            serialnum: [1; 16],
        }
        .into();
        assert_eq!((info.firmware_major, info.firmware_minor), (1, 8));
        assert_eq!(info.serial_number_string(), "1111111111111111");
    }
}
