use crate::base::{Error, Result};
use byteorder::{ByteOrder, LittleEndian};

/// Answer header preceding every response of the request/response commands.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AnsHeader {
    /// Payload size in bytes (low 30 bits of the size word).
    pub size: u32,
    /// Answer sub-type (high 2 bits of the size word).
    pub subtype: u8,
    /// Answer type identifier, see the `YDLIDAR_ANS_TYPE_*` constants.
    pub ans_type: u8,
}

/// Response type identifier for device information.
pub const YDLIDAR_ANS_TYPE_DEVINFO: u8 = 0x4;

/// Response type identifier for device health status.
pub const YDLIDAR_ANS_TYPE_DEVHEALTH: u8 = 0x6;

/// Response type identifier announcing the measurement stream.
pub const YDLIDAR_ANS_TYPE_MEASUREMENT: u8 = 0x81;

/// Smallest answer size accepted for the measurement announcement.
pub const YDLIDAR_ANS_MEASUREMENT_MIN_SIZE: u32 = 5;

/// Device information payload as received from the LIDAR.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct YdlidarResponseDeviceInfo {
    /// Model ID of the LIDAR.
    pub model: u8,
    /// Firmware version (major << 8 | minor).
    pub firmware_version: u16,
    /// Hardware version.
    pub hardware_version: u8,
    /// 16-byte unique serial number.
    pub serialnum: [u8; 16],
}

impl YdlidarResponseDeviceInfo {
    /// Size of the payload on the wire.
    pub const WIRE_SIZE: usize = 20;

    /// Decodes the payload field by field.
    pub fn decode(data: &[u8]) -> Result<YdlidarResponseDeviceInfo> {
        check_payload_size("device info", data, Self::WIRE_SIZE)?;
        let mut serialnum = [0u8; 16];
        serialnum.copy_from_slice(&data[4..20]);
        Ok(YdlidarResponseDeviceInfo {
            model: data[0],
            firmware_version: LittleEndian::read_u16(&data[1..3]),
            hardware_version: data[3],
            serialnum,
        })
    }
}

/// Device health payload as received from the LIDAR.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct YdlidarResponseDeviceHealth {
    /// Health status code (see `YDLIDAR_HEALTH_STATUS_*` constants).
    pub status: u8,
    /// Error code associated with the status.
    pub error_code: u16,
}

impl YdlidarResponseDeviceHealth {
    /// Size of the payload on the wire.
    pub const WIRE_SIZE: usize = 3;

    /// Decodes the payload field by field.
    pub fn decode(data: &[u8]) -> Result<YdlidarResponseDeviceHealth> {
        check_payload_size("device health", data, Self::WIRE_SIZE)?;
        Ok(YdlidarResponseDeviceHealth {
            status: data[0],
            error_code: LittleEndian::read_u16(&data[1..3]),
        })
    }
}

fn check_payload_size(what: &str, data: &[u8], expected: usize) -> Result<()> {
    if data.len() < expected {
        Err(Error::ProtocolError {
            description: format!(
                "invalid data size for {}: expected {}, got {}",
                what,
                expected,
                data.len()
            ),
        })
    } else {
        Ok(())
    }
}

// health status

/// Health status code indicating the LIDAR is operating correctly.
pub const YDLIDAR_HEALTH_STATUS_OK: u8 = 0;

/// Health status code indicating a non-critical warning.
pub const YDLIDAR_HEALTH_STATUS_WARNING: u8 = 1;

/// Health status code indicating a critical error.
pub const YDLIDAR_HEALTH_STATUS_ERROR: u8 = 2;

/// Model code reported for single-channel devices, which never answer queries.
pub const YDLIDAR_MODEL_S4: u8 = 4;

// Measurement packets

/// Packet magic, sent little-endian (`AA 55`).
pub const YDLIDAR_PACKET_HEADER: u16 = 0x55AA;

/// Size of a measurement packet header.
pub const YDLIDAR_PACKET_HEADER_SIZE: usize = 10;

/// Bit 0 of the CT byte: set for the first packet of a revolution.
pub const YDLIDAR_PACKET_CT_RING_START: u8 = 0x01;

/// Check-bit carried in bit 0 of every angle field.
pub const YDLIDAR_RESP_MEASUREMENT_CHECKBIT: u16 = 0x1;

/// Shift between the angle field and the q6 angle value.
pub const YDLIDAR_RESP_MEASUREMENT_ANGLE_SHIFT: u16 = 1;

/// Shift between the raw distance word and the distance value.
pub const YDLIDAR_RESP_MEASUREMENT_DISTANCE_SHIFT: u16 = 2;

/// Shift of the quality bits in the synthesized 2-byte-mode quality.
pub const YDLIDAR_RESP_MEASUREMENT_QUALITY_SHIFT: u16 = 2;

/// Shift of the two low distance bits into the 3-byte-mode intensity.
pub const YDLIDAR_RESP_MEASUREMENT_ANGLE_SAMPLE_SHIFT: u16 = 8;

/// Bytes per sample with intensity (quality byte + distance word).
pub const YDLIDAR_INTENSITY_SAMPLE_BYTES: usize = 3;

/// Bytes per sample without intensity (distance word only).
pub const YDLIDAR_NORMAL_SAMPLE_BYTES: usize = 2;

/// Typical size of a full packet without intensity (40 samples).
pub const YDLIDAR_NORMAL_PACKAGE_SIZE: usize = 90;

/// Typical size of a full packet with intensity (40 samples).
pub const YDLIDAR_INTENSITY_NORMAL_PACKAGE_SIZE: usize = 130;
