// Commands without payload and response

/// Command code to stop the measurement process of the LIDAR.
pub const YDLIDAR_CMD_STOP: u8 = 0x65;

/// Command code to start a scan.
pub const YDLIDAR_CMD_SCAN: u8 = 0x60;

/// Command code to start a forced scan.
/// A forced scan starts measuring even if the motor is not reported as stable.
pub const YDLIDAR_CMD_FORCE_SCAN: u8 = 0x61;

/// Command code to reset the LIDAR core. Requires re-initialization afterwards.
pub const YDLIDAR_CMD_RESET: u8 = 0x80;

/// Command code sent ahead of `YDLIDAR_CMD_STOP` to break out of any ongoing output.
pub const YDLIDAR_CMD_FORCE_STOP: u8 = 0x00;

// Commands without payload but have response

/// Command code to request device information (model, firmware, hardware, serial number).
pub const YDLIDAR_CMD_GET_DEVICE_INFO: u8 = 0x90;

/// Command code to request the device's health status.
pub const YDLIDAR_CMD_GET_DEVICE_HEALTH: u8 = 0x92;
