use std::error;
use std::fmt;
use std::io;

/// Represents errors that can occur during YDLIDAR operations.
#[derive(Debug)]
pub enum Error {
    /// The execution of operation failed. Contains a description of the failure.
    OperationFail { description: String },

    /// The execution of operation is timed out. The operation may be retried as-is.
    OperationTimeout,

    /// The device doesn't support this operation.
    OperationNotSupport,

    /// The driver has no open connection to the device.
    NotConnected,

    /// The decoding data is invalid according to current protocol. Contains a description of the protocol error.
    ProtocolError { description: String },

    /// The buffer provided is too small for message encoding.
    BufferTooSmall,

    /// An I/O error occurred while communicating with the underlying transport (e.g., serial port).
    IoError(io::Error),
}

impl Error {
    /// Returns `true` for errors that may go away by simply retrying the operation.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::OperationTimeout)
    }

    pub(crate) fn fail(description: impl Into<String>) -> Error {
        Error::OperationFail {
            description: description.into(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::OperationFail { description } => write!(f, "operation failed: {}", description),
            Error::OperationTimeout => write!(f, "operation timeout"),
            Error::OperationNotSupport => write!(f, "operation not support"),
            Error::NotConnected => write!(f, "not connected"),
            Error::ProtocolError { description } => write!(f, "protocol error: {}", description),
            Error::BufferTooSmall => write!(f, "buffer is too small for message encoding"),
            Error::IoError(err) => write!(f, "io error: {}", err),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::IoError(err)
    }
}

impl From<serialport::Error> for Error {
    fn from(err: serialport::Error) -> Self {
        Error::IoError(err.into())
    }
}

/// A specialized `Result` type for YDLIDAR operations.
pub type Result<T> = std::result::Result<T, Error>;
