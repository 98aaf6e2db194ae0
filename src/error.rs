//! Driver error types

use thiserror::Error;

/// Errors raised by a transport channel implementation
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Transport closed")]
    Closed,

    #[error("Transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport error: {0}")]
    Other(String),
}

/// Error nibble reported by the device in a memory-read reply
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryAccessError {
    #[error("Tried to read from a write-only address")]
    WriteOnlyAddress,

    #[error("Tried to read from a nonexistent address")]
    NonexistentAddress,

    #[error("Unknown memory access error: {0}")]
    Unknown(u8),
}

impl MemoryAccessError {
    /// Map the low nibble of a read reply. `0` means success.
    pub fn from_code(code: u8) -> Option<Self> {
        match code & 0x0F {
            0 => None,
            7 => Some(Self::WriteOnlyAddress),
            8 => Some(Self::NonexistentAddress),
            other => Some(Self::Unknown(other)),
        }
    }
}

/// Errors from parsing or persisting an accelerometer calibration profile
#[derive(Error, Debug)]
pub enum CalibrationError {
    #[error("Calibration file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid calibration data on line {line}: {reason}")]
    Parse { line: usize, reason: String },

    #[error("Calibration data must contain exactly 3 axes, found {0}")]
    AxisCount(usize),

    #[error("Degenerate calibration for axis {axis}: zero point equals one point ({value})")]
    DegenerateAxis { axis: char, value: f64 },
}

/// Errors surfaced to callers of the driver
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("No matching device found")]
    DeviceNotFound,

    #[error("Timed out waiting for device reply")]
    Timeout,

    #[error("Memory access failed: {0}")]
    MemoryAccess(#[from] MemoryAccessError),

    #[error("Bad leading marker 0x{marker:02X} on received frame")]
    ProtocolFraming { marker: u8 },

    #[error("Invalid use: {0}")]
    Misuse(String),

    #[error("Connection is not running")]
    Disconnected,

    #[error("Request superseded by a newer request of the same kind")]
    Superseded,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Calibration(#[from] CalibrationError),

    #[error("Internal error: {0}")]
    Internal(String),
}
