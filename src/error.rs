//! Error types for the dps150 library.

use thiserror::Error;

/// The main error type for dps150 operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Serial port error.
    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame encoding/decoding error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// The port opened but the device never answered the initial probe.
    #[error("connection failed: {message}")]
    Connection { message: String },

    /// An argument is outside the device's accepted range.
    ///
    /// Rejected before any bytes are written to the wire.
    #[error("{field} = {value} out of range ({min}..={max})")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    /// Command timed out waiting for response.
    #[error("command timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Session is not open (never connected, closed, or lost).
    #[error("not connected")]
    NotConnected,

    /// Protocol error: the device answered with something unusable.
    #[error("protocol error: {message}")]
    Protocol { message: String },
}

/// Frame-specific errors.
///
/// Never surfaced per-instance to callers; the telemetry loop counts them
/// and raises a link-degraded event past a burst threshold.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Frame checksum did not match the payload.
    #[error("checksum mismatch on field {field}: expected {expected:#04x}, got {actual:#04x}")]
    BadChecksum { field: u8, expected: u8, actual: u8 },

    /// Bytes discarded while scanning for the next frame marker.
    #[error("discarded {discarded} bytes resynchronizing")]
    Desync { discarded: usize },
}

/// Result type alias for dps150 operations.
pub type Result<T> = std::result::Result<T, Error>;
