//! Error types for the wireless proximity link.
//!
//! These cover the failure scenarios of the transport underneath the link:
//! scanning, connecting, writing the unlock characteristic, and the internal
//! event channel closing.

/// Result type alias for link and transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Errors that can occur while talking to the proximity peripheral.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Device is not connected or has been disconnected.
    #[error("Device disconnected: {device}")]
    Disconnected { device: String },

    /// An operation needed a connected device but none was connected.
    #[error("No device connected")]
    NotConnected,

    /// Operation timed out after specified duration.
    #[error("Operation timeout after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Advertisement scanning failed.
    #[error("Scan failed: {message}")]
    ScanFailed { message: String },

    /// Connection attempt was rejected or failed.
    #[error("Connection to {device} failed: {message}")]
    ConnectFailed { device: String, message: String },

    /// Characteristic write failed.
    #[error("Write failed: {message}")]
    WriteFailed { message: String },

    /// The event channel to the consumer closed.
    #[error("Event channel closed")]
    ChannelClosed,

    /// Generic error with custom message.
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Create a new disconnected error.
    pub fn disconnected(device: impl Into<String>) -> Self {
        Self::Disconnected {
            device: device.into(),
        }
    }

    /// Create a new timeout error.
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// Create a new scan failure.
    pub fn scan_failed(message: impl Into<String>) -> Self {
        Self::ScanFailed {
            message: message.into(),
        }
    }

    /// Create a new connection failure.
    pub fn connect_failed(device: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConnectFailed {
            device: device.into(),
            message: message.into(),
        }
    }

    /// Create a new write failure.
    pub fn write_failed(message: impl Into<String>) -> Self {
        Self::WriteFailed {
            message: message.into(),
        }
    }

    /// Create a generic error with custom message.
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}
