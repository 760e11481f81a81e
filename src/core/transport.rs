//! Transport contract
//!
//! The session core talks to the device only through [`Transport`]. The
//! production implementation lives in [`super::serial`]; tests use the stubs
//! in `core::testing`.

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to open {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: io::Error,
    },

    #[error("Port is not open")]
    NotOpen,

    #[error("Device disconnected")]
    Disconnected,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Parity setting used when claiming the port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    None,
    Odd,
    #[allow(dead_code)]
    Even,
}

/// A full-duplex, line-oriented connection to the device.
///
/// All methods take `&self`: one reader thread and one writer thread share
/// the transport, so an implementation must let a read and a write proceed
/// at the same time.
pub trait Transport: Send + Sync + 'static {
    /// Claim and configure the port with the given parity.
    fn open(&self, parity: Parity) -> Result<()>;

    /// Release the port. Calling this on a closed transport does nothing.
    fn close(&self);

    fn is_open(&self) -> bool;

    /// Read one line, bounded by the configured read timeout.
    ///
    /// An empty result means the timeout elapsed with nothing received. A
    /// partial line is returned as-is when the timeout hits mid-line.
    fn read_line(&self) -> Result<Vec<u8>>;

    /// Write the whole payload, returning the number of bytes written.
    fn write(&self, data: &[u8]) -> Result<usize>;

    /// Port identifier for messages
    fn port(&self) -> &str;
}

/// Classify an I/O error raised while waiting for a line.
///
/// Timeouts are expected on an idle line and are not faults.
pub fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_classification() {
        assert!(is_timeout(&io::Error::new(io::ErrorKind::TimedOut, "t")));
        assert!(is_timeout(&io::Error::new(io::ErrorKind::WouldBlock, "w")));
        assert!(!is_timeout(&io::Error::new(io::ErrorKind::BrokenPipe, "b")));
        assert!(!is_timeout(&io::Error::new(io::ErrorKind::NotFound, "n")));
    }

    #[test]
    fn test_error_messages_name_the_port() {
        let err = TransportError::Open {
            port: "/dev/ttyACM0".to_string(),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "busy"),
        };
        assert_eq!(err.to_string(), "Failed to open /dev/ttyACM0: busy");
    }
}
