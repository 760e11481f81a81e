//! Serial port transport
//!
//! Wraps a `serialport` handle as a [`Transport`]. The port is split into a
//! buffered read half (a `try_clone` of the port) and a write half, each behind
//! its own lock, so the reader thread never waits on the writer.

use std::io::{BufRead, BufReader, Write};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serialport::{DataBits, FlowControl, SerialPort, StopBits};
use tracing::debug;

use super::transport::{is_timeout, Parity, Result, Transport, TransportError};

pub const DEFAULT_BAUD: u32 = 115_200;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

#[cfg(windows)]
pub const DEFAULT_PORT: &str = "COM3";
#[cfg(not(windows))]
pub const DEFAULT_PORT: &str = "/dev/ttyACM0";

/// Serial line settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    pub port: String,
    pub baud: u32,
    /// Upper bound on a single line read
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT.to_string(),
            baud: DEFAULT_BAUD,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

pub struct SerialTransport {
    config: SerialConfig,
    reader: Mutex<Option<BufReader<Box<dyn SerialPort>>>>,
    writer: Mutex<Option<Box<dyn SerialPort>>>,
}

impl SerialTransport {
    pub fn new(config: SerialConfig) -> Self {
        Self {
            config,
            reader: Mutex::new(None),
            writer: Mutex::new(None),
        }
    }

    fn open_error(&self, err: serialport::Error) -> TransportError {
        TransportError::Open {
            port: self.config.port.clone(),
            source: err.into(),
        }
    }
}

// A panic in one task must not wedge the other on a poisoned lock.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn to_serialport_parity(parity: Parity) -> serialport::Parity {
    match parity {
        Parity::None => serialport::Parity::None,
        Parity::Odd => serialport::Parity::Odd,
        Parity::Even => serialport::Parity::Even,
    }
}

impl Transport for SerialTransport {
    fn open(&self, parity: Parity) -> Result<()> {
        let port = serialport::new(&self.config.port, self.config.baud)
            .data_bits(DataBits::Eight)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .parity(to_serialport_parity(parity))
            .timeout(self.config.timeout)
            .open()
            .map_err(|e| self.open_error(e))?;
        let read_half = port.try_clone().map_err(|e| self.open_error(e))?;

        debug!("Opened {} at {} baud, parity {:?}", self.config.port, self.config.baud, parity);
        *lock(&self.reader) = Some(BufReader::new(read_half));
        *lock(&self.writer) = Some(port);
        Ok(())
    }

    fn close(&self) {
        let had_reader = lock(&self.reader).take().is_some();
        let had_writer = lock(&self.writer).take().is_some();
        if had_reader || had_writer {
            debug!("Closed {}", self.config.port);
        }
    }

    fn is_open(&self) -> bool {
        lock(&self.writer).is_some()
    }

    fn read_line(&self) -> Result<Vec<u8>> {
        let mut guard = lock(&self.reader);
        let reader = guard.as_mut().ok_or(TransportError::NotOpen)?;

        let mut line = Vec::new();
        match reader.read_until(b'\n', &mut line) {
            // Zero bytes without a timeout means the device went away
            Ok(0) => Err(TransportError::Disconnected),
            Ok(_) => Ok(line),
            // read_until keeps whatever arrived before the timeout
            Err(e) if is_timeout(&e) => Ok(line),
            Err(e) => Err(TransportError::Io(e)),
        }
    }

    fn write(&self, data: &[u8]) -> Result<usize> {
        let mut guard = lock(&self.writer);
        let port = guard.as_mut().ok_or(TransportError::NotOpen)?;
        port.write_all(data)?;
        port.flush()?;
        Ok(data.len())
    }

    fn port(&self) -> &str {
        &self.config.port
    }
}
