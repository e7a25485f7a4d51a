//! Serial transport for the shared device line
//!
//! Wraps the serialport crate and provides async I/O using Tokio's blocking
//! task executor for the synchronous port calls. All downstream devices share
//! this one line; the baud rate is switched per device class before each
//! exchange.

use super::Transport;
use crate::error::TransportError;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

#[cfg(feature = "instrument_serial")]
use serialport::SerialPort;
#[cfg(feature = "instrument_serial")]
use std::io::{Read, Write};
#[cfg(feature = "instrument_serial")]
use std::sync::Arc;
#[cfg(feature = "instrument_serial")]
use tokio::sync::Mutex;

const DEFAULT_SERIAL_TIMEOUT_MS: u64 = 1000;

/// Serial transport for RS-232 communication
pub struct SerialTransport {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3")
    port_name: String,

    /// Baud rate applied at open time
    baud_rate: u32,

    /// Read timeout
    timeout: Duration,

    /// The open port (behind Arc<Mutex> for spawn_blocking access)
    #[cfg(feature = "instrument_serial")]
    port: Option<Arc<Mutex<Box<dyn SerialPort>>>>,
}

impl SerialTransport {
    /// Create an unopened serial transport
    ///
    /// # Arguments
    /// * `port_name` - Serial port path (e.g., "/dev/ttyUSB0", "COM3")
    /// * `baud_rate` - Initial line speed
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            timeout: Duration::from_millis(DEFAULT_SERIAL_TIMEOUT_MS),
            #[cfg(feature = "instrument_serial")]
            port: None,
        }
    }

    /// Set read timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Open the serial port
    #[cfg(feature = "instrument_serial")]
    pub async fn connect(&mut self) -> Result<(), TransportError> {
        let port_name = self.port_name.clone();
        let baud_rate = self.baud_rate;
        let timeout = self.timeout;

        let port = tokio::task::spawn_blocking(move || {
            serialport::new(&port_name, baud_rate)
                .timeout(timeout)
                .open()
        })
        .await
        .map_err(|e| self.join_error(e))?
        .map_err(|e| TransportError::Write {
            port: self.port_name.clone(),
            source: e.into(),
        })?;

        self.port = Some(Arc::new(Mutex::new(port)));
        debug!("Connected to serial port: {}", self.port_name);
        Ok(())
    }

    /// Open the serial port
    #[cfg(not(feature = "instrument_serial"))]
    pub async fn connect(&mut self) -> Result<(), TransportError> {
        Err(TransportError::SerialFeatureDisabled)
    }

    /// Check if the port is open
    pub fn is_connected(&self) -> bool {
        #[cfg(feature = "instrument_serial")]
        {
            self.port.is_some()
        }
        #[cfg(not(feature = "instrument_serial"))]
        {
            false
        }
    }

    #[cfg(feature = "instrument_serial")]
    fn handle(&self) -> Result<Arc<Mutex<Box<dyn SerialPort>>>, TransportError> {
        self.port
            .as_ref()
            .map(Arc::clone)
            .ok_or_else(|| TransportError::NotConnected(self.port_name.clone()))
    }

    #[cfg(feature = "instrument_serial")]
    fn join_error(&self, e: tokio::task::JoinError) -> TransportError {
        TransportError::Read {
            port: self.port_name.clone(),
            source: std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
        }
    }
}

#[cfg(feature = "instrument_serial")]
#[async_trait]
impl Transport for SerialTransport {
    fn name(&self) -> &str {
        &self.port_name
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let port = self.handle()?;
        let data = data.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut port = port.blocking_lock();
            port.write_all(&data)?;
            port.flush()
        })
        .await
        .map_err(|e| self.join_error(e))?
        .map_err(|source| TransportError::Write {
            port: self.port_name.clone(),
            source,
        })
    }

    async fn read(&mut self, max: usize) -> Result<Vec<u8>, TransportError> {
        let port = self.handle()?;

        let result = tokio::task::spawn_blocking(move || {
            let mut port = port.blocking_lock();
            let mut buf = vec![0u8; max];
            let n = port.read(&mut buf)?;
            buf.truncate(n);
            Ok::<_, std::io::Error>(buf)
        })
        .await
        .map_err(|e| self.join_error(e))?;

        match result {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Err(TransportError::ReadTimeout {
                port: self.port_name.clone(),
                timeout: self.timeout,
            }),
            Err(source) => Err(TransportError::Read {
                port: self.port_name.clone(),
                source,
            }),
        }
    }

    async fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), TransportError> {
        if baud_rate == self.baud_rate {
            return Ok(());
        }
        let port = self.handle()?;

        tokio::task::spawn_blocking(move || port.blocking_lock().set_baud_rate(baud_rate))
            .await
            .map_err(|e| self.join_error(e))?
            .map_err(|e| TransportError::BaudRate {
                port: self.port_name.clone(),
                baud_rate,
                reason: e.to_string(),
            })?;

        debug!("{} switched to {} baud", self.port_name, baud_rate);
        self.baud_rate = baud_rate;
        Ok(())
    }
}

#[cfg(not(feature = "instrument_serial"))]
#[async_trait]
impl Transport for SerialTransport {
    fn name(&self) -> &str {
        &self.port_name
    }

    async fn write(&mut self, _data: &[u8]) -> Result<(), TransportError> {
        Err(TransportError::SerialFeatureDisabled)
    }

    async fn read(&mut self, _max: usize) -> Result<Vec<u8>, TransportError> {
        Err(TransportError::SerialFeatureDisabled)
    }

    async fn set_baud_rate(&mut self, _baud_rate: u32) -> Result<(), TransportError> {
        Err(TransportError::SerialFeatureDisabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_transport_creation() {
        let transport = SerialTransport::new("/dev/ttyUSB0", 9600);
        assert_eq!(transport.port_name, "/dev/ttyUSB0");
        assert_eq!(transport.baud_rate, 9600);
        assert!(!transport.is_connected());
    }

    #[test]
    fn test_builder_pattern() {
        let transport =
            SerialTransport::new("/dev/ttyUSB0", 9600).with_timeout(Duration::from_millis(250));
        assert_eq!(transport.timeout, Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_io_before_connect_fails() {
        let mut transport = SerialTransport::new("/dev/ttyUSB0", 9600);
        assert!(transport.write(b"S\r").await.is_err());
    }
}
