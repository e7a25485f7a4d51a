//! TCP transport for the mux controller board
//!
//! The mux board exposes a line-oriented telnet prompt. Commands are written
//! with a CRLF terminator and the board answers with its `>` prompt.

use super::Transport;
use crate::error::TransportError;
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

/// Telnet-style transport over a plain TCP stream
pub struct TelnetTransport {
    address: String,
    timeout: Duration,
    line_terminator: String,
    stream: Option<TcpStream>,
}

impl TelnetTransport {
    /// Create an unconnected transport for `address` ("host:port")
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            timeout: Duration::from_secs(1),
            line_terminator: "\r\n".to_string(),
            stream: None,
        }
    }

    /// Set connect/read timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set line terminator appended to each command
    pub fn with_line_terminator(mut self, terminator: impl Into<String>) -> Self {
        self.line_terminator = terminator.into();
        self
    }

    /// Open the TCP connection
    pub async fn connect(&mut self) -> Result<(), TransportError> {
        let stream = timeout(self.timeout, TcpStream::connect(&self.address))
            .await
            .map_err(|_| TransportError::ReadTimeout {
                port: self.address.clone(),
                timeout: self.timeout,
            })?
            .map_err(|source| TransportError::Write {
                port: self.address.clone(),
                source,
            })?;
        stream.set_nodelay(true).map_err(|source| TransportError::Write {
            port: self.address.clone(),
            source,
        })?;

        self.stream = Some(stream);
        debug!("Connected to mux controller: {}", self.address);
        Ok(())
    }

    /// Check if connected
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn stream(&mut self) -> Result<&mut TcpStream, TransportError> {
        let address = &self.address;
        self.stream
            .as_mut()
            .ok_or_else(|| TransportError::NotConnected(address.clone()))
    }
}

#[async_trait]
impl Transport for TelnetTransport {
    fn name(&self) -> &str {
        &self.address
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let mut line = data.to_vec();
        if !line.ends_with(self.line_terminator.as_bytes()) {
            line.extend_from_slice(self.line_terminator.as_bytes());
        }
        let address = self.address.clone();
        let stream = self.stream()?;
        stream
            .write_all(&line)
            .await
            .map_err(|source| TransportError::Write {
                port: address,
                source,
            })
    }

    async fn read(&mut self, max: usize) -> Result<Vec<u8>, TransportError> {
        let address = self.address.clone();
        let read_timeout = self.timeout;
        let stream = self.stream()?;

        let mut buf = vec![0u8; max];
        let n = timeout(read_timeout, stream.read(&mut buf))
            .await
            .map_err(|_| TransportError::ReadTimeout {
                port: address.clone(),
                timeout: read_timeout,
            })?
            .map_err(|source| TransportError::Read {
                port: address.clone(),
                source,
            })?;
        if n == 0 {
            return Err(TransportError::Read {
                port: address,
                source: std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "mux controller closed the connection",
                ),
            });
        }
        buf.truncate(n);
        Ok(buf)
    }

    async fn set_baud_rate(&mut self, _baud_rate: u32) -> Result<(), TransportError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_round_trip_against_local_prompt() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let n = socket.read(&mut buf).await.unwrap();
            socket.write_all(b"\r\n>").await.unwrap();
            String::from_utf8_lossy(&buf[..n]).into_owned()
        });

        let mut transport = TelnetTransport::new(address);
        transport.connect().await.unwrap();
        let reply = transport
            .send_and_expect("m_dout[5]=1", ">", 16)
            .await
            .unwrap();

        assert!(reply.contains('>'));
        assert_eq!(server.await.unwrap(), "m_dout[5]=1\r\n");
    }

    #[tokio::test]
    async fn test_write_before_connect_fails() {
        let mut transport = TelnetTransport::new("127.0.0.1:1");
        let err = transport.write(b"m_dout[0]=0").await.unwrap_err();
        assert!(matches!(err, TransportError::NotConnected(_)));
    }
}
