//! Byte-stream transports
//!
//! Two physical channels reach the hardware: the shared device serial line
//! and the mux controller's telnet link. Both are driven through the
//! [`Transport`] trait so the bus and the device drivers never see which one
//! they are talking to, and tests can substitute [`MockTransport`].

use crate::error::TransportError;
use async_trait::async_trait;
use tracing::trace;

pub mod mock_adapter;
pub mod serial_adapter;
pub mod telnet_adapter;

pub use mock_adapter::{MockTransport, Responder};
pub use serial_adapter::SerialTransport;
pub use telnet_adapter::TelnetTransport;

/// Generic async byte channel for hardware communication
#[async_trait]
pub trait Transport: Send {
    /// Human-readable endpoint name used in error messages
    fn name(&self) -> &str;

    /// Write all bytes
    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Read between 1 and `max` bytes.
    ///
    /// Fails with [`TransportError::ReadTimeout`] if nothing arrives within
    /// the transport's read timeout.
    async fn read(&mut self, max: usize) -> Result<Vec<u8>, TransportError>;

    /// Change line speed. Channels without a baud rate accept and ignore it.
    async fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), TransportError>;

    /// Write `command`, read up to `response_size` bytes and require that the
    /// reply contains `expect`.
    ///
    /// Reading stops early once `expect` has been seen. A timeout after some
    /// bytes have arrived ends the read and the partial reply is checked; a
    /// timeout with nothing received is reported as such.
    async fn send_and_expect(
        &mut self,
        command: &str,
        expect: &str,
        response_size: usize,
    ) -> Result<String, TransportError> {
        self.write(command.as_bytes()).await?;

        let mut response: Vec<u8> = Vec::with_capacity(response_size);
        while response.len() < response_size {
            match self.read(response_size - response.len()).await {
                Ok(chunk) if chunk.is_empty() => break,
                Ok(chunk) => {
                    response.extend_from_slice(&chunk);
                    if contains(&response, expect.as_bytes()) {
                        break;
                    }
                }
                Err(TransportError::ReadTimeout { .. }) if !response.is_empty() => break,
                Err(e) => return Err(e),
            }
        }

        let text = String::from_utf8_lossy(&response).into_owned();
        trace!(endpoint = self.name(), ?command, ?text, "exchange");
        if !text.contains(expect) {
            return Err(TransportError::ExpectNotFound {
                command: command.to_string(),
                expected: expect.to_string(),
                response: text,
            });
        }
        Ok(text)
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    needle.is_empty() || haystack.windows(needle.len()).any(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_and_expect_stops_at_expected_text() {
        let mut transport = MockTransport::new("line");
        transport.push_response("0A");
        transport.push_response("trailing");

        let reply = transport.send_and_expect("S\r", "0A", 2).await.unwrap();
        assert_eq!(reply, "0A");
        assert_eq!(transport.writes(), vec!["S\r".to_string()]);
    }

    #[tokio::test]
    async fn test_send_and_expect_missing_substring() {
        let mut transport = MockTransport::new("line");
        transport.push_response("03");

        let err = transport.send_and_expect("S\r", "0A", 2).await.unwrap_err();
        assert!(matches!(err, TransportError::ExpectNotFound { .. }));
    }

    #[tokio::test]
    async fn test_send_and_expect_silence_is_timeout() {
        let mut transport = MockTransport::new("line");

        let err = transport.send_and_expect("$W\r", "\r", 10).await.unwrap_err();
        assert!(matches!(err, TransportError::ReadTimeout { .. }));
    }

    #[tokio::test]
    async fn test_send_and_expect_partial_reply_checked() {
        let mut transport = MockTransport::new("line");
        transport.push_response("/0`");

        let reply = transport.send_and_expect("/1QR\r", "`", 4).await.unwrap();
        assert_eq!(reply, "/0`");
    }

    #[test]
    fn test_contains() {
        assert!(contains(b"abc>", b">"));
        assert!(!contains(b"abc", b">"));
        assert!(contains(b"", b""));
    }
}
