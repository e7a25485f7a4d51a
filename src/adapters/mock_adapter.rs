//! Mock transport for testing
//!
//! Simulates either channel without hardware. It provides:
//! - A scripted reply queue and an optional responder closure that reacts to
//!   each written command
//! - Controllable write-failure injection
//! - Call logging for test verification
//!
//! Clones share state, so a test can keep a handle after moving the
//! transport into a [`crate::hardware::Bus`].

use super::Transport;
use crate::error::TransportError;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Produces the reply (if any) for a written command.
pub type Responder = Box<dyn FnMut(&str) -> Option<String> + Send>;

/// Mock transport for testing
///
/// # Example
///
/// ```
/// use polony_fluidics::adapters::MockTransport;
///
/// let transport = MockTransport::new("mux")
///     .with_responder(|cmd| cmd.starts_with("m_dout").then(|| ">".to_string()));
/// assert!(transport.writes().is_empty());
/// ```
#[derive(Clone)]
pub struct MockTransport {
    name: String,
    state: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    pending: VecDeque<u8>,
    writes: Vec<String>,
    call_log: Vec<String>,
    baud_rate: Option<u32>,
    responder: Option<Responder>,
    fail_next_write: bool,
}

impl MockTransport {
    /// Create a silent mock transport
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// React to every write with the closure's reply
    pub fn with_responder<F>(self, responder: F) -> Self
    where
        F: FnMut(&str) -> Option<String> + Send + 'static,
    {
        self.lock().responder = Some(Box::new(responder));
        self
    }

    /// Queue bytes to be returned by subsequent reads
    pub fn push_response(&self, response: &str) {
        self.lock().pending.extend(response.bytes());
    }

    /// Make the next write fail
    pub fn inject_write_failure(&self) {
        self.lock().fail_next_write = true;
    }

    /// Every command written, in order
    pub fn writes(&self) -> Vec<String> {
        self.lock().writes.clone()
    }

    /// Get the call log (writes, reads and baud changes)
    pub fn call_log(&self) -> Vec<String> {
        self.lock().call_log.clone()
    }

    /// Clear the write history and call log
    pub fn clear_log(&self) {
        let mut state = self.lock();
        state.writes.clear();
        state.call_log.clear();
    }

    /// Last baud rate applied
    pub fn baud_rate(&self) -> Option<u32> {
        self.lock().baud_rate
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let command = String::from_utf8_lossy(data).into_owned();
        let mut state = self.lock();
        state.call_log.push(format!("write: {}", command.escape_debug()));

        if std::mem::take(&mut state.fail_next_write) {
            return Err(TransportError::Write {
                port: self.name.clone(),
                source: std::io::Error::new(std::io::ErrorKind::BrokenPipe, "Injected failure"),
            });
        }

        let reply = state.responder.as_mut().and_then(|respond| respond(&command));
        if let Some(reply) = reply {
            state.pending.extend(reply.bytes());
        }
        state.writes.push(command);
        Ok(())
    }

    async fn read(&mut self, max: usize) -> Result<Vec<u8>, TransportError> {
        let mut state = self.lock();
        if state.pending.is_empty() {
            state.call_log.push("read: timeout".to_string());
            return Err(TransportError::ReadTimeout {
                port: self.name.clone(),
                timeout: Duration::ZERO,
            });
        }
        let n = max.min(state.pending.len());
        let bytes: Vec<u8> = state.pending.drain(..n).collect();
        state
            .call_log
            .push(format!("read: {}", String::from_utf8_lossy(&bytes).escape_debug()));
        Ok(bytes)
    }

    async fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.baud_rate = Some(baud_rate);
        state.call_log.push(format!("baud: {}", baud_rate));
        Ok(())
    }
}
