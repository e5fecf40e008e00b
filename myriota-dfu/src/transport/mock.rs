//! In-memory transport for testing session and transfer logic.
//!
//! Every send is recorded. A scripted responder can answer each send with
//! zero or more notification chunks, which are delivered synchronously to the
//! subscribers before `send` returns, the same way a fast device would answer
//! before the next write.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Error, Result};
use crate::transport::{ReceiveHandler, SubscriberList, SubscriptionId, Transport};

/// Scripted device behaviour: maps one sent buffer to notification chunks.
pub type Responder = Box<dyn FnMut(&[u8]) -> Vec<Vec<u8>> + Send + 'static>;

/// Mock transport for unit tests.
pub struct MockTransport {
    writes: Mutex<Vec<Vec<u8>>>,
    subscribers: SubscriberList,
    responder: Mutex<Option<Responder>>,
    connected: AtomicBool,
    fail_writes: AtomicBool,
    fail_subscribe: AtomicBool,
    max_payload: Option<usize>,
}

impl MockTransport {
    /// Create a connected mock that never answers.
    pub fn new() -> Self {
        Self {
            writes: Mutex::new(Vec::new()),
            subscribers: SubscriberList::new(),
            responder: Mutex::new(None),
            connected: AtomicBool::new(true),
            fail_writes: AtomicBool::new(false),
            fail_subscribe: AtomicBool::new(false),
            max_payload: None,
        }
    }

    /// Limit the size of a single send, like a BLE write length.
    #[must_use]
    pub fn with_max_payload(mut self, max_payload: usize) -> Self {
        self.max_payload = Some(max_payload);
        self
    }

    /// Install a responder invoked after every successful send.
    pub fn set_responder<F>(&self, responder: F)
    where
        F: FnMut(&[u8]) -> Vec<Vec<u8>> + Send + 'static,
    {
        *self
            .responder
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(Box::new(responder));
    }

    /// Deliver a notification chunk to all subscribers.
    pub fn inject(&self, chunk: &[u8]) {
        self.subscribers
            .dispatch(chunk);
    }

    /// All buffers sent so far, one entry per `send` call.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.writes
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .len()
    }

    /// Simulate the device going away.
    pub fn disconnect(&self) {
        self.connected
            .store(false, Ordering::SeqCst);
    }

    /// Simulate the device coming back.
    pub fn reconnect(&self) {
        self.connected
            .store(true, Ordering::SeqCst);
    }

    /// Make every following send fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes
            .store(fail, Ordering::SeqCst);
    }

    /// Make every following subscribe fail.
    pub fn set_fail_subscribe(&self, fail: bool) {
        self.fail_subscribe
            .store(fail, Ordering::SeqCst);
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MockTransport {
    fn send(&self, data: &[u8]) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::Transport("mock: not connected".into()));
        }
        if self
            .fail_writes
            .load(Ordering::SeqCst)
        {
            return Err(Error::Transport("mock: write rejected".into()));
        }
        if let Some(max) = self.max_payload {
            if data.len() > max {
                return Err(Error::Transport(format!(
                    "mock: {} bytes exceeds max payload {max}",
                    data.len()
                )));
            }
        }

        self.writes
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(data.to_vec());

        let replies = self
            .responder
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .as_mut()
            .map(|respond| respond(data))
            .unwrap_or_default();

        for chunk in replies {
            self.subscribers
                .dispatch(&chunk);
        }

        Ok(())
    }

    fn subscribe(&self, handler: ReceiveHandler) -> Result<SubscriptionId> {
        if self
            .fail_subscribe
            .load(Ordering::SeqCst)
        {
            return Err(Error::Transport("mock: notifications unavailable".into()));
        }
        Ok(self
            .subscribers
            .add(handler))
    }

    fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        self.subscribers
            .remove(id);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
            .load(Ordering::SeqCst)
    }

    fn max_payload(&self) -> Option<usize> {
        self.max_payload
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_mock_write_capture() {
        let mock = MockTransport::new();
        mock.send(b"Hello").unwrap();
        mock.send(b"World").unwrap();

        let writes = mock.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0], b"Hello");
        assert_eq!(writes[1], b"World");
    }

    #[test]
    fn test_mock_responder_notifies_subscribers() {
        let mock = MockTransport::new();
        mock.set_responder(|sent| vec![sent.to_ascii_uppercase()]);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        mock.subscribe(Box::new(move |chunk| {
            sink.lock()
                .unwrap()
                .push(chunk.to_vec());
        }))
        .unwrap();

        mock.send(b"ping").unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![b"PING".to_vec()]);
    }

    #[test]
    fn test_mock_disconnect() {
        let mock = MockTransport::new();
        assert!(mock.is_connected());

        mock.disconnect();
        assert!(!mock.is_connected());
        assert!(mock.send(b"test").is_err());

        mock.reconnect();
        assert!(mock.send(b"test").is_ok());
    }

    #[test]
    fn test_mock_max_payload_enforced() {
        let mock = MockTransport::new().with_max_payload(4);
        assert!(mock.send(b"1234").is_ok());
        assert!(mock.send(b"12345").is_err());
    }
}
