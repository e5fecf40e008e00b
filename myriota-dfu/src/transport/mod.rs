//! Byte transport abstraction.
//!
//! The update logic talks to the module through a push-based transport: bytes
//! are sent with [`Transport::send`], and whatever the module emits arrives
//! as notifications delivered to every subscribed [`ReceiveHandler`]. This is
//! the shape of a BLE UART service (write characteristic + notify
//! characteristic), and a plain serial port is adapted to it by a reader
//! thread.
//!
//! ```text
//! +-----------------------+
//! |  Updater / XMODEM     |
//! +-----------+-----------+
//!             |
//!             v
//! +-----------+-----------+
//! |  BootloaderSession    |   ring buffer + data events
//! +-----------+-----------+
//!             |
//!             v
//! +-----------+-----------+     +------------------+
//! |   Transport trait     | --> | SerialTransport  |  (serialport)
//! +-----------------------+     | MockTransport    |  (tests)
//!                               +------------------+
//! ```
//!
//! Connection management (scanning, pairing, enabling notifications) happens
//! before a transport is handed to this crate.

#[cfg(test)]
pub(crate) mod mock;
#[cfg(feature = "native")]
pub mod serial;

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::Result;

/// Callback invoked with every chunk the remote device sends.
pub type ReceiveHandler = Box<dyn FnMut(&[u8]) + Send + 'static>;

/// Handle returned by [`Transport::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// A connected, notification-enabled byte transport.
pub trait Transport: Send + Sync {
    /// Send bytes to the remote device.
    fn send(&self, data: &[u8]) -> Result<()>;

    /// Register a handler for incoming chunks.
    fn subscribe(&self, handler: ReceiveHandler) -> Result<SubscriptionId>;

    /// Remove a previously registered handler.
    ///
    /// Unknown ids are ignored.
    fn unsubscribe(&self, id: SubscriptionId) -> Result<()>;

    /// Whether the remote device is still connected.
    fn is_connected(&self) -> bool;

    /// Largest number of bytes accepted by one [`Transport::send`] call.
    fn max_payload(&self) -> Option<usize> {
        None
    }

    /// Human-readable name for log messages.
    fn name(&self) -> &str;
}

/// Serial port information.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PortInfo {
    /// Port name/path.
    pub name: String,
    /// USB vendor ID (if available).
    pub vid: Option<u16>,
    /// USB product ID (if available).
    pub pid: Option<u16>,
    /// Manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial_number: Option<String>,
}

/// Registry of receive handlers shared by transport implementations.
#[derive(Default)]
pub struct SubscriberList {
    next_id: AtomicU64,
    handlers: Mutex<Vec<(SubscriptionId, ReceiveHandler)>>,
}

impl SubscriberList {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler and return its id.
    pub fn add(&self, handler: ReceiveHandler) -> SubscriptionId {
        let id = SubscriptionId(
            self.next_id
                .fetch_add(1, Ordering::Relaxed),
        );
        self.lock()
            .push((id, handler));
        id
    }

    /// Remove a handler. Returns whether it was registered.
    pub fn remove(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.lock();
        let before = handlers.len();
        handlers.retain(|(sid, _)| *sid != id);
        handlers.len() != before
    }

    /// Deliver a chunk to every handler.
    pub fn dispatch(&self, chunk: &[u8]) {
        for (_, handler) in self
            .lock()
            .iter_mut()
        {
            handler(chunk);
        }
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.lock()
            .len()
    }

    /// Whether no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(SubscriptionId, ReceiveHandler)>> {
        // A handler that panicked must not take the transport down with it.
        self.handlers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl std::fmt::Debug for SubscriberList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberList")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_dispatch_reaches_every_handler() {
        let list = SubscriberList::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in 0..2u8 {
            let seen = Arc::clone(&seen);
            list.add(Box::new(move |chunk| {
                seen.lock()
                    .unwrap()
                    .push((tag, chunk.to_vec()));
            }));
        }
        list.dispatch(b"hi");

        let seen = seen
            .lock()
            .unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen.contains(&(0, b"hi".to_vec())));
        assert!(seen.contains(&(1, b"hi".to_vec())));
    }

    #[test]
    fn test_remove_stops_delivery() {
        let list = SubscriberList::new();
        let hits = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&hits);
        let id = list.add(Box::new(move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
        }));

        list.dispatch(b"a");
        assert!(list.remove(id));
        assert!(!list.remove(id));
        list.dispatch(b"b");

        assert_eq!(hits.load(Ordering::Relaxed), 1);
        assert!(list.is_empty());
    }
}
