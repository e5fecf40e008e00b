//! Byte channel seen by the transfer engine.

use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::time::Duration;

use crate::error::{Error, Result};

/// Queue of "data arrived" events, each carrying the received chunk.
///
/// Obtained from [`ByteChannel::events`]. Dropping it unregisters the
/// listener; closing the session closes the queue.
#[derive(Debug)]
pub struct DataEvents {
    rx: Receiver<Vec<u8>>,
}

impl DataEvents {
    pub(crate) fn new(rx: Receiver<Vec<u8>>) -> Self {
        Self { rx }
    }

    /// Wait up to `timeout` for the next chunk.
    ///
    /// Returns `Ok(None)` on timeout and [`Error::SessionClosed`] once the
    /// producing session is closed.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        match self
            .rx
            .recv_timeout(timeout)
        {
            Ok(chunk) => Ok(Some(chunk)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(Error::SessionClosed),
        }
    }

    /// Take the next chunk if one is already queued.
    pub fn try_recv(&self) -> Result<Option<Vec<u8>>> {
        match self
            .rx
            .try_recv()
        {
            Ok(chunk) => Ok(Some(chunk)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(Error::SessionClosed),
        }
    }
}

/// Write side plus receive events: everything the XMODEM sender needs.
pub trait ByteChannel {
    /// Send bytes to the device.
    fn write(&self, data: &[u8]) -> Result<()>;

    /// Subscribe to incoming chunks.
    fn events(&self) -> Result<DataEvents>;

    /// Whether the other end can still be reached.
    fn is_connected(&self) -> bool {
        true
    }
}
