//! Bootloader session over a notification transport.
//!
//! A session owns the single receive subscription on a transport while it is
//! open. Every chunk the device sends is appended to a [`RingBuffer`] and
//! forwarded as a "data arrived" event to live [`DataEvents`] listeners, so
//! callers can either read text out of the buffer (delimiter waits) or react
//! to chunks (the XMODEM sender).
//!
//! ```text
//!  Closed --open()--> Open --close()--> Closed
//! ```
//!
//! Only one session may be open per transport connection; nothing enforces
//! it, so callers must not open two at once.

use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use log::{debug, trace, warn};

use crate::channel::{ByteChannel, DataEvents};
use crate::error::{Error, Result};
use crate::protocol::command;
use crate::ring_buffer::{DEFAULT_CAPACITY, RingBuffer};
use crate::transport::{SubscriptionId, Transport};

/// Session tuning.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SessionConfig {
    /// Receive ring buffer size in bytes.
    pub buffer_capacity: usize,
    /// Longest sleep between buffer polls while waiting for a delimiter.
    pub poll_interval: Duration,
    /// How long a bootloader probe waits for an answer.
    pub probe_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_CAPACITY,
            poll_interval: Duration::from_millis(20),
            probe_timeout: Duration::from_millis(1000),
        }
    }
}

#[derive(Debug)]
struct Shared {
    buffer: RingBuffer,
    listeners: Vec<Sender<Vec<u8>>>,
}

/// Open binding between protocol logic and a connected transport.
pub struct BootloaderSession<T: Transport> {
    transport: Arc<T>,
    shared: Arc<Mutex<Shared>>,
    subscription: Option<SubscriptionId>,
    config: SessionConfig,
}

impl<T: Transport> BootloaderSession<T> {
    /// Create a closed session on `transport`.
    pub fn new(transport: Arc<T>) -> Self {
        Self::with_config(transport, SessionConfig::default())
    }

    /// Create a closed session with custom tuning.
    pub fn with_config(transport: Arc<T>, config: SessionConfig) -> Self {
        let shared = Shared {
            buffer: RingBuffer::new(config.buffer_capacity),
            listeners: Vec::new(),
        };
        Self {
            transport,
            shared: Arc::new(Mutex::new(shared)),
            subscription: None,
            config,
        }
    }

    /// Whether the session holds a receive subscription.
    pub fn is_open(&self) -> bool {
        self.subscription
            .is_some()
    }

    /// Subscribe to the transport's receive notifications.
    ///
    /// Opening an open session does nothing.
    pub fn open(&mut self) -> Result<()> {
        if self.is_open() {
            return Ok(());
        }
        if !self
            .transport
            .is_connected()
        {
            return Err(Error::NotConnected);
        }

        let shared = Arc::clone(&self.shared);
        let id = self
            .transport
            .subscribe(Box::new(move |chunk: &[u8]| {
                trace!("rx {} bytes: {:02X?}", chunk.len(), chunk);
                let mut shared = lock(&shared);
                shared
                    .buffer
                    .write(chunk);
                shared
                    .listeners
                    .retain(|tx| {
                        tx.send(chunk.to_vec())
                            .is_ok()
                    });
            }))?;

        debug!(
            "Session opened on {}",
            self.transport
                .name()
        );
        self.subscription = Some(id);
        Ok(())
    }

    /// Drop the receive subscription.
    ///
    /// Idempotent. Buffered bytes are kept; pending [`DataEvents`] see the
    /// channel close.
    pub fn close(&mut self) -> Result<()> {
        let Some(id) = self
            .subscription
            .take()
        else {
            return Ok(());
        };

        lock(&self.shared)
            .listeners
            .clear();
        debug!(
            "Session closed on {}",
            self.transport
                .name()
        );
        self.transport
            .unsubscribe(id)
    }

    /// Send bytes, split to the transport's maximum payload if it has one.
    pub fn write(&self, data: &[u8]) -> Result<()> {
        match self
            .transport
            .max_payload()
        {
            Some(max) if max > 0 && data.len() > max => {
                for chunk in data.chunks(max) {
                    self.transport
                        .send(chunk)?;
                }
                Ok(())
            },
            _ => self
                .transport
                .send(data),
        }
    }

    /// Drain up to `n` buffered bytes without waiting.
    pub fn read(&self, n: usize) -> Vec<u8> {
        lock(&self.shared)
            .buffer
            .read(n)
    }

    /// Number of buffered bytes.
    pub fn available(&self) -> usize {
        lock(&self.shared)
            .buffer
            .available()
    }

    /// Register a listener for incoming chunks.
    pub fn events(&self) -> Result<DataEvents> {
        if !self.is_open() {
            return Err(Error::SessionClosed);
        }
        let (tx, rx) = mpsc::channel();
        lock(&self.shared)
            .listeners
            .push(tx);
        Ok(DataEvents::new(rx))
    }

    /// Wait until `delimiter` shows up in the received text.
    ///
    /// Returns `false` once `timeout` elapses without a match.
    pub fn read_until_delimiter(&self, delimiter: &[u8], timeout: Duration) -> Result<bool> {
        Ok(self
            .read_until_any(&[delimiter], timeout)?
            .is_some())
    }

    /// Wait until any of `delimiters` shows up; returns the index of the
    /// first one found.
    ///
    /// Everything drained from the buffer while waiting is consumed.
    pub fn read_until_any(&self, delimiters: &[&[u8]], timeout: Duration) -> Result<Option<usize>> {
        // Too far in the future to represent: wait without a deadline.
        let deadline = Instant::now().checked_add(timeout);
        let events = self.events()?;
        let keep = delimiters
            .iter()
            .map(|d| d.len())
            .max()
            .unwrap_or(0)
            .saturating_sub(1);
        let mut seen = Vec::new();

        loop {
            seen.extend(self.read(usize::MAX));
            if let Some(index) = delimiters
                .iter()
                .position(|d| contains(&seen, d))
            {
                debug!(
                    "Found delimiter {:?}",
                    String::from_utf8_lossy(delimiters[index])
                );
                return Ok(Some(index));
            }
            // Only a tail shorter than the longest delimiter can still start a match.
            if seen.len() > keep {
                seen.drain(..seen.len() - keep);
            }

            let wait = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(None);
                    }
                    (deadline - now).min(self.config.poll_interval)
                },
                None => self.config.poll_interval,
            };
            events.recv_timeout(wait)?;
            if !self
                .transport
                .is_connected()
            {
                return Err(Error::NotConnected);
            }
        }
    }

    /// Probe whether the module is sitting in its bootloader.
    ///
    /// Sends the enter-bootloader command three times (one may be dropped),
    /// then waits for either the bootloader banner or its unknown-command
    /// reply.
    pub fn is_bootloader_mode(&self) -> Result<bool> {
        for _ in 0..command::ENTER_BOOTLOADER_REPEATS {
            self.write(command::ENTER_BOOTLOADER)
                .map_err(|e| {
                    warn!("Enter-bootloader write failed: {e}");
                    Error::BootloaderEntry
                })?;
        }

        let found = self.read_until_any(
            &[command::BOOTLOADER_BANNER, command::UNKNOWN_COMMAND],
            self.config.probe_timeout,
        )?;
        Ok(found.is_some())
    }
}

impl<T: Transport> ByteChannel for BootloaderSession<T> {
    fn write(&self, data: &[u8]) -> Result<()> {
        BootloaderSession::write(self, data)
    }

    fn events(&self) -> Result<DataEvents> {
        BootloaderSession::events(self)
    }

    fn is_connected(&self) -> bool {
        self.transport
            .is_connected()
    }
}

impl<T: Transport> Drop for BootloaderSession<T> {
    fn drop(&mut self) {
        if let Some(id) = self
            .subscription
            .take()
        {
            let _ = self
                .transport
                .unsubscribe(id);
        }
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    needle.is_empty()
        || haystack
            .windows(needle.len())
            .any(|w| w == needle)
}
