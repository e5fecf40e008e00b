//! XMODEM sender (128-byte blocks, checksum or CRC16).
//!
//! The receiver drives the transfer: it asks for CRC mode with `C` or for
//! checksum mode with `NAK`, then answers every block with `ACK` or `NAK`.
//! The sender is a state machine fed with received chunks; only the first
//! byte of a chunk is interpreted.
//!
//! ## Block format
//!
//! ```text
//! +-----+-----+-------+--------------+---------------------+
//! | SOH | SEQ | ~SEQ  |  DATA (128)  | CRC16 (BE) or SUM8  |
//! +-----+-----+-------+--------------+---------------------+
//! | 1   | 1   | 1     |     128      |        2 / 1        |
//! +-----+-----+-------+--------------+---------------------+
//! ```
//!
//! `SEQ` starts at 1 and wraps at 256. The last block is padded with `0x1A`;
//! the padding is not stripped, so the receiver must know the real length.
//!
//! ## Retries
//!
//! A NAKed block is resent unchanged. By default there is no per-block retry
//! limit: the only bound is the wall-clock timeout given to
//! [`XmodemSender::run`]. Setting [`XmodemConfig::max_block_retries`] turns
//! an exhausted block into a CAN abort.

use std::time::{Duration, Instant};

use byteorder::{BigEndian, WriteBytesExt};
use log::{debug, info, trace, warn};

use crate::channel::{ByteChannel, DataEvents};
use crate::error::{Error, Result};
use crate::protocol::crc::{checksum8, crc16_xmodem};

/// XMODEM control characters.
pub mod control {
    /// Start of Header (128-byte block).
    pub const SOH: u8 = 0x01;
    /// End of Transmission.
    pub const EOT: u8 = 0x04;
    /// Acknowledge.
    pub const ACK: u8 = 0x06;
    /// Not Acknowledge.
    pub const NAK: u8 = 0x15;
    /// Cancel.
    pub const CAN: u8 = 0x18;
    /// CRC mode request character.
    pub const C: u8 = b'C';
    /// Padding for the final block.
    pub const FILLER: u8 = 0x1A;
}

/// Payload bytes per block.
pub const BLOCK_SIZE: usize = 128;

/// Number of the first data block.
pub const START_BLOCK: usize = 1;

/// Longest wait for a chunk before the connection is checked again.
const LINK_CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// Block checksum flavour, chosen by the receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    /// One trailing byte: sum of the data bytes mod 256.
    Checksum,
    /// Two trailing bytes: CRC16-XMODEM, big-endian.
    Crc,
}

impl TransferMode {
    /// Length of the block trailer.
    pub fn trailer_len(self) -> usize {
        match self {
            Self::Checksum => 1,
            Self::Crc => 2,
        }
    }
}

/// Progress notifications from a running transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    /// Payload split; `blocks` data blocks will be sent.
    Ready {
        /// Number of data blocks.
        blocks: usize,
    },
    /// The receiver picked a mode and the first block went out.
    Start {
        /// Mode requested by the receiver.
        mode: TransferMode,
    },
    /// A block (1-based, not wrapped) was written, possibly again.
    BlockSent {
        /// Block number.
        block: usize,
    },
    /// The receiver acknowledged.
    AckReceived,
    /// The receiver rejected the last block or EOT.
    NakReceived,
    /// EOT was written.
    EotSent,
    /// The receiver acknowledged EOT; the transfer is complete.
    Stopped,
}

/// Step produced by [`XmodemSender::on_data`], executed in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Write these bytes to the channel.
    Write(Vec<u8>),
    /// Report an event to the observer.
    Emit(TransferEvent),
    /// The transfer completed.
    Finish,
    /// The transfer was cancelled after the preceding CAN writes.
    Abort(String),
}

/// XMODEM sender configuration.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct XmodemConfig {
    /// NAKs tolerated per block before cancelling; `None` retries forever.
    pub max_block_retries: Option<u32>,
    /// How many CAN bytes to send when cancelling.
    pub cancel_repeats: u8,
}

impl Default for XmodemConfig {
    fn default() -> Self {
        Self {
            max_block_retries: None,
            cancel_repeats: 3,
        }
    }
}

/// Build a framed block. `data` is padded with [`control::FILLER`].
pub fn build_block(seq: u8, data: &[u8], mode: TransferMode) -> Vec<u8> {
    let mut block = Vec::with_capacity(3 + BLOCK_SIZE + mode.trailer_len());

    // Header
    block.push(control::SOH);
    block.push(seq);
    block.push(0xFF - seq);

    // Data
    let len = data
        .len()
        .min(BLOCK_SIZE);
    block.extend_from_slice(&data[..len]);
    block.resize(3 + BLOCK_SIZE, control::FILLER);

    // Trailer
    let payload = &block[3..3 + BLOCK_SIZE];
    match mode {
        TransferMode::Crc => {
            let crc = crc16_xmodem(payload);
            // Writing into a Vec cannot fail.
            let _ = block.write_u16::<BigEndian>(crc);
        },
        TransferMode::Checksum => {
            let sum = checksum8(payload);
            block.push(sum);
        },
    }

    block
}

/// Sender state for one transfer.
#[derive(Debug)]
pub struct XmodemSender {
    blocks: Vec<Vec<u8>>,
    block_number: usize,
    mode: TransferMode,
    sent_eot: bool,
    retries: u32,
    finished: bool,
    config: XmodemConfig,
}

impl XmodemSender {
    /// Prepare a transfer of `payload`.
    pub fn new(payload: &[u8]) -> Self {
        Self::with_config(payload, XmodemConfig::default())
    }

    /// Prepare a transfer with custom configuration.
    pub fn with_config(payload: &[u8], config: XmodemConfig) -> Self {
        let blocks = payload
            .chunks(BLOCK_SIZE)
            .map(|chunk| {
                let mut block = chunk.to_vec();
                block.resize(BLOCK_SIZE, control::FILLER);
                block
            })
            .collect();

        Self {
            blocks,
            block_number: START_BLOCK,
            mode: TransferMode::Crc,
            sent_eot: false,
            retries: 0,
            finished: false,
            config,
        }
    }

    /// Number of data blocks.
    pub fn block_count(&self) -> usize {
        self.blocks
            .len()
    }

    /// Number of the next block to send.
    pub fn block_number(&self) -> usize {
        self.block_number
    }

    /// Mode chosen by the receiver (CRC until told otherwise).
    pub fn mode(&self) -> TransferMode {
        self.mode
    }

    /// Whether EOT has been written.
    pub fn sent_eot(&self) -> bool {
        self.sent_eot
    }

    /// Whether the receiver acknowledged EOT.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Framed bytes of 1-based `block` in the current mode.
    #[allow(clippy::cast_possible_truncation)]
    pub fn frame(&self, block: usize) -> Option<Vec<u8>> {
        let data = self
            .blocks
            .get(block.checked_sub(1)?)?;
        // Sequence numbers wrap at 256.
        Some(build_block(block as u8, data, self.mode))
    }

    fn started(&self) -> bool {
        self.block_number > START_BLOCK || self.sent_eot
    }

    /// Feed one received chunk; returns the steps to perform.
    pub fn on_data(&mut self, chunk: &[u8]) -> Vec<Action> {
        if self.finished {
            trace!("Ignoring {} bytes after completion", chunk.len());
            return Vec::new();
        }

        match chunk.first() {
            Some(&control::C) if !self.started() => {
                debug!("Received 'C', starting CRC transfer");
                self.begin(TransferMode::Crc)
            },
            Some(&control::NAK) if !self.started() => {
                debug!("Received NAK, starting checksum transfer");
                self.begin(TransferMode::Checksum)
            },
            Some(&control::ACK) if self.started() => self.on_ack(),
            Some(&control::NAK) if self.started() => self.on_nak(),
            Some(&byte) => {
                warn!(
                    "Unexpected byte 0x{byte:02X} ({} bytes) at block {}",
                    chunk.len(),
                    self.block_number
                );
                Vec::new()
            },
            None => Vec::new(),
        }
    }

    fn begin(&mut self, mode: TransferMode) -> Vec<Action> {
        self.mode = mode;
        let mut actions = vec![Action::Emit(TransferEvent::Start { mode })];

        if self
            .blocks
            .is_empty()
        {
            self.push_eot(&mut actions);
        } else {
            self.push_current_block(&mut actions);
            self.block_number += 1;
        }

        actions
    }

    fn on_ack(&mut self) -> Vec<Action> {
        let mut actions = vec![Action::Emit(TransferEvent::AckReceived)];
        self.retries = 0;

        if self.block_number <= self.block_count() {
            self.push_current_block(&mut actions);
            self.block_number += 1;
        } else if !self.sent_eot {
            info!("All {} blocks sent, sending EOT", self.block_count());
            self.push_eot(&mut actions);
        } else {
            info!("Transfer complete");
            self.finished = true;
            actions.push(Action::Emit(TransferEvent::Stopped));
            actions.push(Action::Finish);
        }

        actions
    }

    fn on_nak(&mut self) -> Vec<Action> {
        let mut actions = vec![Action::Emit(TransferEvent::NakReceived)];
        self.retries += 1;

        if let Some(max) = self
            .config
            .max_block_retries
        {
            if self.retries > max {
                return self.cancel(actions);
            }
        }

        if self.sent_eot {
            debug!("EOT NAKed, resending");
            self.push_eot(&mut actions);
        } else {
            self.block_number -= 1;
            debug!(
                "Block {} NAKed, resending (retry {})",
                self.block_number, self.retries
            );
            self.push_current_block(&mut actions);
            self.block_number += 1;
        }

        actions
    }

    fn cancel(&mut self, mut actions: Vec<Action>) -> Vec<Action> {
        let what = if self.sent_eot {
            "EOT".to_string()
        } else {
            format!("block {}", self.block_number - 1)
        };
        warn!("{what} rejected {} times, cancelling", self.retries);

        self.finished = true;
        actions.push(Action::Write(vec![
            control::CAN;
            usize::from(self.config.cancel_repeats)
        ]));
        actions.push(Action::Abort(format!(
            "{what} rejected {} times",
            self.retries
        )));
        actions
    }

    fn push_current_block(&self, actions: &mut Vec<Action>) {
        if let Some(frame) = self.frame(self.block_number) {
            trace!(
                "Sending block {} ({} bytes)",
                self.block_number,
                frame.len()
            );
            actions.push(Action::Write(frame));
            actions.push(Action::Emit(TransferEvent::BlockSent {
                block: self.block_number,
            }));
        }
    }

    fn push_eot(&mut self, actions: &mut Vec<Action>) {
        self.sent_eot = true;
        actions.push(Action::Write(vec![control::EOT]));
        actions.push(Action::Emit(TransferEvent::EotSent));
    }

    /// Run the transfer over `channel` until it completes or `timeout`
    /// elapses.
    ///
    /// Emits [`TransferEvent::Ready`] first. Write errors abort immediately
    /// and are returned unchanged; a channel that stops reporting itself
    /// connected fails with [`Error::NotConnected`].
    pub fn run<C, F>(&mut self, channel: &C, timeout: Duration, observer: F) -> Result<()>
    where
        C: ByteChannel + ?Sized,
        F: FnMut(&TransferEvent),
    {
        let events = channel.events()?;
        self.drive(channel, &events, timeout, observer)
    }

    /// Like [`XmodemSender::run`], with events subscribed by the caller.
    ///
    /// Subscribing before writing the command that starts the receiver
    /// guarantees its first `C` is not missed.
    pub fn drive<C, F>(
        &mut self,
        channel: &C,
        events: &DataEvents,
        timeout: Duration,
        mut observer: F,
    ) -> Result<()>
    where
        C: ByteChannel + ?Sized,
        F: FnMut(&TransferEvent),
    {
        debug!(
            "Starting XMODEM send: {} blocks, timeout {}s",
            self.block_count(),
            timeout.as_secs()
        );
        observer(&TransferEvent::Ready {
            blocks: self.block_count(),
        });

        // Too far in the future to represent: no ceiling.
        let deadline = Instant::now().checked_add(timeout);
        loop {
            let wait = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        warn!(
                            "Transfer timed out at block {}/{}",
                            self.block_number,
                            self.block_count()
                        );
                        return Err(Error::UploadTimedOut(timeout));
                    }
                    (deadline - now).min(LINK_CHECK_INTERVAL)
                },
                None => LINK_CHECK_INTERVAL,
            };
            let Some(chunk) = events.recv_timeout(wait)? else {
                if !channel.is_connected() {
                    warn!("Link lost at block {}", self.block_number);
                    return Err(Error::NotConnected);
                }
                continue;
            };

            for action in self.on_data(&chunk) {
                match action {
                    Action::Write(bytes) => channel.write(&bytes)?,
                    Action::Emit(event) => observer(&event),
                    Action::Finish => return Ok(()),
                    Action::Abort(reason) => return Err(Error::TransferAborted(reason)),
                }
            }
        }
    }
}
