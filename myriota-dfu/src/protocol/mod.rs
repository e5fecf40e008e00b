//! Bootloader protocol: commands, checksums and the XMODEM sender.

pub mod command;
pub mod crc;
pub mod xmodem;

pub use crc::{checksum8, crc16_xmodem};
pub use xmodem::{Action, TransferEvent, TransferMode, XmodemConfig, XmodemSender};
