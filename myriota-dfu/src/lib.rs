//! # myriota-dfu
//!
//! A library for updating Myriota satellite modules through their bootloader.
//!
//! This crate provides the pieces needed to talk to the bootloader over any
//! push-based byte transport, including:
//!
//! - Bootloader detection and application start
//! - XMODEM (128-byte blocks, CRC16 or checksum) upload
//! - CRC16-XMODEM checksum calculation
//! - A ring-buffered session with delimiter waits
//!
//! ## Supported Transports
//!
//! - **Serial** (default): Linux, macOS, Windows via the `serialport` crate
//! - Anything else that implements [`Transport`], such as a BLE UART bridge
//!
//! ## Features
//!
//! - `native` (default): Serial port transport
//! - `serde`: Serialization support for configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use myriota_dfu::{UpdatePlan, Updater};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     #[cfg(feature = "native")]
//!     {
//!         use myriota_dfu::transport::serial::SerialTransport;
//!
//!         let transport = Arc::new(SerialTransport::open_simple("/dev/ttyUSB0", 115200)?);
//!         let mut updater = Updater::new(transport);
//!
//!         let plan = UpdatePlan {
//!             user_application: Some(std::fs::read("app.bin")?),
//!             start_application: true,
//!             ..UpdatePlan::default()
//!         };
//!         updater.run(&plan, |kind, current, total| {
//!             println!("{kind}: {current}/{total}");
//!         })?;
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod channel;
pub mod error;
pub mod protocol;
pub mod ring_buffer;
pub mod session;
pub mod transport;
pub mod updater;

// Re-exports for convenience
#[cfg(feature = "native")]
pub use transport::serial::{SerialConfig, SerialTransport, list_ports};
pub use {
    channel::{ByteChannel, DataEvents},
    error::{Error, Result},
    protocol::{
        crc::crc16_xmodem,
        xmodem::{TransferEvent, TransferMode, XmodemConfig, XmodemSender},
    },
    ring_buffer::RingBuffer,
    session::{BootloaderSession, SessionConfig},
    transport::{PortInfo, ReceiveHandler, SubscriptionId, Transport},
    updater::{UpdatePlan, UploadKind, Updater, UpdaterConfig},
};
