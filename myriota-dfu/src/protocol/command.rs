//! Bootloader commands and the text markers the bootloader prints.
//!
//! Commands are written unframed; the bootloader answers with plain text or,
//! for uploads, by starting an XMODEM receive.

/// Enter (or stay in) the bootloader menu.
pub const ENTER_BOOTLOADER: &[u8] = b"U";

/// Receive a network information file.
pub const UPLOAD_NETWORK_INFO: &[u8] = b"o";

/// Receive a user application image.
pub const UPLOAD_USER_APPLICATION: &[u8] = b"s";

/// Receive a system image at its load address.
pub const UPLOAD_SYSTEM_IMAGE: &[u8] = b"a4000";

/// Leave the bootloader and boot the application.
pub const START_APPLICATION: &[u8] = b"b";

/// Printed by the bootloader when it shows its menu.
pub const BOOTLOADER_BANNER: &[u8] = b"Bootloader";

/// Printed by the bootloader for a command it does not know.
pub const UNKNOWN_COMMAND: &[u8] = b"Unknown";

/// Printed once the application starts.
pub const APPLICATION_STARTED: &[u8] = b"Starting application";

/// How many times the enter-bootloader command is sent per probe.
pub const ENTER_BOOTLOADER_REPEATS: usize = 3;
