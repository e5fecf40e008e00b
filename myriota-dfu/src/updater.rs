//! Update orchestration: bootloader handshake, uploads and application start.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::protocol::command;
use crate::protocol::xmodem::{TransferEvent, XmodemConfig, XmodemSender};
use crate::session::{BootloaderSession, SessionConfig};
use crate::transport::Transport;

/// Default wall-clock ceiling for a single upload.
pub const DEFAULT_TRANSFER_TIMEOUT: Duration = Duration::from_secs(180);

/// Default wait for the application start confirmation.
pub const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(45);

/// Default pause after an upload before the next command.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(500);

/// What an upload writes into the module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum UploadKind {
    /// Network information file.
    NetworkInfo,
    /// User application image.
    UserApplication,
    /// System image.
    SystemImage,
}

impl UploadKind {
    /// Bootloader command that starts the receive.
    pub fn command(self) -> &'static [u8] {
        match self {
            Self::NetworkInfo => command::UPLOAD_NETWORK_INFO,
            Self::UserApplication => command::UPLOAD_USER_APPLICATION,
            Self::SystemImage => command::UPLOAD_SYSTEM_IMAGE,
        }
    }

    /// Human-readable name.
    pub fn name(self) -> &'static str {
        match self {
            Self::NetworkInfo => "network info",
            Self::UserApplication => "user application",
            Self::SystemImage => "system image",
        }
    }
}

impl std::fmt::Display for UploadKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Updater timing and transfer settings.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct UpdaterConfig {
    /// Ceiling for one complete upload.
    pub transfer_timeout: Duration,
    /// How long to wait for the application to report it started.
    pub start_timeout: Duration,
    /// Pause after each upload.
    pub settle_delay: Duration,
    /// XMODEM sender settings.
    pub xmodem: XmodemConfig,
    /// Session settings.
    pub session: SessionConfig,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            transfer_timeout: DEFAULT_TRANSFER_TIMEOUT,
            start_timeout: DEFAULT_START_TIMEOUT,
            settle_delay: DEFAULT_SETTLE_DELAY,
            xmodem: XmodemConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

impl UpdaterConfig {
    /// Set the upload ceiling.
    #[must_use]
    pub fn with_transfer_timeout(mut self, timeout: Duration) -> Self {
        self.transfer_timeout = timeout;
        self
    }

    /// Set the application start wait.
    #[must_use]
    pub fn with_start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout = timeout;
        self
    }

    /// Set the post-upload pause.
    #[must_use]
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Cancel a block after this many NAKs.
    #[must_use]
    pub fn with_max_block_retries(mut self, retries: Option<u32>) -> Self {
        self.xmodem
            .max_block_retries = retries;
        self
    }
}

/// Images to write in one [`Updater::run`].
#[derive(Debug, Clone, Default)]
pub struct UpdatePlan {
    /// Network information file.
    pub network_info: Option<Vec<u8>>,
    /// System image.
    pub system_image: Option<Vec<u8>>,
    /// User application image.
    pub user_application: Option<Vec<u8>>,
    /// Boot the application afterwards.
    pub start_application: bool,
}

impl UpdatePlan {
    /// Planned uploads in the order they are written.
    pub fn uploads(&self) -> Vec<(UploadKind, &[u8])> {
        [
            (UploadKind::NetworkInfo, &self.network_info),
            (UploadKind::SystemImage, &self.system_image),
            (UploadKind::UserApplication, &self.user_application),
        ]
        .into_iter()
        .filter_map(|(kind, data)| {
            data.as_deref()
                .map(|d| (kind, d))
        })
        .collect()
    }

    /// Whether the plan does nothing at all.
    pub fn is_empty(&self) -> bool {
        self.uploads()
            .is_empty()
            && !self.start_application
    }
}

/// Drives a Myriota module through an update.
pub struct Updater<T: Transport> {
    session: BootloaderSession<T>,
    config: UpdaterConfig,
}

impl<T: Transport> Updater<T> {
    /// Create an updater with default settings.
    pub fn new(transport: Arc<T>) -> Self {
        Self::with_config(transport, UpdaterConfig::default())
    }

    /// Create an updater with custom settings.
    pub fn with_config(transport: Arc<T>, config: UpdaterConfig) -> Self {
        let session = BootloaderSession::with_config(transport, config.session.clone());
        Self { session, config }
    }

    /// The session used for all I/O.
    pub fn session(&self) -> &BootloaderSession<T> {
        &self.session
    }

    /// Settings in effect.
    pub fn config(&self) -> &UpdaterConfig {
        &self.config
    }

    /// Open the session.
    pub fn open(&mut self) -> Result<()> {
        self.session
            .open()
    }

    /// Close the session.
    pub fn close(&mut self) -> Result<()> {
        self.session
            .close()
    }

    /// Make sure the module is in its bootloader.
    pub fn enter_bootloader(&self) -> Result<()> {
        info!("Entering bootloader");
        if self
            .session
            .is_bootloader_mode()?
        {
            debug!("Bootloader detected");
            Ok(())
        } else {
            warn!("No bootloader answer");
            Err(Error::DeviceNotFound)
        }
    }

    /// Upload `payload` as `kind`.
    ///
    /// `progress` is called with `(0, total)` once the payload is split and
    /// with `(block, total)` after every block write, including resends.
    pub fn upload<F>(&self, kind: UploadKind, payload: &[u8], mut progress: F) -> Result<()>
    where
        F: FnMut(usize, usize),
    {
        info!("Uploading {kind} ({} bytes)", payload.len());

        // Subscribe first: the receiver may answer the command immediately.
        let events = self
            .session
            .events()?;
        self.session
            .write(kind.command())?;

        let mut sender = XmodemSender::with_config(
            payload,
            self.config
                .xmodem
                .clone(),
        );
        let total = sender.block_count();
        sender.drive(
            &self.session,
            &events,
            self.config
                .transfer_timeout,
            |event| match event {
                TransferEvent::Ready { blocks } => progress(0, *blocks),
                TransferEvent::BlockSent { block } => progress(*block, total),
                _ => {},
            },
        )?;

        info!("Uploaded {kind}");
        thread::sleep(
            self.config
                .settle_delay,
        );
        Ok(())
    }

    /// Upload a network information file.
    pub fn send_network_info<F>(&self, payload: &[u8], progress: F) -> Result<()>
    where
        F: FnMut(usize, usize),
    {
        self.upload(UploadKind::NetworkInfo, payload, progress)
    }

    /// Upload a user application image.
    pub fn send_user_application<F>(&self, payload: &[u8], progress: F) -> Result<()>
    where
        F: FnMut(usize, usize),
    {
        self.upload(UploadKind::UserApplication, payload, progress)
    }

    /// Upload a system image.
    pub fn send_system_image<F>(&self, payload: &[u8], progress: F) -> Result<()>
    where
        F: FnMut(usize, usize),
    {
        self.upload(UploadKind::SystemImage, payload, progress)
    }

    /// Leave the bootloader and wait for the application to confirm.
    pub fn start_application(&self) -> Result<()> {
        info!("Starting application");
        self.session
            .write(command::START_APPLICATION)?;

        if self
            .session
            .read_until_delimiter(command::APPLICATION_STARTED, self.config.start_timeout)?
        {
            info!("Application started");
            Ok(())
        } else {
            Err(Error::ApplicationNotStarted)
        }
    }

    /// Run a whole update.
    ///
    /// The session is closed afterwards, also when a step fails; the step's
    /// error is the one returned.
    pub fn run<F>(&mut self, plan: &UpdatePlan, mut progress: F) -> Result<()>
    where
        F: FnMut(UploadKind, usize, usize),
    {
        self.open()?;
        let result = self.run_steps(plan, &mut progress);
        if let Err(e) = self.close() {
            warn!("Failed to close session: {e}");
        }
        result
    }

    fn run_steps<F>(&self, plan: &UpdatePlan, progress: &mut F) -> Result<()>
    where
        F: FnMut(UploadKind, usize, usize),
    {
        self.enter_bootloader()?;
        for (kind, payload) in plan.uploads() {
            self.upload(kind, payload, |current, total| progress(kind, current, total))?;
        }
        if plan.start_application {
            self.start_application()?;
        }
        Ok(())
    }
}
