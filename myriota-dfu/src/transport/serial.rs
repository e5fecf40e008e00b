//! Serial UART transport using the `serialport` crate.
//!
//! A background reader thread polls the port and dispatches every chunk it
//! reads to the subscribers, which turns the pull-based serial API into the
//! notification model the session expects.

use {
    crate::{
        error::{Error, Result},
        transport::{PortInfo, ReceiveHandler, SubscriberList, SubscriptionId, Transport},
    },
    log::{debug, trace, warn},
    std::{
        io::{Read, Write},
        sync::{
            Arc, Mutex,
            atomic::{AtomicBool, Ordering},
        },
        thread::{self, JoinHandle},
        time::Duration,
    },
};

/// Default UART baud rate of the Myriota bootloader.
pub const DEFAULT_BAUD: u32 = 115200;

/// Serial port configuration.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyUSB0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Read poll interval of the reader thread.
    pub timeout: Duration,
    /// Split writes into chunks of at most this many bytes.
    pub max_payload: Option<usize>,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD,
            timeout: Duration::from_millis(50),
            max_payload: None,
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the reader poll interval.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Limit the size of a single write.
    #[must_use]
    pub fn with_max_payload(mut self, max_payload: Option<usize>) -> Self {
        self.max_payload = max_payload;
        self
    }
}

/// Notification-style transport over a serial port.
pub struct SerialTransport {
    name: String,
    writer: Mutex<Box<dyn serialport::SerialPort>>,
    subscribers: Arc<SubscriberList>,
    connected: Arc<AtomicBool>,
    max_payload: Option<usize>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl SerialTransport {
    /// Open the port and start the reader thread.
    pub fn open(config: &SerialConfig) -> Result<Self> {
        if config
            .port_name
            .is_empty()
        {
            return Err(Error::Config("serial port name is empty".into()));
        }
        if config.baud_rate == 0 {
            return Err(Error::Config("baud rate must be non-zero".into()));
        }
        if config.max_payload == Some(0) {
            return Err(Error::Config("max payload must be non-zero".into()));
        }

        let port = serialport::new(&config.port_name, config.baud_rate)
            .timeout(config.timeout)
            .open()?;
        let mut reader_port = port.try_clone()?;

        let subscribers = Arc::new(SubscriberList::new());
        let connected = Arc::new(AtomicBool::new(true));

        let reader = {
            let subscribers = Arc::clone(&subscribers);
            let connected = Arc::clone(&connected);
            let name = config
                .port_name
                .clone();
            thread::Builder::new()
                .name("myriota-dfu-rx".into())
                .spawn(move || pump(&mut reader_port, &name, &subscribers, &connected))?
        };

        debug!(
            "Opened {} at {} baud",
            config.port_name, config.baud_rate
        );

        Ok(Self {
            name: config
                .port_name
                .clone(),
            writer: Mutex::new(port),
            subscribers,
            connected,
            max_payload: config.max_payload,
            reader: Mutex::new(Some(reader)),
        })
    }

    /// Open a serial port with default settings.
    pub fn open_simple(port_name: &str, baud_rate: u32) -> Result<Self> {
        Self::open(&SerialConfig::new(port_name, baud_rate))
    }

    /// Stop the reader thread and refuse further writes.
    ///
    /// Safe to call from another thread while a transfer is running; the
    /// transfer then fails with a transport error.
    pub fn shutdown(&self) {
        self.connected
            .store(false, Ordering::SeqCst);

        let handle = self
            .reader
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle
                .thread()
                .id()
                != thread::current().id()
            {
                let _ = handle.join();
            }
        }
    }
}

impl Transport for SerialTransport {
    fn send(&self, data: &[u8]) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::Transport(format!("{}: port closed", self.name)));
        }

        let mut port = self
            .writer
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        port.write_all(data)?;
        port.flush()?;
        trace!("{}: sent {} bytes", self.name, data.len());
        Ok(())
    }

    fn subscribe(&self, handler: ReceiveHandler) -> Result<SubscriptionId> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
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
        &self.name
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Read from `reader` and dispatch every chunk until the link closes.
///
/// End of stream and read errors other than a timeout clear `connected`.
fn pump<R: Read + ?Sized>(
    reader: &mut R,
    name: &str,
    subscribers: &SubscriberList,
    connected: &AtomicBool,
) {
    let mut buf = [0u8; 256];
    while connected.load(Ordering::SeqCst) {
        match reader.read(&mut buf) {
            Ok(0) => {
                warn!("{name}: end of stream, closing");
                connected.store(false, Ordering::SeqCst);
            },
            Ok(n) => {
                trace!("{name}: received {n} bytes");
                subscribers.dispatch(&buf[..n]);
            },
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {},
            Err(e) => {
                warn!("{name}: read failed, closing: {e}");
                connected.store(false, Ordering::SeqCst);
            },
        }
    }
    debug!("{name}: reader stopped");
}

/// List all available serial ports.
pub fn list_ports() -> Result<Vec<PortInfo>> {
    let ports = serialport::available_ports().map_err(Error::Serial)?;

    Ok(ports
        .into_iter()
        .map(|p| {
            let (vid, pid, manufacturer, product, serial_number) = match &p.port_type {
                serialport::SerialPortType::UsbPort(info) => (
                    Some(info.vid),
                    Some(info.pid),
                    info.manufacturer
                        .clone(),
                    info.product
                        .clone(),
                    info.serial_number
                        .clone(),
                ),
                _ => (None, None, None, None, None),
            };

            PortInfo {
                name: p.port_name,
                vid,
                pid,
                manufacturer,
                product,
                serial_number,
            }
        })
        .collect())
}
