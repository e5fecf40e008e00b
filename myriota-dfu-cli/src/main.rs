//! myriota-dfu CLI - Command-line tool for updating Myriota modules.
//!
//! ## Features
//!
//! - Upload network info, system image and user application over serial
//! - Bootloader probe and application start
//! - Interactive serial port selection
//! - Shell completion generation
//! - Environment variable and config file support

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::debug;
use myriota_dfu::{SerialConfig, SerialTransport, transport::serial::DEFAULT_BAUD};
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

mod commands;
mod config;
mod serial;

use config::Config;
use serial::{SerialOptions, select_serial_port};

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Port to shut down on Ctrl-C.
static ACTIVE_PORT: Mutex<Option<Weak<SerialTransport>>> = Mutex::new(None);

/// Check if emoji/animations should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether Ctrl-C was pressed.
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// Errors with a dedicated exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Bad invocation or missing input (exit 2).
    #[error("{0}")]
    Usage(String),
    /// Unusable configuration file (exit 3).
    #[error("{0}")]
    Config(String),
    /// Interrupted by the user (exit 130).
    #[error("{0}")]
    Cancelled(String),
}

/// myriota-dfu - Update Myriota modules through their bootloader.
///
/// Environment variables:
///   MYRIOTA_DFU_PORT              - Default serial port
///   MYRIOTA_DFU_BAUD              - Default baud rate (default: 115200)
///   MYRIOTA_DFU_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "myriota-dfu")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "MYRIOTA_DFU_PORT")]
    port: Option<String>,

    /// Baud rate (default: 115200, or the config file's value).
    #[arg(short, long, global = true, env = "MYRIOTA_DFU_BAUD")]
    baud: Option<u32>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "MYRIOTA_DFU_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Upload images to the module and start the application.
    Update {
        /// Network information file.
        #[arg(long, value_name = "FILE")]
        network_info: Option<PathBuf>,

        /// System image.
        #[arg(long, value_name = "FILE")]
        system_image: Option<PathBuf>,

        /// User application image.
        #[arg(long, value_name = "FILE")]
        application: Option<PathBuf>,

        /// Stay in the bootloader after uploading.
        #[arg(long)]
        no_start: bool,
    },

    /// Check whether the module is in its bootloader.
    Probe,

    /// Leave the bootloader and start the application.
    Start,

    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type for completions.
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() -> ExitCode {
    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "myriota-dfu v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    install_interrupt_handler();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let code = exit_code_for(&err);
            eprintln!("{} {err:#}", style("Error:").red().bold());
            ExitCode::from(code)
        },
    }
}

fn run(cli: &Cli) -> Result<()> {
    // Load configuration
    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)?
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Update {
            network_info,
            system_image,
            application,
            no_start,
        } => commands::update::cmd_update(
            cli,
            &config,
            &commands::update::UpdateFiles {
                network_info: network_info.clone(),
                system_image: system_image.clone(),
                application: application.clone(),
            },
            !*no_start,
        ),
        Commands::Probe => commands::update::cmd_probe(cli, &config),
        Commands::Start => commands::update::cmd_start(cli, &config),
        Commands::ListPorts { json } => commands::ports::cmd_list_ports(*json),
        Commands::Completions { shell } => {
            commands::completions::cmd_completions(*shell);
            Ok(())
        },
    }
}

/// Map an error to the process exit code.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        return match cli_err {
            CliError::Usage(_) => 2,
            CliError::Config(_) => 3,
            CliError::Cancelled(_) => 130,
        };
    }
    if was_interrupted() {
        return 130;
    }
    match err.downcast_ref::<myriota_dfu::Error>() {
        Some(
            myriota_dfu::Error::DeviceNotFound
            | myriota_dfu::Error::NotConnected
            | myriota_dfu::Error::Serial(_),
        ) => 4,
        Some(myriota_dfu::Error::Config(_)) => 3,
        _ => 1,
    }
}

/// Stop the active port on Ctrl-C so blocked waits return.
fn install_interrupt_handler() {
    let result = ctrlc::set_handler(|| {
        INTERRUPTED.store(true, Ordering::SeqCst);
        let port = ACTIVE_PORT
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(Weak::upgrade);
        match port {
            Some(port) => port.shutdown(),
            None => std::process::exit(130),
        }
    });
    if let Err(e) = result {
        debug!("Could not install Ctrl-C handler: {e}");
    }
}

/// Resolve the port name from flags, config or detection.
fn get_port(cli: &Cli, config: &Config) -> Result<String> {
    let options = SerialOptions {
        port: cli
            .port
            .clone(),
        non_interactive: cli.non_interactive,
    };
    select_serial_port(&options, config)
}

/// Baud rate from flags, config or the bootloader default.
fn get_baud(cli: &Cli, config: &Config) -> u32 {
    cli.baud
        .or(config.connection.baud)
        .unwrap_or(DEFAULT_BAUD)
}

/// Open the selected port and register it for Ctrl-C shutdown.
pub(crate) fn open_transport(cli: &Cli, config: &Config) -> Result<Arc<SerialTransport>> {
    let port = get_port(cli, config)?;
    let baud = get_baud(cli, config);

    if !cli.quiet {
        eprintln!(
            "{} Using port {} at {} baud",
            style("🔌").cyan(),
            style(&port).cyan(),
            baud
        );
    }

    let serial_config = SerialConfig::new(&port, baud).with_max_payload(config.update.max_payload);
    let transport = Arc::new(SerialTransport::open(&serial_config)?);
    *ACTIVE_PORT
        .lock()
        .unwrap_or_else(PoisonError::into_inner) = Some(Arc::downgrade(&transport));
    Ok(transport)
}
