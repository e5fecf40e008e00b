//! Serial port selection.
//!
//! The port comes from, in order: the `--port` flag (or `MYRIOTA_DFU_PORT`),
//! the config file, the only port present, or an interactive prompt.
//! Non-interactive mode never prompts.

use {
    crate::{CliError, config::Config},
    anyhow::Result,
    console::style,
    dialoguer::{Error as DialoguerError, Select, theme::ColorfulTheme},
    log::{debug, info},
    myriota_dfu::PortInfo,
    std::{cmp::Ordering, io::IsTerminal},
};

/// Options for serial port selection.
#[derive(Debug, Clone, Default)]
pub struct SerialOptions {
    /// Explicit port specified via CLI.
    pub port: Option<String>,
    /// Non-interactive mode (fail if the choice is ambiguous).
    pub non_interactive: bool,
}

fn usage_err(message: &str) -> anyhow::Error {
    CliError::Usage(message.to_string()).into()
}

/// Pick a port name.
pub fn select_serial_port(options: &SerialOptions, config: &Config) -> Result<String> {
    if let Some(port) = &options.port {
        return Ok(port.clone());
    }

    if let Some(port) = &config
        .connection
        .serial
    {
        debug!("Using port from config: {port}");
        return Ok(port.clone());
    }

    let ports = myriota_dfu::list_ports()?;
    choose_port(ports, options.non_interactive)
}

/// Choose among detected ports; prompts only when interactive.
fn choose_port(ports: Vec<PortInfo>, non_interactive: bool) -> Result<String> {
    match ports
        .len()
        .cmp(&1)
    {
        Ordering::Less => Err(usage_err(
            "No serial ports found. Connect the module or pass --port.",
        )),
        Ordering::Equal => {
            let port = ports
                .into_iter()
                .next()
                .ok_or_else(|| anyhow::anyhow!("port list changed during selection"))?;
            info!("Auto-selected port: {}", port.name);
            Ok(port.name)
        },
        Ordering::Greater if non_interactive => Err(usage_err(
            "Found multiple serial ports; pass --port to choose one in non-interactive mode.",
        )),
        Ordering::Greater => {
            ensure_interactive_terminal()?;
            select_port_interactive(ports)
        },
    }
}

fn ensure_interactive_terminal() -> Result<()> {
    if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
        Ok(())
    } else {
        Err(usage_err(
            "Multiple serial ports found and no terminal to ask; pass --port.",
        ))
    }
}

fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) => {
            if io_err.kind() == std::io::ErrorKind::Interrupted {
                CliError::Cancelled("Port selection cancelled".to_string()).into()
            } else {
                usage_err("Port prompt failed")
            }
        },
    }
}

/// One line per port for the prompt.
fn port_label(port: &PortInfo) -> String {
    let vid_pid = if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
        format!(" ({vid:04X}:{pid:04X})")
    } else {
        String::new()
    };
    let product = port
        .product
        .as_ref()
        .map(|p| format!(" - {}", style(p).dim()))
        .unwrap_or_default();

    format!("{}{vid_pid}{product}", port.name)
}

fn select_port_interactive(ports: Vec<PortInfo>) -> Result<String> {
    eprintln!(
        "{} Found {} serial ports",
        style("ℹ").blue(),
        ports.len()
    );

    let term_width = usize::from(
        console::Term::stderr()
            .size()
            .1,
    );
    let max_item_width = term_width.saturating_sub(4);
    let labels: Vec<String> = ports
        .iter()
        .map(|p| console::truncate_str(&port_label(p), max_item_width, "\u{2026}").into_owned())
        .collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select the port the module is on")
        .items(&labels)
        .default(0)
        .interact_opt()
        .map_err(map_prompt_error)?;

    match selection {
        Some(index) => ports
            .into_iter()
            .nth(index)
            .map(|p| p.name)
            .ok_or_else(|| anyhow::anyhow!("Invalid port index: {index}")),
        None => Err(CliError::Cancelled("Port selection cancelled".to_string()).into()),
    }
}
