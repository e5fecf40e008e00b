//! Port listing command implementation.

use {anyhow::Result, console::style, myriota_dfu::PortInfo};

/// JSON document printed by `list-ports --json`.
fn ports_json(ports: &[PortInfo]) -> serde_json::Value {
    serde_json::json!({
        "ok": true,
        "data": {
            "ports": ports,
        }
    })
}

/// List ports command implementation.
pub(crate) fn cmd_list_ports(json: bool) -> Result<()> {
    let ports = myriota_dfu::list_ports()?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&ports_json(&ports))?
        );
        return Ok(());
    }

    eprintln!(
        "{}",
        style("Available serial ports:")
            .bold()
            .underlined()
    );

    if ports.is_empty() {
        eprintln!("  {}", style("No serial ports found").dim());
        return Ok(());
    }

    for port in &ports {
        let vid_pid = if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
            format!(" ({vid:04X}:{pid:04X})")
        } else {
            String::new()
        };
        let product = port
            .product
            .as_deref()
            .map(|p| format!(" - {}", style(p).dim()))
            .unwrap_or_default();

        eprintln!(
            "  {} {}{}{}",
            style("•").green(),
            style(&port.name).cyan(),
            vid_pid,
            product
        );
    }

    Ok(())
}
