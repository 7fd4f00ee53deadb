//! List-ports command.

use anyhow::Result;
use console::style;
use log::warn;
use serxfer::{NativePortEnumerator, PortEnumerator, PortInfo};

/// Enumerate ports, treating an enumeration failure as "no ports".
fn detect_ports() -> Vec<PortInfo> {
    NativePortEnumerator::list_ports().unwrap_or_else(|e| {
        warn!("Port enumeration failed: {e}");
        Vec::new()
    })
}

/// List ports command implementation.
pub(crate) fn cmd_list_ports(json: bool) -> Result<()> {
    let ports = detect_ports();

    if json {
        println!("{}", serde_json::to_string_pretty(&ports)?);
        return Ok(());
    }

    eprintln!("{}", style("Available serial ports").bold().underlined());

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
