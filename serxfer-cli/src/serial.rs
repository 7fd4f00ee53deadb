//! Serial port selection.
//!
//! An explicit `--port` wins, then the configured port. Otherwise the
//! available ports are enumerated: a single port is used directly, several
//! ports are offered in a dialoguer prompt (or rejected in non-interactive
//! mode).

use {
    crate::{CliError, config::Config},
    anyhow::{Context, Result},
    console::style,
    dialoguer::{Error as DialoguerError, Select, theme::ColorfulTheme},
    log::{debug, info},
    serxfer::{NativePortEnumerator, PortEnumerator, PortInfo},
    std::{cmp::Ordering, io::IsTerminal},
};

/// Options for serial port selection.
#[derive(Debug, Clone, Default)]
pub struct SerialOptions {
    /// Explicit port specified via CLI.
    pub port: Option<String>,
    /// Non-interactive mode (fail if multiple ports).
    pub non_interactive: bool,
}

fn usage_err(message: &str) -> anyhow::Error {
    CliError::Usage(message.to_string()).into()
}

/// Pick a port without prompting: exactly one candidate is required.
fn select_non_interactive_port(ports: Vec<PortInfo>) -> Result<PortInfo> {
    match ports
        .len()
        .cmp(&1)
    {
        Ordering::Equal => ports
            .into_iter()
            .next()
            .ok_or_else(|| usage_err("No serial ports available")),
        Ordering::Greater => Err(usage_err(
            "Multiple serial ports found; choose one with --port",
        )),
        Ordering::Less => Err(usage_err("No serial ports available")),
    }
}

/// Resolve the serial port name to use.
pub fn select_serial_port(options: &SerialOptions, config: &Config) -> Result<String> {
    if let Some(port_name) = &options.port {
        return Ok(port_name.clone());
    }

    if let Some(port_name) = &config
        .port
        .serial
    {
        debug!("Using port from config: {port_name}");
        return Ok(port_name.clone());
    }

    let ports = NativePortEnumerator::list_ports().context("Failed to enumerate serial ports")?;
    if ports.is_empty() {
        return Err(usage_err("No serial ports found; specify one with --port"));
    }

    if options.non_interactive || ports.len() == 1 {
        let port = select_non_interactive_port(ports)?;
        info!("Auto-selected port: {}", port.name);
        return Ok(port.name);
    }

    ensure_interactive_terminal()?;
    select_port_interactive(ports)
}

fn ensure_interactive_terminal() -> Result<()> {
    if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
        Ok(())
    } else {
        Err(usage_err(
            "Several serial ports found and no terminal to prompt on; use --port",
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

/// Menu label for a port.
fn port_label(port: &PortInfo) -> String {
    let vid_pid = match (port.vid, port.pid) {
        (Some(vid), Some(pid)) => format!(" ({vid:04X}:{pid:04X})"),
        _ => String::new(),
    };
    let product = port
        .product
        .as_ref()
        .map(|p| format!(" - {}", style(p).dim()))
        .unwrap_or_default();
    format!("{}{vid_pid}{product}", port.name)
}

/// Interactive port selection.
fn select_port_interactive(ports: Vec<PortInfo>) -> Result<String> {
    eprintln!(
        "{} Found {} serial ports",
        style("ℹ").blue(),
        ports.len()
    );

    let term_width = console::Term::stderr()
        .size()
        .1 as usize;
    let max_item_width = term_width.saturating_sub(4);
    let labels: Vec<String> = ports
        .iter()
        .map(|p| console::truncate_str(&port_label(p), max_item_width, "\u{2026}").into_owned())
        .collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select a serial port")
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

#[cfg(test)]
mod tests {
    use super::*;

    fn port(name: &str) -> PortInfo {
        PortInfo {
            name: name.to_string(),
            ..Default::default()
        }
    }

    fn usage_message(err: &anyhow::Error) -> String {
        match err.downcast_ref::<CliError>() {
            Some(CliError::Usage(msg)) => msg.clone(),
            other => panic!("expected usage error, got {other:?}"),
        }
    }

    #[test]
    fn test_explicit_port_wins() {
        let mut config = Config::default();
        config.port.serial = Some("/dev/ttyS9".to_string());
        let options = SerialOptions {
            port: Some("/dev/ttyUSB3".to_string()),
            non_interactive: true,
        };
        assert_eq!(select_serial_port(&options, &config).unwrap(), "/dev/ttyUSB3");
    }

    #[test]
    fn test_config_port_used_when_no_flag() {
        let mut config = Config::default();
        config.port.serial = Some("/dev/ttyS9".to_string());
        let options = SerialOptions {
            port: None,
            non_interactive: true,
        };
        assert_eq!(select_serial_port(&options, &config).unwrap(), "/dev/ttyS9");
    }

    #[test]
    fn test_non_interactive_single_port() {
        let selected = select_non_interactive_port(vec![port("/dev/ttyUSB0")]).unwrap();
        assert_eq!(selected.name, "/dev/ttyUSB0");
    }

    #[test]
    fn test_non_interactive_multiple_ports_is_usage_error() {
        let err = select_non_interactive_port(vec![port("a"), port("b")]).unwrap_err();
        assert!(usage_message(&err).contains("Multiple"));
    }

    #[test]
    fn test_non_interactive_no_ports_is_usage_error() {
        let err = select_non_interactive_port(Vec::new()).unwrap_err();
        assert!(usage_message(&err).contains("No serial ports"));
    }

    #[test]
    fn test_port_label_includes_usb_ids() {
        console::set_colors_enabled(false);
        let info = PortInfo {
            name: "/dev/ttyUSB0".to_string(),
            vid: Some(0x1A86),
            pid: Some(0x7523),
            product: Some("USB Serial".to_string()),
            ..Default::default()
        };
        assert_eq!(port_label(&info), "/dev/ttyUSB0 (1A86:7523) - USB Serial");
        assert_eq!(port_label(&port("COM3")), "COM3");
    }
}
