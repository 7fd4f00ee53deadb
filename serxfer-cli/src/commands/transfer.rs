//! Send and receive over a serial port.

use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use log::debug;
use serxfer::{
    Mode, NativePort, Port, Progress, SerialConfig, SerialTransport, XmodemConfig, XmodemReceiver,
    XmodemSender, strip_padding,
};
use std::{fs, path::Path, time::Duration};

use crate::config::Config;
use crate::serial::{SerialOptions, select_serial_port};
use crate::{Cli, CliError, use_fancy_output};

/// Baud rate when neither the command line nor a config file sets one.
pub(crate) const DEFAULT_BAUD: u32 = 115200;

/// Combine command-line flags, config file and library defaults.
pub(crate) fn build_xmodem_config(
    cli: &Cli,
    config: &Config,
    mode: Option<Mode>,
    checksum: bool,
) -> Result<XmodemConfig> {
    let mode = match (mode, &config.transfer.mode) {
        (Some(mode), _) => mode,
        (None, Some(name)) => name
            .parse::<Mode>()
            .map_err(|e| CliError::Usage(format!("Config file: {e}")))?,
        (None, None) => Mode::default(),
    };

    let mut xmodem = XmodemConfig::new(mode)
        .with_crc_preferred(!(checksum || config.transfer.checksum));
    if let Some(retries) = cli.retries.or(config.transfer.retries) {
        xmodem = xmodem.with_retry_limit(retries);
    }
    if let Some(secs) = cli.timeout.or(config.transfer.timeout_secs) {
        xmodem = xmodem.with_timeout(Duration::from_secs(secs));
    }
    if let Some(pad) = cli.pad.or(config.transfer.pad_byte) {
        xmodem = xmodem.with_pad_byte(pad);
    }

    xmodem
        .validate()
        .map_err(|e| CliError::Usage(e.to_string()))?;
    debug!("Transfer settings: {xmodem:?}");
    Ok(xmodem)
}

/// Progress bar over packets, hidden when quiet or not on a terminal.
pub(crate) fn packet_progress_bar(cli: &Cli, total_packets: u64) -> ProgressBar {
    if cli.quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new(total_packets);
    if let Ok(bar_style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
    {
        pb.set_style(bar_style.progress_chars("#>-"));
    }
    pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
    pb
}

/// Feed a sender progress event into the bar.
pub(crate) fn show_progress(pb: &ProgressBar, progress: Progress) {
    pb.set_position(progress.success_count as u64);
    if progress.error_count > 0 {
        pb.set_message(format!("retry {}", progress.error_count));
    } else {
        pb.set_message("");
    }
}

/// Open the selected serial port.
fn open_transport(
    cli: &Cli,
    config: &Config,
    timeout: Duration,
) -> Result<SerialTransport<NativePort>> {
    let options = SerialOptions {
        port: cli.port.clone(),
        non_interactive: cli.non_interactive,
    };
    let port_name = select_serial_port(&options, config)?;
    let baud = cli
        .baud
        .or(config.port.baud)
        .unwrap_or(DEFAULT_BAUD);

    if !cli.quiet {
        eprintln!(
            "{} Using {} at {} baud",
            style("🔌").cyan(),
            style(&port_name).green(),
            baud
        );
    }

    let serial_config = SerialConfig::new(port_name.as_str(), baud).with_timeout(timeout);
    let port = NativePort::open(&serial_config)
        .with_context(|| format!("Failed to open serial port {port_name}"))?;

    // Stale bytes would otherwise be read as negotiation replies.
    let mut transport = SerialTransport::new(port);
    transport
        .discard_buffers()
        .with_context(|| format!("Failed to clear buffers of {port_name}"))?;
    debug!("Opened {}", transport.port().name());
    Ok(transport)
}

/// Send command implementation.
pub(crate) fn cmd_send(cli: &Cli, config: &Config, file: &Path, mode: Option<Mode>) -> Result<()> {
    let data =
        fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let xmodem = build_xmodem_config(cli, config, mode, false)?;
    let packet_size = xmodem
        .mode
        .packet_size();
    let total_packets = data.len().div_ceil(packet_size);

    if !cli.quiet {
        eprintln!(
            "{} Sending {} ({} bytes, {} x {}-byte packets, {})",
            style("📦").cyan(),
            file.display(),
            data.len(),
            total_packets,
            packet_size,
            xmodem.mode
        );
    }

    let mut transport = open_transport(cli, config, xmodem.timeout)?;

    if !cli.quiet {
        eprintln!("{} Waiting for receiver...", style("⏳").yellow());
    }

    let pb = packet_progress_bar(cli, total_packets as u64);
    let result = XmodemSender::with_config(&mut transport, xmodem)
        .send(&mut data.as_slice(), |p| show_progress(&pb, p));
    let report = match result {
        Ok(report) => report,
        Err(e) => {
            pb.abandon();
            return Err(e).context("Send failed");
        },
    };
    pb.finish_and_clear();

    if !cli.quiet {
        eprintln!(
            "\n{} Sent {} packet(s), {} byte(s), {} retransmission(s)",
            style("✓").green().bold(),
            report.success_count,
            report.bytes_sent,
            report.retransmissions
        );
    }

    Ok(())
}

/// Receive command implementation.
pub(crate) fn cmd_receive(
    cli: &Cli,
    config: &Config,
    file: &Path,
    checksum: bool,
    strip: bool,
) -> Result<()> {
    let xmodem = build_xmodem_config(cli, config, None, checksum)?;
    let pad_byte = xmodem.pad_byte;
    let mut transport = open_transport(cli, config, xmodem.timeout)?;

    let spinner = if cli.quiet || !use_fancy_output() {
        ProgressBar::hidden()
    } else {
        let spinner = ProgressBar::new_spinner();
        spinner.set_message("Receiving...");
        spinner.enable_steady_tick(Duration::from_millis(120));
        spinner
    };

    let mut data = Vec::new();
    let result = XmodemReceiver::with_config(&mut transport, xmodem).receive(&mut data);
    spinner.finish_and_clear();
    let received = result.context("Receive failed")?;

    let contents = if strip {
        strip_padding(&data, pad_byte)
    } else {
        &data[..]
    };
    fs::write(file, contents).with_context(|| format!("Failed to write {}", file.display()))?;

    if !cli.quiet {
        eprintln!(
            "\n{} Received {} byte(s), wrote {} to {}",
            style("✓").green().bold(),
            received,
            contents.len(),
            file.display()
        );
    }

    Ok(())
}
