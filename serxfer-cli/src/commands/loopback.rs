//! Loopback self-test: sender and receiver joined by in-memory pipes.

use anyhow::{Context, Result, bail};
use console::style;
use log::debug;
use serxfer::{Mode, XmodemReceiver, XmodemSender, transport::pipe::duplex_pair};
use std::{fs, path::Path, thread, time::Instant};

use super::transfer::{build_xmodem_config, packet_progress_bar, show_progress};
use crate::Cli;
use crate::config::Config;

/// Deterministic payload with no long runs of the pad byte.
#[allow(clippy::cast_possible_truncation)]
fn generated_payload(size: usize) -> Vec<u8> {
    (0..size)
        .map(|i| (i.wrapping_mul(31).wrapping_add(i >> 8)) as u8)
        .collect()
}

/// `data` padded to a whole number of packets.
fn padded(data: &[u8], packet_size: usize, pad: u8) -> Vec<u8> {
    let mut out = data.to_vec();
    out.resize(data.len().div_ceil(packet_size) * packet_size, pad);
    out
}

/// Loopback command implementation.
pub(crate) fn cmd_loopback(
    cli: &Cli,
    config: &Config,
    file: Option<&Path>,
    mode: Option<Mode>,
    size: usize,
) -> Result<()> {
    let data = match file {
        Some(path) => {
            fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?
        },
        None => generated_payload(size),
    };
    let xmodem = build_xmodem_config(cli, config, mode, false)?;
    let packet_size = xmodem
        .mode
        .packet_size();
    let expected = padded(&data, packet_size, xmodem.pad_byte);

    if !cli.quiet {
        eprintln!(
            "{} Loopback: {} byte(s) in {} mode",
            style("🔁").cyan(),
            data.len(),
            xmodem.mode
        );
    }

    let (mut tx_end, mut rx_end) = duplex_pair();
    let rx_config = xmodem.clone();
    let receiver = thread::spawn(move || {
        let mut out = Vec::new();
        XmodemReceiver::with_config(&mut rx_end, rx_config)
            .receive(&mut out)
            .map(|_| out)
    });

    let started = Instant::now();
    let pb = packet_progress_bar(cli, data.len().div_ceil(packet_size) as u64);
    let sent = XmodemSender::with_config(&mut tx_end, xmodem)
        .send(&mut data.as_slice(), |p| show_progress(&pb, p));
    pb.finish_and_clear();
    // A failed sender must not leave the receiver waiting out its timeouts.
    drop(tx_end);

    let received = receiver
        .join()
        .map_err(|_| anyhow::anyhow!("Receiver thread panicked"))?
        .context("Loopback receiver failed")?;
    let report = sent.context("Loopback sender failed")?;
    debug!("Loopback finished in {:?}", started.elapsed());

    if received != expected {
        bail!(
            "Loopback mismatch: sent {} byte(s), received {} byte(s)",
            expected.len(),
            received.len()
        );
    }

    if !cli.quiet {
        eprintln!(
            "{} Round trip OK: {} packet(s), {} byte(s) in {:.2?}",
            style("✓").green().bold(),
            report.success_count,
            received.len(),
            started.elapsed()
        );
    }

    Ok(())
}
