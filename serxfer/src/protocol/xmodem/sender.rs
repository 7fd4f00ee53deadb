//! XMODEM sender.
//!
//! ```text
//! Negotiating --NAK/'C'--> Streaming --EOF--> AwaitingFinalAck --ACK--> Succeeded
//!      |                       |                     |
//!      +-------- CAN CAN / EOT / retries exhausted --+--> Err(..)
//! ```

use crate::{
    error::{Error, Result, TransferPhase},
    protocol::{
        packet::{ChecksumKind, build_packet, control},
        xmodem::{
            channel::Channel,
            config::{Progress, XmodemConfig},
        },
    },
    transport::Transport,
};
use log::{debug, error, info, warn};
use std::io::Read;

/// Sender states. Aborts leave the machine through `Err`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SenderState {
    Negotiating,
    Streaming(ChecksumKind),
    AwaitingFinalAck,
    Succeeded,
}

/// Summary of a successful send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SendReport {
    /// Packets transmitted (each counted once, however many attempts).
    pub total_packets: usize,
    /// Packets acknowledged.
    pub success_count: usize,
    /// Failed attempts over the whole transfer.
    pub retransmissions: usize,
    /// Payload bytes on the wire, padding included.
    pub bytes_sent: usize,
    /// Integrity mode selected by the receiver.
    pub checksum: Option<ChecksumKind>,
}

/// XMODEM sender over a [`Transport`].
pub struct XmodemSender<'a, T: Transport + ?Sized> {
    channel: Channel<'a, T>,
    config: XmodemConfig,
}

impl<'a, T: Transport + ?Sized> XmodemSender<'a, T> {
    /// Create a sender with the default configuration (classic mode).
    pub fn new(transport: &'a mut T) -> Self {
        Self::with_config(transport, XmodemConfig::default())
    }

    /// Create a sender with custom configuration.
    pub fn with_config(transport: &'a mut T, config: XmodemConfig) -> Self {
        Self {
            channel: Channel::new(transport),
            config,
        }
    }

    /// Configuration in use.
    pub fn config(&self) -> &XmodemConfig {
        &self.config
    }

    /// Send everything `source` yields.
    ///
    /// `progress` is called after every packet attempt with the current
    /// counters.
    pub fn send<R, F>(&mut self, source: &mut R, mut progress: F) -> Result<SendReport>
    where
        R: Read + ?Sized,
        F: FnMut(Progress),
    {
        self.config.validate()?;

        let mut report = SendReport::default();
        let mut state = SenderState::Negotiating;

        loop {
            state = match state {
                SenderState::Negotiating => {
                    let kind = self.negotiate()?;
                    report.checksum = Some(kind);
                    SenderState::Streaming(kind)
                },
                SenderState::Streaming(kind) => {
                    self.stream(kind, source, &mut report, &mut progress)?;
                    SenderState::AwaitingFinalAck
                },
                SenderState::AwaitingFinalAck => {
                    self.finish()?;
                    SenderState::Succeeded
                },
                SenderState::Succeeded => {
                    info!(
                        "Transmission successful: {} packet(s), {} byte(s)",
                        report.success_count, report.bytes_sent
                    );
                    return Ok(report);
                },
            };
        }
    }

    /// Emit the abort sequence.
    pub fn abort(&mut self) {
        self.channel
            .abort(self.config.cancel_count, self.config.timeout);
    }

    /// Wait for the receiver to pick an integrity mode.
    fn negotiate(&mut self) -> Result<ChecksumKind> {
        debug!(
            "Begin start sequence, packet_size={}",
            self.config
                .mode
                .packet_size()
        );

        let mut error_count = 0;
        let mut cancel_pending = false;

        loop {
            match self
                .channel
                .getc(self.config.timeout)
            {
                Some(control::NAK) => {
                    debug!("Standard checksum requested (NAK)");
                    return Ok(ChecksumKind::Checksum);
                },
                Some(control::CRC) => {
                    debug!("16-bit CRC requested ('C')");
                    return Ok(ChecksumKind::Crc16);
                },
                Some(control::CAN) => {
                    if cancel_pending {
                        info!("Transmission cancelled: received 2xCAN at start sequence");
                        return Err(Error::CancelledByPeer {
                            phase: TransferPhase::Negotiation,
                        });
                    }
                    debug!("Cancellation at start sequence");
                    cancel_pending = true;
                },
                Some(control::EOT) => {
                    info!("Transmission cancelled: received EOT at start sequence");
                    return Err(Error::DeclinedByPeer);
                },
                Some(c) => {
                    cancel_pending = false;
                    warn!("Expected NAK, CRC, EOT or CAN; got 0x{c:02X}");
                },
                None => {
                    debug!("Timeout waiting for start sequence");
                },
            }

            error_count += 1;
            if error_count >= self.config.retry_limit {
                error!("Negotiation failed after {error_count} attempt(s), aborting");
                self.abort();
                return Err(Error::NegotiationTimeout);
            }
        }
    }

    /// Send every block from `source`, one ACK per block.
    fn stream<R, F>(
        &mut self,
        kind: ChecksumKind,
        source: &mut R,
        report: &mut SendReport,
        progress: &mut F,
    ) -> Result<()>
    where
        R: Read + ?Sized,
        F: FnMut(Progress),
    {
        let block_size = self
            .config
            .mode
            .block_size();
        let packet_size = block_size.payload_len();
        let mut sequence: u8 = 1;

        loop {
            let chunk = match read_chunk(source, packet_size) {
                Ok(chunk) => chunk,
                Err(e) => {
                    error!("Failed to read source data: {e}");
                    self.abort();
                    return Err(e.into());
                },
            };
            if chunk.is_empty() {
                debug!("Source exhausted after {} packet(s)", report.total_packets);
                return Ok(());
            }

            report.total_packets += 1;
            let packet = build_packet(block_size, sequence, kind, &chunk, self.config.pad_byte);

            let mut error_count: u32 = 0;
            let mut cancel_pending = false;

            loop {
                debug!("Sending block {sequence} (attempt {})", error_count + 1);
                self.channel
                    .send(&packet, self.config.timeout);

                let reply = self
                    .channel
                    .getc(self.config.timeout);
                if reply == Some(control::ACK) {
                    report.success_count += 1;
                    report.bytes_sent += packet_size;
                    error_count = 0;
                    progress(Progress {
                        total_packets: report.total_packets,
                        success_count: report.success_count,
                        error_count,
                    });
                    break;
                }

                match reply {
                    Some(control::CAN) if cancel_pending => {
                        info!("Transmission cancelled: received 2xCAN at block {sequence}");
                        return Err(Error::CancelledByPeer {
                            phase: TransferPhase::Transfer,
                        });
                    },
                    Some(control::CAN) => {
                        debug!("Cancellation at block {sequence}");
                        cancel_pending = true;
                    },
                    Some(c) => {
                        cancel_pending = false;
                        warn!("Expected ACK for block {sequence}; got 0x{c:02X}");
                    },
                    None => warn!("Timeout waiting for ACK of block {sequence}"),
                }

                error_count += 1;
                report.retransmissions += 1;
                progress(Progress {
                    total_packets: report.total_packets,
                    success_count: report.success_count,
                    error_count,
                });

                if error_count >= self.config.retry_limit {
                    error!("Block {sequence} failed {error_count} time(s), aborting");
                    self.abort();
                    return Err(Error::AcknowledgeTimeout {
                        sequence: Some(sequence),
                    });
                }
            }

            sequence = sequence.wrapping_add(1);
        }
    }

    /// Send EOT until it is acknowledged.
    fn finish(&mut self) -> Result<()> {
        let mut error_count = 0;
        let mut cancel_pending = false;

        loop {
            debug!("Sending EOT, awaiting ACK");
            self.channel
                .send(&[control::EOT], self.config.timeout);

            match self
                .channel
                .getc(self.config.timeout)
            {
                Some(control::ACK) => return Ok(()),
                Some(control::CAN) if cancel_pending => {
                    info!("Transmission cancelled: received 2xCAN after EOT");
                    return Err(Error::CancelledByPeer {
                        phase: TransferPhase::Finish,
                    });
                },
                Some(control::CAN) => cancel_pending = true,
                Some(c) => {
                    cancel_pending = false;
                    warn!("Expected ACK for EOT; got 0x{c:02X}");
                },
                None => warn!("Timeout waiting for ACK of EOT"),
            }

            error_count += 1;
            if error_count >= self.config.retry_limit {
                warn!("EOT was not ACKed, aborting transfer");
                self.abort();
                return Err(Error::AcknowledgeTimeout { sequence: None });
            }
        }
    }
}

/// Read up to `len` bytes, stopping early only at end of input.
fn read_chunk<R: Read + ?Sized>(source: &mut R, len: usize) -> std::io::Result<Vec<u8>> {
    let mut chunk = Vec::with_capacity(len);
    source
        .take(len as u64)
        .read_to_end(&mut chunk)?;
    Ok(chunk)
}
