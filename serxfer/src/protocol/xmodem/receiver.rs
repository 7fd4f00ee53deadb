//! XMODEM receiver.
//!
//! ```text
//! Negotiating --SOH/STX--> ValidatingBlock --ok--> AwaitingBlock --EOT--> Succeeded
//!                              |    ^                 |
//!                              |    +----SOH/STX------+
//!                              +--bad: purge, NAK--> AwaitingBlock
//! ```
//!
//! The block size is taken from each block's own start byte, so a stream
//! may mix 128- and 1024-byte blocks.

use crate::{
    error::{Error, Result, TransferPhase},
    protocol::{
        packet::{BlockSize, ChecksumKind, control, verify_trailer},
        xmodem::{channel::Channel, config::XmodemConfig},
    },
    transport::Transport,
};
use log::{debug, error, info, warn};
use std::io::Write;

/// Receiver states. Aborts leave the machine through `Err`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReceiverState {
    Negotiating,
    /// Waiting for SOH/STX/EOT; holds a start byte already read, if any.
    AwaitingBlock(Option<u8>),
    ValidatingBlock(BlockSize),
    Succeeded,
}

/// Per-transfer bookkeeping.
struct Session {
    checksum: ChecksumKind,
    sequence: u8,
    bytes_received: usize,
    blocks_accepted: usize,
    block_errors: u32,
}

/// XMODEM receiver over a [`Transport`].
pub struct XmodemReceiver<'a, T: Transport + ?Sized> {
    channel: Channel<'a, T>,
    config: XmodemConfig,
}

impl<'a, T: Transport + ?Sized> XmodemReceiver<'a, T> {
    /// Create a receiver with the default configuration (CRC preferred).
    pub fn new(transport: &'a mut T) -> Self {
        Self::with_config(transport, XmodemConfig::default())
    }

    /// Create a receiver with custom configuration.
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

    /// Receive a transfer into `sink`.
    ///
    /// Returns the number of bytes written, which includes the padding of the
    /// last block.
    pub fn receive<W: Write + ?Sized>(&mut self, sink: &mut W) -> Result<usize> {
        self.config.validate()?;

        let mut session = Session {
            checksum: ChecksumKind::Checksum,
            sequence: 1,
            bytes_received: 0,
            blocks_accepted: 0,
            block_errors: 0,
        };
        let mut state = ReceiverState::Negotiating;

        loop {
            state = match state {
                ReceiverState::Negotiating => {
                    let (checksum, start) = self.negotiate()?;
                    session.checksum = checksum;
                    ReceiverState::AwaitingBlock(Some(start))
                },
                ReceiverState::AwaitingBlock(start) => self.await_block(&session, start)?,
                ReceiverState::ValidatingBlock(block_size) => {
                    self.validate_block(&mut session, block_size, sink)?
                },
                ReceiverState::Succeeded => {
                    info!(
                        "Transmission complete, {} bytes in {} block(s)",
                        session.bytes_received, session.blocks_accepted
                    );
                    return Ok(session.bytes_received);
                },
            };
        }
    }

    /// Emit the abort sequence.
    pub fn abort(&mut self) {
        self.channel
            .abort(self.config.cancel_count, self.config.timeout);
    }

    /// Probe the sender until the first block (or an immediate EOT) arrives.
    ///
    /// The first half of the retry budget asks for CRC (if preferred); after
    /// that the receiver falls back to checksum mode for good.
    fn negotiate(&mut self) -> Result<(ChecksumKind, u8)> {
        let limit = self.config.retry_limit;
        let mut crc_mode = self.config.crc_preferred;
        let mut error_count = 0;
        let mut cancel_pending = false;

        loop {
            if error_count >= limit {
                error!("Negotiation failed after {error_count} attempt(s), aborting");
                self.abort();
                return Err(Error::NegotiationTimeout);
            }

            let probe = if crc_mode && error_count < limit / 2 {
                control::CRC
            } else {
                if crc_mode {
                    debug!("No response to CRC requests, falling back to checksum");
                    crc_mode = false;
                }
                control::NAK
            };

            if !self
                .channel
                .send(&[probe], self.config.timeout)
            {
                debug!(
                    "Probe write failed, sleeping for {:?}",
                    self.config.retry_delay
                );
                std::thread::sleep(self.config.retry_delay);
                error_count += 1;
            }

            match self
                .channel
                .getc(self.config.timeout)
            {
                // EOT here means an empty transfer.
                Some(start @ (control::SOH | control::STX | control::EOT)) => {
                    let checksum = if crc_mode {
                        ChecksumKind::Crc16
                    } else {
                        ChecksumKind::Checksum
                    };
                    debug!("Sender started, using {checksum:?}");
                    return Ok((checksum, start));
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
                Some(c) => {
                    cancel_pending = false;
                    warn!("Expected SOH or STX at start sequence; got 0x{c:02X}");
                    error_count += 1;
                },
                None => {
                    warn!("Timeout in start sequence");
                    error_count += 1;
                },
            }
        }
    }

    /// Wait for the next start byte or EOT.
    fn await_block(&mut self, session: &Session, start: Option<u8>) -> Result<ReceiverState> {
        let mut pending = start;
        let mut error_count = 0;
        let mut cancel_pending = false;

        loop {
            let byte = match pending.take() {
                Some(b) => Some(b),
                None => self
                    .channel
                    .getc(self.config.timeout),
            };

            match byte {
                Some(control::EOT) => {
                    self.channel
                        .send(&[control::ACK], self.config.timeout);
                    return Ok(ReceiverState::Succeeded);
                },
                Some(control::CAN) => {
                    if cancel_pending {
                        info!(
                            "Transmission cancelled: received 2xCAN at block {}",
                            session.sequence
                        );
                        return Err(Error::CancelledByPeer {
                            phase: TransferPhase::Transfer,
                        });
                    }
                    debug!("Cancellation at block {}", session.sequence);
                    cancel_pending = true;
                    continue;
                },
                Some(c) => {
                    if let Some(block_size) = BlockSize::from_start_byte(c) {
                        return Ok(ReceiverState::ValidatingBlock(block_size));
                    }
                    cancel_pending = false;
                    warn!("Expected SOH, STX or EOT; got 0x{c:02X}");
                },
                None => warn!("Timeout waiting for block {}", session.sequence),
            }

            error_count += 1;
            if error_count >= self.config.retry_limit {
                error!("No block {} after {error_count} attempt(s), aborting", session.sequence);
                self.abort();
                return Err(Error::Timeout(format!(
                    "no block {} within retry budget",
                    session.sequence
                )));
            }
        }
    }

    /// Read the rest of a block whose start byte has been seen.
    fn validate_block<W: Write + ?Sized>(
        &mut self,
        session: &mut Session,
        block_size: BlockSize,
        sink: &mut W,
    ) -> Result<ReceiverState> {
        let timeout = self.config.timeout;
        let body_len = block_size.payload_len() + session.checksum.trailer_len();
        let expected = session.sequence;
        debug!("Receiving block {expected} ({} bytes)", block_size.payload_len());

        let seq1 = self.channel.getc(timeout);
        let seq2 = match seq1 {
            Some(_) => self
                .channel
                .getc(timeout)
                .map(|b| 0xFF - b),
            None => None,
        };

        match (seq1, seq2) {
            (Some(s1), Some(s2)) if s1 == s2 && s1 == expected => {
                let framed = self
                    .channel
                    .read_exact(body_len, timeout);
                let (valid, payload) = verify_trailer(session.checksum, &framed);

                if framed.len() == body_len && valid {
                    if let Err(e) = sink.write_all(payload) {
                        error!("Failed to store block {expected}: {e}");
                        self.abort();
                        return Err(e.into());
                    }
                    session.bytes_received += payload.len();
                    session.blocks_accepted += 1;
                    session.block_errors = 0;
                    self.channel
                        .send(&[control::ACK], timeout);
                    session.sequence = expected.wrapping_add(1);
                    return Ok(ReceiverState::AwaitingBlock(None));
                }
                warn!(
                    "Block {expected} failed integrity check ({} of {body_len} bytes)",
                    framed.len()
                );
            },
            (Some(s1), Some(s2))
                if s1 == s2 && session.blocks_accepted > 0 && s1 == expected.wrapping_sub(1) =>
            {
                // The sender missed our ACK and repeated the last block.
                let framed = self
                    .channel
                    .read_exact(body_len, timeout);
                let (valid, _) = verify_trailer(session.checksum, &framed);
                if framed.len() == body_len && valid {
                    debug!("Duplicate of block {s1}, acknowledging again");
                    self.channel
                        .send(&[control::ACK], timeout);
                    return Ok(ReceiverState::AwaitingBlock(None));
                }
                warn!("Repeated block {s1} failed integrity check");
            },
            _ => {
                error!(
                    "Expected sequence {expected}, got (seq1={seq1:?}, seq2={seq2:?}); \
                     draining block, will NAK"
                );
                self.channel
                    .read_exact(body_len, timeout);
            },
        }

        session.block_errors += 1;
        if session.block_errors >= self.config.retry_limit {
            error!(
                "Block {expected} failed {} time(s), aborting",
                session.block_errors
            );
            self.abort();
            return Err(Error::IntegrityMismatch { sequence: expected });
        }

        warn!("Purging line, requesting retransmission (NAK)");
        self.channel
            .purge(self.config.purge_timeout);
        self.channel
            .send(&[control::NAK], timeout);
        Ok(ReceiverState::AwaitingBlock(None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::packet::build_packet;
    use std::{collections::VecDeque, time::Duration};

    /// Scripted sender: incoming bytes are served in order, writes recorded.
    struct MockSerial {
        incoming: VecDeque<u8>,
        written: Vec<u8>,
    }

    impl MockSerial {
        fn new(incoming: Vec<u8>) -> Self {
            Self {
                incoming: incoming.into(),
                written: Vec::new(),
            }
        }
    }

    impl Transport for MockSerial {
        fn read(&mut self, max_bytes: usize, _timeout: Duration) -> Result<Option<Vec<u8>>> {
            let n = max_bytes.min(self.incoming.len());
            if n == 0 {
                return Ok(None);
            }
            Ok(Some(self.incoming.drain(..n).collect()))
        }

        fn write(&mut self, data: &[u8], _timeout: Duration) -> Result<Option<usize>> {
            self.written.extend_from_slice(data);
            Ok(Some(data.len()))
        }
    }

    fn fast_config(retry_limit: u32) -> XmodemConfig {
        XmodemConfig::default()
            .with_timeout(Duration::from_millis(10))
            .with_purge_timeout(Duration::from_millis(1))
            .with_retry_delay(Duration::from_millis(1))
            .with_retry_limit(retry_limit)
    }

    fn block(size: BlockSize, seq: u8, kind: ChecksumKind, data: &[u8]) -> Vec<u8> {
        build_packet(size, seq, kind, data, 0x1A)
    }

    #[test]
    fn test_receive_single_crc_block() {
        let mut incoming = block(BlockSize::Classic128, 1, ChecksumKind::Crc16, b"hello");
        incoming.push(control::EOT);
        let mut port = MockSerial::new(incoming);
        let mut receiver = XmodemReceiver::with_config(&mut port, fast_config(4));

        let mut out = Vec::new();
        assert_eq!(receiver.receive(&mut out).unwrap(), 128);
        assert_eq!(&out[..5], b"hello");
        assert!(out[5..].iter().all(|&b| b == 0x1A));
        assert_eq!(port.written, vec![control::CRC, control::ACK, control::ACK]);
    }

    #[test]
    fn test_receive_mixed_block_sizes() {
        let mut incoming = block(BlockSize::Extended1024, 1, ChecksumKind::Crc16, &[0xAB; 1024]);
        incoming.extend(block(BlockSize::Classic128, 2, ChecksumKind::Crc16, &[0xCD; 128]));
        incoming.push(control::EOT);
        let mut port = MockSerial::new(incoming);
        let mut receiver = XmodemReceiver::with_config(&mut port, fast_config(4));

        let mut out = Vec::new();
        assert_eq!(receiver.receive(&mut out).unwrap(), 1024 + 128);
        assert!(out[..1024].iter().all(|&b| b == 0xAB));
        assert!(out[1024..].iter().all(|&b| b == 0xCD));
    }

    #[test]
    fn test_receive_falls_back_to_checksum() {
        // Nothing answers the first two 'C' probes.
        let mut port = MockSerial::new(Vec::new());
        let mut receiver = XmodemReceiver::with_config(&mut port, fast_config(4));

        let result = receiver.receive(&mut Vec::new());
        assert!(matches!(result, Err(Error::NegotiationTimeout)));
        assert_eq!(
            port.written,
            vec![
                control::CRC,
                control::CRC,
                control::NAK,
                control::NAK,
                control::CAN,
                control::CAN
            ]
        );
    }

    #[test]
    fn test_receive_checksum_only() {
        let mut incoming = block(BlockSize::Classic128, 1, ChecksumKind::Checksum, b"abc");
        incoming.push(control::EOT);
        let mut port = MockSerial::new(incoming);
        let config = fast_config(4).with_crc_preferred(false);
        let mut receiver = XmodemReceiver::with_config(&mut port, config);

        let mut out = Vec::new();
        assert_eq!(receiver.receive(&mut out).unwrap(), 128);
        assert_eq!(port.written[0], control::NAK);
    }

    #[test]
    fn test_receive_corrupt_block_is_nacked() {
        let mut bad = block(BlockSize::Classic128, 1, ChecksumKind::Crc16, b"data");
        bad[10] ^= 0xFF;
        let mut incoming = bad;
        incoming.extend(block(BlockSize::Classic128, 1, ChecksumKind::Crc16, b"data"));
        incoming.push(control::EOT);

        // Purge would swallow the retransmission in a scripted stream, so
        // run it with a transport that goes quiet between blocks.
        let mut port = QuietBetweenBlocks::new(incoming, HEADER_AND_BODY);
        let mut receiver = XmodemReceiver::with_config(&mut port, fast_config(4));

        let mut out = Vec::new();
        assert_eq!(receiver.receive(&mut out).unwrap(), 128);
        assert_eq!(&out[..4], b"data");
        assert_eq!(
            port.written,
            vec![control::CRC, control::NAK, control::ACK, control::ACK]
        );
    }

    const HEADER_AND_BODY: usize = 3 + 128 + 2;

    /// Serves one frame of `frame_len` bytes, then reports a single timeout.
    struct QuietBetweenBlocks {
        inner: MockSerial,
        frame_len: usize,
        served: usize,
        quiet: bool,
    }

    impl QuietBetweenBlocks {
        fn new(incoming: Vec<u8>, frame_len: usize) -> Self {
            Self {
                inner: MockSerial::new(incoming),
                frame_len,
                served: 0,
                quiet: false,
            }
        }
    }

    impl Transport for QuietBetweenBlocks {
        fn read(&mut self, max_bytes: usize, timeout: Duration) -> Result<Option<Vec<u8>>> {
            if self.quiet {
                self.quiet = false;
                return Ok(None);
            }
            let left_in_frame = self.frame_len - self.served % self.frame_len;
            let data = self.inner.read(max_bytes.min(left_in_frame), timeout)?;
            if let Some(ref d) = data {
                self.served += d.len();
                if self.served % self.frame_len == 0 {
                    self.quiet = true;
                }
            }
            Ok(data)
        }

        fn write(&mut self, data: &[u8], timeout: Duration) -> Result<Option<usize>> {
            self.inner.write(data, timeout)
        }
    }

    impl std::ops::Deref for QuietBetweenBlocks {
        type Target = MockSerial;

        fn deref(&self) -> &MockSerial {
            &self.inner
        }
    }

    #[test]
    fn test_receive_wrong_sequence_drains_and_naks() {
        let mut incoming = block(BlockSize::Classic128, 7, ChecksumKind::Crc16, b"x");
        incoming.extend(block(BlockSize::Classic128, 1, ChecksumKind::Crc16, b"y"));
        incoming.push(control::EOT);
        let mut port = QuietBetweenBlocks::new(incoming, HEADER_AND_BODY);
        let mut receiver = XmodemReceiver::with_config(&mut port, fast_config(4));

        let mut out = Vec::new();
        assert_eq!(receiver.receive(&mut out).unwrap(), 128);
        assert_eq!(out[0], b'y');
    }

    #[test]
    fn test_receive_bad_complement_is_rejected() {
        let mut bad = block(BlockSize::Classic128, 1, ChecksumKind::Crc16, b"x");
        bad[2] = 0x00;
        let mut incoming = bad;
        incoming.extend(block(BlockSize::Classic128, 1, ChecksumKind::Crc16, b"y"));
        incoming.push(control::EOT);
        let mut port = QuietBetweenBlocks::new(incoming, HEADER_AND_BODY);
        let mut receiver = XmodemReceiver::with_config(&mut port, fast_config(4));

        let mut out = Vec::new();
        receiver.receive(&mut out).unwrap();
        assert_eq!(out[0], b'y');
    }

    #[test]
    fn test_receive_duplicate_block_acked_not_stored() {
        let first = block(BlockSize::Classic128, 1, ChecksumKind::Crc16, b"one");
        let mut incoming = first.clone();
        incoming.extend(first);
        incoming.extend(block(BlockSize::Classic128, 2, ChecksumKind::Crc16, b"two"));
        incoming.push(control::EOT);
        let mut port = MockSerial::new(incoming);
        let mut receiver = XmodemReceiver::with_config(&mut port, fast_config(4));

        let mut out = Vec::new();
        assert_eq!(receiver.receive(&mut out).unwrap(), 256);
        assert_eq!(&out[..3], b"one");
        assert_eq!(&out[128..131], b"two");
        assert_eq!(
            port.written,
            vec![control::CRC, control::ACK, control::ACK, control::ACK, control::ACK]
        );
    }

    #[test]
    fn test_receive_empty_transfer() {
        let mut port = MockSerial::new(vec![control::EOT]);
        let mut receiver = XmodemReceiver::with_config(&mut port, fast_config(4));

        let mut out = Vec::new();
        assert_eq!(receiver.receive(&mut out).unwrap(), 0);
        assert!(out.is_empty());
        assert_eq!(port.written, vec![control::CRC, control::ACK]);
    }

    #[test]
    fn test_receive_double_cancel_mid_stream() {
        let mut incoming = block(BlockSize::Classic128, 1, ChecksumKind::Crc16, b"x");
        incoming.extend([control::CAN, control::CAN]);
        let mut port = MockSerial::new(incoming);
        let mut receiver = XmodemReceiver::with_config(&mut port, fast_config(4));

        let result = receiver.receive(&mut Vec::new());
        assert!(matches!(
            result,
            Err(Error::CancelledByPeer {
                phase: TransferPhase::Transfer
            })
        ));
        assert_eq!(port.written, vec![control::CRC, control::ACK]);
    }

    #[test]
    fn test_receive_double_cancel_at_negotiation() {
        let mut port = MockSerial::new(vec![control::CAN, control::CAN]);
        let mut receiver = XmodemReceiver::with_config(&mut port, fast_config(4));

        let result = receiver.receive(&mut Vec::new());
        assert!(matches!(
            result,
            Err(Error::CancelledByPeer {
                phase: TransferPhase::Negotiation
            })
        ));
    }

    #[test]
    fn test_receive_gives_up_after_repeated_corruption() {
        let mut bad = block(BlockSize::Classic128, 1, ChecksumKind::Crc16, b"x");
        bad[5] ^= 0x01;
        let incoming: Vec<u8> = std::iter::repeat_n(bad, 3).flatten().collect();
        let mut port = QuietBetweenBlocks::new(incoming, HEADER_AND_BODY);
        let mut receiver = XmodemReceiver::with_config(&mut port, fast_config(3));

        let result = receiver.receive(&mut Vec::new());
        assert!(matches!(result, Err(Error::IntegrityMismatch { sequence: 1 })));
        assert!(port.written.ends_with(&[control::NAK, control::NAK, control::CAN, control::CAN]));
    }

    #[test]
    fn test_receive_silence_after_block_times_out() {
        let incoming = block(BlockSize::Classic128, 1, ChecksumKind::Crc16, b"x");
        let mut port = MockSerial::new(incoming);
        let mut receiver = XmodemReceiver::with_config(&mut port, fast_config(2));

        let result = receiver.receive(&mut Vec::new());
        assert!(matches!(result, Err(Error::Timeout(_))));
        assert!(port.written.ends_with(&[control::CAN, control::CAN]));
    }
}
