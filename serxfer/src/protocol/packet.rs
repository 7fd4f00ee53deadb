//! XMODEM packet framing.
//!
//! ```text
//! +-----------+-----+------+------------------+------------------+
//! | SOH / STX | SEQ | ~SEQ | DATA (128/1024)  | CSUM (1) / CRC (2)|
//! +-----------+-----+------+------------------+------------------+
//! ```
//!
//! The CRC trailer is transmitted big-endian.

use crate::protocol::crc::{checksum, crc16_xmodem};
use byteorder::{BigEndian, ByteOrder};

/// XMODEM control characters.
pub mod control {
    /// Start of Header (128-byte block).
    pub const SOH: u8 = 0x01;
    /// Start of Text (1024-byte block).
    pub const STX: u8 = 0x02;
    /// End of Transmission.
    pub const EOT: u8 = 0x04;
    /// Acknowledge.
    pub const ACK: u8 = 0x06;
    /// Not Acknowledge.
    pub const NAK: u8 = 0x15;
    /// Cancel.
    pub const CAN: u8 = 0x18;
    /// CRC mode request character.
    pub const CRC: u8 = b'C';
}

/// Length of the start byte plus the two sequence bytes.
pub const HEADER_LEN: usize = 3;

/// Default padding byte (CP/M end-of-file).
pub const DEFAULT_PAD: u8 = 0x1A;

/// Payload size of a data block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockSize {
    /// 128-byte block, introduced by SOH.
    Classic128,
    /// 1024-byte block, introduced by STX.
    Extended1024,
}

impl BlockSize {
    /// Number of payload bytes.
    #[must_use]
    pub const fn payload_len(self) -> usize {
        match self {
            Self::Classic128 => 128,
            Self::Extended1024 => 1024,
        }
    }

    /// Start byte announcing a block of this size.
    #[must_use]
    pub const fn start_byte(self) -> u8 {
        match self {
            Self::Classic128 => control::SOH,
            Self::Extended1024 => control::STX,
        }
    }

    /// Infer the block size from a received start byte.
    #[must_use]
    pub const fn from_start_byte(byte: u8) -> Option<Self> {
        match byte {
            control::SOH => Some(Self::Classic128),
            control::STX => Some(Self::Extended1024),
            _ => None,
        }
    }
}

/// Integrity trailer flavour, chosen during negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ChecksumKind {
    /// 8-bit additive checksum (requested with NAK).
    Checksum,
    /// CRC-16/XMODEM (requested with 'C').
    Crc16,
}

impl ChecksumKind {
    /// Number of trailer bytes.
    #[must_use]
    pub const fn trailer_len(self) -> usize {
        match self {
            Self::Checksum => 1,
            Self::Crc16 => 2,
        }
    }
}

/// Build the three header bytes for a block.
#[must_use]
pub fn build_header(block_size: BlockSize, sequence: u8) -> [u8; HEADER_LEN] {
    [block_size.start_byte(), sequence, 0xFF - sequence]
}

/// Build the integrity trailer for `payload`.
#[must_use]
pub fn build_trailer(kind: ChecksumKind, payload: &[u8]) -> Vec<u8> {
    let mut trailer = Vec::with_capacity(kind.trailer_len());
    match kind {
        ChecksumKind::Checksum => trailer.push(checksum(payload, 0)),
        ChecksumKind::Crc16 => {
            let mut crc = [0u8; 2];
            BigEndian::write_u16(&mut crc, crc16_xmodem(payload));
            trailer.extend_from_slice(&crc);
        },
    }
    trailer
}

/// Verify the trailer at the end of `framed` (payload followed by trailer).
///
/// Returns whether the trailer matched and the payload with the trailer
/// stripped. Input shorter than a trailer is reported invalid with an empty
/// payload.
#[must_use]
pub fn verify_trailer(kind: ChecksumKind, framed: &[u8]) -> (bool, &[u8]) {
    let Some(split) = framed
        .len()
        .checked_sub(kind.trailer_len())
    else {
        return (false, &[]);
    };
    let (payload, tail) = framed.split_at(split);

    let valid = match kind {
        ChecksumKind::Checksum => {
            let ours = checksum(payload, 0);
            let theirs = tail[0];
            if ours != theirs {
                log::warn!("Checksum mismatch (theirs={theirs:02x}, ours={ours:02x})");
            }
            ours == theirs
        },
        ChecksumKind::Crc16 => {
            let ours = crc16_xmodem(payload);
            let theirs = BigEndian::read_u16(tail);
            if ours != theirs {
                log::warn!("CRC mismatch (theirs={theirs:04x}, ours={ours:04x})");
            }
            ours == theirs
        },
    };

    (valid, payload)
}

/// Frame `data` as a complete block: header, payload right-padded with
/// `pad` to the block size, and trailer.
///
/// `data` longer than the block size is truncated.
#[must_use]
pub fn build_packet(
    block_size: BlockSize,
    sequence: u8,
    kind: ChecksumKind,
    data: &[u8],
    pad: u8,
) -> Vec<u8> {
    let size = block_size.payload_len();
    let mut packet = Vec::with_capacity(HEADER_LEN + size + kind.trailer_len());

    packet.extend_from_slice(&build_header(block_size, sequence));
    packet.extend_from_slice(&data[..data.len().min(size)]);
    packet.resize(HEADER_LEN + size, pad);

    let trailer = build_trailer(kind, &packet[HEADER_LEN..]);
    packet.extend_from_slice(&trailer);
    packet
}

/// Trim trailing `pad` bytes that were added to fill the last block.
///
/// The protocol itself never strips padding; this is for callers that know
/// their payload does not legitimately end in `pad`.
#[must_use]
pub fn strip_padding(data: &[u8], pad: u8) -> &[u8] {
    let end = data
        .iter()
        .rposition(|&b| b != pad)
        .map_or(0, |i| i + 1);
    &data[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_header_soh() {
        let header = build_header(BlockSize::Classic128, 1);
        assert_eq!(header, [control::SOH, 0x01, 0xFE]);
    }

    #[test]
    fn test_build_header_stx() {
        let header = build_header(BlockSize::Extended1024, 5);
        assert_eq!(header, [control::STX, 0x05, 0xFA]);
    }

    #[test]
    fn test_header_complement_sums_to_ff() {
        for seq in 0..=255u8 {
            let header = build_header(BlockSize::Classic128, seq);
            assert_eq!(u16::from(header[1]) + u16::from(header[2]), 0xFF);
        }
    }

    #[test]
    fn test_build_trailer_checksum() {
        assert_eq!(build_trailer(ChecksumKind::Checksum, b"helloworld"), vec![0x3C]);
    }

    #[test]
    fn test_build_trailer_crc_big_endian() {
        assert_eq!(build_trailer(ChecksumKind::Crc16, b"123456789"), vec![0x31, 0xC3]);
    }

    #[test]
    fn test_verify_trailer_valid_and_stripped() {
        let mut framed = b"payload".to_vec();
        framed.extend(build_trailer(ChecksumKind::Crc16, b"payload"));

        let (valid, payload) = verify_trailer(ChecksumKind::Crc16, &framed);
        assert!(valid);
        assert_eq!(payload, b"payload");
    }

    #[test]
    fn test_verify_trailer_detects_corruption() {
        let mut framed = b"payload".to_vec();
        framed.extend(build_trailer(ChecksumKind::Checksum, b"payload"));
        framed[0] ^= 0x01;

        let (valid, payload) = verify_trailer(ChecksumKind::Checksum, &framed);
        assert!(!valid);
        assert_eq!(payload.len(), 7);
    }

    #[test]
    fn test_verify_trailer_short_input() {
        let (valid, payload) = verify_trailer(ChecksumKind::Crc16, &[0x00]);
        assert!(!valid);
        assert!(payload.is_empty());
    }

    #[test]
    fn test_build_packet_pads_short_data() {
        let packet = build_packet(
            BlockSize::Classic128,
            1,
            ChecksumKind::Checksum,
            b"abc",
            DEFAULT_PAD,
        );

        assert_eq!(packet.len(), HEADER_LEN + 128 + 1);
        assert_eq!(&packet[3..6], b"abc");
        assert!(packet[6..131].iter().all(|&b| b == DEFAULT_PAD));

        let (valid, payload) = verify_trailer(ChecksumKind::Checksum, &packet[HEADER_LEN..]);
        assert!(valid);
        assert_eq!(payload.len(), 128);
    }

    #[test]
    fn test_build_packet_stx_crc() {
        let data = vec![0xAA; 1024];
        let packet = build_packet(
            BlockSize::Extended1024,
            0xFF,
            ChecksumKind::Crc16,
            &data,
            DEFAULT_PAD,
        );

        assert_eq!(packet.len(), HEADER_LEN + 1024 + 2);
        assert_eq!(&packet[..3], &[control::STX, 0xFF, 0x00]);
    }

    #[test]
    fn test_block_size_from_start_byte() {
        assert_eq!(BlockSize::from_start_byte(control::SOH), Some(BlockSize::Classic128));
        assert_eq!(BlockSize::from_start_byte(control::STX), Some(BlockSize::Extended1024));
        assert_eq!(BlockSize::from_start_byte(control::EOT), None);
    }

    #[test]
    fn test_strip_padding() {
        assert_eq!(strip_padding(b"abc\x1a\x1a", DEFAULT_PAD), b"abc");
        assert_eq!(strip_padding(b"\x1a\x1a", DEFAULT_PAD), b"");
        assert_eq!(strip_padding(b"abc", DEFAULT_PAD), b"abc");
    }
}
