//! Session configuration shared by the sender and receiver.

use crate::{
    error::{Error, Result},
    protocol::packet::{BlockSize, DEFAULT_PAD},
};
use std::{fmt, str::FromStr, time::Duration};

/// Block size used by the sender for the whole session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Mode {
    /// XMODEM, 128-byte blocks.
    #[default]
    Classic,
    /// XMODEM-1K, 1024-byte blocks.
    Extended,
}

impl Mode {
    /// Block size sent in this mode.
    #[must_use]
    pub const fn block_size(self) -> BlockSize {
        match self {
            Self::Classic => BlockSize::Classic128,
            Self::Extended => BlockSize::Extended1024,
        }
    }

    /// Payload bytes per packet.
    #[must_use]
    pub const fn packet_size(self) -> usize {
        self.block_size()
            .payload_len()
    }
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s
            .trim()
            .to_ascii_lowercase()
            .as_str()
        {
            "xmodem" | "classic" | "128" => Ok(Self::Classic),
            "xmodem1k" | "xmodem-1k" | "extended" | "1k" | "1024" => Ok(Self::Extended),
            _ => Err(Error::InvalidMode(s.to_string())),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Classic => f.write_str("xmodem"),
            Self::Extended => f.write_str("xmodem1k"),
        }
    }
}

/// XMODEM configuration options.
#[derive(Debug, Clone)]
pub struct XmodemConfig {
    /// Block size used when sending.
    pub mode: Mode,
    /// Byte used to pad the last block.
    pub pad_byte: u8,
    /// Failed attempts tolerated per phase before aborting.
    pub retry_limit: u32,
    /// Timeout for a single reply.
    pub timeout: Duration,
    /// Whether the receiver asks for CRC before falling back to checksum.
    pub crc_preferred: bool,
    /// Per-read timeout while purging the line before a NAK.
    pub purge_timeout: Duration,
    /// Pause after a failed probe write during receiver negotiation.
    pub retry_delay: Duration,
    /// Number of CAN bytes sent when aborting.
    pub cancel_count: usize,
}

impl Default for XmodemConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Classic,
            pad_byte: DEFAULT_PAD,
            retry_limit: 16,
            timeout: Duration::from_secs(60),
            crc_preferred: true,
            purge_timeout: Duration::from_secs(1),
            retry_delay: Duration::from_secs(1),
            cancel_count: 2,
        }
    }
}

impl XmodemConfig {
    /// Default configuration in the given mode.
    #[must_use]
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }

    /// Set the reply timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the retry limit.
    #[must_use]
    pub fn with_retry_limit(mut self, retry_limit: u32) -> Self {
        self.retry_limit = retry_limit;
        self
    }

    /// Set the padding byte.
    #[must_use]
    pub fn with_pad_byte(mut self, pad_byte: u8) -> Self {
        self.pad_byte = pad_byte;
        self
    }

    /// Choose whether the receiver requests CRC first.
    #[must_use]
    pub fn with_crc_preferred(mut self, crc_preferred: bool) -> Self {
        self.crc_preferred = crc_preferred;
        self
    }

    /// Set the purge read timeout.
    #[must_use]
    pub fn with_purge_timeout(mut self, purge_timeout: Duration) -> Self {
        self.purge_timeout = purge_timeout;
        self
    }

    /// Set the delay after a failed probe write.
    #[must_use]
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Reject settings the state machines cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.retry_limit == 0 {
            return Err(Error::Config("retry limit must be at least 1".into()));
        }
        if self.timeout.is_zero() {
            return Err(Error::Config("timeout must be non-zero".into()));
        }
        Ok(())
    }
}

/// Packet counters reported to the progress observer after every attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Progress {
    /// Packets read from the source so far.
    pub total_packets: usize,
    /// Packets acknowledged by the receiver.
    pub success_count: usize,
    /// Failed attempts for the current packet.
    pub error_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_from_str() {
        assert_eq!("xmodem".parse::<Mode>().unwrap(), Mode::Classic);
        assert_eq!("XMODEM1K".parse::<Mode>().unwrap(), Mode::Extended);
        assert_eq!("extended".parse::<Mode>().unwrap(), Mode::Extended);
        assert!(matches!(
            "ymodem".parse::<Mode>(),
            Err(Error::InvalidMode(m)) if m == "ymodem"
        ));
    }

    #[test]
    fn test_mode_packet_size() {
        assert_eq!(Mode::Classic.packet_size(), 128);
        assert_eq!(Mode::Extended.packet_size(), 1024);
    }

    #[test]
    fn test_config_defaults() {
        let config = XmodemConfig::default();
        assert_eq!(config.mode, Mode::Classic);
        assert_eq!(config.pad_byte, 0x1A);
        assert_eq!(config.retry_limit, 16);
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert!(config.crc_preferred);
        assert_eq!(config.cancel_count, 2);
    }

    #[test]
    fn test_config_validate() {
        assert!(XmodemConfig::default().validate().is_ok());
        assert!(matches!(
            XmodemConfig::default().with_retry_limit(0).validate(),
            Err(Error::Config(_))
        ));
        assert!(
            XmodemConfig::default()
                .with_timeout(Duration::ZERO)
                .validate()
                .is_err()
        );
    }
}
