//! Error types for serxfer.

use std::{fmt, io};
use thiserror::Error;

/// Result type for serxfer operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Phase of a transfer in which an event happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPhase {
    /// Initial mode negotiation.
    Negotiation,
    /// Data block exchange.
    Transfer,
    /// Final EOT handshake.
    Finish,
}

impl fmt::Display for TransferPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Negotiation => "negotiation",
            Self::Transfer => "transfer",
            Self::Finish => "final handshake",
        };
        f.write_str(name)
    }
}

/// Error type for serxfer operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (data source/sink, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// No usable mode-selection byte within the retry budget.
    #[error("Negotiation timed out")]
    NegotiationTimeout,

    /// Two consecutive CAN bytes were received from the peer.
    #[error("Transfer cancelled by peer during {phase}")]
    CancelledByPeer {
        /// Phase in which the cancel arrived.
        phase: TransferPhase,
    },

    /// The peer sent EOT while the sender was negotiating.
    #[error("Transfer declined by peer")]
    DeclinedByPeer,

    /// A block (or the final EOT when `sequence` is `None`) was never ACKed.
    #[error("{} not acknowledged, retries exhausted", ack_target(.sequence))]
    AcknowledgeTimeout {
        /// Sequence number of the unacknowledged block.
        sequence: Option<u8>,
    },

    /// Received blocks kept failing validation.
    #[error("Block {sequence} failed validation, retries exhausted")]
    IntegrityMismatch {
        /// Sequence number the receiver was expecting.
        sequence: u8,
    },

    /// Unsupported transfer mode.
    #[error("Invalid mode: {0:?}")]
    InvalidMode(String),

    /// Communication timeout.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

fn ack_target(sequence: &Option<u8>) -> String {
    match sequence {
        Some(seq) => format!("Block {seq}"),
        None => "EOT".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            Error::AcknowledgeTimeout { sequence: Some(3) }.to_string(),
            "Block 3 not acknowledged, retries exhausted"
        );
        assert_eq!(
            Error::AcknowledgeTimeout { sequence: None }.to_string(),
            "EOT not acknowledged, retries exhausted"
        );
        assert_eq!(
            Error::CancelledByPeer {
                phase: TransferPhase::Negotiation
            }
            .to_string(),
            "Transfer cancelled by peer during negotiation"
        );
    }
}
