//! # serxfer
//!
//! XMODEM and XMODEM-1K file transfer over byte-oriented serial links.
//!
//! This crate provides:
//!
//! - Checksum and CRC-16/XMODEM integrity functions
//! - Packet framing for 128- and 1024-byte blocks
//! - Sender and receiver state machines with negotiation, retry, and the
//!   double-CAN cancel handshake
//! - A [`Transport`] abstraction with a serial port adapter and in-memory
//!   pipes for loopback testing
//!
//! ## Features
//!
//! - `native` (default): Native serial port support via the `serialport` crate
//! - `serde`: Serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use serxfer::{Mode, XmodemConfig, XmodemSender};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     #[cfg(feature = "native")]
//!     {
//!         use serxfer::{NativePort, SerialTransport};
//!
//!         let port = NativePort::open_simple("/dev/ttyUSB0", 115200)?;
//!         let mut transport = SerialTransport::new(port);
//!         let mut file = std::fs::File::open("firmware.bin")?;
//!
//!         let config = XmodemConfig::new(Mode::Extended);
//!         let report = XmodemSender::with_config(&mut transport, config).send(
//!             &mut file,
//!             |p| println!("{}/{} (errors: {})", p.success_count, p.total_packets, p.error_count),
//!         )?;
//!         println!("sent {} bytes", report.bytes_sent);
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod port;
pub mod protocol;
pub mod transport;

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::{NativePort, NativePortEnumerator};
pub use {
    error::{Error, Result, TransferPhase},
    port::{FlowControl, Port, PortEnumerator, PortInfo, SerialConfig},
    protocol::{
        BlockSize, ChecksumKind, Mode, Progress, SendReport, XmodemConfig, XmodemReceiver,
        XmodemSender,
        crc::{checksum, crc16_xmodem, crc16_xmodem_update},
        packet::strip_padding,
    },
    transport::{SerialTransport, Transport},
};
