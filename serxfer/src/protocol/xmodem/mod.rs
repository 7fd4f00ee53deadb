//! XMODEM / XMODEM-1K file transfer.
//!
//! ## Protocol Overview
//!
//! The receiver drives negotiation: it sends `'C'` to ask for CRC-16
//! trailers, or NAK for 8-bit checksums. The sender answers with data
//! blocks, each acknowledged individually:
//!
//! ```text
//! SENDER                                  RECEIVER
//!                                     <-- C
//! STX 01 FE Data[1024] CRC CRC        -->
//!                                     <-- ACK
//! SOH 02 FD Data[128] CRC CRC         -->
//!                                     <-- NAK
//! SOH 02 FD Data[128] CRC CRC         -->
//!                                     <-- ACK
//! EOT                                 -->
//!                                     <-- ACK
//! ```
//!
//! Two consecutive CAN bytes from either side abort the session.
//!
//! ## Example
//!
//! ```rust
//! use serxfer::protocol::xmodem::{XmodemConfig, XmodemReceiver, XmodemSender};
//! use serxfer::transport::pipe::duplex_pair;
//! use std::time::Duration;
//!
//! let (mut tx_end, mut rx_end) = duplex_pair();
//! let config = XmodemConfig::default().with_timeout(Duration::from_secs(2));
//!
//! let rx_config = config.clone();
//! let receiver = std::thread::spawn(move || {
//!     let mut out = Vec::new();
//!     XmodemReceiver::with_config(&mut rx_end, rx_config)
//!         .receive(&mut out)
//!         .map(|_| out)
//! });
//!
//! XmodemSender::with_config(&mut tx_end, config)
//!     .send(&mut &b"hello"[..], |_| {})
//!     .unwrap();
//!
//! let out = receiver.join().unwrap().unwrap();
//! assert_eq!(&out[..5], b"hello");
//! ```

mod channel;
pub mod config;
pub mod receiver;
pub mod sender;

pub use config::{Mode, Progress, XmodemConfig};
pub use receiver::XmodemReceiver;
pub use sender::{SendReport, XmodemSender};
