//! Protocol implementations.

pub mod crc;
pub mod packet;
pub mod xmodem;

// Re-export common types
pub use packet::{BlockSize, ChecksumKind, control};
pub use xmodem::{Mode, Progress, SendReport, XmodemConfig, XmodemReceiver, XmodemSender};
