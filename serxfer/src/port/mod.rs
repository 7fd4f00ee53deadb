//! Port abstraction for serial communication.
//!
//! The protocol layer never touches a port directly; it talks to a
//! [`Transport`](crate::transport::Transport).
//! [`SerialTransport`](crate::transport::SerialTransport) bridges the two:
//!
//! ```text
//! +------------------------+
//! | XmodemSender/Receiver  |
//! +-----------+------------+
//!             |
//!             v
//! +-----------+------------+     +------------------+
//! |   Transport trait      | <-- |  pipe::PipeEnd   |  (tests, loopback)
//! +-----------+------------+     +------------------+
//!             |
//!             v
//! +-----------+------------+
//! | SerialTransport<Port>  |
//! +-----------+------------+
//!             |
//!             v
//! +-----------+------------+
//! | NativePort (serialport)|
//! +------------------------+
//! ```

#[cfg(feature = "native")]
pub mod native;

use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;

/// Serial port configuration.
///
/// XMODEM needs an 8-bit clean line, so the port is always opened 8N1.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyUSB0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Initial read/write timeout; the transport adjusts it per call.
    pub timeout: Duration,
    /// Flow control.
    pub flow_control: FlowControl,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: 115200,
            timeout: Duration::from_millis(1000),
            flow_control: FlowControl::None,
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the flow control mode.
    #[must_use]
    pub fn with_flow_control(mut self, flow_control: FlowControl) -> Self {
        self.flow_control = flow_control;
        self
    }
}

/// Flow control mode.
///
/// Software (XON/XOFF) flow control is not offered: 0x11 and 0x13 occur in
/// binary payloads and would be swallowed by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowControl {
    /// No flow control.
    #[default]
    None,
    /// Hardware flow control (RTS/CTS).
    Hardware,
}

/// Serial port information.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PortInfo {
    /// Port name/path.
    pub name: String,
    /// USB vendor ID (if available).
    pub vid: Option<u16>,
    /// USB product ID (if available).
    pub pid: Option<u16>,
    /// Manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial_number: Option<String>,
}

impl PortInfo {
    /// Short description for port listings, e.g. `"CP2102 (10C4:EA60)"`.
    pub fn description(&self) -> String {
        let product = self
            .product
            .as_deref()
            .or(self.manufacturer.as_deref())
            .unwrap_or("");
        match (self.vid, self.pid) {
            (Some(vid), Some(pid)) if product.is_empty() => format!("{vid:04X}:{pid:04X}"),
            (Some(vid), Some(pid)) => format!("{product} ({vid:04X}:{pid:04X})"),
            _ => product.to_string(),
        }
    }
}

/// Serial port as seen by [`SerialTransport`](crate::transport::SerialTransport).
pub trait Port: Read + Write + Send {
    /// Set the read/write timeout.
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Get the current timeout.
    fn timeout(&self) -> Duration;

    /// Clear input/output buffers.
    fn clear_buffers(&mut self) -> Result<()>;

    /// Get the port name/path.
    fn name(&self) -> &str;
}

/// Trait for listing available serial ports.
///
/// This is separated from `Port` because it's a static operation that
/// doesn't require an open port instance.
pub trait PortEnumerator {
    /// List all available serial ports.
    fn list_ports() -> Result<Vec<PortInfo>>;
}

#[cfg(feature = "native")]
pub use native::{NativePort, NativePortEnumerator};
