//! Byte transport used by the XMODEM state machines.
//!
//! The protocol engine only needs two primitives, both with an explicit
//! timeout:
//!
//! ```text
//! read(max_bytes, timeout)  -> Some(bytes) | None (timed out)
//! write(bytes, timeout)     -> Some(written) | None (timed out)
//! ```
//!
//! A timeout is a normal outcome, not an error. `Err` is reserved for a
//! broken channel; the state machines log it and account for it like a
//! timeout.
//!
//! [`SerialTransport`] adapts any [`Port`](crate::port::Port), and
//! [`pipe`] provides in-memory channels for loopback testing.

pub mod pipe;

use crate::{error::Result, port::Port};
use log::trace;
use std::{
    io::{ErrorKind, Read, Write},
    time::Duration,
};

/// Byte-oriented, possibly lossy channel with per-call timeouts.
pub trait Transport {
    /// Read up to `max_bytes`, waiting at most `timeout` for them.
    ///
    /// Returns `Ok(None)` if nothing arrived in time. A short read is only
    /// allowed when the timeout expired part-way through.
    fn read(&mut self, max_bytes: usize, timeout: Duration) -> Result<Option<Vec<u8>>>;

    /// Write `data`, waiting at most `timeout` for the channel to accept it.
    ///
    /// Returns `Ok(None)` if the write timed out.
    fn write(&mut self, data: &[u8], timeout: Duration) -> Result<Option<usize>>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn read(&mut self, max_bytes: usize, timeout: Duration) -> Result<Option<Vec<u8>>> {
        (**self).read(max_bytes, timeout)
    }

    fn write(&mut self, data: &[u8], timeout: Duration) -> Result<Option<usize>> {
        (**self).write(data, timeout)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn read(&mut self, max_bytes: usize, timeout: Duration) -> Result<Option<Vec<u8>>> {
        (**self).read(max_bytes, timeout)
    }

    fn write(&mut self, data: &[u8], timeout: Duration) -> Result<Option<usize>> {
        (**self).write(data, timeout)
    }
}

/// [`Transport`] over a serial [`Port`].
///
/// The port timeout is adjusted before each call when it differs from the
/// requested one.
pub struct SerialTransport<P: Port> {
    port: P,
}

impl<P: Port> SerialTransport<P> {
    /// Wrap an open port.
    pub fn new(port: P) -> Self {
        Self { port }
    }

    /// Borrow the underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Drop whatever the port has buffered, e.g. noise from before the
    /// peer was ready.
    pub fn discard_buffers(&mut self) -> Result<()> {
        self.port.clear_buffers()
    }

    fn apply_timeout(&mut self, timeout: Duration) -> Result<()> {
        if self.port.timeout() != timeout {
            self.port.set_timeout(timeout)?;
        }
        Ok(())
    }
}

impl<P: Port> Transport for SerialTransport<P> {
    fn read(&mut self, max_bytes: usize, timeout: Duration) -> Result<Option<Vec<u8>>> {
        self.apply_timeout(timeout)?;

        let mut buf = vec![0u8; max_bytes];
        let mut filled = 0;
        while filled < max_bytes {
            match self.port.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::TimedOut => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => {},
                Err(e) => return Err(e.into()),
            }
        }

        if filled == 0 {
            trace!("{}: read timeout", self.port.name());
            return Ok(None);
        }
        buf.truncate(filled);
        trace!("{}: read {filled} byte(s)", self.port.name());
        Ok(Some(buf))
    }

    fn write(&mut self, data: &[u8], timeout: Duration) -> Result<Option<usize>> {
        self.apply_timeout(timeout)?;

        match self
            .port
            .write_all(data)
            .and_then(|()| self.port.flush())
        {
            Ok(()) => Ok(Some(data.len())),
            Err(e) if e.kind() == ErrorKind::TimedOut => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
