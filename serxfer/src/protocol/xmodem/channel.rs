//! Byte-level helpers over a [`Transport`].
//!
//! Transport errors are logged and reported as timeouts here, so the state
//! machines only ever see "got bytes" or "got nothing" and fold both cases
//! into their retry accounting.

use crate::{protocol::packet::control, transport::Transport};
use log::{trace, warn};
use std::time::Duration;

pub(crate) struct Channel<'a, T: Transport + ?Sized> {
    transport: &'a mut T,
}

impl<'a, T: Transport + ?Sized> Channel<'a, T> {
    pub(crate) fn new(transport: &'a mut T) -> Self {
        Self { transport }
    }

    /// Read up to `max_bytes`; `None` on timeout or transport failure.
    pub(crate) fn read(&mut self, max_bytes: usize, timeout: Duration) -> Option<Vec<u8>> {
        match self
            .transport
            .read(max_bytes, timeout)
        {
            Ok(Some(data)) if !data.is_empty() => Some(data),
            Ok(_) => None,
            Err(e) => {
                warn!("Transport read failed: {e}");
                None
            },
        }
    }

    /// Read a single byte.
    pub(crate) fn getc(&mut self, timeout: Duration) -> Option<u8> {
        let byte = self
            .read(1, timeout)
            .map(|data| data[0]);
        if let Some(b) = byte {
            trace!("<- 0x{b:02X}");
        }
        byte
    }

    /// Read until `len` bytes have arrived or a read times out.
    ///
    /// The result is shorter than `len` only when the line went quiet.
    pub(crate) fn read_exact(&mut self, len: usize, timeout: Duration) -> Vec<u8> {
        let mut buf = Vec::with_capacity(len);
        while buf.len() < len {
            match self.read(len - buf.len(), timeout) {
                Some(chunk) => buf.extend_from_slice(&chunk),
                None => break,
            }
        }
        buf
    }

    /// Write `data`; `false` if the write timed out, failed, or was short.
    pub(crate) fn send(&mut self, data: &[u8], timeout: Duration) -> bool {
        match self
            .transport
            .write(data, timeout)
        {
            Ok(Some(n)) if n == data.len() => {
                trace!("-> {} byte(s)", data.len());
                true
            },
            Ok(Some(n)) => {
                warn!("Short write: {n} of {} byte(s)", data.len());
                false
            },
            Ok(None) => {
                warn!("Write timed out");
                false
            },
            Err(e) => {
                warn!("Transport write failed: {e}");
                false
            },
        }
    }

    /// Drain the line until a read with `timeout` comes back empty.
    ///
    /// Returns the number of bytes discarded.
    pub(crate) fn purge(&mut self, timeout: Duration) -> usize {
        let mut discarded = 0;
        while let Some(data) = self.read(1, timeout) {
            discarded += data.len();
        }
        if discarded > 0 {
            trace!("Purged {discarded} byte(s)");
        }
        discarded
    }

    /// Send `count` CAN bytes.
    pub(crate) fn abort(&mut self, count: usize, timeout: Duration) {
        for _ in 0..count {
            self.send(&[control::CAN], timeout);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::Result, transport::pipe::duplex_pair};

    /// Transport that always fails.
    struct Broken;

    impl Transport for Broken {
        fn read(&mut self, _: usize, _: Duration) -> Result<Option<Vec<u8>>> {
            Err(std::io::Error::other("unplugged").into())
        }

        fn write(&mut self, _: &[u8], _: Duration) -> Result<Option<usize>> {
            Err(std::io::Error::other("unplugged").into())
        }
    }

    #[test]
    fn test_errors_fold_into_timeouts() {
        let mut broken = Broken;
        let mut channel = Channel::new(&mut broken);

        assert_eq!(channel.getc(Duration::from_millis(1)), None);
        assert!(!channel.send(&[0x06], Duration::from_millis(1)));
        assert!(channel.read_exact(4, Duration::from_millis(1)).is_empty());
    }

    #[test]
    fn test_purge_and_abort() {
        let (mut near, mut far) = duplex_pair();
        far.write(&[1, 2, 3], Duration::from_secs(1)).unwrap();

        let mut channel = Channel::new(&mut near);
        assert_eq!(channel.purge(Duration::from_millis(20)), 3);

        channel.abort(2, Duration::from_secs(1));
        assert_eq!(
            far.read(2, Duration::from_millis(50)).unwrap(),
            Some(vec![control::CAN, control::CAN])
        );
    }
}
