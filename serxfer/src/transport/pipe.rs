//! In-memory byte pipes.
//!
//! Two unidirectional channels joined into a pair of [`PipeEnd`]s, so a
//! sender and a receiver running in separate threads can write at the same
//! time without stepping on each other.
//!
//! ```rust
//! use serxfer::transport::{Transport, pipe::duplex_pair};
//! use std::time::Duration;
//!
//! let (mut a, mut b) = duplex_pair();
//! a.write(b"hi", Duration::from_secs(1)).unwrap();
//! let got = b.read(2, Duration::from_secs(1)).unwrap();
//! assert_eq!(got.as_deref(), Some(&b"hi"[..]));
//! ```

use crate::{error::Result, transport::Transport};
use std::{
    collections::VecDeque,
    io,
    sync::mpsc::{self, Receiver, RecvTimeoutError, Sender},
    time::{Duration, Instant},
};

/// One end of an in-memory duplex link.
pub struct PipeEnd {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
    pending: VecDeque<u8>,
    peer_closed: bool,
}

/// Create two connected ends; bytes written to one are read from the other.
#[must_use]
pub fn duplex_pair() -> (PipeEnd, PipeEnd) {
    let (a_tx, b_rx) = mpsc::channel();
    let (b_tx, a_rx) = mpsc::channel();
    (PipeEnd::new(a_tx, a_rx), PipeEnd::new(b_tx, b_rx))
}

impl PipeEnd {
    fn new(tx: Sender<Vec<u8>>, rx: Receiver<Vec<u8>>) -> Self {
        Self {
            tx,
            rx,
            pending: VecDeque::new(),
            peer_closed: false,
        }
    }

    /// Number of bytes received but not yet read.
    pub fn buffered(&mut self) -> usize {
        self.drain_ready();
        self.pending.len()
    }

    fn drain_ready(&mut self) {
        while let Ok(chunk) = self.rx.try_recv() {
            self.pending.extend(chunk);
        }
    }
}

impl Transport for PipeEnd {
    fn read(&mut self, max_bytes: usize, timeout: Duration) -> Result<Option<Vec<u8>>> {
        let deadline = Instant::now() + timeout;
        self.drain_ready();

        while self.pending.len() < max_bytes && !self.peer_closed {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match self.rx.recv_timeout(remaining) {
                Ok(chunk) => self.pending.extend(chunk),
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => self.peer_closed = true,
            }
        }

        if self.pending.is_empty() {
            if self.peer_closed {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer closed").into());
            }
            return Ok(None);
        }

        let n = max_bytes.min(self.pending.len());
        Ok(Some(self.pending.drain(..n).collect()))
    }

    fn write(&mut self, data: &[u8], _timeout: Duration) -> Result<Option<usize>> {
        self.tx
            .send(data.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer closed"))?;
        Ok(Some(data.len()))
    }
}
