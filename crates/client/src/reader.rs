//! Exact-count reads and magic resynchronization over an abstract transport
//!
//! [`ByteStreamReader`] wraps any byte transport (CDC serial or USB bulk)
//! and adds the two primitives the frame decoder needs: `read_exact` with a
//! sliding deadline, and `sync_to_magic` which scans for the 2-byte frame
//! magic. Bytes read past the magic are pushed into an overflow stash that
//! the next read consumes first, so nothing is lost across independent
//! sync/read calls.

use crate::error::{ClientError, Result};
use protocol::cdc::{ALT_MAGIC, MAGIC};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

/// A blocking byte source with a short internal poll timeout
///
/// `read_some` returns `Ok(0)` when no data arrived within the transport's
/// own poll interval; callers own the overall deadline.
pub trait ByteTransport {
    fn read_some(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Estimated sustained byte rate, used to scale payload read deadlines
    fn byte_rate(&self) -> f64;
}

/// Which sync magic matched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MagicKind {
    /// The regular 5A A5 sequence
    Primary,
    /// The byte-swapped A5 5A sequence, accepted only when configured
    Swapped,
}

/// Buffered reader with exact-count reads and magic search
pub struct ByteStreamReader<T> {
    transport: T,
    stash: Vec<u8>,
}

fn find_subslice(haystack: &[u8], needle: &[u8; 2]) -> Option<usize> {
    haystack.windows(2).position(|w| w == needle)
}

impl<T: ByteTransport> ByteStreamReader<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            stash: Vec::new(),
        }
    }

    /// Push bytes back so the next read consumes them first
    pub fn push_front(&mut self, data: &[u8]) {
        if !data.is_empty() {
            self.stash.splice(0..0, data.iter().copied());
        }
    }

    /// Bytes currently stashed ahead of the transport
    pub fn stashed(&self) -> usize {
        self.stash.len()
    }

    pub fn byte_rate(&self) -> f64 {
        self.transport.byte_rate()
    }

    /// Read exactly `n` bytes or fail with a timeout
    ///
    /// The deadline slides: every partial arrival extends it by the full
    /// timeout, so a slow-but-live stream is never cut off mid-read.
    pub fn read_exact(&mut self, n: usize, what: &'static str, timeout: Duration) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(n);
        if !self.stash.is_empty() {
            let take = n.min(self.stash.len());
            out.extend(self.stash.drain(..take));
        }
        if out.len() == n {
            return Ok(out);
        }

        let idle = if timeout.is_zero() {
            Duration::from_secs(1)
        } else {
            timeout
        };
        let mut deadline = Instant::now() + idle;
        let mut buf = [0u8; 4096];
        while out.len() < n {
            if Instant::now() > deadline {
                return Err(ClientError::TransportTimeout(what));
            }
            let want = (n - out.len()).min(buf.len());
            let got = self.transport.read_some(&mut buf[..want])?;
            if got == 0 {
                thread::sleep(Duration::from_millis(1));
                continue;
            }
            out.extend_from_slice(&buf[..got]);
            deadline = Instant::now() + idle;
        }
        Ok(out)
    }

    /// Scan forward to the frame magic, stashing any overshoot
    ///
    /// The swapped-endian magic is logged when seen; it only counts as a
    /// match when `allow_swapped` is set.
    pub fn sync_to_magic(&mut self, max_wait: Duration, allow_swapped: bool) -> Result<MagicKind> {
        let mut pending = std::mem::take(&mut self.stash);
        let wait = if max_wait.is_zero() {
            Duration::from_secs(2)
        } else {
            max_wait
        };
        let deadline = Instant::now() + wait;
        let mut buf = [0u8; 32];

        loop {
            if let Some(idx) = find_subslice(&pending, &MAGIC) {
                self.push_front(&pending[idx + 2..]);
                return Ok(MagicKind::Primary);
            }
            if let Some(idx) = find_subslice(&pending, &ALT_MAGIC) {
                if allow_swapped {
                    self.push_front(&pending[idx + 2..]);
                    return Ok(MagicKind::Swapped);
                }
                debug!("swapped magic A5 5A seen, continuing search for 5A A5");
            }
            // keep one byte so a magic split across reads is still found
            if pending.len() > 1 {
                pending.drain(..pending.len() - 1);
            }

            if Instant::now() > deadline {
                return Err(ClientError::TransportTimeout("sync magic"));
            }
            let got = self.transport.read_some(&mut buf)?;
            if got == 0 {
                thread::sleep(Duration::from_millis(1));
                continue;
            }
            pending.extend_from_slice(&buf[..got]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockTransport;

    const FAST: Duration = Duration::from_millis(20);

    #[test]
    fn test_read_exact_across_chunks() {
        let t = MockTransport::new(vec![vec![1, 2], vec![3], vec![4, 5, 6]]);
        let mut r = ByteStreamReader::new(t);
        assert_eq!(r.read_exact(5, "bytes", FAST).unwrap(), vec![1, 2, 3, 4, 5]);
        assert_eq!(r.read_exact(1, "bytes", FAST).unwrap(), vec![6]);
    }

    #[test]
    fn test_read_exact_times_out_without_data() {
        let t = MockTransport::new(vec![vec![1, 2]]);
        let mut r = ByteStreamReader::new(t);
        let err = r.read_exact(5, "header", FAST).unwrap_err();
        assert!(matches!(err, ClientError::TransportTimeout("header")));
    }

    #[test]
    fn test_read_exact_serves_stash_first() {
        let t = MockTransport::new(vec![vec![9, 9]]);
        let mut r = ByteStreamReader::new(t);
        r.push_front(&[7, 8]);
        assert_eq!(r.read_exact(4, "bytes", FAST).unwrap(), vec![7, 8, 9, 9]);
    }

    #[test]
    fn test_sync_finds_magic_and_stashes_tail() {
        let t = MockTransport::new(vec![vec![0x00, 0x11, 0x5A, 0xA5, 0xDE, 0xAD]]);
        let mut r = ByteStreamReader::new(t);
        assert_eq!(r.sync_to_magic(FAST, false).unwrap(), MagicKind::Primary);
        assert_eq!(r.read_exact(2, "tail", FAST).unwrap(), vec![0xDE, 0xAD]);
    }

    #[test]
    fn test_sync_finds_magic_split_across_reads() {
        let t = MockTransport::new(vec![vec![0x01, 0x5A], vec![0xA5, 0x77]]);
        let mut r = ByteStreamReader::new(t);
        assert_eq!(r.sync_to_magic(FAST, false).unwrap(), MagicKind::Primary);
        assert_eq!(r.read_exact(1, "tail", FAST).unwrap(), vec![0x77]);
    }

    #[test]
    fn test_second_sync_consumes_no_transport_bytes() {
        // Stream: garbage, magic, header byte, then a second magic
        let t = MockTransport::new(vec![vec![
            0xFF, 0x5A, 0xA5, 0x42, 0x5A, 0xA5, 0x43,
        ]]);
        let mut r = ByteStreamReader::new(t);

        assert_eq!(r.sync_to_magic(FAST, false).unwrap(), MagicKind::Primary);
        assert_eq!(r.read_exact(1, "byte", FAST).unwrap(), vec![0x42]);
        let reads_after_first = r.transport.reads;

        // Second sync resolves entirely from the stash
        assert_eq!(r.sync_to_magic(FAST, false).unwrap(), MagicKind::Primary);
        assert_eq!(r.transport.reads, reads_after_first);
        assert_eq!(r.read_exact(1, "byte", FAST).unwrap(), vec![0x43]);
    }

    #[test]
    fn test_swapped_magic_skipped_by_default() {
        let t = MockTransport::new(vec![vec![0xA5, 0x5A, 0x00, 0x5A, 0xA5, 0x99]]);
        let mut r = ByteStreamReader::new(t);
        assert_eq!(r.sync_to_magic(FAST, false).unwrap(), MagicKind::Primary);
        assert_eq!(r.read_exact(1, "tail", FAST).unwrap(), vec![0x99]);
    }

    #[test]
    fn test_swapped_magic_accepted_when_allowed() {
        let t = MockTransport::new(vec![vec![0x00, 0xA5, 0x5A, 0x31]]);
        let mut r = ByteStreamReader::new(t);
        assert_eq!(r.sync_to_magic(FAST, true).unwrap(), MagicKind::Swapped);
        assert_eq!(r.read_exact(1, "tail", FAST).unwrap(), vec![0x31]);
    }

    #[test]
    fn test_sync_timeout_without_magic() {
        let t = MockTransport::new(vec![vec![0x00; 64]]);
        let mut r = ByteStreamReader::new(t);
        let err = r.sync_to_magic(FAST, false).unwrap_err();
        assert!(matches!(err, ClientError::TransportTimeout(_)));
    }
}
