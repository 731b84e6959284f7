//! Stereo pairing and the bounded pair queue
//!
//! [`StereoAssembler`] matches same-instant frames from the two channels by
//! sequence number; [`StereoQueue`] hands completed pairs to the consumer
//! without ever blocking the reader thread.

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use protocol::{Frame, StereoPair};
use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;

/// Pending-map size that triggers a full clear
const PENDING_CLEAR_THRESHOLD: usize = 2048;

/// Default pair queue capacity
pub const PAIR_QUEUE_CAPACITY: usize = 256;

/// Pairs same-instant frames from the two channels by sequence number
///
/// One pending map per channel. Relaxed mode also accepts an off-by-one
/// neighbor, tolerating a shared counter incremented between the two channel
/// emissions. Maps are cleared outright past 2048 entries; true pairs arrive
/// close together, so anything that old is already lost.
pub struct StereoAssembler {
    pending: [HashMap<u32, Frame>; 2],
    relaxed: bool,
}

impl StereoAssembler {
    pub fn new(relaxed: bool) -> Self {
        Self {
            pending: [HashMap::new(), HashMap::new()],
            relaxed,
        }
    }

    /// Number of frames waiting for their partner
    pub fn pending_len(&self) -> usize {
        self.pending[0].len() + self.pending[1].len()
    }

    /// Offer a frame; returns a pair when its partner is already waiting
    pub fn push(&mut self, frame: Frame) -> Option<StereoPair> {
        let ch = frame.channel as usize;
        let other = ch ^ 1;
        let seq = frame.seq;

        if let Some(partner) = self.pending[other].remove(&seq) {
            return Some(Self::pair(frame, partner));
        }
        if self.relaxed {
            // channel 0 may sit one behind channel 1 on a shared counter
            let neighbor = if ch == 0 {
                seq.checked_add(1)
            } else {
                seq.checked_sub(1)
            };
            if let Some(n) = neighbor
                && let Some(partner) = self.pending[other].remove(&n)
            {
                return Some(Self::pair(frame, partner));
            }
        }

        self.pending[ch].insert(seq, frame);
        if self.pending[ch].len() > PENDING_CLEAR_THRESHOLD {
            warn!(
                channel = ch,
                "pending map exceeded {} entries, clearing", PENDING_CLEAR_THRESHOLD
            );
            self.pending[ch].clear();
        }
        None
    }

    fn pair(a: Frame, b: Frame) -> StereoPair {
        if a.channel == 0 {
            StereoPair { ch0: a, ch1: b }
        } else {
            StereoPair { ch0: b, ch1: a }
        }
    }
}

/// Bounded pair queue with drop-oldest overflow behavior
///
/// The producer (reader thread) never blocks on consumer speed: when the
/// queue is full the oldest pair is discarded to make room.
pub struct StereoQueue {
    tx: Sender<StereoPair>,
    rx: Receiver<StereoPair>,
    dropped: std::sync::atomic::AtomicU64,
}

impl StereoQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity);
        Self {
            tx,
            rx,
            dropped: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Enqueue a pair, displacing the oldest entry when full
    pub fn push(&self, pair: StereoPair) {
        match self.tx.try_send(pair) {
            Ok(()) => {}
            Err(TrySendError::Full(pair)) => {
                let _ = self.rx.try_recv();
                self.dropped
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                // a racing consumer may have refilled the slot; then this
                // pair is the one dropped
                let _ = self.tx.try_send(pair);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    /// Blocking pop with a timeout; `None` when nothing arrived in time
    pub fn pop(&self, timeout: Duration) -> Option<StereoPair> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Consumer-side handle for the controller
    pub fn receiver(&self) -> Receiver<StereoPair> {
        self.rx.clone()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Pairs discarded because the consumer fell behind
    pub fn dropped(&self) -> u64 {
        self.dropped.load(std::sync::atomic::Ordering::Relaxed)
    }
}
