//! Continuous deframer for the vendor-bulk byte stream
//!
//! Bulk reads land in a persistent buffer; extraction is opportunistic, with
//! no request/response cycle. Complete 64-byte STAT blocks at the buffer
//! head are stripped before frame parsing, so status snapshots interleaved
//! with frame data never desynchronize the stream. A magic mismatch at the
//! scan position drops exactly one byte (counted in `magic_bad`); CRC16
//! mismatches are counted in `crc_bad` but the frame is still delivered.

use bytes::{Buf, BytesMut};
use protocol::stat::{STAT_LEN, STAT_PREFIX, StatusBlock};
use protocol::Frame;
use protocol::vendor::{self, FrameClass, VendorHeader};
use tracing::{trace, warn};

/// Counters accumulated by the deframer, published as snapshots
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeframerCounters {
    /// Data frames delivered
    pub frames: u64,
    /// Payload bytes delivered
    pub bytes: u64,
    /// Soft CRC16 mismatches (frames still delivered)
    pub crc_bad: u64,
    /// Bytes dropped during byte-wise resync
    pub magic_bad: u64,
    /// Heartbeat frames seen
    pub test_seen: u64,
    /// Samples lost to forward sequence jumps, per-channel sum
    pub seq_gaps: u64,
}

/// One extraction result
#[derive(Debug, Clone)]
pub enum DeframeEvent {
    /// A STAT snapshot stripped from the stream
    Status(StatusBlock),
    /// A data frame for one channel
    Data(Frame),
}

/// Streaming extractor for STAT blocks and vendor frames
pub struct ContinuousDeframer {
    buf: BytesMut,
    counters: DeframerCounters,
    last_stat: Option<StatusBlock>,
    /// Duplicate heartbeat frames onto both channels instead of dropping
    test_as_data: bool,
    /// Second half of a duplicated heartbeat, emitted on the next poll
    pending: Option<Frame>,
    last_seq: [Option<u32>; 2],
}

impl ContinuousDeframer {
    pub fn new(test_as_data: bool) -> Self {
        Self {
            buf: BytesMut::with_capacity(16 * 1024),
            counters: DeframerCounters::default(),
            last_stat: None,
            test_as_data,
            pending: None,
            last_seq: [None; 2],
        }
    }

    /// Append freshly read bytes
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub fn counters(&self) -> DeframerCounters {
        self.counters
    }

    /// Most recent STAT block seen on the stream
    pub fn last_stat(&self) -> Option<&StatusBlock> {
        self.last_stat.as_ref()
    }

    /// Bytes currently buffered and not yet consumed
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Extract the next event, or `None` when more bytes are needed
    pub fn next_event(&mut self) -> Option<DeframeEvent> {
        if let Some(frame) = self.pending.take() {
            return Some(DeframeEvent::Data(frame));
        }

        loop {
            // STAT blocks have no magic; strip them before frame parsing
            if self.buf.len() >= STAT_PREFIX.len() && self.buf[..4] == STAT_PREFIX[..] {
                if self.buf.len() < STAT_LEN {
                    return None; // wait for the rest of the block
                }
                let block = self.buf.split_to(STAT_LEN);
                let Some(stat) = StatusBlock::parse(&block) else {
                    continue;
                };
                self.last_stat = Some(stat.clone());
                return Some(DeframeEvent::Status(stat));
            }

            if self.buf.len() < vendor::HEADER_LEN {
                return None;
            }
            if self.buf[..2] != vendor::MAGIC_BYTES[..] {
                self.counters.magic_bad += 1;
                self.buf.advance(1);
                continue;
            }

            let Ok(header) = VendorHeader::parse(&self.buf[..vendor::HEADER_LEN]) else {
                // magic was checked above; treat anything else as resync
                self.counters.magic_bad += 1;
                self.buf.advance(1);
                continue;
            };
            let frame_len = header.frame_len();
            if self.buf.len() < frame_len {
                return None; // wait for the full header + payload
            }

            let raw = self.buf.split_to(frame_len).freeze();
            let payload = raw.slice(vendor::HEADER_LEN..);
            let crc_ok = if header.has_crc() {
                let ok = vendor::verify_crc16(&raw[..vendor::HEADER_LEN], &payload);
                if !ok {
                    self.counters.crc_bad += 1;
                    trace!(seq = header.seq, "soft CRC16 mismatch, delivering anyway");
                }
                ok
            } else {
                true
            };

            match header.class() {
                FrameClass::Test => {
                    self.counters.test_seen += 1;
                    if self.test_as_data {
                        let make = |channel| Frame {
                            seq: header.seq,
                            timestamp: header.timestamp,
                            channel,
                            flags: header.flags,
                            samples: header.total_samples,
                            payload: payload.clone(),
                            crc_ok,
                        };
                        self.counters.frames += 2;
                        self.counters.bytes += payload.len() as u64 * 2;
                        self.pending = Some(make(1));
                        return Some(DeframeEvent::Data(make(0)));
                    }
                }
                FrameClass::Channel(channel) => {
                    self.track_seq(channel, header.seq);
                    self.counters.frames += 1;
                    self.counters.bytes += payload.len() as u64;
                    return Some(DeframeEvent::Data(Frame {
                        seq: header.seq,
                        timestamp: header.timestamp,
                        channel,
                        flags: header.flags,
                        samples: header.total_samples,
                        payload,
                        crc_ok,
                    }));
                }
                FrameClass::Unknown => {
                    warn!(flags = header.flags, seq = header.seq, "frame without channel bits dropped");
                }
            }
        }
    }

    fn track_seq(&mut self, channel: u8, seq: u32) {
        let slot = &mut self.last_seq[channel as usize];
        if let Some(prev) = *slot
            && seq > prev + 1
        {
            self.counters.seq_gaps += (seq - prev - 1) as u64;
        }
        *slot = Some(seq);
    }
}
