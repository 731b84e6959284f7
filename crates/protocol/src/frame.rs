//! Decoded frame and sample types shared by both stream paths

use crate::cdc::FrameKind;
use crate::integrity::CrcVariant;
use bytes::Bytes;

/// One captured sub-range within a channel buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: u16,
    pub length: u16,
}

impl Window {
    pub fn new(start: u16, length: u16) -> Self {
        Self { start, length }
    }
}

/// Row-major `samples x channels` matrix of 16-bit samples
///
/// Built from a little-endian payload; trailing bytes that do not fill a
/// whole row are dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleMatrix {
    samples: Vec<i16>,
    channels: usize,
}

impl SampleMatrix {
    pub fn from_le_bytes(payload: &[u8], channels: usize) -> Self {
        let channels = channels.max(1);
        let mut samples: Vec<i16> = payload
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        let whole = (samples.len() / channels) * channels;
        samples.truncate(whole);
        Self { samples, channels }
    }

    /// Number of sample rows (samples per channel)
    pub fn rows(&self) -> usize {
        self.samples.len() / self.channels
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// One acquisition instant: a slice of `channels` values
    pub fn row(&self, index: usize) -> &[i16] {
        let offset = index * self.channels;
        &self.samples[offset..offset + self.channels]
    }

    /// Iterate one channel's samples across all rows
    pub fn channel(&self, ch: usize) -> impl Iterator<Item = i16> + '_ {
        self.samples
            .iter()
            .skip(ch)
            .step_by(self.channels)
            .copied()
    }

    /// Flat row-major view
    pub fn as_slice(&self) -> &[i16] {
        &self.samples
    }
}

/// One vendor-bulk frame for a single channel
#[derive(Debug, Clone)]
pub struct Frame {
    pub seq: u32,
    pub timestamp: u32,
    /// 0 or 1
    pub channel: u8,
    pub flags: u8,
    /// Declared sample count; payload is `samples * 2` bytes
    pub samples: u16,
    pub payload: Bytes,
    /// Header CRC16 matched (soft policy: the frame is delivered either way)
    pub crc_ok: bool,
}

impl Frame {
    /// Decode the payload as a single-channel sample column
    pub fn sample_column(&self) -> SampleMatrix {
        SampleMatrix::from_le_bytes(&self.payload, 1)
    }
}

/// Two frames, one per channel, for the same acquisition instant
#[derive(Debug, Clone)]
pub struct StereoPair {
    pub ch0: Frame,
    pub ch1: Frame,
}

/// Fully decoded CDC-path frame
#[derive(Debug, Clone)]
pub struct CdcFrame {
    pub version: u16,
    pub seq: u16,
    /// Device millisecond clock (big-endian on the wire)
    pub timestamp_ms: u32,
    pub flags: u16,
    pub kind: FrameKind,
    pub channels: u16,
    /// Samples per channel actually decoded
    pub total_samples: u32,
    /// Header-declared total, before window/fallback resolution
    pub header_total_samples: u16,
    /// Both header field orderings passed the plausibility predicate
    pub ambiguous_layout: bool,
    pub windows: Vec<Window>,
    pub data: SampleMatrix,
    /// CRC convention that matched the trailer; `None` when the frame kind
    /// carries no trailer or checking was disabled
    pub crc_variant: Option<CrcVariant>,
    /// Wire image: magic + header + table + payload + trailer
    pub raw: Vec<u8>,
}

impl CdcFrame {
    /// Diagnostic frames carry synthetic data, not acquisitions
    pub fn is_diagnostic(&self) -> bool {
        matches!(self.kind, FrameKind::DiagFake)
    }
}
