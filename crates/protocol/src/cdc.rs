//! CDC-path frame layout
//!
//! A frame on the CDC serial stream is: 2-byte magic, 16-byte header, an
//! optional window table (or 4-byte prelude), a little-endian `i16` payload
//! and, for most frame kinds, a 4-byte CRC32 trailer.
//!
//! Two adjacent header fields (offsets 2 and 14) hold the total sample count
//! and the window-table byte count, but firmware revisions disagree on which
//! is which. [`CdcHeader::parse`] resolves the ordering with a plausibility
//! predicate on the table-byte candidate and flags headers where both
//! orderings are plausible instead of asserting a single layout.

use crate::integrity::CrcVariant;
use crate::error::{ProtocolError, Result};
use crate::frame::Window;
use byteorder::{BigEndian, ByteOrder, LittleEndian};

/// Frame sync magic on the CDC stream
pub const MAGIC: [u8; 2] = [0x5A, 0xA5];
/// Byte-swapped magic occasionally emitted by reflashed devices
pub const ALT_MAGIC: [u8; 2] = [0xA5, 0x5A];

/// Header length, excluding the magic
pub const HEADER_LEN: usize = 16;
/// Upper bound on samples per channel in any frame
pub const MAX_SAMPLES: u32 = 32768;
/// Upper bound on the window-table byte count
pub const MAX_TABLE_BYTES: u16 = 4096;
/// Hard cap for the fallback CRC-delimited payload scan
pub const MAX_FALLBACK_PAYLOAD: usize = 65536;
/// Growth step for the fallback scan
pub const FALLBACK_STEP: usize = 32;
/// Fixed sample count of a diagnostic frame
pub const DIAG_SAMPLES: u16 = 128;
/// Fixed channel count of a diagnostic frame
pub const DIAG_CHANNELS: u16 = 2;

/// Flag bit: per-channel offset/length layout
pub const FMT_PER_CHANNEL: u16 = 0x0004;
/// Flag bit: diagnostic frame (with channels == 0)
pub const FMT_DIAG: u16 = 0x0080;
/// Flag bit: special 4-byte-prelude format
pub const FMT_SPECIAL: u16 = 0x1000;

/// How a frame's sample layout is described
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Fixed 128 samples x 2 channels, no CRC trailer
    DiagFake,
    /// Each channel's own offset (and optionally length) in a small table
    PerChannel,
    /// 4-byte prelude with two u16 length candidates, no CRC trailer
    Special,
    /// Table of (start, length) windows
    Windowed,
    /// No table; a single implicit window spans the declared length
    ZeroTable,
}

/// Table-byte plausibility: zero, or a multiple of 4 up to 4096
pub fn plausible_table_bytes(value: u16) -> bool {
    value == 0 || (value % 4 == 0 && value <= MAX_TABLE_BYTES)
}

/// Per-channel sample counts must stay within (0, 32768]
pub fn reasonable_samples(value: u32) -> bool {
    value > 0 && value <= MAX_SAMPLES
}

/// Parsed 16-byte CDC header with the field-order ambiguity resolved
#[derive(Debug, Clone, Copy)]
pub struct CdcHeader {
    pub version: u16,
    /// Device millisecond clock; big-endian on the wire
    pub timestamp_ms: u32,
    pub seq: u16,
    pub flags: u16,
    /// Channel count as declared (0 for diagnostic frames)
    pub channels_raw: u16,
    /// Resolved total-samples field
    pub total_samples: u16,
    /// Resolved table-bytes field
    pub table_bytes: u16,
    /// Both field orderings passed the plausibility predicate
    pub ambiguous_layout: bool,
}

impl CdcHeader {
    /// Parse a header, resolving the total/table field-order ambiguity
    ///
    /// Primary orientation: total at offset 2, table bytes at offset 14.
    /// If exactly one orientation yields a plausible table-byte value, that
    /// orientation wins; on a tie (both or neither) the primary is used.
    pub fn parse(raw: &[u8; HEADER_LEN]) -> Self {
        let version = LittleEndian::read_u16(&raw[0..2]);
        let field_a = LittleEndian::read_u16(&raw[2..4]);
        let timestamp_ms = BigEndian::read_u32(&raw[4..8]);
        let seq = LittleEndian::read_u16(&raw[8..10]);
        let flags = LittleEndian::read_u16(&raw[10..12]);
        let channels_raw = LittleEndian::read_u16(&raw[12..14]);
        let field_b = LittleEndian::read_u16(&raw[14..16]);

        let primary_ok = plausible_table_bytes(field_b);
        let swapped_ok = plausible_table_bytes(field_a);
        let (total_samples, table_bytes) = if swapped_ok && !primary_ok {
            (field_b, field_a)
        } else {
            (field_a, field_b)
        };

        Self {
            version,
            timestamp_ms,
            seq,
            flags,
            channels_raw,
            total_samples,
            table_bytes,
            ambiguous_layout: primary_ok && swapped_ok,
        }
    }

    /// Frame kind selected by the flag bits and resolved table size
    pub fn kind(&self) -> FrameKind {
        if self.flags & FMT_DIAG != 0 && self.channels_raw == 0 {
            FrameKind::DiagFake
        } else if self.flags & FMT_PER_CHANNEL != 0 {
            FrameKind::PerChannel
        } else if self.flags & FMT_SPECIAL != 0 {
            FrameKind::Special
        } else if self.table_bytes == 0 {
            FrameKind::ZeroTable
        } else {
            FrameKind::Windowed
        }
    }

    /// Effective channel count (diagnostic frames are two-channel)
    pub fn channels(&self) -> u16 {
        if self.kind() == FrameKind::DiagFake {
            DIAG_CHANNELS
        } else {
            self.channels_raw
        }
    }
}

/// Parse a window table of little-endian (start, length) pairs
pub fn parse_window_table(table: &[u8]) -> Result<Vec<Window>> {
    if table.len() % 4 != 0 {
        return Err(ProtocolError::Length(format!(
            "window table length {} not a multiple of 4",
            table.len()
        )));
    }
    Ok(table
        .chunks_exact(4)
        .map(|c| Window::new(LittleEndian::read_u16(&c[0..2]), LittleEndian::read_u16(&c[2..4])))
        .collect())
}

/// Resolve the per-channel sample count of a window table
///
/// The documented count is the sum of window lengths. Some revisions store
/// end offsets instead, so when the sum is implausible but the sum of
/// `length - start` is plausible, the difference interpretation is used.
/// Returns the chosen count and whether the difference form was taken.
pub fn resolve_window_count(windows: &[Window]) -> (u32, bool) {
    let sum: u32 = windows.iter().map(|w| w.length as u32).sum();
    let alt: u32 = windows
        .iter()
        .filter(|w| w.length >= w.start)
        .map(|w| (w.length - w.start) as u32)
        .sum();
    if !reasonable_samples(sum) && reasonable_samples(alt) {
        (alt, true)
    } else {
        (sum, false)
    }
}

/// Pick the sample count from a special-format 4-byte prelude
///
/// The prelude holds two u16 fields `(s, v)`; the candidates are `v` and
/// `v - s`, tried larger-first, and the first within (0, 32768] wins.
pub fn resolve_special_len(prelude: &[u8; 4]) -> Option<u32> {
    let s = LittleEndian::read_u16(&prelude[0..2]) as u32;
    let v = LittleEndian::read_u16(&prelude[2..4]) as u32;
    let mut candidates = Vec::with_capacity(2);
    if v > 0 {
        candidates.push(v);
    }
    if v >= s {
        candidates.push(v - s);
    }
    candidates.into_iter().find(|&len| reasonable_samples(len))
}

/// Encode a 16-byte header in the primary field orientation
pub fn encode_header(
    version: u16,
    total_samples: u16,
    timestamp_ms: u32,
    seq: u16,
    flags: u16,
    channels: u16,
    table_bytes: u16,
) -> [u8; HEADER_LEN] {
    let mut raw = [0u8; HEADER_LEN];
    LittleEndian::write_u16(&mut raw[0..2], version);
    LittleEndian::write_u16(&mut raw[2..4], total_samples);
    BigEndian::write_u32(&mut raw[4..8], timestamp_ms);
    LittleEndian::write_u16(&mut raw[8..10], seq);
    LittleEndian::write_u16(&mut raw[10..12], flags);
    LittleEndian::write_u16(&mut raw[12..14], channels);
    LittleEndian::write_u16(&mut raw[14..16], table_bytes);
    raw
}

/// Encode a complete generic-windowed frame with the given CRC convention
///
/// `samples` is row-major `rows x channels` and must match the window sum.
/// Intended for synthetic streams in tests and loopback tooling.
pub fn encode_windowed_frame(
    seq: u16,
    channels: u16,
    windows: &[Window],
    samples: &[i16],
    variant: CrcVariant,
) -> Vec<u8> {
    let total: u32 = windows.iter().map(|w| w.length as u32).sum();
    debug_assert_eq!(samples.len() as u32, total * channels as u32);

    let table_bytes = (windows.len() * 4) as u16;
    let header = encode_header(1, total as u16, 0, seq, 0, channels, table_bytes);

    let mut table = Vec::with_capacity(windows.len() * 4);
    for w in windows {
        table.extend_from_slice(&w.start.to_le_bytes());
        table.extend_from_slice(&w.length.to_le_bytes());
    }

    let mut payload = Vec::with_capacity(samples.len() * 2);
    for s in samples {
        payload.extend_from_slice(&s.to_le_bytes());
    }

    let crc = variant.compute(&MAGIC, &header, &table, &payload);

    let mut out = Vec::with_capacity(2 + HEADER_LEN + table.len() + payload.len() + 4);
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&header);
    out.extend_from_slice(&table);
    out.extend_from_slice(&payload);
    out.extend_from_slice(&crc.to_le_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plausible_table_bytes() {
        assert!(plausible_table_bytes(0));
        assert!(plausible_table_bytes(4));
        assert!(plausible_table_bytes(4096));
        assert!(!plausible_table_bytes(3));
        assert!(!plausible_table_bytes(4100));
    }

    #[test]
    fn test_header_disambiguation_either_order() {
        // 511 is implausible as a table size, 8 is plausible
        let primary = encode_header(1, 511, 0, 9, 0, 2, 8);
        let parsed = CdcHeader::parse(&primary);
        assert_eq!(parsed.total_samples, 511);
        assert_eq!(parsed.table_bytes, 8);
        assert!(!parsed.ambiguous_layout);

        // Same values with the two fields physically swapped
        let swapped = encode_header(1, 8, 0, 9, 0, 2, 511);
        let parsed = CdcHeader::parse(&swapped);
        assert_eq!(parsed.total_samples, 511);
        assert_eq!(parsed.table_bytes, 8);
        assert!(!parsed.ambiguous_layout);
    }

    #[test]
    fn test_header_tie_uses_primary_orientation() {
        // Both 8 and 16 are plausible table sizes
        let raw = encode_header(1, 16, 0, 0, 0, 2, 8);
        let parsed = CdcHeader::parse(&raw);
        assert_eq!(parsed.total_samples, 16);
        assert_eq!(parsed.table_bytes, 8);
        assert!(parsed.ambiguous_layout);
    }

    #[test]
    fn test_kind_selection() {
        let diag = CdcHeader::parse(&encode_header(1, 0, 0, 0, FMT_DIAG, 0, 0));
        assert_eq!(diag.kind(), FrameKind::DiagFake);
        assert_eq!(diag.channels(), 2);

        // Diagnostic bit with a nonzero channel count is not a fake frame
        let not_diag = CdcHeader::parse(&encode_header(1, 100, 0, 0, FMT_DIAG, 2, 0));
        assert_eq!(not_diag.kind(), FrameKind::ZeroTable);

        let per_ch = CdcHeader::parse(&encode_header(1, 100, 0, 0, FMT_PER_CHANNEL, 2, 0));
        assert_eq!(per_ch.kind(), FrameKind::PerChannel);

        // Per-channel wins over special when both bits are set
        let both = CdcHeader::parse(&encode_header(
            1,
            100,
            0,
            0,
            FMT_PER_CHANNEL | FMT_SPECIAL,
            2,
            0,
        ));
        assert_eq!(both.kind(), FrameKind::PerChannel);

        let special = CdcHeader::parse(&encode_header(1, 100, 0, 0, FMT_SPECIAL, 2, 0));
        assert_eq!(special.kind(), FrameKind::Special);

        let windowed = CdcHeader::parse(&encode_header(1, 100, 0, 0, 0, 2, 8));
        assert_eq!(windowed.kind(), FrameKind::Windowed);
    }

    #[test]
    fn test_window_count_sum_vs_difference() {
        // Plain lengths: sum is plausible
        let wins = [Window::new(0, 256), Window::new(512, 256)];
        assert_eq!(resolve_window_count(&wins), (512, false));

        // End-offset style: sum of lengths blows past 32768, but the
        // difference form is plausible
        let wins = [Window::new(32000, 32256), Window::new(33000, 33512)];
        assert_eq!(resolve_window_count(&wins), (256 + 512, true));
    }

    #[test]
    fn test_special_prelude_prefers_larger_candidate() {
        let mut prelude = [0u8; 4];
        LittleEndian::write_u16(&mut prelude[0..2], 100);
        LittleEndian::write_u16(&mut prelude[2..4], 612);
        assert_eq!(resolve_special_len(&prelude), Some(612));

        // v out of range, v - s in range
        let mut prelude = [0u8; 4];
        LittleEndian::write_u16(&mut prelude[0..2], 33000);
        LittleEndian::write_u16(&mut prelude[2..4], 33512);
        assert_eq!(resolve_special_len(&prelude), Some(512));

        // Neither candidate usable
        let mut prelude = [0u8; 4];
        LittleEndian::write_u16(&mut prelude[0..2], 5);
        LittleEndian::write_u16(&mut prelude[2..4], 0);
        assert_eq!(resolve_special_len(&prelude), None);
    }

    #[test]
    fn test_window_table_parse_rejects_ragged_length() {
        assert!(parse_window_table(&[0, 0, 4]).is_err());
        let wins = parse_window_table(&[0, 0, 4, 0, 16, 0, 8, 0]).unwrap();
        assert_eq!(wins, vec![Window::new(0, 4), Window::new(16, 8)]);
    }
}
