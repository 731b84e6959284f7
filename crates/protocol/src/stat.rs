//! STAT diagnostic blocks
//!
//! Firmware interleaves fixed 64-byte status snapshots with frame data on
//! the bulk IN endpoint; the same layout is returned by the EP0 vendor
//! GET_STATUS request. The block has no frame magic, only the ASCII "STAT"
//! prefix, and is unrelated to frame sequencing.
//!
//! Layout (all little-endian):
//!
//! ```text
//! 0   "STAT"
//! 4   version: u8          5   flags: u8
//! 6   cur_samples: u16     8   frame_bytes: u16
//! 10  test_frames: u16     12  produced_seq: u32
//! 16  sent_ch0: u32        20  sent_ch1: u32
//! 24  uptime_ms: u32       28  errors: u16
//! 30  channels: u8         31  (reserved)
//! 32  tx_complete: u32     36  dma0: u32
//! 40  dma1: u32            44  write_idx: u32
//! 48  flags_rt: u16        50  flags2: u16    (bit15 = alt1)
//! 52  sending_ch: u8       53  reserved2: u8  (bit7 = out_armed)
//! 54  pair_idx: u16        56  last_tx_len: u16
//! 58  stream_seq: u32      62  (pad)
//! ```

use byteorder::{ByteOrder, LittleEndian};

/// Fixed STAT block length
pub const STAT_LEN: usize = 64;
/// ASCII prefix identifying a STAT block
pub const STAT_PREFIX: &[u8; 4] = b"STAT";

/// Parsed 64-byte firmware status snapshot
#[derive(Debug, Clone)]
pub struct StatusBlock {
    pub version: u8,
    pub flags: u8,
    /// Samples per channel per frame as currently configured
    pub cur_samples: u16,
    /// Total wire bytes per frame as currently configured
    pub frame_bytes: u16,
    pub test_frames: u16,
    pub produced_seq: u32,
    pub sent_ch0: u32,
    pub sent_ch1: u32,
    pub uptime_ms: u32,
    pub errors: u16,
    pub channels: u8,
    pub tx_complete: u32,
    pub dma0: u32,
    pub dma1: u32,
    pub write_idx: u32,
    pub flags_rt: u16,
    pub flags2: u16,
    pub sending_ch: u8,
    pub reserved2: u8,
    pub pair_idx: u16,
    pub last_tx_len: u16,
    pub stream_seq: u32,
    /// Raw wire image, kept for callers that want the untyped bytes
    pub raw: [u8; STAT_LEN],
}

impl StatusBlock {
    /// Parse a STAT block; returns `None` unless the prefix and length match
    pub fn parse(raw: &[u8]) -> Option<Self> {
        if raw.len() < STAT_LEN || &raw[..4] != STAT_PREFIX {
            return None;
        }
        let mut image = [0u8; STAT_LEN];
        image.copy_from_slice(&raw[..STAT_LEN]);
        Some(Self {
            version: raw[4],
            flags: raw[5],
            cur_samples: LittleEndian::read_u16(&raw[6..8]),
            frame_bytes: LittleEndian::read_u16(&raw[8..10]),
            test_frames: LittleEndian::read_u16(&raw[10..12]),
            produced_seq: LittleEndian::read_u32(&raw[12..16]),
            sent_ch0: LittleEndian::read_u32(&raw[16..20]),
            sent_ch1: LittleEndian::read_u32(&raw[20..24]),
            uptime_ms: LittleEndian::read_u32(&raw[24..28]),
            errors: LittleEndian::read_u16(&raw[28..30]),
            channels: raw[30],
            tx_complete: LittleEndian::read_u32(&raw[32..36]),
            dma0: LittleEndian::read_u32(&raw[36..40]),
            dma1: LittleEndian::read_u32(&raw[40..44]),
            write_idx: LittleEndian::read_u32(&raw[44..48]),
            flags_rt: LittleEndian::read_u16(&raw[48..50]),
            flags2: LittleEndian::read_u16(&raw[50..52]),
            sending_ch: raw[52],
            reserved2: raw[53],
            pair_idx: LittleEndian::read_u16(&raw[54..56]),
            last_tx_len: LittleEndian::read_u16(&raw[56..58]),
            stream_seq: LittleEndian::read_u32(&raw[58..62]),
            raw: image,
        })
    }

    /// Device confirmed the alternate setting took effect
    pub fn alt1(&self) -> bool {
        self.flags2 >> 15 & 1 == 1
    }

    /// Streaming pipeline is armed for bulk OUT/IN traffic
    pub fn out_armed(&self) -> bool {
        self.reserved2 >> 7 & 1 == 1
    }

    /// Both readiness bits, as polled after an alt-setting change
    pub fn readiness(&self) -> (bool, bool) {
        (self.alt1(), self.out_armed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stat_bytes() -> [u8; STAT_LEN] {
        let mut raw = [0u8; STAT_LEN];
        raw[..4].copy_from_slice(STAT_PREFIX);
        raw[4] = 2; // version
        LittleEndian::write_u16(&mut raw[6..8], 512); // cur_samples
        LittleEndian::write_u16(&mut raw[8..10], 1024); // frame_bytes
        LittleEndian::write_u32(&mut raw[12..16], 777); // produced_seq
        LittleEndian::write_u32(&mut raw[24..28], 60_000); // uptime_ms
        LittleEndian::write_u16(&mut raw[28..30], 3); // errors
        raw[30] = 2; // channels
        LittleEndian::write_u16(&mut raw[50..52], 0x8000); // alt1
        raw[53] = 0x80; // out_armed
        raw
    }

    #[test]
    fn test_parse_documented_offsets() {
        let st = StatusBlock::parse(&stat_bytes()).unwrap();
        assert_eq!(st.version, 2);
        assert_eq!(st.cur_samples, 512);
        assert_eq!(st.frame_bytes, 1024);
        assert_eq!(st.produced_seq, 777);
        assert_eq!(st.uptime_ms, 60_000);
        assert_eq!(st.errors, 3);
        assert_eq!(st.channels, 2);
    }

    #[test]
    fn test_readiness_bits() {
        let mut raw = stat_bytes();
        let st = StatusBlock::parse(&raw).unwrap();
        assert_eq!(st.readiness(), (true, true));

        LittleEndian::write_u16(&mut raw[50..52], 0x7FFF);
        raw[53] = 0x7F;
        let st = StatusBlock::parse(&raw).unwrap();
        assert_eq!(st.readiness(), (false, false));
    }

    #[test]
    fn test_parse_rejects_short_or_unprefixed() {
        assert!(StatusBlock::parse(&stat_bytes()[..32]).is_none());
        let mut raw = stat_bytes();
        raw[0] = b'X';
        assert!(StatusBlock::parse(&raw).is_none());
    }
}
