//! Vendor-bulk frame layout
//!
//! The vendor bulk IN endpoint carries fixed 32-byte headers followed by a
//! `total_samples * 2` byte little-endian payload. The header CRC16 is
//! CRC16-CCITT(FALSE) over the header minus its trailer plus the payload.
//! Validation is soft on this path: the transport is lossy by design, so a
//! mismatch is counted but the frame is still delivered.

use crate::integrity::crc16_ccitt_false;
use crate::error::{ProtocolError, Result};
use crate::frame::Window;
use byteorder::{ByteOrder, LittleEndian};

/// Frame magic; little-endian on the wire (bytes 5A A5)
pub const MAGIC: u16 = 0xA55A;
/// Wire image of the magic
pub const MAGIC_BYTES: [u8; 2] = [0x5A, 0xA5];
/// Fixed header length including the CRC16 trailer
pub const HEADER_LEN: usize = 32;

/// Flag bit: frame belongs to channel 0
pub const FLAG_CH0: u8 = 0x01;
/// Flag bit: frame belongs to channel 1
pub const FLAG_CH1: u8 = 0x02;
/// Flag bit: header CRC16 trailer is populated
pub const FLAG_CRC: u8 = 0x04;
/// Flag bit: heartbeat/diagnostic frame
pub const FLAG_TEST: u8 = 0x80;

/// What a frame's flag bits say about its destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameClass {
    /// Regular data frame for channel 0 or 1
    Channel(u8),
    /// TEST bit with no channel bits: heartbeat carrying synthetic data
    Test,
    /// No channel and no TEST bit; dropped
    Unknown,
}

/// Classify flag bits into a frame destination
///
/// A TEST bit combined with a channel bit marks a diagnostic variant of a
/// regular channel frame and is classified as that channel.
pub fn classify_flags(flags: u8) -> FrameClass {
    if flags & FLAG_CH0 != 0 {
        FrameClass::Channel(0)
    } else if flags & FLAG_CH1 != 0 {
        FrameClass::Channel(1)
    } else if flags & FLAG_TEST != 0 {
        FrameClass::Test
    } else {
        FrameClass::Unknown
    }
}

/// Parsed 32-byte vendor-bulk header
#[derive(Debug, Clone, Copy)]
pub struct VendorHeader {
    pub version: u8,
    pub flags: u8,
    pub seq: u32,
    pub timestamp: u32,
    pub total_samples: u16,
    pub zone_count: u16,
    pub zone1_offset: u32,
    pub zone1_length: u32,
    pub reserved: u32,
    pub reserved2: u16,
    pub crc16: u16,
}

impl VendorHeader {
    /// Parse a header from the first 32 bytes of `raw`
    pub fn parse(raw: &[u8]) -> Result<Self> {
        if raw.len() < HEADER_LEN {
            return Err(ProtocolError::Truncated {
                needed: HEADER_LEN,
                got: raw.len(),
            });
        }
        let magic = LittleEndian::read_u16(&raw[0..2]);
        if magic != MAGIC {
            return Err(ProtocolError::BadMagic {
                found: magic,
                expected: MAGIC,
            });
        }
        Ok(Self {
            version: raw[2],
            flags: raw[3],
            seq: LittleEndian::read_u32(&raw[4..8]),
            timestamp: LittleEndian::read_u32(&raw[8..12]),
            total_samples: LittleEndian::read_u16(&raw[12..14]),
            zone_count: LittleEndian::read_u16(&raw[14..16]),
            zone1_offset: LittleEndian::read_u32(&raw[16..20]),
            zone1_length: LittleEndian::read_u32(&raw[20..24]),
            reserved: LittleEndian::read_u32(&raw[24..28]),
            reserved2: LittleEndian::read_u16(&raw[28..30]),
            crc16: LittleEndian::read_u16(&raw[30..32]),
        })
    }

    /// Payload length in bytes
    pub fn payload_len(&self) -> usize {
        self.total_samples as usize * 2
    }

    /// Total frame length on the wire
    pub fn frame_len(&self) -> usize {
        HEADER_LEN + self.payload_len()
    }

    /// Destination class from the flag bits
    pub fn class(&self) -> FrameClass {
        classify_flags(self.flags)
    }

    /// The captured sub-range this frame covers
    pub fn zone(&self) -> Window {
        Window::new(self.zone1_offset as u16, self.zone1_length as u16)
    }

    /// Whether the CRC16 trailer is populated
    pub fn has_crc(&self) -> bool {
        self.flags & FLAG_CRC != 0
    }
}

/// Verify the header CRC16 against the header bytes and payload
///
/// `header` must be the full 32 wire bytes; the CRC covers the first 30.
pub fn verify_crc16(header: &[u8], payload: &[u8]) -> bool {
    if header.len() < HEADER_LEN {
        return false;
    }
    let expected = LittleEndian::read_u16(&header[30..32]);
    crc16_ccitt_false(&[&header[..30], payload]) == expected
}

/// Encode a wire-exact frame, for synthetic streams and tests
pub fn encode_frame(
    seq: u32,
    timestamp: u32,
    flags: u8,
    zone: Window,
    samples: &[i16],
) -> Vec<u8> {
    let mut header = [0u8; HEADER_LEN];
    LittleEndian::write_u16(&mut header[0..2], MAGIC);
    header[2] = 1; // version
    header[3] = flags;
    LittleEndian::write_u32(&mut header[4..8], seq);
    LittleEndian::write_u32(&mut header[8..12], timestamp);
    LittleEndian::write_u16(&mut header[12..14], samples.len() as u16);
    LittleEndian::write_u16(&mut header[14..16], 1);
    LittleEndian::write_u32(&mut header[16..20], zone.start as u32);
    LittleEndian::write_u32(&mut header[20..24], zone.length as u32);

    let mut payload = Vec::with_capacity(samples.len() * 2);
    for s in samples {
        payload.extend_from_slice(&s.to_le_bytes());
    }

    if flags & FLAG_CRC != 0 {
        let crc = crc16_ccitt_false(&[&header[..30], &payload]);
        LittleEndian::write_u16(&mut header[30..32], crc);
    }

    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(&header);
    out.extend_from_slice(&payload);
    out
}
