//! Device command opcodes and payload builders
//!
//! The vendor-bulk path sends a single opcode byte plus payload over bulk
//! OUT with no response; `SET_ALT`, `GET_STATUS` and the resets go over EP0
//! vendor control transfers. The CDC path has its own small command set with
//! ACK/NACK/STATUS responses.

/// Bulk OUT: full-range capture mode, payload `u8` (0/1)
pub const SET_FULL_MODE: u8 = 0x13;
/// Bulk OUT: acquisition profile, payload `u8`
pub const SET_PROFILE: u8 = 0x14;
/// Bulk OUT: samples per channel per frame, payload `u16` LE
pub const SET_FRAME_SAMPLES: u8 = 0x17;
/// Bulk OUT: start streaming, empty payload
pub const START_STREAM: u8 = 0x20;
/// Bulk OUT: stop streaming, empty payload
pub const STOP_STREAM: u8 = 0x21;

/// EP0 vendor IN: read a 64-byte STAT snapshot
pub const GET_STATUS: u8 = 0x30;
/// EP0 vendor OUT: set the interface alternate setting
pub const SET_ALT: u8 = 0x31;
/// EP0 vendor OUT: restart the streaming pipeline, keep USB state
pub const SOFT_RESET: u8 = 0x7E;
/// EP0 vendor OUT: full firmware restart
pub const DEEP_RESET: u8 = 0x7F;

/// A bulk-OUT command with its encoded payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    SetProfile(u8),
    SetFullMode(bool),
    SetFrameSamples(u16),
    StartStream,
    StopStream,
}

impl Command {
    pub fn opcode(&self) -> u8 {
        match self {
            Command::SetProfile(_) => SET_PROFILE,
            Command::SetFullMode(_) => SET_FULL_MODE,
            Command::SetFrameSamples(_) => SET_FRAME_SAMPLES,
            Command::StartStream => START_STREAM,
            Command::StopStream => STOP_STREAM,
        }
    }

    /// Wire image: opcode byte followed by the payload
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Command::SetProfile(profile) => vec![SET_PROFILE, *profile],
            Command::SetFullMode(full) => vec![SET_FULL_MODE, u8::from(*full)],
            Command::SetFrameSamples(samples) => {
                let mut out = vec![SET_FRAME_SAMPLES];
                out.extend_from_slice(&(*samples).max(1).to_le_bytes());
                out
            }
            Command::StartStream => vec![START_STREAM],
            Command::StopStream => vec![STOP_STREAM],
        }
    }
}

/// CDC serial command channel
pub mod cdc {
    /// Liveness probe
    pub const PING: u8 = 0x01;
    /// Capture windows, payload start0/len0/start1/len1 as `u16` LE
    pub const SET_WINDOWS: u8 = 0x10;
    /// Frame rate in Hz, payload `u16` LE (0xFFFF = maximum)
    pub const SET_BLOCK_HZ: u8 = 0x11;
    pub const START: u8 = 0x20;
    pub const STOP: u8 = 0x21;
    pub const GET_STATUS: u8 = 0x30;

    /// Response ids on the CDC stream
    pub const RSP_ACK: u8 = 0x80;
    pub const RSP_NACK: u8 = 0x81;
    pub const RSP_STATUS: u8 = 0x82;

    /// Encode a SET_WINDOWS command for both channels
    pub fn set_windows(start0: u16, len0: u16, start1: u16, len1: u16) -> Vec<u8> {
        let mut out = vec![SET_WINDOWS];
        for v in [start0, len0, start1, len1] {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out
    }

    /// Encode a SET_BLOCK_HZ command
    pub fn set_block_hz(hz: u16) -> Vec<u8> {
        let mut out = vec![SET_BLOCK_HZ];
        out.extend_from_slice(&hz.to_le_bytes());
        out
    }
}
