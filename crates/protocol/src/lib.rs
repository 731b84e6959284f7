//! Wire formats for the two-channel acquisition streaming protocol
//!
//! This crate holds the pure, I/O-free layer shared by both stream paths:
//!
//! - the CDC frame layout with its header field-order disambiguation,
//!   window tables and the multi-candidate CRC32 trailer conventions;
//! - the vendor-bulk 32-byte header with its soft CRC16 policy;
//! - the 64-byte STAT diagnostic snapshot;
//! - sample matrices, windows and stereo-pair types.
//!
//! Transports, deframing state machines and the USB session live in the
//! `client` crate; everything here operates on byte slices and is fully
//! testable without hardware.

pub mod cdc;
pub mod error;
pub mod frame;
pub mod integrity;
pub mod stat;
pub mod vendor;

pub use cdc::{CdcHeader, FrameKind};
pub use error::{ProtocolError, Result};
pub use integrity::{CrcVariant, crc16_ccitt_false, resolve_crc32};
pub use frame::{CdcFrame, Frame, SampleMatrix, StereoPair, Window};
pub use stat::{STAT_LEN, STAT_PREFIX, StatusBlock};
pub use vendor::{FrameClass, VendorHeader};
