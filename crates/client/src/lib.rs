//! Host-side client for the two-channel acquisition streaming device
//!
//! Two transports carry the same sample data:
//!
//! - **CDC serial**: request/response framing decoded by [`FrameDecoder`]
//!   over a [`ByteStreamReader`], with magic resynchronization and the
//!   multi-candidate CRC trailer conventions.
//! - **USB vendor bulk**: a continuous byte stream deframed opportunistically
//!   by [`ContinuousDeframer`], reassembled into stereo pairs and supervised
//!   by [`SessionController`] with watchdog-driven auto-recovery.
//!
//! ```no_run
//! use client::SessionController;
//! use common::StreamConfig;
//! use std::time::Duration;
//!
//! let session = SessionController::open(StreamConfig::default())?;
//! while !session.disconnected() {
//!     if let Some(pair) = session.get_stereo(Duration::from_millis(100)) {
//!         println!("seq={} samples={}", pair.ch0.seq, pair.ch0.samples);
//!     }
//! }
//! session.close();
//! # Ok::<(), client::ClientError>(())
//! ```

pub mod commands;
pub mod decoder;
pub mod deframer;
pub mod error;
pub mod reader;
pub mod serial;
pub mod session;
pub mod stereo;
pub mod watchdog;

#[cfg(test)]
mod test_support;

pub use commands::Command;
pub use decoder::{CrcPolicy, DecodeOptions, FrameDecoder};
pub use deframer::{ContinuousDeframer, DeframeEvent, DeframerCounters};
pub use error::{ClientError, Result};
pub use reader::{ByteStreamReader, ByteTransport, MagicKind};
pub use serial::{CdcResponse, SerialTransport};
pub use session::{CounterSnapshot, PortInfo, SessionController};
pub use stereo::{StereoAssembler, StereoQueue};
pub use watchdog::{Watchdog, WatchdogAction};
