//! Client error taxonomy
//!
//! Recoverable and fatal conditions are distinguished at the type level:
//! timeouts, framing, length and CRC failures are retried by the decoder's
//! resync loop; device loss is fatal for the session and surfaced as polled
//! state; busy is transient; a failed command is logged and the session
//! continues.

use thiserror::Error;

/// Errors surfaced by transports, the decoder and the session controller
#[derive(Debug, Error)]
pub enum ClientError {
    /// A read deadline elapsed without collecting the requested bytes
    #[error("transport timeout while reading {0}")]
    TransportTimeout(&'static str),

    /// Magic or header could not be parsed; resync and retry
    #[error("framing error: {0}")]
    Framing(String),

    /// A declared count failed its plausibility bounds
    #[error("implausible length: {0}")]
    Length(String),

    /// No CRC candidate matched the trailer (CDC path, hard-rejecting)
    #[error("CRC mismatch: {0}")]
    CrcMismatch(String),

    /// The device dropped off the bus (EIO/ENODEV/EPIPE); fatal for the
    /// session, also exposed as polled `disconnected` state
    #[error("device lost: {0}")]
    DeviceLost(rusb::Error),

    /// Transient EBUSY; retried
    #[error("device busy")]
    DeviceBusy,

    /// A bulk command write exhausted its retries
    #[error("command {opcode:#04x} failed after {attempts} attempts: {source}")]
    CommandFailure {
        opcode: u8,
        attempts: u32,
        source: rusb::Error,
    },

    /// No device matched discovery
    #[error("no matching device found")]
    NoDevice,

    /// The device is present but lacks the required bulk endpoint pair
    #[error("no suitable interface: {0}")]
    NoInterface(String),

    /// Other USB-level failure
    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),

    /// Serial port failure on the CDC path
    #[error("serial error: {0}")]
    Serial(#[from] serialport::Error),

    /// I/O failure on the CDC path
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Pure parsing failure bubbled up from the protocol layer
    #[error("protocol error: {0}")]
    Protocol(#[from] protocol::ProtocolError),
}

impl ClientError {
    /// Whether the decoder's resync loop may retry after this error
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ClientError::TransportTimeout(_)
                | ClientError::Framing(_)
                | ClientError::Length(_)
                | ClientError::CrcMismatch(_)
                | ClientError::DeviceBusy
                | ClientError::Protocol(_)
        )
    }
}

/// Map a rusb error to the session taxonomy
pub fn classify_usb_error(err: rusb::Error) -> ClientError {
    match err {
        rusb::Error::Io | rusb::Error::NoDevice | rusb::Error::Pipe => ClientError::DeviceLost(err),
        rusb::Error::Busy => ClientError::DeviceBusy,
        other => ClientError::Usb(other),
    }
}

/// Type alias for client results
pub type Result<T> = std::result::Result<T, ClientError>;
