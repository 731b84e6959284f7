//! Protocol error types

use thiserror::Error;

/// Errors from pure wire-format parsing
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Input shorter than the structure being parsed
    #[error("truncated input: needed {needed} bytes, got {got}")]
    Truncated { needed: usize, got: usize },

    /// Magic bytes at the expected position do not match
    #[error("bad magic: found {found:#06x}, expected {expected:#06x}")]
    BadMagic { found: u16, expected: u16 },

    /// A declared count or size fails its plausibility bounds
    #[error("implausible length: {0}")]
    Length(String),
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;
