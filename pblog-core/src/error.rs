//! Error types for event framing

use std::io;

use thiserror::Error;

/// Errors that can occur when building, encoding or decoding an event record
#[derive(Error, Debug)]
pub enum CodecError {
    /// Zero-length channel names are reserved for "no event"
    #[error("Channel name must not be empty")]
    EmptyChannel,

    /// A length field does not fit the 32-bit wire header
    #[error("{field} length {len} exceeds the 32-bit record limit")]
    TooLong { field: &'static str, len: usize },

    /// The stream ended inside a record
    #[error("Truncated record: expected {expected} bytes of {part}, got {actual}")]
    Truncated {
        part: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Channel bytes are not valid UTF-8
    #[error("Invalid channel name encoding")]
    InvalidChannel,

    #[error("I/O operation failed: {0}")]
    Io(#[from] io::Error),
}
