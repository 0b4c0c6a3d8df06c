//! Error types for protocol operations

use thiserror::Error;

/// Protocol-specific errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Leading type byte does not name a known message
    #[error("Unknown message type: {0}")]
    UnknownMessageType(u8),

    /// Message carries no type byte at all
    #[error("Empty message")]
    EmptyMessage,

    /// Message was not of the type the current phase expects
    #[error("Unexpected message type: expected {expected}, got {actual}")]
    UnexpectedMessage {
        /// Expected message type name
        expected: &'static str,
        /// Received message type name
        actual: &'static str,
    },

    /// Greeting option is truncated or declares more bytes than remain
    #[error("Malformed greeting option {option_type}: {reason}")]
    MalformedOption {
        /// Option type byte
        option_type: u8,
        /// What was wrong with it
        reason: String,
    },

    /// Fixed-size field runs past the end of the message
    #[error("Truncated {field}: need {needed} bytes, {remaining} remaining")]
    Truncated {
        /// Field being decoded
        field: &'static str,
        /// Bytes the field needs
        needed: usize,
        /// Bytes left in the message
        remaining: usize,
    },

    /// String field is not valid UTF-8
    #[error("Invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),

    /// Option value does not fit the one-byte length field
    #[error("Greeting option too long: {0} bytes (max: 255)")]
    OptionTooLong(usize),

    /// Frame too large
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Actual frame size
        size: usize,
        /// Maximum allowed size
        max: usize,
    },

    /// Outbound buffer is shorter than the reserved frame header
    #[error("Buffer of {0} bytes has no reserved frame header")]
    MissingHeader(usize),

    /// Stream ended in the middle of a frame
    #[error("Stream ended inside a frame ({0} bytes buffered)")]
    TruncatedFrame(usize),

    /// I/O error from the underlying stream
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
