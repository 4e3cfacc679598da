//! Protocol error types.

use thiserror::Error;

/// Result alias for wire format operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while encoding or decoding messages.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Input ended before a declared field was complete
    #[error("truncated input: need {needed} bytes, {remaining} remaining")]
    Truncated {
        /// Bytes the field requires
        needed: usize,
        /// Bytes left in the input
        remaining: usize,
    },

    /// A string field did not hold UTF-8
    #[error("string field is not valid UTF-8")]
    InvalidUtf8,

    /// Header names a message type this protocol does not define
    #[error("unknown message type {0:#04x}")]
    UnknownMessageType(u8),

    /// An enumerated byte is outside its defined range
    #[error("invalid value {value} for {field}")]
    InvalidEnum {
        /// Name of the enumerated field
        field: &'static str,
        /// Byte that was read
        value: u8,
    },

    /// Body does not fit the 32-bit size field
    #[error("message body of {0} bytes exceeds the 32-bit size field")]
    LengthOverflow(usize),

    /// Header declares a total size smaller than the header itself
    #[error("declared message size {0} is smaller than the header")]
    UndersizedMessage(u32),
}
