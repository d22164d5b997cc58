//! Error types for data parsing in blebridge-types.

use thiserror::Error;

/// Errors that can occur when parsing advertisement payloads.
///
/// This error type is platform-agnostic and does not include
/// BLE-specific errors (those belong in blebridge-core).
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ParseError {
    /// An AD structure declares more bytes than remain in the payload.
    #[error("Truncated AD structure at offset {offset}: needs {needed} bytes, {available} available")]
    Truncated {
        /// Offset of the length byte of the offending structure.
        offset: usize,
        /// Bytes declared by the length byte.
        needed: usize,
        /// Bytes actually remaining after the length byte.
        available: usize,
    },

    /// A value could not be interpreted.
    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

/// Result type alias using blebridge-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
