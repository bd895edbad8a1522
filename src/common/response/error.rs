// src/common/response/error.rs

use core::fmt;

/// Error type specific to typed response decoding.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ResponseParseError {
    /// Response carried no bytes at all (not even a status byte).
    EmptyInput,
    /// Payload is shorter than the command's response shape requires.
    TooShort { expected: usize, got: usize },
}

impl fmt::Display for ResponseParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseParseError::EmptyInput => write!(f, "empty response"),
            ResponseParseError::TooShort { expected, got } => {
                write!(f, "response payload too short: expected {} bytes, got {}", expected, got)
            }
        }
    }
}

impl std::error::Error for ResponseParseError {}
