use std::{
    error::Error,
    fmt::Display,
    io::{self},
    str::Utf8Error,
};

use crate::protocol::MessageTag;

/// Errors that may occur when receiving a message from a stream.
///
/// Clean end-of-stream at a frame boundary is its own variant so callers can
/// tell an orderly disconnect from a real failure without inspecting error
/// strings.
#[derive(Debug)]
pub enum WireError {
    IoError(io::Error),
    /// The peer closed the connection between frames.
    Eof,
    /// The length prefix exceeds the frame cap. The stream is unusable.
    FrameTooLarge { max: usize, got: usize },
    /// The payload declared a message type this implementation doesn't know.
    UnknownMessageType(u8),
    /// A well-formed message arrived where a different one was required.
    UnexpectedMessage { expected: MessageTag, got: MessageTag },
    /// The payload was shorter than its variant requires, carried an invalid
    /// field code, or was otherwise undecodable.
    Malformed(String),
}

impl From<io::Error> for WireError {
    fn from(value: io::Error) -> Self {
        WireError::IoError(value)
    }
}

impl From<Utf8Error> for WireError {
    fn from(value: Utf8Error) -> Self {
        WireError::Malformed(format!("invalid UTF-8: {}", value))
    }
}

impl Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WireError::IoError(error) => write!(f, "{}", error),
            WireError::Eof => write!(f, "connection closed"),
            WireError::FrameTooLarge { max, got } => {
                write!(f, "frame of {} bytes exceeds the {} byte cap", got, max)
            }
            WireError::UnknownMessageType(tag) => {
                write!(f, "unknown message type 0x{:02x}", tag)
            }
            WireError::UnexpectedMessage { expected, got } => {
                write!(f, "expected {} but received {}", expected, got)
            }
            WireError::Malformed(detail) => write!(f, "malformed payload: {}", detail),
        }
    }
}

impl Error for WireError {}
