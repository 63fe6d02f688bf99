//! Parse errors, split by how the connection must react.

use thiserror::Error;

/// Why a buffer failed to parse.
///
/// [`ParseError::is_fatal`] separates framing violations, which close the
/// connection, from malformed payloads, which produce an error reply and
/// leave the connection open.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// More bytes are needed; not an error, just try again later.
    #[error("incomplete frame")]
    Incomplete,

    /// The frame header announces a payload over the message limit.
    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },

    /// The payload announces more arguments than the protocol allows.
    #[error("request declares {count} arguments, limit is {max}")]
    TooManyArgs { count: usize, max: usize },

    /// The payload under- or over-consumes its declared length, or a typed
    /// value is structurally invalid.
    #[error("malformed payload")]
    Malformed,

    /// A typed value carries a tag outside the protocol.
    #[error("unknown value tag {0}")]
    UnknownTag(u8),
}

impl ParseError {
    /// True when the connection cannot be trusted to stay framed and must
    /// be closed.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ParseError::FrameTooLarge { .. } | ParseError::TooManyArgs { .. }
        )
    }
}
