//! Length-prefixed binary request/response protocol.
//!
//! Requests are `u32 payload_len` then a payload of `u32 num_args` and
//! `num_args` length-prefixed byte strings. Responses are `u32 payload_len`
//! then one tag-prefixed typed value, which may be composite. Everything on
//! the wire is little-endian.
//!
//! Parsing is zero-copy: [`Request::parse`] borrows argument slices from the
//! input buffer and reports how many bytes one complete frame consumed, so a
//! connection can peel requests off its read buffer in place.

pub mod error;
pub mod request;
pub mod value;

pub use error::ParseError;
pub use request::{Request, put_request};
pub use value::{ErrorCode, Value, begin_response, end_response};

/// Frame header size: the `u32` payload length.
pub const HEADER_LEN: usize = 4;

/// Largest accepted request or response payload.
pub const MAX_MSG: usize = 32 << 20;

/// Largest accepted argument count in one request.
pub const MAX_ARGS: usize = 200_000;
