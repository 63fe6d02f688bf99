//! Request framing and parsing.

use crate::error::ParseError;
use crate::{HEADER_LEN, MAX_ARGS, MAX_MSG};
use bytes::{BufMut, BytesMut};

/// One parsed request: the argument list, borrowed from the input buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request<'a> {
    pub args: Vec<&'a [u8]>,
}

impl<'a> Request<'a> {
    /// Parse one complete frame from the front of `buffer`.
    ///
    /// Returns the request and the number of bytes it consumed, so the
    /// caller can advance its read buffer and try for the next pipelined
    /// frame. [`ParseError::Incomplete`] means wait for more bytes; fatal
    /// errors (see [`ParseError::is_fatal`]) mean the stream can no longer
    /// be trusted to stay framed.
    pub fn parse(buffer: &'a [u8]) -> Result<(Self, usize), ParseError> {
        if buffer.len() < HEADER_LEN {
            return Err(ParseError::Incomplete);
        }
        let payload_len = read_u32(buffer) as usize;
        if payload_len > MAX_MSG {
            return Err(ParseError::FrameTooLarge {
                len: payload_len,
                max: MAX_MSG,
            });
        }
        if buffer.len() < HEADER_LEN + payload_len {
            return Err(ParseError::Incomplete);
        }
        let payload = &buffer[HEADER_LEN..HEADER_LEN + payload_len];
        let args = parse_payload(payload)?;
        Ok((Self { args }, HEADER_LEN + payload_len))
    }
}

/// Frame an argument list into `out`: header, argument count, then each
/// argument length-prefixed. The client half of [`Request::parse`].
pub fn put_request(out: &mut BytesMut, args: &[&[u8]]) {
    let payload_len = 4 + args.iter().map(|arg| 4 + arg.len()).sum::<usize>();
    out.reserve(HEADER_LEN + payload_len);
    out.put_u32_le(payload_len as u32);
    out.put_u32_le(args.len() as u32);
    for arg in args {
        out.put_u32_le(arg.len() as u32);
        out.put_slice(arg);
    }
}

/// Split a payload into its argument slices. The payload must consume its
/// length exactly; trailing bytes are malformed.
fn parse_payload(payload: &[u8]) -> Result<Vec<&[u8]>, ParseError> {
    let mut cursor = payload;
    let count = take_u32(&mut cursor)? as usize;
    if count > MAX_ARGS {
        return Err(ParseError::TooManyArgs {
            count,
            max: MAX_ARGS,
        });
    }
    let mut args = Vec::with_capacity(count.min(1024));
    while args.len() < count {
        let len = take_u32(&mut cursor)? as usize;
        if cursor.len() < len {
            return Err(ParseError::Malformed);
        }
        let (arg, rest) = cursor.split_at(len);
        args.push(arg);
        cursor = rest;
    }
    if !cursor.is_empty() {
        return Err(ParseError::Malformed);
    }
    Ok(args)
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn take_u32(cursor: &mut &[u8]) -> Result<u32, ParseError> {
    if cursor.len() < 4 {
        return Err(ParseError::Malformed);
    }
    let (head, rest) = cursor.split_at(4);
    *cursor = rest;
    Ok(read_u32(head))
}
