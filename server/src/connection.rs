//! Per-connection state for the server.
//!
//! Each connection carries its socket, an incoming and an outgoing byte
//! buffer, and three intent flags the event loop consults when arming the
//! poll. Requests are peeled off the incoming buffer one complete frame at a
//! time; responses accumulate in the outgoing buffer in request order.

use crate::execute::execute;
use crate::metrics::PROTOCOL_ERRORS;
use bytes::{Buf, BytesMut};
use mio::net::TcpStream;
use protocol_wire::value::{ErrorCode, put_err};
use protocol_wire::{HEADER_LEN, ParseError, Request, begin_response, end_response};
use std::io::{self, Read, Write};
use store::Store;

pub struct Connection {
    stream: TcpStream,
    incoming: BytesMut,
    outgoing: BytesMut,
    pub want_read: bool,
    pub want_write: bool,
    pub want_close: bool,
    pub last_activity_ms: u64,
}

impl Connection {
    pub fn new(stream: TcpStream, now_ms: u64) -> Self {
        Self {
            stream,
            incoming: BytesMut::with_capacity(4096),
            outgoing: BytesMut::with_capacity(4096),
            want_read: true,
            want_write: false,
            want_close: false,
            last_activity_ms: now_ms,
        }
    }

    pub fn stream(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    pub fn has_pending_write(&self) -> bool {
        !self.outgoing.is_empty()
    }

    /// Socket is readable: drain it, process complete requests, and attempt
    /// the write immediately rather than waiting for the next readiness
    /// round.
    pub fn handle_readable(&mut self, store: &mut Store, now_ms: u64, scratch: &mut [u8]) {
        loop {
            match self.stream.read(scratch) {
                Ok(0) => {
                    if self.incoming.is_empty() {
                        tracing::debug!("client closed connection");
                    } else {
                        tracing::warn!("unexpected EOF mid-request");
                    }
                    self.want_close = true;
                    return;
                }
                Ok(n) => self.incoming.extend_from_slice(&scratch[..n]),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    tracing::warn!("read error: {err}");
                    self.want_close = true;
                    return;
                }
            }
        }

        self.process(store, now_ms);

        if self.has_pending_write() && !self.want_close {
            // In a request-response protocol the socket is almost certainly
            // writable right now.
            self.want_read = false;
            self.want_write = true;
            self.handle_writable();
        }
    }

    /// Socket is writable: push out as much of the outgoing buffer as the
    /// kernel accepts, then flip back to reading once drained.
    pub fn handle_writable(&mut self) {
        while self.has_pending_write() {
            match self.stream.write(&self.outgoing) {
                Ok(0) => {
                    self.want_close = true;
                    return;
                }
                Ok(n) => self.outgoing.advance(n),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    tracing::warn!("write error: {err}");
                    self.want_close = true;
                    return;
                }
            }
        }
        self.want_read = true;
        self.want_write = false;
    }

    /// Extract and execute every complete request buffered so far.
    fn process(&mut self, store: &mut Store, now_ms: u64) {
        loop {
            let consumed = match Request::parse(&self.incoming) {
                Ok((request, consumed)) => {
                    let header = begin_response(&mut self.outgoing);
                    execute(&request.args, store, now_ms, &mut self.outgoing);
                    end_response(&mut self.outgoing, header);
                    consumed
                }
                Err(ParseError::Incomplete) => break,
                Err(err) if err.is_fatal() => {
                    // Framing violation: the stream can no longer be trusted.
                    PROTOCOL_ERRORS.increment();
                    tracing::warn!("closing connection: {err}");
                    self.want_close = true;
                    break;
                }
                Err(err) => {
                    // Malformed payload inside a well-framed request: reply
                    // with an error and skip the frame.
                    PROTOCOL_ERRORS.increment();
                    tracing::debug!("malformed request: {err}");
                    let header = begin_response(&mut self.outgoing);
                    put_err(&mut self.outgoing, ErrorCode::Unknown, "malformed request");
                    end_response(&mut self.outgoing, header);
                    let payload_len = u32::from_le_bytes([
                        self.incoming[0],
                        self.incoming[1],
                        self.incoming[2],
                        self.incoming[3],
                    ]) as usize;
                    HEADER_LEN + payload_len
                }
            };
            self.incoming.advance(consumed);
        }
    }
}
