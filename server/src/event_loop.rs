//! The server event loop.
//!
//! One readiness poll multiplexes the listener and every connection. The
//! poll timeout is derived from the two timer sources: the head of the
//! idle-connection list and the root of the TTL heap. Each iteration
//! dispatches ready sockets, then reaps idle connections and expired keys.

use crate::config::Config;
use crate::connection::Connection;
use crate::metrics::{
    CONNECTIONS_ACCEPTED, CONNECTIONS_ACTIVE, IDLE_TIMEOUTS, KEYS_EXPIRED,
};
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token, Waker};
use slab::Slab;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use store::list::IndexList;
use store::{MAX_EXPIRE_BATCH, Store};

const LISTENER: Token = Token(1 << 30);
const WAKER: Token = Token((1 << 30) + 1);

/// Stops a running [`Server`] from another thread.
#[derive(Clone)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.flag.store(true, Ordering::SeqCst);
        let _ = self.waker.wake();
    }
}

/// The single-threaded server: listener, connections, store, and timers.
pub struct Server {
    poll: Poll,
    events: Events,
    listener: TcpListener,
    local_addr: SocketAddr,
    connections: Slab<Connection>,
    idle: IndexList,
    store: Store,
    scratch: Vec<u8>,
    idle_timeout_ms: u64,
    epoch: Instant,
    shutdown: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl Server {
    /// Bind the listener and set up the poll. Startup failures (socket,
    /// bind, listen) surface here.
    pub fn new(config: &Config, store: Store) -> io::Result<Self> {
        let poll = Poll::new()?;
        let std_listener = bind_listener(config.listener.address, config.listener.backlog)?;
        let mut listener = TcpListener::from_std(std_listener);
        let local_addr = listener.local_addr()?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER)?);

        Ok(Self {
            poll,
            events: Events::with_capacity(1024),
            listener,
            local_addr,
            connections: Slab::with_capacity(256),
            idle: IndexList::new(),
            store,
            scratch: vec![0; config.listener.read_buffer_size],
            idle_timeout_ms: config.listener.idle_timeout_ms,
            epoch: Instant::now(),
            shutdown: Arc::new(AtomicBool::new(false)),
            waker,
        })
    }

    /// The bound address; useful when configured with port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            flag: self.shutdown.clone(),
            waker: self.waker.clone(),
        }
    }

    /// Run until the shutdown flag is raised. The poll sleeps exactly until
    /// the next timer deadline, or forever when no timer is armed.
    pub fn run(&mut self) -> io::Result<()> {
        tracing::info!(address = %self.local_addr, "listening");
        while !self.shutdown.load(Ordering::SeqCst) {
            let timeout = self.next_timer_ms().map(Duration::from_millis);
            match self.poll.poll(&mut self.events, timeout) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }

            // Copy out the event list so handlers can mutate the tables.
            let ready: Vec<(Token, bool, bool, bool)> = self
                .events
                .iter()
                .map(|event| {
                    (
                        event.token(),
                        event.is_readable() || event.is_read_closed(),
                        event.is_writable() || event.is_write_closed(),
                        event.is_error(),
                    )
                })
                .collect();

            for (token, readable, writable, errored) in ready {
                match token {
                    LISTENER => self.accept_ready(),
                    WAKER => {}
                    Token(idx) => self.connection_ready(idx, readable, writable, errored),
                }
            }

            self.process_timers();
        }
        tracing::info!("shutting down");
        Ok(())
    }

    /// Milliseconds until the earliest deadline, or `None` when no idle
    /// connection and no TTL is armed.
    fn next_timer_ms(&self) -> Option<u64> {
        let idle_deadline = self
            .idle
            .front()
            .and_then(|token| self.connections.get(token as usize))
            .map(|conn| conn.last_activity_ms + self.idle_timeout_ms);
        let ttl_deadline = self.store.next_expiry();

        let next = match (idle_deadline, ttl_deadline) {
            (Some(idle), Some(ttl)) => idle.min(ttl),
            (Some(idle), None) => idle,
            (None, Some(ttl)) => ttl,
            (None, None) => return None,
        };
        Some(next.saturating_sub(self.now_ms()))
    }

    /// Accept every pending connection on the listener.
    fn accept_ready(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    let now = self.now_ms();
                    let entry = self.connections.vacant_entry();
                    let token = entry.key();
                    let mut conn = Connection::new(stream, now);
                    if let Err(err) = self.poll.registry().register(
                        conn.stream(),
                        Token(token),
                        Interest::READABLE,
                    ) {
                        tracing::warn!("failed to register connection: {err}");
                        continue;
                    }
                    entry.insert(conn);
                    self.idle.push_back(token as u32);
                    CONNECTIONS_ACCEPTED.increment();
                    CONNECTIONS_ACTIVE.increment();
                    tracing::debug!(%addr, token, "accepted connection");
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    tracing::warn!("accept error: {err}");
                    break;
                }
            }
        }
    }

    fn connection_ready(&mut self, token: usize, readable: bool, writable: bool, errored: bool) {
        if !self.connections.contains(token) {
            return;
        }
        let now = self.now_ms();
        self.connections[token].last_activity_ms = now;
        // Keep the idle list ordered: the head is the least recently active.
        self.idle.move_to_back(token as u32);

        if errored {
            self.destroy(token);
            return;
        }

        {
            let conn = &mut self.connections[token];
            if readable && conn.want_read {
                conn.handle_readable(&mut self.store, now, &mut self.scratch);
            }
            if writable && conn.want_write && !conn.want_close {
                conn.handle_writable();
            }
        }

        if self.connections[token].want_close {
            self.destroy(token);
            return;
        }
        self.rearm(token);
    }

    /// Re-arm the poll registration to match the connection's intents.
    fn rearm(&mut self, token: usize) {
        let registry = self.poll.registry();
        let Some(conn) = self.connections.get_mut(token) else {
            return;
        };
        let interest = match (conn.want_read, conn.want_write) {
            (true, true) => Interest::READABLE | Interest::WRITABLE,
            (false, true) => Interest::WRITABLE,
            _ => Interest::READABLE,
        };
        if let Err(err) = registry.reregister(conn.stream(), Token(token), interest) {
            tracing::warn!("failed to re-arm connection: {err}");
            self.destroy(token);
        }
    }

    /// Close and forget a connection. The socket is dropped here, closing
    /// the descriptor exactly once.
    fn destroy(&mut self, token: usize) {
        let Some(mut conn) = self.connections.try_remove(token) else {
            return;
        };
        let _ = self.poll.registry().deregister(conn.stream());
        self.idle.detach(token as u32);
        CONNECTIONS_ACTIVE.decrement();
        tracing::debug!(token, "closed connection");
    }

    /// Reap idle connections from the head of the idle list, then expired
    /// keys from the TTL heap (bounded per tick so reaping cannot starve
    /// I/O).
    fn process_timers(&mut self) {
        let now = self.now_ms();

        while let Some(token) = self.idle.front() {
            let Some(conn) = self.connections.get(token as usize) else {
                self.idle.detach(token);
                continue;
            };
            if conn.last_activity_ms + self.idle_timeout_ms > now {
                break;
            }
            tracing::info!(token, "closing idle connection");
            IDLE_TIMEOUTS.increment();
            self.destroy(token as usize);
        }

        let expired = self.store.expire_due(now, MAX_EXPIRE_BATCH);
        if expired > 0 {
            KEYS_EXPIRED.add(expired as u64);
            tracing::debug!(expired, "reaped expired keys");
        }
    }

    /// Monotonic milliseconds since the server started.
    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }
}

/// Create the listening socket: SO_REUSEADDR, non-blocking, bound and
/// listening.
fn bind_listener(addr: SocketAddr, backlog: u32) -> io::Result<std::net::TcpListener> {
    let domain = match addr {
        SocketAddr::V4(_) => socket2::Domain::IPV4,
        SocketAddr::V6(_) => socket2::Domain::IPV6,
    };
    let socket = socket2::Socket::new(domain, socket2::Type::STREAM, Some(socket2::Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog as i32)?;
    Ok(socket.into())
}
