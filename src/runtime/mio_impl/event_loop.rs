//! mio event loop implementation.
//!
//! Readiness-based model: poll tells us when sockets are ready,
//! then we perform non-blocking accept/read/write syscalls.
//! Uses epoll on Linux, kqueue on macOS.
//!
//! A single thread owns the listener, every client socket and the
//! registry. Each iteration is folded into a [`ReadySet`] so servicing
//! order is fixed: the listener first, then clients in slot order.
//! Every ready handle gets one bounded step per iteration: one accept
//! for the listener, one chunk of at most [`READ_CHUNK`] bytes for a
//! client. mio is edge-triggered, so a handle that may still have input
//! is carried into the next iteration, which then polls without blocking.

use crate::config::Config;
use crate::protocols::echo::{self, Disposition, FAREWELL, GREETING, READ_CHUNK};
use crate::runtime::shutdown::{Cause, Phase, Shutdown};
use crate::runtime::{Connection, ConnectionRegistry};
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const LISTENER_TOKEN: Token = Token(usize::MAX);

/// Handles to service in one iteration.
#[derive(Debug)]
struct ReadySet {
    listener: bool,
    slots: Vec<bool>,
    /// Handles left with possibly unread input by the last iteration.
    carry_listener: bool,
    carry_slots: Vec<bool>,
}

impl ReadySet {
    fn new(capacity: usize) -> Self {
        Self {
            listener: false,
            slots: vec![false; capacity],
            carry_listener: false,
            carry_slots: vec![false; capacity],
        }
    }

    /// Whether the next wait must not block.
    fn has_carry(&self) -> bool {
        self.carry_listener || self.carry_slots.contains(&true)
    }

    /// Merge the carried handles with the ones the wait reported.
    /// Tokens outside the slot range are ignored.
    fn collect(&mut self, events: &Events) {
        self.listener = std::mem::take(&mut self.carry_listener);
        for (ready, carried) in self.slots.iter_mut().zip(self.carry_slots.iter_mut()) {
            *ready = std::mem::take(carried);
        }

        for event in events.iter() {
            match event.token() {
                LISTENER_TOKEN => self.listener = true,
                Token(slot) => {
                    if let Some(ready) = self.slots.get_mut(slot) {
                        *ready = true;
                    }
                }
            }
        }
    }

    fn is_ready(&self, slot: usize) -> bool {
        self.slots[slot]
    }

    fn carry_listener(&mut self) {
        self.carry_listener = true;
    }

    fn carry_slot(&mut self, slot: usize) {
        self.carry_slots[slot] = true;
    }
}

/// Echo server bound to its listening socket, ready to run.
pub struct Server {
    poll: Poll,
    events: Events,
    listener: TcpListener,
    local_addr: SocketAddr,
    clients: ConnectionRegistry,
    ready: ReadySet,
    shutdown: Shutdown,
}

impl Server {
    /// Create, configure, bind and register the listener. The server
    /// stops on SIGINT/SIGTERM once handlers are installed.
    ///
    /// Any failure here is a startup error.
    pub fn bind(config: &Config) -> io::Result<Self> {
        let poll = Poll::new()?;
        Self::with_shutdown(poll, config, Shutdown::on_signals())
    }

    fn with_shutdown(poll: Poll, config: &Config, shutdown: Shutdown) -> io::Result<Self> {
        let listener = create_listener(config.listen, config.backlog)?;
        let mut listener = TcpListener::from_std(listener);
        let local_addr = listener.local_addr()?;
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

        info!(
            addr = %local_addr,
            backlog = config.backlog,
            max_clients = config.max_clients,
            "Listener bound"
        );

        Ok(Self {
            poll,
            events: Events::with_capacity(config.max_clients + 2),
            listener,
            local_addr,
            clients: ConnectionRegistry::new(config.max_clients),
            ready: ReadySet::new(config.max_clients),
            shutdown,
        })
    }

    /// Serve until shutdown is requested. Returns once every connection
    /// and the listener are closed.
    pub fn run(mut self) -> io::Result<()> {
        info!("Waiting for connections");

        while self.shutdown.phase() == Phase::Running {
            if let Some(cause) = self.shutdown.cause() {
                self.shut_down(cause);
                continue;
            }

            let timeout = self.ready.has_carry().then_some(Duration::ZERO);
            match self.poll.poll(&mut self.events, timeout) {
                Ok(()) => {}
                // A signal interrupted the wait; the flag check above decides.
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(error = %e, "Readiness wait failed");
                    continue;
                }
            }

            if self.shutdown.cause().is_some() {
                continue;
            }

            self.ready.collect(&self.events);

            if self.ready.listener && self.accept_connection() {
                self.ready.carry_listener();
            }

            for slot in 0..self.clients.capacity() {
                if self.ready.is_ready(slot) && self.service_client(slot) {
                    self.ready.carry_slot(slot);
                }
            }
        }

        Ok(())
    }

    /// Accept one pending connection. Returns true when more may be queued.
    fn accept_connection(&mut self) -> bool {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    self.admit(stream, peer);
                    return true;
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return false,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(error = %e, "Accept failed");
                    return false;
                }
            }
        }
    }

    fn admit(&mut self, stream: TcpStream, peer: SocketAddr) {
        let slot = match self.clients.insert(Connection::new(stream, peer)) {
            Ok(slot) => slot,
            Err(conn) => {
                // Dropping the connection closes it; the peer never sees a greeting.
                warn!(
                    ip = %peer.ip(),
                    port = peer.port(),
                    max_clients = self.clients.capacity(),
                    "Registry full, closing connection"
                );
                drop(conn);
                return;
            }
        };

        info!(slot, ip = %peer.ip(), port = peer.port(), "New connection");

        let Some(conn) = self.clients.get_mut(slot) else {
            return;
        };

        if let Err(e) = conn.stream_mut().set_nodelay(true) {
            debug!(slot, error = %e, "Failed to set TCP_NODELAY");
        }

        if let Err(e) = self
            .poll
            .registry()
            .register(conn.stream_mut(), Token(slot), Interest::READABLE)
        {
            error!(slot, error = %e, "Failed to register connection");
            self.clients.remove(slot);
            return;
        }

        if echo::handler::reply(slot, conn, GREETING) {
            debug!(slot, "Greeting sent");
        }
    }

    /// Read and dispatch one chunk. Returns true when a full chunk was
    /// read, so more input may be waiting.
    fn service_client(&mut self, slot: usize) -> bool {
        let mut buf = [0u8; READ_CHUNK];

        let n = loop {
            let Some(conn) = self.clients.get_mut(slot) else {
                return false;
            };

            match conn.read(&mut buf) {
                Ok(0) => {
                    self.release(slot);
                    return false;
                }
                Ok(n) => break n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return false,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    // Read errors end the connection the same way EOF does.
                    debug!(slot, error = %e, "Read failed");
                    self.release(slot);
                    return false;
                }
            }
        };

        match echo::handle_chunk(slot, &buf[..n], &mut self.clients) {
            Disposition::Keep => n == READ_CHUNK,
            Disposition::Release => {
                self.release(slot);
                false
            }
        }
    }

    fn release(&mut self, slot: usize) {
        if let Some(conn) = self.clients.remove(slot) {
            conn.close(slot, self.poll.registry());
        }
    }

    /// Say goodbye to every client, close everything and stop.
    fn shut_down(&mut self, cause: Cause) {
        self.shutdown.begin();

        match cause {
            Cause::Signal(signum) => info!(
                signal = signum,
                clients = self.clients.len(),
                "Received exit signal, shutting down"
            ),
            #[cfg(test)]
            Cause::Requested => info!(clients = self.clients.len(), "Shutting down"),
        }

        let registry = self.poll.registry();
        for (slot, mut conn) in self.clients.drain() {
            let _ = conn.send(FAREWELL);
            conn.close(slot, registry);
        }

        let _ = registry.deregister(&mut self.listener);
        self.shutdown.finish();
        info!(addr = %self.local_addr, "Listener closed");
    }
}

/// Create a non-blocking TCP listener with `SO_REUSEADDR`.
fn create_listener(addr: SocketAddr, backlog: i32) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;

    Ok(socket.into())
}
