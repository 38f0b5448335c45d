//! Client connections and the fixed-slot registry that owns them.
//!
//! A slot is either empty or holds exactly one live connection. New
//! connections take the lowest empty slot, and iteration always follows
//! slot order, which is also the broadcast order.

use mio::net::TcpStream;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::time::Instant;
use tracing::info;

/// A single accepted client.
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    /// Peer address captured at accept time.
    peer: SocketAddr,
    connected_at: Instant,
}

impl Connection {
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream,
            peer,
            connected_at: Instant::now(),
        }
    }

    pub fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    /// Read into `buf`. Non-blocking; surfaces `WouldBlock` to the caller.
    pub fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }

    /// Write as much of `payload` as the socket accepts right now.
    ///
    /// Never waits for the peer: stops at `WouldBlock` and returns the
    /// number of bytes written, which may be short. An error is returned
    /// only when nothing could be written.
    pub fn send(&mut self, payload: &[u8]) -> io::Result<usize> {
        let mut written = 0;
        while written < payload.len() {
            match self.stream.write(&payload[written..]) {
                Ok(0) => break,
                Ok(n) => written += n,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if written == 0 => return Err(e),
                Err(_) => break,
            }
        }
        Ok(written)
    }

    /// Release the connection: stop watching it, report the peer and
    /// close the socket. Sends nothing to the peer.
    pub fn close(mut self, slot: usize, registry: &mio::Registry) {
        let _ = registry.deregister(&mut self.stream);

        // The socket may already be reset, fall back to the accept-time address.
        let peer = self.stream.peer_addr().unwrap_or(self.peer);
        info!(
            slot,
            ip = %peer.ip(),
            port = peer.port(),
            connected = ?self.connected_at.elapsed(),
            "Host disconnected"
        );
    }
}

/// Fixed-capacity registry of client connections, indexed by slot.
#[derive(Debug)]
pub struct ConnectionRegistry {
    slots: Vec<Option<Connection>>,
    len: usize,
}

impl ConnectionRegistry {
    /// Create a registry with `capacity` empty slots.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            len: 0,
        }
    }

    /// Place a connection in the lowest empty slot.
    ///
    /// Hands the connection back when every slot is taken.
    pub fn insert(&mut self, conn: Connection) -> Result<usize, Connection> {
        match self.slots.iter().position(Option::is_none) {
            Some(slot) => {
                self.slots[slot] = Some(conn);
                self.len += 1;
                Ok(slot)
            }
            None => Err(conn),
        }
    }

    pub fn get_mut(&mut self, slot: usize) -> Option<&mut Connection> {
        self.slots.get_mut(slot).and_then(Option::as_mut)
    }

    /// Empty a slot, returning its connection.
    pub fn remove(&mut self, slot: usize) -> Option<Connection> {
        let conn = self.slots.get_mut(slot).and_then(Option::take);
        if conn.is_some() {
            self.len -= 1;
        }
        conn
    }

    #[cfg(test)]
    pub fn contains(&self, slot: usize) -> bool {
        matches!(self.slots.get(slot), Some(Some(_)))
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Total number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Live connections in slot order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (usize, &mut Connection)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(slot, conn)| conn.as_mut().map(|c| (slot, c)))
    }

    /// Empty every slot, yielding live connections in slot order.
    pub fn drain(&mut self) -> impl Iterator<Item = (usize, Connection)> + '_ {
        self.len = 0;
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(slot, conn)| conn.take().map(|c| (slot, c)))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Server-side connection plus the client end keeping it open.
    pub(crate) fn loopback_pair() -> (Connection, std::net::TcpStream) {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let client = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, peer) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();
        (Connection::new(TcpStream::from_std(server), peer), client)
    }

    #[test]
    fn test_registry_fills_lowest_slot() {
        let mut registry = ConnectionRegistry::new(3);
        let mut clients = Vec::new();

        for expected in 0..3 {
            let (conn, client) = loopback_pair();
            clients.push(client);
            assert_eq!(registry.insert(conn).unwrap(), expected);
        }
        assert_eq!(registry.len(), registry.capacity());

        // At capacity, the connection comes back to the caller
        let (conn, _client) = loopback_pair();
        assert!(registry.insert(conn).is_err());

        // A freed middle slot is reused before anything else
        assert!(registry.remove(1).is_some());
        assert!(!registry.contains(1));
        assert_eq!(registry.len(), 2);

        let (conn, _client) = loopback_pair();
        assert_eq!(registry.insert(conn).unwrap(), 1);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_remove_empty_slot() {
        let mut registry = ConnectionRegistry::new(2);
        assert!(registry.remove(0).is_none());
        assert!(registry.remove(5).is_none());
        assert_eq!(registry.len(), 0);
        assert_eq!(registry.capacity(), 2);
    }

    #[test]
    fn test_iteration_follows_slot_order() {
        let mut registry = ConnectionRegistry::new(4);
        let mut clients = Vec::new();
        for _ in 0..4 {
            let (conn, client) = loopback_pair();
            clients.push(client);
            registry.insert(conn).unwrap();
        }
        registry.remove(0);
        registry.remove(2);

        let slots: Vec<usize> = registry.iter_mut().map(|(slot, _)| slot).collect();
        assert_eq!(slots, vec![1, 3]);

        let drained: Vec<usize> = registry.drain().map(|(slot, _)| slot).collect();
        assert_eq!(drained, vec![1, 3]);
        assert_eq!(registry.len(), 0);
        assert!(!registry.contains(1));
    }

    #[test]
    fn test_send_reaches_peer() {
        use std::io::Read;

        let (mut conn, mut client) = loopback_pair();
        assert_eq!(conn.send(b"hi\n").unwrap(), 3);

        let mut buf = [0u8; 3];
        client.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hi\n");
    }
}
