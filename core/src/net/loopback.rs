//! In-process transport for single-player.
//!
//! The buffer owns four byte queues (reliable/unreliable × each direction);
//! the client- and server-side endpoints are handles into that arena, each
//! sending into one queue and reading from another. No back-pointers exist
//! between the endpoints.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use super::{Connection, ConnectionPtr, ConnectionsListener};

/// Byte queue with deferred compaction: consumed bytes are skipped via a read
/// position and reclaimed once the live portion drops to 1/16 of the
/// allocation.
pub struct Queue {
    buffer: Vec<u8>,
    pos: usize,
}

const MIN_BUFFER_SIZE_TO_SHRINK: usize = 64;
const SHRINK_RATE_MULT: usize = 16;

impl Queue {
    pub fn new() -> Self {
        Queue {
            buffer: Vec::new(),
            pos: 0,
        }
    }

    pub fn size(&self) -> usize {
        self.buffer.len() - self.pos
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.pos = 0;
    }

    pub fn push_bytes(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    pub fn pop_bytes(&mut self, out: &mut [u8]) {
        debug_assert!(out.len() <= self.size());
        out.copy_from_slice(&self.buffer[self.pos..self.pos + out.len()]);
        self.pos += out.len();
        self.try_shrink();
    }

    fn try_shrink(&mut self) {
        if self.buffer.len() < MIN_BUFFER_SIZE_TO_SHRINK {
            return;
        }
        if self.size() * SHRINK_RATE_MULT < self.buffer.len() {
            self.buffer.drain(..self.pos);
            self.pos = 0;
        }
    }
}

impl Default for Queue {
    fn default() -> Self {
        Self::new()
    }
}

type QueueRef = Rc<RefCell<Queue>>;

struct LoopbackConnection {
    in_reliable_buffer: QueueRef,
    in_unreliable_buffer: QueueRef,
    out_reliable_buffer: QueueRef,
    out_unreliable_buffer: QueueRef,
    disconnected: Cell<bool>,
}

impl Connection for LoopbackConnection {
    fn send_reliable_packet(&self, data: &[u8]) {
        if self.disconnected.get() {
            return;
        }
        self.in_reliable_buffer.borrow_mut().push_bytes(data);
    }

    fn send_unreliable_packet(&self, data: &[u8]) {
        if self.disconnected.get() {
            return;
        }
        self.in_unreliable_buffer.borrow_mut().push_bytes(data);
    }

    fn read_reliable_data(&self, out: &mut [u8]) -> usize {
        if self.disconnected.get() {
            return 0;
        }
        let mut queue = self.out_reliable_buffer.borrow_mut();
        let result_size = out.len().min(queue.size());
        queue.pop_bytes(&mut out[..result_size]);
        result_size
    }

    fn read_unreliable_data(&self, out: &mut [u8]) -> usize {
        if self.disconnected.get() {
            return 0;
        }
        let mut queue = self.out_unreliable_buffer.borrow_mut();
        let result_size = out.len().min(queue.size());
        queue.pop_bytes(&mut out[..result_size]);
        result_size
    }

    fn disconnect(&self) {
        self.disconnected.set(true);
    }

    fn is_disconnected(&self) -> bool {
        self.disconnected.get()
    }

    fn connection_info(&self) -> String {
        "loopback".to_string()
    }
}

#[derive(Clone, Copy, PartialEq)]
enum State {
    Unconnected,
    WaitingForConnection,
    Connected,
}

/// Owner of the four queues and the two endpoints.
pub struct LoopbackBuffer {
    client_to_server_reliable: QueueRef,
    client_to_server_unreliable: QueueRef,
    server_to_client_reliable: QueueRef,
    server_to_client_unreliable: QueueRef,

    client_side_connection: RefCell<Option<Rc<LoopbackConnection>>>,
    server_side_connection: RefCell<Option<Rc<LoopbackConnection>>>,
    state: Cell<State>,
}

impl LoopbackBuffer {
    pub fn new() -> Self {
        LoopbackBuffer {
            client_to_server_reliable: Rc::new(RefCell::new(Queue::new())),
            client_to_server_unreliable: Rc::new(RefCell::new(Queue::new())),
            server_to_client_reliable: Rc::new(RefCell::new(Queue::new())),
            server_to_client_unreliable: Rc::new(RefCell::new(Queue::new())),
            client_side_connection: RefCell::new(None),
            server_side_connection: RefCell::new(None),
            state: Cell::new(State::Unconnected),
        }
    }

    pub fn request_connect(&self) {
        debug_assert!(self.state.get() == State::Unconnected);

        *self.client_side_connection.borrow_mut() = Some(Rc::new(LoopbackConnection {
            in_reliable_buffer: self.client_to_server_reliable.clone(),
            in_unreliable_buffer: self.client_to_server_unreliable.clone(),
            out_reliable_buffer: self.server_to_client_reliable.clone(),
            out_unreliable_buffer: self.server_to_client_unreliable.clone(),
            disconnected: Cell::new(false),
        }));

        *self.server_side_connection.borrow_mut() = Some(Rc::new(LoopbackConnection {
            in_reliable_buffer: self.server_to_client_reliable.clone(),
            in_unreliable_buffer: self.server_to_client_unreliable.clone(),
            out_reliable_buffer: self.client_to_server_reliable.clone(),
            out_unreliable_buffer: self.client_to_server_unreliable.clone(),
            disconnected: Cell::new(false),
        }));

        self.state.set(State::WaitingForConnection);
    }

    pub fn request_disconnect(&self) {
        if let Some(connection) = self.client_side_connection.borrow_mut().take() {
            connection.disconnect();
        }
        if let Some(connection) = self.server_side_connection.borrow_mut().take() {
            connection.disconnect();
        }

        self.client_to_server_reliable.borrow_mut().clear();
        self.client_to_server_unreliable.borrow_mut().clear();
        self.server_to_client_reliable.borrow_mut().clear();
        self.server_to_client_unreliable.borrow_mut().clear();

        self.state.set(State::Unconnected);
    }

    pub fn get_client_side_connection(&self) -> Option<ConnectionPtr> {
        self.client_side_connection
            .borrow()
            .clone()
            .map(|c| c as ConnectionPtr)
    }
}

impl Default for LoopbackBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionsListener for LoopbackBuffer {
    fn get_new_connection(&self) -> Option<ConnectionPtr> {
        if self.state.get() == State::WaitingForConnection {
            self.state.set(State::Connected);
            return self
                .server_side_connection
                .borrow()
                .clone()
                .map(|c| c as ConnectionPtr);
        }
        None
    }
}

impl Drop for LoopbackBuffer {
    fn drop(&mut self) {
        self.request_disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected_pair() -> (ConnectionPtr, ConnectionPtr) {
        let buffer = LoopbackBuffer::new();
        buffer.request_connect();
        let client = buffer.get_client_side_connection().unwrap();
        let server = buffer.get_new_connection().unwrap();
        (client, server)
    }

    #[test]
    fn listener_yields_the_connection_once() {
        let buffer = LoopbackBuffer::new();
        buffer.request_connect();
        assert!(buffer.get_new_connection().is_some());
        assert!(buffer.get_new_connection().is_none());
    }

    #[test]
    fn reliable_bytes_preserve_order() {
        let (client, server) = connected_pair();

        client.send_reliable_packet(b"first ");
        client.send_reliable_packet(b"second");

        let mut out = [0u8; 64];
        let n = server.read_reliable_data(&mut out);
        assert_eq!(&out[..n], b"first second");
    }

    #[test]
    fn channels_are_independent_per_direction() {
        let (client, server) = connected_pair();

        client.send_unreliable_packet(b"c2s");
        server.send_unreliable_packet(b"s2c");

        let mut out = [0u8; 8];
        assert_eq!(server.read_unreliable_data(&mut out), 3);
        assert_eq!(&out[..3], b"c2s");
        assert_eq!(client.read_unreliable_data(&mut out), 3);
        assert_eq!(&out[..3], b"s2c");

        // Nothing crossed into the reliable channel.
        assert_eq!(client.read_reliable_data(&mut out), 0);
        assert_eq!(server.read_reliable_data(&mut out), 0);
    }

    #[test]
    fn partial_reads_keep_the_remainder() {
        let (client, server) = connected_pair();
        client.send_reliable_packet(b"abcdef");

        let mut out = [0u8; 4];
        assert_eq!(server.read_reliable_data(&mut out), 4);
        assert_eq!(&out, b"abcd");
        assert_eq!(server.read_reliable_data(&mut out), 2);
        assert_eq!(&out[..2], b"ef");
    }

    #[test]
    fn disconnect_silences_both_operations() {
        let (client, server) = connected_pair();
        client.send_reliable_packet(b"before");
        client.disconnect();
        client.disconnect(); // idempotent

        assert!(client.is_disconnected());
        client.send_reliable_packet(b"after");

        // The server side still drains what arrived before the disconnect.
        let mut out = [0u8; 16];
        assert_eq!(server.read_reliable_data(&mut out), 6);
        let mut out2 = [0u8; 16];
        assert_eq!(client.read_reliable_data(&mut out2), 0);
    }

    #[test]
    fn queue_compacts_when_mostly_consumed() {
        let mut queue = Queue::new();
        queue.push_bytes(&[0u8; 1024]);

        let mut out = [0u8; 1000];
        queue.pop_bytes(&mut out);

        // Live portion (24) is below 1/16 of 1024, so the dead prefix is gone.
        assert_eq!(queue.size(), 24);
        assert_eq!(queue.buffer.len(), 24);
        assert_eq!(queue.pos, 0);
    }
}
