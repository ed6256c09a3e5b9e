//! Outbound message packing.
//!
//! Reliable messages go to the stream as soon as they are composed.
//! Unreliable messages accumulate in a staging buffer and leave as one
//! datagram of at most [`MAX_UNRELIABLE_PACKET_SIZE`] bytes; a message that
//! would overflow the staging buffer flushes it first, so datagrams always
//! carry whole messages.

use super::{ConnectionPtr, MAX_UNRELIABLE_PACKET_SIZE};
use crate::messages::Message;

pub struct MessagesSender {
    connection: ConnectionPtr,
    unreliable_buffer: Vec<u8>,
    scratch: Vec<u8>,
}

impl MessagesSender {
    pub fn new(connection: ConnectionPtr) -> Self {
        MessagesSender {
            connection,
            unreliable_buffer: Vec::with_capacity(MAX_UNRELIABLE_PACKET_SIZE),
            scratch: Vec::with_capacity(64),
        }
    }

    pub fn send_reliable_message(&mut self, message: impl Into<Message>) {
        let message = message.into();
        self.scratch.clear();
        message.encode(&mut self.scratch);
        self.connection.send_reliable_packet(&self.scratch);
    }

    pub fn send_unreliable_message(&mut self, message: impl Into<Message>) {
        let message = message.into();
        if self.unreliable_buffer.len() + message.size() > MAX_UNRELIABLE_PACKET_SIZE {
            self.flush();
        }
        message.encode(&mut self.unreliable_buffer);
    }

    pub fn flush(&mut self) {
        if self.unreliable_buffer.is_empty() {
            return;
        }
        self.connection.send_unreliable_packet(&self.unreliable_buffer);
        self.unreliable_buffer.clear();
    }

    pub fn connection(&self) -> &ConnectionPtr {
        &self.connection
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{PlayerPosition, TextMessage};
    use crate::net::{Connection, ConnectionsListener, LoopbackBuffer};
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    /// Connection that records each datagram as sent.
    #[derive(Default)]
    struct RecordingConnection {
        datagrams: RefCell<Vec<Vec<u8>>>,
        disconnected: Cell<bool>,
    }

    impl Connection for RecordingConnection {
        fn send_reliable_packet(&self, _data: &[u8]) {}
        fn send_unreliable_packet(&self, data: &[u8]) {
            self.datagrams.borrow_mut().push(data.to_vec());
        }
        fn read_reliable_data(&self, _out: &mut [u8]) -> usize {
            0
        }
        fn read_unreliable_data(&self, _out: &mut [u8]) -> usize {
            0
        }
        fn disconnect(&self) {
            self.disconnected.set(true);
        }
        fn is_disconnected(&self) -> bool {
            self.disconnected.get()
        }
        fn connection_info(&self) -> String {
            "recording".to_string()
        }
    }

    #[test]
    fn unreliable_bundles_stay_under_the_datagram_limit() {
        let connection = Rc::new(RecordingConnection::default());
        let connection_ptr: ConnectionPtr = Rc::clone(&connection) as ConnectionPtr;
        let mut sender = MessagesSender::new(connection_ptr);

        let message = PlayerPosition {
            xyz: [0, 0, 0],
            speed: 0,
        };
        let message_size = Message::from(message).size();

        // Enough messages to force at least one mid-way flush.
        let count = MAX_UNRELIABLE_PACKET_SIZE / message_size + 10;
        for _ in 0..count {
            sender.send_unreliable_message(message);
        }
        sender.flush();

        let datagrams = connection.datagrams.borrow();
        assert!(datagrams.len() >= 2);
        let mut total = 0usize;
        for datagram in datagrams.iter() {
            assert!(datagram.len() <= MAX_UNRELIABLE_PACKET_SIZE);
            assert_eq!(datagram.len() % message_size, 0); // whole messages only
            total += datagram.len();
        }
        assert_eq!(total, count * message_size);
    }

    #[test]
    fn reliable_messages_bypass_staging() {
        let buffer = LoopbackBuffer::new();
        buffer.request_connect();
        let client = buffer.get_client_side_connection().unwrap();
        let server = buffer.get_new_connection().unwrap();

        let mut sender = MessagesSender::new(server);
        sender.send_reliable_message(TextMessage {
            text_message_number: 3,
        });

        // No flush needed for the reliable channel.
        let mut out = [0u8; 16];
        let n = client.read_reliable_data(&mut out);
        let (message, size) = Message::decode(&out[..n]).unwrap();
        assert_eq!(size, n);
        assert_eq!(
            message,
            Message::TextMessage(TextMessage {
                text_message_number: 3
            })
        );
    }
}
