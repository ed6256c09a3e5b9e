//! Inbound message extraction.
//!
//! Reads raw bytes from both channels and consumes whole messages from the
//! head of each buffer, sizes derived from the id table. The reliable stream
//! may split a message across reads; the partial tail is kept for the next
//! pass. A malformed unreliable buffer is dropped whole; a malformed reliable
//! stream cannot be resynchronised and disconnects.

use super::{ConnectionPtr, MAX_UNRELIABLE_PACKET_SIZE};
use crate::messages::{message_size, Message};

const BUFFER_SIZE: usize = 2 * MAX_UNRELIABLE_PACKET_SIZE;

pub struct MessagesExtractor {
    connection: ConnectionPtr,

    reliable_buffer: [u8; BUFFER_SIZE],
    reliable_buffer_pos: usize,

    unreliable_buffer: [u8; BUFFER_SIZE],
    unreliable_buffer_pos: usize,
}

impl MessagesExtractor {
    pub fn new(connection: ConnectionPtr) -> Self {
        MessagesExtractor {
            connection,
            reliable_buffer: [0; BUFFER_SIZE],
            reliable_buffer_pos: 0,
            unreliable_buffer: [0; BUFFER_SIZE],
            unreliable_buffer_pos: 0,
        }
    }

    pub fn connection(&self) -> &ConnectionPtr {
        &self.connection
    }

    /// Drain both channels, invoking `handler` once per complete message.
    pub fn process_messages(&mut self, mut handler: impl FnMut(Message)) {
        loop {
            let read = self.connection.read_reliable_data(
                &mut self.reliable_buffer[self.reliable_buffer_pos..],
            );
            if read == 0 && self.reliable_buffer_pos == 0 {
                break;
            }
            self.reliable_buffer_pos += read;

            let consumed = Self::consume_buffer(
                &self.reliable_buffer[..self.reliable_buffer_pos],
                &mut handler,
            );
            match consumed {
                Ok(consumed) => {
                    self.reliable_buffer.copy_within(consumed..self.reliable_buffer_pos, 0);
                    self.reliable_buffer_pos -= consumed;
                }
                Err(bad_id) => {
                    log::warn!(
                        "unknown message {} in reliable stream from {}; disconnecting",
                        bad_id,
                        self.connection.connection_info()
                    );
                    self.connection.disconnect();
                    self.reliable_buffer_pos = 0;
                    return;
                }
            }

            if read == 0 {
                break;
            }
        }

        loop {
            let read = self.connection.read_unreliable_data(
                &mut self.unreliable_buffer[self.unreliable_buffer_pos..],
            );
            if read == 0 && self.unreliable_buffer_pos == 0 {
                break;
            }
            self.unreliable_buffer_pos += read;

            match Self::consume_buffer(
                &self.unreliable_buffer[..self.unreliable_buffer_pos],
                &mut handler,
            ) {
                Ok(consumed) => {
                    self.unreliable_buffer.copy_within(consumed..self.unreliable_buffer_pos, 0);
                    self.unreliable_buffer_pos -= consumed;
                }
                Err(_) => {
                    // Malformed datagram: drop it, keep the loop alive.
                    self.unreliable_buffer_pos = 0;
                }
            }

            if read == 0 {
                break;
            }
        }
    }

    /// Consume complete messages from the head of `buffer`. Returns the number
    /// of bytes consumed, or the offending id byte.
    fn consume_buffer(buffer: &[u8], handler: &mut impl FnMut(Message)) -> Result<usize, u8> {
        let mut pos = 0usize;
        while pos < buffer.len() {
            let id = buffer[pos];
            let size = message_size(id).ok_or(id)?;
            if pos + size > buffer.len() {
                break; // partial message, wait for more bytes
            }
            let (message, decoded_size) = Message::decode(&buffer[pos..pos + size]).ok_or(id)?;
            debug_assert_eq!(decoded_size, size);
            handler(message);
            pos += size;
        }
        Ok(pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{MapChange, PlayerPosition, TextMessage};
    use crate::net::{Connection, ConnectionsListener, LoopbackBuffer, MessagesSender};
    use std::rc::Rc;

    fn pair() -> (ConnectionPtr, ConnectionPtr) {
        let buffer = LoopbackBuffer::new();
        buffer.request_connect();
        (
            buffer.get_client_side_connection().unwrap(),
            buffer.get_new_connection().unwrap(),
        )
    }

    #[test]
    fn reliable_messages_arrive_in_send_order() {
        let (client, server) = pair();
        let mut sender = MessagesSender::new(server);
        for n in 0..20u16 {
            sender.send_reliable_message(TextMessage {
                text_message_number: n,
            });
        }

        let mut extractor = MessagesExtractor::new(client);
        let mut received = Vec::new();
        extractor.process_messages(|message| {
            if let Message::TextMessage(m) = message {
                received.push(m.text_message_number);
            }
        });

        assert_eq!(received, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn partial_reliable_message_waits_for_the_rest() {
        let (client, server) = pair();

        let mut encoded = Vec::new();
        Message::MapChange(MapChange {
            map_number: 7,
            need_play_cutscene: 1,
        })
        .encode(&mut encoded);

        let (head, tail) = encoded.split_at(3);
        server.send_reliable_packet(head);

        let mut extractor = MessagesExtractor::new(client);
        let mut count = 0;
        extractor.process_messages(|_| count += 1);
        assert_eq!(count, 0);

        server.send_reliable_packet(tail);
        extractor.process_messages(|message| {
            count += 1;
            assert_eq!(
                message,
                Message::MapChange(MapChange {
                    map_number: 7,
                    need_play_cutscene: 1,
                })
            );
        });
        assert_eq!(count, 1);
    }

    #[test]
    fn malformed_unreliable_datagram_is_dropped_silently() {
        let (client, server) = pair();

        server.send_unreliable_packet(&[0xEE, 1, 2, 3]); // unknown id
        let mut sender = MessagesSender::new(Rc::clone(&server));
        sender.send_unreliable_message(PlayerPosition {
            xyz: [1, 2, 3],
            speed: 0,
        });
        sender.flush();

        let mut extractor = MessagesExtractor::new(client);
        let mut positions = 0;
        extractor.process_messages(|message| {
            if matches!(message, Message::PlayerPosition(_)) {
                positions += 1;
            }
        });

        // The bad datagram bytes vanished; the receive loop survived. With a
        // stream-backed loopback the good message that shared the pass is
        // sacrificed along with the bad bytes, never the loop itself.
        assert_eq!(positions, 0);
        let mut more = 0;
        extractor.process_messages(|_| more += 1);
        assert_eq!(more, 0);
        assert!(!extractor.connection().is_disconnected());
    }

    #[test]
    fn unknown_reliable_id_disconnects() {
        let (client, server) = pair();
        server.send_reliable_packet(&[0xEE, 0, 0, 0]);

        let mut extractor = MessagesExtractor::new(client);
        extractor.process_messages(|_| {});
        assert!(extractor.connection().is_disconnected());
    }
}
