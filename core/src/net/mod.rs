//! Message transport: reliable + unreliable channels over loopback or TCP/UDP.

pub mod extractor;
pub mod loopback;
pub mod sender;
pub mod socket;

pub use extractor::MessagesExtractor;
pub use loopback::LoopbackBuffer;
pub use sender::MessagesSender;

use std::rc::Rc;

/// Unreliable datagrams are bundled up to this many bytes.
pub const MAX_UNRELIABLE_PACKET_SIZE: usize = 500;

/// One established two-channel connection.
///
/// After [`disconnect`](Connection::disconnect) (idempotent, callable from
/// either side) all sends are silently dropped and all reads return 0.
pub trait Connection {
    fn send_reliable_packet(&self, data: &[u8]);
    fn send_unreliable_packet(&self, data: &[u8]);

    /// Drain up to `out.len()` bytes of the reliable stream; 0 when nothing is
    /// pending.
    fn read_reliable_data(&self, out: &mut [u8]) -> usize;

    /// Drain pending unreliable bytes; whole datagrams only on network
    /// transports.
    fn read_unreliable_data(&self, out: &mut [u8]) -> usize;

    fn disconnect(&self);
    fn is_disconnected(&self) -> bool;

    fn connection_info(&self) -> String;
}

pub type ConnectionPtr = Rc<dyn Connection>;

/// Source of freshly established connections, polled by the server once per
/// tick.
pub trait ConnectionsListener {
    fn get_new_connection(&self) -> Option<ConnectionPtr>;
}

pub type ConnectionsListenerPtr = Rc<dyn ConnectionsListener>;
