//! TCP + UDP transport for multiplayer.
//!
//! TCP is the rendezvous and the reliable channel; UDP carries the unreliable
//! channel. On accept the server sends its protocol version and a UDP port
//! drawn from a base+offset pool; the client answers with a burst of dummy
//! datagrams which both opens NAT pinholes and tells the server the client's
//! UDP source address. Every received datagram is filtered against that
//! address.

use std::cell::{Cell, RefCell};
use std::io::{ErrorKind, Read, Write};
use std::net::{IpAddr, SocketAddr, TcpListener, TcpStream, ToSocketAddrs, UdpSocket};
use std::rc::Rc;

use anyhow::{bail, Context, Result};

use super::{Connection, ConnectionPtr, ConnectionsListener, MAX_UNRELIABLE_PACKET_SIZE};
use crate::game_constants::UDP_PORT_POOL_SIZE;
use crate::messages::{DummyNetMessage, Message, PROTOCOL_VERSION};

struct NetConnection {
    tcp_socket: TcpStream,
    udp_socket: UdpSocket,
    destination_udp_address: SocketAddr,
    disconnected: Cell<bool>,
}

impl NetConnection {
    fn new(
        tcp_socket: TcpStream,
        udp_socket: UdpSocket,
        destination_udp_address: SocketAddr,
    ) -> Result<Self> {
        tcp_socket
            .set_nonblocking(true)
            .context("can not make tcp socket non-blocking")?;
        udp_socket
            .set_nonblocking(true)
            .context("can not make udp socket non-blocking")?;
        tcp_socket.set_nodelay(true).ok();
        Ok(NetConnection {
            tcp_socket,
            udp_socket,
            destination_udp_address,
            disconnected: Cell::new(false),
        })
    }
}

impl Connection for NetConnection {
    fn send_reliable_packet(&self, data: &[u8]) {
        if self.disconnected.get() || data.is_empty() {
            return;
        }
        // A short write on the reliable stream is an error; surface it by
        // dropping the connection rather than desynchronising the stream.
        if let Err(e) = (&self.tcp_socket).write_all(data) {
            log::warn!("reliable send error: {}", e);
            self.disconnect();
        }
    }

    fn send_unreliable_packet(&self, data: &[u8]) {
        if self.disconnected.get() {
            return;
        }
        match self.udp_socket.send_to(data, self.destination_udp_address) {
            Ok(sent) if sent < data.len() => {
                log::warn!("not all data transmitted: {} from {}", sent, data.len());
            }
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::WouldBlock => {}
            Err(e) => log::warn!("unreliable send error: {}", e),
        }
    }

    fn read_reliable_data(&self, out: &mut [u8]) -> usize {
        if self.disconnected.get() {
            return 0;
        }
        match (&self.tcp_socket).read(out) {
            // A ready socket returning zero means the peer closed.
            Ok(0) => {
                self.disconnect();
                0
            }
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::WouldBlock => 0,
            Err(e) => {
                log::warn!("reliable read error: {}", e);
                0
            }
        }
    }

    fn read_unreliable_data(&self, out: &mut [u8]) -> usize {
        if self.disconnected.get() {
            return 0;
        }
        loop {
            match self.udp_socket.recv_from(out) {
                Ok((n, from)) => {
                    // Discard datagrams from anyone but the connected peer.
                    if from != self.destination_udp_address {
                        continue;
                    }
                    return n;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return 0,
                Err(e) => {
                    log::warn!("unreliable read error: {}", e);
                    return 0;
                }
            }
        }
    }

    fn disconnect(&self) {
        if self.disconnected.get() {
            return;
        }
        self.disconnected.set(true);
        let _ = self.tcp_socket.shutdown(std::net::Shutdown::Both);
    }

    fn is_disconnected(&self) -> bool {
        self.disconnected.get()
    }

    fn connection_info(&self) -> String {
        self.destination_udp_address.to_string()
    }
}

impl Drop for NetConnection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

struct EstablishingConnection {
    tcp_socket: TcpStream,
    udp_socket: UdpSocket,
    client_ip_address: IpAddr,
}

impl EstablishingConnection {
    fn try_complete(&mut self) -> Option<ConnectionPtr> {
        let mut dummy_buffer = [0u8; MAX_UNRELIABLE_PACKET_SIZE];
        loop {
            match self.udp_socket.recv_from(&mut dummy_buffer) {
                Ok((_, from)) => {
                    if from.ip() != self.client_ip_address {
                        log::info!("unknown user {} trying to connect, discarded", from);
                        continue;
                    }
                    let tcp_socket = self.tcp_socket.try_clone().ok()?;
                    let udp_socket = self.udp_socket.try_clone().ok()?;
                    return NetConnection::new(tcp_socket, udp_socket, from)
                        .ok()
                        .map(|c| Rc::new(c) as ConnectionPtr);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return None,
                Err(e) => {
                    log::warn!("udp receive error while establishing: {}", e);
                    return None;
                }
            }
        }
    }
}

pub struct ServerListener {
    listen_socket: TcpListener,
    base_udp_port: u16,
    next_udp_port_offset: Cell<u16>,
    establishing_connections: RefCell<Vec<EstablishingConnection>>,
}

impl ServerListener {
    pub fn bind(tcp_port: u16, base_udp_port: u16) -> Result<ServerListener> {
        let listen_socket = TcpListener::bind(("0.0.0.0", tcp_port))
            .with_context(|| format!("can not bind listen socket to port {}", tcp_port))?;
        listen_socket
            .set_nonblocking(true)
            .context("can not make listen socket non-blocking")?;

        Ok(ServerListener {
            listen_socket,
            base_udp_port,
            next_udp_port_offset: Cell::new(0),
            establishing_connections: RefCell::new(Vec::new()),
        })
    }

    pub fn local_tcp_port(&self) -> u16 {
        self.listen_socket
            .local_addr()
            .map(|a| a.port())
            .unwrap_or(0)
    }

    fn accept_pending(&self) {
        loop {
            match self.listen_socket.accept() {
                Ok((tcp_socket, client_address)) => {
                    let offset = self.next_udp_port_offset.get();
                    self.next_udp_port_offset
                        .set((offset + 1) % UDP_PORT_POOL_SIZE);
                    let udp_port = self.base_udp_port + offset;

                    let udp_socket = match UdpSocket::bind(("0.0.0.0", udp_port)) {
                        Ok(socket) => socket,
                        Err(e) => {
                            log::warn!("can not bind udp socket to port {}: {}", udp_port, e);
                            continue;
                        }
                    };
                    if udp_socket.set_nonblocking(true).is_err() {
                        continue;
                    }

                    // Protocol version and the connection's UDP port, via TCP.
                    let mut hello = [0u8; 6];
                    hello[0..4].copy_from_slice(&PROTOCOL_VERSION.to_le_bytes());
                    hello[4..6].copy_from_slice(&udp_port.to_le_bytes());
                    if let Err(e) = (&tcp_socket).write_all(&hello) {
                        log::warn!("handshake send error: {}", e);
                        continue;
                    }

                    self.establishing_connections
                        .borrow_mut()
                        .push(EstablishingConnection {
                            tcp_socket,
                            udp_socket,
                            client_ip_address: client_address.ip(),
                        });
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    log::warn!("can not accept client: {}", e);
                    break;
                }
            }
        }
    }
}

impl ConnectionsListener for ServerListener {
    fn get_new_connection(&self) -> Option<ConnectionPtr> {
        self.accept_pending();

        let mut establishing = self.establishing_connections.borrow_mut();
        for i in 0..establishing.len() {
            if let Some(connection) = establishing[i].try_complete() {
                establishing.swap_remove(i);
                log::info!("client connected: {}", connection.connection_info());
                return Some(connection);
            }
        }
        None
    }
}

/// Client side of the handshake. Blocks until the hello arrives; a protocol
/// version mismatch is fatal.
pub fn connect_to_server(server_address: &str, in_udp_port: u16) -> Result<ConnectionPtr> {
    let server_address: SocketAddr = server_address
        .to_socket_addrs()
        .with_context(|| format!("bad server address \"{}\"", server_address))?
        .next()
        .with_context(|| format!("\"{}\" resolves to nothing", server_address))?;

    let tcp_socket = TcpStream::connect(server_address)
        .with_context(|| format!("can not connect to {}", server_address))?;

    let mut hello = [0u8; 6];
    (&tcp_socket)
        .read_exact(&mut hello)
        .context("server closed the connection during handshake")?;

    let protocol_version = u32::from_le_bytes(hello[0..4].try_into().unwrap());
    if protocol_version != PROTOCOL_VERSION {
        bail!(
            "protocol version mismatch: server {}, client {}",
            protocol_version,
            PROTOCOL_VERSION
        );
    }
    let server_udp_port = u16::from_le_bytes(hello[4..6].try_into().unwrap());

    let udp_socket = UdpSocket::bind(("0.0.0.0", in_udp_port))
        .with_context(|| format!("can not bind udp socket to port {}", in_udp_port))?;

    let server_udp_address = SocketAddr::new(server_address.ip(), server_udp_port);

    // First udp messages open the NAT pinhole; repeated for reliability.
    let mut dummy = Vec::new();
    Message::DummyNetMessage(DummyNetMessage { filler: [0; 7] }).encode(&mut dummy);
    for _ in 0..4 {
        udp_socket
            .send_to(&dummy, server_udp_address)
            .context("can not send handshake datagram")?;
    }

    let connection = NetConnection::new(tcp_socket, udp_socket, server_udp_address)?;
    Ok(Rc::new(connection))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::{MessagesExtractor, MessagesSender};
    use crate::messages::{MapChange, PlayerPosition};
    use std::time::{Duration, Instant};

    fn wait_for<T>(mut f: impl FnMut() -> Option<T>) -> T {
        let deadline = Instant::now() + Duration::from_secs(1);
        loop {
            if let Some(value) = f() {
                return value;
            }
            assert!(Instant::now() < deadline, "timed out");
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn handshake_and_both_channels_work() {
        let listener = ServerListener::bind(0, 28_000).unwrap();
        let tcp_port = listener.local_tcp_port();

        // The client handshake blocks until the server sends its hello, so it
        // runs on its own thread while this one polls the listener.
        let client_thread = std::thread::spawn(move || {
            let client = connect_to_server(&format!("127.0.0.1:{}", tcp_port), 0).unwrap();

            let mut client_extractor = MessagesExtractor::new(Rc::clone(&client));
            let map_change = wait_for(|| {
                let mut found = None;
                client_extractor.process_messages(|message| {
                    if let Message::MapChange(m) = message {
                        found = Some(m);
                    }
                });
                found
            });
            assert_eq!(map_change.map_number, 1);

            let mut client_sender = MessagesSender::new(Rc::clone(&client));
            client_sender.send_unreliable_message(PlayerPosition {
                xyz: [256, 0, 0],
                speed: 10,
            });
            client_sender.flush();

            // Keep the socket alive until the server has read the datagram.
            std::thread::sleep(Duration::from_millis(200));
        });

        let server = wait_for(|| listener.get_new_connection());

        let mut server_sender = MessagesSender::new(Rc::clone(&server));
        server_sender.send_reliable_message(MapChange {
            map_number: 1,
            need_play_cutscene: 0,
        });

        let mut server_extractor = MessagesExtractor::new(Rc::clone(&server));
        let position = wait_for(|| {
            let mut found = None;
            server_extractor.process_messages(|message| {
                if let Message::PlayerPosition(m) = message {
                    found = Some(m);
                }
            });
            found
        });
        assert_eq!(position.xyz[0], 256);

        client_thread.join().unwrap();
    }

    #[test]
    fn version_mismatch_refuses_the_handshake() {
        // A raw TCP peer that talks the wrong version.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let handle = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut hello = [0u8; 6];
            hello[0..4].copy_from_slice(&(PROTOCOL_VERSION + 1).to_le_bytes());
            (&stream).write_all(&hello).unwrap();
        });

        let result = connect_to_server(&format!("127.0.0.1:{}", port), 0);
        assert!(result.is_err());
        handle.join().unwrap();
    }
}
