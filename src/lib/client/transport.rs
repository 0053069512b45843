use async_trait::async_trait;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::str::FromStr;
use strum::{Display, EnumString};
use tokio::net::UdpSocket;

use crate::network::{
    create_udp_listen, create_udp_multicast_listen, is_admin_multicast, leave_multicast,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum TransportKind {
    #[strum(serialize = "unicast")]
    PointToPoint,
    #[strum(serialize = "multicast")]
    Multicast,
    #[strum(serialize = "listen")]
    Listener,
}

///
/// How one client obtains its datagrams. The client drives the lifecycle:
/// `connect`, then `recv` until it fails, then `disconnect`.
///
#[async_trait]
pub trait Transport: Send {
    fn kind(&self) -> TransportKind;

    /// The address reported to the consumer in connect and disconnect events.
    fn endpoint(&self) -> SocketAddrV4;

    fn is_connected(&self) -> bool;

    async fn connect(&mut self) -> io::Result<()>;

    /// Wait for the next accepted datagram, appended to `buf`.
    async fn recv(&mut self, buf: &mut Vec<u8>) -> io::Result<(usize, SocketAddr)>;

    fn disconnect(&mut self);
}

fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "socket is not open")
}

pub struct MulticastTransport {
    group: SocketAddrV4,
    nic_addr: Ipv4Addr,
    socket: Option<UdpSocket>,
}

impl MulticastTransport {
    pub fn new(group: SocketAddrV4, nic_addr: Ipv4Addr) -> Self {
        MulticastTransport {
            group,
            nic_addr,
            socket: None,
        }
    }
}

#[async_trait]
impl Transport for MulticastTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Multicast
    }

    fn endpoint(&self) -> SocketAddrV4 {
        self.group
    }

    fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    async fn connect(&mut self) -> io::Result<()> {
        let socket = create_udp_multicast_listen(&self.group, &self.nic_addr)?;
        log::debug!(
            "{} via {}: joined group, listening for CAT240",
            self.group,
            self.nic_addr
        );
        self.socket = Some(socket);
        Ok(())
    }

    async fn recv(&mut self, buf: &mut Vec<u8>) -> io::Result<(usize, SocketAddr)> {
        match &self.socket {
            Some(socket) => socket.recv_buf_from(buf).await,
            None => Err(not_connected()),
        }
    }

    fn disconnect(&mut self) {
        if let Some(socket) = self.socket.take() {
            leave_multicast(&socket, &self.group, &self.nic_addr);
        }
    }
}

///
/// Unicast from a single sender: binds the local port and drops anything
/// that does not come from the configured peer address.
///
pub struct PointToPointTransport {
    peer: Ipv4Addr,
    local_port: u16,
    nic_addr: Ipv4Addr,
    socket: Option<UdpSocket>,
}

impl PointToPointTransport {
    pub fn new(peer: Ipv4Addr, local_port: u16, nic_addr: Ipv4Addr) -> Self {
        PointToPointTransport {
            peer,
            local_port,
            nic_addr,
            socket: None,
        }
    }
}

#[async_trait]
impl Transport for PointToPointTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::PointToPoint
    }

    fn endpoint(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.peer, self.local_port)
    }

    fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    async fn connect(&mut self) -> io::Result<()> {
        let socket = create_udp_listen(self.local_port, &self.nic_addr)?;
        log::debug!(
            "{}:{}: listening for CAT240 from {}",
            self.nic_addr,
            self.local_port,
            self.peer
        );
        self.socket = Some(socket);
        Ok(())
    }

    async fn recv(&mut self, buf: &mut Vec<u8>) -> io::Result<(usize, SocketAddr)> {
        let socket = self.socket.as_ref().ok_or_else(not_connected)?;
        loop {
            let (len, from) = socket.recv_buf_from(buf).await?;
            if from.ip() == IpAddr::V4(self.peer) {
                return Ok((len, from));
            }
            log::trace!("Ignoring {} octets from {}", len, from);
            buf.clear();
        }
    }

    fn disconnect(&mut self) {
        self.socket = None;
    }
}

///
/// Server style: receives from whoever sends to the local port.
///
pub struct ListenerTransport {
    local_port: u16,
    nic_addr: Ipv4Addr,
    socket: Option<UdpSocket>,
    bound: Option<SocketAddrV4>,
    last_peer: Option<SocketAddr>,
}

impl ListenerTransport {
    pub fn new(local_port: u16, nic_addr: Ipv4Addr) -> Self {
        ListenerTransport {
            local_port,
            nic_addr,
            socket: None,
            bound: None,
            last_peer: None,
        }
    }
}

#[async_trait]
impl Transport for ListenerTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Listener
    }

    fn endpoint(&self) -> SocketAddrV4 {
        self.bound
            .unwrap_or(SocketAddrV4::new(self.nic_addr, self.local_port))
    }

    fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    async fn connect(&mut self) -> io::Result<()> {
        let socket = create_udp_listen(self.local_port, &self.nic_addr)?;
        if let SocketAddr::V4(addr) = socket.local_addr()? {
            self.bound = Some(addr);
        }
        log::debug!("{}: listening for CAT240 senders", self.endpoint());
        self.socket = Some(socket);
        Ok(())
    }

    async fn recv(&mut self, buf: &mut Vec<u8>) -> io::Result<(usize, SocketAddr)> {
        let socket = self.socket.as_ref().ok_or_else(not_connected)?;
        let (len, from) = socket.recv_buf_from(buf).await?;
        if self.last_peer != Some(from) {
            log::info!("{}: receiving from {}", self.endpoint(), from);
            self.last_peer = Some(from);
        }
        Ok((len, from))
    }

    fn disconnect(&mut self) {
        self.socket = None;
        self.last_peer = None;
    }
}

///
/// A configured radar video source, written as
/// - `multicast:<group>:<port>`
/// - `unicast:<sender>:<local port>`
/// - `listen:<local port>`
///
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    Multicast(SocketAddrV4),
    PointToPoint { peer: Ipv4Addr, port: u16 },
    Listener { port: u16 },
}

impl FromStr for SourceSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, rest) = s
            .split_once(':')
            .ok_or_else(|| format!("'{}' is not <kind>:<address>", s))?;
        let kind: TransportKind = kind
            .parse()
            .map_err(|_| format!("Unknown source kind '{}', use unicast, multicast or listen", kind))?;

        match kind {
            TransportKind::Multicast => {
                let addr: SocketAddrV4 = rest
                    .parse()
                    .map_err(|e| format!("Invalid address '{}': {}", rest, e))?;
                if !is_admin_multicast(addr.ip()) {
                    return Err(format!("{} is not a multicast address", addr.ip()));
                }
                Ok(SourceSpec::Multicast(addr))
            }
            TransportKind::PointToPoint => {
                let addr: SocketAddrV4 = rest
                    .parse()
                    .map_err(|e| format!("Invalid address '{}': {}", rest, e))?;
                Ok(SourceSpec::PointToPoint {
                    peer: *addr.ip(),
                    port: addr.port(),
                })
            }
            TransportKind::Listener => {
                let port: u16 = rest
                    .parse()
                    .map_err(|e| format!("Invalid port '{}': {}", rest, e))?;
                Ok(SourceSpec::Listener { port })
            }
        }
    }
}

impl SourceSpec {
    ///
    /// A unicast source whose address is a multicast group is joined like
    /// any other multicast source.
    ///
    pub fn transport(&self, nic_addr: Ipv4Addr) -> Box<dyn Transport> {
        match *self {
            SourceSpec::Multicast(group) => Box::new(MulticastTransport::new(group, nic_addr)),
            SourceSpec::PointToPoint { peer, port } if is_admin_multicast(&peer) => Box::new(
                MulticastTransport::new(SocketAddrV4::new(peer, port), nic_addr),
            ),
            SourceSpec::PointToPoint { peer, port } => {
                Box::new(PointToPointTransport::new(peer, port, nic_addr))
            }
            SourceSpec::Listener { port } => Box::new(ListenerTransport::new(port, nic_addr)),
        }
    }
}
