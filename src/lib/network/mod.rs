use socket2::{Domain, Protocol, Type};
use std::{
    io,
    net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4},
};
use tokio::net::UdpSocket;

// CAT240 datagrams with high volume blocks get close to 64 kB
pub const RECEIVE_BUFFER_SIZE: usize = 4 * 1024 * 1024;

/// True for 224.0.0.0 through 239.255.255.255, which we join as a group.
pub fn is_admin_multicast(addr: &Ipv4Addr) -> bool {
    addr.is_multicast()
}

// this will be common for all our sockets
pub fn new_socket() -> io::Result<socket2::Socket> {
    let socket = socket2::Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;

    // tokio does the waiting for us
    socket.set_nonblocking(true)?;
    socket.set_reuse_address(true)?;
    if let Err(e) = socket.set_recv_buffer_size(RECEIVE_BUFFER_SIZE) {
        log::debug!("Cannot set receive buffer size: {}", e);
    }

    Ok(socket)
}

/// On Windows, unlike all Unix variants, it is improper to bind to the multicast address
///
/// see https://msdn.microsoft.com/en-us/library/windows/desktop/ms737550(v=vs.85).aspx
#[cfg(windows)]
fn bind_to_multicast(
    socket: &socket2::Socket,
    addr: &SocketAddrV4,
    nic_addr: &Ipv4Addr,
) -> io::Result<()> {
    socket.join_multicast_v4(addr.ip(), nic_addr)?;

    let socketaddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), addr.port());
    socket.bind(&socket2::SockAddr::from(socketaddr))?;
    log::trace!("Binding multicast socket to {}", socketaddr);

    Ok(())
}

/// On unixes we bind to the multicast address, which causes multicast packets to be filtered
#[cfg(unix)]
fn bind_to_multicast(
    socket: &socket2::Socket,
    addr: &SocketAddrV4,
    nic_addr: &Ipv4Addr,
) -> io::Result<()> {
    // Linux is special, if we don't disable IP_MULTICAST_ALL the kernel forgets on
    // which device the multicast packet arrived and sends it to all sockets.
    #[cfg(target_os = "linux")]
    {
        use std::{mem, os::unix::io::AsRawFd};

        unsafe {
            let optval: libc::c_int = 0;
            let ret = libc::setsockopt(
                socket.as_raw_fd(),
                libc::SOL_IP,
                libc::IP_MULTICAST_ALL,
                &optval as *const _ as *const libc::c_void,
                mem::size_of_val(&optval) as libc::socklen_t,
            );
            if ret != 0 {
                return Err(io::Error::last_os_error());
            }
        }
    }

    let socketaddr = SocketAddr::new(IpAddr::V4(*addr.ip()), addr.port());
    socket.bind(&socket2::SockAddr::from(socketaddr))?;

    socket.join_multicast_v4(addr.ip(), nic_addr)?;

    log::trace!(
        "Binding multicast socket to {} nic {}",
        socketaddr,
        nic_addr
    );

    Ok(())
}

///
/// Bind to `addr` and join its group via `nic_addr` (UNSPECIFIED lets the
/// kernel pick the interface).
///
pub fn create_udp_multicast_listen(
    addr: &SocketAddrV4,
    nic_addr: &Ipv4Addr,
) -> io::Result<UdpSocket> {
    let socket: socket2::Socket = new_socket()?;

    bind_to_multicast(&socket, addr, nic_addr)?;

    let socket = UdpSocket::from_std(socket.into())?;
    Ok(socket)
}

pub fn leave_multicast(socket: &UdpSocket, addr: &SocketAddrV4, nic_addr: &Ipv4Addr) {
    match socket.leave_multicast_v4(*addr.ip(), *nic_addr) {
        Ok(()) => log::trace!("Left multicast group {} nic {}", addr, nic_addr),
        Err(e) => log::debug!("Cannot leave multicast group {}: {}", addr, e),
    }
}

///
/// Receive on `local_port` from any sender, as a server style listener does.
///
pub fn create_udp_listen(local_port: u16, nic_addr: &Ipv4Addr) -> io::Result<UdpSocket> {
    let socket: socket2::Socket = new_socket()?;

    let socketaddr = SocketAddr::new(IpAddr::V4(*nic_addr), local_port);
    socket.bind(&socket2::SockAddr::from(socketaddr))?;
    log::trace!("Binding socket to {}", socketaddr);

    let socket = UdpSocket::from_std(socket.into())?;
    Ok(socket)
}

/// Sends to multicast groups over the loopback interface.
#[cfg(test)]
pub(crate) fn loopback_multicast_sender() -> io::Result<std::net::UdpSocket> {
    let socket = socket2::Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_multicast_if_v4(&Ipv4Addr::LOCALHOST)?;
    socket.set_multicast_loop_v4(true)?;
    Ok(socket.into())
}
