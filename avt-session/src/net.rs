use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};

use shared::error::Result;

/// One direction-agnostic UDP leg of a session: bound to the receive port,
/// sending to the session address on the transmit port, joined to the
/// multicast group when the address is one.
///
/// The socket is nonblocking; the session's poll loop decides how long to
/// wait, not the kernel.
#[derive(Debug)]
pub(crate) struct UdpChannel {
    socket: UdpSocket,
    dest: SocketAddr,
}

impl UdpChannel {
    pub(crate) fn new(addr: IpAddr, rx_port: u16, tx_port: u16, ttl: u8) -> Result<Self> {
        let socket = match addr {
            IpAddr::V4(_) => UdpSocket::bind((Ipv4Addr::UNSPECIFIED, rx_port))?,
            IpAddr::V6(_) => UdpSocket::bind((Ipv6Addr::UNSPECIFIED, rx_port))?,
        };

        match addr {
            IpAddr::V4(v4) if v4.is_multicast() => {
                socket.join_multicast_v4(&v4, &Ipv4Addr::UNSPECIFIED)?;
                socket.set_multicast_ttl_v4(ttl as u32)?;
                socket.set_multicast_loop_v4(true)?;
            }
            IpAddr::V6(v6) if v6.is_multicast() => {
                socket.join_multicast_v6(&v6, 0)?;
                socket.set_multicast_loop_v6(true)?;
            }
            _ => {}
        }

        socket.set_nonblocking(true)?;

        Ok(UdpChannel {
            socket,
            dest: SocketAddr::new(addr, tx_port),
        })
    }

    pub(crate) fn send(&self, buf: &[u8]) -> Result<usize> {
        Ok(self.socket.send_to(buf, self.dest)?)
    }

    /// Nonblocking read of one datagram; `None` when nothing is queued.
    pub(crate) fn recv(&self, buf: &mut [u8]) -> Result<Option<usize>> {
        match self.socket.recv_from(buf) {
            Ok((n, _)) => Ok(Some(n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub(crate) fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}
