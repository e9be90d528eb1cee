//! Async UDP transport: a `tokio::net::UdpSocket` joined to the SD
//! multicast group, built from a `socket2::Socket` the way the
//! synchronous original bound it.

use crate::transport::traits::{BoxFuture, DatagramTransport};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::net::UdpSocket;

pub struct UdpTransport {
    socket: UdpSocket,
    /// Destination used when `send_to` is called with `peer: None`.
    default_destination: SocketAddr,
    /// Set for sockets bound via `bind_multicast`; every datagram this
    /// transport receives is reported as multicast. Determining this per
    /// datagram would need OS-specific ancillary data and is out of scope.
    multicast: bool,
}

impl UdpTransport {
    /// Binds a plain unicast socket to `local_addr`.
    pub async fn bind_unicast(local_addr: SocketAddr, default_destination: SocketAddr) -> std::io::Result<Self> {
        let domain = match local_addr {
            SocketAddr::V4(_) => Domain::IPV4,
            SocketAddr::V6(_) => Domain::IPV6,
        };
        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        #[cfg(all(unix, not(target_os = "solaris"), not(target_os = "illumos")))]
        socket.set_reuse_port(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&local_addr.into())?;
        log::debug!("bound unicast SD socket on {local_addr}");
        let socket = UdpSocket::from_std(socket.into())?;
        Ok(UdpTransport { socket, default_destination, multicast: false })
    }

    /// Binds a socket joined to `group` (the SD multicast address) and
    /// listening on `bind_addr`'s port, preserving the platform split the
    /// synchronous transport this replaces used: Windows binds the
    /// unicast interface address, Unix binds the multicast group address
    /// since binding unicast there blocks multicast delivery.
    pub async fn bind_multicast(
        bind_addr: SocketAddr,
        group: SocketAddr,
        interface: IpAddr,
        iface_name: Option<&str>,
    ) -> std::io::Result<Self> {
        let domain = match bind_addr {
            SocketAddr::V4(_) => Domain::IPV4,
            SocketAddr::V6(_) => Domain::IPV6,
        };
        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        #[cfg(all(unix, not(target_os = "solaris"), not(target_os = "illumos")))]
        socket.set_reuse_port(true)?;
        socket.set_nonblocking(true)?;
        match bind_addr {
            SocketAddr::V4(_) => socket.set_multicast_loop_v4(true)?,
            SocketAddr::V6(_) => socket.set_multicast_loop_v6(true)?,
        }

        #[cfg(windows)]
        {
            log::debug!("binding unicast SD socket on {bind_addr} (windows)");
            socket.bind(&bind_addr.into())?;
        }
        #[cfg(unix)]
        {
            let mcast_bind: SocketAddr = SocketAddr::new(group.ip(), bind_addr.port());
            if let Some(ifname) = iface_name {
                if let Err(err) = socket.bind_device(Some(ifname.as_bytes())) {
                    log::warn!("failed to bind SD socket to device {ifname}: {err}");
                }
            }
            log::debug!("binding multicast SD socket on {mcast_bind} (unix)");
            socket.bind(&mcast_bind.into())?;
        }

        match (group.ip(), interface) {
            (IpAddr::V4(group_v4), IpAddr::V4(iface_v4)) => {
                socket.join_multicast_v4(&group_v4, &iface_v4)?;
            }
            (IpAddr::V6(group_v6), _) => {
                socket.join_multicast_v6(&group_v6, 0)?;
            }
            _ => {
                return Err(std::io::Error::new(std::io::ErrorKind::InvalidInput, "group/interface address family mismatch"));
            }
        }
        log::debug!("joined multicast group {group}");
        let socket = UdpSocket::from_std(socket.into())?;
        Ok(UdpTransport { socket, default_destination: group, multicast: true })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn set_multicast_ttl_v4(&self, ttl: u32) -> std::io::Result<()> {
        use socket2::SockRef;
        SockRef::from(&self.socket).set_multicast_ttl_v4(ttl)
    }
}

impl DatagramTransport for UdpTransport {
    fn send_to<'a>(&'a self, data: &'a [u8], peer: Option<SocketAddr>) -> BoxFuture<'a, std::io::Result<()>> {
        Box::pin(async move {
            let destination = peer.unwrap_or(self.default_destination);
            match self.socket.send_to(data, destination).await {
                Ok(_) => Ok(()),
                Err(err) => {
                    log::error!("send to {destination} failed: {err}");
                    Err(err)
                }
            }
        })
    }

    fn recv<'a>(&'a self) -> BoxFuture<'a, std::io::Result<(Vec<u8>, SocketAddr, bool)>> {
        Box::pin(async move {
            let mut buf = vec![0u8; 65535];
            let (len, source) = self.socket.recv_from(&mut buf).await?;
            buf.truncate(len);
            Ok((buf, source, self.multicast))
        })
    }
}

/// The SOME/IP-SD reserved multicast group, used when callers don't
/// configure a different one.
pub const DEFAULT_MULTICAST_GROUP_V4: Ipv4Addr = Ipv4Addr::new(224, 224, 224, 245);
pub const DEFAULT_MULTICAST_GROUP_V6: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 0x1);
