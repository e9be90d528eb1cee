//! The transport abstraction `SdProtocol` sends and receives through.
//! Socket binding and multicast-join mechanics are OS-specific and out of
//! scope for the core; this trait only names the interface a concrete
//! transport must provide.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait DatagramTransport: Send + Sync {
    /// Sends `data` to `peer`, or to this transport's default destination
    /// (typically the SD multicast group) when `peer` is `None`.
    fn send_to<'a>(&'a self, data: &'a [u8], peer: Option<SocketAddr>) -> BoxFuture<'a, std::io::Result<()>>;

    /// Waits for the next datagram, returning its bytes, source address,
    /// and whether it arrived addressed to this transport's multicast
    /// group rather than unicast to it.
    fn recv<'a>(&'a self) -> BoxFuture<'a, std::io::Result<(Vec<u8>, SocketAddr, bool)>>;
}
