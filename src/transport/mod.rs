//! Datagram transport for SOME/IP-SD: an object-safe async trait plus a
//! concrete tokio/socket2-based UDP implementation. TCP transport of SD
//! is out of scope.

pub mod traits;
pub mod udp;

pub use traits::{BoxFuture, DatagramTransport};
pub use udp::{UdpTransport, DEFAULT_MULTICAST_GROUP_V4, DEFAULT_MULTICAST_GROUP_V6};
