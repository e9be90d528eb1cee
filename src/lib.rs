//! SOME/IP Service Discovery: a standalone engine for finding remote
//! services, announcing local ones, and keeping eventgroup subscriptions
//! alive, independent of any particular method-dispatch stack.
//!
//! [`sd::protocol::SdProtocol`] is the entrypoint: it owns the shared
//! [`sd::core::SdCore`] (timings, session bookkeeping, transport) plus the
//! three engines ([`sd::discover::Discover`], [`sd::announce::Announce`],
//! [`sd::subscriber::Subscriber`]) and decodes/dispatches datagrams off
//! whatever [`transport::DatagramTransport`] it's given.

pub mod codec;
pub mod config;
pub mod error;
pub mod sd;
pub mod session;
pub mod transport;

pub use codec::{MessageType, ReturnCode, SomeIpHeader};
pub use config::{Timings, TTL_FOREVER};
pub use error::{DecodeError, NakSubscription, ParseError};
pub use sd::{
    auto_subscribe::{find_subscribe_eventgroup, stop_find_subscribe_eventgroup, AutoSubscribeHandle},
    protocol::SdProtocol,
    ClientServiceListener, EntryType, Eventgroup, EventgroupSubscription, L4Proto, SdEntry, SdOption, Service, ServerServiceListener,
};
pub use transport::{BoxFuture, DatagramTransport, UdpTransport};
