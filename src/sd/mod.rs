//! SOME/IP Service Discovery: wire codec plus the engines that discover
//! remote services, announce local ones, and track eventgroup
//! subscriptions.

pub mod core;
pub mod entries;
pub mod options;
pub mod packet;
pub mod service;
pub mod eventgroup;
pub mod timed_store;
pub mod send_collector;
pub mod discover;
pub mod announce;
pub mod subscriber;
pub mod auto_subscribe;
pub mod protocol;

pub use entries::{EntryType, OptionRun, SdEntry};
pub use eventgroup::{Eventgroup, EventgroupSubscription};
pub use options::{L4Proto, SdOption};
pub use packet::SdHeader;
pub use service::Service;

use std::net::SocketAddr;

/// Notified as `Discover` learns about and loses track of services
/// matching a watched filter.
pub trait ClientServiceListener: Send + Sync {
    fn service_offered(&self, service: &Service, source: SocketAddr);
    fn service_stopped(&self, service: &Service, source: SocketAddr);
}

/// Notified as `ServiceInstance` accepts and loses eventgroup
/// subscriptions. `client_subscribed` may return `Err(NakSubscription)`
/// to refuse the subscription.
pub trait ServerServiceListener: Send + Sync {
    fn client_subscribed(&self, subscription: &EventgroupSubscription, source: SocketAddr) -> Result<(), crate::error::NakSubscription>;
    fn client_unsubscribed(&self, subscription: &EventgroupSubscription, source: SocketAddr);
}
