//! Bridges `Discover` offers to `Subscriber` subscriptions: watching a
//! service's template automatically subscribes to one of its eventgroups
//! wherever that service turns up, and unsubscribes once it's gone.

use crate::sd::discover::Discover;
use crate::sd::eventgroup::Eventgroup;
use crate::sd::service::Service;
use crate::sd::subscriber::Subscriber;
use crate::sd::ClientServiceListener;
use crate::transport::DatagramTransport;
use std::net::SocketAddr;
use std::sync::Arc;

struct AutoSubscribeListener<T> {
    subscriber: Arc<Subscriber<T>>,
    eventgroup: Eventgroup,
}

impl<T> ClientServiceListener for AutoSubscribeListener<T>
where
    T: DatagramTransport + 'static,
{
    fn service_offered(&self, service: &Service, source: SocketAddr) {
        let Some(eventgroup) = self.eventgroup.for_service(service) else {
            return;
        };
        // TCP eventgroups would need the application to open a connection
        // before subscribing; only UDP is wired up here.
        Subscriber::subscribe_eventgroup(&self.subscriber, eventgroup, source);
    }

    fn service_stopped(&self, service: &Service, source: SocketAddr) {
        let Some(eventgroup) = self.eventgroup.for_service(service) else {
            return;
        };
        Subscriber::stop_subscribe_eventgroup(&self.subscriber, &eventgroup, source);
    }
}

/// An auto-subscribe registration handle: keep it around to later pass to
/// [`stop_find_subscribe_eventgroup`], which removes the exact watch this
/// call registered.
pub type AutoSubscribeHandle = Arc<dyn ClientServiceListener>;

/// Starts automatically subscribing to `eventgroup` on every instance of
/// its service that `discover` finds.
pub fn find_subscribe_eventgroup<T>(discover: &Arc<Discover<T>>, subscriber: &Arc<Subscriber<T>>, eventgroup: Eventgroup) -> AutoSubscribeHandle
where
    T: DatagramTransport + 'static,
{
    let listener: AutoSubscribeHandle = Arc::new(AutoSubscribeListener { subscriber: subscriber.clone(), eventgroup: eventgroup.clone() });
    discover.watch_service(eventgroup.as_service(), listener.clone());
    listener
}

/// Stops auto-subscribing via the handle returned by
/// [`find_subscribe_eventgroup`].
pub fn stop_find_subscribe_eventgroup<T>(discover: &Arc<Discover<T>>, eventgroup: &Eventgroup, handle: &AutoSubscribeHandle)
where
    T: DatagramTransport + 'static,
{
    discover.stop_watch_service(&eventgroup.as_service(), handle);
}
