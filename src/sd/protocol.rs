//! The hub that owns the shared core, the three sub-engines, and the
//! receive loop that decodes incoming datagrams and dispatches their
//! entries.
//!
//! Reboot fan-out and per-entry dispatch both happen synchronously,
//! in-order, on the single task that reads datagrams off the transport
//! (see [`SdProtocol::handle_datagram`]) rather than through an explicit
//! deferred-call queue. That trivially satisfies the ordering requirement
//! that a reboot be reported before any entry carried in the same
//! datagram is acted on — sequential synchronous calls are already more
//! strictly ordered than a queue would guarantee.

use crate::codec::header::{MessageType, ReturnCode, SomeIpHeader};
use crate::config::Timings;
use crate::sd::announce::Announce;
use crate::sd::core::SdCore;
use crate::sd::discover::Discover;
use crate::sd::entries::EntryType;
use crate::sd::packet::SdHeader;
use crate::sd::subscriber::Subscriber;
use crate::transport::DatagramTransport;
use std::net::SocketAddr;
use std::sync::Arc;

pub struct SdProtocol<T> {
    core: Arc<SdCore<T>>,
    pub discover: Arc<Discover<T>>,
    pub announce: Arc<Announce<T>>,
    pub subscriber: Arc<Subscriber<T>>,
    receive_task: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl<T> SdProtocol<T>
where
    T: DatagramTransport + 'static,
{
    pub fn new(timings: Timings, transport: T) -> Arc<Self> {
        let core = Arc::new(SdCore::new(timings, transport));
        Arc::new(SdProtocol {
            discover: Discover::new(core.clone()),
            announce: Announce::new(core.clone()),
            subscriber: Subscriber::new(core.clone()),
            core,
            receive_task: std::sync::Mutex::new(None),
        })
    }

    /// Sends `entries` immediately (no batching), matching the
    /// `send_sd` entrypoint applications and the sub-engines' collectors
    /// call. Does nothing for an empty entry list.
    pub async fn send_sd(&self, entries: Vec<crate::sd::entries::SdEntry>, remote: Option<SocketAddr>) {
        self.core.send_sd(entries, remote).await;
    }

    pub fn transport(&self) -> &T {
        self.core.transport()
    }

    pub fn start(this: &Arc<Self>) {
        Discover::start(&this.discover);
        Announce::start(&this.announce);
        Subscriber::start(&this.subscriber);

        let this2 = this.clone();
        let handle = tokio::spawn(async move { this2.receive_loop().await });
        *this.receive_task.lock().unwrap() = Some(handle);
    }

    pub fn stop(this: &Arc<Self>) {
        if let Some(handle) = this.receive_task.lock().unwrap().take() {
            handle.abort();
        }
        Announce::stop(&this.announce);
        Subscriber::stop(&this.subscriber, true);
    }

    async fn receive_loop(self: Arc<Self>) {
        loop {
            match self.core.transport().recv().await {
                Ok((bytes, addr, multicast)) => self.handle_datagram(&bytes, addr, multicast).await,
                Err(err) => {
                    log::error!("SD transport lost: {err}");
                    self.connection_lost();
                    return;
                }
            }
        }
    }

    fn connection_lost(&self) {
        self.discover.connection_lost();
        Announce::connection_lost(&self.announce);
        Subscriber::connection_lost(&self.subscriber);
    }

    fn reboot_detected(&self, addr: SocketAddr) {
        self.discover.reboot_detected(addr);
        self.announce.reboot_detected(addr);
        self.subscriber.reboot_detected(addr);
    }

    async fn handle_datagram(self: &Arc<Self>, bytes: &[u8], addr: SocketAddr, multicast: bool) {
        let header = match SomeIpHeader::parse(bytes) {
            Ok(h) => h,
            Err(err) => {
                log::error!("SD-message did not parse: {err}");
                return;
            }
        };

        if !header.is_sd_envelope() || header.message_type != MessageType::Notification || header.return_code != ReturnCode::Ok {
            log::error!("SD protocol received non-SD message from {addr}: {header:?}");
            return;
        }

        let mut sd_header = match SdHeader::parse(&header.payload) {
            Ok(h) => h,
            Err(err) => {
                log::error!("SD-message did not parse: {err}");
                return;
            }
        };

        if self.core.check_received(addr, multicast, sd_header.flag_reboot, header.session_id) {
            self.reboot_detected(addr);
        }

        // TR_SOMEIP_00548: resolving entries against the option table
        // drops SD Endpoint options not referenced by any entry.
        if let Err(err) = sd_header.resolve_all_options() {
            log::error!("SD-message options did not resolve: {err}");
            return;
        }

        self.sd_message_received(sd_header, addr, multicast).await;
    }

    async fn sd_message_received(self: &Arc<Self>, sd_header: SdHeader, addr: SocketAddr, multicast: bool) {
        log::debug!("sd_message_received from {addr} (multicast={multicast}): {sd_header:?}");

        if !sd_header.flag_unicast {
            // R21-11 PRS_SOMEIPSD_00843: ignore multicast-only SD messages.
            log::warn!("discarding multicast-only SD message from {addr}");
            return;
        }

        for entry in sd_header.entries {
            match entry.entry_type {
                EntryType::OfferService => {
                    Discover::handle_offer(&self.discover, &entry, addr);
                }
                EntryType::SubscribeAck => {
                    if entry.ttl == 0 {
                        log::info!("received Subscribe NACK from {addr}: {entry:?}");
                    } else {
                        log::info!("received Subscribe ACK from {addr}: {entry:?}");
                    }
                }
                EntryType::FindService => {
                    let announce = self.announce.clone();
                    tokio::spawn(async move { Announce::handle_findservice(&announce, entry, addr, multicast).await });
                }
                EntryType::Subscribe => {
                    if multicast {
                        log::warn!("discarding subscribe received over multicast from {addr}: {entry:?}");
                        continue;
                    }
                    Announce::handle_subscribe(&self.announce, &entry, addr);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sd::entries::SdEntry;
    use crate::sd::service::Service;
    use crate::transport::BoxFuture;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use tokio::sync::Notify;

    struct LoopbackTransport {
        inbound: StdMutex<std::collections::VecDeque<(Vec<u8>, SocketAddr, bool)>>,
        notify: Notify,
        sent: AtomicUsize,
    }

    impl LoopbackTransport {
        fn new() -> Self {
            LoopbackTransport { inbound: StdMutex::new(std::collections::VecDeque::new()), notify: Notify::new(), sent: AtomicUsize::new(0) }
        }

        fn push(&self, bytes: Vec<u8>, from: SocketAddr, multicast: bool) {
            self.inbound.lock().unwrap().push_back((bytes, from, multicast));
            self.notify.notify_one();
        }
    }

    impl DatagramTransport for LoopbackTransport {
        fn send_to<'a>(&'a self, _data: &'a [u8], _peer: Option<SocketAddr>) -> BoxFuture<'a, std::io::Result<()>> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(()) })
        }

        fn recv<'a>(&'a self) -> BoxFuture<'a, std::io::Result<(Vec<u8>, SocketAddr, bool)>> {
            Box::pin(async move {
                loop {
                    if let Some(item) = self.inbound.lock().unwrap().pop_front() {
                        return Ok(item);
                    }
                    self.notify.notified().await;
                }
            })
        }
    }

    fn peer() -> SocketAddr {
        "10.0.0.9:30490".parse().unwrap()
    }

    fn offer_datagram(session_id: u16, reboot: bool, ttl: u32) -> Vec<u8> {
        let entry = SdEntry::offer_service(0x1234, 1, 1, 0, ttl, vec![]);
        let sd = SdHeader::new(reboot, true, vec![entry]).assign_option_indexes();
        let someip = SomeIpHeader::new_sd(0, session_id, sd.build());
        someip.build()
    }

    #[tokio::test]
    async fn offer_datagram_notifies_watcher() {
        let protocol = SdProtocol::new(Timings::default(), LoopbackTransport::new());
        let listener = Arc::new(RecordingListener::default());
        protocol.discover.watch_service(Service::new(0x1234, 1, 1, 0), listener.clone());
        SdProtocol::start(&protocol);

        protocol.core.transport().push(offer_datagram(1, true, 3), peer(), false);
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        assert_eq!(listener.offered.load(Ordering::SeqCst), 1);
    }

    #[derive(Default)]
    struct RecordingListener {
        offered: AtomicUsize,
        stopped: AtomicUsize,
    }
    impl crate::sd::ClientServiceListener for RecordingListener {
        fn service_offered(&self, _service: &Service, _source: SocketAddr) {
            self.offered.fetch_add(1, Ordering::SeqCst);
        }
        fn service_stopped(&self, _service: &Service, _source: SocketAddr) {
            self.stopped.fetch_add(1, Ordering::SeqCst);
        }
    }
}
