//! Announces locally-configured services: per-instance offer cycling
//! (Initial Wait -> Repetition -> Cyclic Main phase) and dispatch of
//! incoming FindService/Subscribe entries to the instances they match.

use crate::error::NakSubscription;
use crate::sd::core::SdCore;
use crate::sd::entries::{EntryType, SdEntry};
use crate::sd::eventgroup::EventgroupSubscription;
use crate::sd::send_collector::SendCollector;
use crate::sd::service::Service;
use crate::sd::timed_store::{NotifyFn, TimedStore};
use crate::sd::ServerServiceListener;
use crate::transport::DatagramTransport;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// One locally-announced service instance: owns the offer-cycling task
/// and the eventgroup subscriptions clients have registered against it.
pub struct ServiceInstance<T> {
    pub service: Service,
    listener: Arc<dyn ServerServiceListener>,
    core: Arc<SdCore<T>>,
    /// True once the Initial Wait phase's first offer has been sent.
    /// FindService is ignored while this is false (4.2.1 SWS_SD_00319).
    can_answer_offers: AtomicBool,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    subscriptions: TimedStore<EventgroupSubscription>,
}

impl<T> ServiceInstance<T>
where
    T: DatagramTransport + 'static,
{
    pub fn new(service: Service, listener: Arc<dyn ServerServiceListener>, core: Arc<SdCore<T>>) -> Arc<Self> {
        Arc::new(ServiceInstance {
            service,
            listener,
            core,
            can_answer_offers: AtomicBool::new(false),
            task: Mutex::new(None),
            subscriptions: TimedStore::new(),
        })
    }

    pub fn start(this: &Arc<Self>, announcer: &Arc<Announce<T>>) {
        this.can_answer_offers.store(false, Ordering::SeqCst);
        let this2 = this.clone();
        let announcer = announcer.clone();
        let handle = tokio::spawn(async move { this2.offer_cycle(announcer).await });
        *this.task.lock().unwrap() = Some(handle);
    }

    pub fn stop(this: &Arc<Self>, announcer: &Arc<Announce<T>>) {
        if let Some(handle) = this.task.lock().unwrap().take() {
            handle.abort();
        }
        this.can_answer_offers.store(false, Ordering::SeqCst);
        // Aborting the offer task skips any in-task cleanup, so the final
        // stop-offer is sent here instead; this is the only teardown path.
        if !this.core.timings.cyclic_offer_delay.get().is_zero() {
            announcer.queue_send(this.service.create_offer_entry(0), None);
        }
        this.subscriptions.stop_all();
    }

    async fn offer_cycle(self: Arc<Self>, announcer: Arc<Announce<T>>) {
        let timings = &self.core.timings;
        let ttl_as_duration = std::time::Duration::from_secs(timings.announce_ttl as u64);
        if timings.cyclic_offer_delay.get().is_zero() || timings.cyclic_offer_delay.get() >= ttl_as_duration {
            log::warn!(
                "cyclic_offer_delay={:?} too long relative to announce_ttl={} for {}, expect connectivity issues",
                timings.cyclic_offer_delay.get(),
                timings.announce_ttl,
                self.service
            );
        }

        let delay = crate::sd::core::jittered(timings.initial_delay_min.get(), timings.initial_delay_max.get());
        tokio::time::sleep(delay).await;
        announcer.queue_send(self.service.create_offer_entry(timings.announce_ttl), None);
        self.can_answer_offers.store(true, Ordering::SeqCst);

        for i in 0..timings.repetitions_max {
            let backoff = timings.repetitions_base_delay.get() * 2u32.pow(i);
            tokio::time::sleep(backoff).await;
            announcer.queue_send(self.service.create_offer_entry(timings.announce_ttl), None);
        }

        if timings.cyclic_offer_delay.get().is_zero() {
            return;
        }

        loop {
            tokio::time::sleep(timings.cyclic_offer_delay.get()).await;
            announcer.queue_send(self.service.create_offer_entry(timings.announce_ttl), None);
        }
    }

    fn matches_find(&self, entry: &SdEntry, addr: SocketAddr) -> bool {
        if !self.can_answer_offers.load(Ordering::SeqCst) {
            log::info!("ignoring FindService from {addr} during Initial Wait Phase: {entry:?}");
            return false;
        }
        self.service.matches_find(entry)
    }

    /// Returns whether this instance matched the Subscribe entry at all
    /// (used by `Announce` to warn on multi-match and NACK on no-match).
    fn handle_subscribe(this: &Arc<Self>, announcer: &Arc<Announce<T>>, entry: &SdEntry, addr: SocketAddr) -> bool {
        if this.task.lock().unwrap().is_none() {
            return false;
        }
        if !this.service.matches_subscribe(entry) {
            return false;
        }

        let subscription = EventgroupSubscription::from_subscribe_entry(entry);
        if entry.ttl == 0 {
            let _ = this.subscriptions.stop(addr, &subscription);
            return true;
        }

        let listener = this.listener.clone();
        let on_new: NotifyFn<EventgroupSubscription> = Arc::new(move |subscription, addr| listener.client_subscribed(subscription, addr));
        let listener = this.listener.clone();
        let on_expire: NotifyFn<EventgroupSubscription> = Arc::new(move |subscription, addr| {
            listener.client_unsubscribed(subscription, addr);
            Ok(())
        });

        match this.subscriptions.refresh(subscription.ttl, addr, subscription.clone(), on_new, on_expire) {
            Ok(()) => announcer.queue_send(subscription.to_ack_entry(), Some(addr)),
            Err(NakSubscription) => announcer.send_subscribe_nack(&subscription, addr),
        }
        true
    }

    fn reboot_detected(&self, addr: SocketAddr) {
        self.subscriptions.stop_all_for_address(addr);
    }
}

/// Owns every locally-announced `ServiceInstance` plus the per-remote
/// send collectors FindService/Subscribe responses are batched through.
pub struct Announce<T> {
    core: Arc<SdCore<T>>,
    instances: Mutex<Vec<Arc<ServiceInstance<T>>>>,
    send_queues: Mutex<HashMap<Option<SocketAddr>, Arc<SendCollector<SdEntry>>>>,
    started: AtomicBool,
}

impl<T> Announce<T>
where
    T: DatagramTransport + 'static,
{
    pub fn new(core: Arc<SdCore<T>>) -> Arc<Self> {
        Arc::new(Announce {
            core,
            instances: Mutex::new(Vec::new()),
            send_queues: Mutex::new(HashMap::new()),
            started: AtomicBool::new(false),
        })
    }

    /// Queues `entry` for `remote`, batching with whatever else is queued
    /// for the same remote until `SEND_COLLECTION_TIMEOUT` elapses.
    /// Sends immediately when that timeout is zero.
    pub fn queue_send(self: &Arc<Self>, entry: SdEntry, remote: Option<SocketAddr>) {
        let timeout = self.core.timings.send_collection_timeout.get();
        if timeout.is_zero() {
            crate::sd::core::SdCore::queue_send_sd(self.core.clone(), vec![entry], remote);
            return;
        }

        let mut queues = self.send_queues.lock().unwrap();
        let needs_new = queues.get(&remote).map(|q| q.is_done()).unwrap_or(true);
        if needs_new {
            let core = self.core.clone();
            let collector = Arc::new(SendCollector::new(
                remote,
                timeout,
                Arc::new(move |entries: Vec<SdEntry>, remote| {
                    crate::sd::core::SdCore::queue_send_sd(core.clone(), entries, remote);
                }),
            ));
            queues.insert(remote, collector);
        }
        let _ = queues.get(&remote).unwrap().append(entry);
    }

    pub fn send_subscribe_nack(self: &Arc<Self>, subscription: &EventgroupSubscription, addr: SocketAddr) {
        self.queue_send(subscription.to_nack_entry(), Some(addr));
    }

    pub fn announce_service(this: &Arc<Self>, instance: Arc<ServiceInstance<T>>) {
        if this.started.load(Ordering::SeqCst) {
            ServiceInstance::start(&instance, this);
        }
        this.instances.lock().unwrap().push(instance);
    }

    pub fn stop_announce_service(this: &Arc<Self>, instance: &Arc<ServiceInstance<T>>) {
        let mut instances = this.instances.lock().unwrap();
        if let Some(pos) = instances.iter().position(|i| Arc::ptr_eq(i, instance)) {
            instances.remove(pos);
        }
        drop(instances);
        if this.started.load(Ordering::SeqCst) {
            ServiceInstance::stop(instance, this);
        }
    }

    pub fn handle_subscribe(this: &Arc<Self>, entry: &SdEntry, addr: SocketAddr) {
        assert_eq!(entry.entry_type, EntryType::Subscribe);
        let instances: Vec<_> = this.instances.lock().unwrap().clone();
        let matched: Vec<_> = instances.iter().filter(|i| ServiceInstance::handle_subscribe(i, this, entry, addr)).collect();

        if matched.is_empty() {
            log::warn!("discarding subscribe for unknown service from {addr}: {entry:?}");
            let subscription = EventgroupSubscription::from_subscribe_entry(entry);
            this.send_subscribe_nack(&subscription, addr);
        } else if matched.len() > 1 {
            log::warn!("multiple configured services matched subscribe {entry:?} from {addr}");
        }
    }

    pub async fn handle_findservice(this: &Arc<Self>, entry: SdEntry, addr: SocketAddr, received_over_multicast: bool) {
        log::info!("received FindService from {addr}: {entry:?}");
        assert_eq!(entry.entry_type, EntryType::FindService);

        let instances: Vec<_> = this
            .instances
            .lock()
            .unwrap()
            .iter()
            .filter(|i| i.matches_find(&entry, addr))
            .cloned()
            .collect();
        if instances.is_empty() {
            return;
        }

        // R21-11 PRS_SOMEIPSD_00417/00419/00420/00421: delay the response
        // when the request arrived over multicast, to spread out replies
        // from every matching responder on the network.
        if received_over_multicast {
            let delay = crate::sd::core::jittered(this.core.timings.request_response_delay_min.get(), this.core.timings.request_response_delay_max.get());
            tokio::time::sleep(delay).await;
        }
        for instance in instances {
            this.queue_send(instance.service.create_offer_entry(this.core.timings.announce_ttl), Some(addr));
        }
    }

    pub fn start(this: &Arc<Self>) {
        let instances: Vec<_> = this.instances.lock().unwrap().clone();
        for instance in instances {
            ServiceInstance::start(&instance, this);
        }
        this.started.store(true, Ordering::SeqCst);
    }

    pub fn stop(this: &Arc<Self>) {
        let instances: Vec<_> = this.instances.lock().unwrap().clone();
        for instance in instances {
            ServiceInstance::stop(&instance, this);
        }
        this.started.store(false, Ordering::SeqCst);
    }

    pub fn connection_lost(this: &Arc<Self>) {
        Self::stop(this);
    }

    pub fn reboot_detected(&self, addr: SocketAddr) {
        for instance in self.instances.lock().unwrap().iter() {
            instance.reboot_detected(addr);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NakSubscription;
    use crate::sd::options::{L4Proto, SdOption};
    use crate::transport::BoxFuture;
    use std::net::Ipv4Addr;
    use std::sync::atomic::AtomicUsize;

    struct NullTransport;
    impl DatagramTransport for NullTransport {
        fn send_to<'a>(&'a self, _data: &'a [u8], _peer: Option<SocketAddr>) -> BoxFuture<'a, std::io::Result<()>> {
            Box::pin(async { Ok(()) })
        }
        fn recv<'a>(&'a self) -> BoxFuture<'a, std::io::Result<(Vec<u8>, SocketAddr, bool)>> {
            Box::pin(async { Err(std::io::Error::new(std::io::ErrorKind::Other, "unused")) })
        }
    }

    struct AcceptingListener {
        subscribed: AtomicUsize,
        unsubscribed: AtomicUsize,
    }
    impl ServerServiceListener for AcceptingListener {
        fn client_subscribed(&self, _s: &EventgroupSubscription, _addr: SocketAddr) -> Result<(), NakSubscription> {
            self.subscribed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn client_unsubscribed(&self, _s: &EventgroupSubscription, _addr: SocketAddr) {
            self.unsubscribed.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct RefusingListener;
    impl ServerServiceListener for RefusingListener {
        fn client_subscribed(&self, _s: &EventgroupSubscription, _addr: SocketAddr) -> Result<(), NakSubscription> {
            Err(NakSubscription)
        }
        fn client_unsubscribed(&self, _s: &EventgroupSubscription, _addr: SocketAddr) {}
    }

    fn core() -> Arc<SdCore<NullTransport>> {
        Arc::new(SdCore::new(crate::config::Timings::default(), NullTransport))
    }

    fn addr() -> SocketAddr {
        "192.168.1.7:30491".parse().unwrap()
    }

    fn endpoint() -> SdOption {
        SdOption::Ipv4Endpoint { address: Ipv4Addr::new(192, 168, 1, 7), l4proto: L4Proto::Udp, port: 30501 }
    }

    #[tokio::test]
    async fn subscribe_before_started_is_rejected() {
        let announcer = Announce::new(core());
        let listener = Arc::new(AcceptingListener { subscribed: AtomicUsize::new(0), unsubscribed: AtomicUsize::new(0) });
        let instance = ServiceInstance::new(Service::new(1, 1, 1, 0).with_eventgroups([5]), listener.clone(), announcer.core.clone());
        Announce::announce_service(&announcer, instance);

        let entry = SdEntry::subscribe(1, 1, 1, 5, 0, 5, vec![endpoint()]);
        Announce::handle_subscribe(&announcer, &entry, addr());
        assert_eq!(listener.subscribed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn accepted_subscribe_acks_and_notifies_listener() {
        let announcer = Announce::new(core());
        let listener = Arc::new(AcceptingListener { subscribed: AtomicUsize::new(0), unsubscribed: AtomicUsize::new(0) });
        let instance = ServiceInstance::new(Service::new(1, 1, 1, 0).with_eventgroups([5]), listener.clone(), announcer.core.clone());
        Announce::announce_service(&announcer, instance);
        Announce::start(&announcer);
        tokio::time::advance(std::time::Duration::from_secs(5)).await;
        tokio::task::yield_now().await;

        let entry = SdEntry::subscribe(1, 1, 1, 5, 0, 5, vec![endpoint()]);
        Announce::handle_subscribe(&announcer, &entry, addr());
        assert_eq!(listener.subscribed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn refused_subscribe_sends_nack_not_ack() {
        let announcer = Announce::new(core());
        let listener = Arc::new(RefusingListener);
        let instance = ServiceInstance::new(Service::new(1, 1, 1, 0).with_eventgroups([5]), listener, announcer.core.clone());
        Announce::announce_service(&announcer, instance);
        Announce::start(&announcer);
        tokio::time::advance(std::time::Duration::from_secs(5)).await;
        tokio::task::yield_now().await;

        let entry = SdEntry::subscribe(1, 1, 1, 5, 0, 5, vec![endpoint()]);
        // Should not panic; NACK path exercised via send_subscribe_nack.
        Announce::handle_subscribe(&announcer, &entry, addr());
    }

    #[tokio::test]
    async fn unknown_service_subscribe_is_nacked() {
        let announcer = Announce::new(core());
        let entry = SdEntry::subscribe(0xDEAD, 1, 1, 1, 0, 5, vec![endpoint()]);
        Announce::handle_subscribe(&announcer, &entry, addr());
    }
}
