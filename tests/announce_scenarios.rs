//! Offer-cycle and subscribe-handling scenarios for `Announce`.

mod support;

use someip_sd_core::config::{DurationSecs, Timings};
use someip_sd_core::error::NakSubscription;
use someip_sd_core::sd::announce::{Announce, ServiceInstance};
use someip_sd_core::sd::core::SdCore;
use someip_sd_core::sd::entries::SdEntry;
use someip_sd_core::sd::eventgroup::EventgroupSubscription;
use someip_sd_core::sd::service::Service;
use someip_sd_core::ServerServiceListener;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use support::{LoopbackTransport, NullTransport};

fn peer() -> SocketAddr {
    "10.0.0.2:4000".parse().unwrap()
}

/// `queue_send` bypasses `SendCollector` only when this is zero; tests that
/// assert send counts at precise points set it explicitly instead of
/// reasoning about collector-batching delay on top of engine timers.
fn no_batching(mut timings: Timings) -> Timings {
    timings.send_collection_timeout = DurationSecs::from_millis(0);
    timings
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

/// Scenario C: offer cycle sends at Initial Wait, each repetition, then
/// cyclically, and emits a final ttl=0 entry on stop.
#[tokio::test(start_paused = true)]
async fn scenario_c_offer_cycle_then_stop_offer() {
    let mut timings = no_batching(Timings::default());
    timings.announce_ttl = 3;
    timings.initial_delay_min = DurationSecs::from_millis(0);
    timings.initial_delay_max = DurationSecs::from_millis(0);
    timings.repetitions_max = 2;
    timings.repetitions_base_delay = DurationSecs::from_millis(10);
    timings.cyclic_offer_delay = DurationSecs::from_millis(100);

    let core = Arc::new(SdCore::new(timings, LoopbackTransport::new()));
    let announcer = Announce::new(core.clone());
    let listener = Arc::new(AcceptingListener { subscribed: AtomicUsize::new(0), unsubscribed: AtomicUsize::new(0) });
    let instance = ServiceInstance::new(Service::new(0xABCD, 0x1, 1, 7), listener, core.clone());
    Announce::announce_service(&announcer, instance.clone());
    Announce::start(&announcer);

    tokio::task::yield_now().await;
    tokio::task::yield_now().await;
    assert_eq!(core.transport().sent.load(Ordering::SeqCst), 1, "initial wait offer at t=0");

    tokio::time::advance(Duration::from_millis(10)).await;
    tokio::task::yield_now().await;
    tokio::task::yield_now().await;
    assert_eq!(core.transport().sent.load(Ordering::SeqCst), 2, "repetition i=0 at t=0.01");

    tokio::time::advance(Duration::from_millis(20)).await;
    tokio::task::yield_now().await;
    tokio::task::yield_now().await;
    assert_eq!(core.transport().sent.load(Ordering::SeqCst), 3, "repetition i=1 at t=0.03");

    tokio::time::advance(Duration::from_millis(100)).await;
    tokio::task::yield_now().await;
    tokio::task::yield_now().await;
    assert_eq!(core.transport().sent.load(Ordering::SeqCst), 4, "first cyclic offer at t=0.13");

    let before_stop = core.transport().sent.load(Ordering::SeqCst);
    Announce::stop_announce_service(&announcer, &instance);
    tokio::task::yield_now().await;
    assert_eq!(
        core.transport().sent.load(Ordering::SeqCst),
        before_stop + 1,
        "stop emits exactly one final ttl=0 entry when CYCLIC_OFFER_DELAY > 0"
    );
}

/// With CYCLIC_OFFER_DELAY == 0 the offer task completes after the
/// repetition phase and stop must not emit a trailing entry.
#[tokio::test(start_paused = true)]
async fn zero_cyclic_delay_sends_no_stop_offer() {
    let mut timings = no_batching(Timings::default());
    timings.initial_delay_min = DurationSecs::from_millis(0);
    timings.initial_delay_max = DurationSecs::from_millis(0);
    timings.repetitions_max = 0;
    timings.cyclic_offer_delay = DurationSecs::from_millis(0);

    let core = Arc::new(SdCore::new(timings, LoopbackTransport::new()));
    let announcer = Announce::new(core.clone());
    let listener = Arc::new(AcceptingListener { subscribed: AtomicUsize::new(0), unsubscribed: AtomicUsize::new(0) });
    let instance = ServiceInstance::new(Service::new(0xABCD, 0x1, 1, 7), listener, core.clone());
    Announce::announce_service(&announcer, instance.clone());
    Announce::start(&announcer);
    tokio::task::yield_now().await;
    tokio::task::yield_now().await;

    let sent_before_stop = core.transport().sent.load(Ordering::SeqCst);
    assert_eq!(sent_before_stop, 1, "single initial offer, no repetitions");

    Announce::stop_announce_service(&announcer, &instance);
    tokio::task::yield_now().await;
    assert_eq!(core.transport().sent.load(Ordering::SeqCst), sent_before_stop, "no stop-offer when CYCLIC_OFFER_DELAY == 0");
}

/// Scenario D: a Subscribe matching an offered eventgroup acks and notifies
/// the listener; letting the subscription's ttl elapse unsubscribes it.
#[tokio::test(start_paused = true)]
async fn scenario_d_subscribe_happy_path_then_expiry() {
    let core = Arc::new(SdCore::new(Timings::default(), NullTransport));
    let announcer = Announce::new(core.clone());
    let listener = Arc::new(AcceptingListener { subscribed: AtomicUsize::new(0), unsubscribed: AtomicUsize::new(0) });
    let instance = ServiceInstance::new(Service::new(0xABCD, 0x1, 1, 99).with_eventgroups([0x5]), listener.clone(), core.clone());
    Announce::announce_service(&announcer, instance);
    Announce::start(&announcer);
    tokio::time::advance(Duration::from_secs(5)).await;
    tokio::task::yield_now().await;

    let entry = SdEntry::subscribe(0xABCD, 0x1, 1, 0x5, 0, 5, vec![]);
    Announce::handle_subscribe(&announcer, &entry, peer());
    assert_eq!(listener.subscribed.load(Ordering::SeqCst), 1);

    tokio::time::advance(Duration::from_secs(5) + Duration::from_millis(100)).await;
    tokio::task::yield_now().await;
    assert_eq!(listener.unsubscribed.load(Ordering::SeqCst), 1);
}

/// Scenario E: a refusing listener drives a NACK instead of an ack, and the
/// subscription is never stored.
#[tokio::test(start_paused = true)]
async fn scenario_e_subscribe_refused_sends_nack() {
    let core = Arc::new(SdCore::new(no_batching(Timings::default()), LoopbackTransport::new()));
    let announcer = Announce::new(core.clone());
    let instance = ServiceInstance::new(Service::new(0xABCD, 0x1, 1, 99).with_eventgroups([0x5]), Arc::new(RefusingListener), core.clone());
    Announce::announce_service(&announcer, instance);
    Announce::start(&announcer);
    tokio::time::advance(Duration::from_secs(5)).await;
    tokio::task::yield_now().await;
    tokio::task::yield_now().await;

    let sent_before = core.transport().sent.load(Ordering::SeqCst);
    let entry = SdEntry::subscribe(0xABCD, 0x1, 1, 0x5, 0, 5, vec![]);
    Announce::handle_subscribe(&announcer, &entry, peer());
    tokio::task::yield_now().await;
    assert!(core.transport().sent.load(Ordering::SeqCst) > sent_before, "a NACK is still sent back to the peer");
}
