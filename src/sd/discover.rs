//! Finds remote services matching locally-registered filters and tracks
//! which ones are currently offered.

use crate::sd::core::SdCore;
use crate::sd::entries::{EntryType, SdEntry};
use crate::sd::service::Service;
use crate::sd::timed_store::{NotifyFn, TimedStore};
use crate::sd::ClientServiceListener;
use crate::transport::DatagramTransport;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

struct Watch {
    service: Service,
    listener: Arc<dyn ClientServiceListener>,
}

/// Discovers services matching watched filters and tracks which ones are
/// currently offered, with a non-cyclic Find loop per the Initial
/// Wait/Repetition phases (SD never re-finds once it stops repeating).
pub struct Discover<T> {
    core: Arc<SdCore<T>>,
    watched: Mutex<Vec<Watch>>,
    watch_all: Mutex<Vec<Arc<dyn ClientServiceListener>>>,
    found_services: TimedStore<Service>,
}

impl<T> Discover<T>
where
    T: DatagramTransport + 'static,
{
    pub fn new(core: Arc<SdCore<T>>) -> Arc<Self> {
        Arc::new(Discover {
            core,
            watched: Mutex::new(Vec::new()),
            watch_all: Mutex::new(Vec::new()),
            found_services: TimedStore::new(),
        })
    }

    /// Starts the one-shot Find loop: Initial Wait, then up to
    /// `REPETITIONS_MAX` repeats with `2^i * REPETITIONS_BASE_DELAY`
    /// backoff. Never repeats beyond that; SD's Find is not cyclic.
    pub fn start(this: &Arc<Self>) {
        let this = this.clone();
        tokio::spawn(async move {
            if this.watched.lock().unwrap().is_empty() && this.watch_all.lock().unwrap().is_empty() {
                return;
            }
            let delay = crate::sd::core::jittered(this.core.timings.initial_delay_min.get(), this.core.timings.initial_delay_max.get());
            tokio::time::sleep(delay).await;

            let entries = this.pending_find_entries();
            if entries.is_empty() {
                return;
            }
            this.core.send_sd(entries, None).await;

            for i in 0..this.core.timings.repetitions_max {
                let backoff = this.core.timings.repetitions_base_delay.get() * 2u32.pow(i);
                tokio::time::sleep(backoff).await;
                let entries = this.pending_find_entries();
                if entries.is_empty() {
                    return;
                }
                this.core.send_sd(entries, None).await;
            }
        });
    }

    /// FindService entries for watched services not already known to be
    /// offered (4.2.1 SWS_SD_00365: no point asking again for a service
    /// we've already found).
    fn pending_find_entries(&self) -> Vec<SdEntry> {
        let watched = self.watched.lock().unwrap();
        watched
            .iter()
            .map(|w| &w.service)
            .filter(|service| !self.is_already_found(service))
            .map(|service| service.create_find_entry(self.core.timings.find_ttl))
            .collect()
    }

    fn is_already_found(&self, service: &Service) -> bool {
        self.found_services.entries().iter().any(|(_, found)| service.matches_service(found))
    }

    pub fn watch_service(&self, service: Service, listener: Arc<dyn ClientServiceListener>) {
        self.replay_offered(&service, &listener);
        self.watched.lock().unwrap().push(Watch { service, listener });
    }

    pub fn stop_watch_service(&self, service: &Service, listener: &Arc<dyn ClientServiceListener>) {
        let mut watched = self.watched.lock().unwrap();
        if let Some(pos) = watched.iter().position(|w| &w.service == service && Arc::ptr_eq(&w.listener, listener)) {
            watched.remove(pos);
        }
        drop(watched);
        self.replay_stopped(service, listener);
    }

    pub fn watch_all_services(&self, listener: Arc<dyn ClientServiceListener>) {
        let known = self.found_services.entries();
        let listener_for_replay = listener.clone();
        tokio::spawn(async move {
            for (addr, service) in known {
                listener_for_replay.service_offered(&service, addr);
            }
        });
        self.watch_all.lock().unwrap().push(listener);
    }

    pub fn stop_watch_all_services(&self, listener: &Arc<dyn ClientServiceListener>) {
        let mut all = self.watch_all.lock().unwrap();
        if let Some(pos) = all.iter().position(|l| Arc::ptr_eq(l, listener)) {
            all.remove(pos);
        }
        drop(all);
        let known = self.found_services.entries();
        let listener = listener.clone();
        tokio::spawn(async move {
            for (addr, service) in known {
                listener.service_stopped(&service, addr);
            }
        });
    }

    /// Replays currently-known matching services to `listener` as fresh
    /// `service_offered` callbacks, deferred to the event loop.
    fn replay_offered(&self, filter: &Service, listener: &Arc<dyn ClientServiceListener>) {
        let matching: Vec<_> = self
            .found_services
            .entries()
            .into_iter()
            .filter(|(_, service)| filter.matches_service(service))
            .collect();
        let listener = listener.clone();
        tokio::spawn(async move {
            for (addr, service) in matching {
                listener.service_offered(&service, addr);
            }
        });
    }

    /// Replays currently-known matching services to `listener` as
    /// `service_stopped` callbacks, deferred to the event loop.
    fn replay_stopped(&self, filter: &Service, listener: &Arc<dyn ClientServiceListener>) {
        let matching: Vec<_> = self
            .found_services
            .entries()
            .into_iter()
            .filter(|(_, service)| filter.matches_service(service))
            .collect();
        let listener = listener.clone();
        tokio::spawn(async move {
            for (addr, service) in matching {
                listener.service_stopped(&service, addr);
            }
        });
    }

    pub fn is_watching_service(&self, entry: &SdEntry) -> bool {
        if !self.watch_all.lock().unwrap().is_empty() {
            return true;
        }
        self.watched.lock().unwrap().iter().any(|w| w.service.matches_offer(entry))
    }

    pub fn handle_offer(this: &Arc<Self>, entry: &SdEntry, addr: SocketAddr) {
        if !this.is_watching_service(entry) {
            return;
        }
        if entry.ttl == 0 {
            this.service_offer_stopped(addr, entry);
        } else {
            Self::service_offered(this, addr, entry);
        }
    }

    fn service_offered(this: &Arc<Self>, addr: SocketAddr, entry: &SdEntry) {
        let service = Service::from_offer_entry(entry);
        let on_new: NotifyFn<Service> = {
            let this = this.clone();
            Arc::new(move |service, addr| {
                this.notify_service_offered(service, addr);
                Ok(())
            })
        };
        let on_expire: NotifyFn<Service> = {
            let this = this.clone();
            Arc::new(move |service, addr| {
                this.notify_service_stopped(service, addr);
                Ok(())
            })
        };
        let _ = this.found_services.refresh(entry.ttl, addr, service, on_new, on_expire);
    }

    fn service_offer_stopped(&self, addr: SocketAddr, entry: &SdEntry) {
        assert_eq!(entry.entry_type, EntryType::OfferService);
        let service = Service::from_offer_entry(entry);
        let _ = self.found_services.stop(addr, &service);
    }

    fn notify_service_offered(&self, service: &Service, addr: SocketAddr) {
        for watch in self.watched.lock().unwrap().iter() {
            if watch.service.matches_service(service) {
                watch.listener.service_offered(service, addr);
            }
        }
        for listener in self.watch_all.lock().unwrap().iter() {
            listener.service_offered(service, addr);
        }
    }

    fn notify_service_stopped(&self, service: &Service, addr: SocketAddr) {
        for watch in self.watched.lock().unwrap().iter() {
            if watch.service.matches_service(service) {
                watch.listener.service_stopped(service, addr);
            }
        }
        for listener in self.watch_all.lock().unwrap().iter() {
            listener.service_stopped(service, addr);
        }
    }

    pub fn reboot_detected(&self, addr: SocketAddr) {
        self.found_services.stop_all_for_address(addr);
    }

    pub fn connection_lost(&self) {
        self.found_services.stop_all();
    }
}
