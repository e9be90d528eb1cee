//! Subscribes to remote eventgroups and keeps those subscriptions alive.
//!
//! Adding a subscription while the refresh loop is already running sends
//! it immediately *and* leaves it to go out again at the loop's next
//! cycle — a deliberate duplicate-send on the first refresh interval,
//! preserved from the implementation this is ported from rather than
//! smoothed over (see `DESIGN.md`).

use crate::sd::core::SdCore;
use crate::sd::eventgroup::Eventgroup;
use crate::transport::DatagramTransport;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

pub struct Subscriber<T> {
    core: Arc<SdCore<T>>,
    alive: AtomicBool,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    entries: Mutex<Vec<(Eventgroup, SocketAddr)>>,
}

impl<T> Subscriber<T>
where
    T: DatagramTransport + 'static,
{
    pub fn new(core: Arc<SdCore<T>>) -> Arc<Self> {
        let ttl = core.timings.subscribe_ttl;
        let refresh = core.timings.subscribe_refresh_interval;
        if refresh.is_none() && ttl < crate::config::TTL_FOREVER {
            log::warn!("no subscribe refresh configured, but ttl={ttl} set; expect lost subscriptions after ttl");
        } else if let Some(refresh) = refresh {
            if refresh.get().as_secs() as u32 >= ttl {
                log::warn!("subscribe_refresh_interval={refresh:?} too high for ttl={ttl}, expect dropped updates");
            }
        }
        Arc::new(Subscriber {
            core,
            alive: AtomicBool::new(false),
            task: Mutex::new(None),
            entries: Mutex::new(Vec::new()),
        })
    }

    pub fn subscribe_eventgroup(this: &Arc<Self>, eventgroup: Eventgroup, endpoint: SocketAddr) {
        this.entries.lock().unwrap().push((eventgroup.clone(), endpoint));
        if this.alive.load(Ordering::SeqCst) {
            let this = this.clone();
            tokio::spawn(async move {
                this.core.send_sd(vec![eventgroup.create_subscribe_entry(this.core.timings.subscribe_ttl, 0)], Some(endpoint)).await;
            });
        }
    }

    pub fn stop_subscribe_eventgroup(this: &Arc<Self>, eventgroup: &Eventgroup, endpoint: SocketAddr) {
        Self::stop_subscribe_eventgroup_inner(this, eventgroup, endpoint, true);
    }

    fn stop_subscribe_eventgroup_inner(this: &Arc<Self>, eventgroup: &Eventgroup, endpoint: SocketAddr, send: bool) {
        let mut entries = this.entries.lock().unwrap();
        let Some(pos) = entries.iter().position(|(eg, ep)| eg == eventgroup && *ep == endpoint) else {
            return;
        };
        entries.remove(pos);
        drop(entries);

        if send {
            let this = this.clone();
            let eventgroup = eventgroup.clone();
            tokio::spawn(async move {
                this.core.send_sd(vec![eventgroup.create_subscribe_entry(0, 0)], Some(endpoint)).await;
            });
        }
    }

    fn grouped_entries(&self) -> HashMap<SocketAddr, Vec<Eventgroup>> {
        let mut grouped: HashMap<SocketAddr, Vec<Eventgroup>> = HashMap::new();
        for (eventgroup, endpoint) in self.entries.lock().unwrap().iter() {
            grouped.entry(*endpoint).or_default().push(eventgroup.clone());
        }
        grouped
    }

    pub fn start(this: &Arc<Self>) {
        if this.alive.swap(true, Ordering::SeqCst) {
            return;
        }
        let this2 = this.clone();
        let handle = tokio::spawn(async move { this2.run().await });
        *this.task.lock().unwrap() = Some(handle);
    }

    async fn run(self: Arc<Self>) {
        loop {
            for (endpoint, eventgroups) in self.grouped_entries() {
                let entries = eventgroups.iter().map(|eg| eg.create_subscribe_entry(self.core.timings.subscribe_ttl, 0)).collect();
                self.core.send_sd(entries, Some(endpoint)).await;
            }
            match self.core.timings.subscribe_refresh_interval {
                Some(interval) => tokio::time::sleep(interval.get()).await,
                None => break,
            }
        }
    }

    /// Stops the refresh loop; when `send_stop_subscribe` is true, sends a
    /// zero-ttl Subscribe for every remaining entry grouped by remote.
    pub fn stop(this: &Arc<Self>, send_stop_subscribe: bool) {
        if !this.alive.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = this.task.lock().unwrap().take() {
            handle.abort();
        }
        if send_stop_subscribe {
            let grouped = this.grouped_entries();
            let this = this.clone();
            tokio::spawn(async move {
                for (endpoint, eventgroups) in grouped {
                    let entries = eventgroups.iter().map(|eg| eg.create_subscribe_entry(0, 0)).collect();
                    this.core.send_sd(entries, Some(endpoint)).await;
                }
            });
        }
    }

    pub fn reboot_detected(&self, _addr: SocketAddr) {
        // No reaction defined yet; mirrors the upstream behaviour this
        // engine was ported from, which leaves this hook empty.
    }

    pub fn connection_lost(this: &Arc<Self>) {
        Self::stop(this, false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sd::options::L4Proto;
    use crate::transport::BoxFuture;
    use std::sync::atomic::AtomicUsize;

    struct CountingTransport {
        sends: AtomicUsize,
    }
    impl DatagramTransport for CountingTransport {
        fn send_to<'a>(&'a self, _data: &'a [u8], _peer: Option<SocketAddr>) -> BoxFuture<'a, std::io::Result<()>> {
            self.sends.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(()) })
        }
        fn recv<'a>(&'a self) -> BoxFuture<'a, std::io::Result<(Vec<u8>, SocketAddr, bool)>> {
            Box::pin(async { Err(std::io::Error::new(std::io::ErrorKind::Other, "unused")) })
        }
    }

    fn eventgroup() -> Eventgroup {
        Eventgroup::new(0x1234, 1, 1, 5, "10.0.0.9:30501".parse().unwrap(), L4Proto::Udp)
    }

    fn endpoint() -> SocketAddr {
        "10.0.0.1:30490".parse().unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn subscribe_while_alive_sends_immediately_and_duplicates_on_first_cycle() {
        let core = Arc::new(SdCore::new(crate::config::Timings::default(), CountingTransport { sends: AtomicUsize::new(0) }));
        let subscriber = Subscriber::new(core.clone());
        Subscriber::start(&subscriber);
        tokio::task::yield_now().await;

        Subscriber::subscribe_eventgroup(&subscriber, eventgroup(), endpoint());
        tokio::task::yield_now().await;
        let sends_immediate = core.transport().sends.load(Ordering::SeqCst);
        assert_eq!(sends_immediate, 1, "immediate send on subscribe while alive");

        let refresh = core.timings.subscribe_refresh_interval.unwrap().get();
        tokio::time::advance(refresh + std::time::Duration::from_millis(1)).await;
        tokio::task::yield_now().await;
        assert!(core.transport().sends.load(Ordering::SeqCst) > sends_immediate, "refresh cycle resends the same entry");
    }

    #[tokio::test]
    async fn unsubscribe_removes_tracked_entry() {
        let core = Arc::new(SdCore::new(crate::config::Timings::default(), CountingTransport { sends: AtomicUsize::new(0) }));
        let subscriber = Subscriber::new(core);
        Subscriber::subscribe_eventgroup(&subscriber, eventgroup(), endpoint());
        assert_eq!(subscriber.entries.lock().unwrap().len(), 1);
        Subscriber::stop_subscribe_eventgroup(&subscriber, &eventgroup(), endpoint());
        assert!(subscriber.entries.lock().unwrap().is_empty());
    }
}
