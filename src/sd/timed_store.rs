//! A TTL-indexed presence registry shared by `Discover` (keyed by
//! `Service`) and `ServiceInstance` (keyed by `EventgroupSubscription`).
//!
//! Layout: `peer -> (key -> (expire callback, timer))`. `refresh` and
//! `stop` invoke their callback synchronously (the contract that lets a
//! `NakSubscription` raised from a subscribe-accept callback propagate
//! straight back to the caller that needs to emit a NACK); `stop_all`,
//! `stop_all_for_address`, and a timer firing on its own all invoke their
//! callback on a freshly spawned task instead, since nothing is waiting
//! on those outcomes.

use crate::config::TTL_FOREVER;
use crate::error::NakSubscription;
use std::collections::HashMap;
use std::hash::Hash;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

pub type NotifyFn<K> = Arc<dyn Fn(&K, SocketAddr) -> Result<(), NakSubscription> + Send + Sync>;

struct StoredEntry<K> {
    on_expire: NotifyFn<K>,
    timer: Option<JoinHandle<()>>,
}

type Bucket<K> = HashMap<K, StoredEntry<K>>;
type Store<K> = Arc<Mutex<HashMap<SocketAddr, Bucket<K>>>>;

pub struct TimedStore<K> {
    store: Store<K>,
}

impl<K> Clone for TimedStore<K> {
    fn clone(&self) -> Self {
        TimedStore { store: self.store.clone() }
    }
}

impl<K> Default for TimedStore<K> {
    fn default() -> Self {
        TimedStore { store: Arc::new(Mutex::new(HashMap::new())) }
    }
}

impl<K> TimedStore<K>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// If `(peer, key)` is already present, cancels its timer and
    /// reschedules. Otherwise invokes `on_new` synchronously before
    /// storing the entry; a `NakSubscription` it raises propagates to the
    /// caller without the entry being stored. `ttl == TTL_FOREVER` means
    /// never schedule an expiry.
    pub fn refresh(
        &self,
        ttl: u32,
        peer: SocketAddr,
        key: K,
        on_new: NotifyFn<K>,
        on_expire: NotifyFn<K>,
    ) -> Result<(), NakSubscription> {
        let already_present = {
            let guard = self.store.lock().unwrap();
            guard.get(&peer).map(|b| b.contains_key(&key)).unwrap_or(false)
        };

        if !already_present {
            on_new(&key, peer)?;
        }

        let mut guard = self.store.lock().unwrap();
        let bucket = guard.entry(peer).or_default();
        if let Some(existing) = bucket.get_mut(&key) {
            if let Some(handle) = existing.timer.take() {
                handle.abort();
            }
            existing.on_expire = on_expire.clone();
            existing.timer = schedule(self.store.clone(), peer, key.clone(), ttl, on_expire);
        } else {
            let timer = schedule(self.store.clone(), peer, key.clone(), ttl, on_expire.clone());
            bucket.insert(key, StoredEntry { on_expire, timer });
        }
        Ok(())
    }

    /// Cancels the timer and invokes the stored callback synchronously,
    /// propagating whatever it returns.
    pub fn stop(&self, peer: SocketAddr, key: &K) -> Result<(), NakSubscription> {
        let removed = {
            let mut guard = self.store.lock().unwrap();
            guard.get_mut(&peer).and_then(|b| b.remove(key))
        };
        match removed {
            Some(entry) => {
                if let Some(handle) = entry.timer {
                    handle.abort();
                }
                (entry.on_expire)(key, peer)
            }
            None => Ok(()),
        }
    }

    /// Cancels every timer under `peer` and fires each expire callback on
    /// its own task.
    pub fn stop_all_for_address(&self, peer: SocketAddr) {
        let bucket = {
            let mut guard = self.store.lock().unwrap();
            guard.remove(&peer)
        };
        if let Some(bucket) = bucket {
            for (key, entry) in bucket {
                if let Some(handle) = entry.timer {
                    handle.abort();
                }
                tokio::spawn(async move {
                    let _ = (entry.on_expire)(&key, peer);
                });
            }
        }
    }

    /// As [`TimedStore::stop_all_for_address`], for every peer.
    pub fn stop_all(&self) {
        let all = {
            let mut guard = self.store.lock().unwrap();
            std::mem::take(&mut *guard)
        };
        for (peer, bucket) in all {
            for (key, entry) in bucket {
                if let Some(handle) = entry.timer {
                    handle.abort();
                }
                tokio::spawn(async move {
                    let _ = (entry.on_expire)(&key, peer);
                });
            }
        }
    }

    /// Calls [`TimedStore::stop`] (synchronously) for every stored key
    /// matching `predicate`, ignoring any `NakSubscription` it returns —
    /// there is no subscribe response to NACK for an expiry sweep.
    pub fn stop_all_matching(&self, mut predicate: impl FnMut(&SocketAddr, &K) -> bool) {
        let matches: Vec<(SocketAddr, K)> = {
            let guard = self.store.lock().unwrap();
            guard
                .iter()
                .flat_map(|(peer, bucket)| bucket.keys().filter(|k| predicate(peer, k)).map(move |k| (*peer, k.clone())))
                .collect()
        };
        for (peer, key) in matches {
            let _ = self.stop(peer, &key);
        }
    }

    /// Snapshot of every stored `(peer, key)` pair.
    pub fn entries(&self) -> Vec<(SocketAddr, K)> {
        let guard = self.store.lock().unwrap();
        guard
            .iter()
            .flat_map(|(peer, bucket)| bucket.keys().map(move |k| (*peer, k.clone())))
            .collect()
    }
}

fn schedule<K>(store: Store<K>, peer: SocketAddr, key: K, ttl: u32, on_expire: NotifyFn<K>) -> Option<JoinHandle<()>>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
{
    if ttl == TTL_FOREVER {
        return None;
    }
    let dur = Duration::from_secs(ttl as u64);
    Some(tokio::spawn(async move {
        tokio::time::sleep(dur).await;
        let removed = {
            let mut guard = store.lock().unwrap();
            guard.get_mut(&peer).and_then(|b| b.remove(&key))
        };
        if removed.is_some() {
            let _ = on_expire(&key, peer);
        }
    }))
}
