//! A short-window batcher: coalesces entries destined for the same peer
//! into a single callback invocation instead of one send per entry.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default)]
pub struct SendCollectorClosed;

impl std::fmt::Display for SendCollectorClosed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "send collector already flushed")
    }
}

impl std::error::Error for SendCollectorClosed {}

pub type FlushFn<T> = Arc<dyn Fn(Vec<T>, Option<SocketAddr>) + Send + Sync>;

pub struct SendCollector<T> {
    entries: Arc<Mutex<Vec<T>>>,
    done: Arc<AtomicBool>,
    _timer: tokio::task::JoinHandle<()>,
}

impl<T> SendCollector<T>
where
    T: Send + 'static,
{
    /// Starts a collector for `remote` that flushes via `callback` once
    /// `timeout` elapses. Callers with `timeout == Duration::ZERO` must
    /// bypass this type entirely and send immediately instead.
    pub fn new(remote: Option<SocketAddr>, timeout: Duration, callback: FlushFn<T>) -> Self {
        let entries: Arc<Mutex<Vec<T>>> = Arc::new(Mutex::new(Vec::new()));
        let done = Arc::new(AtomicBool::new(false));
        let entries_for_timer = entries.clone();
        let done_for_timer = done.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            done_for_timer.store(true, Ordering::SeqCst);
            let list = std::mem::take(&mut *entries_for_timer.lock().unwrap());
            callback(list, remote);
        });
        SendCollector { entries, done, _timer: timer }
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    pub fn append(&self, entry: T) -> Result<(), SendCollectorClosed> {
        if self.is_done() {
            return Err(SendCollectorClosed);
        }
        self.entries.lock().unwrap().push(entry);
        Ok(())
    }
}
