//! Shared test doubles for the scenario integration tests.

use someip_sd_core::transport::{BoxFuture, DatagramTransport};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::Notify;

/// A transport that never receives anything and drops every send; enough
/// for engines whose loops never need to observe incoming datagrams.
pub struct NullTransport;

impl DatagramTransport for NullTransport {
    fn send_to<'a>(&'a self, _data: &'a [u8], _peer: Option<SocketAddr>) -> BoxFuture<'a, std::io::Result<()>> {
        Box::pin(async { Ok(()) })
    }
    fn recv<'a>(&'a self) -> BoxFuture<'a, std::io::Result<(Vec<u8>, SocketAddr, bool)>> {
        Box::pin(async { Err(std::io::Error::new(std::io::ErrorKind::Other, "unused")) })
    }
}

/// A transport whose inbound queue a test feeds directly, counting sends so
/// assertions can check how many outgoing datagrams a scenario produced.
pub struct LoopbackTransport {
    inbound: Mutex<VecDeque<(Vec<u8>, SocketAddr, bool)>>,
    notify: Notify,
    pub sent: AtomicUsize,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        LoopbackTransport { inbound: Mutex::new(VecDeque::new()), notify: Notify::new(), sent: AtomicUsize::new(0) }
    }

    pub fn push(&self, bytes: Vec<u8>, from: SocketAddr, multicast: bool) {
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
