//! The state `Discover`, `Announce`, and `Subscriber` all need to send an
//! SD datagram: timings, session bookkeeping, and the transport itself.
//! Held behind an `Arc` and cloned into each engine instead of giving the
//! engines a back-reference to a single god-object protocol struct.

use crate::config::Timings;
use crate::sd::packet::SdHeader;
use crate::sd::entries::SdEntry;
use crate::session::SessionStorage;
use crate::transport::DatagramTransport;
use std::net::SocketAddr;
use std::sync::Mutex;

pub struct SdCore<T> {
    pub timings: Timings,
    session: Mutex<SessionStorage>,
    transport: T,
}

impl<T> SdCore<T>
where
    T: DatagramTransport + 'static,
{
    pub fn new(timings: Timings, transport: T) -> Self {
        SdCore {
            timings,
            session: Mutex::new(SessionStorage::new()),
            transport,
        }
    }

    /// Records a received datagram's reboot flag/session id, returning
    /// whether it indicates the peer rebooted.
    pub fn check_received(&self, peer: SocketAddr, multicast: bool, flag: bool, session_id: u16) -> bool {
        self.session.lock().unwrap().check_received(peer, multicast, flag, session_id)
    }

    /// Builds and sends an SD envelope carrying `entries` to `remote`
    /// (`None` = this transport's default destination). A no-op for an
    /// empty entry list, matching the sender-side Non-goal of never
    /// emitting an empty SD message.
    pub async fn send_sd(&self, entries: Vec<SdEntry>, remote: Option<SocketAddr>) {
        if entries.is_empty() {
            return;
        }
        let (flag_reboot, session_id) = self.session.lock().unwrap().assign_outgoing(remote);

        let header = SdHeader::new(flag_reboot, true, entries).assign_option_indexes();
        let someip = crate::codec::header::SomeIpHeader::new_sd(0, session_id, header.build());

        if let Err(err) = self.transport.send_to(&someip.build(), remote).await {
            log::error!("failed to send SD datagram to {remote:?}: {err}");
        }
    }

    /// Spawns [`SdCore::send_sd`] on its own task, matching the deferred
    /// `call_soon` semantics callers that aren't already inside an async
    /// context (timer callbacks, listener hooks) rely on. Takes an owned
    /// `Arc` so the spawned task can outlive the caller's stack frame.
    pub fn queue_send_sd(core: std::sync::Arc<Self>, entries: Vec<SdEntry>, remote: Option<SocketAddr>) {
        tokio::spawn(async move { core.send_sd(entries, remote).await });
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}

/// Picks a uniformly-random duration in `[min, max)`, used for the
/// Initial Wait and request/response delays 4.2.1 leaves up to the
/// implementation to randomize.
pub fn jittered(min: std::time::Duration, max: std::time::Duration) -> std::time::Duration {
    if max <= min {
        return min;
    }
    let span = max - min;
    let fraction: f64 = rand::random();
    min + span.mul_f64(fraction)
}
