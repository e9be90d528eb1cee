//! Per-peer reboot detection and outgoing session id assignment.
//!
//! Two maps are kept. `incoming` records what was last seen from each
//! `(peer, multicast)` pair and is only ever touched from the single task
//! that reads datagrams off the transport, so it needs no locking.
//! `outgoing` hands out session ids to whichever task is about to send —
//! `Discover`'s find loop, each `ServiceInstance`'s announcement task, and
//! `Subscriber`'s refresh loop all call this concurrently — so it is kept
//! behind a `Mutex` (the only core state in this crate that is, per
//! `spec.md` §5).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SessionEntry {
    reboot_flag: bool,
    session_id: u16,
}

#[derive(Debug, Default)]
pub struct SessionStorage {
    incoming: HashMap<(SocketAddr, bool), SessionEntry>,
    outgoing: Mutex<HashMap<Option<SocketAddr>, SessionEntry>>,
}

impl SessionStorage {
    pub fn new() -> Self {
        SessionStorage::default()
    }

    /// Returns `true` iff this datagram indicates the peer rebooted.
    /// Always records the new `(flag, session_id)` regardless of outcome.
    pub fn check_received(&mut self, peer: SocketAddr, multicast: bool, flag: bool, session_id: u16) -> bool {
        let key = (peer, multicast);
        let rebooted = match self.incoming.get(&key) {
            Some(prev) => {
                (!prev.reboot_flag && flag) || (prev.reboot_flag && flag && prev.session_id > 0 && prev.session_id >= session_id)
            }
            None => false,
        };
        self.incoming.insert(
            key,
            SessionEntry {
                reboot_flag: flag,
                session_id,
            },
        );
        rebooted
    }

    /// Returns the `(reboot_flag, session_id)` to stamp on the next
    /// outgoing datagram to `peer` (`None` = the default destination),
    /// then advances the counter, wrapping at `0xFFFF` back to
    /// `(false, 1)`.
    pub fn assign_outgoing(&self, peer: Option<SocketAddr>) -> (bool, u16) {
        let mut outgoing = self.outgoing.lock().unwrap();
        let entry = outgoing.entry(peer).or_insert(SessionEntry {
            reboot_flag: true,
            session_id: 1,
        });
        let current = (entry.reboot_flag, entry.session_id);
        if entry.session_id == 0xFFFF {
            entry.reboot_flag = false;
            entry.session_id = 1;
        } else {
            entry.session_id += 1;
        }
        current
    }
}
