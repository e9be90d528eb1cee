//! A subscribable eventgroup (a server-side template) and the concrete
//! subscription state tracked once a client has subscribed to one.

use crate::sd::entries::{EntryType, SdEntry};
use crate::sd::options::{L4Proto, SdOption};
use crate::sd::service::{Service, WILDCARD_MAJOR};
use std::collections::HashSet;
use std::net::SocketAddr;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Eventgroup {
    pub service_id: u16,
    pub instance_id: u16,
    pub major_version: u8,
    pub eventgroup_id: u16,
    pub local_sockaddr: SocketAddr,
    pub l4proto: L4Proto,
}

impl Eventgroup {
    pub fn new(service_id: u16, instance_id: u16, major_version: u8, eventgroup_id: u16, local_sockaddr: SocketAddr, l4proto: L4Proto) -> Self {
        Eventgroup { service_id, instance_id, major_version, eventgroup_id, local_sockaddr, l4proto }
    }

    pub fn create_subscribe_entry(&self, ttl: u32, counter: u8) -> SdEntry {
        let endpoint = self.endpoint_option();
        SdEntry::subscribe(self.service_id, self.instance_id, self.major_version, self.eventgroup_id, counter, ttl, vec![endpoint])
    }

    fn endpoint_option(&self) -> SdOption {
        match self.local_sockaddr {
            SocketAddr::V4(addr) => SdOption::Ipv4Endpoint {
                address: *addr.ip(),
                l4proto: self.l4proto,
                port: addr.port(),
            },
            SocketAddr::V6(addr) => SdOption::Ipv6Endpoint {
                address: *addr.ip(),
                l4proto: self.l4proto,
                port: addr.port(),
            },
        }
    }

    /// Replaces a template's wildcard `instance_id`/`major_version` with
    /// the concrete values from an offered `service`, or returns `None`
    /// if this template does not apply to that service at all.
    pub fn for_service(&self, service: &Service) -> Option<Eventgroup> {
        let template = Service::new(self.service_id, self.instance_id, self.major_version, crate::sd::service::WILDCARD_MINOR);
        if !template.matches_offer(&service.create_offer_entry(0)) {
            return None;
        }
        Some(Eventgroup {
            instance_id: service.instance_id,
            major_version: service.major_version,
            ..self.clone()
        })
    }

    pub fn as_service(&self) -> Service {
        Service::new(self.service_id, self.instance_id, self.major_version, crate::sd::service::WILDCARD_MINOR)
    }
}

#[derive(Debug, Clone)]
pub struct EventgroupSubscription {
    pub service_id: u16,
    pub instance_id: u16,
    pub major_version: u8,
    pub eventgroup_id: u16,
    pub counter: u8,
    pub ttl: u32,
    pub endpoints: HashSet<SdOption>,
    pub options: Vec<SdOption>,
}

impl PartialEq for EventgroupSubscription {
    fn eq(&self, other: &Self) -> bool {
        self.service_id == other.service_id
            && self.instance_id == other.instance_id
            && self.major_version == other.major_version
            && self.eventgroup_id == other.eventgroup_id
            && self.counter == other.counter
            && self.endpoints == other.endpoints
    }
}
impl Eq for EventgroupSubscription {}

impl std::hash::Hash for EventgroupSubscription {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.service_id.hash(state);
        self.instance_id.hash(state);
        self.major_version.hash(state);
        self.eventgroup_id.hash(state);
        self.counter.hash(state);
        let mut endpoints: Vec<_> = self.endpoints.iter().collect();
        endpoints.sort_by_key(|o| format!("{o:?}"));
        for e in endpoints {
            e.hash(state);
        }
    }
}

impl EventgroupSubscription {
    pub fn from_subscribe_entry(entry: &SdEntry) -> Self {
        assert_eq!(entry.entry_type, EntryType::Subscribe, "entry is not Subscribe");
        let run_1 = entry.run_1.resolved().unwrap_or(&[]);
        let run_2 = entry.run_2.resolved().unwrap_or(&[]);
        let mut endpoints = HashSet::new();
        let mut options = Vec::new();
        for opt in run_1.iter().chain(run_2.iter()) {
            if opt.is_endpoint() {
                endpoints.insert(opt.clone());
            } else {
                options.push(opt.clone());
            }
        }
        EventgroupSubscription {
            service_id: entry.service_id,
            instance_id: entry.instance_id,
            major_version: entry.major_version,
            eventgroup_id: entry.eventgroup_id(),
            counter: entry.counter(),
            ttl: entry.ttl,
            endpoints,
            options,
        }
    }

    pub fn to_ack_entry(&self) -> SdEntry {
        SdEntry::subscribe_ack(self.service_id, self.instance_id, self.major_version, self.eventgroup_id, self.counter, self.ttl)
    }

    pub fn to_nack_entry(&self) -> SdEntry {
        let mut nacked = self.clone();
        nacked.ttl = 0;
        nacked.to_ack_entry()
    }
}
