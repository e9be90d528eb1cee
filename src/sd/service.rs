//! A discoverable/offerable service identity plus its wildcard matching
//! rules against the four SD entry kinds that carry service fields.

use crate::sd::entries::{EntryType, SdEntry};
use crate::sd::options::SdOption;

pub const WILDCARD_INSTANCE: u16 = 0xFFFF;
pub const WILDCARD_MAJOR: u8 = 0xFF;
pub const WILDCARD_MINOR: u32 = 0xFFFF_FFFF;

#[derive(Debug, Clone)]
pub struct Service {
    pub service_id: u16,
    pub instance_id: u16,
    pub major_version: u8,
    pub minor_version: u32,
    /// Excluded from equality/hash: two services with the same identity
    /// compare equal regardless of the options they carry.
    pub options_1: Vec<SdOption>,
    pub options_2: Vec<SdOption>,
    pub eventgroups: std::collections::BTreeSet<u16>,
}

impl PartialEq for Service {
    fn eq(&self, other: &Self) -> bool {
        self.service_id == other.service_id
            && self.instance_id == other.instance_id
            && self.major_version == other.major_version
            && self.minor_version == other.minor_version
            && self.eventgroups == other.eventgroups
    }
}
impl Eq for Service {}

impl std::hash::Hash for Service {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.service_id.hash(state);
        self.instance_id.hash(state);
        self.major_version.hash(state);
        self.minor_version.hash(state);
        for eg in &self.eventgroups {
            eg.hash(state);
        }
    }
}

impl Service {
    pub fn new(service_id: u16, instance_id: u16, major_version: u8, minor_version: u32) -> Self {
        Service {
            service_id,
            instance_id,
            major_version,
            minor_version,
            options_1: Vec::new(),
            options_2: Vec::new(),
            eventgroups: std::collections::BTreeSet::new(),
        }
    }

    pub fn with_eventgroups(mut self, eventgroups: impl IntoIterator<Item = u16>) -> Self {
        self.eventgroups = eventgroups.into_iter().collect();
        self
    }

    pub fn with_options(mut self, options_1: Vec<SdOption>, options_2: Vec<SdOption>) -> Self {
        self.options_1 = options_1;
        self.options_2 = options_2;
        self
    }

    /// Whether a received OfferService `entry` matches this service: same
    /// `service_id`, and `instance_id`/`major_version`/`minor_version`
    /// equal unless wildcarded *on this service*.
    pub fn matches_offer(&self, entry: &SdEntry) -> bool {
        assert_eq!(entry.entry_type, EntryType::OfferService, "entry is not OfferService");
        if self.service_id != entry.service_id {
            return false;
        }
        if self.instance_id != WILDCARD_INSTANCE && self.instance_id != entry.instance_id {
            return false;
        }
        if self.major_version != WILDCARD_MAJOR && self.major_version != entry.major_version {
            return false;
        }
        if self.minor_version != WILDCARD_MINOR && self.minor_version != entry.minor_version() {
            return false;
        }
        true
    }

    /// Whether a received FindService `entry` matches this service: same
    /// `service_id`, and fields equal unless wildcarded *on the entry*.
    pub fn matches_find(&self, entry: &SdEntry) -> bool {
        assert_eq!(entry.entry_type, EntryType::FindService, "entry is not FindService");
        if self.service_id != entry.service_id {
            return false;
        }
        if entry.instance_id != WILDCARD_INSTANCE && self.instance_id != entry.instance_id {
            return false;
        }
        if entry.major_version != WILDCARD_MAJOR && self.major_version != entry.major_version {
            return false;
        }
        if entry.minor_version() != WILDCARD_MINOR && self.minor_version != entry.minor_version() {
            return false;
        }
        true
    }

    /// Whether a received Subscribe `entry` matches this service:
    /// `service_id` equal, `instance_id`/`major_version` equal unless
    /// wildcarded on this service, and the entry's eventgroup is offered.
    pub fn matches_subscribe(&self, entry: &SdEntry) -> bool {
        assert_eq!(entry.entry_type, EntryType::Subscribe, "entry is not Subscribe");
        if self.service_id != entry.service_id {
            return false;
        }
        if self.instance_id != WILDCARD_INSTANCE && self.instance_id != entry.instance_id {
            return false;
        }
        if self.major_version != WILDCARD_MAJOR && self.major_version != entry.major_version {
            return false;
        }
        self.eventgroups.contains(&entry.eventgroup_id())
    }

    /// Whether `other` matches this service, with wildcards on *either*
    /// side accepted (used for equivalence between discovered and
    /// locally-configured identities, not for entry matching).
    pub fn matches_service(&self, other: &Service) -> bool {
        if self.service_id != other.service_id {
            return false;
        }
        if self.instance_id != WILDCARD_INSTANCE
            && other.instance_id != WILDCARD_INSTANCE
            && self.instance_id != other.instance_id
        {
            return false;
        }
        if self.major_version != WILDCARD_MAJOR
            && other.major_version != WILDCARD_MAJOR
            && self.major_version != other.major_version
        {
            return false;
        }
        if self.minor_version != WILDCARD_MINOR
            && other.minor_version != WILDCARD_MINOR
            && self.minor_version != other.minor_version
        {
            return false;
        }
        true
    }

    pub fn create_find_entry(&self, ttl: u32) -> SdEntry {
        SdEntry::find_service(self.service_id, self.instance_id, self.major_version, self.minor_version, ttl)
    }

    pub fn create_offer_entry(&self, ttl: u32) -> SdEntry {
        let mut options = self.options_1.clone();
        options.extend(self.options_2.clone());
        SdEntry::offer_service(self.service_id, self.instance_id, self.major_version, self.minor_version, ttl, options)
    }

    /// Builds a `Service` from a received OfferService entry. The entry's
    /// option runs must already be resolved.
    pub fn from_offer_entry(entry: &SdEntry) -> Self {
        assert_eq!(entry.entry_type, EntryType::OfferService, "entry is not OfferService");
        assert!(entry.options_resolved(), "entry must have resolved options");
        let options_1 = entry.run_1.resolved().unwrap().to_vec();
        let options_2 = entry.run_2.resolved().unwrap().to_vec();
        Service {
            service_id: entry.service_id,
            instance_id: entry.instance_id,
            major_version: entry.major_version,
            minor_version: entry.minor_version(),
            options_1,
            options_2,
            eventgroups: std::collections::BTreeSet::new(),
        }
    }
}

impl std::fmt::Display for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "service=0x{:04x}, instance=0x{:04x}, version={}.{}",
            self.service_id, self.instance_id, self.major_version, self.minor_version
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_service_matches_any_offer() {
        let svc = Service::new(0x1234, WILDCARD_INSTANCE, WILDCARD_MAJOR, WILDCARD_MINOR);
        let entry = SdEntry::offer_service(0x1234, 0x0001, 1, 42, 3, vec![]);
        assert!(svc.matches_offer(&entry));
    }

    #[test]
    fn concrete_service_rejects_mismatched_instance() {
        let svc = Service::new(0x1234, 0x0002, 1, 0);
        let entry = SdEntry::offer_service(0x1234, 0x0001, 1, 0, 3, vec![]);
        assert!(!svc.matches_offer(&entry));
    }

    #[test]
    fn find_wildcard_on_entry_matches_concrete_service() {
        let svc = Service::new(0xBEEF, 5, 2, 9);
        let entry = SdEntry::find_service(0xBEEF, WILDCARD_INSTANCE, WILDCARD_MAJOR, WILDCARD_MINOR, 3);
        assert!(svc.matches_find(&entry));
    }

    #[test]
    fn subscribe_requires_offered_eventgroup() {
        let svc = Service::new(0xABCD, 1, 1, 0).with_eventgroups([5]);
        let matching = SdEntry::subscribe(0xABCD, 1, 1, 5, 0, 5, vec![]);
        let other = SdEntry::subscribe(0xABCD, 1, 1, 6, 0, 5, vec![]);
        assert!(svc.matches_subscribe(&matching));
        assert!(!svc.matches_subscribe(&other));
    }

    #[test]
    fn options_excluded_from_equality() {
        let a = Service::new(1, 1, 1, 0);
        let b = Service::new(1, 1, 1, 0).with_options(
            vec![SdOption::LoadBalancing { priority: 1, weight: 1 }],
            vec![],
        );
        assert_eq!(a, b);
    }
}
