//! Timing configuration for the SD engines.
//!
//! Mirrors the shape of `runtime::config::SdConfig` (per-field
//! `#[serde(default = ...)]`, loadable from JSON) but carries the timing
//! values the SD protocol itself defines rather than application-level
//! service/client configuration.

use std::time::Duration;

/// Sentinel TTL meaning "never expires".
pub const TTL_FOREVER: u32 = 0x00FF_FFFF;

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct Timings {
    pub initial_delay_min: DurationSecs,
    pub initial_delay_max: DurationSecs,
    pub request_response_delay_min: DurationSecs,
    pub request_response_delay_max: DurationSecs,
    pub repetitions_max: u32,
    pub repetitions_base_delay: DurationSecs,
    pub cyclic_offer_delay: DurationSecs,
    pub find_ttl: u32,
    pub announce_ttl: u32,
    pub subscribe_ttl: u32,
    pub subscribe_refresh_interval: Option<DurationSecs>,
    pub send_collection_timeout: DurationSecs,
}

/// A `Duration` that (de)serializes as fractional seconds, matching the
/// units `spec.md` §6 states its defaults in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct DurationSecs(pub Duration);

impl From<DurationSecs> for Duration {
    fn from(d: DurationSecs) -> Duration {
        d.0
    }
}

impl DurationSecs {
    pub const fn from_millis(ms: u64) -> Self {
        DurationSecs(Duration::from_millis(ms))
    }

    pub fn get(self) -> Duration {
        self.0
    }
}

impl<'de> serde::Deserialize<'de> for DurationSecs {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Ok(DurationSecs(Duration::from_secs_f64(secs)))
    }
}

impl Default for Timings {
    fn default() -> Self {
        Timings {
            initial_delay_min: DurationSecs::from_millis(0),
            initial_delay_max: DurationSecs::from_millis(3_000),
            request_response_delay_min: DurationSecs::from_millis(10),
            request_response_delay_max: DurationSecs::from_millis(50),
            repetitions_max: 3,
            repetitions_base_delay: DurationSecs::from_millis(10),
            cyclic_offer_delay: DurationSecs::from_millis(1_000),
            find_ttl: 3,
            announce_ttl: 3,
            subscribe_ttl: 5,
            subscribe_refresh_interval: Some(DurationSecs::from_millis(3_000)),
            send_collection_timeout: DurationSecs::from_millis(5),
        }
    }
}
