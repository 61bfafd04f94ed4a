//! Event admission filter
//!
//! Per-advertisement decision made inline with the scan callback: denylist
//! rules first, then time-windowed duplicate suppression over a bounded
//! per-address cache. The filter never performs I/O and never returns an
//! error that could halt the scan loop; clock anomalies degrade to
//! forwarding (over-forwarding beats silently losing all data).

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use blip_common::config::AdmissionConfig;
use blip_common::metrics::{bump, bump_by, AdmissionCounters};

use crate::denylist::{DenyMatch, Denylist};

/// Valid signal strength range in dBm.
const RSSI_MIN: i16 = -128;
const RSSI_MAX: i16 = 0;

/// Outcome of an admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Forward the advertisement to the transport.
    Forward,
    /// Drop it, with the reason recorded for observability.
    Drop(DropReason),
}

/// Why an advertisement was dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// A denylist rule matched.
    Denylist(DenyMatch),
    /// Same address forwarded less than one window ago.
    Duplicate,
    /// Empty address or out-of-range signal strength.
    MalformedInput(&'static str),
}

/// Per-address dedup bookkeeping. In-memory only, never shared across
/// process boundaries.
#[derive(Debug, Clone, Copy)]
struct AdmissionRecord {
    last_forwarded_at: Instant,
    last_rssi: i16,
}

/// Bounded address cache guarded by one lock. The scan loop is the single
/// writer; the lock exists for the periodic sweep task.
#[derive(Debug, Default)]
struct AdmissionCache {
    records: HashMap<String, AdmissionRecord>,
}

impl AdmissionCache {
    /// Evict the least-recently-forwarded entry. Linear scan: eviction
    /// only happens at capacity with a new address, and a scan over a
    /// few thousand entries is cheap next to the radio callback rate.
    fn evict_oldest(&mut self) {
        let oldest = self
            .records
            .iter()
            .min_by_key(|(_, rec)| rec.last_forwarded_at)
            .map(|(addr, _)| addr.clone());
        if let Some(addr) = oldest {
            debug!(address = %addr, "admission cache full, evicting least-recently-forwarded");
            self.records.remove(&addr);
        }
    }
}

/// Edge-side admission filter: denylist + duplicate suppression.
pub struct AdmissionFilter {
    window: Duration,
    stale_horizon: Duration,
    capacity: usize,
    denylist: Denylist,
    counters: Arc<AdmissionCounters>,
    cache: Mutex<AdmissionCache>,
}

impl AdmissionFilter {
    pub fn new(
        config: &AdmissionConfig,
        denylist: Denylist,
        counters: Arc<AdmissionCounters>,
    ) -> Self {
        Self {
            window: config.window(),
            stale_horizon: config.stale_horizon(),
            capacity: config.cache_capacity,
            denylist,
            counters,
            cache: Mutex::new(AdmissionCache::default()),
        }
    }

    /// Decide whether to forward one advertisement.
    ///
    /// `now` is monotonic time; callers pass `Instant::now()` from the
    /// scan callback. Every outcome increments exactly one counter.
    pub fn admit(
        &self,
        address: &str,
        rssi: i16,
        name: Option<&str>,
        now: Instant,
    ) -> Decision {
        if address.is_empty() {
            bump(&self.counters.dropped_malformed);
            return Decision::Drop(DropReason::MalformedInput("empty address"));
        }
        if !(RSSI_MIN..=RSSI_MAX).contains(&rssi) {
            bump(&self.counters.dropped_malformed);
            return Decision::Drop(DropReason::MalformedInput("rssi out of range"));
        }

        let address = address.to_uppercase();

        // Denylist check precedes duplicate suppression
        if let Some(hit) = self.denylist.matches(&address, name) {
            bump(&self.counters.dropped_denylist);
            debug!(address = %address, rule_kind = hit.kind.as_str(), rule = %hit.rule, "dropped by denylist");
            return Decision::Drop(DropReason::Denylist(hit));
        }

        // A poisoned lock means a panic elsewhere while holding the
        // cache; keep admitting rather than halting the scan loop.
        let mut cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());

        if let Some(record) = cache.records.get_mut(&address) {
            match now.checked_duration_since(record.last_forwarded_at) {
                Some(elapsed) if elapsed < self.window => {
                    bump(&self.counters.dropped_duplicate);
                    debug!(
                        address = %address,
                        elapsed_ms = elapsed.as_millis() as u64,
                        rssi_delta = rssi - record.last_rssi,
                        "dropped duplicate within window"
                    );
                    record.last_rssi = rssi;
                    return Decision::Drop(DropReason::Duplicate);
                }
                Some(_) => {}
                None => {
                    // Monotonic clock appears to have gone backwards.
                    // Degrade to forwarding rather than suppressing.
                    warn!(address = %address, "clock anomaly in admission cache, forwarding");
                }
            }
            record.last_forwarded_at = now;
            record.last_rssi = rssi;
        } else {
            if cache.records.len() >= self.capacity {
                cache.evict_oldest();
            }
            cache.records.insert(
                address.clone(),
                AdmissionRecord {
                    last_forwarded_at: now,
                    last_rssi: rssi,
                },
            );
        }

        bump(&self.counters.admitted);
        Decision::Forward
    }

    /// Remove entries whose last forwarding predates the staleness
    /// horizon. Bounds memory even when eviction pressure is low. Returns
    /// the number of entries removed.
    pub fn sweep(&self, now: Instant) -> usize {
        let mut cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());
        let before = cache.records.len();
        cache.records.retain(|_, rec| {
            match now.checked_duration_since(rec.last_forwarded_at) {
                Some(age) => age <= self.stale_horizon,
                // Clock anomaly: keep the entry, it will age out later
                None => true,
            }
        });
        let removed = before - cache.records.len();
        if removed > 0 {
            bump_by(&self.counters.swept, removed as u64);
            debug!(removed, remaining = cache.records.len(), "swept stale admission entries");
        }
        removed
    }

    /// Number of addresses currently tracked (diagnostics).
    pub fn tracked_addresses(&self) -> usize {
        self.cache.lock().unwrap_or_else(|p| p.into_inner()).records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blip_common::config::DenylistConfig;

    fn filter_with(config: AdmissionConfig, denylist: DenylistConfig) -> AdmissionFilter {
        AdmissionFilter::new(
            &config,
            Denylist::compile(&denylist).unwrap(),
            Arc::new(AdmissionCounters::new()),
        )
    }

    fn default_filter() -> AdmissionFilter {
        filter_with(AdmissionConfig::default(), DenylistConfig::default())
    }

    const ADDR: &str = "AA:BB:CC:DD:EE:FF";

    #[test]
    fn test_first_sighting_forwards() {
        let filter = default_filter();
        assert_eq!(filter.admit(ADDR, -65, Some("Sensor"), Instant::now()), Decision::Forward);
    }

    #[test]
    fn test_window_scenario() {
        // window=60s: forward at t=0, duplicate at t=10, forward at t=70
        let config = AdmissionConfig {
            window_secs: 60,
            ..Default::default()
        };
        let filter = filter_with(config, DenylistConfig::default());
        let t0 = Instant::now();

        assert_eq!(filter.admit(ADDR, -65, Some("Sensor"), t0), Decision::Forward);
        assert_eq!(
            filter.admit(ADDR, -60, Some("Sensor"), t0 + Duration::from_secs(10)),
            Decision::Drop(DropReason::Duplicate)
        );
        assert_eq!(
            filter.admit(ADDR, -60, Some("Sensor"), t0 + Duration::from_secs(70)),
            Decision::Forward
        );
    }

    #[test]
    fn test_only_first_forwarded_within_window() {
        let filter = default_filter();
        let t0 = Instant::now();

        assert_eq!(filter.admit(ADDR, -65, None, t0), Decision::Forward);
        for i in 1..10 {
            let t = t0 + Duration::from_secs(i);
            assert_eq!(
                filter.admit(ADDR, -65, None, t),
                Decision::Drop(DropReason::Duplicate),
                "event at t+{}s should be suppressed",
                i
            );
        }
    }

    #[test]
    fn test_events_beyond_window_forward_independently() {
        let config = AdmissionConfig {
            window_secs: 30,
            ..Default::default()
        };
        let filter = filter_with(config, DenylistConfig::default());
        let t0 = Instant::now();

        for i in 0..4 {
            let t = t0 + Duration::from_secs(i * 31);
            assert_eq!(filter.admit(ADDR, -65, None, t), Decision::Forward);
        }
    }

    #[test]
    fn test_denylist_precedes_dedup() {
        let denylist = DenylistConfig {
            enabled: true,
            address_prefixes: vec!["F0:18:98".to_string()],
            ..Default::default()
        };
        let filter = filter_with(AdmissionConfig::default(), denylist);
        let t0 = Instant::now();

        // Dropped by denylist every time, regardless of duplicate state
        for i in 0..3 {
            let decision = filter.admit("F0:18:98:11:22:33", -70, None, t0 + Duration::from_secs(i));
            assert!(
                matches!(decision, Decision::Drop(DropReason::Denylist(_))),
                "expected denylist drop, got {:?}",
                decision
            );
        }
        assert_eq!(filter.tracked_addresses(), 0);
    }

    #[test]
    fn test_malformed_input_dropped_not_panicked() {
        let filter = default_filter();
        let now = Instant::now();

        assert!(matches!(
            filter.admit("", -65, None, now),
            Decision::Drop(DropReason::MalformedInput(_))
        ));
        assert!(matches!(
            filter.admit(ADDR, 10, None, now),
            Decision::Drop(DropReason::MalformedInput(_))
        ));
        assert!(matches!(
            filter.admit(ADDR, -129, None, now),
            Decision::Drop(DropReason::MalformedInput(_))
        ));
    }

    #[test]
    fn test_clock_anomaly_degrades_to_forward() {
        let filter = default_filter();
        let t0 = Instant::now();

        assert_eq!(
            filter.admit(ADDR, -65, None, t0 + Duration::from_secs(10)),
            Decision::Forward
        );
        // `now` earlier than the recorded forwarding time: the monotonic
        // clock appears to have gone backwards, so forward anyway
        assert_eq!(filter.admit(ADDR, -65, None, t0), Decision::Forward);
    }

    #[test]
    fn test_poisoned_cache_still_admits() {
        let filter = Arc::new(default_filter());

        let poisoner = Arc::clone(&filter);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.cache.lock().unwrap();
            panic!("poison the cache lock");
        })
        .join();

        assert_eq!(
            filter.admit(ADDR, -65, None, Instant::now()),
            Decision::Forward
        );
        assert_eq!(filter.tracked_addresses(), 1);
    }

    #[test]
    fn test_address_normalized_for_dedup() {
        let filter = default_filter();
        let t0 = Instant::now();

        assert_eq!(filter.admit("aa:bb:cc:dd:ee:ff", -65, None, t0), Decision::Forward);
        assert_eq!(
            filter.admit("AA:BB:CC:DD:EE:FF", -65, None, t0 + Duration::from_secs(1)),
            Decision::Drop(DropReason::Duplicate)
        );
    }

    #[test]
    fn test_capacity_evicts_least_recently_forwarded() {
        let config = AdmissionConfig {
            cache_capacity: 2,
            ..Default::default()
        };
        let filter = filter_with(config, DenylistConfig::default());
        let t0 = Instant::now();

        assert_eq!(filter.admit("AA:00:00:00:00:01", -65, None, t0), Decision::Forward);
        assert_eq!(
            filter.admit("AA:00:00:00:00:02", -65, None, t0 + Duration::from_secs(1)),
            Decision::Forward
        );
        // Third address evicts the first
        assert_eq!(
            filter.admit("AA:00:00:00:00:03", -65, None, t0 + Duration::from_secs(2)),
            Decision::Forward
        );
        assert_eq!(filter.tracked_addresses(), 2);

        // The evicted address forwards again even though inside the window
        // (bounded memory over strict window enforcement)
        assert_eq!(
            filter.admit("AA:00:00:00:00:01", -65, None, t0 + Duration::from_secs(3)),
            Decision::Forward
        );
        // The surviving address is still suppressed
        assert_eq!(
            filter.admit("AA:00:00:00:00:02", -65, None, t0 + Duration::from_secs(3)),
            Decision::Drop(DropReason::Duplicate)
        );
    }

    #[test]
    fn test_sweep_removes_stale_entries_only() {
        let config = AdmissionConfig {
            window_secs: 30,
            stale_horizon_secs: 100,
            ..Default::default()
        };
        let filter = filter_with(config, DenylistConfig::default());
        let t0 = Instant::now();

        filter.admit("AA:00:00:00:00:01", -65, None, t0);
        filter.admit("AA:00:00:00:00:02", -65, None, t0 + Duration::from_secs(90));
        assert_eq!(filter.tracked_addresses(), 2);

        let removed = filter.sweep(t0 + Duration::from_secs(150));
        assert_eq!(removed, 1);
        assert_eq!(filter.tracked_addresses(), 1);
    }

    #[test]
    fn test_counters_track_decisions() {
        let counters = Arc::new(AdmissionCounters::new());
        let denylist = DenylistConfig {
            enabled: true,
            addresses: vec!["BB:BB:BB:BB:BB:BB".to_string()],
            ..Default::default()
        };
        let filter = AdmissionFilter::new(
            &AdmissionConfig::default(),
            Denylist::compile(&denylist).unwrap(),
            Arc::clone(&counters),
        );
        let t0 = Instant::now();

        filter.admit(ADDR, -65, None, t0); // forward
        filter.admit(ADDR, -65, None, t0 + Duration::from_secs(1)); // duplicate
        filter.admit("BB:BB:BB:BB:BB:BB", -65, None, t0); // denylist
        filter.admit("", -65, None, t0); // malformed

        let snap = counters.snapshot();
        assert_eq!(snap.admitted, 1);
        assert_eq!(snap.dropped_duplicate, 1);
        assert_eq!(snap.dropped_denylist, 1);
        assert_eq!(snap.dropped_malformed, 1);
    }
}
