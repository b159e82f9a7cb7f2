//! Per-client request quotas, one independent counter map per HTTP method.
//!
//! Each identity gets a fixed window starting at its first request. Within a
//! window, request `n` is admitted while `n <= cap`; request `cap + 1` and later
//! are refused until the window expires. The map is a bounded LRU: a new
//! identity arriving at a full map evicts the identity seen least recently.
//!
//! Counters are process-local. Multi-instance deployments rely on the shared
//! GCRA layer in [`crate::stores::RateLimiter`] for cross-process limits.

use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use axum::http::Method;
use lru::LruCache;
use serde::Serialize;

use crate::config::Config;

#[derive(Debug, Clone, Copy)]
struct AdmissionRecord {
    count: u64,
    window_start: Instant,
}

/// One method's counters.
#[derive(Debug)]
pub struct QuotaCounter {
    cap: u64,
    window: Duration,
    records: Mutex<LruCache<String, AdmissionRecord>>,
}

impl QuotaCounter {
    pub fn new(cap: u64, window: Duration, max_identities: usize) -> Self {
        let capacity = NonZeroUsize::new(max_identities).unwrap_or(NonZeroUsize::MIN);
        Self {
            cap,
            window,
            records: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn admit(&self, identity: &str) -> bool {
        self.admit_at(identity, Instant::now())
    }

    fn admit_at(&self, identity: &str, now: Instant) -> bool {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(record) = records.get_mut(identity) {
            if now.duration_since(record.window_start) >= self.window {
                *record = AdmissionRecord {
                    count: 1,
                    window_start: now,
                };
                return true;
            }
            record.count = record.count.saturating_add(1);
            return record.count <= self.cap;
        }

        let evicted = records.push(
            identity.to_string(),
            AdmissionRecord {
                count: 1,
                window_start: now,
            },
        );
        if let Some((oldest, _)) = evicted {
            tracing::debug!(identity = %oldest, "evicting admission record");
        }
        self.cap >= 1
    }

    /// Current counts, including identities already over quota.
    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records
            .iter()
            .map(|(identity, record)| (identity.clone(), record.count))
            .collect()
    }
}

/// Diagnostic view returned to the operator.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AdmissionSnapshot {
    pub get: BTreeMap<String, u64>,
    pub post: BTreeMap<String, u64>,
}

#[derive(Debug)]
pub struct AdmissionController {
    get: QuotaCounter,
    post: QuotaCounter,
}

impl AdmissionController {
    pub fn new(get: QuotaCounter, post: QuotaCounter) -> Self {
        Self { get, post }
    }

    pub fn from_config(config: &Config) -> Self {
        let window = config.quota_window();
        Self::new(
            QuotaCounter::new(config.get_quota, window, config.quota_max_identities),
            QuotaCounter::new(config.post_quota, window, config.quota_max_identities),
        )
    }

    /// Methods other than GET and POST have no quota and are always admitted;
    /// the router rejects them separately.
    pub fn admit(&self, identity: &str, method: &Method) -> bool {
        match *method {
            Method::GET => self.get.admit(identity),
            Method::POST => self.post.admit(identity),
            _ => true,
        }
    }

    pub fn snapshot(&self) -> AdmissionSnapshot {
        AdmissionSnapshot {
            get: self.get.snapshot(),
            post: self.post.snapshot(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    fn controller() -> AdmissionController {
        AdmissionController::new(
            QuotaCounter::new(1000, DAY, 100),
            QuotaCounter::new(200, DAY, 100),
        )
    }

    fn admitted_until_denied(controller: &AdmissionController, method: &Method) -> u64 {
        let mut n = 0;
        while controller.admit("203.0.113.7", method) {
            n += 1;
            assert!(n <= 10_000, "quota never denied");
        }
        n
    }

    #[test]
    fn get_admits_exactly_cap_requests() {
        assert_eq!(admitted_until_denied(&controller(), &Method::GET), 1000);
    }

    #[test]
    fn post_admits_exactly_cap_requests() {
        assert_eq!(admitted_until_denied(&controller(), &Method::POST), 200);
    }

    #[test]
    fn methods_are_counted_independently() {
        let controller = controller();
        for _ in 0..200 {
            assert!(controller.admit("203.0.113.7", &Method::POST));
        }
        assert!(!controller.admit("203.0.113.7", &Method::POST));

        assert!(controller.admit("203.0.113.7", &Method::GET));
    }

    #[test]
    fn identities_are_counted_independently() {
        let counter = QuotaCounter::new(2, DAY, 100);
        assert!(counter.admit("a"));
        assert!(counter.admit("a"));
        assert!(!counter.admit("a"));

        assert!(counter.admit("b"));
    }

    #[test]
    fn denial_persists_for_the_rest_of_the_window() {
        let counter = QuotaCounter::new(1, DAY, 100);
        let start = Instant::now();
        assert!(counter.admit_at("a", start));
        assert!(!counter.admit_at("a", start + Duration::from_secs(1)));
        assert!(!counter.admit_at("a", start + Duration::from_secs(60)));
    }

    #[test]
    fn window_expiry_resets_the_count() {
        let counter = QuotaCounter::new(1, Duration::from_secs(60), 100);
        let start = Instant::now();
        assert!(counter.admit_at("a", start));
        assert!(!counter.admit_at("a", start + Duration::from_secs(59)));

        assert!(counter.admit_at("a", start + Duration::from_secs(60)));
        assert_eq!(counter.snapshot()["a"], 1);
    }

    #[test]
    fn full_map_evicts_expired_records_first() {
        let counter = QuotaCounter::new(10, Duration::from_secs(60), 2);
        let start = Instant::now();
        counter.admit_at("stale", start);
        counter.admit_at("fresh", start + Duration::from_secs(30));

        counter.admit_at("new", start + Duration::from_secs(61));

        let snapshot = counter.snapshot();
        assert!(!snapshot.contains_key("stale"));
        assert!(snapshot.contains_key("fresh"));
        assert!(snapshot.contains_key("new"));
    }

    #[test]
    fn full_map_evicts_least_recently_seen_identity() {
        let counter = QuotaCounter::new(10, DAY, 2);
        let start = Instant::now();
        counter.admit_at("first", start);
        counter.admit_at("second", start + Duration::from_secs(1));
        counter.admit_at("first", start + Duration::from_secs(2));

        counter.admit_at("third", start + Duration::from_secs(3));

        let snapshot = counter.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert!(!snapshot.contains_key("second"));
        assert_eq!(snapshot["first"], 2);
        assert_eq!(snapshot["third"], 1);
    }

    #[test]
    fn evicted_identity_starts_a_fresh_window() {
        let counter = QuotaCounter::new(1, DAY, 1);
        let start = Instant::now();
        assert!(counter.admit_at("a", start));
        assert!(!counter.admit_at("a", start));

        counter.admit_at("b", start);

        assert!(counter.admit_at("a", start));
    }

    #[test]
    fn eviction_cost_does_not_grow_with_map_size() {
        fn spray_full_map(max_identities: usize) -> Duration {
            let counter = QuotaCounter::new(10, DAY, max_identities);
            let now = Instant::now();
            for i in 0..max_identities {
                counter.admit_at(&format!("resident-{i}"), now);
            }

            let began = Instant::now();
            for i in 0..2_000 {
                counter.admit_at(&format!("spray-{i}"), now);
            }
            let elapsed = began.elapsed();

            assert_eq!(counter.snapshot().len(), max_identities);
            elapsed
        }

        let small = spray_full_map(100);
        let large = spray_full_map(100_000);

        // A per-insert scan would make the large map about 1000x slower.
        assert!(
            large < small * 20 + Duration::from_millis(50),
            "spraying a full map of 100000 took {large:?}, a map of 100 took {small:?}"
        );
    }

    #[test]
    fn snapshot_reports_both_methods() {
        let controller = controller();
        controller.admit("198.51.100.1", &Method::GET);
        controller.admit("198.51.100.1", &Method::GET);
        controller.admit("198.51.100.2", &Method::POST);

        let snapshot = controller.snapshot();
        assert_eq!(snapshot.get["198.51.100.1"], 2);
        assert_eq!(snapshot.post["198.51.100.2"], 1);
        assert!(snapshot.post.get("198.51.100.1").is_none());
    }

    #[test]
    fn unquoted_methods_are_admitted() {
        assert!(controller().admit("a", &Method::DELETE));
        assert_eq!(controller().snapshot().get.len(), 0);
    }

    #[test]
    fn concurrent_admissions_are_all_counted() {
        let counter = std::sync::Arc::new(QuotaCounter::new(u64::MAX, DAY, 10));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let counter = counter.clone();
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        counter.admit("shared");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(counter.snapshot()["shared"], 4000);
    }
}
