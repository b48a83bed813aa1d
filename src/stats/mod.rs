use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::models::{EndpointStats, ServerStats};

#[derive(Default)]
struct Totals {
    requests: u64,
    errors: u64,
}

#[derive(Default)]
struct EndpointData {
    request_count: u64,
    error_count: u64,
    total_time_ms: u64,
    min_time_ms: u64,
    max_time_ms: u64,
    status_codes: BTreeMap<u16, u64>,
    first_request: Option<DateTime<Utc>>,
    last_request: Option<DateTime<Utc>>,
}

/// One endpoint's live counters. The aggregate block updates under the
/// mutex; the conditional counter is an atomic so increment-and-test stays
/// a single fetch_add.
struct EndpointEntry {
    data: Mutex<EndpointData>,
    conditional: AtomicU64,
}

impl EndpointEntry {
    fn new() -> Self {
        Self {
            data: Mutex::new(EndpointData::default()),
            conditional: AtomicU64::new(0),
        }
    }
}

/// Thread-safe per-endpoint statistics plus global totals.
///
/// Endpoints are keyed by the configured path, not the request URI. Global
/// totals and per-endpoint counters update under separate locks, global
/// first; observers are only guaranteed per-endpoint consistency.
pub struct StatsRegistry {
    start_time: DateTime<Utc>,
    totals: Mutex<Totals>,
    endpoints: Mutex<BTreeMap<String, Arc<EndpointEntry>>>,
}

impl StatsRegistry {
    pub fn new() -> Self {
        Self {
            start_time: Utc::now(),
            totals: Mutex::new(Totals::default()),
            endpoints: Mutex::new(BTreeMap::new()),
        }
    }

    /// Process start time, reported in every snapshot
    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    fn entry(&self, path: &str) -> Arc<EndpointEntry> {
        let mut endpoints = self.endpoints.lock().expect("stats registry poisoned");
        endpoints
            .entry(path.to_string())
            .or_insert_with(|| Arc::new(EndpointEntry::new()))
            .clone()
    }

    /// Record a completed request against a path
    pub fn record(&self, path: &str, elapsed: Duration, status: u16) {
        let elapsed_ms = elapsed.as_millis() as u64;
        let is_error = status >= 400;

        {
            let mut totals = self.totals.lock().expect("stats totals poisoned");
            totals.requests += 1;
            if is_error {
                totals.errors += 1;
            }
        }

        let entry = self.entry(path);
        let mut data = entry.data.lock().expect("endpoint stats poisoned");
        let now = Utc::now();

        data.request_count += 1;
        data.total_time_ms += elapsed_ms;
        if is_error {
            data.error_count += 1;
        }
        if data.min_time_ms == 0 || elapsed_ms < data.min_time_ms {
            data.min_time_ms = elapsed_ms;
        }
        if elapsed_ms > data.max_time_ms {
            data.max_time_ms = elapsed_ms;
        }
        *data.status_codes.entry(status).or_insert(0) += 1;
        if data.first_request.is_none() {
            data.first_request = Some(now);
        }
        data.last_request = Some(now);
    }

    /// Atomically advance an endpoint's conditional counter and return the
    /// new value (1 on the first hit)
    pub fn increment_conditional(&self, path: &str) -> u64 {
        self.entry(path).conditional.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Current value of an endpoint's conditional counter
    pub fn conditional_count(&self, path: &str) -> u64 {
        self.entry(path).conditional.load(Ordering::SeqCst)
    }

    /// Deep-copied snapshot of all statistics, ready for serialization
    pub fn snapshot(&self) -> ServerStats {
        let (total_requests, total_errors) = {
            let totals = self.totals.lock().expect("stats totals poisoned");
            (totals.requests, totals.errors)
        };

        let entries: Vec<(String, Arc<EndpointEntry>)> = {
            let endpoints = self.endpoints.lock().expect("stats registry poisoned");
            endpoints
                .iter()
                .map(|(path, entry)| (path.clone(), entry.clone()))
                .collect()
        };

        let mut snapshot = BTreeMap::new();
        for (path, entry) in entries {
            let data = entry.data.lock().expect("endpoint stats poisoned");
            snapshot.insert(
                path.clone(),
                EndpointStats {
                    path,
                    request_count: data.request_count,
                    error_count: data.error_count,
                    total_time_ms: data.total_time_ms,
                    min_time_ms: data.min_time_ms,
                    max_time_ms: data.max_time_ms,
                    status_codes: data.status_codes.clone(),
                    first_request: data.first_request,
                    last_request: data.last_request,
                    conditional_count: entry.conditional.load(Ordering::SeqCst),
                },
            );
        }

        ServerStats {
            start_time: self.start_time,
            total_requests,
            total_errors,
            endpoints: snapshot,
        }
    }
}

impl Default for StatsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_aggregates_counts_and_timings() {
        let registry = StatsRegistry::new();
        registry.record("/api/error", Duration::from_millis(10), 500);
        registry.record("/api/error", Duration::from_millis(4), 500);
        registry.record("/api/error", Duration::from_millis(25), 200);

        let stats = registry.snapshot();
        let endpoint = &stats.endpoints["/api/error"];

        assert_eq!(endpoint.request_count, 3);
        assert_eq!(endpoint.error_count, 2);
        assert_eq!(endpoint.total_time_ms, 39);
        assert_eq!(endpoint.min_time_ms, 4);
        assert_eq!(endpoint.max_time_ms, 25);
        assert_eq!(endpoint.status_codes[&500], 2);
        assert_eq!(endpoint.status_codes[&200], 1);
        assert!(endpoint.first_request.unwrap() <= endpoint.last_request.unwrap());
    }

    #[test]
    fn histogram_counts_sum_to_request_count() {
        let registry = StatsRegistry::new();
        for status in [200, 200, 404, 500, 503, 200] {
            registry.record("/api/mixed", Duration::from_millis(1), status);
        }

        let endpoint = &registry.snapshot().endpoints["/api/mixed"];
        let histogram_total: u64 = endpoint.status_codes.values().sum();
        assert_eq!(histogram_total, endpoint.request_count);
        assert!(endpoint.error_count <= endpoint.request_count);
    }

    #[test]
    fn global_totals_cover_all_endpoints() {
        let registry = StatsRegistry::new();
        registry.record("/a", Duration::from_millis(1), 200);
        registry.record("/b", Duration::from_millis(1), 500);
        registry.record("/b", Duration::from_millis(1), 503);

        let stats = registry.snapshot();
        assert_eq!(stats.total_requests, 3);
        assert_eq!(stats.total_errors, 2);
    }

    #[test]
    fn min_stays_zero_only_before_first_record() {
        let registry = StatsRegistry::new();
        let before = &registry.snapshot();
        assert!(before.endpoints.is_empty());

        registry.record("/a", Duration::from_millis(7), 200);
        let endpoint = &registry.snapshot().endpoints["/a"];
        assert_eq!(endpoint.min_time_ms, 7);
        assert!(endpoint.min_time_ms <= endpoint.max_time_ms);
    }

    #[test]
    fn conditional_counter_increments_independently() {
        let registry = StatsRegistry::new();
        assert_eq!(registry.increment_conditional("/api/flaky"), 1);
        assert_eq!(registry.increment_conditional("/api/flaky"), 2);
        assert_eq!(registry.increment_conditional("/api/flaky"), 3);
        assert_eq!(registry.conditional_count("/api/flaky"), 3);

        // Plain records never touch the conditional counter
        registry.record("/api/flaky", Duration::from_millis(1), 200);
        assert_eq!(registry.conditional_count("/api/flaky"), 3);
    }

    #[test]
    fn snapshot_is_a_deep_copy() {
        let registry = StatsRegistry::new();
        registry.record("/a", Duration::from_millis(1), 200);

        let frozen = registry.snapshot();
        registry.record("/a", Duration::from_millis(1), 200);

        assert_eq!(frozen.endpoints["/a"].request_count, 1);
        assert_eq!(registry.snapshot().endpoints["/a"].request_count, 2);
    }

    #[test]
    fn concurrent_records_keep_per_endpoint_consistency() {
        let registry = Arc::new(StatsRegistry::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..100 {
                    registry.record("/hot", Duration::from_millis(1), 200);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let stats = registry.snapshot();
        let endpoint = &stats.endpoints["/hot"];
        assert_eq!(endpoint.request_count, 800);
        assert_eq!(endpoint.status_codes[&200], 800);
        assert_eq!(stats.total_requests, 800);
    }
}
