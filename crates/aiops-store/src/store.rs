//! Append-only telemetry log with time-range and trace-id indexes

use aiops_common::{EndpointAggregate, Error, RecordId, Result, TelemetryRecord, TelemetrySample};
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap, VecDeque};
use tracing::{debug, warn};

/// In-memory telemetry store.
///
/// Writes take the write lock for the duration of one append; queries take
/// the read lock and copy matching records out, so callers never hold a
/// reference into the store.
pub struct TelemetryStore {
    inner: RwLock<StoreInner>,
}

struct StoreInner {
    /// Records in insertion order; `records[i].id == first_id + i`
    records: VecDeque<TelemetryRecord>,
    /// Id of the oldest retained record
    first_id: RecordId,
    next_id: RecordId,
    /// Endpoint -> record ids in insertion order
    endpoint_index: HashMap<String, Vec<RecordId>>,
    /// Trace id -> record ids in insertion order
    trace_index: HashMap<String, Vec<RecordId>>,
}

impl StoreInner {
    fn record(&self, id: RecordId) -> Option<&TelemetryRecord> {
        if id < self.first_id {
            return None;
        }
        self.records.get((id - self.first_id) as usize)
    }
}

impl TelemetryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(StoreInner {
                records: VecDeque::new(),
                first_id: 1,
                next_id: 1,
                endpoint_index: HashMap::new(),
                trace_index: HashMap::new(),
            }),
        }
    }

    /// Append a record, assigning its id. Rejects samples violating the
    /// record invariants; nothing is written on rejection.
    pub fn insert(&self, sample: TelemetrySample) -> Result<RecordId> {
        validate(&sample)?;

        let mut inner = self.inner.write();
        let id = inner.next_id;
        inner.next_id += 1;

        inner
            .endpoint_index
            .entry(sample.endpoint.clone())
            .or_default()
            .push(id);
        inner
            .trace_index
            .entry(sample.trace_id.clone())
            .or_default()
            .push(id);

        inner.records.push_back(TelemetryRecord {
            id,
            service_name: sample.service_name,
            endpoint: sample.endpoint,
            method: sample.method,
            status_code: sample.status_code,
            latency_ms: sample.latency_ms,
            error_message: sample.error_message,
            trace_id: sample.trace_id,
            timestamp: sample.timestamp,
        });

        Ok(id)
    }

    /// All records for `endpoint` with `since <= timestamp < until`,
    /// in chronological order (stable id tie-break).
    pub fn query_by_endpoint_time(
        &self,
        endpoint: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Vec<TelemetryRecord> {
        let inner = self.inner.read();
        let mut out: Vec<TelemetryRecord> = match inner.endpoint_index.get(endpoint) {
            Some(ids) => ids
                .iter()
                .filter_map(|&id| inner.record(id))
                .filter(|r| r.timestamp >= since && r.timestamp < until)
                .cloned()
                .collect(),
            None => Vec::new(),
        };
        out.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        out
    }

    /// All records for one trace, ascending by timestamp then id.
    pub fn query_by_trace(&self, trace_id: &str) -> Vec<TelemetryRecord> {
        let inner = self.inner.read();
        let mut out: Vec<TelemetryRecord> = match inner.trace_index.get(trace_id) {
            Some(ids) => ids.iter().filter_map(|&id| inner.record(id)).cloned().collect(),
            None => Vec::new(),
        };
        out.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        out
    }

    /// Endpoints observed since `since`.
    pub fn distinct_endpoints(&self, since: DateTime<Utc>) -> BTreeSet<String> {
        let inner = self.inner.read();
        inner
            .endpoint_index
            .iter()
            .filter(|(_, ids)| {
                ids.iter()
                    .filter_map(|&id| inner.record(id))
                    .any(|r| r.timestamp >= since)
            })
            .map(|(endpoint, _)| endpoint.clone())
            .collect()
    }

    /// One-pass aggregate over an endpoint's records in `[since, until)`.
    pub fn aggregate(
        &self,
        endpoint: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> EndpointAggregate {
        let inner = self.inner.read();
        let mut agg = EndpointAggregate::default();
        let mut latency_sum = 0.0;

        if let Some(ids) = inner.endpoint_index.get(endpoint) {
            for record in ids
                .iter()
                .filter_map(|&id| inner.record(id))
                .filter(|r| r.timestamp >= since && r.timestamp < until)
            {
                agg.count += 1;
                latency_sum += record.latency_ms;
                *agg.status_histogram.entry(record.status_code).or_insert(0) += 1;
                if record.is_server_error() {
                    agg.error_count_5xx += 1;
                }
                agg.last_seen = Some(match agg.last_seen {
                    Some(seen) if seen >= record.timestamp => seen,
                    _ => record.timestamp,
                });
            }
        }

        if agg.count > 0 {
            agg.avg_latency_ms = latency_sum / agg.count as f64;
        }
        agg
    }

    /// Number of retained records.
    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().records.is_empty()
    }

    /// Highest id assigned so far, if any record was ever inserted.
    pub fn last_id(&self) -> Option<RecordId> {
        let inner = self.inner.read();
        (inner.next_id > 1).then(|| inner.next_id - 1)
    }

    /// Drop records older than `retention`, never touching anything newer
    /// than `protected` (the analysis and baseline windows).
    pub fn prune(&self, now: DateTime<Utc>, retention: Duration, protected: Duration) -> u64 {
        let cutoff = now - retention.max(protected);
        let mut inner = self.inner.write();

        let mut removed = 0u64;
        while let Some(front) = inner.records.front() {
            if front.timestamp >= cutoff {
                break;
            }
            let record = inner.records.pop_front().map(|r| {
                removed += 1;
                r
            });
            if let Some(record) = record {
                inner.first_id = record.id + 1;
            }
        }

        if removed > 0 {
            let first_id = inner.first_id;
            inner.endpoint_index.retain(|_, ids| {
                ids.retain(|&id| id >= first_id);
                !ids.is_empty()
            });
            inner.trace_index.retain(|_, ids| {
                ids.retain(|&id| id >= first_id);
                !ids.is_empty()
            });
            debug!(removed, "pruned telemetry records");
        }
        removed
    }
}

impl Default for TelemetryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn validate(sample: &TelemetrySample) -> Result<()> {
    if sample.endpoint.is_empty() {
        warn!("rejecting telemetry record with empty endpoint");
        return Err(Error::InvalidRecord("endpoint must not be empty".into()));
    }
    if sample.trace_id.is_empty() {
        warn!(endpoint = %sample.endpoint, "rejecting telemetry record with empty trace id");
        return Err(Error::InvalidRecord("trace_id must not be empty".into()));
    }
    if !(100..=599).contains(&sample.status_code) {
        warn!(
            endpoint = %sample.endpoint,
            status = sample.status_code,
            "rejecting telemetry record with out-of-range status code"
        );
        return Err(Error::InvalidRecord(format!(
            "status_code must be in [100, 599], got {}",
            sample.status_code
        )));
    }
    if !sample.latency_ms.is_finite() || sample.latency_ms < 0.0 {
        warn!(
            endpoint = %sample.endpoint,
            latency = sample.latency_ms,
            "rejecting telemetry record with invalid latency"
        );
        return Err(Error::InvalidRecord(format!(
            "latency_ms must be finite and non-negative, got {}",
            sample.latency_ms
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample(endpoint: &str, trace_id: &str, status: u16, latency: f64) -> TelemetrySample {
        TelemetrySample {
            service_name: "shop".to_string(),
            endpoint: endpoint.to_string(),
            method: "GET".to_string(),
            status_code: status,
            latency_ms: latency,
            error_message: None,
            trace_id: trace_id.to_string(),
            timestamp: Utc::now(),
        }
    }

    fn sample_at(
        endpoint: &str,
        trace_id: &str,
        status: u16,
        latency: f64,
        at: DateTime<Utc>,
    ) -> TelemetrySample {
        TelemetrySample {
            timestamp: at,
            ..sample(endpoint, trace_id, status, latency)
        }
    }

    #[test]
    fn insert_assigns_contiguous_ids() {
        let store = TelemetryStore::new();
        for n in 1..=10u64 {
            let id = store.insert(sample("/payment", "t1", 200, 10.0)).unwrap();
            assert_eq!(id, n);
        }
        assert_eq!(store.len(), 10);
        assert_eq!(store.last_id(), Some(10));
    }

    #[test]
    fn rejects_invalid_records() {
        let store = TelemetryStore::new();
        assert!(store.insert(sample("/a", "t", 99, 1.0)).is_err());
        assert!(store.insert(sample("/a", "t", 600, 1.0)).is_err());
        assert!(store.insert(sample("/a", "t", 200, -1.0)).is_err());
        assert!(store.insert(sample("/a", "t", 200, f64::NAN)).is_err());
        assert!(store.insert(sample("/a", "", 200, 1.0)).is_err());
        assert!(store.insert(sample("", "t", 200, 1.0)).is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn endpoint_time_query_is_half_open_and_sorted() {
        let store = TelemetryStore::new();
        let base = Utc::now();
        store
            .insert(sample_at("/payment", "t1", 200, 10.0, base + Duration::seconds(2)))
            .unwrap();
        store
            .insert(sample_at("/payment", "t2", 200, 20.0, base))
            .unwrap();
        store
            .insert(sample_at("/payment", "t3", 200, 30.0, base + Duration::seconds(4)))
            .unwrap();
        store
            .insert(sample_at("/inventory", "t4", 200, 40.0, base))
            .unwrap();

        let records =
            store.query_by_endpoint_time("/payment", base, base + Duration::seconds(4));
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].latency_ms, 20.0);
        assert_eq!(records[1].latency_ms, 10.0);
    }

    #[test]
    fn trace_query_sorted_with_id_tie_break() {
        let store = TelemetryStore::new();
        let at = Utc::now();
        store.insert(sample_at("/checkout", "trace-1", 500, 5.0, at)).unwrap();
        store.insert(sample_at("/payment", "trace-1", 500, 5.0, at)).unwrap();
        store.insert(sample_at("/other", "trace-2", 200, 5.0, at)).unwrap();

        let records = store.query_by_trace("trace-1");
        assert_eq!(records.len(), 2);
        // equal timestamps fall back to id order
        assert_eq!(records[0].endpoint, "/checkout");
        assert_eq!(records[1].endpoint, "/payment");
        assert!(store.query_by_trace("missing").is_empty());
    }

    #[test]
    fn distinct_endpoints_honors_since() {
        let store = TelemetryStore::new();
        let now = Utc::now();
        store
            .insert(sample_at("/old", "t1", 200, 1.0, now - Duration::hours(2)))
            .unwrap();
        store.insert(sample_at("/new", "t2", 200, 1.0, now)).unwrap();

        let endpoints = store.distinct_endpoints(now - Duration::minutes(5));
        assert!(endpoints.contains("/new"));
        assert!(!endpoints.contains("/old"));
    }

    #[test]
    fn aggregate_counts_in_one_window() {
        let store = TelemetryStore::new();
        let now = Utc::now();
        let since = now - Duration::minutes(5);
        store.insert(sample_at("/payment", "t1", 200, 100.0, now - Duration::minutes(4))).unwrap();
        store.insert(sample_at("/payment", "t2", 500, 200.0, now - Duration::minutes(3))).unwrap();
        store.insert(sample_at("/payment", "t3", 503, 300.0, now - Duration::minutes(2))).unwrap();
        store.insert(sample_at("/payment", "t4", 200, 400.0, now - Duration::hours(1))).unwrap();

        let agg = store.aggregate("/payment", since, now);
        assert_eq!(agg.count, 3);
        assert_eq!(agg.error_count_5xx, 2);
        assert!((agg.avg_latency_ms - 200.0).abs() < 1e-9);
        assert_eq!(agg.status_histogram[&200], 1);
        assert_eq!(agg.status_histogram[&500], 1);
        assert_eq!(agg.last_seen, Some(now - Duration::minutes(2)));

        let empty = store.aggregate("/missing", since, now);
        assert_eq!(empty.count, 0);
        assert!(empty.last_seen.is_none());
    }

    #[test]
    fn prune_respects_protected_window() {
        let store = TelemetryStore::new();
        let now = Utc::now();
        store.insert(sample_at("/a", "t1", 200, 1.0, now - Duration::hours(30))).unwrap();
        store.insert(sample_at("/a", "t2", 200, 1.0, now - Duration::minutes(30))).unwrap();
        store.insert(sample_at("/a", "t3", 200, 1.0, now)).unwrap();

        // Retention shorter than the protected window must not win.
        let removed = store.prune(now, Duration::minutes(1), Duration::hours(1));
        assert_eq!(removed, 1);
        assert_eq!(store.len(), 2);

        // Pruned ids disappear from the indexes but survivors keep theirs.
        assert!(store.query_by_trace("t1").is_empty());
        let remaining = store.query_by_endpoint_time(
            "/a",
            now - Duration::hours(24),
            now + Duration::seconds(1),
        );
        assert_eq!(remaining.len(), 2);
        assert_eq!(remaining[0].id, 2);
    }

    proptest! {
        #[test]
        fn stored_records_satisfy_invariants(
            statuses in proptest::collection::vec(100u16..=599, 1..50),
            latencies in proptest::collection::vec(0.0f64..10_000.0, 1..50),
        ) {
            let store = TelemetryStore::new();
            let n = statuses.len().min(latencies.len());
            for i in 0..n {
                store
                    .insert(sample("/payment", &format!("trace-{i}"), statuses[i], latencies[i]))
                    .unwrap();
            }

            prop_assert_eq!(store.len(), n);
            let records = store.query_by_endpoint_time(
                "/payment",
                Utc::now() - Duration::hours(1),
                Utc::now() + Duration::hours(1),
            );
            prop_assert_eq!(records.len(), n);
            let mut ids: Vec<_> = records.iter().map(|r| r.id).collect();
            ids.sort_unstable();
            for (i, id) in ids.iter().enumerate() {
                prop_assert_eq!(*id, i as u64 + 1);
            }
            for record in &records {
                prop_assert!(record.latency_ms >= 0.0);
                prop_assert!((100..=599).contains(&record.status_code));
                prop_assert!(!record.trace_id.is_empty());
            }
        }
    }
}
