//! Trace-correlation root-cause analysis

use crate::BaselineMap;
use aiops_common::{
    Anomaly, AnomalyKind, EngineConfig, Incident, IncidentStatus, RootCause, Severity,
    TraceCorrelation, TraceSample,
};
use aiops_incidents::IncidentRegistry;
use aiops_store::TelemetryStore;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

/// Correlates one pass worth of anomalies across distributed traces and
/// composes deduplicated incidents.
///
/// The engine only reads the registry (to find merge targets); the caller
/// applies the returned incidents, so a failed pass never leaves partial
/// registry state behind.
pub struct RcaEngine {
    config: Arc<EngineConfig>,
}

/// Earliest failing record of one trace
struct TraceFailure {
    trace_id: String,
    root_endpoint: String,
    root_status: u16,
    root_timestamp: DateTime<Utc>,
    /// Endpoints touched by the trace, in order of first appearance
    chain: Vec<String>,
}

impl RcaEngine {
    pub fn new(config: Arc<EngineConfig>) -> Self {
        Self { config }
    }

    /// Correlate anomalies into incidents. Returns fully composed incidents
    /// (new, or merged copies of registry entries) ready to upsert.
    pub fn correlate(
        &self,
        store: &TelemetryStore,
        baselines: &BaselineMap,
        anomalies: &[Anomaly],
        registry: &IncidentRegistry,
        now: DateTime<Utc>,
    ) -> Vec<Incident> {
        if anomalies.is_empty() {
            return Vec::new();
        }

        let trace_ids: BTreeSet<&String> =
            anomalies.iter().flat_map(|a| a.trace_ids.iter()).collect();
        let failures: Vec<TraceFailure> = trace_ids
            .iter()
            .filter_map(|trace_id| self.first_failure(store, baselines, trace_id))
            .collect();

        let mut incidents = Vec::new();
        let mut remaining: Vec<&Anomaly> = anomalies.iter().collect();

        if let Some((root, votes, _)) = elect_root(&failures) {
            let root = root.to_string();
            let confidence = votes as f64 / failures.len() as f64;
            let supporting: Vec<&TraceFailure> = failures
                .iter()
                .filter(|f| f.root_endpoint == root)
                .collect();

            let mut affected: Vec<String> = Vec::new();
            for failure in &supporting {
                for endpoint in &failure.chain {
                    if !affected.contains(endpoint) {
                        affected.push(endpoint.clone());
                    }
                }
            }

            let (absorbed, rest): (Vec<&Anomaly>, Vec<&Anomaly>) = remaining
                .into_iter()
                .partition(|a| affected.contains(&a.endpoint));
            remaining = rest;

            let severity = absorbed
                .iter()
                .map(|a| a.severity)
                .max()
                .unwrap_or(Severity::Medium);
            // title follows the dominant anomaly on the root endpoint
            let title = absorbed
                .iter()
                .filter(|a| a.endpoint == root)
                .max_by_key(|a| a.severity)
                .or_else(|| absorbed.iter().max_by_key(|a| a.severity))
                .map(|a| title_for(a.kind, &root))
                .unwrap_or_else(|| format!("Incident at {root}"));

            let correlation = TraceCorrelation {
                total_traces: supporting.len() as u64,
                sample_traces: supporting
                    .iter()
                    .take(self.config.incidents.max_sample_traces)
                    .map(|f| TraceSample {
                        trace_id: f.trace_id.clone(),
                        root_endpoint: f.root_endpoint.clone(),
                        root_status: f.root_status,
                        affected_chain: f.chain.clone(),
                    })
                    .collect(),
            };

            incidents.push(self.publish(
                registry,
                now,
                &root,
                RootCause {
                    endpoint: root.clone(),
                    description: format!(
                        "Earliest failure in {votes} of {} correlated traces",
                        failures.len()
                    ),
                    confidence,
                },
                title,
                severity,
                affected,
                absorbed.into_iter().cloned().collect(),
                correlation,
            ));
        }

        // Anomalies outside the voted root's blast radius (or passes with
        // no usable trace evidence) stand on their own, one incident per
        // endpoint.
        let mut by_endpoint: BTreeMap<&str, Vec<&Anomaly>> = BTreeMap::new();
        for anomaly in remaining {
            by_endpoint.entry(&anomaly.endpoint).or_default().push(anomaly);
        }
        for (endpoint, group) in by_endpoint {
            let Some(&dominant) = group.iter().max_by_key(|a| a.severity) else {
                continue;
            };
            let severity = dominant.severity;
            incidents.push(self.publish(
                registry,
                now,
                endpoint,
                RootCause {
                    endpoint: endpoint.to_string(),
                    description: describe(dominant),
                    confidence: 1.0,
                },
                title_for(dominant.kind, endpoint),
                severity,
                vec![endpoint.to_string()],
                group.into_iter().cloned().collect(),
                TraceCorrelation::default(),
            ));
        }

        debug!(incidents = incidents.len(), "correlation pass complete");
        incidents
    }

    /// Earliest record in the trace that is 5xx or breaches its endpoint's
    /// latency threshold; ties on timestamp fall back to insertion id.
    fn first_failure(
        &self,
        store: &TelemetryStore,
        baselines: &BaselineMap,
        trace_id: &str,
    ) -> Option<TraceFailure> {
        let records = store.query_by_trace(trace_id);
        let multiplier = self.config.detector.latency_multiplier;
        let failing = records.iter().find(|r| {
            r.is_server_error()
                || baselines.get(&r.endpoint).map_or(false, |b| {
                    b.latency_ms > 0.0 && r.latency_ms > b.latency_ms * multiplier
                })
        })?;

        let mut chain = Vec::new();
        for record in &records {
            if !chain.contains(&record.endpoint) {
                chain.push(record.endpoint.clone());
            }
        }
        Some(TraceFailure {
            trace_id: trace_id.to_string(),
            root_endpoint: failing.endpoint.clone(),
            root_status: failing.status_code,
            root_timestamp: failing.timestamp,
            chain,
        })
    }

    /// Merge into a recent incident with the same root endpoint, or compose
    /// a fresh one.
    #[allow(clippy::too_many_arguments)]
    fn publish(
        &self,
        registry: &IncidentRegistry,
        now: DateTime<Utc>,
        root_endpoint: &str,
        root_cause: RootCause,
        title: String,
        severity: Severity,
        affected: Vec<String>,
        anomalies: Vec<Anomaly>,
        correlation: TraceCorrelation,
    ) -> Incident {
        let window = self.config.correlation_window();
        if let Some(mut existing) = registry.find_mergeable(root_endpoint, now, window) {
            debug!(id = %existing.id, root = root_endpoint, "merging into existing incident");
            for anomaly in anomalies {
                match existing
                    .anomalies
                    .iter_mut()
                    .find(|a| a.kind == anomaly.kind && a.endpoint == anomaly.endpoint)
                {
                    Some(slot) => *slot = anomaly,
                    None => existing.anomalies.push(anomaly),
                }
            }
            for endpoint in affected {
                if !existing.affected_endpoints.contains(&endpoint) {
                    existing.affected_endpoints.push(endpoint);
                }
            }
            existing.severity = existing.severity.max(severity);
            existing.root_cause = root_cause;
            if correlation.total_traces > 0 {
                existing.trace_correlation = correlation;
            }
            existing.last_updated = now;
            return existing;
        }

        Incident {
            id: registry.allocate_id(now),
            title,
            severity,
            status: IncidentStatus::Active,
            root_cause,
            affected_endpoints: affected,
            anomalies,
            trace_correlation: correlation,
            first_detected: now,
            last_updated: now,
            resolution_note: None,
        }
    }
}

/// Majority vote over trace first-failures; ties go to the endpoint whose
/// earliest first-failure is oldest.
fn elect_root(failures: &[TraceFailure]) -> Option<(&str, u64, DateTime<Utc>)> {
    let mut votes: BTreeMap<&str, (u64, DateTime<Utc>)> = BTreeMap::new();
    for failure in failures {
        let entry = votes
            .entry(failure.root_endpoint.as_str())
            .or_insert((0, failure.root_timestamp));
        entry.0 += 1;
        entry.1 = entry.1.min(failure.root_timestamp);
    }

    let mut best: Option<(&str, u64, DateTime<Utc>)> = None;
    for (endpoint, (count, earliest)) in votes {
        let better = match best {
            None => true,
            Some((_, best_count, best_earliest)) => {
                count > best_count || (count == best_count && earliest < best_earliest)
            }
        };
        if better {
            best = Some((endpoint, count, earliest));
        }
    }
    best
}

fn title_for(kind: AnomalyKind, endpoint: &str) -> String {
    match kind {
        AnomalyKind::Latency => format!("Latency spike on {endpoint}"),
        AnomalyKind::ErrorSpike => format!("Error spike on {endpoint}"),
        AnomalyKind::Silence => format!("Traffic silence on {endpoint}"),
    }
}

fn describe(anomaly: &Anomaly) -> String {
    match anomaly.kind {
        AnomalyKind::Latency => format!(
            "Mean latency {:.0} ms exceeds baseline {:.0} ms",
            anomaly.observed_value,
            anomaly.baseline_ms.unwrap_or(0.0)
        ),
        AnomalyKind::ErrorSpike => format!(
            "Server error rate {:.0}%",
            anomaly.error_rate.unwrap_or(0.0) * 100.0
        ),
        AnomalyKind::Silence => "Traffic stopped after steady activity".to_string(),
    }
}
