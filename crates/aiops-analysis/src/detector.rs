//! Multi-dimensional anomaly detection over recent telemetry

use crate::BaselineMap;
use aiops_common::{Anomaly, AnomalyKind, EngineConfig, Severity};
use aiops_store::TelemetryStore;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// Stateless detector producing anomalies of kinds latency, error spike
/// and silence. Each pass reads the store and a baseline snapshot and
/// retains nothing.
pub struct AnomalyDetector {
    config: Arc<EngineConfig>,
}

impl AnomalyDetector {
    pub fn new(config: Arc<EngineConfig>) -> Self {
        Self { config }
    }

    /// Run one detection pass. Only endpoints with a learned baseline are
    /// examined; light-traffic endpoints below the minimum sample count
    /// produce no anomaly.
    pub fn detect(
        &self,
        store: &TelemetryStore,
        baselines: &BaselineMap,
        now: DateTime<Utc>,
    ) -> Vec<Anomaly> {
        let window_start = now - self.config.analysis_window();
        let min_samples = self.config.detector.min_analysis_samples;
        let mut anomalies = Vec::new();

        for (endpoint, baseline) in baselines.iter() {
            if !baseline.latency_ms.is_finite() || baseline.latency_ms <= 0.0 {
                continue;
            }

            if let Some(anomaly) = self.check_silence(store, endpoint, now) {
                anomalies.push(anomaly);
                continue;
            }

            let records = store.query_by_endpoint_time(endpoint, window_start, now);
            if records.is_empty() {
                continue;
            }

            let count = records.len() as u64;
            if count < min_samples {
                continue;
            }

            // Latency: the window mean includes failed requests so slow
            // failure modes are caught too.
            let mean = records.iter().map(|r| r.latency_ms).sum::<f64>() / count as f64;
            if mean > baseline.latency_ms * self.config.detector.latency_multiplier {
                let ratio = mean / baseline.latency_ms;
                anomalies.push(Anomaly {
                    kind: AnomalyKind::Latency,
                    endpoint: endpoint.clone(),
                    severity: latency_severity(ratio, mean),
                    baseline_ms: Some(baseline.latency_ms),
                    error_rate: None,
                    last_seen: None,
                    observed_value: mean,
                    trace_ids: records.iter().map(|r| r.trace_id.clone()).collect(),
                    sample_errors: Vec::new(),
                    detected_at: now,
                });
            }

            // Error spike over the same window.
            let errors: Vec<_> = records.iter().filter(|r| r.is_server_error()).collect();
            let rate = errors.len() as f64 / count as f64;
            if rate > self.config.detector.error_rate_threshold {
                let sample_errors: Vec<String> = errors
                    .iter()
                    .rev()
                    .filter_map(|r| r.error_message.clone())
                    .take(self.config.detector.max_sample_errors)
                    .collect();
                anomalies.push(Anomaly {
                    kind: AnomalyKind::ErrorSpike,
                    endpoint: endpoint.clone(),
                    severity: error_severity(rate),
                    baseline_ms: None,
                    error_rate: Some(rate),
                    last_seen: None,
                    observed_value: rate,
                    trace_ids: errors.iter().map(|r| r.trace_id.clone()).collect(),
                    sample_errors,
                    detected_at: now,
                });
            }
        }

        debug!(count = anomalies.len(), "detection pass complete");
        anomalies
    }

    /// Silence fires when an endpoint with a baseline had traffic earlier
    /// in the baseline window but none within the silence threshold.
    fn check_silence(
        &self,
        store: &TelemetryStore,
        endpoint: &str,
        now: DateTime<Utc>,
    ) -> Option<Anomaly> {
        let silence_start = now - self.config.silence_threshold();
        let recent = store.aggregate(endpoint, silence_start, now);
        if recent.count > 0 {
            return None;
        }
        let prior = store.aggregate(endpoint, now - self.config.baseline_window(), silence_start);
        if prior.count == 0 {
            return None;
        }
        let last_seen = prior.last_seen?;
        Some(Anomaly {
            kind: AnomalyKind::Silence,
            endpoint: endpoint.to_string(),
            severity: Severity::High,
            baseline_ms: None,
            error_rate: None,
            last_seen: Some(last_seen),
            observed_value: now.signed_duration_since(last_seen).num_milliseconds() as f64 / 1000.0,
            trace_ids: BTreeSet::new(),
            sample_errors: Vec::new(),
            detected_at: now,
        })
    }
}

/// Severity from the mean/baseline ratio; very large absolute latency is
/// critical regardless of the ratio.
fn latency_severity(ratio: f64, mean_ms: f64) -> Severity {
    if ratio >= 20.0 || mean_ms >= 10_000.0 {
        Severity::Critical
    } else if ratio >= 10.0 {
        Severity::High
    } else if ratio >= 5.0 {
        Severity::Medium
    } else {
        Severity::Low
    }
}

fn error_severity(rate: f64) -> Severity {
    if rate > 0.5 {
        Severity::Critical
    } else {
        Severity::High
    }
}
