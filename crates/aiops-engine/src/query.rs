//! Public query/command surface of the engine

use crate::engine::{AnalysisReport, Engine};
use aiops_chaos::InjectionRule;
use aiops_common::{
    EndpointHealth, EndpointMetrics, Error, Incident, IncidentFilter, Result,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::Ordering;

/// Engine-level health summary for the host's health endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineHealth {
    pub store_records: usize,
    pub last_record_id: Option<u64>,
    /// Telemetry records dropped on insert since startup
    pub insert_failures: u64,
    /// Incidents currently held by the registry, any status
    pub open_incidents: usize,
    pub telemetry_healthy: bool,
}

impl Engine {
    /// Per-endpoint metrics over an optional window (default: the
    /// detector's analysis window).
    pub fn endpoint_metrics(&self, window: Option<Duration>) -> BTreeMap<String, EndpointMetrics> {
        self.endpoint_metrics_at(window, Utc::now())
    }

    pub fn endpoint_metrics_at(
        &self,
        window: Option<Duration>,
        now: DateTime<Utc>,
    ) -> BTreeMap<String, EndpointMetrics> {
        let window = window.unwrap_or_else(|| self.config().analysis_window());
        let since = now - window;
        let baselines = self.baselines();
        let mut metrics = BTreeMap::new();

        for endpoint in self.store().distinct_endpoints(since) {
            let agg = self.store().aggregate(&endpoint, since, now);
            if agg.count == 0 {
                continue;
            }
            let error_rate = agg.error_count_5xx as f64 / agg.count as f64;
            let baseline = baselines.get(&endpoint).map(|b| b.latency_ms);
            let health_score = health_score(error_rate, agg.avg_latency_ms, baseline);
            metrics.insert(
                endpoint,
                EndpointMetrics {
                    request_count: agg.count,
                    avg_latency_ms: agg.avg_latency_ms,
                    error_rate,
                    baseline_latency_ms: baseline,
                    status_histogram: agg.status_histogram,
                    health_score,
                    status: EndpointHealth::from_score(health_score),
                },
            );
        }
        metrics
    }

    /// Incidents matching the filter, most recently updated first.
    pub fn list_incidents(&self, filter: &IncidentFilter) -> Vec<Incident> {
        self.registry().list(filter)
    }

    pub fn get_incident(&self, id: &str) -> Result<Incident> {
        self.registry()
            .get(id)
            .ok_or_else(|| Error::NotFound(format!("incident {id}")))
    }

    pub fn acknowledge_incident(&self, id: &str) -> Result<Incident> {
        self.registry().acknowledge(id)
    }

    pub fn resolve_incident(&self, id: &str, note: &str) -> Result<Incident> {
        self.registry().resolve(id, note)
    }

    /// Run one analysis pass now, bypassing the scheduler cadence, and
    /// return what it produced.
    pub fn trigger_analysis(&self) -> Result<AnalysisReport> {
        self.run_pass()
    }

    pub fn set_injection(
        &self,
        endpoint: &str,
        delay_ms: Option<u64>,
        error_rate: Option<f64>,
    ) -> Result<BTreeMap<String, InjectionRule>> {
        self.injector().set(endpoint, InjectionRule { delay_ms, error_rate })
    }

    pub fn clear_injection(&self) -> BTreeMap<String, InjectionRule> {
        self.injector().clear()
    }

    pub fn injection_status(&self) -> BTreeMap<String, InjectionRule> {
        self.injector().snapshot()
    }

    pub fn health(&self) -> EngineHealth {
        let insert_failures = self.insert_failures.load(Ordering::Relaxed);
        EngineHealth {
            store_records: self.store().len(),
            last_record_id: self.store().last_id(),
            insert_failures,
            open_incidents: self.registry().len(),
            telemetry_healthy: insert_failures == 0,
        }
    }
}

/// Health score: starts at 100, minus 50 times the error rate, minus up to
/// 30 for latency degradation relative to baseline (linear, saturating at
/// 10x baseline), clamped to [0, 100].
fn health_score(error_rate: f64, avg_latency_ms: f64, baseline_ms: Option<f64>) -> f64 {
    let latency_penalty = match baseline_ms {
        Some(baseline) if baseline > 0.0 => {
            (avg_latency_ms / baseline - 1.0).max(0.0) / 9.0
        }
        _ => 0.0,
    };
    (100.0 - 50.0 * error_rate - 30.0 * latency_penalty).clamp(0.0, 100.0)
}
