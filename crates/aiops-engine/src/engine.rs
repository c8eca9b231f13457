//! Composite engine value and the analysis pass

use aiops_analysis::{AnomalyDetector, BaselineLearner, BaselineMap, RcaEngine};
use aiops_chaos::FailureInjector;
use aiops_common::{Anomaly, EngineConfig, Incident, Result};
use aiops_incidents::IncidentRegistry;
use aiops_store::TelemetryStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Outcome of one analysis pass, returned to on-demand callers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub anomalies: Vec<Anomaly>,
    pub incidents: Vec<Incident>,
    /// Active incidents auto-closed by TTL expiration during this pass
    pub expired_incidents: u64,
}

/// The operations-intelligence engine.
///
/// Owns the telemetry store, failure injector, baseline learner, anomaly
/// detector, RCA engine and incident registry. Constructed once at
/// startup and shared behind an `Arc` between the instrumentation hook,
/// the command handlers and the background scheduler.
pub struct Engine {
    config: Arc<EngineConfig>,
    store: Arc<TelemetryStore>,
    injector: Arc<FailureInjector>,
    learner: BaselineLearner,
    detector: AnomalyDetector,
    rca: RcaEngine,
    registry: IncidentRegistry,
    pub(crate) insert_failures: AtomicU64,
}

impl Engine {
    /// Build an engine from a validated configuration.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        info!(service = %config.service_name, "initializing AIOps engine");
        Ok(Self {
            store: Arc::new(TelemetryStore::new()),
            injector: Arc::new(FailureInjector::new()),
            learner: BaselineLearner::new(Arc::clone(&config)),
            detector: AnomalyDetector::new(Arc::clone(&config)),
            rca: RcaEngine::new(Arc::clone(&config)),
            registry: IncidentRegistry::new(),
            insert_failures: AtomicU64::new(0),
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &TelemetryStore {
        &self.store
    }

    pub fn injector(&self) -> &FailureInjector {
        &self.injector
    }

    pub(crate) fn registry(&self) -> &IncidentRegistry {
        &self.registry
    }

    /// Current baseline snapshot.
    pub fn baselines(&self) -> BaselineMap {
        self.learner.snapshot()
    }

    /// Run one analysis pass at the current wall-clock time.
    pub fn run_pass(&self) -> Result<AnalysisReport> {
        self.run_pass_at(Utc::now())
    }

    /// Run one analysis pass as of `now`: learner, detector, RCA, registry
    /// apply, TTL sweep, retention pruning.
    ///
    /// Anomalies and incidents are computed on local values first and the
    /// registry mutated only once the full incident set exists, so an
    /// error during compute leaves the registry untouched.
    pub fn run_pass_at(&self, now: DateTime<Utc>) -> Result<AnalysisReport> {
        let started = std::time::Instant::now();

        self.learner.run_pass(&self.store, now);
        let baselines = self.learner.snapshot();
        let anomalies = self.detector.detect(&self.store, &baselines, now);
        let incidents = self
            .rca
            .correlate(&self.store, &baselines, &anomalies, &self.registry, now);

        for incident in &incidents {
            self.registry.upsert(incident.clone());
        }
        let sweep = self.registry.sweep(now, self.config.incident_ttl());

        let protected = self
            .config
            .analysis_window()
            .max(self.config.baseline_window());
        self.store.prune(now, self.config.retention(), protected);

        let elapsed = started.elapsed();
        let deadline = Duration::from_secs(self.config.scheduler.pass_deadline_secs);
        if elapsed > deadline {
            warn!(
                elapsed_ms = elapsed.as_millis() as u64,
                deadline_ms = deadline.as_millis() as u64,
                "analysis pass exceeded soft deadline"
            );
        }
        debug!(
            anomalies = anomalies.len(),
            incidents = incidents.len(),
            expired = sweep.expired,
            elapsed_ms = elapsed.as_millis() as u64,
            "analysis pass complete"
        );

        Ok(AnalysisReport {
            anomalies,
            incidents,
            expired_incidents: sweep.expired,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aiops_common::TelemetrySample;
    use chrono::Duration as ChronoDuration;

    fn insert(engine: &Engine, endpoint: &str, status: u16, latency: f64, at: DateTime<Utc>) {
        engine
            .store()
            .insert(TelemetrySample {
                service_name: "shop".to_string(),
                endpoint: endpoint.to_string(),
                method: "GET".to_string(),
                status_code: status,
                latency_ms: latency,
                error_message: None,
                trace_id: format!("trace-{}", at.timestamp_micros()),
                timestamp: at,
            })
            .unwrap();
    }

    #[test]
    fn rejects_invalid_config() {
        let mut config = EngineConfig::default();
        config.baseline.alpha = 0.0;
        assert!(Engine::new(config).is_err());
    }

    #[test]
    fn empty_pass_produces_nothing() {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        let report = engine.run_pass().unwrap();
        assert!(report.anomalies.is_empty());
        assert!(report.incidents.is_empty());
        assert_eq!(report.expired_incidents, 0);
    }

    #[test]
    fn pass_learns_then_detects() {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        let now = Utc::now();

        // an hour of normal traffic, then a burst of errors
        for i in 0..30 {
            insert(&engine, "/payment", 200, 100.0, now - ChronoDuration::minutes(i + 6));
        }
        for i in 0..10 {
            let at = now - ChronoDuration::seconds(60 + i);
            engine
                .store()
                .insert(TelemetrySample {
                    service_name: "shop".to_string(),
                    endpoint: "/payment".to_string(),
                    method: "GET".to_string(),
                    status_code: 500,
                    latency_ms: 5.0,
                    error_message: Some("boom".to_string()),
                    trace_id: format!("err-{i}"),
                    timestamp: at,
                })
                .unwrap();
        }

        let report = engine.run_pass_at(now).unwrap();
        assert!(engine.baselines().get("/payment").is_some());
        assert_eq!(report.anomalies.len(), 1);
        assert_eq!(report.incidents.len(), 1);
        assert_eq!(report.incidents[0].root_cause.endpoint, "/payment");
    }
}
