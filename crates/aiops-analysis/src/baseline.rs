//! Adaptive per-endpoint latency baselines

use aiops_common::{Baseline, EngineConfig};
use aiops_store::TelemetryStore;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// Published snapshot of all learned baselines, keyed by endpoint
pub type BaselineMap = Arc<BTreeMap<String, Baseline>>;

/// EWMA learner over successful-request latency.
///
/// Only the analysis task updates baselines; the detector and the query
/// surface read a consistent snapshot published by pointer swap, so a
/// learning pass never exposes partially updated state.
pub struct BaselineLearner {
    config: Arc<EngineConfig>,
    current: RwLock<BaselineMap>,
}

impl BaselineLearner {
    pub fn new(config: Arc<EngineConfig>) -> Self {
        Self {
            config,
            current: RwLock::new(Arc::new(BTreeMap::new())),
        }
    }

    /// Consistent snapshot of the current baselines.
    pub fn snapshot(&self) -> BaselineMap {
        Arc::clone(&self.current.read())
    }

    /// Run one learning pass over every endpoint observed in the baseline
    /// window, then publish the new snapshot. Returns the number of
    /// baselines created or updated.
    pub fn run_pass(&self, store: &TelemetryStore, now: DateTime<Utc>) -> usize {
        let window = self.config.baseline_window();
        let since = now - window;
        let alpha = self.config.baseline.alpha;
        let min_samples = self.config.baseline.min_samples;

        let mut next: BTreeMap<String, Baseline> = (*self.snapshot()).clone();
        let mut updated = 0usize;

        for endpoint in store.distinct_endpoints(since) {
            let latencies: Vec<f64> = store
                .query_by_endpoint_time(&endpoint, since, now)
                .into_iter()
                .filter(|r| r.is_success())
                .map(|r| r.latency_ms)
                .collect();

            // Thin windows neither learn nor unlearn a baseline.
            if (latencies.len() as u64) < min_samples {
                trace!(
                    endpoint = %endpoint,
                    samples = latencies.len(),
                    "below minimum sample count, baseline unchanged"
                );
                continue;
            }

            let prior = next.get(&endpoint).cloned();
            let baseline = match prior {
                Some(prior) => {
                    let kept = trim_outliers(&latencies, prior.latency_ms);
                    if kept.is_empty() {
                        // every sample reads as an outlier; keep the prior
                        trace!(endpoint = %endpoint, "window contained only outliers, baseline unchanged");
                        continue;
                    }
                    Baseline {
                        endpoint: endpoint.clone(),
                        latency_ms: alpha * mean(&kept) + (1.0 - alpha) * prior.latency_ms,
                        sample_count: prior.sample_count + kept.len() as u64,
                        updated_at: now,
                    }
                }
                // First learned value equals the sample mean; with no prior
                // there is nothing to call an outlier yet.
                None => Baseline {
                    endpoint: endpoint.clone(),
                    latency_ms: mean(&latencies),
                    sample_count: latencies.len() as u64,
                    updated_at: now,
                },
            };
            trace!(
                endpoint = %endpoint,
                latency_ms = baseline.latency_ms,
                samples = baseline.sample_count,
                "baseline updated"
            );
            next.insert(endpoint, baseline);
            updated += 1;
        }

        debug!(updated, total = next.len(), "baseline pass complete");
        *self.current.write() = Arc::new(next);
        updated
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// One outlier-trim iteration: samples beyond 5x the current baseline are
/// dropped before the window mean is taken.
fn trim_outliers(latencies: &[f64], baseline_ms: f64) -> Vec<f64> {
    if baseline_ms <= 0.0 {
        return latencies.to_vec();
    }
    let threshold = baseline_ms * 5.0;
    latencies.iter().copied().filter(|v| *v <= threshold).collect()
}
