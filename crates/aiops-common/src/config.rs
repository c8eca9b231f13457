//! Configuration for the AIOps engine

use crate::{Error, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Name reported in every telemetry record
    pub service_name: String,
    pub store: StoreConfig,
    pub baseline: BaselineConfig,
    pub detector: DetectorConfig,
    pub incidents: IncidentConfig,
    pub scheduler: SchedulerConfig,
}

/// Telemetry store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Records older than this are eligible for pruning
    pub retention_secs: u64,
}

/// Baseline learner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineConfig {
    /// Lookback window for learning passes
    pub window_secs: u64,
    /// Minimum successful observations before a baseline is learned
    pub min_samples: u64,
    /// EWMA smoothing factor in (0, 1]
    pub alpha: f64,
}

/// Anomaly detector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Window of recent telemetry examined each pass
    pub analysis_window_secs: u64,
    /// Mean latency above baseline * multiplier triggers a latency anomaly
    pub latency_multiplier: f64,
    /// 5xx fraction above this triggers an error spike
    pub error_rate_threshold: f64,
    /// Endpoints with fewer records in the window produce no anomaly
    pub min_analysis_samples: u64,
    /// Silence fires after this long without any record
    pub silence_threshold_secs: u64,
    /// Error messages attached to an error-spike anomaly
    pub max_sample_errors: usize,
}

/// Incident registry and RCA configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentConfig {
    /// Active incidents idle past this are auto-closed
    pub ttl_secs: u64,
    /// New findings merge into an active incident with the same root
    /// endpoint updated within this window
    pub correlation_window_secs: u64,
    /// Example traces attached to an incident
    pub max_sample_traces: usize,
}

/// Analysis scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Cadence of background analysis passes
    pub interval_secs: u64,
    /// Soft deadline per pass; exceeding it logs a warning
    pub pass_deadline_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            service_name: "monitored-service".to_string(),
            store: StoreConfig {
                retention_secs: 24 * 60 * 60,
            },
            baseline: BaselineConfig {
                window_secs: 60 * 60,
                min_samples: 10,
                alpha: 0.1,
            },
            detector: DetectorConfig {
                analysis_window_secs: 5 * 60,
                latency_multiplier: 3.0,
                error_rate_threshold: 0.20,
                min_analysis_samples: 5,
                silence_threshold_secs: 5 * 60,
                max_sample_errors: 5,
            },
            incidents: IncidentConfig {
                ttl_secs: 30 * 60,
                correlation_window_secs: 5 * 60,
                max_sample_traces: 5,
            },
            scheduler: SchedulerConfig {
                interval_secs: 30,
                pass_deadline_secs: 10,
            },
        }
    }
}

impl EngineConfig {
    /// Validate the configuration at startup
    pub fn validate(&self) -> Result<()> {
        if self.service_name.is_empty() {
            return Err(Error::Configuration("service_name must not be empty".into()));
        }
        if !(0.0..=1.0).contains(&self.baseline.alpha) || self.baseline.alpha == 0.0 {
            return Err(Error::Configuration(format!(
                "baseline.alpha must be in (0, 1], got {}",
                self.baseline.alpha
            )));
        }
        if self.baseline.min_samples == 0 {
            return Err(Error::Configuration("baseline.min_samples must be > 0".into()));
        }
        if self.detector.latency_multiplier <= 1.0 {
            return Err(Error::Configuration(format!(
                "detector.latency_multiplier must be > 1, got {}",
                self.detector.latency_multiplier
            )));
        }
        if !(0.0..1.0).contains(&self.detector.error_rate_threshold) {
            return Err(Error::Configuration(format!(
                "detector.error_rate_threshold must be in [0, 1), got {}",
                self.detector.error_rate_threshold
            )));
        }
        if self.scheduler.interval_secs == 0 {
            return Err(Error::Configuration("scheduler.interval_secs must be > 0".into()));
        }
        // Pruning must never eat into the windows the analysis reads
        let min_retention = self
            .baseline
            .window_secs
            .max(self.detector.analysis_window_secs);
        if self.store.retention_secs < min_retention {
            return Err(Error::Configuration(format!(
                "store.retention_secs ({}) is shorter than the analysis windows ({})",
                self.store.retention_secs, min_retention
            )));
        }
        Ok(())
    }

    pub fn baseline_window(&self) -> Duration {
        Duration::seconds(self.baseline.window_secs as i64)
    }

    pub fn analysis_window(&self) -> Duration {
        Duration::seconds(self.detector.analysis_window_secs as i64)
    }

    pub fn silence_threshold(&self) -> Duration {
        Duration::seconds(self.detector.silence_threshold_secs as i64)
    }

    pub fn retention(&self) -> Duration {
        Duration::seconds(self.store.retention_secs as i64)
    }

    pub fn incident_ttl(&self) -> Duration {
        Duration::seconds(self.incidents.ttl_secs as i64)
    }

    pub fn correlation_window(&self) -> Duration {
        Duration::seconds(self.incidents.correlation_window_secs as i64)
    }
}
