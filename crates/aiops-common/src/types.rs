//! Core data model for the AIOps engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Unique identifier for telemetry records, assigned by the store
pub type RecordId = u64;

/// Unique identifier for incidents (`INC-<epoch>-<serial>`)
pub type IncidentId = String;

/// A request observation produced by the instrumentation hook, before the
/// store has assigned an id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub service_name: String,
    pub endpoint: String,
    pub method: String,
    pub status_code: u16,
    pub latency_ms: f64,
    pub error_message: Option<String>,
    pub trace_id: String,
    pub timestamp: DateTime<Utc>,
}

/// A stored telemetry record. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub id: RecordId,
    pub service_name: String,
    pub endpoint: String,
    pub method: String,
    pub status_code: u16,
    pub latency_ms: f64,
    pub error_message: Option<String>,
    pub trace_id: String,
    pub timestamp: DateTime<Utc>,
}

impl TelemetryRecord {
    /// Whether the record represents a successful request (2xx)
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// Whether the record represents a server-side failure (5xx)
    pub fn is_server_error(&self) -> bool {
        self.status_code >= 500
    }
}

/// One-pass aggregate over an endpoint's records in a time window
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointAggregate {
    pub count: u64,
    pub avg_latency_ms: f64,
    pub status_histogram: BTreeMap<u16, u64>,
    pub error_count_5xx: u64,
    pub last_seen: Option<DateTime<Utc>>,
}

/// Learned latency baseline for one endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Baseline {
    pub endpoint: String,
    /// Current EWMA of successful-request latency in milliseconds
    pub latency_ms: f64,
    /// Total successful observations folded in so far
    pub sample_count: u64,
    pub updated_at: DateTime<Utc>,
}

/// Kind of a detected anomaly
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    Latency,
    ErrorSpike,
    Silence,
}

impl AnomalyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyKind::Latency => "latency",
            AnomalyKind::ErrorSpike => "error_spike",
            AnomalyKind::Silence => "silence",
        }
    }
}

/// Severity levels for anomalies and incidents
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

/// A single detection event for one endpoint in one analysis pass.
///
/// Anomalies are ephemeral: the detector produces them, the RCA engine
/// copies them into any incident that absorbs them, and nothing retains
/// them between passes. Kind-specific context uses explicit nullability:
/// `baseline_ms` for latency, `error_rate` for error spikes, `last_seen`
/// for silence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anomaly {
    pub kind: AnomalyKind,
    pub endpoint: String,
    pub severity: Severity,
    pub baseline_ms: Option<f64>,
    pub error_rate: Option<f64>,
    pub last_seen: Option<DateTime<Utc>>,
    /// Current window aggregate: mean latency, observed error rate, or
    /// seconds of silence depending on `kind`
    pub observed_value: f64,
    /// Trace ids whose records contributed to this anomaly's window
    pub trace_ids: BTreeSet<String>,
    /// Most recent captured error messages (error spikes only)
    pub sample_errors: Vec<String>,
    pub detected_at: DateTime<Utc>,
}

/// Lifecycle state of an incident
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    Active,
    Acknowledged,
    Resolved,
}

impl IncidentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentStatus::Active => "active",
            IncidentStatus::Acknowledged => "acknowledged",
            IncidentStatus::Resolved => "resolved",
        }
    }
}

/// Identified root cause of an incident
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootCause {
    pub endpoint: String,
    pub description: String,
    /// Fraction of failing traces that voted for this root, in [0, 1]
    pub confidence: f64,
}

/// One sample trace supporting an incident's root-cause attribution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceSample {
    pub trace_id: String,
    pub root_endpoint: String,
    pub root_status: u16,
    /// Endpoints touched by the trace, in order of first appearance
    pub affected_chain: Vec<String>,
}

/// Trace-correlation evidence attached to an incident
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraceCorrelation {
    pub total_traces: u64,
    pub sample_traces: Vec<TraceSample>,
}

/// A deduplicated, correlated grouping of anomalies with an identified
/// root endpoint and lifecycle state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub id: IncidentId,
    pub title: String,
    pub severity: Severity,
    pub status: IncidentStatus,
    pub root_cause: RootCause,
    /// Affected endpoints in order of first appearance across traces
    pub affected_endpoints: Vec<String>,
    pub anomalies: Vec<Anomaly>,
    pub trace_correlation: TraceCorrelation,
    pub first_detected: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub resolution_note: Option<String>,
}

/// Filter for incident listings; `None` fields match everything
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IncidentFilter {
    pub severity: Option<Severity>,
    pub status: Option<IncidentStatus>,
    pub endpoint: Option<String>,
}

impl IncidentFilter {
    pub fn matches(&self, incident: &Incident) -> bool {
        if let Some(severity) = self.severity {
            if incident.severity != severity {
                return false;
            }
        }
        if let Some(status) = self.status {
            if incident.status != status {
                return false;
            }
        }
        if let Some(endpoint) = &self.endpoint {
            if &incident.root_cause.endpoint != endpoint
                && !incident.affected_endpoints.contains(endpoint)
            {
                return false;
            }
        }
        true
    }
}

/// Health classification for one endpoint, derived from its health score
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EndpointHealth {
    Healthy,
    Degraded,
    Unhealthy,
}

impl EndpointHealth {
    /// Classify a health score: healthy >= 90, degraded >= 60, else unhealthy
    pub fn from_score(score: f64) -> Self {
        if score >= 90.0 {
            EndpointHealth::Healthy
        } else if score >= 60.0 {
            EndpointHealth::Degraded
        } else {
            EndpointHealth::Unhealthy
        }
    }
}

/// Per-endpoint metrics exposed by the query surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointMetrics {
    pub request_count: u64,
    pub avg_latency_ms: f64,
    pub error_rate: f64,
    pub baseline_latency_ms: Option<f64>,
    pub status_histogram: BTreeMap<u16, u64>,
    pub health_score: f64,
    pub status: EndpointHealth,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_ordering() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
        assert_eq!(
            [Severity::High, Severity::Low, Severity::Critical]
                .iter()
                .max(),
            Some(&Severity::Critical)
        );
    }

    #[test]
    fn record_classification() {
        let mut record = TelemetryRecord {
            id: 1,
            service_name: "shop".to_string(),
            endpoint: "/payment".to_string(),
            method: "POST".to_string(),
            status_code: 200,
            latency_ms: 12.5,
            error_message: None,
            trace_id: "abc".to_string(),
            timestamp: Utc::now(),
        };
        assert!(record.is_success());
        assert!(!record.is_server_error());

        record.status_code = 500;
        assert!(!record.is_success());
        assert!(record.is_server_error());

        record.status_code = 404;
        assert!(!record.is_success());
        assert!(!record.is_server_error());
    }

    #[test]
    fn endpoint_health_from_score() {
        assert_eq!(EndpointHealth::from_score(100.0), EndpointHealth::Healthy);
        assert_eq!(EndpointHealth::from_score(90.0), EndpointHealth::Healthy);
        assert_eq!(EndpointHealth::from_score(89.9), EndpointHealth::Degraded);
        assert_eq!(EndpointHealth::from_score(60.0), EndpointHealth::Degraded);
        assert_eq!(EndpointHealth::from_score(59.9), EndpointHealth::Unhealthy);
    }

    #[test]
    fn incident_filter_matches_endpoint_in_affected_set() {
        let incident = Incident {
            id: "INC-1700000000-1".to_string(),
            title: "Error spike on /payment".to_string(),
            severity: Severity::High,
            status: IncidentStatus::Active,
            root_cause: RootCause {
                endpoint: "/payment".to_string(),
                description: "Error spike".to_string(),
                confidence: 1.0,
            },
            affected_endpoints: vec!["/payment".to_string(), "/checkout".to_string()],
            anomalies: Vec::new(),
            trace_correlation: TraceCorrelation::default(),
            first_detected: Utc::now(),
            last_updated: Utc::now(),
            resolution_note: None,
        };

        let by_affected = IncidentFilter {
            endpoint: Some("/checkout".to_string()),
            ..Default::default()
        };
        assert!(by_affected.matches(&incident));

        let by_status = IncidentFilter {
            status: Some(IncidentStatus::Resolved),
            ..Default::default()
        };
        assert!(!by_status.matches(&incident));
    }
}
