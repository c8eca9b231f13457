//! Embedded operations-intelligence engine
//!
//! Ingests per-request telemetry from a monitored service, continuously
//! learns per-endpoint latency baselines, detects anomalies (latency
//! spikes, error spikes, silence) and correlates them across distributed
//! traces into deduplicated incidents with an identified root endpoint.
//!
//! The host constructs one [`Engine`] at startup and threads it through
//! its instrumentation hook and command handlers; there is no global
//! state. A background [`AnalysisScheduler`] drives the analysis pipeline
//! at a fixed cadence, and every query/command the host exposes over HTTP
//! maps onto one `Engine` method.

pub mod engine;
pub mod hook;
pub mod query;
pub mod scheduler;

pub use engine::{AnalysisReport, Engine};
pub use hook::RequestContext;
pub use query::EngineHealth;
pub use scheduler::AnalysisScheduler;

pub use aiops_analysis::BaselineMap;
pub use aiops_chaos::{FailureInjector, InjectionDecision, InjectionRule, INJECTED_ERROR_MESSAGE};
pub use aiops_common::{
    Anomaly, AnomalyKind, Baseline, EndpointHealth, EndpointMetrics, EngineConfig, Error,
    Incident, IncidentFilter, IncidentStatus, Result, Severity, TelemetryRecord,
    TelemetrySample,
};
