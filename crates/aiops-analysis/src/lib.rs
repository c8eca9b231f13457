//! Baseline learning, anomaly detection and root-cause analysis
//!
//! The three stages of the analysis pipeline: the learner maintains
//! per-endpoint latency baselines, the detector turns recent telemetry
//! into anomalies, and the RCA engine correlates anomalies across traces
//! into deduplicated incidents.

pub mod baseline;
pub mod detector;
pub mod rca;

pub use baseline::{BaselineLearner, BaselineMap};
pub use detector::AnomalyDetector;
pub use rca::RcaEngine;
