//! Deterministic failure injection for the AIOps engine
//!
//! A process-wide fault table mapping endpoint to an artificial delay
//! and/or error rate. The instrumentation hook captures one decision per
//! request at its start; later table changes only affect subsequent
//! requests.

use aiops_common::{Error, Result};
use parking_lot::RwLock;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Canned message attached to injected failures
pub const INJECTED_ERROR_MESSAGE: &str = "injected failure";

/// Fault configuration for one endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InjectionRule {
    /// Artificial delay applied before the handler responds
    pub delay_ms: Option<u64>,
    /// Probability in (0, 1] of short-circuiting with HTTP 500
    pub error_rate: Option<f64>,
}

/// Decision captured for one request at its start
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct InjectionDecision {
    pub delay_ms: Option<u64>,
    pub force_error: bool,
}

/// Read-mostly fault table consulted on every request.
pub struct FailureInjector {
    rules: RwLock<BTreeMap<String, InjectionRule>>,
}

impl FailureInjector {
    pub fn new() -> Self {
        Self {
            rules: RwLock::new(BTreeMap::new()),
        }
    }

    /// Install or replace the rule for one endpoint, returning the updated
    /// table. An `error_rate` outside (0, 1] is rejected.
    pub fn set(&self, endpoint: &str, rule: InjectionRule) -> Result<BTreeMap<String, InjectionRule>> {
        if let Some(rate) = rule.error_rate {
            if !(rate > 0.0 && rate <= 1.0) {
                return Err(Error::InvalidRequest(format!(
                    "error_rate must be in (0, 1], got {rate}"
                )));
            }
        }
        if endpoint.is_empty() {
            return Err(Error::InvalidRequest("endpoint must not be empty".into()));
        }

        info!(
            endpoint,
            delay_ms = ?rule.delay_ms,
            error_rate = ?rule.error_rate,
            "failure injection configured"
        );
        let mut rules = self.rules.write();
        rules.insert(endpoint.to_string(), rule);
        Ok(rules.clone())
    }

    /// Empty the fault table.
    pub fn clear(&self) -> BTreeMap<String, InjectionRule> {
        let mut rules = self.rules.write();
        if !rules.is_empty() {
            info!(cleared = rules.len(), "failure injection cleared");
        }
        rules.clear();
        rules.clone()
    }

    /// Current fault table.
    pub fn snapshot(&self) -> BTreeMap<String, InjectionRule> {
        self.rules.read().clone()
    }

    /// Capture the decision for one request. The uniform error draw happens
    /// here, so the configuration observed at request start is binding for
    /// the whole request.
    pub fn decide(&self, endpoint: &str) -> InjectionDecision {
        let rules = self.rules.read();
        let Some(rule) = rules.get(endpoint) else {
            return InjectionDecision::default();
        };

        let force_error = match rule.error_rate {
            Some(rate) => rand::thread_rng().gen::<f64>() < rate,
            None => false,
        };
        if force_error {
            debug!(endpoint, "injecting failure");
        }
        InjectionDecision {
            delay_ms: rule.delay_ms,
            force_error,
        }
    }
}

impl Default for FailureInjector {
    fn default() -> Self {
        Self::new()
    }
}
