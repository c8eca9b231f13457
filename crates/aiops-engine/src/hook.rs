//! Ingress hook wiring the monitored service's instrumentation to the core

use crate::Engine;
use aiops_chaos::InjectionDecision;
use aiops_common::TelemetrySample;
use chrono::{DateTime, Utc};
use std::sync::atomic::Ordering;
use std::time::Instant;
use tracing::{trace, warn};
use uuid::Uuid;

/// Per-request context returned by [`Engine::begin`].
///
/// Carries the adopted or generated trace id and the start timestamp; the
/// monitored service propagates `trace_id` to outgoing calls via the
/// `X-Trace-Id` header.
#[derive(Debug)]
pub struct RequestContext {
    pub trace_id: String,
    pub endpoint: String,
    pub method: String,
    pub started_at: DateTime<Utc>,
    timer: Instant,
}

impl Engine {
    /// Start instrumenting one request. An incoming trace id is adopted;
    /// otherwise a fresh 128-bit random hex id is generated.
    pub fn begin(
        &self,
        endpoint: &str,
        method: &str,
        incoming_trace_id: Option<&str>,
    ) -> RequestContext {
        let trace_id = match incoming_trace_id {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => Uuid::new_v4().simple().to_string(),
        };
        trace!(endpoint, %trace_id, "request started");
        RequestContext {
            trace_id,
            endpoint: endpoint.to_string(),
            method: method.to_string(),
            started_at: Utc::now(),
            timer: Instant::now(),
        }
    }

    /// Finish instrumenting one request and record its telemetry.
    ///
    /// The record is constructed on every exit path, failures included:
    /// a failure is a data value (5xx plus `error_message`), never control
    /// flow escaping the hook. Telemetry is best-effort from the monitored
    /// service's point of view, so storage rejections are logged and
    /// counted but the request itself is unaffected.
    pub fn end(&self, ctx: RequestContext, status_code: u16, error_message: Option<String>) {
        let latency_ms = ctx.timer.elapsed().as_secs_f64() * 1000.0;
        // Stamped at completion: in a fan-out trace the deepest callee
        // finishes first, which is what root-cause ordering relies on.
        let sample = TelemetrySample {
            service_name: self.config().service_name.clone(),
            endpoint: ctx.endpoint,
            method: ctx.method,
            status_code,
            latency_ms,
            error_message,
            trace_id: ctx.trace_id,
            timestamp: Utc::now(),
        };
        if let Err(e) = self.store().insert(sample) {
            self.insert_failures.fetch_add(1, Ordering::Relaxed);
            warn!(error = %e, "telemetry record dropped");
        }
    }

    /// Consult the failure injector for this request. Called once at
    /// request start; the returned decision stays binding for the whole
    /// request even if the table changes meanwhile.
    pub fn check_injection(&self, endpoint: &str) -> InjectionDecision {
        self.injector().decide(endpoint)
    }
}
