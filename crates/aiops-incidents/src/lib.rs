//! Incident registry and lifecycle management for the AIOps engine
//!
//! In-memory map of active incidents with TTL-based expiration and
//! acknowledge/resolve transitions. A single mutex guards the registry;
//! reads copy incidents out so callers hold no reference into it.

use aiops_common::{
    Error, Incident, IncidentFilter, IncidentId, IncidentStatus, Result,
};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// Counts produced by one registry sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Active incidents auto-closed because they idled past the TTL
    pub expired: u64,
    /// Resolved incidents removed after their grace period
    pub cleared: u64,
}

struct RegistryInner {
    incidents: HashMap<IncidentId, Incident>,
    /// Resolved incidents survive one sweep before removal
    resolved_pending: HashSet<IncidentId>,
}

/// Registry of incidents owned by the analysis pipeline.
pub struct IncidentRegistry {
    inner: Mutex<RegistryInner>,
    serial: AtomicU64,
}

impl IncidentRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                incidents: HashMap::new(),
                resolved_pending: HashSet::new(),
            }),
            serial: AtomicU64::new(0),
        }
    }

    /// Allocate a fresh incident id: `INC-<epoch>-<serial>` with the serial
    /// monotonic within the process.
    pub fn allocate_id(&self, now: DateTime<Utc>) -> IncidentId {
        let serial = self.serial.fetch_add(1, Ordering::SeqCst) + 1;
        format!("INC-{}-{}", now.timestamp(), serial)
    }

    /// Incidents matching `filter`, most recently updated first.
    pub fn list(&self, filter: &IncidentFilter) -> Vec<Incident> {
        let inner = self.inner.lock();
        let mut incidents: Vec<Incident> = inner
            .incidents
            .values()
            .filter(|incident| filter.matches(incident))
            .cloned()
            .collect();
        incidents.sort_by(|a, b| {
            b.last_updated
                .cmp(&a.last_updated)
                .then_with(|| a.id.cmp(&b.id))
        });
        incidents
    }

    pub fn get(&self, id: &str) -> Option<Incident> {
        self.inner.lock().incidents.get(id).cloned()
    }

    /// Insert or replace an incident by id.
    pub fn upsert(&self, incident: Incident) {
        debug!(id = %incident.id, severity = incident.severity.as_str(), "upserting incident");
        self.inner
            .lock()
            .incidents
            .insert(incident.id.clone(), incident);
    }

    /// The most recent non-resolved incident with the given root endpoint
    /// whose `last_updated` falls within the correlation window.
    pub fn find_mergeable(
        &self,
        root_endpoint: &str,
        now: DateTime<Utc>,
        correlation_window: Duration,
    ) -> Option<Incident> {
        let inner = self.inner.lock();
        inner
            .incidents
            .values()
            .filter(|incident| {
                incident.status != IncidentStatus::Resolved
                    && incident.root_cause.endpoint == root_endpoint
                    && now.signed_duration_since(incident.last_updated) <= correlation_window
            })
            .max_by_key(|incident| incident.last_updated)
            .cloned()
    }

    /// Transition an active incident to acknowledged. Acknowledged
    /// incidents never auto-close.
    pub fn acknowledge(&self, id: &str) -> Result<Incident> {
        let mut inner = self.inner.lock();
        let incident = inner
            .incidents
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("incident {id}")))?;
        if incident.status != IncidentStatus::Active {
            return Err(Error::InvalidRequest(format!(
                "incident {id} is {}, only active incidents can be acknowledged",
                incident.status.as_str()
            )));
        }
        incident.status = IncidentStatus::Acknowledged;
        incident.last_updated = Utc::now();
        info!(id, "incident acknowledged");
        Ok(incident.clone())
    }

    /// Resolve an incident. It stays retrievable for one sweep, then the
    /// next sweep removes it from the registry.
    pub fn resolve(&self, id: &str, note: &str) -> Result<Incident> {
        let mut inner = self.inner.lock();
        let incident = inner
            .incidents
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("incident {id}")))?;
        if incident.status == IncidentStatus::Resolved {
            return Err(Error::InvalidRequest(format!("incident {id} is already resolved")));
        }
        incident.status = IncidentStatus::Resolved;
        incident.resolution_note = Some(note.to_string());
        incident.last_updated = Utc::now();
        info!(id, "incident resolved");
        Ok(incident.clone())
    }

    /// Apply TTL expiration and the post-resolve grace period. Called once
    /// per analysis pass.
    pub fn sweep(&self, now: DateTime<Utc>, ttl: Duration) -> SweepStats {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let mut stats = SweepStats::default();

        // Resolved incidents flagged on a previous sweep are removed now.
        let pending: Vec<IncidentId> = inner.resolved_pending.drain().collect();
        for id in pending {
            if inner.incidents.remove(&id).is_some() {
                stats.cleared += 1;
                debug!(id = %id, "resolved incident removed after grace period");
            }
        }

        let mut expired: Vec<IncidentId> = Vec::new();
        for (id, incident) in inner.incidents.iter() {
            match incident.status {
                IncidentStatus::Active
                    if now.signed_duration_since(incident.last_updated) > ttl =>
                {
                    expired.push(id.clone());
                }
                IncidentStatus::Resolved => {
                    inner.resolved_pending.insert(id.clone());
                }
                _ => {}
            }
        }
        for id in expired {
            inner.incidents.remove(&id);
            stats.expired += 1;
            warn!(id = %id, "active incident auto-closed after TTL");
        }
        stats
    }

    /// Number of incidents currently in the registry.
    pub fn len(&self) -> usize {
        self.inner.lock().incidents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().incidents.is_empty()
    }
}

impl Default for IncidentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aiops_common::{RootCause, Severity, TraceCorrelation};

    fn incident(registry: &IncidentRegistry, endpoint: &str, now: DateTime<Utc>) -> Incident {
        Incident {
            id: registry.allocate_id(now),
            title: format!("Error spike on {endpoint}"),
            severity: Severity::High,
            status: IncidentStatus::Active,
            root_cause: RootCause {
                endpoint: endpoint.to_string(),
                description: "Error spike".to_string(),
                confidence: 1.0,
            },
            affected_endpoints: vec![endpoint.to_string()],
            anomalies: Vec::new(),
            trace_correlation: TraceCorrelation::default(),
            first_detected: now,
            last_updated: now,
            resolution_note: None,
        }
    }

    #[test]
    fn allocated_ids_are_monotonic() {
        let registry = IncidentRegistry::new();
        let now = Utc::now();
        let a = registry.allocate_id(now);
        let b = registry.allocate_id(now);
        assert!(a.starts_with("INC-"));
        assert_ne!(a, b);
    }

    #[test]
    fn acknowledge_and_resolve_transitions() {
        let registry = IncidentRegistry::new();
        let now = Utc::now();
        let incident = incident(&registry, "/payment", now);
        let id = incident.id.clone();
        registry.upsert(incident);

        let acked = registry.acknowledge(&id).unwrap();
        assert_eq!(acked.status, IncidentStatus::Acknowledged);
        // double-acknowledge is an input error
        assert!(registry.acknowledge(&id).is_err());

        let resolved = registry.resolve(&id, "fixed upstream").unwrap();
        assert_eq!(resolved.status, IncidentStatus::Resolved);
        assert_eq!(resolved.resolution_note.as_deref(), Some("fixed upstream"));
        assert!(registry.resolve(&id, "again").is_err());

        assert!(registry.acknowledge("INC-0-999").is_err());
    }

    #[test]
    fn ttl_sweep_skips_acknowledged() {
        let registry = IncidentRegistry::new();
        let now = Utc::now();
        let stale = now - Duration::minutes(45);

        let expired = incident(&registry, "/payment", stale);
        let expired_id = expired.id.clone();
        registry.upsert(expired);

        let acked = incident(&registry, "/inventory", stale);
        let acked_id = acked.id.clone();
        registry.upsert(acked);
        registry.acknowledge(&acked_id).unwrap();
        // push last_updated back so only the status shields it
        let mut held = registry.get(&acked_id).unwrap();
        held.last_updated = stale;
        registry.upsert(held);

        let stats = registry.sweep(now, Duration::minutes(30));
        assert_eq!(stats.expired, 1);
        assert!(registry.get(&expired_id).is_none());
        assert_eq!(
            registry.get(&acked_id).unwrap().status,
            IncidentStatus::Acknowledged
        );
    }

    #[test]
    fn resolved_incident_removed_one_sweep_later() {
        let registry = IncidentRegistry::new();
        let now = Utc::now();
        let incident = incident(&registry, "/payment", now);
        let id = incident.id.clone();
        registry.upsert(incident);
        registry.resolve(&id, "done").unwrap();

        // grace period: still retrievable after the first sweep
        let first = registry.sweep(now, Duration::minutes(30));
        assert_eq!(first.cleared, 0);
        assert!(registry.get(&id).is_some());

        let second = registry.sweep(now, Duration::minutes(30));
        assert_eq!(second.cleared, 1);
        assert!(registry.get(&id).is_none());
    }

    #[test]
    fn find_mergeable_honors_window_and_status() {
        let registry = IncidentRegistry::new();
        let now = Utc::now();
        let mut recent = incident(&registry, "/payment", now - Duration::minutes(2));
        recent.last_updated = now - Duration::minutes(2);
        let recent_id = recent.id.clone();
        registry.upsert(recent);

        let found = registry
            .find_mergeable("/payment", now, Duration::minutes(5))
            .unwrap();
        assert_eq!(found.id, recent_id);

        assert!(registry
            .find_mergeable("/payment", now + Duration::minutes(10), Duration::minutes(5))
            .is_none());
        assert!(registry
            .find_mergeable("/inventory", now, Duration::minutes(5))
            .is_none());

        registry.resolve(&recent_id, "over").unwrap();
        assert!(registry
            .find_mergeable("/payment", now, Duration::minutes(5))
            .is_none());
    }

    #[test]
    fn list_filters_and_orders() {
        let registry = IncidentRegistry::new();
        let now = Utc::now();
        let mut older = incident(&registry, "/payment", now - Duration::minutes(10));
        older.last_updated = now - Duration::minutes(10);
        older.severity = Severity::Critical;
        let newer = incident(&registry, "/inventory", now);
        registry.upsert(older);
        registry.upsert(newer);

        let all = registry.list(&IncidentFilter::default());
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].root_cause.endpoint, "/inventory");

        let critical = registry.list(&IncidentFilter {
            severity: Some(Severity::Critical),
            ..Default::default()
        });
        assert_eq!(critical.len(), 1);
        assert_eq!(critical[0].root_cause.endpoint, "/payment");
    }
}
