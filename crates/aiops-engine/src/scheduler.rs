//! Background analysis scheduler

use crate::Engine;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

/// Drives the analysis pipeline at a fixed cadence on a background task.
///
/// Pass errors are logged and never terminate the loop. Shutdown is
/// cooperative: the in-flight pass runs to completion before the task
/// exits, and no pass is cancelled midway.
pub struct AnalysisScheduler {
    shutdown: watch::Sender<bool>,
    handle: tokio::task::JoinHandle<()>,
}

impl AnalysisScheduler {
    /// Spawn the scheduler task.
    pub fn spawn(engine: Arc<Engine>) -> Self {
        let (shutdown, mut stop) = watch::channel(false);
        let cadence = Duration::from_secs(engine.config().scheduler.interval_secs);
        info!(interval_secs = cadence.as_secs(), "starting analysis scheduler");

        let handle = tokio::spawn(async move {
            let mut ticker = interval(cadence);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match engine.run_pass() {
                            Ok(report) => debug!(
                                anomalies = report.anomalies.len(),
                                incidents = report.incidents.len(),
                                "scheduled analysis pass finished"
                            ),
                            Err(e) => error!(
                                error = %e,
                                category = e.category(),
                                "scheduled analysis pass failed"
                            ),
                        }
                    }
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("analysis scheduler stopped");
        });

        Self { shutdown, handle }
    }

    /// Signal shutdown and wait for the task to exit. A pass already in
    /// flight completes first.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}
