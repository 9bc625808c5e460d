//! Background status reconciliation
//!
//! Periodically compares stored release status with the live state
//! reported by the platforms and writes back any difference.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::coordinator::DeploymentCoordinator;
use crate::deployer::UnitState;
use crate::error::Result;
use crate::locks::ReleaseLocks;
use crate::release::StatusCode;

/// Status a release should have given the live state of its units
///
/// Any failed, errored or vanished unit fails the release; any unit still
/// converging keeps the current status; otherwise the release is deployed.
pub fn aggregate_status(
    current: StatusCode,
    states: impl IntoIterator<Item = UnitState>,
) -> StatusCode {
    let mut converging = false;
    for state in states {
        match state {
            UnitState::Failed | UnitState::Error | UnitState::Undeployed => {
                return StatusCode::Failed;
            }
            UnitState::Deploying | UnitState::Partial | UnitState::Unknown => converging = true,
            UnitState::Deployed => {}
        }
    }
    if converging {
        current
    } else {
        StatusCode::Deployed
    }
}

/// A status written back by a reconciliation pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChange {
    pub name: String,
    pub version: u32,
    pub from: StatusCode,
    pub to: StatusCode,
}

/// Outcome of one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    /// Releases whose live state was queried
    pub checked: usize,

    pub changes: Vec<StatusChange>,

    /// Names held by an in-flight transition
    pub skipped: Vec<String>,
}

/// Polls platforms and keeps stored release status in line
#[derive(Clone)]
pub struct StatusReconciler {
    coordinator: Arc<DeploymentCoordinator>,
    locks: Arc<ReleaseLocks>,
}

/// Handle on a spawned reconciliation loop
pub struct ReconcilerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ReconcilerHandle {
    /// Stop the loop and wait for the current pass to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Status reconciler task ended abnormally");
        }
    }
}

impl StatusReconciler {
    pub fn new(coordinator: Arc<DeploymentCoordinator>, locks: Arc<ReleaseLocks>) -> Self {
        Self { coordinator, locks }
    }

    /// Run a single pass over the latest version of every release
    pub async fn reconcile_once(&self) -> Result<ReconcileReport> {
        let store = self.coordinator.store();
        let mut report = ReconcileReport::default();

        for name in store.names().await? {
            let guard = match self.locks.try_acquire(&name) {
                Ok(guard) => guard,
                Err(_) => {
                    debug!(release = %name, "Transition in flight, skipping");
                    report.skipped.push(name);
                    continue;
                }
            };

            let mut release = store.latest(&name).await?;
            if !release.status().is_reconcilable() {
                continue;
            }

            let units = match self.coordinator.unit_health(&release).await {
                Ok(Some(units)) => units,
                Ok(None) => continue,
                Err(e) => {
                    warn!(release = %name, error = %e, "Could not query unit health");
                    continue;
                }
            };
            report.checked += 1;

            let current = release.status();
            let computed = aggregate_status(current, units.iter().map(|u| u.state));
            if computed == current {
                continue;
            }

            let description = match computed {
                StatusCode::Failed => {
                    let unhealthy: Vec<String> = units
                        .iter()
                        .filter(|u| aggregate_status(current, [u.state]) == StatusCode::Failed)
                        .map(|u| format!("{} is {}", u.name, u.state))
                        .collect();
                    format!("Unhealthy units: {}", unhealthy.join(", "))
                }
                _ => "Release deployed".to_string(),
            };
            release.set_status(computed, description);
            release.info.units = units;
            store.update(&release).await?;
            drop(guard);

            info!(
                release = %name,
                version = release.version,
                from = %current,
                to = %computed,
                "Reconciled release status"
            );
            report.changes.push(StatusChange {
                name,
                version: release.version,
                from: current,
                to: computed,
            });
        }

        Ok(report)
    }

    /// Run passes every `interval` until the handle is shut down
    pub fn spawn(self, interval: Duration) -> ReconcilerHandle {
        let (shutdown, mut signal) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match self.reconcile_once().await {
                            Ok(report) if !report.changes.is_empty() => {
                                debug!(changes = report.changes.len(), "Reconciliation pass complete");
                            }
                            Ok(_) => {}
                            Err(e) => warn!(error = %e, "Reconciliation pass failed"),
                        }
                    }
                    changed = signal.changed() => {
                        if changed.is_err() || *signal.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Status reconciler stopped");
        });

        ReconcilerHandle { shutdown, task }
    }
}
