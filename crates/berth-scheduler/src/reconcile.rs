//! Reconciliation: repair drift between the record store, the resource
//! queue and the completion timers.
//!
//! Runs at startup (timers do not survive a restart and an in-memory queue
//! starts empty) and whenever completion notifications may have been lost.
//! Per cluster, under its lock:
//!
//! - `allocated` is recomputed as the sum of running demands
//! - running deployments past `expires_at` are marked done
//! - running deployments with time left get their timer re-armed, which
//!   replaces any timer still live for them
//! - queued deployments missing from the queue are re-inserted
//!
//! and then a dispatch pass runs on the repaired state.

use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use berth_core::{ClusterId, DeploymentId, ResourceVector, epoch_millis};
use berth_state::DeploymentStatus;

use crate::dispatch::DispatchReport;
use crate::engine::Engine;
use crate::error::SchedulerResult;

/// What a reconciliation sweep changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Clusters whose stored allocation disagreed with their running set.
    pub reallocated: Vec<ClusterId>,
    pub expired: Vec<DeploymentId>,
    pub rearmed: Vec<DeploymentId>,
    pub requeued: Vec<DeploymentId>,
    pub dispatched: Vec<DispatchReport>,
}

impl Engine {
    /// Sweep every cluster. Safe to run at any time.
    pub async fn reconcile(&self) -> SchedulerResult<ReconcileReport> {
        let mut report = ReconcileReport::default();

        for cluster in self.store.list_clusters()? {
            let _guard = self.locks.acquire(cluster.id).await;
            self.reconcile_locked(cluster.id, &mut report)?;
            report.dispatched.push(self.dispatch_locked(cluster.id)?);
        }

        info!(
            reallocated = report.reallocated.len(),
            expired = report.expired.len(),
            rearmed = report.rearmed.len(),
            requeued = report.requeued.len(),
            armed_timers = self.timer.armed_count(),
            "reconciliation finished"
        );
        Ok(report)
    }

    fn reconcile_locked(
        &self,
        cluster_id: ClusterId,
        report: &mut ReconcileReport,
    ) -> SchedulerResult<()> {
        let Some(mut cluster) = self.store.get_cluster(cluster_id)? else {
            return Ok(());
        };
        let now = epoch_millis();
        let mut allocated = ResourceVector::ZERO;

        for mut deployment in self.store.list_deployments_for_cluster(cluster_id)? {
            match deployment.status {
                DeploymentStatus::Running => match deployment.expires_at {
                    Some(expires_at) if expires_at <= now => {
                        if let Err(e) = deployment.advance(DeploymentStatus::Done, now) {
                            warn!(cluster_id, deployment_id = deployment.id, error = %e, "expiry refused");
                            continue;
                        }
                        self.store.put_deployment(&deployment)?;
                        self.timer.disarm(deployment.id);
                        info!(cluster_id, deployment_id = deployment.id, "expired while unattended, marked done");
                        report.expired.push(deployment.id);
                    }
                    Some(expires_at) => {
                        allocated = allocated.saturating_add(&deployment.demand);
                        self.timer
                            .arm(deployment.id, Duration::from_millis(expires_at - now));
                        report.rearmed.push(deployment.id);
                    }
                    None => {
                        allocated = allocated.saturating_add(&deployment.demand);
                        let run_time = self.timer.random_run_time();
                        deployment.expires_at = Some(now + run_time.as_millis() as u64);
                        deployment.updated_at = now;
                        self.store.put_deployment(&deployment)?;
                        self.timer.arm(deployment.id, run_time);
                        report.rearmed.push(deployment.id);
                    }
                },
                DeploymentStatus::Queued => {
                    if self.requeue_if_missing(&deployment)? {
                        report.requeued.push(deployment.id);
                    }
                }
                DeploymentStatus::Rejected | DeploymentStatus::Done => {}
            }
        }

        if allocated != cluster.allocated {
            warn!(
                cluster_id,
                stored = %cluster.allocated,
                computed = %allocated,
                "allocation drift corrected"
            );
            cluster.allocated = allocated;
            cluster.updated_at = now;
            self.store.put_cluster(&cluster)?;
            report.reallocated.push(cluster_id);
        }
        Ok(())
    }
}
