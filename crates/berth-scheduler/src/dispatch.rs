//! Dispatch pass: move queued deployments onto freed capacity.
//!
//! Tiers are visited high to low. A lower tier is only considered once
//! every higher tier has been fully drained, so a low-priority deployment
//! never starts while a high-priority one still waits on the cluster.
//!
//! Before the tiers are visited, queued records that are missing from the
//! resource queue (an insert lost to a queue fault) are put back.

use serde::Serialize;
use tracing::{debug, info, warn};

use berth_core::{ClusterId, DeploymentId, PriorityTier};
use berth_packing::CapacitySnapshot;
use berth_state::DeploymentStatus;

use crate::engine::Engine;
use crate::error::SchedulerResult;

/// Why a dispatch pass stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PassOutcome {
    /// Every non-empty tier was drained.
    Completed,
    /// A tier had entries but none fit the available capacity.
    NoCandidates { tier: PriorityTier },
    /// A tier still had entries after scheduling; lower tiers were skipped.
    TierBlocked { tier: PriorityTier, remaining: usize },
    /// A chosen deployment no longer fit the live allocation.
    StaleCandidate { deployment_id: DeploymentId },
    ClusterMissing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub cluster_id: ClusterId,
    /// Queued deployments that were missing from the resource queue.
    pub requeued: Vec<DeploymentId>,
    /// Deployments moved to `Running`, in commit order.
    pub started: Vec<DeploymentId>,
    pub outcome: PassOutcome,
}

impl DispatchReport {
    fn new(cluster_id: ClusterId) -> Self {
        Self {
            cluster_id,
            requeued: Vec::new(),
            started: Vec::new(),
            outcome: PassOutcome::Completed,
        }
    }

    fn finish(mut self, outcome: PassOutcome) -> Self {
        self.outcome = outcome;
        self
    }
}

impl Engine {
    /// Run one dispatch pass over `cluster_id` under its lock.
    ///
    /// With empty queues this changes nothing, so extra triggers are safe.
    pub async fn trigger_dispatch(&self, cluster_id: ClusterId) -> SchedulerResult<DispatchReport> {
        let _guard = self.locks.acquire(cluster_id).await;
        self.dispatch_locked(cluster_id)
    }

    /// Dispatch pass body. Caller holds the cluster lock.
    pub(crate) fn dispatch_locked(&self, cluster_id: ClusterId) -> SchedulerResult<DispatchReport> {
        let mut report = DispatchReport::new(cluster_id);

        for deployment in self.store.list_deployments_for_cluster(cluster_id)? {
            if self.requeue_if_missing(&deployment)? {
                warn!(cluster_id, deployment_id = deployment.id, "queued deployment was missing from the queue, re-inserted");
                report.requeued.push(deployment.id);
            }
        }

        for tier in PriorityTier::DISPATCH_ORDER {
            let queued = self.queue.size(cluster_id, tier)?;
            if queued == 0 {
                debug!(cluster_id, %tier, "tier empty");
                continue;
            }

            let Some(mut cluster) = self.store.get_cluster(cluster_id)? else {
                warn!(cluster_id, "cluster vanished, nothing to dispatch");
                return Ok(report.finish(PassOutcome::ClusterMissing));
            };

            let available = cluster.available();
            let candidates = self.queue.candidates_under(cluster_id, tier, &available)?;
            if candidates.is_empty() {
                info!(cluster_id, %tier, queued, %available, "no queued deployment fits");
                return Ok(report.finish(PassOutcome::NoCandidates { tier }));
            }

            let mut snapshot = CapacitySnapshot::new(available);
            let chosen = self.scheduler.schedule_onto(&mut snapshot, &candidates);

            for candidate in chosen {
                let Some(mut deployment) = self.store.get_deployment(candidate.id)? else {
                    warn!(cluster_id, deployment_id = candidate.id, "queued deployment has no record, dropping");
                    self.queue.remove(cluster_id, tier, candidate.id)?;
                    continue;
                };
                if deployment.status != DeploymentStatus::Queued {
                    warn!(
                        cluster_id,
                        deployment_id = deployment.id,
                        status = %deployment.status,
                        "queue entry is stale, dropping"
                    );
                    self.queue.remove(cluster_id, tier, deployment.id)?;
                    continue;
                }
                if !cluster.can_fit(&deployment.demand) {
                    info!(
                        cluster_id,
                        deployment_id = deployment.id,
                        allocated = %cluster.allocated,
                        "insufficient resources for chosen deployment, aborting pass"
                    );
                    return Ok(report.finish(PassOutcome::StaleCandidate {
                        deployment_id: deployment.id,
                    }));
                }

                if !self.start_queued(&mut cluster, &mut deployment)? {
                    self.queue.remove(cluster_id, tier, deployment.id)?;
                    continue;
                }
                self.queue.remove(cluster_id, tier, deployment.id)?;
                info!(
                    cluster_id,
                    deployment_id = deployment.id,
                    %tier,
                    allocated = %cluster.allocated,
                    "queued deployment started"
                );
                report.started.push(deployment.id);
            }

            let remaining = self.queue.size(cluster_id, tier)?;
            if remaining > 0 {
                info!(cluster_id, %tier, remaining, "tier not drained, skipping lower tiers");
                return Ok(report.finish(PassOutcome::TierBlocked { tier, remaining }));
            }
        }

        Ok(report.finish(PassOutcome::Completed))
    }
}
