//! Admission: decide at submission time whether a deployment runs now,
//! waits in the queue, or can never run on its cluster.

use serde::{Deserialize, Serialize};
use tracing::info;

use berth_core::{ClusterId, DeploymentId, PriorityTier, ResourceVector, UserId, epoch_millis};
use berth_state::{DeploymentStatus, NewDeployment};

use crate::engine::Engine;
use crate::error::{SchedulerError, SchedulerResult};

/// A deployment submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmitRequest {
    pub name: String,
    pub image: String,
    pub demand: ResourceVector,
    /// Raw tier code; validated against the known tiers.
    pub priority: i64,
    pub cluster_id: ClusterId,
    pub requester_id: UserId,
}

/// Outcome of an admission: the new record's id and its initial status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Admission {
    pub id: DeploymentId,
    pub status: DeploymentStatus,
}

impl Engine {
    /// Admit a deployment request.
    ///
    /// Every validation failure returns before anything is written. An
    /// accepted request always produces exactly one deployment record,
    /// whose status is `Running`, `Queued` or `Rejected`.
    pub async fn admit(&self, req: AdmitRequest) -> SchedulerResult<Admission> {
        let tier = PriorityTier::try_from(req.priority)
            .map_err(|e| SchedulerError::InvalidRequest(e.to_string()))?;
        if req.name.trim().is_empty() {
            return Err(SchedulerError::InvalidRequest("name is required".into()));
        }
        if req.image.trim().is_empty() {
            return Err(SchedulerError::InvalidRequest("image is required".into()));
        }

        let cluster = self.load_cluster(req.cluster_id)?;
        let user = self
            .store
            .get_user(req.requester_id)?
            .ok_or_else(|| SchedulerError::NotFound(format!("user {}", req.requester_id)))?;
        if user.organization_id != Some(cluster.organization_id) {
            return Err(SchedulerError::Forbidden(format!(
                "user {} is not a member of the organization owning cluster {}",
                user.id, cluster.id
            )));
        }

        let _guard = self.locks.acquire(cluster.id).await;
        // Allocation may have moved while we waited for the lock.
        let mut cluster = self.load_cluster(cluster.id)?;

        let mut new = NewDeployment {
            name: req.name,
            image: req.image,
            cluster_id: cluster.id,
            demand: req.demand,
            priority: tier,
            status: DeploymentStatus::Rejected,
            created_by: user.id,
            started_at: None,
            expires_at: None,
        };

        if !req.demand.fits_within(&cluster.total) {
            let record = self.store.create_deployment(&new)?;
            info!(
                cluster_id = cluster.id,
                deployment_id = record.id,
                demand = %req.demand,
                total = %cluster.total,
                "deployment rejected, demand exceeds cluster total"
            );
            return Ok(Admission {
                id: record.id,
                status: record.status,
            });
        }

        if cluster.can_fit(&req.demand) {
            let now = epoch_millis();
            let run_time = self.timer.random_run_time();
            new.status = DeploymentStatus::Running;
            new.started_at = Some(now);
            new.expires_at = Some(now + run_time.as_millis() as u64);

            cluster.allocated = cluster.allocated.saturating_add(&req.demand);
            cluster.updated_at = now;
            let record = self.store.create_deployment_with_cluster(&new, &cluster)?;
            self.timer.arm(record.id, run_time);

            info!(
                cluster_id = cluster.id,
                deployment_id = record.id,
                %tier,
                demand = %req.demand,
                allocated = %cluster.allocated,
                "deployment admitted, running"
            );
            return Ok(Admission {
                id: record.id,
                status: record.status,
            });
        }

        new.status = DeploymentStatus::Queued;
        let record = self.store.create_deployment(&new)?;
        // If every attempt fails the record stays Queued and the next
        // dispatch pass on this cluster re-inserts it.
        self.enqueue_with_retry(&record).await?;
        info!(
            cluster_id = cluster.id,
            deployment_id = record.id,
            %tier,
            demand = %req.demand,
            available = %cluster.available(),
            "deployment queued"
        );
        Ok(Admission {
            id: record.id,
            status: record.status,
        })
    }
}
