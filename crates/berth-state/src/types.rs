//! Record types for the Berth state store.
//!
//! These types represent the persisted state of tenants, clusters, and
//! deployment requests. All types are serializable to/from JSON for storage
//! in redb tables.

use serde::{Deserialize, Serialize};

pub use berth_core::{
    ClusterId, DeploymentId, DeploymentStatus, OrganizationId, PriorityTier, ResourceVector,
    Role, TypeError, UserId,
};

// ── Tenancy ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrganizationRecord {
    pub id: OrganizationId,
    pub name: String,
    pub invite_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserRecord {
    pub id: UserId,
    pub username: String,
    pub organization_id: Option<OrganizationId>,
    pub role: Role,
}

// ── Cluster ───────────────────────────────────────────────────────

/// A named pool of fixed capacity owned by one organization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterRecord {
    pub id: ClusterId,
    /// Globally unique name.
    pub name: String,
    pub organization_id: OrganizationId,
    pub created_by: UserId,
    /// Fixed capacity.
    pub total: ResourceVector,
    /// Sum of the demands of all Running deployments. Always `≤ total`.
    pub allocated: ResourceVector,
    /// Unix timestamp (milliseconds) of creation.
    pub created_at: u64,
    /// Unix timestamp (milliseconds) of the last capacity change.
    pub updated_at: u64,
}

impl ClusterRecord {
    /// `total - allocated`.
    pub fn available(&self) -> ResourceVector {
        self.total.saturating_sub(&self.allocated)
    }

    /// Whether `demand` can be added to the current allocation.
    pub fn can_fit(&self, demand: &ResourceVector) -> bool {
        self.allocated.can_absorb(demand, &self.total)
    }
}

/// Fields supplied when creating a cluster. The store assigns the id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewCluster {
    pub name: String,
    pub organization_id: OrganizationId,
    pub created_by: UserId,
    pub total: ResourceVector,
}

// ── Deployment ────────────────────────────────────────────────────

/// A resource-bounded unit of work requested against a cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeploymentRecord {
    pub id: DeploymentId,
    pub name: String,
    /// Container image reference the work runs from.
    pub image: String,
    pub cluster_id: ClusterId,
    pub demand: ResourceVector,
    pub priority: PriorityTier,
    pub status: DeploymentStatus,
    pub created_by: UserId,
    /// Unix timestamp (milliseconds) of creation.
    pub created_at: u64,
    /// When the deployment started running.
    pub started_at: Option<u64>,
    /// When the deployment's completion timer fires.
    pub expires_at: Option<u64>,
    /// Unix timestamp (milliseconds) of the last status change.
    pub updated_at: u64,
}

impl DeploymentRecord {
    /// Move to `next`, stamping `updated_at`. Illegal lifecycle steps leave
    /// the record untouched.
    pub fn advance(&mut self, next: DeploymentStatus, now: u64) -> Result<(), TypeError> {
        self.status = self.status.transition_to(next)?;
        self.updated_at = now;
        Ok(())
    }
}

/// Fields supplied when creating a deployment. The store assigns the id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewDeployment {
    pub name: String,
    pub image: String,
    pub cluster_id: ClusterId,
    pub demand: ResourceVector,
    pub priority: PriorityTier,
    pub status: DeploymentStatus,
    pub created_by: UserId,
    pub started_at: Option<u64>,
    pub expires_at: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(status: DeploymentStatus) -> DeploymentRecord {
        DeploymentRecord {
            id: 1,
            name: "job".to_string(),
            image: "registry.local/job:1".to_string(),
            cluster_id: 1,
            demand: ResourceVector::new(1, 1, 0),
            priority: PriorityTier::Low,
            status,
            created_by: 1,
            created_at: 10,
            started_at: None,
            expires_at: None,
            updated_at: 10,
        }
    }

    #[test]
    fn advance_follows_lifecycle() {
        let mut deployment = record(DeploymentStatus::Queued);
        deployment.advance(DeploymentStatus::Running, 20).unwrap();
        deployment.advance(DeploymentStatus::Done, 30).unwrap();
        assert_eq!(deployment.status, DeploymentStatus::Done);
        assert_eq!(deployment.updated_at, 30);
    }

    #[test]
    fn illegal_advance_is_refused() {
        for (from, to) in [
            (DeploymentStatus::Done, DeploymentStatus::Running),
            (DeploymentStatus::Rejected, DeploymentStatus::Running),
            (DeploymentStatus::Queued, DeploymentStatus::Done),
            (DeploymentStatus::Running, DeploymentStatus::Queued),
        ] {
            let mut deployment = record(from);
            let err = deployment.advance(to, 99).unwrap_err();
            assert!(matches!(err, TypeError::IllegalTransition { .. }));
            assert_eq!(deployment.status, from);
            assert_eq!(deployment.updated_at, 10);
        }
    }
}
