//! StateStore: redb-backed record persistence for Berth.
//!
//! Provides typed CRUD operations over organizations, users, clusters, and
//! deployment requests. All values are JSON-serialized into redb's `&[u8]`
//! value columns. The store supports both on-disk and in-memory backends
//! (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use berth_core::epoch_millis;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe record store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(ORGANIZATIONS).map_err(map_err!(Table))?;
        txn.open_table(USERS).map_err(map_err!(Table))?;
        txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
        txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Generic record helpers ─────────────────────────────────────

    fn put_record<T: Serialize>(&self, def: RecordTable, id: u64, record: &T) -> StateResult<()> {
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            table
                .insert(id, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get_record<T: DeserializeOwned>(&self, def: RecordTable, id: u64) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        match table.get(id).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: T =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    fn list_records<T: DeserializeOwned>(&self, def: RecordTable) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record: T =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(record);
        }
        Ok(results)
    }

    // ── Organizations ──────────────────────────────────────────────

    /// Insert or update an organization.
    pub fn put_organization(&self, org: &OrganizationRecord) -> StateResult<()> {
        self.put_record(ORGANIZATIONS, org.id, org)?;
        debug!(organization_id = org.id, name = %org.name, "organization stored");
        Ok(())
    }

    pub fn get_organization(&self, id: OrganizationId) -> StateResult<Option<OrganizationRecord>> {
        self.get_record(ORGANIZATIONS, id)
    }

    // ── Users ──────────────────────────────────────────────────────

    /// Insert or update a user.
    pub fn put_user(&self, user: &UserRecord) -> StateResult<()> {
        self.put_record(USERS, user.id, user)?;
        debug!(user_id = user.id, username = %user.username, "user stored");
        Ok(())
    }

    pub fn get_user(&self, id: UserId) -> StateResult<Option<UserRecord>> {
        self.get_record(USERS, id)
    }

    // ── Clusters ───────────────────────────────────────────────────

    /// Create a cluster with a fresh id and zero allocation.
    ///
    /// Fails with [`StateError::Conflict`] if the name is already taken.
    pub fn create_cluster(&self, new: &NewCluster) -> StateResult<ClusterRecord> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let record;
        {
            let mut table = txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
            for entry in table.iter().map_err(map_err!(Read))? {
                let (_, value) = entry.map_err(map_err!(Read))?;
                let existing: ClusterRecord =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                if existing.name == new.name {
                    return Err(StateError::Conflict(format!(
                        "cluster name already exists: {}",
                        new.name
                    )));
                }
            }
            let id = next_id(&table)?;
            let now = epoch_millis();
            record = ClusterRecord {
                id,
                name: new.name.clone(),
                organization_id: new.organization_id,
                created_by: new.created_by,
                total: new.total,
                allocated: ResourceVector::ZERO,
                created_at: now,
                updated_at: now,
            };
            let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
            table
                .insert(id, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(cluster_id = record.id, name = %record.name, total = %record.total, "cluster created");
        Ok(record)
    }

    /// Overwrite a cluster record (capacity ledger updates).
    pub fn put_cluster(&self, cluster: &ClusterRecord) -> StateResult<()> {
        self.put_record(CLUSTERS, cluster.id, cluster)
    }

    pub fn get_cluster(&self, id: ClusterId) -> StateResult<Option<ClusterRecord>> {
        self.get_record(CLUSTERS, id)
    }

    pub fn list_clusters(&self) -> StateResult<Vec<ClusterRecord>> {
        self.list_records(CLUSTERS)
    }

    // ── Deployments ────────────────────────────────────────────────

    /// Create a deployment record with a fresh id.
    pub fn create_deployment(&self, new: &NewDeployment) -> StateResult<DeploymentRecord> {
        self.insert_deployment(new, None)
    }

    /// Create a deployment and overwrite its cluster in one transaction.
    ///
    /// Used when a deployment is admitted straight to `Running` and the
    /// cluster's allocation grows with it.
    pub fn create_deployment_with_cluster(
        &self,
        new: &NewDeployment,
        cluster: &ClusterRecord,
    ) -> StateResult<DeploymentRecord> {
        self.insert_deployment(new, Some(cluster))
    }

    fn insert_deployment(
        &self,
        new: &NewDeployment,
        cluster: Option<&ClusterRecord>,
    ) -> StateResult<DeploymentRecord> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let record;
        {
            let mut table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
            let id = next_id(&table)?;
            let now = epoch_millis();
            record = DeploymentRecord {
                id,
                name: new.name.clone(),
                image: new.image.clone(),
                cluster_id: new.cluster_id,
                demand: new.demand,
                priority: new.priority,
                status: new.status,
                created_by: new.created_by,
                created_at: now,
                started_at: new.started_at,
                expires_at: new.expires_at,
                updated_at: now,
            };
            let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
            table
                .insert(id, value.as_slice())
                .map_err(map_err!(Write))?;

            if let Some(cluster) = cluster {
                let cluster_value = serde_json::to_vec(cluster).map_err(map_err!(Serialize))?;
                let mut clusters = txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
                clusters
                    .insert(cluster.id, cluster_value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(deployment_id = record.id, status = %record.status, "deployment created");
        Ok(record)
    }

    /// Overwrite a deployment record.
    pub fn put_deployment(&self, deployment: &DeploymentRecord) -> StateResult<()> {
        self.put_record(DEPLOYMENTS, deployment.id, deployment)
    }

    pub fn get_deployment(&self, id: DeploymentId) -> StateResult<Option<DeploymentRecord>> {
        self.get_record(DEPLOYMENTS, id)
    }

    pub fn list_deployments(&self) -> StateResult<Vec<DeploymentRecord>> {
        self.list_records(DEPLOYMENTS)
    }

    /// List all deployments targeting a cluster, in id order.
    pub fn list_deployments_for_cluster(
        &self,
        cluster_id: ClusterId,
    ) -> StateResult<Vec<DeploymentRecord>> {
        Ok(self
            .list_deployments()?
            .into_iter()
            .filter(|d| d.cluster_id == cluster_id)
            .collect())
    }

    /// Write a cluster and one of its deployments in a single transaction.
    ///
    /// Used for every capacity change that accompanies a status change, so
    /// the ledger and the deployment never disagree on disk.
    pub fn put_cluster_and_deployment(
        &self,
        cluster: &ClusterRecord,
        deployment: &DeploymentRecord,
    ) -> StateResult<()> {
        let cluster_value = serde_json::to_vec(cluster).map_err(map_err!(Serialize))?;
        let deployment_value = serde_json::to_vec(deployment).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut clusters = txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
            clusters
                .insert(cluster.id, cluster_value.as_slice())
                .map_err(map_err!(Write))?;
            let mut deployments = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
            deployments
                .insert(deployment.id, deployment_value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }
}

/// One past the highest id currently in `table` (ids start at 1).
fn next_id(table: &redb::Table<'_, u64, &'static [u8]>) -> StateResult<u64> {
    let last = table.last().map_err(map_err!(Read))?;
    Ok(last.map(|(key, _)| key.value() + 1).unwrap_or(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> StateStore {
        StateStore::open_in_memory().unwrap()
    }

    fn new_cluster(name: &str) -> NewCluster {
        NewCluster {
            name: name.to_string(),
            organization_id: 1,
            created_by: 1,
            total: ResourceVector::new(10, 20, 5),
        }
    }

    fn new_deployment(cluster_id: ClusterId, status: DeploymentStatus) -> NewDeployment {
        NewDeployment {
            name: "train".to_string(),
            image: "registry.local/train:1".to_string(),
            cluster_id,
            demand: ResourceVector::new(3, 5, 1),
            priority: PriorityTier::Low,
            status,
            created_by: 1,
            started_at: None,
            expires_at: None,
        }
    }

    // ── Tenancy ────────────────────────────────────────────────────

    #[test]
    fn organization_and_user_put_and_get() {
        let store = test_store();
        let org = OrganizationRecord {
            id: 1,
            name: "acme".to_string(),
            invite_code: Some("ABC123".to_string()),
        };
        let user = UserRecord {
            id: 7,
            username: "ada".to_string(),
            organization_id: Some(1),
            role: Role::Developer,
        };
        store.put_organization(&org).unwrap();
        store.put_user(&user).unwrap();

        assert_eq!(store.get_organization(1).unwrap(), Some(org));
        assert_eq!(store.get_user(7).unwrap(), Some(user));
        assert_eq!(store.get_user(8).unwrap(), None);
    }

    // ── Clusters ───────────────────────────────────────────────────

    #[test]
    fn cluster_create_assigns_sequential_ids() {
        let store = test_store();
        let a = store.create_cluster(&new_cluster("a")).unwrap();
        let b = store.create_cluster(&new_cluster("b")).unwrap();

        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
        assert_eq!(a.allocated, ResourceVector::ZERO);
        assert_eq!(a.available(), ResourceVector::new(10, 20, 5));
    }

    #[test]
    fn cluster_duplicate_name_conflicts() {
        let store = test_store();
        store.create_cluster(&new_cluster("gpu-pool")).unwrap();
        let err = store.create_cluster(&new_cluster("gpu-pool")).unwrap_err();
        assert!(matches!(err, StateError::Conflict(_)));
        assert_eq!(store.list_clusters().unwrap().len(), 1);
    }

    #[test]
    fn cluster_update_persists_allocation() {
        let store = test_store();
        let mut cluster = store.create_cluster(&new_cluster("a")).unwrap();
        cluster.allocated = ResourceVector::new(4, 8, 2);
        store.put_cluster(&cluster).unwrap();

        let loaded = store.get_cluster(cluster.id).unwrap().unwrap();
        assert_eq!(loaded.allocated, ResourceVector::new(4, 8, 2));
        assert!(loaded.can_fit(&ResourceVector::new(6, 12, 3)));
        assert!(!loaded.can_fit(&ResourceVector::new(7, 12, 3)));
    }

    // ── Deployments ────────────────────────────────────────────────

    #[test]
    fn deployment_create_and_get() {
        let store = test_store();
        let created = store
            .create_deployment(&new_deployment(1, DeploymentStatus::Queued))
            .unwrap();

        assert_eq!(created.id, 1);
        let loaded = store.get_deployment(created.id).unwrap();
        assert_eq!(loaded, Some(created));
    }

    #[test]
    fn deployment_get_nonexistent_returns_none() {
        let store = test_store();
        assert_eq!(store.get_deployment(42).unwrap(), None);
    }

    #[test]
    fn deployments_filtered_by_cluster() {
        let store = test_store();
        store.create_deployment(&new_deployment(1, DeploymentStatus::Queued)).unwrap();
        store.create_deployment(&new_deployment(2, DeploymentStatus::Running)).unwrap();
        store.create_deployment(&new_deployment(1, DeploymentStatus::Done)).unwrap();

        let on_one = store.list_deployments_for_cluster(1).unwrap();
        assert_eq!(on_one.len(), 2);
        assert!(on_one.iter().all(|d| d.cluster_id == 1));
        assert_eq!(store.list_deployments().unwrap().len(), 3);
    }

    #[test]
    fn cluster_and_deployment_written_together() {
        let store = test_store();
        let mut cluster = store.create_cluster(&new_cluster("a")).unwrap();
        let mut deployment = store
            .create_deployment(&new_deployment(cluster.id, DeploymentStatus::Queued))
            .unwrap();

        cluster.allocated = deployment.demand;
        deployment.status = DeploymentStatus::Running;
        store.put_cluster_and_deployment(&cluster, &deployment).unwrap();

        assert_eq!(
            store.get_cluster(cluster.id).unwrap().unwrap().allocated,
            deployment.demand
        );
        assert_eq!(
            store.get_deployment(deployment.id).unwrap().unwrap().status,
            DeploymentStatus::Running
        );
    }

    #[test]
    fn deployment_created_with_cluster_update() {
        let store = test_store();
        let mut cluster = store.create_cluster(&new_cluster("a")).unwrap();
        let new = new_deployment(cluster.id, DeploymentStatus::Running);
        cluster.allocated = new.demand;

        let created = store.create_deployment_with_cluster(&new, &cluster).unwrap();

        assert_eq!(created.status, DeploymentStatus::Running);
        assert_eq!(
            store.get_cluster(cluster.id).unwrap().unwrap().allocated,
            new.demand
        );
    }

    // ── Persistence ────────────────────────────────────────────────

    #[test]
    fn on_disk_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("berth.redb");
        {
            let store = StateStore::open(&path).unwrap();
            store.create_cluster(&new_cluster("durable")).unwrap();
        }
        let store = StateStore::open(&path).unwrap();
        let clusters = store.list_clusters().unwrap();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].name, "durable");
    }
}
