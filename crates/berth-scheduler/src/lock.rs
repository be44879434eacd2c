//! Per-cluster locks.
//!
//! Admission, completion handling and explicit dispatch triggers all
//! serialize on the lock of the cluster they touch. Distinct clusters never
//! contend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::trace;

use berth_core::ClusterId;

type Registry = Arc<Mutex<HashMap<ClusterId, Arc<AsyncMutex<()>>>>>;

/// Registry of one async mutex per cluster.
///
/// Entries are created on first use and dropped again once nobody holds or
/// waits for them, so unknown cluster ids do not accumulate.
#[derive(Debug, Clone, Default)]
pub struct ClusterLocks {
    locks: Registry,
}

/// Held while a cluster is locked. Dropping it releases the lock.
#[derive(Debug)]
pub struct ClusterGuard {
    cluster_id: ClusterId,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Registry,
}

impl ClusterGuard {
    pub fn cluster_id(&self) -> ClusterId {
        self.cluster_id
    }
}

impl Drop for ClusterGuard {
    fn drop(&mut self) {
        drop(self.guard.take());

        // Handles are only cloned under the registry lock, so a count of one
        // means no other task holds or waits on this mutex.
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(&self.cluster_id)
            .is_some_and(|handle| Arc::strong_count(handle) == 1)
        {
            locks.remove(&self.cluster_id);
            trace!(cluster_id = self.cluster_id, "cluster lock retired");
        }
    }
}

impl ClusterLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, cluster_id: ClusterId) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(cluster_id).or_default().clone()
    }

    /// Wait for the cluster's lock.
    pub async fn acquire(&self, cluster_id: ClusterId) -> ClusterGuard {
        let guard = self.handle(cluster_id).lock_owned().await;
        trace!(cluster_id, "cluster lock acquired");
        ClusterGuard {
            cluster_id,
            guard: Some(guard),
            locks: self.locks.clone(),
        }
    }
}
