//! The engine: shared handles for admission, dispatch and completion.
//!
//! ```text
//! Engine
//!   ├── StateStore      (clusters, deployments, users)
//!   ├── ResourceQueue   (pending deployments per cluster and tier)
//!   ├── ClusterLocks    (one critical section per cluster)
//!   ├── Scheduler       (strategy selection and packing)
//!   └── CompletionTimer (run-time expiry notifications)
//! ```
//!
//! `Engine` is cheap to clone; every clone shares the same handles.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use berth_core::config::{BerthConfig, CompletionConfig};
use berth_core::{ClusterId, epoch_millis};
use berth_state::{ClusterRecord, DeploymentRecord, DeploymentStatus, StateStore};

use crate::error::{SchedulerError, SchedulerResult};
use crate::lock::ClusterLocks;
use crate::queue::ResourceQueue;
use crate::scheduler::Scheduler;
use crate::timer::CompletionTimer;

/// Exponential backoff for dispatch retries after a completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &CompletionConfig) -> Self {
        Self {
            attempts: config.retry_attempts.max(1),
            base_delay: Duration::from_millis(config.retry_backoff_ms),
        }
    }

    /// Delay before retry number `attempt` (0-based): `base * 2^attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(1u32 << attempt.min(16))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&CompletionConfig::default())
    }
}

#[derive(Clone)]
pub struct Engine {
    pub(crate) store: StateStore,
    pub(crate) queue: ResourceQueue,
    pub(crate) locks: ClusterLocks,
    pub(crate) scheduler: Arc<Scheduler>,
    pub(crate) timer: CompletionTimer,
    pub(crate) retry: RetryPolicy,
}

impl Engine {
    pub fn new(
        store: StateStore,
        queue: ResourceQueue,
        scheduler: Scheduler,
        timer: CompletionTimer,
    ) -> Self {
        Self {
            store,
            queue,
            locks: ClusterLocks::new(),
            scheduler: Arc::new(scheduler),
            timer,
            retry: RetryPolicy::default(),
        }
    }

    /// Build an engine with an in-memory resource queue.
    pub fn from_config(store: StateStore, config: &BerthConfig) -> Self {
        Self::new(
            store,
            ResourceQueue::in_memory(),
            Scheduler::new(config.scheduler.clone()),
            CompletionTimer::from_config(&config.completion),
        )
        .with_retry(RetryPolicy::from_config(&config.completion))
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn queue(&self) -> &ResourceQueue {
        &self.queue
    }

    pub fn timer(&self) -> &CompletionTimer {
        &self.timer
    }

    pub fn locks(&self) -> &ClusterLocks {
        &self.locks
    }

    pub(crate) fn load_cluster(&self, cluster_id: ClusterId) -> SchedulerResult<ClusterRecord> {
        self.store
            .get_cluster(cluster_id)?
            .ok_or_else(|| SchedulerError::NotFound(format!("cluster {cluster_id}")))
    }

    /// Put a queued deployment into the resource queue, retrying transient
    /// faults with the engine's backoff.
    pub(crate) async fn enqueue_with_retry(&self, deployment: &DeploymentRecord) -> SchedulerResult<()> {
        let mut attempt = 0;
        loop {
            match self.queue.insert(
                deployment.cluster_id,
                deployment.priority,
                deployment.id,
                &deployment.demand,
            ) {
                Err(fault) if attempt + 1 < self.retry.attempts => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        cluster_id = deployment.cluster_id,
                        deployment_id = deployment.id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        %fault,
                        "queue insert failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other.map_err(SchedulerError::from),
            }
        }
    }

    /// Re-insert a `Queued` record that is missing from the resource queue.
    /// Returns whether an entry was added.
    pub(crate) fn requeue_if_missing(&self, deployment: &DeploymentRecord) -> SchedulerResult<bool> {
        if deployment.status != DeploymentStatus::Queued
            || self
                .queue
                .contains(deployment.cluster_id, deployment.priority, deployment.id)?
        {
            return Ok(false);
        }
        self.queue.insert(
            deployment.cluster_id,
            deployment.priority,
            deployment.id,
            &deployment.demand,
        )?;
        Ok(true)
    }

    /// Mark `deployment` running on `cluster`, persist both, and arm its
    /// completion timer. Caller holds the cluster lock and has checked fit.
    ///
    /// Returns `false` without writing anything if the deployment is not in
    /// a state that may start.
    pub(crate) fn start_queued(
        &self,
        cluster: &mut ClusterRecord,
        deployment: &mut DeploymentRecord,
    ) -> SchedulerResult<bool> {
        let now = epoch_millis();
        if let Err(e) = deployment.advance(DeploymentStatus::Running, now) {
            warn!(cluster_id = cluster.id, deployment_id = deployment.id, error = %e, "start refused");
            return Ok(false);
        }
        let run_time = self.timer.random_run_time();

        cluster.allocated = cluster.allocated.saturating_add(&deployment.demand);
        cluster.updated_at = now;
        deployment.started_at = Some(now);
        deployment.expires_at = Some(now + run_time.as_millis() as u64);

        self.store.put_cluster_and_deployment(cluster, deployment)?;
        self.timer.arm(deployment.id, run_time);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles() {
        let retry = RetryPolicy {
            attempts: 5,
            base_delay: Duration::from_millis(100),
        };
        assert_eq!(retry.delay_for(0), Duration::from_millis(100));
        assert_eq!(retry.delay_for(1), Duration::from_millis(200));
        assert_eq!(retry.delay_for(3), Duration::from_millis(800));
    }

    #[test]
    fn retry_policy_from_config() {
        let config = CompletionConfig {
            retry_attempts: 0,
            retry_backoff_ms: 50,
            ..CompletionConfig::default()
        };
        let retry = RetryPolicy::from_config(&config);
        assert_eq!(retry.attempts, 1);
        assert_eq!(retry.base_delay, Duration::from_millis(50));
    }
}
