//! Completion handling: release a finished deployment's resources and
//! dispatch queued work onto them.

use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use berth_core::{ClusterId, DeploymentId, epoch_millis};
use berth_state::DeploymentStatus;

use crate::dispatch::DispatchReport;
use crate::engine::Engine;
use crate::error::{SchedulerError, SchedulerResult};
use crate::timer::CompletionEvent;

const RESUBSCRIBE_BACKOFF: Duration = Duration::from_millis(500);

impl Engine {
    /// Mark a running deployment `Done`, release its demand, and run a
    /// dispatch pass on its cluster.
    ///
    /// Unknown ids and deployments that are not running are ignored and
    /// return `Ok(None)`.
    pub async fn complete(
        &self,
        deployment_id: DeploymentId,
    ) -> SchedulerResult<Option<DispatchReport>> {
        let Some(record) = self.store.get_deployment(deployment_id)? else {
            debug!(deployment_id, "completion for unknown deployment, ignoring");
            return Ok(None);
        };
        if record.status != DeploymentStatus::Running {
            debug!(deployment_id, status = %record.status, "completion for non-running deployment, ignoring");
            return Ok(None);
        }
        let cluster_id = record.cluster_id;

        {
            let _guard = self.locks.acquire(cluster_id).await;
            if !self.release_locked(deployment_id)? {
                return Ok(None);
            }
        }

        self.dispatch_with_retry(cluster_id).await.map(Some)
    }

    /// Release and mark `Done`. Caller holds the cluster lock. Returns
    /// whether the deployment was still running.
    pub(crate) fn release_locked(&self, deployment_id: DeploymentId) -> SchedulerResult<bool> {
        let Some(mut record) = self.store.get_deployment(deployment_id)? else {
            return Ok(false);
        };
        let now = epoch_millis();
        if let Err(e) = record.advance(DeploymentStatus::Done, now) {
            debug!(deployment_id, error = %e, "already handled");
            return Ok(false);
        }

        match self.store.get_cluster(record.cluster_id)? {
            Some(mut cluster) => {
                cluster.allocated = cluster.allocated.saturating_sub(&record.demand);
                cluster.updated_at = now;
                self.store.put_cluster_and_deployment(&cluster, &record)?;
                info!(
                    cluster_id = cluster.id,
                    deployment_id,
                    released = %record.demand,
                    allocated = %cluster.allocated,
                    "deployment done, resources released"
                );
            }
            None => {
                self.store.put_deployment(&record)?;
                warn!(cluster_id = record.cluster_id, deployment_id, "deployment done, cluster missing");
            }
        }
        self.timer.disarm(deployment_id);
        Ok(true)
    }

    async fn dispatch_with_retry(&self, cluster_id: ClusterId) -> SchedulerResult<DispatchReport> {
        let mut attempt = 0;
        loop {
            match self.trigger_dispatch(cluster_id).await {
                Err(SchedulerError::TransientStoreFault(reason))
                    if attempt + 1 < self.retry.attempts =>
                {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        cluster_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        %reason,
                        "dispatch failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Consume completion events until `shutdown` changes.
    ///
    /// Each event is handled on its own task so clusters progress
    /// independently. A lagged or closed subscription triggers a
    /// reconciliation sweep to pick up whatever was missed.
    pub async fn run_completion_listener(&self, shutdown: watch::Receiver<bool>) {
        self.listen(self.timer.subscribe(), shutdown).await;
    }

    /// Subscribe now and run the listener on a background task.
    ///
    /// Events published after this returns are never missed, which makes it
    /// safe to arm timers (for instance through [`Engine::reconcile`])
    /// straight afterwards.
    pub fn spawn_completion_listener(&self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let events = self.timer.subscribe();
        let engine = self.clone();
        tokio::spawn(async move { engine.listen(events, shutdown).await })
    }

    async fn listen(
        &self,
        mut events: broadcast::Receiver<CompletionEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("completion listener started");

        loop {
            tokio::select! {
                received = events.recv() => match received {
                    Ok(event) => {
                        let engine = self.clone();
                        tokio::spawn(async move {
                            if let Err(e) = engine.complete(event.deployment_id).await {
                                error!(deployment_id = event.deployment_id, error = %e, "completion handling failed");
                            }
                        });
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "completion listener lagged, reconciling");
                        self.spawn_reconcile();
                    }
                    Err(RecvError::Closed) => {
                        warn!("completion channel closed, resubscribing");
                        tokio::time::sleep(RESUBSCRIBE_BACKOFF).await;
                        events = self.timer.subscribe();
                        self.spawn_reconcile();
                    }
                },
                _ = shutdown.changed() => {
                    info!("completion listener shutting down");
                    break;
                }
            }
        }
    }

    fn spawn_reconcile(&self) {
        let engine = self.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.reconcile().await {
                error!(error = %e, "reconciliation failed");
            }
        });
    }
}
