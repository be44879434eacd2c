//! Completion timer and notification channel.
//!
//! Running deployments have a simulated run time. When it elapses the timer
//! publishes a [`CompletionEvent`] on a broadcast channel; the completion
//! listener consumes it. Arming is fire-and-forget; at most one timer is
//! live per deployment, so re-arming replaces the earlier one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::AbortHandle;
use tracing::debug;

use berth_core::DeploymentId;
use berth_core::config::CompletionConfig;

const CHANNEL_CAPACITY: usize = 1024;

/// A deployment's run time has elapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionEvent {
    pub deployment_id: DeploymentId,
}

/// Live timer tasks keyed by deployment. The generation tells a finished
/// task whether its entry has since been replaced.
type Armed = Arc<Mutex<HashMap<DeploymentId, (u64, AbortHandle)>>>;

#[derive(Debug, Clone)]
pub struct CompletionTimer {
    tx: broadcast::Sender<CompletionEvent>,
    min_run: Duration,
    max_run: Duration,
    armed: Armed,
    generation: Arc<AtomicU64>,
}

impl CompletionTimer {
    /// `min_run` and `max_run` bound the random run time, inclusive.
    pub fn new(min_run: Duration, max_run: Duration) -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            min_run,
            max_run: max_run.max(min_run),
            armed: Arc::default(),
            generation: Arc::default(),
        }
    }

    pub fn from_config(config: &CompletionConfig) -> Self {
        Self::new(
            Duration::from_secs(config.min_run_secs),
            Duration::from_secs(config.max_run_secs),
        )
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CompletionEvent> {
        self.tx.subscribe()
    }

    /// Uniform random run time within the configured bounds.
    pub fn random_run_time(&self) -> Duration {
        let min = self.min_run.as_millis() as u64;
        let max = self.max_run.as_millis() as u64;
        Duration::from_millis(rand::rng().random_range(min..=max))
    }

    /// Publish a completion for `deployment_id` once `after` has elapsed,
    /// replacing any timer already armed for it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn arm(&self, deployment_id: DeploymentId, after: Duration) {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let tx = self.tx.clone();
        let armed = self.armed.clone();

        // Hold the map while spawning so the task cannot finish and look up
        // its entry before it is recorded.
        let mut live = self.armed.lock().unwrap_or_else(PoisonError::into_inner);
        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            {
                let mut live = armed.lock().unwrap_or_else(PoisonError::into_inner);
                if live.get(&deployment_id).is_some_and(|(g, _)| *g == generation) {
                    live.remove(&deployment_id);
                }
            }
            publish(&tx, deployment_id);
        });
        if let Some((_, previous)) = live.insert(deployment_id, (generation, task.abort_handle())) {
            previous.abort();
            debug!(deployment_id, after_ms = after.as_millis() as u64, "completion timer re-armed");
        } else {
            debug!(deployment_id, after_ms = after.as_millis() as u64, "completion timer armed");
        }
    }

    /// Cancel the timer for `deployment_id`, if one is live.
    pub fn disarm(&self, deployment_id: DeploymentId) {
        let mut live = self.armed.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((_, task)) = live.remove(&deployment_id) {
            task.abort();
            debug!(deployment_id, "completion timer disarmed");
        }
    }

    /// Number of timers that have not fired yet.
    pub fn armed_count(&self) -> usize {
        self.armed.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

fn publish(tx: &broadcast::Sender<CompletionEvent>, deployment_id: DeploymentId) {
    if tx.send(CompletionEvent { deployment_id }).is_err() {
        debug!(deployment_id, "no completion listener subscribed, event dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_time_within_bounds() {
        let timer = CompletionTimer::new(Duration::from_secs(20), Duration::from_secs(30));
        for _ in 0..200 {
            let d = timer.random_run_time();
            assert!(d >= Duration::from_secs(20) && d <= Duration::from_secs(30));
        }
    }

    #[test]
    fn degenerate_range_is_fixed() {
        let timer = CompletionTimer::new(Duration::from_millis(5), Duration::from_millis(5));
        assert_eq!(timer.random_run_time(), Duration::from_millis(5));
    }

    #[test]
    fn inverted_range_collapses_to_minimum() {
        let timer = CompletionTimer::new(Duration::from_millis(50), Duration::from_millis(10));
        assert_eq!(timer.random_run_time(), Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn armed_timer_publishes_after_delay() {
        let timer = CompletionTimer::new(Duration::ZERO, Duration::ZERO);
        let mut rx = timer.subscribe();

        timer.arm(42, Duration::from_secs(25));
        tokio::time::sleep(Duration::from_secs(24)).await;
        assert!(rx.try_recv().is_err());

        let event = rx.recv().await.unwrap();
        assert_eq!(event, CompletionEvent { deployment_id: 42 });
    }

    #[tokio::test(start_paused = true)]
    async fn firing_without_listener_is_harmless() {
        let timer = CompletionTimer::new(Duration::ZERO, Duration::ZERO);
        timer.arm(1, Duration::ZERO);
        tokio::time::sleep(Duration::from_millis(1)).await;

        let mut rx = timer.subscribe();
        timer.arm(2, Duration::ZERO);
        assert_eq!(rx.recv().await.unwrap().deployment_id, 2);
        assert_eq!(timer.armed_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_replaces_the_earlier_timer() {
        let timer = CompletionTimer::new(Duration::ZERO, Duration::ZERO);
        let mut rx = timer.subscribe();

        timer.arm(9, Duration::from_secs(10));
        timer.arm(9, Duration::from_secs(20));
        timer.arm(9, Duration::from_secs(30));
        assert_eq!(timer.armed_count(), 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(rx.recv().await.unwrap().deployment_id, 9);
        assert!(rx.try_recv().is_err());
        assert_eq!(timer.armed_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn disarmed_timer_never_fires() {
        let timer = CompletionTimer::new(Duration::ZERO, Duration::ZERO);
        let mut rx = timer.subscribe();

        timer.arm(4, Duration::from_secs(5));
        timer.disarm(4);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(timer.armed_count(), 0);
    }
}
