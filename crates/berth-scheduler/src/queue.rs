//! Resource queue: per-cluster, per-tier pending deployments.
//!
//! Each `(cluster, tier)` pair owns three sorted sets, one per resource
//! dimension, keyed `P{tier}:cluster:{id}:{cpu|memory|gpu}`. A deployment
//! is a member of all three with its demand on that dimension as score.
//! Filtering by a capacity ceiling is then three range queries and an
//! intersection.
//!
//! The sorted sets live behind [`OrderedStore`] so a networked store can
//! stand in for [`MemoryOrderedStore`]. Every primitive is fallible.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::{debug, warn};

use berth_core::{ClusterId, DeploymentId, PriorityTier, ResourceVector};
use berth_packing::Candidate;

/// The ordered store could not be reached or refused an operation.
#[derive(Debug, Error)]
#[error("ordered store fault: {0}")]
pub struct QueueFault(pub String);

/// Sorted-set primitives the resource queue is built on.
pub trait OrderedStore: Send + Sync {
    /// Add or re-score `member` under `key`.
    fn insert(&self, key: &str, member: &str, score: u64) -> Result<(), QueueFault>;

    /// Returns whether the member was present.
    fn remove(&self, key: &str, member: &str) -> Result<bool, QueueFault>;

    /// Members with `min <= score <= max`, ascending by score then member.
    fn range_by_score(&self, key: &str, min: u64, max: u64) -> Result<Vec<String>, QueueFault>;

    fn score(&self, key: &str, member: &str) -> Result<Option<u64>, QueueFault>;

    fn size(&self, key: &str) -> Result<usize, QueueFault>;
}

// ── In-memory store ────────────────────────────────────────────────

#[derive(Debug, Default)]
struct SortedSet {
    scores: HashMap<String, u64>,
    ordered: BTreeSet<(u64, String)>,
}

/// Process-local ordered store.
#[derive(Debug, Default)]
pub struct MemoryOrderedStore {
    sets: Mutex<HashMap<String, SortedSet>>,
}

impl MemoryOrderedStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_sets<T>(
        &self,
        f: impl FnOnce(&mut HashMap<String, SortedSet>) -> T,
    ) -> Result<T, QueueFault> {
        let mut sets = self
            .sets
            .lock()
            .map_err(|_| QueueFault("memory store lock poisoned".to_string()))?;
        Ok(f(&mut sets))
    }
}

impl OrderedStore for MemoryOrderedStore {
    fn insert(&self, key: &str, member: &str, score: u64) -> Result<(), QueueFault> {
        self.with_sets(|sets| {
            let set = sets.entry(key.to_string()).or_default();
            if let Some(old) = set.scores.insert(member.to_string(), score) {
                set.ordered.remove(&(old, member.to_string()));
            }
            set.ordered.insert((score, member.to_string()));
        })
    }

    fn remove(&self, key: &str, member: &str) -> Result<bool, QueueFault> {
        self.with_sets(|sets| {
            let Some(set) = sets.get_mut(key) else {
                return false;
            };
            let removed = match set.scores.remove(member) {
                Some(score) => set.ordered.remove(&(score, member.to_string())),
                None => false,
            };
            if set.scores.is_empty() {
                sets.remove(key);
            }
            removed
        })
    }

    fn range_by_score(&self, key: &str, min: u64, max: u64) -> Result<Vec<String>, QueueFault> {
        self.with_sets(|sets| match sets.get(key) {
            Some(set) if min <= max => set
                .ordered
                .range((min, String::new())..)
                .take_while(|(score, _)| *score <= max)
                .map(|(_, member)| member.clone())
                .collect(),
            _ => Vec::new(),
        })
    }

    fn score(&self, key: &str, member: &str) -> Result<Option<u64>, QueueFault> {
        self.with_sets(|sets| sets.get(key).and_then(|set| set.scores.get(member).copied()))
    }

    fn size(&self, key: &str) -> Result<usize, QueueFault> {
        self.with_sets(|sets| sets.get(key).map_or(0, |set| set.scores.len()))
    }
}

// ── Resource queue ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum Dimension {
    Cpu,
    Memory,
    Gpu,
}

impl Dimension {
    const ALL: [Dimension; 3] = [Dimension::Cpu, Dimension::Memory, Dimension::Gpu];

    fn as_str(self) -> &'static str {
        match self {
            Dimension::Cpu => "cpu",
            Dimension::Memory => "memory",
            Dimension::Gpu => "gpu",
        }
    }

    fn of(self, v: &ResourceVector) -> u64 {
        match self {
            Dimension::Cpu => v.cpu,
            Dimension::Memory => v.memory,
            Dimension::Gpu => v.gpu,
        }
    }
}

fn queue_key(cluster_id: ClusterId, tier: PriorityTier, dim: Dimension) -> String {
    format!("{tier}:cluster:{cluster_id}:{}", dim.as_str())
}

/// Pending deployments grouped by cluster and priority tier.
#[derive(Clone)]
pub struct ResourceQueue {
    store: Arc<dyn OrderedStore>,
}

impl ResourceQueue {
    pub fn new(store: Arc<dyn OrderedStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryOrderedStore::new()))
    }

    pub fn insert(
        &self,
        cluster_id: ClusterId,
        tier: PriorityTier,
        deployment_id: DeploymentId,
        demand: &ResourceVector,
    ) -> Result<(), QueueFault> {
        let member = deployment_id.to_string();
        for dim in Dimension::ALL {
            self.store
                .insert(&queue_key(cluster_id, tier, dim), &member, dim.of(demand))?;
        }
        debug!(cluster_id, deployment_id, %tier, "queued");
        Ok(())
    }

    pub fn remove(
        &self,
        cluster_id: ClusterId,
        tier: PriorityTier,
        deployment_id: DeploymentId,
    ) -> Result<(), QueueFault> {
        let member = deployment_id.to_string();
        for dim in Dimension::ALL {
            self.store.remove(&queue_key(cluster_id, tier, dim), &member)?;
        }
        Ok(())
    }

    pub fn contains(
        &self,
        cluster_id: ClusterId,
        tier: PriorityTier,
        deployment_id: DeploymentId,
    ) -> Result<bool, QueueFault> {
        let member = deployment_id.to_string();
        for dim in Dimension::ALL {
            if self
                .store
                .score(&queue_key(cluster_id, tier, dim), &member)?
                .is_none()
            {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Number of deployments waiting in the tier.
    pub fn size(&self, cluster_id: ClusterId, tier: PriorityTier) -> Result<usize, QueueFault> {
        self.store.size(&queue_key(cluster_id, tier, Dimension::Cpu))
    }

    /// Deployments whose demand is within `ceiling` on every dimension,
    /// in ascending id order.
    pub fn candidates_under(
        &self,
        cluster_id: ClusterId,
        tier: PriorityTier,
        ceiling: &ResourceVector,
    ) -> Result<Vec<Candidate>, QueueFault> {
        let mut matching: Option<HashSet<String>> = None;
        for dim in Dimension::ALL {
            let members: HashSet<String> = self
                .store
                .range_by_score(&queue_key(cluster_id, tier, dim), 0, dim.of(ceiling))?
                .into_iter()
                .collect();
            matching = Some(match matching {
                Some(acc) => acc.intersection(&members).cloned().collect(),
                None => members,
            });
        }

        let mut candidates = Vec::new();
        for member in matching.unwrap_or_default() {
            let Ok(id) = member.parse::<DeploymentId>() else {
                warn!(cluster_id, %tier, %member, "ignoring malformed queue member");
                continue;
            };
            if let Some(demand) = self.demand_of(cluster_id, tier, &member)? {
                candidates.push(Candidate::new(id, demand));
            }
        }
        candidates.sort_by_key(|c| c.id);
        Ok(candidates)
    }

    fn demand_of(
        &self,
        cluster_id: ClusterId,
        tier: PriorityTier,
        member: &str,
    ) -> Result<Option<ResourceVector>, QueueFault> {
        let mut scores = [0u64; 3];
        for (slot, dim) in scores.iter_mut().zip(Dimension::ALL) {
            match self.store.score(&queue_key(cluster_id, tier, dim), member)? {
                Some(score) => *slot = score,
                None => return Ok(None),
            }
        }
        Ok(Some(ResourceVector::new(scores[0], scores[1], scores[2])))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rv(cpu: u64, memory: u64, gpu: u64) -> ResourceVector {
        ResourceVector::new(cpu, memory, gpu)
    }

    fn ids(candidates: &[Candidate]) -> Vec<DeploymentId> {
        candidates.iter().map(|c| c.id).collect()
    }

    #[test]
    fn keys_follow_tier_cluster_dimension_layout() {
        assert_eq!(
            queue_key(4, PriorityTier::High, Dimension::Memory),
            "P1:cluster:4:memory"
        );
        assert_eq!(queue_key(9, PriorityTier::Low, Dimension::Gpu), "P0:cluster:9:gpu");
    }

    #[test]
    fn memory_store_range_is_inclusive_and_ordered() {
        let store = MemoryOrderedStore::new();
        store.insert("k", "a", 5).unwrap();
        store.insert("k", "b", 1).unwrap();
        store.insert("k", "c", 9).unwrap();

        assert_eq!(store.range_by_score("k", 0, 5).unwrap(), vec!["b", "a"]);
        assert_eq!(store.range_by_score("k", 6, 5).unwrap(), Vec::<String>::new());
        assert_eq!(store.size("k").unwrap(), 3);
    }

    #[test]
    fn memory_store_reinsert_rescores() {
        let store = MemoryOrderedStore::new();
        store.insert("k", "a", 5).unwrap();
        store.insert("k", "a", 2).unwrap();

        assert_eq!(store.score("k", "a").unwrap(), Some(2));
        assert_eq!(store.size("k").unwrap(), 1);
        assert_eq!(store.range_by_score("k", 3, 10).unwrap(), Vec::<String>::new());
    }

    #[test]
    fn memory_store_remove_reports_presence() {
        let store = MemoryOrderedStore::new();
        store.insert("k", "a", 5).unwrap();
        assert!(store.remove("k", "a").unwrap());
        assert!(!store.remove("k", "a").unwrap());
        assert_eq!(store.size("k").unwrap(), 0);
    }

    #[test]
    fn candidates_filtered_on_every_dimension() {
        let queue = ResourceQueue::in_memory();
        queue.insert(1, PriorityTier::Low, 1, &rv(2, 2, 0)).unwrap();
        queue.insert(1, PriorityTier::Low, 2, &rv(2, 9, 0)).unwrap(); // memory too big
        queue.insert(1, PriorityTier::Low, 3, &rv(2, 2, 3)).unwrap(); // gpu too big
        queue.insert(1, PriorityTier::Low, 4, &rv(4, 4, 1)).unwrap();

        let found = queue
            .candidates_under(1, PriorityTier::Low, &rv(4, 4, 1))
            .unwrap();
        assert_eq!(ids(&found), vec![1, 4]);
        assert_eq!(found[1].demand, rv(4, 4, 1));
    }

    #[test]
    fn candidates_sorted_by_id() {
        let queue = ResourceQueue::in_memory();
        for id in [7, 3, 12, 5] {
            queue.insert(1, PriorityTier::High, id, &rv(1, 1, 0)).unwrap();
        }
        let found = queue
            .candidates_under(1, PriorityTier::High, &rv(10, 10, 0))
            .unwrap();
        assert_eq!(ids(&found), vec![3, 5, 7, 12]);
    }

    #[test]
    fn tiers_and_clusters_are_isolated() {
        let queue = ResourceQueue::in_memory();
        queue.insert(1, PriorityTier::High, 1, &rv(1, 1, 0)).unwrap();
        queue.insert(1, PriorityTier::Low, 2, &rv(1, 1, 0)).unwrap();
        queue.insert(2, PriorityTier::High, 3, &rv(1, 1, 0)).unwrap();

        assert_eq!(queue.size(1, PriorityTier::High).unwrap(), 1);
        assert_eq!(queue.size(1, PriorityTier::Low).unwrap(), 1);
        assert!(queue.contains(2, PriorityTier::High, 3).unwrap());
        assert!(!queue.contains(1, PriorityTier::High, 3).unwrap());
    }

    #[test]
    fn remove_clears_all_dimensions() {
        let queue = ResourceQueue::in_memory();
        queue.insert(1, PriorityTier::Low, 8, &rv(1, 2, 3)).unwrap();
        queue.remove(1, PriorityTier::Low, 8).unwrap();

        assert_eq!(queue.size(1, PriorityTier::Low).unwrap(), 0);
        assert!(!queue.contains(1, PriorityTier::Low, 8).unwrap());
        assert!(
            queue
                .candidates_under(1, PriorityTier::Low, &rv(10, 10, 10))
                .unwrap()
                .is_empty()
        );
    }

    struct Unreachable;

    impl OrderedStore for Unreachable {
        fn insert(&self, _: &str, _: &str, _: u64) -> Result<(), QueueFault> {
            Err(QueueFault("connection refused".into()))
        }
        fn remove(&self, _: &str, _: &str) -> Result<bool, QueueFault> {
            Err(QueueFault("connection refused".into()))
        }
        fn range_by_score(&self, _: &str, _: u64, _: u64) -> Result<Vec<String>, QueueFault> {
            Err(QueueFault("connection refused".into()))
        }
        fn score(&self, _: &str, _: &str) -> Result<Option<u64>, QueueFault> {
            Err(QueueFault("connection refused".into()))
        }
        fn size(&self, _: &str) -> Result<usize, QueueFault> {
            Err(QueueFault("connection refused".into()))
        }
    }

    #[test]
    fn store_faults_propagate() {
        let queue = ResourceQueue::new(Arc::new(Unreachable));
        assert!(queue.insert(1, PriorityTier::Low, 1, &rv(1, 1, 1)).is_err());
        assert!(queue.size(1, PriorityTier::Low).is_err());
        assert!(
            queue
                .candidates_under(1, PriorityTier::Low, &rv(1, 1, 1))
                .is_err()
        );
    }
}
