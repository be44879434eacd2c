//! Scheduler: picks a packing strategy and applies its choice.
//!
//! The strategy works on its own copy of the capacity. Whatever it returns
//! is then re-applied item by item to the caller's snapshot, so a
//! misbehaving strategy can never drive the snapshot negative.

use std::time::Instant;

use tracing::{info, warn};

use berth_core::config::{MAX_EXHAUSTIVE_THRESHOLD, SchedulerConfig};
use berth_packing::{
    CapacitySnapshot, Candidate, ExhaustiveSubsetMaximizer, GeneticHeuristic, PackingStrategy,
};

#[derive(Debug, Clone, Default)]
pub struct Scheduler {
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self { config }
    }

    /// Choose the strategy for `count` candidates.
    pub fn strategy_for(&self, count: usize) -> Box<dyn PackingStrategy> {
        select_strategy(&self.config, count)
    }

    /// Pack `candidates` into `capacity`, reserving each chosen item on it.
    ///
    /// Returns the chosen candidates in the order they were reserved.
    pub fn schedule_onto(
        &self,
        capacity: &mut CapacitySnapshot,
        candidates: &[Candidate],
    ) -> Vec<Candidate> {
        let started = Instant::now();
        let strategy = self.strategy_for(candidates.len());
        let picked = strategy.pack(capacity.available(), candidates);

        let mut chosen = Vec::with_capacity(picked.len());
        for candidate in picked {
            if capacity.try_schedule(&candidate.demand) {
                chosen.push(candidate);
            } else {
                warn!(
                    deployment_id = candidate.id,
                    strategy = strategy.name(),
                    "strategy returned an item that does not fit, dropping it"
                );
            }
        }

        info!(
            strategy = strategy.name(),
            candidates = candidates.len(),
            chosen = chosen.len(),
            remaining = %capacity.available(),
            elapsed_us = started.elapsed().as_micros() as u64,
            "scheduling round finished"
        );
        chosen
    }
}

/// Exhaustive search below the threshold, genetic heuristic at or above it.
///
/// The threshold is clamped to [`MAX_EXHAUSTIVE_THRESHOLD`] even when the
/// config was built without validation.
pub fn select_strategy(config: &SchedulerConfig, count: usize) -> Box<dyn PackingStrategy> {
    if count < config.exhaustive_threshold.min(MAX_EXHAUSTIVE_THRESHOLD) {
        Box::new(ExhaustiveSubsetMaximizer)
    } else {
        let mut genetic = GeneticHeuristic::new(config.generations, config.population_size);
        genetic.seed = config.seed;
        Box::new(genetic)
    }
}
