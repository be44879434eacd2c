//! Genetic heuristic: permutation search for large candidate sets.
//!
//! An individual is an ordering of the candidates. Its fitness is how many
//! candidates a greedy first-fit walk over that ordering admits. Each
//! generation scores the population, keeps the fittest (elitist
//! truncation), and breeds a new population by single-point ordered
//! crossover followed by one swap mutation.
//!
//! The best greedy admission seen in any generation is returned, so the
//! result is always feasible even though it may not be cardinality-optimal.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::debug;

use berth_core::ResourceVector;

use crate::snapshot::CapacitySnapshot;
use crate::strategy::{Candidate, PackingStrategy};

/// Index permutation over the candidate slice.
type Individual = Vec<usize>;

#[derive(Debug, Clone)]
pub struct GeneticHeuristic {
    pub generations: usize,
    /// Upper bound; clamped to the number of candidates at run time.
    pub population_size: usize,
    /// Fixed seed for reproducible runs. `None` draws from OS entropy.
    pub seed: Option<u64>,
}

impl Default for GeneticHeuristic {
    fn default() -> Self {
        Self {
            generations: 10,
            population_size: 10,
            seed: None,
        }
    }
}

impl GeneticHeuristic {
    pub fn new(generations: usize, population_size: usize) -> Self {
        Self {
            generations,
            population_size,
            seed: None,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        }
    }
}

impl PackingStrategy for GeneticHeuristic {
    fn name(&self) -> &'static str {
        "genetic"
    }

    fn pack(&self, capacity: ResourceVector, candidates: &[Candidate]) -> Vec<Candidate> {
        debug!(
            candidates = candidates.len(),
            generations = self.generations,
            "packing with genetic heuristic"
        );

        let n = candidates.len();
        if n == 0 {
            return Vec::new();
        }

        let population_size = self.population_size.clamp(1, n);
        let mut rng = self.rng();

        let mut population: Vec<Individual> = (0..population_size)
            .map(|_| {
                let mut order: Individual = (0..n).collect();
                order.shuffle(&mut rng);
                order
            })
            .collect();

        let mut best: Vec<usize> = Vec::new();

        for generation in 0..self.generations {
            let mut scored: Vec<(usize, Individual)> = Vec::with_capacity(population.len());
            for individual in population {
                let admitted = greedy_admit(&capacity, candidates, &individual, best.len());
                let fitness = admitted.len();
                if fitness > best.len() {
                    best = admitted;
                }
                scored.push((fitness, individual));
            }

            if best.len() == n {
                debug!(generation, "every candidate admitted, stopping early");
                break;
            }

            // Stable sort keeps earlier individuals ahead on equal fitness.
            scored.sort_by(|a, b| b.0.cmp(&a.0));
            scored.truncate(population_size);
            let parents: Vec<Individual> = scored.into_iter().map(|(_, ind)| ind).collect();

            population = (0..population_size)
                .map(|_| breed(&parents, n, &mut rng))
                .collect();
        }

        debug!(fitness = best.len(), "genetic search finished");
        best.into_iter().map(|i| candidates[i]).collect()
    }
}

/// Greedy first-fit walk over `order` against a private snapshot.
///
/// Stops as soon as the admitted count plus every remaining item could no
/// longer exceed `best_fitness`.
fn greedy_admit(
    capacity: &ResourceVector,
    candidates: &[Candidate],
    order: &[usize],
    best_fitness: usize,
) -> Vec<usize> {
    let mut snapshot = CapacitySnapshot::new(*capacity);
    let mut admitted = Vec::new();

    for (pos, &idx) in order.iter().enumerate() {
        if snapshot.try_schedule(&candidates[idx].demand) {
            admitted.push(idx);
        }
        let remaining = order.len() - pos - 1;
        if admitted.len() + remaining <= best_fitness {
            break;
        }
    }

    admitted
}

/// Pick two parents, cross them over, and mutate the child.
fn breed(parents: &[Individual], n: usize, rng: &mut StdRng) -> Individual {
    let (first, second) = pick_two(parents.len(), rng);
    let parent1 = &parents[first];
    let parent2 = &parents[second];

    let cut = if n > 1 { rng.random_range(1..n) } else { 0 };
    let mut taken = vec![false; n];
    let mut child: Individual = Vec::with_capacity(n);
    for &gene in &parent1[..cut] {
        taken[gene] = true;
        child.push(gene);
    }
    child.extend(parent2.iter().copied().filter(|&gene| !taken[gene]));

    if child.len() > 1 {
        let (a, b) = pick_two(child.len(), rng);
        child.swap(a, b);
    }
    child
}

/// Two distinct uniform indices in `0..len`, or `(0, 0)` when `len < 2`.
fn pick_two(len: usize, rng: &mut StdRng) -> (usize, usize) {
    if len < 2 {
        return (0, 0);
    }
    let a = rng.random_range(0..len);
    let mut b = rng.random_range(0..len - 1);
    if b >= a {
        b += 1;
    }
    (a, b)
}
