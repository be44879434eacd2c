//! Exhaustive subset maximizer: optimal by cardinality, exponential cost.
//!
//! Walks the power set of the candidates in increasing subset size, each
//! size in lexicographic index order, and keeps the first feasible subset
//! that is strictly larger than the best so far. Ties at the maximal size
//! are therefore broken by enumeration order.
//!
//! Feasibility is monotone (every subset of a feasible set is feasible), so
//! once a size has no feasible subset no larger size can have one, and once
//! a size has produced its first feasible subset nothing later at that size
//! can replace it. Both shortcuts skip work without changing the result.

use tracing::debug;

use berth_core::ResourceVector;

use crate::strategy::{Candidate, PackingStrategy, is_feasible};

#[derive(Debug, Clone, Copy, Default)]
pub struct ExhaustiveSubsetMaximizer;

impl ExhaustiveSubsetMaximizer {
    pub fn new() -> Self {
        Self
    }
}

impl PackingStrategy for ExhaustiveSubsetMaximizer {
    fn name(&self) -> &'static str {
        "exhaustive"
    }

    fn pack(&self, capacity: ResourceVector, candidates: &[Candidate]) -> Vec<Candidate> {
        debug!(candidates = candidates.len(), "packing with exhaustive search");

        let n = candidates.len();
        let mut best: Vec<usize> = Vec::new();

        for size in 1..=n {
            let found = Combinations::new(n, size)
                .find(|combo| is_feasible(&capacity, combo.iter().map(|&i| &candidates[i])));
            match found {
                Some(combo) => best = combo,
                None => break,
            }
        }

        best.into_iter().map(|i| candidates[i]).collect()
    }
}

/// Lexicographic k-combinations of `0..n`.
struct Combinations {
    n: usize,
    indices: Vec<usize>,
    started: bool,
    done: bool,
}

impl Combinations {
    fn new(n: usize, k: usize) -> Self {
        Self {
            n,
            indices: (0..k).collect(),
            started: false,
            done: k > n,
        }
    }
}

impl Iterator for Combinations {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if !self.started {
            self.started = true;
            return Some(self.indices.clone());
        }

        let k = self.indices.len();
        // Rightmost position that can still move forward.
        let mut i = k;
        loop {
            if i == 0 {
                self.done = true;
                return None;
            }
            i -= 1;
            if self.indices[i] < self.n - k + i {
                break;
            }
        }
        self.indices[i] += 1;
        for j in i + 1..k {
            self.indices[j] = self.indices[j - 1] + 1;
        }
        Some(self.indices.clone())
    }
}
