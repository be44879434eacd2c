//! Berth packing strategies: multi-dimensional bin packing by cardinality.
//!
//! Given a cluster's available capacity and a set of queued candidates,
//! a strategy picks a subset whose combined demand fits on every dimension,
//! trying to admit as many candidates as possible. Strategies are pure:
//! they never touch live capacity, only a private [`CapacitySnapshot`].
//!
//! # Components
//!
//! - **`snapshot`**: Ephemeral test-and-decrement capacity ledger
//! - **`strategy`**: The `PackingStrategy` trait and shared helpers
//! - **`exhaustive`**: Power-set search, optimal by cardinality
//! - **`genetic`**: Permutation-based genetic heuristic for larger sets

pub mod exhaustive;
pub mod genetic;
pub mod snapshot;
pub mod strategy;

pub use exhaustive::ExhaustiveSubsetMaximizer;
pub use genetic::GeneticHeuristic;
pub use snapshot::CapacitySnapshot;
pub use strategy::{Candidate, PackingStrategy, is_feasible, total_demand};
