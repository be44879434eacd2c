//! The packing strategy interface.

use serde::{Deserialize, Serialize};

use berth_core::{DeploymentId, ResourceVector};

/// A queued deployment as seen by a packing strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Candidate {
    pub id: DeploymentId,
    pub demand: ResourceVector,
}

impl Candidate {
    pub fn new(id: DeploymentId, demand: ResourceVector) -> Self {
        Self { id, demand }
    }
}

/// Picks a subset of candidates that fits in `capacity`.
///
/// Implementations must return a subset of `candidates` (no duplicates)
/// whose demands sum to `≤ capacity` on every dimension. They must not
/// fail; an empty result is always acceptable.
pub trait PackingStrategy: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    fn pack(&self, capacity: ResourceVector, candidates: &[Candidate]) -> Vec<Candidate>;
}

/// Component-wise sum of the candidates' demands, `None` on overflow.
pub fn total_demand<'a>(items: impl IntoIterator<Item = &'a Candidate>) -> Option<ResourceVector> {
    items
        .into_iter()
        .try_fold(ResourceVector::ZERO, |acc, c| acc.checked_add(&c.demand))
}

/// Whether the candidates fit together in `capacity`.
pub fn is_feasible<'a>(
    capacity: &ResourceVector,
    items: impl IntoIterator<Item = &'a Candidate>,
) -> bool {
    total_demand(items).is_some_and(|sum| sum.fits_within(capacity))
}
