//! Capacity snapshot: a private, mutable copy of available capacity.

use berth_core::ResourceVector;

/// In-memory resource ledger used for trial placement.
///
/// Lives for one strategy evaluation or one commit pass; never persisted
/// and never shared between passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacitySnapshot {
    available: ResourceVector,
}

impl CapacitySnapshot {
    pub fn new(available: ResourceVector) -> Self {
        Self { available }
    }

    pub fn available(&self) -> ResourceVector {
        self.available
    }

    /// Whether `demand` fits in what is left.
    pub fn can_schedule(&self, demand: &ResourceVector) -> bool {
        demand.fits_within(&self.available)
    }

    /// Reserve `demand` if it fits. Returns whether it was reserved.
    pub fn try_schedule(&mut self, demand: &ResourceVector) -> bool {
        match self.available.checked_sub(demand) {
            Some(rest) => {
                self.available = rest;
                true
            }
            None => false,
        }
    }
}
