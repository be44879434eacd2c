//! Shared types used across Berth crates.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifier of an organization (tenant).
pub type OrganizationId = u64;

/// Identifier of a user.
pub type UserId = u64;

/// Identifier of a cluster.
pub type ClusterId = u64;

/// Identifier of a deployment request.
pub type DeploymentId = u64;

/// Errors raised when decoding wire values into core types.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid priority tier: {0} (expected 1 for high or 0 for low)")]
    InvalidTier(i64),

    #[error("invalid role: {0}")]
    InvalidRole(String),

    #[error("illegal status transition: {from} -> {to}")]
    IllegalTransition {
        from: DeploymentStatus,
        to: DeploymentStatus,
    },
}

// ── Resources ──────────────────────────────────────────────────────

/// A triple of non-negative resource quantities, compared component-wise.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceVector {
    pub cpu: u64,
    pub memory: u64,
    pub gpu: u64,
}

impl ResourceVector {
    pub const ZERO: ResourceVector = ResourceVector {
        cpu: 0,
        memory: 0,
        gpu: 0,
    };

    pub const fn new(cpu: u64, memory: u64, gpu: u64) -> Self {
        Self { cpu, memory, gpu }
    }

    /// `self ≤ other` on every dimension.
    pub fn fits_within(&self, other: &ResourceVector) -> bool {
        self.cpu <= other.cpu && self.memory <= other.memory && self.gpu <= other.gpu
    }

    /// Component-wise sum, `None` on overflow of any dimension.
    pub fn checked_add(&self, other: &ResourceVector) -> Option<ResourceVector> {
        Some(ResourceVector {
            cpu: self.cpu.checked_add(other.cpu)?,
            memory: self.memory.checked_add(other.memory)?,
            gpu: self.gpu.checked_add(other.gpu)?,
        })
    }

    /// Component-wise difference, `None` if any dimension would go negative.
    pub fn checked_sub(&self, other: &ResourceVector) -> Option<ResourceVector> {
        Some(ResourceVector {
            cpu: self.cpu.checked_sub(other.cpu)?,
            memory: self.memory.checked_sub(other.memory)?,
            gpu: self.gpu.checked_sub(other.gpu)?,
        })
    }

    /// Component-wise difference clamped at zero.
    pub fn saturating_sub(&self, other: &ResourceVector) -> ResourceVector {
        ResourceVector {
            cpu: self.cpu.saturating_sub(other.cpu),
            memory: self.memory.saturating_sub(other.memory),
            gpu: self.gpu.saturating_sub(other.gpu),
        }
    }

    /// Component-wise sum clamped at `u64::MAX`.
    pub fn saturating_add(&self, other: &ResourceVector) -> ResourceVector {
        ResourceVector {
            cpu: self.cpu.saturating_add(other.cpu),
            memory: self.memory.saturating_add(other.memory),
            gpu: self.gpu.saturating_add(other.gpu),
        }
    }

    /// Whether `self + extra` stays within `limit` on every dimension.
    pub fn can_absorb(&self, extra: &ResourceVector, limit: &ResourceVector) -> bool {
        self.checked_add(extra)
            .is_some_and(|sum| sum.fits_within(limit))
    }
}

impl fmt::Display for ResourceVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cpu={} memory={} gpu={}", self.cpu, self.memory, self.gpu)
    }
}

// ── Priority ───────────────────────────────────────────────────────

/// Service class of a deployment request.
///
/// Wire encoding is `High = 1`, `Low = 0`: the higher number is serviced
/// first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum PriorityTier {
    High,
    Low,
}

impl PriorityTier {
    /// Tiers in dispatch order.
    pub const DISPATCH_ORDER: [PriorityTier; 2] = [PriorityTier::High, PriorityTier::Low];

    pub fn as_i64(self) -> i64 {
        match self {
            PriorityTier::High => 1,
            PriorityTier::Low => 0,
        }
    }
}

impl TryFrom<i64> for PriorityTier {
    type Error = TypeError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(PriorityTier::High),
            0 => Ok(PriorityTier::Low),
            other => Err(TypeError::InvalidTier(other)),
        }
    }
}

impl From<PriorityTier> for i64 {
    fn from(tier: PriorityTier) -> Self {
        tier.as_i64()
    }
}

impl fmt::Display for PriorityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.as_i64())
    }
}

// ── Deployment status ──────────────────────────────────────────────

/// Lifecycle status of a deployment request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Queued,
    Running,
    Rejected,
    Done,
}

impl DeploymentStatus {
    /// Whether moving from `self` to `next` is a legal lifecycle step.
    ///
    /// Only `Queued → Running` and `Running → Done` are allowed once a
    /// record exists; initial statuses are chosen at creation time.
    pub fn can_transition_to(self, next: DeploymentStatus) -> bool {
        matches!(
            (self, next),
            (DeploymentStatus::Queued, DeploymentStatus::Running)
                | (DeploymentStatus::Running, DeploymentStatus::Done)
        )
    }

    /// [`can_transition_to`](Self::can_transition_to) as a `Result`.
    pub fn transition_to(self, next: DeploymentStatus) -> Result<DeploymentStatus, TypeError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(TypeError::IllegalTransition {
                from: self,
                to: next,
            })
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeploymentStatus::Queued => "queued",
            DeploymentStatus::Running => "running",
            DeploymentStatus::Rejected => "rejected",
            DeploymentStatus::Done => "done",
        }
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Roles ──────────────────────────────────────────────────────────

/// Role of a user inside its organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    Developer,
    #[default]
    Viewer,
}

impl Role {
    /// Viewers may only read; everyone else may create clusters and deployments.
    pub fn can_write(self) -> bool {
        !matches!(self, Role::Viewer)
    }
}

impl std::str::FromStr for Role {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ADMIN" => Ok(Role::Admin),
            "DEVELOPER" => Ok(Role::Developer),
            "VIEWER" => Ok(Role::Viewer),
            _ => Err(TypeError::InvalidRole(s.to_string())),
        }
    }
}
