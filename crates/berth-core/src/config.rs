//! berth.toml configuration parser.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::types::{OrganizationId, Role, UserId};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BerthConfig {
    pub server: ServerConfig,
    pub scheduler: SchedulerConfig,
    pub completion: CompletionConfig,
    pub seed: SeedConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub data_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8443,
            data_dir: PathBuf::from("/var/lib/berth"),
        }
    }
}

/// Largest accepted `exhaustive_threshold`. Exhaustive search is
/// exponential in the candidate count and runs under the cluster lock.
pub const MAX_EXHAUSTIVE_THRESHOLD: usize = 20;

/// Packing strategy parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Candidate counts below this use exhaustive search; the rest use the
    /// genetic heuristic.
    pub exhaustive_threshold: usize,
    pub generations: usize,
    pub population_size: usize,
    /// Fixed RNG seed for the genetic heuristic. Unset means OS entropy.
    pub seed: Option<u64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            exhaustive_threshold: 10,
            generations: 10,
            population_size: 10,
            seed: None,
        }
    }
}

/// Simulated run time and completion retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionConfig {
    pub min_run_secs: u64,
    pub max_run_secs: u64,
    /// Dispatch attempts after a completion before giving up.
    pub retry_attempts: u32,
    /// Base delay for exponential backoff.
    pub retry_backoff_ms: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            min_run_secs: 20,
            max_run_secs: 30,
            retry_attempts: 5,
            retry_backoff_ms: 200,
        }
    }
}

/// Records upserted into the state store at startup.
///
/// Identity management lives outside the engine; seeding is how a
/// standalone daemon learns about tenants and their members.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SeedConfig {
    pub organizations: Vec<SeedOrganization>,
    pub users: Vec<SeedUser>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedOrganization {
    pub id: OrganizationId,
    pub name: String,
    pub invite_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedUser {
    pub id: UserId,
    pub username: String,
    pub organization_id: Option<OrganizationId>,
    #[serde(default)]
    pub role: Role,
}

impl BerthConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: BerthConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.completion.min_run_secs > self.completion.max_run_secs {
            anyhow::bail!(
                "completion.min_run_secs ({}) exceeds completion.max_run_secs ({})",
                self.completion.min_run_secs,
                self.completion.max_run_secs
            );
        }
        if self.scheduler.exhaustive_threshold > MAX_EXHAUSTIVE_THRESHOLD {
            anyhow::bail!(
                "scheduler.exhaustive_threshold ({}) exceeds the maximum of {MAX_EXHAUSTIVE_THRESHOLD}",
                self.scheduler.exhaustive_threshold
            );
        }
        if self.scheduler.population_size == 0 {
            anyhow::bail!("scheduler.population_size must be at least 1");
        }
        if self.scheduler.generations == 0 {
            anyhow::bail!("scheduler.generations must be at least 1");
        }
        for user in &self.seed.users {
            if let Some(org) = user.organization_id {
                if !self.seed.organizations.iter().any(|o| o.id == org) {
                    anyhow::bail!(
                        "seed user {} references unknown organization {org}",
                        user.username
                    );
                }
            }
        }
        Ok(())
    }
}
