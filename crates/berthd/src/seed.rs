//! Upsert the organizations and users listed in `[seed]`.

use tracing::info;

use berth_core::config::SeedConfig;
use berth_state::{OrganizationRecord, StateStore, UserRecord};

pub fn apply(store: &StateStore, seed: &SeedConfig) -> anyhow::Result<()> {
    for org in &seed.organizations {
        store.put_organization(&OrganizationRecord {
            id: org.id,
            name: org.name.clone(),
            invite_code: org.invite_code.clone(),
        })?;
    }
    for user in &seed.users {
        store.put_user(&UserRecord {
            id: user.id,
            username: user.username.clone(),
            organization_id: user.organization_id,
            role: user.role,
        })?;
    }
    info!(
        organizations = seed.organizations.len(),
        users = seed.users.len(),
        "seed records applied"
    );
    Ok(())
}
