//! redb table definitions for the Berth record store.
//!
//! Each table uses `u64` id keys and `&[u8]` values (JSON-serialized records).

use redb::TableDefinition;

/// Organizations keyed by id.
pub const ORGANIZATIONS: TableDefinition<u64, &[u8]> = TableDefinition::new("organizations");

/// Users keyed by id.
pub const USERS: TableDefinition<u64, &[u8]> = TableDefinition::new("users");

/// Clusters (capacity ledger included) keyed by id.
pub const CLUSTERS: TableDefinition<u64, &[u8]> = TableDefinition::new("clusters");

/// Deployment requests keyed by id.
pub const DEPLOYMENTS: TableDefinition<u64, &[u8]> = TableDefinition::new("deployments");

/// Shape shared by every record table.
pub type RecordTable = TableDefinition<'static, u64, &'static [u8]>;
