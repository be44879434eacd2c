//! berth-state: embedded record store for Berth.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! storage for organizations, users, clusters, and deployment requests.
//!
//! # Architecture
//!
//! All records are JSON-serialized into redb's `&[u8]` value columns and
//! keyed by their numeric id. Ids are allocated inside the insert
//! transaction, one past the table's current last key.
//!
//! The store does not serialize read-modify-write sequences on its own:
//! callers that mutate a cluster and its deployments together hold the
//! scheduler's per-cluster lock.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
