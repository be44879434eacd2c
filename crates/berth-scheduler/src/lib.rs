//! berth-scheduler: admission, resource queues, dispatch and completion.
//!
//! Deployments are submitted against a cluster with a fixed three-dimension
//! capacity. The [`Engine`] admits each one straight to `Running` when it
//! fits, parks it in a per-tier [`ResourceQueue`] when it does not fit yet,
//! and rejects it when it can never fit. Whenever a running deployment
//! completes, a dispatch pass packs queued work onto the freed capacity,
//! highest tier first.
//!
//! # Architecture
//!
//! ```text
//! admit ──────────────┐
//!                     ├── ClusterLocks ── StateStore (records, allocation)
//! completion events ──┤                 ├── ResourceQueue (pending)
//!   (CompletionTimer) │                 └── Scheduler ── PackingStrategy
//! trigger_dispatch ───┘
//! ```

pub mod admission;
pub mod completion;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod lock;
pub mod queue;
pub mod reconcile;
pub mod scheduler;
pub mod timer;

pub use admission::{Admission, AdmitRequest};
pub use dispatch::{DispatchReport, PassOutcome};
pub use engine::{Engine, RetryPolicy};
pub use error::{SchedulerError, SchedulerResult};
pub use lock::{ClusterGuard, ClusterLocks};
pub use queue::{MemoryOrderedStore, OrderedStore, QueueFault, ResourceQueue};
pub use reconcile::ReconcileReport;
pub use scheduler::{Scheduler, select_strategy};
pub use timer::{CompletionEvent, CompletionTimer};
