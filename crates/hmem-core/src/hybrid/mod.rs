//! Hybrid Lifecycle
//!
//! Coordination between the active and archive tiers:
//!
//! - **manager** - add, query, migrate, recall, delete
//! - **scheduler** - periodic, cancellable archival sweeps
//! - **locks** - per-record transition locks

pub mod locks;
pub mod manager;
pub mod scheduler;

pub use locks::{TransitionGuard, TransitionLocks};
pub use manager::{
    ContainerReport, CorruptChunk, HybridManager, MigrationFailure, MigrationReport, QueryHit,
    Stats,
};
pub use scheduler::{ArchivalScheduler, RunNowOutcome, SchedulerAction, SchedulerStatus};

use crate::HmemResult;

/// Run blocking file I/O off the async workers
pub(crate) async fn run_blocking<T, F>(f: F) -> HmemResult<T>
where
    F: FnOnce() -> HmemResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(anyhow::Error::from)?
}
