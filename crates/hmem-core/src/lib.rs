//! Hybrid Memory Engine
//!
//! A two-tier memory store. Recent and salient memories live in a SQLite
//! active tier where salience decays with time and recovers with access.
//! Memories that fall below the salience threshold migrate into compressed,
//! checksummed archive containers that stay searchable through an in-memory
//! similarity index, and can be recalled back to the active tier.
//!
//! # Modules
//!
//! - **memory** - active tier: sectors, decay, waypoints, SQLite store, embeddings
//! - **archive** - container codec, chunk frame format, archive index
//! - **hybrid** - tier transitions, fused queries, archival scheduler
//! - **files** - indexing files into their own archive namespace
//! - **engine** - the protocol-independent entry point
//!
//! # Example
//!
//! ```rust,no_run
//! use hmem_core::{Engine, EngineConfig, QueryMemoryRequest};
//!
//! async fn example() -> hmem_core::HmemResult<()> {
//!     let engine = Engine::open(EngineConfig::new("/tmp/hmem")).await?;
//!
//!     engine.add_memory("Standup moved to 9:30", "alice", None).await?;
//!     let hits = engine
//!         .query_memory(QueryMemoryRequest::new("standup", "alice"))
//!         .await?;
//!     for hit in hits {
//!         println!("{} [{}] {:.3}", hit.content, hit.tier, hit.score);
//!     }
//!
//!     engine.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod config;
pub mod engine;
pub mod files;
pub mod hybrid;
pub mod memory;
pub mod types;
pub mod utils;

mod error;

pub use config::{
    ArchiveConfig, AssociationConfig, ConfigValidationError, DecayConfig, EngineConfig,
    FileIndexConfig, IndexContent, QueryConfig, SchedulerConfig, SectorRates,
};
pub use engine::{
    AddMemoryResponse, ArchiveResponse, Engine, MemoryHit, QueryMemoryRequest, RecallResponse,
};
pub use error::{HmemError, HmemResult};
pub use files::{FileHit, FileIndexStats, FileIndexer, IndexDirectoryResult, IndexFileResult, IndexStatus};
pub use hybrid::{
    ArchivalScheduler, ContainerReport, HybridManager, MigrationReport, QueryHit, RunNowOutcome,
    SchedulerAction, SchedulerStatus, Stats,
};
pub use memory::{Embedder, HashEmbedder};
pub use types::{ArchiveLocation, ChunkRef, ContainerId, LineRange, MemoryRecord, Sector, SourceRef, Tier};
pub use utils::{Clock, ManualClock, SystemClock};
