//! Engine Entry Point
//!
//! Ties the hybrid manager, the archival scheduler and the file indexer
//! together behind one protocol-independent surface.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::files::{FileHit, FileIndexStats, FileIndexer, IndexDirectoryResult, IndexFileResult};
use crate::hybrid::{
    ArchivalScheduler, ContainerReport, HybridManager, MigrationFailure, RunNowOutcome,
    SchedulerAction, SchedulerStatus, Stats,
};
use crate::memory::Embedder;
use crate::types::{ContainerId, MemoryRecord, Sector, Tier};
use crate::utils::{Clock, SystemClock};
use crate::{HmemError, HmemResult};

fn default_include_archive() -> bool {
    true
}

fn default_top_k() -> usize {
    10
}

/// Result of storing a memory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddMemoryResponse {
    pub id: String,
    pub sector: Sector,
    pub salience: f64,
}

/// Hybrid query parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryMemoryRequest {
    pub text: String,
    pub user_id: String,
    #[serde(default = "default_include_archive")]
    pub include_archive: bool,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl QueryMemoryRequest {
    pub fn new(text: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            user_id: user_id.into(),
            include_archive: default_include_archive(),
            top_k: default_top_k(),
        }
    }

    pub fn active_only(mut self) -> Self {
        self.include_archive = false;
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }
}

/// One query result. Archived hits carry their indexed summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryHit {
    pub id: String,
    pub content: String,
    pub tier: Tier,
    pub score: f64,
    pub sector: Sector,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArchiveResponse {
    pub migrated_count: usize,
    pub errors: Vec<MigrationFailure>,
    pub cancelled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecallResponse {
    pub id: String,
    pub content: String,
    pub tier: Tier,
}

/// Hybrid memory engine
///
/// # Example
///
/// ```rust,no_run
/// use hmem_core::{Engine, EngineConfig, QueryMemoryRequest};
///
/// async fn example() -> hmem_core::HmemResult<()> {
///     let engine = Engine::open(EngineConfig::new("/tmp/hmem")).await?;
///
///     engine.add_memory("Deploy with `make release`", "alice", None).await?;
///     let hits = engine
///         .query_memory(QueryMemoryRequest::new("how do I deploy", "alice"))
///         .await?;
///
///     engine.shutdown().await?;
///     Ok(())
/// }
/// ```
pub struct Engine {
    manager: Arc<HybridManager>,
    scheduler: ArchivalScheduler,
    files: FileIndexer,
}

impl Engine {
    /// Open with the default embedder and the system clock
    pub async fn open(config: EngineConfig) -> HmemResult<Self> {
        Self::open_with(config, default_embedder(), Arc::new(SystemClock)).await
    }

    pub async fn open_with(
        config: EngineConfig,
        embedder: Arc<dyn Embedder>,
        clock: Arc<dyn Clock>,
    ) -> HmemResult<Self> {
        let files = FileIndexer::open(&config, embedder.clone(), clock.clone()).await?;
        let scheduler_config = config.scheduler.clone();
        let manager = Arc::new(HybridManager::open(config, embedder, clock).await?);
        let scheduler = ArchivalScheduler::spawn(manager.clone(), scheduler_config);

        Ok(Self {
            manager,
            scheduler,
            files,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        self.manager.config()
    }

    pub fn manager(&self) -> &Arc<HybridManager> {
        &self.manager
    }

    pub fn scheduler(&self) -> &ArchivalScheduler {
        &self.scheduler
    }

    pub fn files(&self) -> &FileIndexer {
        &self.files
    }

    pub async fn add_memory(
        &self,
        content: &str,
        user_id: &str,
        sector_hint: Option<Sector>,
    ) -> HmemResult<AddMemoryResponse> {
        let record = self.manager.add_memory(content, user_id, sector_hint).await?;
        Ok(AddMemoryResponse {
            id: record.id,
            sector: record.sector,
            salience: record.salience,
        })
    }

    pub async fn query_memory(&self, request: QueryMemoryRequest) -> HmemResult<Vec<MemoryHit>> {
        let hits = self
            .manager
            .query(
                &request.text,
                &request.user_id,
                request.include_archive,
                request.top_k,
            )
            .await?;
        Ok(hits
            .into_iter()
            .map(|hit| MemoryHit {
                id: hit.id,
                content: hit.content,
                tier: hit.tier,
                score: hit.score,
                sector: hit.sector,
            })
            .collect())
    }

    /// Run one migration sweep over every user
    pub async fn archive_memories(&self, age_days: u32, min_salience: f64) -> HmemResult<ArchiveResponse> {
        if !(0.0..=1.0).contains(&min_salience) {
            return Err(HmemError::invalid_operation(
                "min_salience must be between 0 and 1",
            ));
        }
        let report = self
            .manager
            .migrate_eligible(chrono::Duration::days(i64::from(age_days)), min_salience)
            .await?;
        Ok(ArchiveResponse {
            migrated_count: report.migrated,
            errors: report.failures,
            cancelled: report.cancelled,
        })
    }

    /// Bring an archived memory back into the active tier. Without
    /// `user_id` the owner recorded in the archive is used.
    pub async fn recall_memory(&self, id: &str, user_id: Option<&str>) -> HmemResult<RecallResponse> {
        let record = self.manager.recall(id, user_id).await?;
        Ok(RecallResponse {
            tier: record.tier(),
            id: record.id,
            content: record.content,
        })
    }

    pub async fn get_memory(&self, id: &str, user_id: &str) -> HmemResult<MemoryRecord> {
        self.manager.get_memory(id, user_id).await
    }

    /// Delete a memory from whichever tier holds it
    pub async fn delete_memory(&self, id: &str, user_id: &str) -> HmemResult<Tier> {
        self.manager.delete_memory(id, user_id).await
    }

    pub async fn neighbors(&self, id: &str, user_id: &str, k: usize) -> HmemResult<Vec<(String, f64)>> {
        self.manager.neighbors(id, user_id, k).await
    }

    pub async fn top_memories(&self, user_id: &str, k: usize) -> HmemResult<Vec<MemoryRecord>> {
        self.manager.top_memories(user_id, k).await
    }

    pub async fn get_stats(&self, user_id: &str) -> HmemResult<Stats> {
        self.manager.stats(user_id).await
    }

    pub async fn scheduler_status(&self) -> SchedulerStatus {
        self.scheduler.status().await
    }

    /// Start, stop or trigger the scheduler; `RunNow` waits for the sweep
    pub async fn scheduler_control(&self, action: SchedulerAction) -> HmemResult<Option<RunNowOutcome>> {
        self.scheduler.control(action).await
    }

    pub async fn index_file(&self, path: &Path, preserve_lines: bool) -> HmemResult<IndexFileResult> {
        self.files.index_file(path, preserve_lines).await
    }

    pub async fn index_directory(
        &self,
        dir: &Path,
        pattern: Option<&str>,
        exclude: &[String],
    ) -> HmemResult<IndexDirectoryResult> {
        self.files.index_directory(dir, pattern, exclude).await
    }

    pub async fn search_files(
        &self,
        query: &str,
        file_type_filter: Option<&str>,
        top_k: usize,
    ) -> HmemResult<Vec<FileHit>> {
        self.files.search_files(query, file_type_filter, top_k).await
    }

    pub async fn file_stats(&self) -> HmemResult<FileIndexStats> {
        self.files.stats().await
    }

    pub async fn verify_container(&self, user_id: &str, container_id: ContainerId) -> HmemResult<ContainerReport> {
        self.manager.verify_container(user_id, container_id).await
    }

    /// Reload one container's entries from its bytes; returns live chunks
    pub async fn rebuild_container_index(&self, user_id: &str, container_id: ContainerId) -> HmemResult<usize> {
        self.manager.rebuild_container_index(user_id, container_id).await
    }

    /// Drop tombstoned entries from the in-memory archive index
    pub fn compact_archive_index(&self) -> usize {
        self.manager.compact_index()
    }

    /// Stop the scheduler and persist in-memory state
    pub async fn shutdown(&self) -> HmemResult<()> {
        self.scheduler.shutdown().await;
        self.manager.flush()?;
        tracing::info!("Engine shut down");
        Ok(())
    }
}

#[cfg(feature = "embeddings")]
fn default_embedder() -> Arc<dyn Embedder> {
    Arc::new(crate::memory::FastEmbedder::new())
}

#[cfg(not(feature = "embeddings"))]
fn default_embedder() -> Arc<dyn Embedder> {
    Arc::new(crate::memory::HashEmbedder::default())
}
