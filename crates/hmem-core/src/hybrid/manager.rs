//! Hybrid Manager
//!
//! Owns both tiers and moves records between them. Each record follows
//! `Active -> Migrating -> Archived -> Recalling -> Active`; the two
//! in-between states exist only while a transition holds the record's lock.
//!
//! Commits that change which tier holds a record (index ingest + active
//! delete, active insert + index remove) run under the write side of the
//! transition gate. Queries hold the read side for their whole fan-out, so a
//! record is always visible in exactly one tier.
//!
//! Lock order: per-record lock, then the gate.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::locks::{TransitionGuard, TransitionLocks};
use super::run_blocking;
use crate::archive::{ArchivalCodec, ArchiveIndex, ContainerMeta, EncodedChunk};
use crate::config::EngineConfig;
use crate::memory::embeddings::lexical_relevance;
use crate::memory::{
    ActiveStore, AssociationGraph, ClassifyContext, DecayEngine, Embedder, ScanFilter,
    SectorClassifier, cosine_similarity,
};
use crate::types::{ArchiveLocation, ChunkRef, ContainerId, MemoryRecord, Sector, Tier};
use crate::utils::{Clock, validate_content, validate_user_id};
use crate::{HmemError, HmemResult};

/// One fused query result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryHit {
    pub id: String,
    /// Full content for active hits; the indexed summary for archived ones
    pub content: String,
    pub tier: Tier,
    pub score: f64,
    pub sector: Sector,
    /// Current salience, active hits only
    pub salience: Option<f64>,
    pub relevance: f64,
    pub archive_location: Option<ArchiveLocation>,
    pub created_at: DateTime<Utc>,
}

/// Best hit first: higher score, then active before archived, then newer
fn rank_hits(a: &QueryHit, b: &QueryHit) -> Ordering {
    let tier_rank = |t: Tier| match t {
        Tier::Active => 0,
        Tier::Archived => 1,
    };
    b.score
        .total_cmp(&a.score)
        .then_with(|| tier_rank(a.tier).cmp(&tier_rank(b.tier)))
        .then_with(|| b.created_at.cmp(&a.created_at))
}

/// A record that could not be migrated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationFailure {
    pub record_id: String,
    pub user_id: String,
    pub error: String,
}

/// Outcome of a migration sweep
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MigrationReport {
    pub migrated: usize,
    pub failures: Vec<MigrationFailure>,
    pub cancelled: bool,
    pub duration_ms: u64,
}

impl MigrationReport {
    fn fail(&mut self, record: &MemoryRecord, error: &HmemError) {
        tracing::warn!(
            record_id = %record.id,
            user_id = %record.user_id,
            error = %error,
            "Record not migrated"
        );
        self.failures.push(MigrationFailure {
            record_id: record.id.clone(),
            user_id: record.user_id.clone(),
            error: error.to_string(),
        });
    }

    fn absorb(&mut self, other: MigrationReport) {
        self.migrated += other.migrated;
        self.failures.extend(other.failures);
        self.cancelled |= other.cancelled;
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    /// Turn collected per-record failures into an error
    pub fn into_result(self) -> HmemResult<Self> {
        if self.failures.is_empty() {
            Ok(self)
        } else {
            Err(HmemError::MigrationPartialFailure {
                migrated: self.migrated,
                failed: self.failures.len(),
            })
        }
    }
}

/// Per-user storage statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub user_id: String,
    pub active_count: usize,
    pub archived_count: usize,
    /// Mean salience of active records, 0 when there are none
    pub mean_salience: f64,
    pub storage_bytes: u64,
    pub active_bytes: u64,
    pub archive_bytes: u64,
    pub containers: usize,
}

/// A chunk that failed verification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorruptChunk {
    pub offset: Option<u64>,
    pub reason: String,
}

/// Result of verifying one container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerReport {
    pub user_id: String,
    pub container_id: ContainerId,
    pub sealed: bool,
    pub total_chunks: usize,
    pub live_chunks: usize,
    pub decoded: usize,
    pub corrupted: Vec<CorruptChunk>,
}

impl ContainerReport {
    pub fn is_healthy(&self) -> bool {
        self.corrupted.is_empty()
    }
}

enum BatchOutcome {
    Continue,
    /// Archive capacity reached; stop this user's sweep
    Halt,
}

/// Coordinates the active tier, the archive tier and the waypoint graph
pub struct HybridManager {
    config: EngineConfig,
    active: ActiveStore,
    codec: Arc<ArchivalCodec>,
    index: Arc<ArchiveIndex>,
    graph: AssociationGraph,
    decay: DecayEngine,
    classifier: SectorClassifier,
    embedder: Arc<dyn Embedder>,
    clock: Arc<dyn Clock>,
    locks: TransitionLocks,
    gate: RwLock<()>,
    sweeps: DashMap<String, Arc<Mutex<()>>>,
}

impl HybridManager {
    /// Open both tiers under `config.data_dir`, rebuilding the archive index
    /// from container sidecars.
    pub async fn open(
        config: EngineConfig,
        embedder: Arc<dyn Embedder>,
        clock: Arc<dyn Clock>,
    ) -> HmemResult<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.data_dir)?;

        let decay = DecayEngine::new(config.decay.clone());
        let active = ActiveStore::open(&config.database_path(), decay.clone(), clock.clone())?;
        let codec = Arc::new(ArchivalCodec::new(
            config.archive_dir(),
            config.archive.clone(),
            clock.clone(),
        ));
        let graph = AssociationGraph::new(config.association.clone(), decay.clone(), clock.clone());

        let manager = Self {
            active,
            codec,
            index: Arc::new(ArchiveIndex::new()),
            graph,
            decay,
            classifier: SectorClassifier::new(),
            embedder,
            clock,
            locks: TransitionLocks::new(),
            gate: RwLock::new(()),
            sweeps: DashMap::new(),
            config,
        };

        let containers = manager.load_archive().await?;
        let reconciled = manager.reconcile().await?;
        let waypoints = manager.graph.load(&manager.config.waypoints_path())?;
        let stale_waypoints = manager.drop_stale_waypoints().await?;

        tracing::info!(
            data_dir = %manager.config.data_dir.display(),
            containers,
            reconciled,
            waypoints,
            stale_waypoints,
            "Hybrid memory opened"
        );
        Ok(manager)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn graph(&self) -> &AssociationGraph {
        &self.graph
    }

    async fn load_archive(&self) -> HmemResult<usize> {
        let codec = self.codec.clone();
        let metas = run_blocking(move || {
            codec.rebuild_missing_sidecars()?;
            let mut metas = Vec::new();
            for user in codec.users()? {
                metas.extend(codec.list_containers(&user)?);
            }
            Ok(metas)
        })
        .await?;

        for meta in &metas {
            self.index.load_container(meta);
        }
        Ok(metas.len())
    }

    /// Tombstone archive entries whose record is still active; a sweep that
    /// stopped between ingest and delete leaves both copies behind.
    async fn reconcile(&self) -> HmemResult<usize> {
        let mut reconciled = 0;
        let codec_users = {
            let codec = self.codec.clone();
            run_blocking(move || codec.users()).await?
        };

        for user in codec_users {
            for entry in self.index.live_entries(&user) {
                if !self.active.contains(&entry.record_id).await? {
                    continue;
                }
                self.tombstone(entry.chunk_ref.clone()).await?;
                self.index.remove(&entry.chunk_ref);
                reconciled += 1;
                tracing::warn!(
                    record_id = %entry.record_id,
                    container_id = entry.chunk_ref.container_id,
                    "Dropped archive copy of active record"
                );
            }
        }
        Ok(reconciled)
    }

    /// Drop edges whose endpoint left the active tier after the last flush
    async fn drop_stale_waypoints(&self) -> HmemResult<usize> {
        let mut dropped = 0;
        for id in self.graph.nodes() {
            if !self.active.contains(&id).await? {
                dropped += self.graph.remove_node(&id);
            }
        }
        if dropped > 0 {
            tracing::warn!(dropped, "Dropped waypoints to inactive records");
        }
        Ok(dropped)
    }

    async fn encode(&self, user_id: &str, records: Vec<MemoryRecord>) -> HmemResult<Vec<EncodedChunk>> {
        let codec = self.codec.clone();
        let user_id = user_id.to_string();
        run_blocking(move || codec.encode(&user_id, &records)).await
    }

    async fn decode(&self, chunk_ref: ChunkRef) -> HmemResult<MemoryRecord> {
        let codec = self.codec.clone();
        run_blocking(move || codec.decode(&chunk_ref)).await
    }

    async fn tombstone(&self, chunk_ref: ChunkRef) -> HmemResult<()> {
        let codec = self.codec.clone();
        run_blocking(move || codec.tombstone(&chunk_ref)).await
    }

    async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        match self.embedder.embed(text).await {
            Ok(vector) => Some(vector),
            Err(e) => {
                tracing::warn!(error = %e, "Embedding failed; continuing without a vector");
                None
            }
        }
    }

    /// Classify, embed and store new content in the active tier
    pub async fn add_memory(
        &self,
        content: &str,
        user_id: &str,
        hint: Option<Sector>,
    ) -> HmemResult<MemoryRecord> {
        validate_user_id(user_id)?;
        validate_content(content)?;

        let sector = self
            .classifier
            .classify(content, &ClassifyContext::with_hint(hint));
        let mut record = MemoryRecord::new(
            Uuid::new_v4().to_string(),
            user_id,
            content,
            sector,
            self.clock.now(),
        );
        record.embedding = self.embed(content).await;

        {
            let _gate = self.gate.read().await;
            self.active.put(&record).await?;
        }
        let linked = self.graph.observe_access(&record.id, user_id)?;

        tracing::debug!(
            id = %record.id,
            user_id = %user_id,
            sector = %sector,
            linked = linked.len(),
            "Memory added"
        );
        Ok(record)
    }

    /// Search both tiers and fuse the results
    pub async fn query(
        &self,
        text: &str,
        user_id: &str,
        include_archive: bool,
        top_k: usize,
    ) -> HmemResult<Vec<QueryHit>> {
        validate_user_id(user_id)?;
        if top_k == 0 || text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let query_vector = self.embed(text).await;
        let alpha = self.config.query.blend_weight;
        let min_relevance = self.config.query.min_relevance;
        let mut best: HashMap<String, QueryHit> = HashMap::new();
        let mut keep = |hit: QueryHit| match best.get(&hit.id) {
            Some(existing) if rank_hits(&hit, existing) != Ordering::Less => {}
            _ => {
                best.insert(hit.id.clone(), hit);
            }
        };

        {
            let _gate = self.gate.read().await;

            for record in self.active.scan(user_id, &ScanFilter::default()).await? {
                let relevance = match (&query_vector, &record.embedding) {
                    (Some(q), Some(e)) => (cosine_similarity(q, e) as f64).clamp(0.0, 1.0),
                    _ => lexical_relevance(&record.content, text),
                };
                if relevance < min_relevance {
                    continue;
                }
                keep(QueryHit {
                    score: alpha * relevance + (1.0 - alpha) * record.salience,
                    id: record.id,
                    content: record.content,
                    tier: Tier::Active,
                    sector: record.sector,
                    salience: Some(record.salience),
                    relevance,
                    archive_location: None,
                    created_at: record.created_at,
                });
            }

            if include_archive {
                let weight = self.config.query.archive_weight * alpha;
                let mut candidates: Vec<QueryHit> = Vec::new();
                if let Some(q) = &query_vector {
                    candidates.extend(
                        self.index
                            .search(q, top_k.saturating_mul(4), None, user_id)
                            .into_iter()
                            .map(|hit| {
                                let relevance = (hit.similarity as f64).clamp(0.0, 1.0);
                                QueryHit {
                                    id: hit.record_id,
                                    content: hit.summary,
                                    tier: Tier::Archived,
                                    score: weight * relevance,
                                    sector: hit.sector,
                                    salience: None,
                                    relevance,
                                    archive_location: Some(hit.chunk_ref.location()),
                                    created_at: hit.created_at,
                                }
                            }),
                    );
                }
                // entries archived without a vector only match lexically
                candidates.extend(
                    self.index
                        .live_entries(user_id)
                        .into_iter()
                        .filter(|entry| query_vector.is_none() || entry.embedding.is_none())
                        .map(|entry| {
                            let relevance = lexical_relevance(&entry.summary, text);
                            QueryHit {
                                id: entry.record_id,
                                content: entry.summary,
                                tier: Tier::Archived,
                                score: weight * relevance,
                                sector: entry.sector,
                                salience: None,
                                relevance,
                                archive_location: Some(entry.chunk_ref.location()),
                                created_at: entry.created_at,
                            }
                        }),
                );
                for hit in candidates {
                    if hit.relevance >= min_relevance {
                        keep(hit);
                    }
                }
            }
        }

        let mut hits: Vec<QueryHit> = best.into_values().collect();
        hits.sort_by(rank_hits);
        hits.truncate(top_k);

        if self.config.query.reinforce_on_query {
            for hit in hits.iter().filter(|h| h.tier == Tier::Active) {
                let _lock = self.locks.acquire(&hit.id).await;
                match self.active.touch(&hit.id, user_id).await {
                    Ok(_) => {}
                    // migrated since the scan
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e),
                }
            }
        }

        tracing::debug!(user_id = %user_id, hits = hits.len(), include_archive, "Query served");
        Ok(hits)
    }

    fn is_eligible(
        &self,
        record: &MemoryRecord,
        now: DateTime<Utc>,
        age: Duration,
        min_salience: f64,
    ) -> bool {
        now - record.last_accessed_at >= age && record.salience <= min_salience
    }

    /// Migrate eligible records of every user
    pub async fn migrate_eligible(&self, age: Duration, min_salience: f64) -> HmemResult<MigrationReport> {
        self.migrate_eligible_with(age, min_salience, &CancellationToken::new())
            .await
    }

    /// [`Self::migrate_eligible`], stopping between batches once `cancel` fires
    pub async fn migrate_eligible_with(
        &self,
        age: Duration,
        min_salience: f64,
        cancel: &CancellationToken,
    ) -> HmemResult<MigrationReport> {
        let started = Instant::now();
        let mut report = MigrationReport::default();

        for user_id in self.active.users().await? {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            let user_report = self
                .migrate_user_with(&user_id, age, min_salience, cancel)
                .await?;
            report.absorb(user_report);
        }

        let pruned = self.graph.prune();
        self.flush()?;
        report.duration_ms = started.elapsed().as_millis() as u64;

        tracing::info!(
            migrated = report.migrated,
            failed = report.failed(),
            cancelled = report.cancelled,
            pruned_waypoints = pruned,
            duration_ms = report.duration_ms,
            "Migration sweep finished"
        );
        Ok(report)
    }

    /// Migrate eligible records of one user
    pub async fn migrate_user(
        &self,
        user_id: &str,
        age: Duration,
        min_salience: f64,
    ) -> HmemResult<MigrationReport> {
        self.migrate_user_with(user_id, age, min_salience, &CancellationToken::new())
            .await
    }

    pub async fn migrate_user_with(
        &self,
        user_id: &str,
        age: Duration,
        min_salience: f64,
        cancel: &CancellationToken,
    ) -> HmemResult<MigrationReport> {
        let sweep = self.sweeps.entry(user_id.to_string()).or_default().clone();
        let _sweep = sweep.lock().await;

        let now = self.clock.now();
        let mut candidates: Vec<MemoryRecord> = self
            .active
            .scan(user_id, &ScanFilter::default())
            .await?
            .into_iter()
            .filter(|r| self.is_eligible(r, now, age, min_salience))
            .collect();
        candidates.sort_by(|a, b| a.last_accessed_at.cmp(&b.last_accessed_at));

        let mut report = MigrationReport::default();
        for batch in candidates.chunks(self.config.archive.batch_size) {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            match self
                .migrate_batch(user_id, batch, age, min_salience, &mut report)
                .await?
            {
                BatchOutcome::Continue => {}
                BatchOutcome::Halt => break,
            }
        }

        if report.migrated > 0 || !report.failures.is_empty() {
            tracing::info!(
                user_id = %user_id,
                candidates = candidates.len(),
                migrated = report.migrated,
                failed = report.failed(),
                "User sweep finished"
            );
        }
        Ok(report)
    }

    async fn migrate_batch(
        &self,
        user_id: &str,
        batch: &[MemoryRecord],
        age: Duration,
        min_salience: f64,
        report: &mut MigrationReport,
    ) -> HmemResult<BatchOutcome> {
        // claim: skip records another transition holds, re-check the rest
        let mut claimed: Vec<(TransitionGuard, MemoryRecord)> = Vec::with_capacity(batch.len());
        for candidate in batch {
            let Some(guard) = self.locks.try_acquire(&candidate.id) else {
                tracing::debug!(record_id = %candidate.id, "Busy; left for the next sweep");
                continue;
            };
            match self.active.find(&candidate.id).await? {
                Some(record)
                    if record.user_id == user_id
                        && self.is_eligible(&record, self.clock.now(), age, min_salience) =>
                {
                    claimed.push((guard, record));
                }
                _ => {}
            }
        }
        if claimed.is_empty() {
            return Ok(BatchOutcome::Continue);
        }

        for (_, record) in claimed.iter_mut() {
            if record.embedding.is_some() {
                continue;
            }
            record.embedding = self.embed(&record.content).await;
            if let Some(vector) = &record.embedding {
                if let Err(e) = self.active.set_embedding(&record.id, vector).await {
                    tracing::warn!(record_id = %record.id, error = %e, "Failed to store computed embedding");
                }
            }
        }

        let records: Vec<MemoryRecord> = claimed.iter().map(|(_, r)| r.clone()).collect();
        let mut outcome = BatchOutcome::Continue;
        let results: Vec<HmemResult<EncodedChunk>> = match self.encode(user_id, records.clone()).await {
            Ok(chunks) => chunks.into_iter().map(Ok).collect(),
            Err(e) if e.is_capacity() => {
                for record in &records {
                    report.fail(record, &e);
                }
                return Ok(BatchOutcome::Halt);
            }
            Err(e) => {
                tracing::warn!(
                    user_id = %user_id,
                    error = %e,
                    "Batch encode failed; retrying records one at a time"
                );
                let mut results = Vec::with_capacity(records.len());
                for record in &records {
                    if matches!(outcome, BatchOutcome::Halt) {
                        results.push(Err(HmemError::capacity("archive full")));
                        continue;
                    }
                    let result = self
                        .encode(user_id, vec![record.clone()])
                        .await
                        .and_then(|chunks| {
                            chunks
                                .into_iter()
                                .next()
                                .ok_or_else(|| HmemError::invalid_operation("encoder returned no chunk"))
                        });
                    if result.as_ref().is_err_and(|e| e.is_capacity()) {
                        outcome = BatchOutcome::Halt;
                    }
                    results.push(result);
                }
                results
            }
        };

        // commit: the record leaves the active tier in the same critical
        // section that makes it visible in the archive
        let mut orphans = Vec::new();
        {
            let _gate = self.gate.write().await;
            for ((_, record), result) in claimed.iter().zip(results) {
                let chunk = match result {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        report.fail(record, &e);
                        continue;
                    }
                };
                self.index.ingest(std::slice::from_ref(&chunk));
                match self.active.delete(&record.id, user_id).await {
                    Ok(()) => {
                        self.graph.remove_node(&record.id);
                        report.migrated += 1;
                    }
                    Err(e) => {
                        self.index.remove(&chunk.chunk_ref);
                        orphans.push(chunk.chunk_ref);
                        report.fail(record, &e);
                    }
                }
            }
        }

        for chunk_ref in orphans {
            if let Err(e) = self.tombstone(chunk_ref).await {
                tracing::warn!(error = %e, "Orphaned chunk not tombstoned; reconciled on next open");
            }
        }
        Ok(outcome)
    }

    /// Bring an archived record back into the active tier.
    ///
    /// Recall counts as a fresh access: `access_count = 1` and the decay
    /// clock restarts.
    pub async fn recall(&self, id: &str, user_id: Option<&str>) -> HmemResult<MemoryRecord> {
        let _lock = self.locks.acquire(id).await;

        if self.active.contains(id).await? {
            return Err(HmemError::not_found("archived memory", id));
        }
        let entry = self
            .index
            .locate(id)
            .ok_or_else(|| HmemError::not_found("archived memory", id))?;
        let owner = entry.chunk_ref.user_id.clone();
        if let Some(user_id) = user_id {
            if user_id != owner {
                return Err(HmemError::not_authorized(user_id, id));
            }
        }

        let mut record = self.decode(entry.chunk_ref.clone()).await?;
        let now = self.clock.now();
        record.mark_active();
        record.access_count = 1;
        record.last_accessed_at = now;
        record.salience = self.decay.salience(&record, now);

        {
            let _gate = self.gate.write().await;
            self.active.put(&record).await?;
            self.index.remove(&entry.chunk_ref);
        }
        if let Err(e) = self.tombstone(entry.chunk_ref.clone()).await {
            tracing::warn!(
                record_id = %id,
                error = %e,
                "Recalled chunk not tombstoned; reconciled on next open"
            );
        }
        self.graph.observe_access(id, &owner)?;

        tracing::info!(
            record_id = %id,
            user_id = %owner,
            container_id = entry.chunk_ref.container_id,
            "Memory recalled"
        );
        Ok(record)
    }

    /// Read a record. Active reads count as an access; archived records are
    /// returned as a decoded view and stay archived.
    pub async fn get_memory(&self, id: &str, user_id: &str) -> HmemResult<MemoryRecord> {
        let _lock = self.locks.acquire(id).await;

        match self.active.touch(id, user_id).await {
            Ok(record) => {
                self.graph.observe_access(id, user_id)?;
                Ok(record)
            }
            Err(e) if e.is_not_found() => {
                let entry = self
                    .index
                    .locate(id)
                    .ok_or_else(|| HmemError::not_found("memory", id))?;
                if entry.chunk_ref.user_id != user_id {
                    return Err(HmemError::not_authorized(user_id, id));
                }
                let mut record = self.decode(entry.chunk_ref).await?;
                record.salience = self.decay.salience(&record, self.clock.now());
                Ok(record)
            }
            Err(e) => Err(e),
        }
    }

    /// Delete a record from whichever tier holds it, with its waypoints.
    /// Returns the tier it was deleted from.
    pub async fn delete_memory(&self, id: &str, user_id: &str) -> HmemResult<Tier> {
        let _lock = self.locks.acquire(id).await;
        let _gate = self.gate.write().await;

        match self.active.delete(id, user_id).await {
            Ok(()) => {
                self.graph.remove_node(id);
                tracing::info!(record_id = %id, user_id = %user_id, "Deleted active memory");
                Ok(Tier::Active)
            }
            Err(e) if e.is_not_found() => {
                let entry = self
                    .index
                    .locate(id)
                    .ok_or_else(|| HmemError::not_found("memory", id))?;
                if entry.chunk_ref.user_id != user_id {
                    return Err(HmemError::not_authorized(user_id, id));
                }
                self.tombstone(entry.chunk_ref.clone()).await?;
                self.index.remove(&entry.chunk_ref);
                tracing::info!(record_id = %id, user_id = %user_id, "Deleted archived memory");
                Ok(Tier::Archived)
            }
            Err(e) => Err(e),
        }
    }

    /// Strongest waypoints of an active record; archived records have none
    pub async fn neighbors(&self, id: &str, user_id: &str, k: usize) -> HmemResult<Vec<(String, f64)>> {
        match self.active.get(id, user_id).await {
            Ok(_) => Ok(self.graph.neighbors(id, k)),
            Err(e) if e.is_not_found() => match self.index.locate(id) {
                Some(entry) if entry.chunk_ref.user_id == user_id => Ok(Vec::new()),
                Some(_) => Err(HmemError::not_authorized(user_id, id)),
                None => Err(e),
            },
            Err(e) => Err(e),
        }
    }

    /// Most salient active records of a user
    pub async fn top_memories(&self, user_id: &str, k: usize) -> HmemResult<Vec<MemoryRecord>> {
        self.active.rank_by_salience(user_id, k).await
    }

    pub async fn stats(&self, user_id: &str) -> HmemResult<Stats> {
        let records = self.active.scan(user_id, &ScanFilter::default()).await?;
        let mean_salience = if records.is_empty() {
            0.0
        } else {
            records.iter().map(|r| r.salience).sum::<f64>() / records.len() as f64
        };
        let active_bytes = self.active.storage_bytes(user_id).await?;

        let codec = self.codec.clone();
        let user = user_id.to_string();
        let (archive_bytes, containers) = run_blocking(move || {
            Ok((codec.storage_bytes(&user)?, codec.list_containers(&user)?.len()))
        })
        .await?;

        Ok(Stats {
            user_id: user_id.to_string(),
            active_count: records.len(),
            archived_count: self.index.live_count(user_id),
            mean_salience,
            storage_bytes: active_bytes + archive_bytes,
            active_bytes,
            archive_bytes,
            containers,
        })
    }

    /// Decode every live chunk of a container and report the damaged ones
    pub async fn verify_container(&self, user_id: &str, container_id: ContainerId) -> HmemResult<ContainerReport> {
        let codec = self.codec.clone();
        let user = user_id.to_string();
        let (meta, decoded) = run_blocking(move || {
            let meta = codec.load_meta(&user, container_id).ok();
            let decoded = codec.decode_all(&user, container_id)?;
            Ok((meta, decoded))
        })
        .await?;

        let corrupted: Vec<CorruptChunk> = decoded
            .errors
            .iter()
            .map(|e| match e {
                HmemError::Corruption { offset, reason, .. } => CorruptChunk {
                    offset: Some(*offset),
                    reason: reason.clone(),
                },
                other => CorruptChunk {
                    offset: None,
                    reason: other.to_string(),
                },
            })
            .collect();

        let report = ContainerReport {
            user_id: user_id.to_string(),
            container_id,
            sealed: meta.as_ref().is_some_and(ContainerMeta::is_sealed),
            total_chunks: meta.as_ref().map_or(decoded.records.len() + corrupted.len(), |m| m.chunks.len()),
            live_chunks: meta
                .as_ref()
                .map_or(decoded.records.len() + corrupted.len(), |m| m.live_chunks().count()),
            decoded: decoded.records.len(),
            corrupted,
        };
        if !report.is_healthy() {
            tracing::warn!(
                user_id = %user_id,
                container_id,
                corrupted = report.corrupted.len(),
                "Container verification found damaged chunks"
            );
        }
        Ok(report)
    }

    /// Rebuild a container's sidecar from its bytes and reload its index
    /// segment. Known tombstones are carried over.
    pub async fn rebuild_container_index(&self, user_id: &str, container_id: ContainerId) -> HmemResult<usize> {
        let _gate = self.gate.write().await;

        let codec = self.codec.clone();
        let user = user_id.to_string();
        let meta = run_blocking(move || {
            let tombstoned: Vec<u64> = match codec.load_meta(&user, container_id) {
                Ok(previous) => previous
                    .chunks
                    .iter()
                    .filter(|c| c.tombstoned)
                    .map(|c| c.offset)
                    .collect(),
                Err(e) if e.is_not_found() => Vec::new(),
                Err(e) => {
                    tracing::warn!(error = %e, "Previous sidecar unreadable; tombstones lost");
                    Vec::new()
                }
            };
            let meta = codec.rebuild_sidecar(&user, container_id)?;
            for chunk in meta.chunks.iter().filter(|c| tombstoned.contains(&c.offset)) {
                codec.tombstone(&meta.chunk_ref(chunk))?;
            }
            codec.load_meta(&user, container_id)
        })
        .await?;

        self.index.load_container(&meta);
        let mut live = 0;
        for chunk in meta.live_chunks() {
            if self.active.contains(&chunk.record_id).await? {
                let chunk_ref = meta.chunk_ref(chunk);
                self.tombstone(chunk_ref.clone()).await?;
                self.index.remove(&chunk_ref);
            } else {
                live += 1;
            }
        }
        Ok(live)
    }

    /// Drop tombstoned entries from the in-memory archive index
    pub fn compact_index(&self) -> usize {
        let dropped = self.index.compact();
        tracing::info!(dropped, "Archive index compacted");
        dropped
    }

    /// Persist the waypoint graph
    pub fn flush(&self) -> HmemResult<()> {
        self.graph.save(&self.config.waypoints_path())
    }
}
