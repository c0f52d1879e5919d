//! Archival Codec
//!
//! Per-user, append-only containers of self-describing chunks. Layout:
//!
//! ```text
//! <root>/<user-key>/00000001.hmc    chunk frames, back to back
//! <root>/<user-key>/00000001.json   sidecar: offsets, ids, embeddings, tombstones
//! ```
//!
//! Writes for one user are serialized; bytes are appended and synced before
//! the sidecar is atomically replaced, so the sidecar never points at bytes
//! that are not on disk. Readers take no locks.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::format::{self, ArchivedRecord, DecodedFrame, FORMAT_VERSION, PREAMBLE_LEN};
use crate::config::{ArchiveConfig, IndexContent};
use crate::types::{ArchiveLocation, ChunkRef, ContainerId, MemoryRecord, Sector, SourceRef};
use crate::utils::{Clock, short_hash};
use crate::{HmemError, HmemResult};

const CONTAINER_EXT: &str = "hmc";
const SIDECAR_EXT: &str = "json";

/// Sidecar entry for one chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMeta {
    pub record_id: String,
    pub offset: u64,
    pub length: u64,
    /// Hex trailer digest of the frame
    pub checksum: String,
    pub sector: Sector,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub embedding: Option<Vec<f32>>,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceRef>,
    #[serde(default)]
    pub tombstoned: bool,
}

/// Sidecar for one container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerMeta {
    pub format_version: u8,
    pub container_id: ContainerId,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub sealed_at: Option<DateTime<Utc>>,
    /// Committed length of the container file
    pub end_offset: u64,
    pub chunks: Vec<ChunkMeta>,
}

impl ContainerMeta {
    fn new(user_id: &str, container_id: ContainerId, now: DateTime<Utc>) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            container_id,
            user_id: user_id.to_string(),
            created_at: now,
            sealed_at: None,
            end_offset: 0,
            chunks: Vec::new(),
        }
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed_at.is_some()
    }

    pub fn live_chunks(&self) -> impl Iterator<Item = &ChunkMeta> {
        self.chunks.iter().filter(|c| !c.tombstoned)
    }

    pub fn chunk_ref(&self, chunk: &ChunkMeta) -> ChunkRef {
        ChunkRef {
            user_id: self.user_id.clone(),
            container_id: self.container_id,
            offset: chunk.offset,
            length: chunk.length,
        }
    }
}

/// One freshly written chunk
#[derive(Debug, Clone)]
pub struct EncodedChunk {
    pub chunk_ref: ChunkRef,
    pub meta: ChunkMeta,
}

/// Outcome of decoding a whole container
#[derive(Debug, Default)]
pub struct DecodeAllReport {
    pub records: Vec<MemoryRecord>,
    /// One error per chunk that failed; siblings are unaffected
    pub errors: Vec<HmemError>,
}

/// A container being extended by the current batch
struct Pending {
    meta: ContainerMeta,
    original: Option<ContainerMeta>,
    buffer: Vec<u8>,
}

/// Encoder/decoder for archive containers
pub struct ArchivalCodec {
    root: PathBuf,
    config: ArchiveConfig,
    clock: Arc<dyn Clock>,
    writers: DashMap<String, Arc<Mutex<()>>>,
}

impl ArchivalCodec {
    pub fn new(root: impl Into<PathBuf>, config: ArchiveConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            root: root.into(),
            config,
            clock,
            writers: DashMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn writer(&self, user_id: &str) -> Arc<Mutex<()>> {
        self.writers.entry(user_id.to_string()).or_default().clone()
    }

    fn user_dir(&self, user_id: &str) -> PathBuf {
        self.root.join(short_hash(user_id))
    }

    fn container_path(&self, user_id: &str, container_id: ContainerId) -> PathBuf {
        self.user_dir(user_id)
            .join(format!("{:08}.{}", container_id, CONTAINER_EXT))
    }

    fn sidecar_path(&self, user_id: &str, container_id: ContainerId) -> PathBuf {
        self.user_dir(user_id)
            .join(format!("{:08}.{}", container_id, SIDECAR_EXT))
    }

    fn summarize(&self, content: &str) -> String {
        match self.config.index_content {
            IndexContent::Full => content.to_string(),
            IndexContent::Summary => content.chars().take(self.config.summary_chars).collect(),
        }
    }

    fn chunk_meta(&self, record: &ArchivedRecord, offset: u64, length: u64, checksum: String) -> ChunkMeta {
        ChunkMeta {
            record_id: record.id.clone(),
            offset,
            length,
            checksum,
            sector: record.sector,
            created_at: record.created_at,
            last_accessed_at: record.last_accessed_at,
            embedding: record.embedding.clone(),
            summary: self.summarize(&record.content),
            source: record.source.clone(),
            tombstoned: false,
        }
    }

    /// Read a container's sidecar
    pub fn load_meta(&self, user_id: &str, container_id: ContainerId) -> HmemResult<ContainerMeta> {
        let path = self.sidecar_path(user_id, container_id);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(HmemError::not_found(
                    "container",
                    format!("{}/{}", user_id, container_id),
                ));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn write_meta(&self, meta: &ContainerMeta) -> HmemResult<()> {
        let path = self.sidecar_path(&meta.user_id, meta.container_id);
        let tmp = path.with_extension("json.tmp");
        {
            let mut file = File::create(&tmp).map_err(HmemError::from_write)?;
            file.write_all(&serde_json::to_vec_pretty(meta)?)
                .map_err(HmemError::from_write)?;
            file.sync_all().map_err(HmemError::from_write)?;
        }
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Container ids present on disk for a user, ascending
    fn container_ids(&self, user_id: &str, ext: &str) -> HmemResult<Vec<ContainerId>> {
        Self::ids_in(&self.user_dir(user_id), ext)
    }

    fn ids_in(dir: &Path, ext: &str) -> HmemResult<Vec<ContainerId>> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ext) {
                continue;
            }
            if let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<ContainerId>().ok())
            {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    /// All sidecars of a user, ascending by container id
    pub fn list_containers(&self, user_id: &str) -> HmemResult<Vec<ContainerMeta>> {
        self.container_ids(user_id, SIDECAR_EXT)?
            .into_iter()
            .map(|id| self.load_meta(user_id, id))
            .collect()
    }

    /// Users that own at least one container sidecar
    pub fn users(&self) -> HmemResult<Vec<String>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut users = Vec::new();
        for entry in entries {
            let dir = entry?.path();
            if !dir.is_dir() {
                continue;
            }
            let Some(first) = Self::ids_in(&dir, SIDECAR_EXT)?.into_iter().next() else {
                continue;
            };
            let sidecar = dir.join(format!("{:08}.{}", first, SIDECAR_EXT));
            let meta: ContainerMeta = serde_json::from_slice(&fs::read(sidecar)?)?;
            users.push(meta.user_id);
        }
        users.sort();
        Ok(users)
    }

    /// Bytes of container files held for a user
    pub fn storage_bytes(&self, user_id: &str) -> HmemResult<u64> {
        let mut total = 0;
        for id in self.container_ids(user_id, CONTAINER_EXT)? {
            total += fs::metadata(self.container_path(user_id, id))?.len();
        }
        Ok(total)
    }

    /// Append records to the user's open container, opening and sealing
    /// containers as the chunk threshold is reached.
    ///
    /// The batch is all-or-nothing: on failure every touched container is
    /// truncated back and its sidecar restored.
    pub fn encode(&self, user_id: &str, records: &[MemoryRecord]) -> HmemResult<Vec<EncodedChunk>> {
        if records.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(stranger) = records.iter().find(|r| r.user_id != user_id) {
            return Err(HmemError::not_authorized(user_id, &stranger.id));
        }

        let writer = self.writer(user_id);
        let _guard = writer.lock();
        fs::create_dir_all(self.user_dir(user_id)).map_err(HmemError::from_write)?;

        let now = self.clock.now();
        let mut used = self.storage_bytes(user_id)?;
        let first = match self.list_containers(user_id)?.pop() {
            Some(meta) if !meta.is_sealed() => Pending {
                original: Some(meta.clone()),
                meta,
                buffer: Vec::new(),
            },
            last => Pending {
                meta: ContainerMeta::new(user_id, last.map_or(1, |m| m.container_id + 1), now),
                original: None,
                buffer: Vec::new(),
            },
        };
        let mut pending = vec![first];
        let mut encoded = Vec::with_capacity(records.len());

        for record in records {
            let current = pending.len() - 1;
            if pending[current].meta.chunks.len() >= self.config.max_chunks_per_container {
                pending[current].meta.sealed_at = Some(now);
                let next = pending[current].meta.container_id + 1;
                pending.push(Pending {
                    meta: ContainerMeta::new(user_id, next, now),
                    original: None,
                    buffer: Vec::new(),
                });
            }
            let target = pending.len() - 1;
            let p = &mut pending[target];

            let frame = format::encode_frame(record, self.config.compress)?;
            let length = frame.len() as u64;
            if let Some(max) = self.config.max_bytes_per_user {
                if used + length > max {
                    return Err(HmemError::capacity(format!(
                        "user {} would exceed {} archive bytes",
                        user_id, max
                    )));
                }
            }
            used += length;

            let offset = p.meta.end_offset + p.buffer.len() as u64;
            let decoded: DecodedFrame = format::decode_frame(&frame, p.meta.container_id, offset)?;
            let meta = self.chunk_meta(&decoded.record, offset, length, decoded.digest);
            encoded.push(EncodedChunk {
                chunk_ref: ChunkRef {
                    user_id: user_id.to_string(),
                    container_id: p.meta.container_id,
                    offset,
                    length,
                },
                meta: meta.clone(),
            });
            p.meta.chunks.push(meta);
            p.buffer.extend_from_slice(&frame);
        }

        if let Some(last) = pending.last_mut() {
            if last.meta.chunks.len() >= self.config.max_chunks_per_container {
                last.meta.sealed_at = Some(now);
            }
        }

        for i in 0..pending.len() {
            let result = self.append(&pending[i]).and_then(|_| {
                let mut meta = pending[i].meta.clone();
                meta.end_offset += pending[i].buffer.len() as u64;
                self.write_meta(&meta)
            });
            if let Err(e) = result {
                tracing::warn!(user_id = %user_id, error = %e, "Archive write failed, rolling back batch");
                for p in &pending[..=i] {
                    self.rollback(p);
                }
                return Err(e);
            }
        }

        tracing::debug!(
            user_id = %user_id,
            chunks = encoded.len(),
            containers = pending.len(),
            "Encoded archive batch"
        );
        Ok(encoded)
    }

    fn append(&self, p: &Pending) -> HmemResult<()> {
        if p.buffer.is_empty() {
            return Ok(());
        }
        let path = self.container_path(&p.meta.user_id, p.meta.container_id);
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(HmemError::from_write)?;

        // bytes past the committed end belong to an interrupted write
        if file.metadata()?.len() != p.meta.end_offset {
            file.set_len(p.meta.end_offset).map_err(HmemError::from_write)?;
        }
        file.seek(SeekFrom::Start(p.meta.end_offset))?;
        file.write_all(&p.buffer).map_err(HmemError::from_write)?;
        file.sync_data().map_err(HmemError::from_write)?;
        Ok(())
    }

    fn rollback(&self, p: &Pending) {
        let path = self.container_path(&p.meta.user_id, p.meta.container_id);
        let result = match &p.original {
            Some(original) => OpenOptions::new()
                .write(true)
                .open(&path)
                .and_then(|f| f.set_len(original.end_offset))
                .map_err(HmemError::from)
                .and_then(|_| self.write_meta(original)),
            None => {
                let _ = fs::remove_file(self.sidecar_path(&p.meta.user_id, p.meta.container_id));
                match fs::remove_file(&path) {
                    Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
                    _ => Ok(()),
                }
            }
        };
        if let Err(e) = result {
            tracing::error!(
                container_id = p.meta.container_id,
                error = %e,
                "Rollback incomplete; uncommitted bytes will be dropped on next append"
            );
        }
    }

    /// Decode the chunk at `offset` without touching the rest of the container
    pub fn decode_at(&self, user_id: &str, container_id: ContainerId, offset: u64) -> HmemResult<MemoryRecord> {
        let path = self.container_path(user_id, container_id);
        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(HmemError::not_found(
                    "container",
                    format!("{}/{}", user_id, container_id),
                ));
            }
            Err(e) => return Err(e.into()),
        };

        let file_len = file.metadata()?.len();
        let corrupt = |reason: &str| HmemError::corruption(container_id, offset, reason);
        if offset + PREAMBLE_LEN as u64 > file_len {
            return Err(corrupt("offset beyond end of container"));
        }

        file.seek(SeekFrom::Start(offset))?;
        let mut preamble = [0u8; PREAMBLE_LEN];
        file.read_exact(&mut preamble)?;
        let length = format::frame_len(&preamble).ok_or_else(|| corrupt("bad chunk magic"))?;
        if offset + length > file_len {
            return Err(corrupt("truncated chunk"));
        }

        let mut frame = vec![0u8; length as usize];
        frame[..PREAMBLE_LEN].copy_from_slice(&preamble);
        file.read_exact(&mut frame[PREAMBLE_LEN..])?;

        let decoded = format::decode_frame(&frame, container_id, offset)?;
        if decoded.header.user_id != user_id {
            return Err(corrupt("chunk belongs to another user"));
        }
        Ok(decoded.record.into_record(ArchiveLocation {
            container_id,
            offset,
        }))
    }

    /// Decode one chunk by reference
    pub fn decode(&self, chunk_ref: &ChunkRef) -> HmemResult<MemoryRecord> {
        self.decode_at(&chunk_ref.user_id, chunk_ref.container_id, chunk_ref.offset)
    }

    /// Decode every live chunk of a container; corrupted chunks are reported
    /// individually. Without a sidecar the container bytes are scanned.
    pub fn decode_all(&self, user_id: &str, container_id: ContainerId) -> HmemResult<DecodeAllReport> {
        let meta = match self.load_meta(user_id, container_id) {
            Ok(meta) => meta,
            Err(e) if e.is_not_found() => return self.scan_report(user_id, container_id),
            Err(e) => return Err(e),
        };

        let mut report = DecodeAllReport::default();
        for chunk in meta.live_chunks() {
            match self.decode_at(user_id, container_id, chunk.offset) {
                Ok(record) => report.records.push(record),
                Err(e) => {
                    tracing::warn!(container_id, offset = chunk.offset, error = %e, "Skipping unreadable chunk");
                    report.errors.push(e);
                }
            }
        }
        Ok(report)
    }

    fn scan_report(&self, user_id: &str, container_id: ContainerId) -> HmemResult<DecodeAllReport> {
        let mut report = DecodeAllReport::default();
        for (offset, result) in self.scan(user_id, container_id)? {
            match result {
                Ok(frame) => report.records.push(frame.record.into_record(ArchiveLocation {
                    container_id,
                    offset,
                })),
                Err(e) => report.errors.push(e),
            }
        }
        Ok(report)
    }

    /// Walk the container frame by frame, resynchronizing on the chunk magic
    /// after damage.
    fn scan(&self, user_id: &str, container_id: ContainerId) -> HmemResult<Vec<(u64, HmemResult<DecodedFrame>)>> {
        Self::scan_file(&self.container_path(user_id, container_id), container_id)
    }

    fn scan_file(path: &Path, container_id: ContainerId) -> HmemResult<Vec<(u64, HmemResult<DecodedFrame>)>> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(HmemError::not_found("container", path.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let mut results = Vec::new();
        let mut pos = 0usize;
        while pos < bytes.len() {
            match format::decode_frame(&bytes[pos..], container_id, pos as u64) {
                Ok(frame) => {
                    let next = pos + frame.length as usize;
                    results.push((pos as u64, Ok(frame)));
                    pos = next;
                }
                Err(e) => {
                    results.push((pos as u64, Err(e)));
                    match format::find_next_magic(&bytes, pos + 1) {
                        Some(next) => pos = next,
                        None => break,
                    }
                }
            }
        }
        Ok(results)
    }

    /// Rebuild a sidecar from container bytes alone.
    ///
    /// Tombstones are not recoverable from the bytes; the manager reconciles
    /// recalled records against the active tier on open.
    pub fn rebuild_sidecar(&self, user_id: &str, container_id: ContainerId) -> HmemResult<ContainerMeta> {
        let writer = self.writer(user_id);
        let _guard = writer.lock();

        let now = self.clock.now();
        let mut meta = ContainerMeta::new(user_id, container_id, now);
        let mut skipped = 0usize;
        for (offset, result) in self.scan(user_id, container_id)? {
            match result {
                Ok(frame) if frame.header.user_id == user_id => {
                    meta.end_offset = offset + frame.length;
                    let chunk = self.chunk_meta(&frame.record, offset, frame.length, frame.digest);
                    meta.chunks.push(chunk);
                }
                _ => skipped += 1,
            }
        }
        if let Some(first) = meta.chunks.first() {
            meta.created_at = first.created_at.min(now);
        }
        // a damaged container never receives further appends
        if skipped > 0 || meta.chunks.len() >= self.config.max_chunks_per_container {
            meta.sealed_at = Some(now);
        }

        self.write_meta(&meta)?;
        tracing::info!(
            user_id = %user_id,
            container_id,
            chunks = meta.chunks.len(),
            skipped,
            "Rebuilt container sidecar"
        );
        Ok(meta)
    }

    /// Rebuild sidecars for container files that have none; returns how many
    pub fn rebuild_missing_sidecars(&self) -> HmemResult<usize> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut rebuilt = 0;
        for entry in entries {
            let dir = entry?.path();
            if !dir.is_dir() {
                continue;
            }
            let with_sidecar = Self::ids_in(&dir, SIDECAR_EXT)?;
            for id in Self::ids_in(&dir, CONTAINER_EXT)? {
                if with_sidecar.contains(&id) {
                    continue;
                }
                let path = dir.join(format!("{:08}.{}", id, CONTAINER_EXT));
                let owner = Self::scan_file(&path, id)?
                    .into_iter()
                    .find_map(|(_, r)| r.ok().map(|f| f.header.user_id));
                match owner {
                    Some(user_id) => {
                        self.rebuild_sidecar(&user_id, id)?;
                        rebuilt += 1;
                    }
                    None => tracing::warn!(path = %path.display(), "No readable chunks; container left as is"),
                }
            }
        }
        Ok(rebuilt)
    }

    /// Logically delete a chunk; its bytes stay in place
    pub fn tombstone(&self, chunk_ref: &ChunkRef) -> HmemResult<()> {
        let writer = self.writer(&chunk_ref.user_id);
        let _guard = writer.lock();

        let mut meta = self.load_meta(&chunk_ref.user_id, chunk_ref.container_id)?;
        let chunk = meta
            .chunks
            .iter_mut()
            .find(|c| c.offset == chunk_ref.offset)
            .ok_or_else(|| {
                HmemError::not_found(
                    "chunk",
                    format!("{}@{}", chunk_ref.container_id, chunk_ref.offset),
                )
            })?;
        if chunk.tombstoned {
            return Ok(());
        }
        chunk.tombstoned = true;
        self.write_meta(&meta)
    }

    /// Seal a container so no further chunks are appended
    pub fn seal(&self, user_id: &str, container_id: ContainerId) -> HmemResult<()> {
        let writer = self.writer(user_id);
        let _guard = writer.lock();

        let mut meta = self.load_meta(user_id, container_id)?;
        if meta.is_sealed() {
            return Ok(());
        }
        meta.sealed_at = Some(self.clock.now());
        self.write_meta(&meta)
    }
}
