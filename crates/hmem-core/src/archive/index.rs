//! Archive Index
//!
//! In-memory similarity index over archived chunks, rebuilt from container
//! sidecars on open. Entries are grouped per container so a whole container
//! can be reloaded or rebuilt without touching the rest.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

use super::codec::{ContainerMeta, EncodedChunk};
use crate::memory::cosine_similarity;
use crate::types::{ChunkRef, ContainerId, Sector, SourceRef};

type SegmentKey = (String, ContainerId);

/// One indexed chunk
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub chunk_ref: ChunkRef,
    pub record_id: String,
    pub sector: Sector,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub embedding: Option<Vec<f32>>,
    pub summary: String,
    pub source: Option<SourceRef>,
    pub tombstoned: bool,
}

impl IndexEntry {
    pub fn from_chunk(chunk: &EncodedChunk) -> Self {
        let meta = &chunk.meta;
        Self {
            chunk_ref: chunk.chunk_ref.clone(),
            record_id: meta.record_id.clone(),
            sector: meta.sector,
            created_at: meta.created_at,
            last_accessed_at: meta.last_accessed_at,
            embedding: meta.embedding.clone(),
            summary: meta.summary.clone(),
            source: meta.source.clone(),
            tombstoned: meta.tombstoned,
        }
    }
}

/// A similarity match
#[derive(Debug, Clone)]
pub struct IndexHit {
    pub chunk_ref: ChunkRef,
    pub record_id: String,
    pub similarity: f32,
    pub sector: Sector,
    pub created_at: DateTime<Utc>,
    pub summary: String,
    pub source: Option<SourceRef>,
}

#[derive(Default)]
struct IndexState {
    segments: BTreeMap<SegmentKey, Vec<IndexEntry>>,
    /// record id -> position of its live entry
    live: HashMap<String, (SegmentKey, usize)>,
}

impl IndexState {
    fn entry_mut(&mut self, key: &SegmentKey, pos: usize) -> Option<&mut IndexEntry> {
        self.segments.get_mut(key).and_then(|s| s.get_mut(pos))
    }

    fn push(&mut self, entry: IndexEntry) {
        let key = (entry.chunk_ref.user_id.clone(), entry.chunk_ref.container_id);
        let record_id = entry.record_id.clone();
        let tombstoned = entry.tombstoned;
        let segment = self.segments.entry(key.clone()).or_default();

        // same chunk loaded twice: replace in place
        if let Some(pos) = segment
            .iter()
            .position(|e| e.chunk_ref.offset == entry.chunk_ref.offset)
        {
            segment[pos] = entry;
            if !tombstoned {
                self.mark_live(record_id, key, pos);
            } else if self.live.get(&record_id) == Some(&(key, pos)) {
                self.live.remove(&record_id);
            }
            return;
        }

        segment.push(entry);
        let pos = segment.len() - 1;
        if !tombstoned {
            self.mark_live(record_id, key, pos);
        }
    }

    fn position_of(&self, key: &SegmentKey, pos: usize) -> Option<(ContainerId, u64)> {
        let entry = self.segments.get(key)?.get(pos)?;
        Some((entry.chunk_ref.container_id, entry.chunk_ref.offset))
    }

    /// Newest chunk for a record wins; the older one is tombstoned
    fn mark_live(&mut self, record_id: String, key: SegmentKey, pos: usize) {
        let current = self.live.get(&record_id).cloned();
        let loser = match current {
            Some((old_key, old_pos)) if (&old_key, old_pos) != (&key, pos) => {
                if self.position_of(&key, pos) >= self.position_of(&old_key, old_pos) {
                    self.live.insert(record_id, (key, pos));
                    (old_key, old_pos)
                } else {
                    (key, pos)
                }
            }
            _ => {
                self.live.insert(record_id, (key, pos));
                return;
            }
        };
        if let Some(entry) = self.entry_mut(&loser.0, loser.1) {
            entry.tombstoned = true;
        }
    }

    fn reindex(&mut self) {
        self.live.clear();
        let mut live = HashMap::new();
        for (key, segment) in &self.segments {
            for (pos, entry) in segment.iter().enumerate() {
                if !entry.tombstoned {
                    live.insert(entry.record_id.clone(), (key.clone(), pos));
                }
            }
        }
        self.live = live;
    }
}

/// Similarity index over archived chunks
#[derive(Default)]
pub struct ArchiveIndex {
    state: RwLock<IndexState>,
}

impl ArchiveIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add freshly encoded chunks
    pub fn ingest(&self, chunks: &[EncodedChunk]) {
        let mut state = self.state.write();
        for chunk in chunks {
            state.push(IndexEntry::from_chunk(chunk));
        }
    }

    /// Replace everything known about a container with its sidecar contents
    pub fn load_container(&self, meta: &ContainerMeta) {
        let key = (meta.user_id.clone(), meta.container_id);
        let mut state = self.state.write();
        state.segments.remove(&key);
        state.reindex();
        for chunk in &meta.chunks {
            state.push(IndexEntry::from_chunk(&EncodedChunk {
                chunk_ref: meta.chunk_ref(chunk),
                meta: chunk.clone(),
            }));
        }
    }

    /// Tombstone the entry at `chunk_ref`; false if it was not live
    pub fn remove(&self, chunk_ref: &ChunkRef) -> bool {
        let key = (chunk_ref.user_id.clone(), chunk_ref.container_id);
        let mut state = self.state.write();
        let Some(pos) = state
            .segments
            .get(&key)
            .and_then(|s| s.iter().position(|e| e.chunk_ref.offset == chunk_ref.offset))
        else {
            return false;
        };

        let Some(entry) = state.entry_mut(&key, pos) else {
            return false;
        };
        if entry.tombstoned {
            return false;
        }
        entry.tombstoned = true;
        let record_id = entry.record_id.clone();
        if state.live.get(&record_id) == Some(&(key, pos)) {
            state.live.remove(&record_id);
        }
        true
    }

    /// Live entry for a record id
    pub fn locate(&self, record_id: &str) -> Option<IndexEntry> {
        let state = self.state.read();
        let (key, pos) = state.live.get(record_id)?;
        state.segments.get(key)?.get(*pos).cloned()
    }

    /// Top `k` live entries of `user_id` by cosine similarity to `query`,
    /// ties broken by newer creation time
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        sector: Option<Sector>,
        user_id: &str,
    ) -> Vec<IndexHit> {
        let state = self.state.read();
        let mut hits: Vec<IndexHit> = state
            .segments
            .range((user_id.to_string(), 0)..=(user_id.to_string(), ContainerId::MAX))
            .flat_map(|(_, segment)| segment.iter())
            .filter(|e| !e.tombstoned)
            .filter(|e| sector.is_none_or(|s| e.sector == s))
            .filter_map(|e| {
                let embedding = e.embedding.as_deref()?;
                Some(IndexHit {
                    chunk_ref: e.chunk_ref.clone(),
                    record_id: e.record_id.clone(),
                    similarity: cosine_similarity(query, embedding),
                    sector: e.sector,
                    created_at: e.created_at,
                    summary: e.summary.clone(),
                    source: e.source.clone(),
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        hits.truncate(k);
        hits
    }

    /// Live entries of a user, in container order
    pub fn live_entries(&self, user_id: &str) -> Vec<IndexEntry> {
        let state = self.state.read();
        state
            .segments
            .range((user_id.to_string(), 0)..=(user_id.to_string(), ContainerId::MAX))
            .flat_map(|(_, segment)| segment.iter())
            .filter(|e| !e.tombstoned)
            .cloned()
            .collect()
    }

    pub fn live_count(&self, user_id: &str) -> usize {
        let state = self.state.read();
        state
            .segments
            .range((user_id.to_string(), 0)..=(user_id.to_string(), ContainerId::MAX))
            .map(|(_, segment)| segment.iter().filter(|e| !e.tombstoned).count())
            .sum()
    }

    /// Drop tombstoned entries from memory; returns how many were dropped
    pub fn compact(&self) -> usize {
        let mut state = self.state.write();
        let mut dropped = 0;
        for segment in state.segments.values_mut() {
            let before = segment.len();
            segment.retain(|e| !e.tombstoned);
            dropped += before - segment.len();
        }
        state.segments.retain(|_, segment| !segment.is_empty());
        state.reindex();
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::codec::ChunkMeta;
    use chrono::Duration;

    fn chunk(user: &str, container: ContainerId, offset: u64, id: &str, v: Vec<f32>) -> EncodedChunk {
        let now = Utc::now();
        EncodedChunk {
            chunk_ref: ChunkRef {
                user_id: user.into(),
                container_id: container,
                offset,
                length: 10,
            },
            meta: ChunkMeta {
                record_id: id.into(),
                offset,
                length: 10,
                checksum: String::new(),
                sector: Sector::Semantic,
                created_at: now,
                last_accessed_at: now,
                embedding: Some(v),
                summary: format!("summary of {id}"),
                source: None,
                tombstoned: false,
            },
        }
    }

    #[test]
    fn test_search_ranks_by_similarity_within_user() {
        let index = ArchiveIndex::new();
        index.ingest(&[
            chunk("u1", 1, 0, "a", vec![1.0, 0.0]),
            chunk("u1", 1, 10, "b", vec![0.7, 0.7]),
            chunk("u1", 2, 0, "c", vec![0.0, 1.0]),
            chunk("u2", 1, 0, "d", vec![1.0, 0.0]),
        ]);

        let hits = index.search(&[1.0, 0.0], 10, None, "u1");
        let ids: Vec<&str> = hits.iter().map(|h| h.record_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(index.search(&[1.0, 0.0], 1, None, "u2")[0].record_id == "d");
        assert!(index.search(&[1.0, 0.0], 5, Some(Sector::Emotional), "u1").is_empty());
    }

    #[test]
    fn test_search_filters_by_sector() {
        let index = ArchiveIndex::new();
        let mut feeling = chunk("u1", 1, 10, "feeling", vec![0.5, 0.5]);
        feeling.meta.sector = Sector::Emotional;
        index.ingest(&[chunk("u1", 1, 0, "fact", vec![1.0, 0.0]), feeling]);

        let hits = index.search(&[1.0, 0.0], 10, Some(Sector::Emotional), "u1");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record_id, "feeling");
        assert_eq!(hits[0].sector, Sector::Emotional);

        let hits = index.search(&[1.0, 0.0], 10, Some(Sector::Semantic), "u1");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record_id, "fact");
    }

    #[test]
    fn test_entries_without_vectors_only_listed() {
        let index = ArchiveIndex::new();
        let mut bare = chunk("u1", 1, 10, "bare", vec![]);
        bare.meta.embedding = None;
        index.ingest(&[chunk("u1", 1, 0, "a", vec![1.0]), bare]);

        let hits = index.search(&[1.0], 10, None, "u1");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record_id, "a");

        let bare_entries: Vec<IndexEntry> = index
            .live_entries("u1")
            .into_iter()
            .filter(|e| e.embedding.is_none())
            .collect();
        assert_eq!(bare_entries.len(), 1);
        assert_eq!(bare_entries[0].record_id, "bare");
    }

    #[test]
    fn test_similarity_ties_prefer_newer() {
        let index = ArchiveIndex::new();
        let mut old = chunk("u1", 1, 0, "old", vec![1.0, 0.0]);
        old.meta.created_at -= Duration::days(10);
        index.ingest(&[old, chunk("u1", 1, 10, "new", vec![2.0, 0.0])]);

        let hits = index.search(&[1.0, 0.0], 2, None, "u1");
        assert_eq!(hits[0].record_id, "new");
    }

    #[test]
    fn test_remove_and_locate() {
        let index = ArchiveIndex::new();
        let c = chunk("u1", 1, 0, "a", vec![1.0]);
        index.ingest(std::slice::from_ref(&c));
        assert_eq!(index.locate("a").unwrap().chunk_ref, c.chunk_ref);

        assert!(index.remove(&c.chunk_ref));
        assert!(!index.remove(&c.chunk_ref));
        assert!(index.locate("a").is_none());
        assert!(index.search(&[1.0], 5, None, "u1").is_empty());
        assert_eq!(index.live_count("u1"), 0);
    }

    #[test]
    fn test_newest_chunk_for_record_wins() {
        let index = ArchiveIndex::new();
        index.ingest(&[chunk("u1", 1, 0, "a", vec![1.0])]);
        index.ingest(&[chunk("u1", 2, 0, "a", vec![1.0])]);

        assert_eq!(index.locate("a").unwrap().chunk_ref.container_id, 2);
        assert_eq!(index.live_count("u1"), 1);
    }

    #[test]
    fn test_older_container_loaded_late_does_not_win() {
        let index = ArchiveIndex::new();
        index.ingest(&[chunk("u1", 2, 0, "a", vec![1.0])]);
        index.ingest(&[chunk("u1", 1, 0, "a", vec![1.0])]);

        assert_eq!(index.locate("a").unwrap().chunk_ref.container_id, 2);
        assert_eq!(index.live_count("u1"), 1);
    }

    #[test]
    fn test_compact_drops_tombstones() {
        let index = ArchiveIndex::new();
        let chunks = vec![
            chunk("u1", 1, 0, "a", vec![1.0]),
            chunk("u1", 1, 10, "b", vec![1.0]),
        ];
        index.ingest(&chunks);
        index.remove(&chunks[0].chunk_ref);

        assert_eq!(index.compact(), 1);
        assert_eq!(index.compact(), 0);
        assert_eq!(index.locate("b").unwrap().chunk_ref.offset, 10);
        assert_eq!(index.live_entries("u1").len(), 1);
    }

    #[test]
    fn test_load_container_replaces_segment() {
        let index = ArchiveIndex::new();
        let c = chunk("u1", 1, 0, "a", vec![1.0]);
        index.ingest(std::slice::from_ref(&c));

        let mut meta_chunk = c.meta.clone();
        meta_chunk.tombstoned = true;
        let meta = ContainerMeta {
            format_version: 1,
            container_id: 1,
            user_id: "u1".into(),
            created_at: Utc::now(),
            sealed_at: None,
            end_offset: 10,
            chunks: vec![meta_chunk],
        };
        index.load_container(&meta);
        assert!(index.locate("a").is_none());
    }
}
