//! File Indexer
//!
//! Indexes files on disk into a dedicated archive owned by `files.owner`.
//! A JSON registry maps each canonical path to its hash and chunks, so an
//! unchanged file is skipped and a changed file replaces its old chunks.
//!
//! On open, live chunks the registry does not reference are tombstoned. They
//! come from an interrupted re-index or a sidecar rebuilt without its
//! tombstones.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;
use walkdir::WalkDir;

use super::chunking::{TextChunk, chunk_chars, chunk_lines, file_type, is_code};
use super::extract::{PlainTextExtractor, TextExtractor};
use crate::archive::{ArchivalCodec, ArchiveIndex};
use crate::config::{EngineConfig, FileIndexConfig};
use crate::hybrid::run_blocking;
use crate::memory::{ClassifyContext, Embedder, SectorClassifier};
use crate::types::{ChunkRef, LineRange, MemoryRecord, Sector, SourceRef};
use crate::utils::{Clock, file_hash};
use crate::{HmemError, HmemResult};

const REGISTRY_FILE: &str = "files.json";

/// Outcome of indexing one file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexStatus {
    Indexed,
    AlreadyIndexed,
}

impl IndexStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexStatus::Indexed => "indexed",
            IndexStatus::AlreadyIndexed => "already_indexed",
        }
    }
}

impl std::fmt::Display for IndexStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Registry entry for an indexed file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedFile {
    pub path: String,
    pub file_hash: String,
    pub file_type: String,
    pub file_size: u64,
    pub chunk_count: usize,
    pub chunks: Vec<ChunkRef>,
    pub indexed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexFileResult {
    pub path: String,
    pub status: IndexStatus,
    pub chunks_indexed: usize,
    pub file_hash: String,
    pub file_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileError {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexDirectoryResult {
    pub files_indexed: usize,
    /// Files whose hash matched the registry
    pub files_unchanged: usize,
    /// Files matching an exclude fragment
    pub files_skipped: usize,
    pub chunks_indexed: usize,
    pub errors: Vec<FileError>,
}

/// A file search match with the full chunk text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileHit {
    pub path: String,
    pub line_range: Option<LineRange>,
    pub file_hash: String,
    pub file_type: String,
    pub score: f32,
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileIndexStats {
    pub total_files: usize,
    pub total_chunks: usize,
    pub total_source_bytes: u64,
    pub archive_bytes: u64,
    pub file_types: BTreeMap<String, usize>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Registry {
    files: BTreeMap<String, IndexedFile>,
}

/// Indexes files into their own archive namespace
pub struct FileIndexer {
    root: PathBuf,
    config: FileIndexConfig,
    codec: Arc<ArchivalCodec>,
    index: ArchiveIndex,
    /// Held for the whole of an index operation
    registry: Mutex<Registry>,
    embedder: Arc<dyn Embedder>,
    extractor: Arc<dyn TextExtractor>,
    classifier: SectorClassifier,
    clock: Arc<dyn Clock>,
}

impl FileIndexer {
    pub async fn open(
        config: &EngineConfig,
        embedder: Arc<dyn Embedder>,
        clock: Arc<dyn Clock>,
    ) -> HmemResult<Self> {
        let root = config.file_index_dir();
        let codec = Arc::new(ArchivalCodec::new(
            root.clone(),
            config.archive.clone(),
            clock.clone(),
        ));

        let (metas, registry) = {
            let codec = codec.clone();
            let root = root.clone();
            let owner = config.files.owner.clone();
            run_blocking(move || {
                std::fs::create_dir_all(&root)?;
                codec.rebuild_missing_sidecars()?;
                let metas = codec.list_containers(&owner)?;
                let registry = load_registry(&root.join(REGISTRY_FILE))?;
                Ok((metas, registry))
            })
            .await?
        };

        let index = ArchiveIndex::new();
        for meta in &metas {
            index.load_container(meta);
        }

        let indexer = Self {
            root,
            config: config.files.clone(),
            codec,
            index,
            registry: Mutex::new(registry),
            embedder,
            extractor: Arc::new(PlainTextExtractor),
            classifier: SectorClassifier::new(),
            clock,
        };

        let orphans = indexer.orphaned_chunks().await;
        if !orphans.is_empty() {
            tracing::info!(orphans = orphans.len(), "Retiring unregistered file chunks");
            indexer.retire(&orphans).await;
        }

        tracing::info!(
            root = %indexer.root.display(),
            files = indexer.registry.lock().await.files.len(),
            containers = metas.len(),
            "File index opened"
        );
        Ok(indexer)
    }

    /// Replace the text extractor used for new files
    pub fn with_extractor(mut self, extractor: Arc<dyn TextExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn owner(&self) -> &str {
        &self.config.owner
    }

    async fn orphaned_chunks(&self) -> Vec<ChunkRef> {
        let registry = self.registry.lock().await;
        let referenced: HashSet<(u64, u64)> = registry
            .files
            .values()
            .flat_map(|f| f.chunks.iter().map(|c| (c.container_id, c.offset)))
            .collect();

        self.index
            .live_entries(&self.config.owner)
            .into_iter()
            .filter(|e| !referenced.contains(&(e.chunk_ref.container_id, e.chunk_ref.offset)))
            .map(|e| e.chunk_ref)
            .collect()
    }

    /// Drop chunks from search and tombstone them on disk
    async fn retire(&self, chunks: &[ChunkRef]) {
        for chunk_ref in chunks {
            self.index.remove(chunk_ref);
            let codec = self.codec.clone();
            let target = chunk_ref.clone();
            if let Err(e) = run_blocking(move || codec.tombstone(&target)).await {
                tracing::warn!(
                    container_id = chunk_ref.container_id,
                    offset = chunk_ref.offset,
                    error = %e,
                    "Failed to tombstone replaced file chunk"
                );
            }
        }
    }

    async fn save_registry(&self, registry: &Registry) -> HmemResult<()> {
        let bytes = serde_json::to_vec_pretty(registry)?;
        let path = self.root.join(REGISTRY_FILE);
        run_blocking(move || {
            let tmp = path.with_extension("json.tmp");
            std::fs::write(&tmp, bytes).map_err(HmemError::from_write)?;
            std::fs::rename(&tmp, &path)?;
            Ok(())
        })
        .await
    }

    fn chunk(&self, path: &Path, file_type: &str, text: &str, preserve_lines: bool) -> Vec<TextChunk> {
        if preserve_lines && is_code(file_type) {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            chunk_lines(&name, text, self.config.chunk_size)
        } else {
            chunk_chars(text, self.config.chunk_size, self.config.overlap)
        }
    }

    /// Index one file. Unchanged files are reported as already indexed; a
    /// changed file has its previous chunks tombstoned.
    pub async fn index_file(&self, path: &Path, preserve_lines: bool) -> HmemResult<IndexFileResult> {
        let path = canonical(path).await?;
        let key = path.to_string_lossy().into_owned();
        let ftype = file_type(&path);

        let metadata = tokio::fs::metadata(&path).await?;
        if !metadata.is_file() {
            return Err(HmemError::invalid_operation(format!("not a regular file: {key}")));
        }

        let mut registry = self.registry.lock().await;

        let hash = {
            let path = path.clone();
            run_blocking(move || Ok(file_hash(&path)?)).await?
        };
        if registry.files.get(&key).is_some_and(|f| f.file_hash == hash) {
            tracing::debug!(path = %key, "File unchanged");
            return Ok(IndexFileResult {
                path: key,
                status: IndexStatus::AlreadyIndexed,
                chunks_indexed: 0,
                file_hash: hash,
                file_type: ftype.to_string(),
            });
        }

        let text = {
            let path = path.clone();
            let extractor = self.extractor.clone();
            run_blocking(move || extractor.extract(&path, ftype)).await?
        };

        let now = self.clock.now();
        let mut records = Vec::new();
        for chunk in self.chunk(&path, ftype, &text, preserve_lines) {
            let sector = if is_code(ftype) {
                Sector::Procedural
            } else {
                self.classifier.classify(&chunk.text, &ClassifyContext::default())
            };
            let source = SourceRef {
                path: key.clone(),
                line_range: chunk.line_range,
                file_hash: hash.clone(),
                file_type: ftype.to_string(),
            };
            let mut record = MemoryRecord::new(
                Uuid::new_v4().to_string(),
                &self.config.owner,
                chunk.text,
                sector,
                now,
            )
            .with_source(source);

            match self.embedder.embed(&record.content).await {
                Ok(vector) => record.embedding = Some(vector),
                Err(e) => {
                    tracing::warn!(path = %key, error = %e, "Embedding failed; chunk stored without a vector")
                }
            }
            records.push(record);
        }

        let encoded = {
            let codec = self.codec.clone();
            let owner = self.config.owner.clone();
            run_blocking(move || codec.encode(&owner, &records)).await?
        };
        self.index.ingest(&encoded);

        let chunks: Vec<ChunkRef> = encoded.iter().map(|c| c.chunk_ref.clone()).collect();
        let chunks_indexed = chunks.len();
        let previous = registry.files.insert(
            key.clone(),
            IndexedFile {
                path: key.clone(),
                file_hash: hash.clone(),
                file_type: ftype.to_string(),
                file_size: metadata.len(),
                chunk_count: chunks_indexed,
                chunks,
                indexed_at: now,
            },
        );
        if let Some(previous) = previous {
            self.retire(&previous.chunks).await;
        }
        self.save_registry(&registry).await?;

        tracing::info!(path = %key, chunks = chunks_indexed, file_type = ftype, "File indexed");
        Ok(IndexFileResult {
            path: key,
            status: IndexStatus::Indexed,
            chunks_indexed,
            file_hash: hash,
            file_type: ftype.to_string(),
        })
    }

    /// Index every file under `dir` whose path relative to `dir` matches
    /// `pattern` (default `**/*`).
    ///
    /// Paths containing an exclude fragment are skipped; excluded
    /// directories are not descended into. Per-file failures are collected.
    pub async fn index_directory(
        &self,
        dir: &Path,
        pattern: Option<&str>,
        exclude: &[String],
    ) -> HmemResult<IndexDirectoryResult> {
        let pattern = glob::Pattern::new(pattern.unwrap_or("**/*"))
            .map_err(|e| HmemError::invalid_operation(format!("invalid glob pattern: {e}")))?;
        let root = canonical(dir).await?;
        if !tokio::fs::metadata(&root).await?.is_dir() {
            return Err(HmemError::invalid_operation(format!(
                "not a directory: {}",
                root.display()
            )));
        }

        let excludes: Vec<String> = self
            .config
            .default_excludes
            .iter()
            .chain(exclude)
            .filter(|e| !e.is_empty())
            .cloned()
            .collect();

        let (candidates, mut result) = run_blocking(move || Ok(walk(&root, &pattern, &excludes))).await?;

        for path in candidates {
            match self.index_file(&path, true).await {
                Ok(indexed) => match indexed.status {
                    IndexStatus::Indexed => {
                        result.files_indexed += 1;
                        result.chunks_indexed += indexed.chunks_indexed;
                    }
                    IndexStatus::AlreadyIndexed => result.files_unchanged += 1,
                },
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to index file");
                    result.errors.push(FileError {
                        path: path.display().to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            indexed = result.files_indexed,
            unchanged = result.files_unchanged,
            skipped = result.files_skipped,
            errors = result.errors.len(),
            "Directory indexed"
        );
        Ok(result)
    }

    /// Similarity search over indexed file chunks, returning full chunk text
    pub async fn search_files(
        &self,
        query: &str,
        file_type_filter: Option<&str>,
        top_k: usize,
    ) -> HmemResult<Vec<FileHit>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let vector = self.embedder.embed(query).await?;
        let pool = match file_type_filter {
            Some(_) => self.index.live_count(&self.config.owner),
            None => top_k,
        };

        let matches: Vec<_> = self
            .index
            .search(&vector, pool, None, &self.config.owner)
            .into_iter()
            .filter_map(|hit| hit.source.clone().map(|source| (hit, source)))
            .filter(|(_, source)| file_type_filter.is_none_or(|t| source.file_type == t))
            .take(top_k)
            .collect();

        let mut hits = Vec::with_capacity(matches.len());
        for (hit, source) in matches {
            let codec = self.codec.clone();
            let chunk_ref = hit.chunk_ref.clone();
            let content = match run_blocking(move || codec.decode(&chunk_ref)).await {
                Ok(record) => record.content,
                Err(e) => {
                    tracing::warn!(path = %source.path, error = %e, "Chunk unreadable; returning summary");
                    hit.summary.clone()
                }
            };
            hits.push(FileHit {
                path: source.path,
                line_range: source.line_range,
                file_hash: source.file_hash,
                file_type: source.file_type,
                score: hit.similarity,
                content,
            });
        }
        Ok(hits)
    }

    /// Every indexed file, ordered by path
    pub async fn list_files(&self) -> Vec<IndexedFile> {
        self.registry.lock().await.files.values().cloned().collect()
    }

    pub async fn file_info(&self, path: &Path) -> HmemResult<IndexedFile> {
        let key = match tokio::fs::canonicalize(path).await {
            Ok(p) => p.to_string_lossy().into_owned(),
            Err(_) => path.to_string_lossy().into_owned(),
        };
        self.registry
            .lock()
            .await
            .files
            .get(&key)
            .cloned()
            .ok_or_else(|| HmemError::not_found("indexed file", key))
    }

    pub async fn stats(&self) -> HmemResult<FileIndexStats> {
        let mut stats = {
            let registry = self.registry.lock().await;
            let mut stats = FileIndexStats {
                total_files: registry.files.len(),
                ..Default::default()
            };
            for file in registry.files.values() {
                stats.total_chunks += file.chunk_count;
                stats.total_source_bytes += file.file_size;
                *stats.file_types.entry(file.file_type.clone()).or_default() += 1;
            }
            stats
        };

        let codec = self.codec.clone();
        let owner = self.config.owner.clone();
        stats.archive_bytes = run_blocking(move || codec.storage_bytes(&owner)).await?;
        Ok(stats)
    }
}

fn load_registry(path: &Path) -> HmemResult<Registry> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Registry::default()),
        Err(e) => Err(e.into()),
    }
}

async fn canonical(path: &Path) -> HmemResult<PathBuf> {
    match tokio::fs::canonicalize(path).await {
        Ok(path) => Ok(path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(HmemError::not_found("file", path.display().to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

/// Collect indexable files under `root`, counting excluded files and
/// recording walk errors
fn walk(root: &Path, pattern: &glob::Pattern, excludes: &[String]) -> (Vec<PathBuf>, IndexDirectoryResult) {
    let relative = |path: &Path| {
        path.strip_prefix(root)
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned()
    };
    let excluded = |rel: &str| excludes.iter().any(|e| rel.contains(e.as_str()));

    let mut result = IndexDirectoryResult::default();
    let mut candidates = Vec::new();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !e.file_type().is_dir() || !excluded(&relative(e.path())));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                result.errors.push(FileError {
                    path: e
                        .path()
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| root.display().to_string()),
                    error: e.to_string(),
                });
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = relative(entry.path());
        if !pattern.matches(&rel) {
            continue;
        }
        if excluded(&rel) {
            result.files_skipped += 1;
            continue;
        }
        candidates.push(entry.into_path());
    }
    (candidates, result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::HashEmbedder;
    use crate::utils::{ManualClock, from_millis};
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        src: PathBuf,
        config: EngineConfig,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        std::fs::create_dir_all(&src).unwrap();
        let mut config = EngineConfig::new(dir.path().join("data"));
        config.files.chunk_size = 1000;
        Fixture {
            src,
            config,
            clock: Arc::new(ManualClock::new(from_millis(1_700_000_000_000))),
            _dir: dir,
        }
    }

    async fn open(fx: &Fixture) -> FileIndexer {
        FileIndexer::open(&fx.config, Arc::new(HashEmbedder::default()), fx.clock.clone())
            .await
            .unwrap()
    }

    fn python_source(lines: usize) -> String {
        (1..=lines).map(|i| format!("value_{i} = {i}\n")).collect()
    }

    #[tokio::test]
    async fn test_unchanged_file_is_already_indexed() {
        let fx = fixture();
        let indexer = open(&fx).await;
        let path = fx.src.join("main.py");
        std::fs::write(&path, python_source(45)).unwrap();

        let first = indexer.index_file(&path, true).await.unwrap();
        assert_eq!(first.status, IndexStatus::Indexed);
        assert_eq!(first.chunks_indexed, 3);
        assert_eq!(first.file_type, "python");

        let second = indexer.index_file(&path, true).await.unwrap();
        assert_eq!(second.status, IndexStatus::AlreadyIndexed);
        assert_eq!(second.chunks_indexed, 0);
        assert_eq!(second.file_hash, first.file_hash);
    }

    #[tokio::test]
    async fn test_changed_file_replaces_chunks() {
        let fx = fixture();
        let indexer = open(&fx).await;
        let path = fx.src.join("main.py");
        std::fs::write(&path, python_source(45)).unwrap();
        indexer.index_file(&path, true).await.unwrap();

        std::fs::write(&path, python_source(10)).unwrap();
        let result = indexer.index_file(&path, true).await.unwrap();
        assert_eq!(result.status, IndexStatus::Indexed);
        assert_eq!(result.chunks_indexed, 1);
        assert_eq!(indexer.index.live_count(indexer.owner()), 1);

        let info = indexer.file_info(&path).await.unwrap();
        assert_eq!(info.chunk_count, 1);
        assert_eq!(info.file_hash, result.file_hash);

        let containers = indexer.codec.list_containers(indexer.owner()).unwrap();
        let tombstoned: usize = containers
            .iter()
            .map(|m| m.chunks.iter().filter(|c| c.tombstoned).count())
            .sum();
        assert_eq!(tombstoned, 3);
    }

    #[tokio::test]
    async fn test_search_returns_line_ranges_and_full_content() {
        let fx = fixture();
        let indexer = open(&fx).await;
        let code = fx.src.join("billing.py");
        std::fs::write(
            &code,
            "def parse_invoice_totals(rows):\n    return sum(r.amount for r in rows)\n",
        )
        .unwrap();
        let notes = fx.src.join("garden.md");
        std::fs::write(&notes, "Tomatoes need staking before the summer heat arrives.").unwrap();

        indexer.index_file(&code, true).await.unwrap();
        indexer.index_file(&notes, true).await.unwrap();

        let hits = indexer.search_files("parse invoice totals", None, 5).await.unwrap();
        assert!(!hits.is_empty());
        assert!(hits[0].path.ends_with("billing.py"));
        assert_eq!(hits[0].line_range, Some(LineRange { start: 1, end: 2 }));
        assert!(hits[0].content.starts_with("[billing.py:1-2]\n"));
        assert!(hits[0].content.contains("r.amount"));

        let markdown = indexer
            .search_files("parse invoice totals", Some("markdown"), 5)
            .await
            .unwrap();
        assert_eq!(markdown.len(), 1);
        assert_eq!(markdown[0].file_type, "markdown");
        assert!(markdown[0].line_range.is_none());
    }

    #[tokio::test]
    async fn test_index_directory_pattern_and_excludes() {
        let fx = fixture();
        let indexer = open(&fx).await;
        std::fs::create_dir_all(fx.src.join("sub")).unwrap();
        std::fs::create_dir_all(fx.src.join("node_modules/pkg")).unwrap();
        std::fs::write(fx.src.join("a.py"), python_source(3)).unwrap();
        std::fs::write(fx.src.join("b.txt"), "plain words").unwrap();
        std::fs::write(fx.src.join("sub/c.py"), python_source(5)).unwrap();
        std::fs::write(fx.src.join("node_modules/pkg/x.py"), python_source(2)).unwrap();

        let python = indexer
            .index_directory(&fx.src, Some("**/*.py"), &[])
            .await
            .unwrap();
        assert_eq!(python.files_indexed, 2);
        assert_eq!(python.chunks_indexed, 2);
        assert!(python.errors.is_empty());

        let everything = indexer
            .index_directory(&fx.src, None, &["b.txt".to_string()])
            .await
            .unwrap();
        assert_eq!(everything.files_indexed, 0);
        assert_eq!(everything.files_unchanged, 2);
        assert_eq!(everything.files_skipped, 1);

        let stats = indexer.stats().await.unwrap();
        assert_eq!(stats.total_files, 2);
        assert_eq!(stats.file_types.get("python"), Some(&2));
        assert!(stats.archive_bytes > 0);
    }

    #[tokio::test]
    async fn test_missing_paths_are_not_found() {
        let fx = fixture();
        let indexer = open(&fx).await;

        let err = indexer.index_file(&fx.src.join("nope.py"), true).await.unwrap_err();
        assert!(err.is_not_found());
        let err = indexer
            .index_directory(&fx.src.join("missing"), None, &[])
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(indexer.file_info(&fx.src.join("nope.py")).await.unwrap_err().is_not_found());
    }

    struct StubPdfExtractor;

    impl TextExtractor for StubPdfExtractor {
        fn extract(&self, _path: &Path, _file_type: &str) -> HmemResult<String> {
            Ok("Extracted contract terms about renewal dates".to_string())
        }
    }

    #[tokio::test]
    async fn test_custom_extractor_handles_documents() {
        let fx = fixture();
        let path = fx.src.join("contract.pdf");
        std::fs::write(&path, b"%PDF-1.7 binary").unwrap();

        let plain = open(&fx).await;
        let err = plain.index_file(&path, true).await.unwrap_err();
        assert!(matches!(err, HmemError::InvalidOperation { .. }));
        drop(plain);

        let indexer = open(&fx).await.with_extractor(Arc::new(StubPdfExtractor));
        let result = indexer.index_file(&path, true).await.unwrap();
        assert_eq!(result.file_type, "pdf");
        assert_eq!(result.chunks_indexed, 1);

        let hits = indexer.search_files("renewal dates", Some("pdf"), 1).await.unwrap();
        assert_eq!(hits[0].content, "Extracted contract terms about renewal dates");
    }

    #[tokio::test]
    async fn test_reopen_retires_unregistered_chunks() {
        let fx = fixture();
        let path = fx.src.join("main.py");
        std::fs::write(&path, python_source(45)).unwrap();
        {
            let indexer = open(&fx).await;
            indexer.index_file(&path, true).await.unwrap();
        }

        let reopened = open(&fx).await;
        assert_eq!(reopened.index.live_count(reopened.owner()), 3);
        assert_eq!(reopened.list_files().await.len(), 1);
        drop(reopened);

        std::fs::remove_file(fx.config.file_index_dir().join(REGISTRY_FILE)).unwrap();
        let reopened = open(&fx).await;
        assert_eq!(reopened.index.live_count(reopened.owner()), 0);
        assert!(reopened.list_files().await.is_empty());

        let again = reopened.index_file(&path, true).await.unwrap();
        assert_eq!(again.status, IndexStatus::Indexed);
    }
}
