//! Active Store
//!
//! SQLite-backed hot tier. Rows are addressable by id and scoped by user;
//! salience is never read from disk, it is recomputed on every read.

use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::DecayEngine;
use super::migrations::run_migrations;
use crate::types::{MemoryRecord, Sector, SourceRef};
use crate::utils::{Clock, content_hash, from_millis};
use crate::{HmemError, HmemResult};

const SELECT_COLUMNS: &str = "SELECT id, user_id, content, sector, created_at, last_accessed_at, access_count, embedding, source_json FROM active_memories";

/// Filters for [`ActiveStore::scan`]
#[derive(Debug, Clone, Default)]
pub struct ScanFilter {
    pub sector: Option<Sector>,
    pub min_salience: Option<f64>,
}

impl ScanFilter {
    pub fn sector(sector: Sector) -> Self {
        Self {
            sector: Some(sector),
            min_salience: None,
        }
    }
}

/// Raw row before salience is computed
struct StoredRow {
    id: String,
    user_id: String,
    content: String,
    sector: String,
    created_at: i64,
    last_accessed_at: i64,
    access_count: u32,
    embedding: Option<Vec<u8>>,
    source_json: Option<String>,
}

impl StoredRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            content: row.get(2)?,
            sector: row.get(3)?,
            created_at: row.get(4)?,
            last_accessed_at: row.get(5)?,
            access_count: row.get(6)?,
            embedding: row.get(7)?,
            source_json: row.get(8)?,
        })
    }
}

/// Encode an embedding as little-endian f32 bytes
pub(crate) fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|x| x.to_le_bytes()).collect()
}

pub(crate) fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Hot tier store
#[derive(Clone)]
pub struct ActiveStore {
    db: Arc<Mutex<Connection>>,
    decay: DecayEngine,
    clock: Arc<dyn Clock>,
}

impl ActiveStore {
    /// Create a store over an already migrated connection
    pub fn new(db: Arc<Mutex<Connection>>, decay: DecayEngine, clock: Arc<dyn Clock>) -> Self {
        Self { db, decay, clock }
    }

    /// Open (or create) the database file and run migrations
    pub fn open(path: &Path, decay: DecayEngine, clock: Arc<dyn Clock>) -> HmemResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        run_migrations(&conn)?;
        Ok(Self::new(Arc::new(Mutex::new(conn)), decay, clock))
    }

    pub fn open_in_memory(decay: DecayEngine, clock: Arc<dyn Clock>) -> HmemResult<Self> {
        let conn = Connection::open_in_memory()?;
        run_migrations(&conn)?;
        Ok(Self::new(Arc::new(Mutex::new(conn)), decay, clock))
    }

    fn to_record(&self, row: StoredRow) -> HmemResult<MemoryRecord> {
        let sector = Sector::from_str(&row.sector)
            .ok_or_else(|| HmemError::invalid_operation(format!("invalid sector: {}", row.sector)))?;
        let source: Option<SourceRef> = row
            .source_json
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;

        let mut record = MemoryRecord::new(
            row.id,
            row.user_id,
            row.content,
            sector,
            from_millis(row.created_at),
        );
        record.last_accessed_at = from_millis(row.last_accessed_at);
        record.access_count = row.access_count;
        record.embedding = row.embedding.as_deref().map(blob_to_embedding);
        record.source = source;
        record.salience = self.decay.salience(&record, self.clock.now());
        Ok(record)
    }

    fn owner_of(db: &Connection, id: &str) -> HmemResult<Option<String>> {
        Ok(db
            .query_row(
                "SELECT user_id FROM active_memories WHERE id = ?1",
                params![id],
                |row| row.get::<_, String>(0),
            )
            .optional()?)
    }

    /// Insert or replace an active record
    pub async fn put(&self, record: &MemoryRecord) -> HmemResult<()> {
        if record.is_archived() {
            return Err(HmemError::invalid_operation(format!(
                "archived record {} cannot be stored in the active tier",
                record.id
            )));
        }

        let db = self.db.lock().await;
        if let Some(owner) = Self::owner_of(&db, &record.id)? {
            if owner != record.user_id {
                return Err(HmemError::not_authorized(&record.user_id, &record.id));
            }
        }

        let source_json = record.source.as_ref().map(serde_json::to_string).transpose()?;
        db.execute(
            "INSERT INTO active_memories (id, user_id, content, content_hash, sector, created_at, last_accessed_at, access_count, embedding, source_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(id) DO UPDATE SET
                content = excluded.content,
                content_hash = excluded.content_hash,
                sector = excluded.sector,
                created_at = excluded.created_at,
                last_accessed_at = excluded.last_accessed_at,
                access_count = excluded.access_count,
                embedding = excluded.embedding,
                source_json = excluded.source_json",
            params![
                &record.id,
                &record.user_id,
                &record.content,
                content_hash(&record.content),
                record.sector.as_str(),
                record.created_at.timestamp_millis(),
                record.last_accessed_at.timestamp_millis(),
                record.access_count,
                record.embedding.as_deref().map(embedding_to_blob),
                source_json,
            ],
        )?;
        Ok(())
    }

    /// Get a record owned by `user_id`
    pub async fn get(&self, id: &str, user_id: &str) -> HmemResult<MemoryRecord> {
        let record = self
            .find(id)
            .await?
            .ok_or_else(|| HmemError::not_found("memory", id))?;
        if record.user_id != user_id {
            return Err(HmemError::not_authorized(user_id, id));
        }
        Ok(record)
    }

    /// Look up a record regardless of owner
    pub(crate) async fn find(&self, id: &str) -> HmemResult<Option<MemoryRecord>> {
        let db = self.db.lock().await;
        let row = db
            .query_row(
                &format!("{} WHERE id = ?1", SELECT_COLUMNS),
                params![id],
                StoredRow::from_row,
            )
            .optional()?;
        drop(db);
        row.map(|row| self.to_record(row)).transpose()
    }

    pub async fn contains(&self, id: &str) -> HmemResult<bool> {
        let db = self.db.lock().await;
        Ok(Self::owner_of(&db, id)?.is_some())
    }

    /// Delete a record owned by `user_id`
    pub async fn delete(&self, id: &str, user_id: &str) -> HmemResult<()> {
        let db = self.db.lock().await;
        match Self::owner_of(&db, id)? {
            None => Err(HmemError::not_found("memory", id)),
            Some(owner) if owner != user_id => Err(HmemError::not_authorized(user_id, id)),
            Some(_) => {
                db.execute("DELETE FROM active_memories WHERE id = ?1", params![id])?;
                Ok(())
            }
        }
    }

    /// Record an access: bump the count and reset the decay clock
    pub async fn touch(&self, id: &str, user_id: &str) -> HmemResult<MemoryRecord> {
        let now = self.clock.now();
        {
            let db = self.db.lock().await;
            match Self::owner_of(&db, id)? {
                None => return Err(HmemError::not_found("memory", id)),
                Some(owner) if owner != user_id => {
                    return Err(HmemError::not_authorized(user_id, id));
                }
                Some(_) => {}
            }
            db.execute(
                "UPDATE active_memories SET last_accessed_at = ?1, access_count = access_count + 1 WHERE id = ?2",
                params![now.timestamp_millis(), id],
            )?;
        }
        self.get(id, user_id).await
    }

    /// Attach an embedding computed after insertion
    pub async fn set_embedding(&self, id: &str, embedding: &[f32]) -> HmemResult<()> {
        let db = self.db.lock().await;
        let changed = db.execute(
            "UPDATE active_memories SET embedding = ?1 WHERE id = ?2",
            params![embedding_to_blob(embedding), id],
        )?;
        if changed == 0 {
            return Err(HmemError::not_found("memory", id));
        }
        Ok(())
    }

    /// All of a user's records matching the filter, salience recomputed now,
    /// highest salience first
    pub async fn scan(&self, user_id: &str, filter: &ScanFilter) -> HmemResult<Vec<MemoryRecord>> {
        let rows = {
            let db = self.db.lock().await;
            let mut stmt = db.prepare(&format!(
                "{} WHERE user_id = ?1 AND (?2 IS NULL OR sector = ?2)",
                SELECT_COLUMNS
            ))?;
            let rows = stmt
                .query_map(
                    params![user_id, filter.sector.map(|s| s.as_str())],
                    StoredRow::from_row,
                )?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let record = self.to_record(row)?;
            if filter.min_salience.is_none_or(|min| record.salience >= min) {
                records.push(record);
            }
        }

        records.sort_by(|a, b| {
            b.salience
                .total_cmp(&a.salience)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        Ok(records)
    }

    /// The `top_k` most salient records of a user
    pub async fn rank_by_salience(&self, user_id: &str, top_k: usize) -> HmemResult<Vec<MemoryRecord>> {
        let mut records = self.scan(user_id, &ScanFilter::default()).await?;
        records.truncate(top_k);
        Ok(records)
    }

    /// Users with at least one active record
    pub async fn users(&self) -> HmemResult<Vec<String>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare("SELECT DISTINCT user_id FROM active_memories ORDER BY user_id")?;
        let users = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    pub async fn count(&self, user_id: &str) -> HmemResult<usize> {
        let db = self.db.lock().await;
        let count: i64 = db.query_row(
            "SELECT COUNT(*) FROM active_memories WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Approximate bytes held for a user (content plus embeddings)
    pub async fn storage_bytes(&self, user_id: &str) -> HmemResult<u64> {
        let db = self.db.lock().await;
        let bytes: i64 = db.query_row(
            "SELECT COALESCE(SUM(LENGTH(CAST(content AS BLOB)) + COALESCE(LENGTH(embedding), 0)), 0)
             FROM active_memories WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(bytes as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::ManualClock;
    use chrono::Duration;

    fn store() -> (ActiveStore, Arc<ManualClock>) {
        // millisecond aligned, matching stored precision
        let clock = Arc::new(ManualClock::new(from_millis(1_700_000_000_000)));
        let store = ActiveStore::open_in_memory(DecayEngine::default(), clock.clone()).unwrap();
        (store, clock)
    }

    fn record(id: &str, user: &str, sector: Sector, clock: &ManualClock) -> MemoryRecord {
        MemoryRecord::new(id, user, format!("content of {id}"), sector, clock.now())
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let (store, clock) = store();
        let mut r = record("m1", "u1", Sector::Semantic, &clock).with_embedding(vec![0.5, -0.25, 1.0]);
        r.access_count = 3;
        store.put(&r).await.unwrap();

        let loaded = store.get("m1", "u1").await.unwrap();
        assert_eq!(loaded.content, r.content);
        assert_eq!(loaded.sector, Sector::Semantic);
        assert_eq!(loaded.access_count, 3);
        assert_eq!(loaded.embedding, Some(vec![0.5, -0.25, 1.0]));
        assert_eq!(loaded.created_at.timestamp_millis(), r.created_at.timestamp_millis());
        assert!(store.contains("m1").await.unwrap());
    }

    #[tokio::test]
    async fn test_cross_user_access_is_rejected() {
        let (store, clock) = store();
        store.put(&record("m1", "u1", Sector::Semantic, &clock)).await.unwrap();

        assert!(store.get("m1", "u2").await.unwrap_err().is_not_authorized());
        assert!(store.delete("m1", "u2").await.unwrap_err().is_not_authorized());
        assert!(store.touch("m1", "u2").await.unwrap_err().is_not_authorized());

        let hijack = record("m1", "u2", Sector::Semantic, &clock);
        assert!(store.put(&hijack).await.unwrap_err().is_not_authorized());
    }

    #[tokio::test]
    async fn test_missing_ids_are_not_found() {
        let (store, _) = store();
        assert!(store.get("nope", "u1").await.unwrap_err().is_not_found());
        assert!(store.delete("nope", "u1").await.unwrap_err().is_not_found());
        assert!(store.find("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_scan_recomputes_salience() {
        let (store, clock) = store();
        store.put(&record("m1", "u1", Sector::Semantic, &clock)).await.unwrap();

        let fresh = store.scan("u1", &ScanFilter::default()).await.unwrap();
        assert!((fresh[0].salience - 1.0).abs() < 1e-9);

        clock.advance(Duration::days(5));
        let stale = store.scan("u1", &ScanFilter::default()).await.unwrap();
        assert!(stale[0].salience < fresh[0].salience);

        let filtered = store
            .scan(
                "u1",
                &ScanFilter {
                    sector: None,
                    min_salience: Some(0.9),
                },
            )
            .await
            .unwrap();
        assert!(filtered.is_empty());
    }

    #[tokio::test]
    async fn test_scan_filters_by_sector_and_user() {
        let (store, clock) = store();
        store.put(&record("m1", "u1", Sector::Semantic, &clock)).await.unwrap();
        store.put(&record("m2", "u1", Sector::Episodic, &clock)).await.unwrap();
        store.put(&record("m3", "u2", Sector::Episodic, &clock)).await.unwrap();

        let episodic = store.scan("u1", &ScanFilter::sector(Sector::Episodic)).await.unwrap();
        assert_eq!(episodic.len(), 1);
        assert_eq!(episodic[0].id, "m2");

        assert_eq!(store.count("u1").await.unwrap(), 2);
        assert_eq!(store.users().await.unwrap(), vec!["u1".to_string(), "u2".to_string()]);
    }

    #[tokio::test]
    async fn test_touch_and_rank() {
        let (store, clock) = store();
        store.put(&record("old", "u1", Sector::Semantic, &clock)).await.unwrap();
        clock.advance(Duration::days(3));
        store.put(&record("new", "u1", Sector::Semantic, &clock)).await.unwrap();

        let ranked = store.rank_by_salience("u1", 1).await.unwrap();
        assert_eq!(ranked[0].id, "new");

        clock.advance(Duration::hours(1));
        let touched = store.touch("old", "u1").await.unwrap();
        assert_eq!(touched.access_count, 1);
        assert!((touched.salience - 1.0).abs() < 1e-9);

        let ranked = store.rank_by_salience("u1", 2).await.unwrap();
        assert_eq!(ranked[0].id, "old");
    }

    #[tokio::test]
    async fn test_archived_records_are_rejected() {
        let (store, clock) = store();
        let mut r = record("m1", "u1", Sector::Semantic, &clock);
        r.mark_archived(crate::types::ArchiveLocation {
            container_id: 1,
            offset: 0,
        });
        assert!(store.put(&r).await.is_err());
    }

    #[tokio::test]
    async fn test_storage_bytes_and_delete() {
        let (store, clock) = store();
        let r = record("m1", "u1", Sector::Semantic, &clock).with_embedding(vec![1.0; 4]);
        store.put(&r).await.unwrap();
        let expected = r.content.len() as u64 + 16;
        assert_eq!(store.storage_bytes("u1").await.unwrap(), expected);

        store.delete("m1", "u1").await.unwrap();
        assert_eq!(store.storage_bytes("u1").await.unwrap(), 0);
        assert!(!store.contains("m1").await.unwrap());
    }

    #[test]
    fn test_embedding_blob_roundtrip() {
        let v = vec![0.1f32, -2.5, 3.75];
        assert_eq!(blob_to_embedding(&embedding_to_blob(&v)), v);
    }
}
