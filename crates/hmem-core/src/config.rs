//! Engine Configuration
//!
//! Defines configuration options for the hybrid memory engine. Every section
//! deserializes with defaults so a partial TOML file is enough.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::types::Sector;

/// Engine configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Root directory for the active database, archives and file index
    pub data_dir: PathBuf,

    /// Salience decay parameters
    pub decay: DecayConfig,

    /// Waypoint formation parameters
    pub association: AssociationConfig,

    /// Archive container parameters
    pub archive: ArchiveConfig,

    /// Hybrid query fusion parameters
    pub query: QueryConfig,

    /// Background archival scheduler
    pub scheduler: SchedulerConfig,

    /// File indexing parameters
    pub files: FileIndexConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".hmem"),
            decay: DecayConfig::default(),
            association: AssociationConfig::default(),
            archive: ArchiveConfig::default(),
            query: QueryConfig::default(),
            scheduler: SchedulerConfig::default(),
            files: FileIndexConfig::default(),
        }
    }
}

/// Dual-process decay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecayConfig {
    /// Half-life of the fast short-term component in days (default: 1)
    pub short_half_life_days: f64,

    /// Half-life of the slow long-term component in days (default: 45)
    pub long_half_life_days: f64,

    /// How quickly repeated access shifts weight to the long-term component (default: 0.35)
    pub entrenchment_rate: f64,

    /// Lower bound salience saturates toward (default: 0.05)
    pub floor: f64,

    /// Per-sector multipliers applied to elapsed time
    pub sector_rates: SectorRates,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            short_half_life_days: 1.0,
            long_half_life_days: 45.0,
            entrenchment_rate: 0.35,
            floor: 0.05,
            sector_rates: SectorRates::default(),
        }
    }
}

/// Relative decay speed per sector; 1.0 is neutral.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SectorRates {
    pub episodic: f64,
    pub semantic: f64,
    pub procedural: f64,
    pub emotional: f64,
    pub reflective: f64,
}

impl Default for SectorRates {
    fn default() -> Self {
        Self {
            episodic: 1.2,
            semantic: 0.8,
            procedural: 0.7,
            emotional: 1.0,
            reflective: 0.9,
        }
    }
}

impl SectorRates {
    pub fn rate(&self, sector: Sector) -> f64 {
        match sector {
            Sector::Episodic => self.episodic,
            Sector::Semantic => self.semantic,
            Sector::Procedural => self.procedural,
            Sector::Emotional => self.emotional,
            Sector::Reflective => self.reflective,
        }
    }
}

/// Association graph configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssociationConfig {
    /// Two accesses within this many seconds count as co-access (default: 3600)
    pub window_secs: u64,

    /// Weight added per co-access (default: 0.2)
    pub increment: f64,

    /// Maximum waypoints formed by a single access (default: 5)
    pub max_links: usize,

    /// Edges whose decayed weight drops below this are not live (default: 0.01)
    pub min_weight: f64,
}

impl Default for AssociationConfig {
    fn default() -> Self {
        Self {
            window_secs: 3600,
            increment: 0.2,
            max_links: 5,
            min_weight: 0.01,
        }
    }
}

/// What the archive index keeps of an archived record's content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexContent {
    /// First `summary_chars` characters; full content needs a decode
    Summary,
    /// Full content; larger sidecars, no decode for query results
    Full,
}

/// Archive configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Chunks per container before it is sealed (default: 256)
    pub max_chunks_per_container: usize,

    /// Optional cap on archive bytes per user
    pub max_bytes_per_user: Option<u64>,

    /// Records encoded per migration batch (default: 64)
    pub batch_size: usize,

    /// Index content policy (default: summary)
    pub index_content: IndexContent,

    /// Summary length in characters (default: 200)
    pub summary_chars: usize,

    /// Deflate chunk payloads (default: true)
    pub compress: bool,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            max_chunks_per_container: 256,
            max_bytes_per_user: None,
            batch_size: 64,
            index_content: IndexContent::Summary,
            summary_chars: 200,
            compress: true,
        }
    }
}

/// Hybrid query configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Relevance share of a hit score; the rest is salience (default: 0.7)
    pub blend_weight: f64,

    /// Multiplier applied to archive hit scores (default: 0.8)
    pub archive_weight: f64,

    /// Hits less relevant than this are dropped (default: 0.05)
    pub min_relevance: f64,

    /// Count query hits as accesses of active records (default: false)
    pub reinforce_on_query: bool,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            blend_weight: 0.7,
            archive_weight: 0.8,
            min_relevance: 0.05,
            reinforce_on_query: false,
        }
    }
}

/// Archival scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Start sweeping as soon as the engine opens (default: false)
    pub enabled: bool,

    /// Seconds between sweeps (default: 86400 = 1 day)
    pub interval_secs: u64,

    /// Minimum days since last access before a record is eligible (default: 60)
    pub age_days: u32,

    /// Maximum salience for a record to be eligible (default: 0.2)
    pub min_salience: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: 86_400,
            age_days: 60,
            min_salience: 0.2,
        }
    }
}

/// File indexing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileIndexConfig {
    /// Owner namespace for file chunks (default: "files")
    pub owner: String,

    /// Characters per chunk (default: 1024)
    pub chunk_size: usize,

    /// Characters shared by consecutive chunks (default: 128)
    pub overlap: usize,

    /// Path fragments always skipped by directory indexing
    pub default_excludes: Vec<String>,
}

impl Default for FileIndexConfig {
    fn default() -> Self {
        Self {
            owner: "files".into(),
            chunk_size: 1024,
            overlap: 128,
            default_excludes: vec![
                ".git".into(),
                "__pycache__".into(),
                "node_modules".into(),
                "target".into(),
                ".hmc".into(),
            ],
        }
    }
}

impl EngineConfig {
    /// Create a config rooted at the given data directory
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    pub fn with_decay(mut self, decay: DecayConfig) -> Self {
        self.decay = decay;
        self
    }

    pub fn with_association(mut self, association: AssociationConfig) -> Self {
        self.association = association;
        self
    }

    pub fn with_archive(mut self, archive: ArchiveConfig) -> Self {
        self.archive = archive;
        self
    }

    pub fn with_query(mut self, query: QueryConfig) -> Self {
        self.query = query;
        self
    }

    pub fn with_scheduler(mut self, scheduler: SchedulerConfig) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn with_files(mut self, files: FileIndexConfig) -> Self {
        self.files = files;
        self
    }

    /// Path of the active tier database
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("active.db")
    }

    /// Root of the per-user archive directories
    pub fn archive_dir(&self) -> PathBuf {
        self.data_dir.join("archives")
    }

    /// Root of the file index archive
    pub fn file_index_dir(&self) -> PathBuf {
        self.data_dir.join("file_index")
    }

    /// Waypoint snapshot file
    pub fn waypoints_path(&self) -> PathBuf {
        self.data_dir.join("waypoints.json")
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(ConfigValidationError::MissingDataDir);
        }

        let d = &self.decay;
        if d.short_half_life_days <= 0.0 || d.long_half_life_days <= 0.0 {
            return Err(invalid("decay.*_half_life_days", "must be greater than 0"));
        }
        if d.short_half_life_days > d.long_half_life_days {
            return Err(invalid(
                "decay.short_half_life_days",
                "must not exceed decay.long_half_life_days",
            ));
        }
        if d.entrenchment_rate < 0.0 {
            return Err(invalid("decay.entrenchment_rate", "must not be negative"));
        }
        if d.floor <= 0.0 || d.floor >= 1.0 {
            return Err(invalid("decay.floor", "must be between 0 and 1 (exclusive)"));
        }
        for sector in Sector::ALL {
            if d.sector_rates.rate(sector) <= 0.0 {
                return Err(invalid(
                    format!("decay.sector_rates.{}", sector.as_str()),
                    "must be greater than 0",
                ));
            }
        }

        if self.association.increment <= 0.0 || self.association.increment > 1.0 {
            return Err(invalid("association.increment", "must be between 0 and 1"));
        }

        if self.archive.max_chunks_per_container == 0 {
            return Err(invalid("archive.max_chunks_per_container", "must be greater than 0"));
        }
        if self.archive.batch_size == 0 {
            return Err(invalid("archive.batch_size", "must be greater than 0"));
        }

        if !(0.0..=1.0).contains(&self.query.blend_weight) {
            return Err(invalid("query.blend_weight", "must be between 0 and 1"));
        }
        if !(0.0..=1.0).contains(&self.query.archive_weight) {
            return Err(invalid("query.archive_weight", "must be between 0 and 1"));
        }

        if self.scheduler.interval_secs == 0 {
            return Err(invalid("scheduler.interval_secs", "must be greater than 0"));
        }
        if !(0.0..=1.0).contains(&self.scheduler.min_salience) {
            return Err(invalid("scheduler.min_salience", "must be between 0 and 1"));
        }

        if self.files.chunk_size == 0 || self.files.overlap >= self.files.chunk_size {
            return Err(invalid("files.overlap", "must be smaller than files.chunk_size"));
        }
        if self.files.owner.is_empty() {
            return Err(invalid("files.owner", "must not be empty"));
        }

        Ok(())
    }
}

fn invalid(field: impl Into<String>, message: impl Into<String>) -> ConfigValidationError {
    ConfigValidationError::InvalidValue {
        field: field.into(),
        message: message.into(),
    }
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("data_dir is required")]
    MissingDataDir,

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.scheduler.interval_secs, 86_400);
        assert_eq!(config.scheduler.age_days, 60);
        assert_eq!(config.query.archive_weight, 0.8);
        assert_eq!(config.files.chunk_size, 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = EngineConfig::new("/tmp/hmem").with_query(QueryConfig {
            blend_weight: 0.5,
            ..Default::default()
        });

        assert_eq!(config.database_path(), PathBuf::from("/tmp/hmem/active.db"));
        assert_eq!(config.archive_dir(), PathBuf::from("/tmp/hmem/archives"));
        assert_eq!(config.query.blend_weight, 0.5);
    }

    #[test]
    fn test_config_validation() {
        let mut config = EngineConfig::default();
        config.decay.floor = 0.0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.files.overlap = config.files.chunk_size;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.decay.sector_rates.episodic = 0.0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("episodic"));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"query": {"blend_weight": 0.4}}"#).unwrap();
        assert_eq!(config.query.blend_weight, 0.4);
        assert_eq!(config.query.archive_weight, 0.8);
        assert_eq!(config.archive.index_content, IndexContent::Summary);
    }
}
