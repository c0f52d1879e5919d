//! Shared Type Definitions
//!
//! Records, sectors, tiers and archive pointers used by every component.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Cognitive sector a memory is classified into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sector {
    Episodic,
    Semantic,
    Procedural,
    Emotional,
    Reflective,
}

impl Sector {
    pub const ALL: [Sector; 5] = [
        Self::Episodic,
        Self::Semantic,
        Self::Procedural,
        Self::Emotional,
        Self::Reflective,
    ];

    /// Convert from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "episodic" => Some(Self::Episodic),
            "semantic" => Some(Self::Semantic),
            "procedural" => Some(Self::Procedural),
            "emotional" => Some(Self::Emotional),
            "reflective" => Some(Self::Reflective),
            _ => None,
        }
    }

    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Episodic => "episodic",
            Self::Semantic => "semantic",
            Self::Procedural => "procedural",
            Self::Emotional => "emotional",
            Self::Reflective => "reflective",
        }
    }
}

impl std::fmt::Display for Sector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Storage tier of a memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Active,
    Archived,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Archived => "archived",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Container identifier, monotonically increasing per user
pub type ContainerId = u64;

/// Where an archived record lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArchiveLocation {
    pub container_id: ContainerId,
    pub offset: u64,
}

/// Fully qualified pointer to one chunk
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkRef {
    pub user_id: String,
    pub container_id: ContainerId,
    pub offset: u64,
    pub length: u64,
}

impl ChunkRef {
    pub fn location(&self) -> ArchiveLocation {
        ArchiveLocation {
            container_id: self.container_id,
            offset: self.offset,
        }
    }
}

/// Inclusive line range inside a source file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRange {
    pub start: u32,
    pub end: u32,
}

/// Provenance of a record produced by file indexing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub path: String,
    pub line_range: Option<LineRange>,
    pub file_hash: String,
    pub file_type: String,
}

/// A memory item, in either tier.
///
/// `tier` and `archive_location` are private and only change together through
/// [`MemoryRecord::mark_archived`] and [`MemoryRecord::mark_active`]. Records
/// serialize for output but are never deserialized; the archive decodes its
/// own payload type and flips the tier explicitly.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryRecord {
    pub id: String,
    pub user_id: String,
    pub content: String,
    pub sector: Sector,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub access_count: u32,
    /// Derived; recomputed whenever the record is read
    pub salience: f64,
    pub embedding: Option<Vec<f32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceRef>,
    tier: Tier,
    archive_location: Option<ArchiveLocation>,
}

impl MemoryRecord {
    /// Create a fresh active record that has never been accessed
    pub fn new(
        id: impl Into<String>,
        user_id: impl Into<String>,
        content: impl Into<String>,
        sector: Sector,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            content: content.into(),
            sector,
            created_at,
            last_accessed_at: created_at,
            access_count: 0,
            salience: 1.0,
            embedding: None,
            source: None,
            tier: Tier::Active,
            archive_location: None,
        }
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn archive_location(&self) -> Option<ArchiveLocation> {
        self.archive_location
    }

    pub fn is_archived(&self) -> bool {
        self.tier == Tier::Archived
    }

    pub fn mark_archived(&mut self, location: ArchiveLocation) {
        self.tier = Tier::Archived;
        self.archive_location = Some(location);
    }

    pub fn mark_active(&mut self) {
        self.tier = Tier::Active;
        self.archive_location = None;
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_source(mut self, source: SourceRef) -> Self {
        self.source = Some(source);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sector_str_roundtrip() {
        for sector in Sector::ALL {
            assert_eq!(Sector::from_str(sector.as_str()), Some(sector));
        }
        assert_eq!(Sector::from_str("unknown"), None);
        assert_eq!(Sector::Reflective.to_string(), "reflective");
    }

    #[test]
    fn test_tier_flips_with_location() {
        let mut record = MemoryRecord::new("m1", "u1", "hello", Sector::Semantic, Utc::now());
        assert_eq!(record.tier(), Tier::Active);
        assert!(record.archive_location().is_none());

        let location = ArchiveLocation {
            container_id: 2,
            offset: 96,
        };
        record.mark_archived(location);
        assert!(record.is_archived());
        assert_eq!(record.archive_location(), Some(location));

        record.mark_active();
        assert_eq!(record.tier(), Tier::Active);
        assert!(record.archive_location().is_none());
    }

    #[test]
    fn test_record_serializes_tier() {
        let record = MemoryRecord::new("m1", "u1", "hello", Sector::Episodic, Utc::now());
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["tier"], "active");
        assert_eq!(json["sector"], "episodic");
        assert!(json.get("source").is_none());
    }
}
