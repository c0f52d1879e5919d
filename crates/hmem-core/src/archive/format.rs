//! Chunk Frame Format
//!
//! Every chunk is independently decodable:
//!
//! ```text
//! "HMCK" | version u8 | flags u8 | header_len u32le | payload_len u32le
//! header   JSON ChunkHeader (record id, user, sector, created_at, payload sha256)
//! payload  JSON ArchivedRecord, deflated when flags & FLAG_DEFLATE
//! "HMCE" | sha256(header || payload)
//! ```
//!
//! The payload checksum lives in the header and the trailer digest covers
//! both, so a flipped byte anywhere in the frame is caught.

use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::{Read, Write};

use crate::types::{ArchiveLocation, ContainerId, MemoryRecord, Sector, SourceRef};
use crate::{HmemError, HmemResult};

pub const CHUNK_MAGIC: &[u8; 4] = b"HMCK";
pub const TRAILER_MAGIC: &[u8; 4] = b"HMCE";
pub const FORMAT_VERSION: u8 = 1;
pub const FLAG_DEFLATE: u8 = 0b0000_0001;

/// magic + version + flags + two u32 lengths
pub const PREAMBLE_LEN: usize = 14;
/// magic + sha256
pub const TRAILER_LEN: usize = 36;

/// Per-chunk metadata stored in front of the payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkHeader {
    pub record_id: String,
    pub user_id: String,
    pub sector: Sector,
    pub created_at: DateTime<Utc>,
    pub payload_sha256: String,
}

/// A record as stored in the archive; tier fields are implied by location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivedRecord {
    pub id: String,
    pub user_id: String,
    pub content: String,
    pub sector: Sector,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub access_count: u32,
    pub salience: f64,
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub source: Option<SourceRef>,
}

impl From<&MemoryRecord> for ArchivedRecord {
    fn from(record: &MemoryRecord) -> Self {
        Self {
            id: record.id.clone(),
            user_id: record.user_id.clone(),
            content: record.content.clone(),
            sector: record.sector,
            created_at: record.created_at,
            last_accessed_at: record.last_accessed_at,
            access_count: record.access_count,
            salience: record.salience,
            embedding: record.embedding.clone(),
            source: record.source.clone(),
        }
    }
}

impl ArchivedRecord {
    /// Rehydrate as an archived record at `location`
    pub fn into_record(self, location: ArchiveLocation) -> MemoryRecord {
        let mut record =
            MemoryRecord::new(self.id, self.user_id, self.content, self.sector, self.created_at);
        record.last_accessed_at = self.last_accessed_at;
        record.access_count = self.access_count;
        record.salience = self.salience;
        record.embedding = self.embedding;
        record.source = self.source;
        record.mark_archived(location);
        record
    }
}

/// Result of decoding one frame
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub header: ChunkHeader,
    pub record: ArchivedRecord,
    /// Total frame length in bytes
    pub length: u64,
    /// Hex trailer digest
    pub digest: String,
}

/// Serialize a record into a self-describing frame
pub fn encode_frame(record: &MemoryRecord, compress: bool) -> HmemResult<Vec<u8>> {
    let json = serde_json::to_vec(&ArchivedRecord::from(record))?;
    let (payload, flags) = if compress {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&json)?;
        (encoder.finish()?, FLAG_DEFLATE)
    } else {
        (json, 0)
    };

    let header = ChunkHeader {
        record_id: record.id.clone(),
        user_id: record.user_id.clone(),
        sector: record.sector,
        created_at: record.created_at,
        payload_sha256: hex::encode(Sha256::digest(&payload)),
    };
    let header = serde_json::to_vec(&header)?;

    let header_len = u32::try_from(header.len())
        .map_err(|_| HmemError::invalid_operation("chunk header too large"))?;
    let payload_len = u32::try_from(payload.len())
        .map_err(|_| HmemError::invalid_operation("chunk payload too large"))?;

    let mut frame =
        Vec::with_capacity(PREAMBLE_LEN + header.len() + payload.len() + TRAILER_LEN);
    frame.extend_from_slice(CHUNK_MAGIC);
    frame.push(FORMAT_VERSION);
    frame.push(flags);
    frame.extend_from_slice(&header_len.to_le_bytes());
    frame.extend_from_slice(&payload_len.to_le_bytes());
    frame.extend_from_slice(&header);
    frame.extend_from_slice(&payload);

    let mut hasher = Sha256::new();
    hasher.update(&header);
    hasher.update(&payload);
    frame.extend_from_slice(TRAILER_MAGIC);
    frame.extend_from_slice(&hasher.finalize());
    Ok(frame)
}

/// Total frame length declared by a preamble, if the preamble is well formed
pub fn frame_len(preamble: &[u8]) -> Option<u64> {
    if preamble.len() < PREAMBLE_LEN || &preamble[..4] != CHUNK_MAGIC {
        return None;
    }
    let header_len = u32::from_le_bytes([preamble[6], preamble[7], preamble[8], preamble[9]]);
    let payload_len =
        u32::from_le_bytes([preamble[10], preamble[11], preamble[12], preamble[13]]);
    Some(PREAMBLE_LEN as u64 + header_len as u64 + payload_len as u64 + TRAILER_LEN as u64)
}

/// Position of the next chunk magic at or after `from`
pub fn find_next_magic(bytes: &[u8], from: usize) -> Option<usize> {
    if from >= bytes.len() {
        return None;
    }
    bytes[from..]
        .windows(CHUNK_MAGIC.len())
        .position(|w| w == CHUNK_MAGIC)
        .map(|p| p + from)
}

/// Decode the frame starting at `bytes[0]`.
///
/// `container_id` and `offset` only label errors.
pub fn decode_frame(bytes: &[u8], container_id: ContainerId, offset: u64) -> HmemResult<DecodedFrame> {
    let corrupt = |reason: &str| HmemError::corruption(container_id, offset, reason);

    if bytes.len() < PREAMBLE_LEN {
        return Err(corrupt("truncated preamble"));
    }
    if &bytes[..4] != CHUNK_MAGIC {
        return Err(corrupt("bad chunk magic"));
    }
    if bytes[4] != FORMAT_VERSION {
        return Err(corrupt(&format!("unsupported format version {}", bytes[4])));
    }
    let flags = bytes[5];
    let length = frame_len(bytes).ok_or_else(|| corrupt("bad preamble"))?;
    if (bytes.len() as u64) < length {
        return Err(corrupt("truncated chunk"));
    }

    let header_len = u32::from_le_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]) as usize;
    let header_end = PREAMBLE_LEN + header_len;
    let payload_end = length as usize - TRAILER_LEN;
    let header_bytes = &bytes[PREAMBLE_LEN..header_end];
    let payload = &bytes[header_end..payload_end];
    let trailer = &bytes[payload_end..length as usize];

    if &trailer[..4] != TRAILER_MAGIC {
        return Err(corrupt("bad trailer magic"));
    }
    let mut hasher = Sha256::new();
    hasher.update(header_bytes);
    hasher.update(payload);
    let digest = hasher.finalize();
    if digest.as_slice() != &trailer[4..] {
        return Err(corrupt("trailer digest mismatch"));
    }

    let header: ChunkHeader =
        serde_json::from_slice(header_bytes).map_err(|_| corrupt("unreadable header"))?;
    if hex::encode(Sha256::digest(payload)) != header.payload_sha256 {
        return Err(corrupt("payload checksum mismatch"));
    }

    let json = if flags & FLAG_DEFLATE != 0 {
        let mut out = Vec::new();
        DeflateDecoder::new(payload)
            .read_to_end(&mut out)
            .map_err(|_| corrupt("payload inflate failed"))?;
        out
    } else {
        payload.to_vec()
    };

    let record: ArchivedRecord =
        serde_json::from_slice(&json).map_err(|_| corrupt("unreadable payload"))?;
    if record.id != header.record_id {
        return Err(corrupt("record id mismatch"));
    }

    Ok(DecodedFrame {
        header,
        record,
        length,
        digest: hex::encode(digest),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LineRange;

    fn sample() -> MemoryRecord {
        let mut record = MemoryRecord::new(
            "rec-1",
            "u1",
            "Q3 planning notes, with unicode: café ☕",
            Sector::Semantic,
            Utc::now(),
        )
        .with_embedding(vec![0.25, -0.5, 0.125, 1.0e-7]);
        record.access_count = 4;
        record.salience = 0.137;
        record
    }

    #[test]
    fn test_frame_roundtrip_preserves_record() {
        let record = sample().with_source(SourceRef {
            path: "/src/lib.rs".into(),
            line_range: Some(LineRange { start: 1, end: 20 }),
            file_hash: "abc".into(),
            file_type: "rust".into(),
        });

        for compress in [true, false] {
            let frame = encode_frame(&record, compress).unwrap();
            let decoded = decode_frame(&frame, 1, 0).unwrap();
            assert_eq!(decoded.length, frame.len() as u64);

            let location = ArchiveLocation {
                container_id: 1,
                offset: 0,
            };
            let restored = decoded.record.into_record(location);
            let mut expected = record.clone();
            expected.mark_archived(location);
            assert_eq!(restored, expected);
        }
    }

    #[test]
    fn test_decode_ignores_trailing_bytes() {
        let mut frame = encode_frame(&sample(), true).unwrap();
        let len = frame.len();
        frame.extend_from_slice(b"garbage after the frame");
        assert_eq!(decode_frame(&frame, 1, 0).unwrap().length, len as u64);
    }

    #[test]
    fn test_flipped_bytes_are_detected() {
        let frame = encode_frame(&sample(), true).unwrap();
        for position in [0, PREAMBLE_LEN + 3, frame.len() / 2, frame.len() - 1] {
            let mut damaged = frame.clone();
            damaged[position] ^= 0xFF;
            let err = decode_frame(&damaged, 7, 128).unwrap_err();
            assert!(err.is_corruption(), "byte {position} went unnoticed");
            assert!(err.to_string().contains("container 7"));
        }
    }

    #[test]
    fn test_truncation_is_corruption() {
        let frame = encode_frame(&sample(), false).unwrap();
        assert!(decode_frame(&frame[..10], 1, 0).unwrap_err().is_corruption());
        assert!(decode_frame(&frame[..frame.len() - 1], 1, 0).unwrap_err().is_corruption());
    }

    #[test]
    fn test_find_next_magic() {
        let frame = encode_frame(&sample(), true).unwrap();
        let mut bytes = b"junk".to_vec();
        bytes.extend_from_slice(&frame);
        assert_eq!(find_next_magic(&bytes, 0), Some(4));
        assert_eq!(find_next_magic(&bytes, 5), None);
        assert_eq!(frame_len(&bytes[4..]), Some(frame.len() as u64));
    }
}
