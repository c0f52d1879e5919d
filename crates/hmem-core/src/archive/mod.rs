//! Archive Tier
//!
//! Cold storage for low-salience memories: a chunk [`format`], per-user
//! append-only containers managed by the [`codec`], and an in-memory
//! similarity [`index`] over their sidecars.

pub mod codec;
pub mod format;
pub mod index;

pub use codec::{ArchivalCodec, ChunkMeta, ContainerMeta, DecodeAllReport, EncodedChunk};
pub use index::{ArchiveIndex, IndexEntry, IndexHit};
