//! Active Memory Tier
//!
//! Everything that lives in the hot tier:
//!
//! - **classifier** - cognitive sector assignment
//! - **decay** - dual-process salience
//! - **graph** - waypoints between co-accessed memories
//! - **active** - SQLite-backed record store
//! - **embeddings** - the opaque embedding seam

pub mod active;
pub mod classifier;
pub mod decay;
pub mod embeddings;
pub mod graph;
mod migrations;

pub use active::{ActiveStore, ScanFilter};
pub use classifier::{ClassifyContext, SectorClassifier};
pub use decay::DecayEngine;
pub use embeddings::{Embedder, HashEmbedder, cosine_similarity};
#[cfg(feature = "embeddings")]
pub use embeddings::FastEmbedder;
pub use graph::{AssociationGraph, Waypoint};
