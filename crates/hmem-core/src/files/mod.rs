//! File Indexing
//!
//! - **chunking** - file types, line and character windows
//! - **extract** - turning files into text
//! - **indexer** - registry-backed indexing and search over a separate archive

pub mod chunking;
pub mod extract;
pub mod indexer;

pub use chunking::{TextChunk, chunk_chars, chunk_lines, file_type, is_code};
pub use extract::{PlainTextExtractor, TextExtractor};
pub use indexer::{
    FileError, FileHit, FileIndexStats, FileIndexer, IndexDirectoryResult, IndexFileResult,
    IndexStatus, IndexedFile,
};
