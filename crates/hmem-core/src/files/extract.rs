//! Text Extraction

use std::path::Path;

use crate::{HmemError, HmemResult};

/// Turns a file on disk into indexable text
pub trait TextExtractor: Send + Sync {
    fn extract(&self, path: &Path, file_type: &str) -> HmemResult<String>;
}

/// Reads files as UTF-8, replacing invalid sequences.
///
/// Binary document formats need a dedicated extractor and are rejected.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn extract(&self, path: &Path, file_type: &str) -> HmemResult<String> {
        if matches!(file_type, "pdf" | "epub") {
            return Err(HmemError::invalid_operation(format!(
                "no text extractor for {file_type} files: {}",
                path.display()
            )));
        }
        let bytes = std::fs::read(path)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_lossy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"hello \xFF world").unwrap();

        let text = PlainTextExtractor.extract(&path, "text").unwrap();
        assert!(text.starts_with("hello "));
        assert!(text.ends_with(" world"));
    }

    #[test]
    fn test_binary_documents_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.pdf");
        std::fs::write(&path, b"%PDF-1.7").unwrap();

        let err = PlainTextExtractor.extract(&path, "pdf").unwrap_err();
        assert!(matches!(err, HmemError::InvalidOperation { .. }));
    }
}
