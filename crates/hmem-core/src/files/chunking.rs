//! File Chunking
//!
//! Source code is split into line windows so every chunk can point back at
//! the lines it came from. Everything else is split into overlapping
//! character windows.

use std::path::Path;

use crate::types::LineRange;

/// Characters of `chunk_size` budgeted per line when windowing code
pub const CHARS_PER_LINE: usize = 50;

/// A piece of a file ready to be archived
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub text: String,
    pub line_range: Option<LineRange>,
}

/// File type label derived from the extension
pub fn file_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("py") => "python",
        Some("js") => "javascript",
        Some("ts") => "typescript",
        Some("java") => "java",
        Some("cpp") => "cpp",
        Some("c") => "c",
        Some("h") => "header",
        Some("rs") => "rust",
        Some("go") => "go",
        Some("md") => "markdown",
        Some("txt") => "text",
        Some("pdf") => "pdf",
        Some("epub") => "epub",
        Some("html") => "html",
        Some("css") => "css",
        Some("json") => "json",
        Some("xml") => "xml",
        Some("yaml" | "yml") => "yaml",
        _ => "unknown",
    }
}

/// Whether a file type is chunked by lines when lines are preserved
pub fn is_code(file_type: &str) -> bool {
    matches!(
        file_type,
        "python" | "javascript" | "typescript" | "java" | "cpp" | "c" | "rust" | "go"
    )
}

/// Split code into windows of `chunk_size / 50` lines, each prefixed with
/// `[file_name:start-end]`
pub fn chunk_lines(file_name: &str, content: &str, chunk_size: usize) -> Vec<TextChunk> {
    let window = (chunk_size / CHARS_PER_LINE).max(1);
    let lines: Vec<&str> = content.lines().collect();

    lines
        .chunks(window)
        .enumerate()
        .filter(|(_, group)| group.iter().any(|l| !l.trim().is_empty()))
        .map(|(i, group)| {
            let start = i * window + 1;
            let end = start + group.len() - 1;
            TextChunk {
                text: format!("[{file_name}:{start}-{end}]\n{}", group.join("\n")),
                line_range: Some(LineRange {
                    start: start as u32,
                    end: end as u32,
                }),
            }
        })
        .collect()
}

/// Split text into `chunk_size`-character windows where consecutive windows
/// share `overlap` characters. Windows never split a UTF-8 sequence.
pub fn chunk_chars(content: &str, chunk_size: usize, overlap: usize) -> Vec<TextChunk> {
    let boundaries: Vec<usize> = content.char_indices().map(|(i, _)| i).collect();
    let total = boundaries.len();
    let step = chunk_size.saturating_sub(overlap).max(1);

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < total {
        let end = (start + chunk_size).min(total);
        let to = boundaries.get(end).copied().unwrap_or(content.len());
        let text = &content[boundaries[start]..to];
        if !text.trim().is_empty() {
            chunks.push(TextChunk {
                text: text.to_string(),
                line_range: None,
            });
        }
        if end == total {
            break;
        }
        start += step;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_type_by_extension() {
        assert_eq!(file_type(Path::new("a/b/main.py")), "python");
        assert_eq!(file_type(Path::new("lib.RS")), "rust");
        assert_eq!(file_type(Path::new("x.h")), "header");
        assert_eq!(file_type(Path::new("conf.yml")), "yaml");
        assert_eq!(file_type(Path::new("Makefile")), "unknown");
        assert!(is_code("python"));
        assert!(!is_code("header"));
        assert!(!is_code("markdown"));
    }

    #[test]
    fn test_line_windows_carry_ranges() {
        let content: String = (1..=45).map(|i| format!("line {i}\n")).collect();
        let chunks = chunk_lines("main.py", &content, 1000);

        // 1000 / 50 = 20 lines per window
        assert_eq!(chunks.len(), 3);
        assert!(chunks[0].text.starts_with("[main.py:1-20]\nline 1\n"));
        assert_eq!(chunks[2].line_range, Some(LineRange { start: 41, end: 45 }));
        assert!(chunks[2].text.ends_with("line 45"));
    }

    #[test]
    fn test_blank_line_windows_are_dropped() {
        let content = format!("fn a() {{}}\n{}", "\n".repeat(30));
        let chunks = chunk_lines("a.rs", &content, 500);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].line_range, Some(LineRange { start: 1, end: 10 }));
    }

    #[test]
    fn test_char_windows_overlap() {
        let content = "abcdefghij".repeat(3);
        let chunks = chunk_chars(&content, 12, 4);
        assert_eq!(chunks[0].text, "abcdefghijab");
        assert_eq!(chunks[1].text, "ijabcdefghij");
        assert!(chunks.last().unwrap().text.ends_with("hij"));
        assert!(chunks.iter().all(|c| c.line_range.is_none()));
    }

    #[test]
    fn test_char_windows_respect_utf8() {
        let content = "café ☕ ".repeat(40);
        let chunks = chunk_chars(&content, 7, 2);
        assert!(!chunks.is_empty());
        for chunk in &chunks {
            assert!(chunk.text.chars().count() <= 7);
        }
    }
}
