//! Command implementations for hmem CLI.
//!
//! Each submodule implements the logic for a command group.

pub mod container;
pub mod files;
pub mod memory;
pub mod scheduler;

use anyhow::Result;
use hmem_core::Engine;
use serde::Serialize;

/// State shared by every command
pub struct Context {
    pub engine: Engine,
    pub user: String,
    pub json: bool,
}

/// Pretty-print a value as JSON.
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Shorten text for one-line display without splitting a character.
pub fn truncate(text: &str, max_chars: usize) -> String {
    let flat = text.replace('\n', " ");
    match flat.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &flat[..cut]),
        None => flat,
    }
}

/// First eight characters of an id
pub fn short_id(id: &str) -> &str {
    match id.char_indices().nth(8) {
        Some((cut, _)) => &id[..cut],
        None => id,
    }
}
