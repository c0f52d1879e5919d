//! File indexing commands.

use anyhow::{Context as _, Result};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Duration;

use super::{Context, print_json, truncate};
use crate::cli::{FilesAction, FilesCommand};
use hmem_core::IndexStatus;

/// Execute files command.
pub async fn execute(cmd: FilesCommand, ctx: &Context) -> Result<()> {
    match cmd.action {
        FilesAction::Index {
            path,
            no_preserve_lines,
        } => index(ctx, &path, !no_preserve_lines).await,
        FilesAction::IndexDir { dir, pattern, exclude } => {
            index_dir(ctx, &dir, pattern.as_deref(), &exclude).await
        }
        FilesAction::Search {
            query,
            file_type,
            top_k,
        } => search(ctx, &query, file_type.as_deref(), top_k).await,
        FilesAction::List => list(ctx).await,
        FilesAction::Stats => stats(ctx).await,
    }
}

async fn index(ctx: &Context, path: &Path, preserve_lines: bool) -> Result<()> {
    let result = ctx
        .engine
        .index_file(path, preserve_lines)
        .await
        .with_context(|| format!("Failed to index {}", path.display()))?;

    if ctx.json {
        return print_json(&result);
    }
    match result.status {
        IndexStatus::Indexed => println!(
            "{} Indexed {} ({} chunks, {})",
            "✓".green(),
            result.path.cyan(),
            result.chunks_indexed,
            result.file_type
        ),
        IndexStatus::AlreadyIndexed => {
            println!("{} {} is unchanged", "•".dimmed(), result.path.cyan())
        }
    }
    Ok(())
}

async fn index_dir(ctx: &Context, dir: &Path, pattern: Option<&str>, exclude: &[String]) -> Result<()> {
    let spinner = if ctx.json {
        ProgressBar::hidden()
    } else {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(ProgressStyle::default_spinner().template("{spinner} {msg} [{elapsed}]")?);
        spinner.set_message(format!("Indexing {}", dir.display()));
        spinner.enable_steady_tick(Duration::from_millis(120));
        spinner
    };

    let result = ctx.engine.index_directory(dir, pattern, exclude).await;
    spinner.finish_and_clear();
    let result = result.with_context(|| format!("Failed to index {}", dir.display()))?;

    if ctx.json {
        return print_json(&result);
    }
    println!(
        "{} {} files indexed ({} chunks), {} unchanged, {} excluded",
        "✓".green(),
        result.files_indexed,
        result.chunks_indexed,
        result.files_unchanged,
        result.files_skipped
    );
    for error in &result.errors {
        println!("  {} {}: {}", "✗".red(), error.path, error.error);
    }
    Ok(())
}

async fn search(ctx: &Context, query: &str, file_type: Option<&str>, top_k: usize) -> Result<()> {
    let hits = ctx
        .engine
        .search_files(query, file_type, top_k)
        .await
        .context("File search failed")?;

    if ctx.json {
        return print_json(&hits);
    }
    if hits.is_empty() {
        println!("{} No matching files", "⚠".yellow());
        return Ok(());
    }
    for (i, hit) in hits.iter().enumerate() {
        let lines = hit
            .line_range
            .map(|r| format!(":{}-{}", r.start, r.end))
            .unwrap_or_default();
        println!(
            "  {}. {}{} <{}> {:.3}",
            i + 1,
            hit.path.cyan(),
            lines,
            hit.file_type.dimmed(),
            hit.score
        );
        println!("     {}", truncate(&hit.content, 120));
    }
    Ok(())
}

async fn list(ctx: &Context) -> Result<()> {
    let files = ctx.engine.files().list_files().await;

    if ctx.json {
        return print_json(&files);
    }
    if files.is_empty() {
        println!("{} No indexed files", "⚠".yellow());
        return Ok(());
    }
    for file in &files {
        println!(
            "  {} <{}> {} chunks, {} bytes, {}",
            file.path.cyan(),
            file.file_type.dimmed(),
            file.chunk_count,
            file.file_size,
            file.indexed_at.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}

async fn stats(ctx: &Context) -> Result<()> {
    let stats = ctx.engine.file_stats().await.context("Failed to load file stats")?;

    if ctx.json {
        return print_json(&stats);
    }
    println!("{}", "File index".bold());
    println!("  Files:   {}", stats.total_files);
    println!("  Chunks:  {}", stats.total_chunks);
    println!("  Source:  {} bytes", stats.total_source_bytes);
    println!("  Archive: {} bytes", stats.archive_bytes);
    for (file_type, count) in &stats.file_types {
        println!("    {file_type}: {count}");
    }
    Ok(())
}
