//! Archive container maintenance commands.

use anyhow::{Context as _, Result};
use colored::Colorize;
use serde_json::json;

use super::{Context, print_json};
use crate::cli::{ContainerAction, ContainerCommand};

/// Execute container command.
pub async fn execute(cmd: ContainerCommand, ctx: &Context) -> Result<()> {
    match cmd.action {
        ContainerAction::Verify { container_id } => verify(ctx, container_id).await,
        ContainerAction::Rebuild { container_id } => rebuild(ctx, container_id).await,
        ContainerAction::Compact => compact(ctx),
    }
}

async fn verify(ctx: &Context, container_id: u64) -> Result<()> {
    let report = ctx
        .engine
        .verify_container(&ctx.user, container_id)
        .await
        .with_context(|| format!("Failed to verify container {container_id}"))?;

    if ctx.json {
        return print_json(&report);
    }
    let verdict = if report.is_healthy() {
        "healthy".green()
    } else {
        "damaged".red()
    };
    println!(
        "Container {} ({}) {}",
        container_id,
        if report.sealed { "sealed" } else { "open" },
        verdict
    );
    println!(
        "  Chunks: {} total, {} live, {} decoded",
        report.total_chunks, report.live_chunks, report.decoded
    );
    for chunk in &report.corrupted {
        let at = chunk
            .offset
            .map(|o| format!("offset {o}"))
            .unwrap_or_else(|| "unknown offset".to_string());
        println!("  {} {}: {}", "✗".red(), at, chunk.reason);
    }
    Ok(())
}

async fn rebuild(ctx: &Context, container_id: u64) -> Result<()> {
    let live = ctx
        .engine
        .rebuild_container_index(&ctx.user, container_id)
        .await
        .with_context(|| format!("Failed to rebuild container {container_id}"))?;

    if ctx.json {
        return print_json(&json!({ "container_id": container_id, "live_chunks": live }));
    }
    println!(
        "{} Rebuilt index for container {} ({} live chunks)",
        "✓".green(),
        container_id,
        live
    );
    Ok(())
}

fn compact(ctx: &Context) -> Result<()> {
    let dropped = ctx.engine.compact_archive_index();
    if ctx.json {
        return print_json(&json!({ "dropped": dropped }));
    }
    println!("{} Dropped {} tombstoned index entries", "✓".green(), dropped);
    Ok(())
}
