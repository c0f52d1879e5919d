//! Memory commands: store, search, archive, recall, forget.

use anyhow::{Context as _, Result, bail};
use colored::Colorize;
use hmem_core::{MemoryRecord, QueryMemoryRequest, Sector, Tier};
use serde_json::json;

use super::{Context, print_json, short_id, truncate};

fn tier_label(tier: Tier) -> colored::ColoredString {
    match tier {
        Tier::Active => tier.as_str().green(),
        Tier::Archived => tier.as_str().blue(),
    }
}

fn parse_sector(sector: Option<&str>) -> Result<Option<Sector>> {
    match sector {
        None => Ok(None),
        Some(s) => match Sector::from_str(&s.to_lowercase()) {
            Some(sector) => Ok(Some(sector)),
            None => bail!(
                "Invalid sector: {}. Use: episodic, semantic, procedural, emotional, or reflective",
                s
            ),
        },
    }
}

pub async fn add(ctx: &Context, content: &str, sector: Option<&str>) -> Result<()> {
    let hint = parse_sector(sector)?;
    let added = ctx
        .engine
        .add_memory(content, &ctx.user, hint)
        .await
        .context("Failed to store memory")?;

    if ctx.json {
        return print_json(&added);
    }
    println!("{} Stored in {} sector", "✓".green(), added.sector.to_string().cyan());
    println!("  ID: {}", added.id);
    println!("  Salience: {:.3}", added.salience);
    Ok(())
}

pub async fn query(ctx: &Context, text: &str, top_k: usize, active_only: bool) -> Result<()> {
    let mut request = QueryMemoryRequest::new(text, &ctx.user).with_top_k(top_k);
    if active_only {
        request = request.active_only();
    }
    let hits = ctx.engine.query_memory(request).await.context("Query failed")?;

    if ctx.json {
        return print_json(&hits);
    }
    if hits.is_empty() {
        println!("{} No memories found", "⚠".yellow());
        return Ok(());
    }

    println!("{} Found {} memories:", "✓".green(), hits.len());
    println!();
    for (i, hit) in hits.iter().enumerate() {
        println!(
            "  {}. {} [{}] <{}> {:.3}",
            i + 1,
            short_id(&hit.id).cyan(),
            tier_label(hit.tier),
            hit.sector.to_string().dimmed(),
            hit.score
        );
        println!("     {}", truncate(&hit.content, 100));
    }
    Ok(())
}

pub async fn archive(ctx: &Context, age_days: Option<u32>, min_salience: Option<f64>) -> Result<()> {
    let defaults = &ctx.engine.config().scheduler;
    let age_days = age_days.unwrap_or(defaults.age_days);
    let min_salience = min_salience.unwrap_or(defaults.min_salience);

    let response = ctx
        .engine
        .archive_memories(age_days, min_salience)
        .await
        .context("Archival sweep failed")?;

    if ctx.json {
        return print_json(&response);
    }
    println!(
        "{} Archived {} memories (idle ≥ {} days, salience ≤ {:.2})",
        "✓".green(),
        response.migrated_count,
        age_days,
        min_salience
    );
    for failure in &response.errors {
        println!(
            "  {} {} ({}): {}",
            "✗".red(),
            short_id(&failure.record_id),
            failure.user_id,
            failure.error
        );
    }
    Ok(())
}

pub async fn recall(ctx: &Context, id: &str) -> Result<()> {
    let recalled = ctx
        .engine
        .recall_memory(id, Some(&ctx.user))
        .await
        .with_context(|| format!("Failed to recall {id}"))?;

    if ctx.json {
        return print_json(&recalled);
    }
    println!("{} Recalled {} to the {} tier", "✓".green(), recalled.id.cyan(), tier_label(recalled.tier));
    println!("  {}", truncate(&recalled.content, 200));
    Ok(())
}

pub async fn get(ctx: &Context, id: &str) -> Result<()> {
    let record = ctx
        .engine
        .get_memory(id, &ctx.user)
        .await
        .with_context(|| format!("Failed to load {id}"))?;

    if ctx.json {
        return print_json(&record);
    }
    print_record(&record);
    Ok(())
}

pub async fn forget(ctx: &Context, id: &str) -> Result<()> {
    let tier = ctx
        .engine
        .delete_memory(id, &ctx.user)
        .await
        .with_context(|| format!("Failed to delete {id}"))?;

    if ctx.json {
        return print_json(&json!({ "id": id, "deleted_from": tier }));
    }
    println!("{} Deleted {} from the {} tier", "✓".green(), id, tier_label(tier));
    Ok(())
}

pub async fn stats(ctx: &Context) -> Result<()> {
    let stats = ctx.engine.get_stats(&ctx.user).await.context("Failed to load stats")?;

    if ctx.json {
        return print_json(&stats);
    }
    println!("{}", format!("Memory statistics for {}", stats.user_id).bold());
    println!("  Active:     {}", stats.active_count.to_string().green());
    println!("  Archived:   {}", stats.archived_count.to_string().blue());
    println!("  Salience:   {:.3} (mean, active)", stats.mean_salience);
    println!("  Containers: {}", stats.containers);
    println!(
        "  Storage:    {} bytes ({} active, {} archive)",
        stats.storage_bytes, stats.active_bytes, stats.archive_bytes
    );
    Ok(())
}

pub async fn top(ctx: &Context, limit: usize) -> Result<()> {
    let records = ctx
        .engine
        .top_memories(&ctx.user, limit)
        .await
        .context("Failed to rank memories")?;

    if ctx.json {
        return print_json(&records);
    }
    if records.is_empty() {
        println!("{} No active memories", "⚠".yellow());
        return Ok(());
    }
    for (i, record) in records.iter().enumerate() {
        println!(
            "  {}. {} <{}> {:.3}  {}",
            i + 1,
            short_id(&record.id).cyan(),
            record.sector.to_string().dimmed(),
            record.salience,
            truncate(&record.content, 80)
        );
    }
    Ok(())
}

pub async fn neighbors(ctx: &Context, id: &str, limit: usize) -> Result<()> {
    let neighbors = ctx
        .engine
        .neighbors(id, &ctx.user, limit)
        .await
        .with_context(|| format!("Failed to load neighbours of {id}"))?;

    if ctx.json {
        let rows: Vec<_> = neighbors
            .iter()
            .map(|(id, weight)| json!({ "id": id, "weight": weight }))
            .collect();
        return print_json(&rows);
    }
    if neighbors.is_empty() {
        println!("{} No waypoints from {}", "⚠".yellow(), id);
        return Ok(());
    }
    for (neighbor, weight) in &neighbors {
        println!("  {} {:.3}", neighbor.cyan(), weight);
    }
    Ok(())
}

fn print_record(record: &MemoryRecord) {
    println!("{} [{}] <{}>", record.id.cyan(), tier_label(record.tier()), record.sector.to_string().dimmed());
    println!("  Salience:      {:.3}", record.salience);
    println!("  Accesses:      {}", record.access_count);
    println!("  Created:       {}", record.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("  Last accessed: {}", record.last_accessed_at.format("%Y-%m-%d %H:%M:%S UTC"));
    if let Some(location) = record.archive_location() {
        println!("  Container:     {} @ {}", location.container_id, location.offset);
    }
    if let Some(source) = &record.source {
        println!("  Source:        {}", source.path);
    }
    println!();
    println!("{}", record.content);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sector() {
        assert_eq!(parse_sector(None).unwrap(), None);
        assert_eq!(parse_sector(Some("Procedural")).unwrap(), Some(Sector::Procedural));
        assert!(parse_sector(Some("spatial")).is_err());
    }
}
