//! Archival scheduler commands.

use anyhow::{Context as _, Result, bail};
use chrono::Local;
use colored::Colorize;
use hmem_core::{RunNowOutcome, SchedulerAction as Action, SchedulerStatus};

use super::{Context, print_json};
use crate::cli::{SchedulerAction, SchedulerCommand};

/// Execute scheduler command.
pub async fn execute(cmd: SchedulerCommand, ctx: &Context) -> Result<()> {
    match cmd.action {
        SchedulerAction::Status => status(ctx).await,
        SchedulerAction::RunNow => run_now(ctx).await,
        // the interval override is applied before the engine opens
        SchedulerAction::Daemon { .. } => daemon(ctx).await,
    }
}

async fn status(ctx: &Context) -> Result<()> {
    let status = ctx.engine.scheduler_status().await;
    if ctx.json {
        return print_json(&status);
    }
    print_status(&status);
    Ok(())
}

async fn run_now(ctx: &Context) -> Result<()> {
    let outcome = ctx
        .engine
        .scheduler_control(Action::RunNow)
        .await
        .context("Scheduler did not respond")?;

    if ctx.json {
        return print_json(&outcome);
    }
    match outcome {
        Some(RunNowOutcome::Completed { report }) => {
            println!(
                "{} Sweep finished: {} migrated, {} failed in {} ms",
                "✓".green(),
                report.migrated,
                report.failures.len(),
                report.duration_ms
            );
            Ok(())
        }
        Some(RunNowOutcome::Coalesced) => {
            println!("{} A sweep is already running", "⚠".yellow());
            Ok(())
        }
        Some(RunNowOutcome::Failed { error }) => bail!("Sweep failed: {error}"),
        None => Ok(()),
    }
}

async fn daemon(ctx: &Context) -> Result<()> {
    ctx.engine
        .scheduler_control(Action::Start)
        .await
        .context("Failed to start scheduler")?;

    let status = ctx.engine.scheduler_status().await;
    println!(
        "{} Archiving every {}s; press Ctrl-C to stop",
        "✓".green(),
        status.interval_secs
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    ctx.engine
        .scheduler_control(Action::Stop)
        .await
        .context("Failed to stop scheduler")?;
    let status = ctx.engine.scheduler_status().await;
    println!();
    print_status(&status);
    Ok(())
}

fn print_status(status: &SchedulerStatus) {
    let state = if status.in_flight {
        "sweeping".yellow()
    } else if status.running {
        "running".green()
    } else {
        "stopped".dimmed()
    };
    println!("{} {}", "Scheduler".bold(), state);
    println!("  Interval:       {}s", status.interval_secs);
    match status.last_run_at {
        Some(at) => println!(
            "  Last run:       {} ({} migrated)",
            at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
            status.last_count
        ),
        None => println!("  Last run:       never"),
    }
    if let Some(next) = status.next_run_at {
        println!(
            "  Next run:       {}",
            next.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
        );
    }
    println!("  Total migrated: {}", status.total_migrated);
    if let Some(error) = &status.last_error {
        println!("  Last error:     {}", error.red());
    }
}
