//! hmem - Hybrid Memory CLI
//!
//! Stores memories in a decaying active tier, archives the faded ones into
//! compressed containers, and keeps both searchable.

use anyhow::{Context as _, Result};
use clap::Parser;
use hmem_core::Engine;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod cli;
mod commands;
mod config;

use cli::{Cli, Commands, SchedulerAction, SchedulerCommand};
use commands::Context;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive("hmem=info".parse()?))
        .init();

    let cli = Cli::parse();

    // Load configuration
    let config = config::Config::load()?;
    let mut engine_config = config.engine_config();

    if let Commands::Config = cli.command {
        println!("# {}", config::Config::config_path().display());
        print!("{}", toml::to_string_pretty(&engine_config)?);
        return Ok(());
    }
    if let Commands::Scheduler(SchedulerCommand {
        action: SchedulerAction::Daemon {
            interval_secs: Some(secs),
        },
    }) = cli.command
    {
        engine_config.scheduler.interval_secs = secs;
    }

    let engine = Engine::open(engine_config)
        .await
        .context("Failed to open memory engine")?;
    let ctx = Context {
        engine,
        user: config.resolve_user(cli.user.as_deref()),
        json: cli.json,
    };
    tracing::debug!(user = %ctx.user, data_dir = %ctx.engine.config().data_dir.display(), "Engine ready");

    let result = run(cli.command, &ctx).await;
    ctx.engine.shutdown().await?;
    result
}

async fn run(command: Commands, ctx: &Context) -> Result<()> {
    use commands::memory;

    match command {
        Commands::Add { content, sector } => memory::add(ctx, &content, sector.as_deref()).await,
        Commands::Query {
            text,
            top_k,
            active_only,
        } => memory::query(ctx, &text, top_k, active_only).await,
        Commands::Archive {
            age_days,
            min_salience,
        } => memory::archive(ctx, age_days, min_salience).await,
        Commands::Recall { id } => memory::recall(ctx, &id).await,
        Commands::Get { id } => memory::get(ctx, &id).await,
        Commands::Forget { id } => memory::forget(ctx, &id).await,
        Commands::Stats => memory::stats(ctx).await,
        Commands::Top { limit } => memory::top(ctx, limit).await,
        Commands::Neighbors { id, limit } => memory::neighbors(ctx, &id, limit).await,
        Commands::Files(cmd) => commands::files::execute(cmd, ctx).await,
        Commands::Scheduler(cmd) => commands::scheduler::execute(cmd, ctx).await,
        Commands::Container(cmd) => commands::container::execute(cmd, ctx).await,
        Commands::Config => Ok(()),
    }
}
