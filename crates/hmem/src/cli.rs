//! CLI argument definitions using clap derive macros.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Hybrid memory CLI
///
/// Decaying active memories, a compressed searchable archive, and file indexing.
#[derive(Parser, Debug)]
#[command(name = "hmem")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// User namespace for memory commands
    #[arg(short, long, global = true, env = "HMEM_USER")]
    pub user: Option<String>,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Store a new memory
    Add {
        /// Memory content
        content: String,

        /// Force a sector (episodic, semantic, procedural, emotional, reflective)
        #[arg(short, long)]
        sector: Option<String>,
    },

    /// Search active and archived memories
    Query {
        /// Query text
        text: String,

        /// Maximum number of results
        #[arg(short = 'k', long, default_value = "10")]
        top_k: usize,

        /// Skip the archive
        #[arg(long)]
        active_only: bool,
    },

    /// Run one archival sweep now
    Archive {
        /// Days since last access before a memory is eligible
        #[arg(long)]
        age_days: Option<u32>,

        /// Maximum salience of an eligible memory
        #[arg(long)]
        min_salience: Option<f64>,
    },

    /// Bring an archived memory back into the active tier
    Recall {
        /// Memory ID
        id: String,
    },

    /// Show one memory (counts as an access)
    Get {
        /// Memory ID
        id: String,
    },

    /// Delete a memory from whichever tier holds it
    Forget {
        /// Memory ID
        id: String,
    },

    /// Show storage statistics
    Stats,

    /// List the most salient active memories
    Top {
        #[arg(short = 'k', long, default_value = "10")]
        limit: usize,
    },

    /// List waypoint neighbours of a memory
    Neighbors {
        /// Memory ID
        id: String,

        #[arg(short = 'k', long, default_value = "5")]
        limit: usize,
    },

    /// File indexing
    Files(FilesCommand),

    /// Archival scheduler
    Scheduler(SchedulerCommand),

    /// Archive container maintenance
    Container(ContainerCommand),

    /// Show the effective configuration
    Config,
}

// ─────────────────────────────────────────────────────────────────────────────
// File Commands
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Args, Debug)]
pub struct FilesCommand {
    #[command(subcommand)]
    pub action: FilesAction,
}

#[derive(Subcommand, Debug)]
pub enum FilesAction {
    /// Index a single file
    Index {
        path: PathBuf,

        /// Chunk code by characters instead of line windows
        #[arg(long)]
        no_preserve_lines: bool,
    },

    /// Index every matching file under a directory
    IndexDir {
        dir: PathBuf,

        /// Glob relative to the directory
        #[arg(short, long)]
        pattern: Option<String>,

        /// Skip paths containing this fragment (repeatable)
        #[arg(short, long)]
        exclude: Vec<String>,
    },

    /// Search indexed files
    Search {
        query: String,

        /// Only return this file type (python, rust, markdown, ...)
        #[arg(short = 't', long = "type")]
        file_type: Option<String>,

        #[arg(short = 'k', long, default_value = "5")]
        top_k: usize,
    },

    /// List indexed files
    List,

    /// File index statistics
    Stats,
}

// ─────────────────────────────────────────────────────────────────────────────
// Scheduler Commands
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Args, Debug)]
pub struct SchedulerCommand {
    #[command(subcommand)]
    pub action: SchedulerAction,
}

#[derive(Subcommand, Debug)]
pub enum SchedulerAction {
    /// Show scheduler state
    Status,

    /// Run a sweep through the scheduler and wait for it
    RunNow,

    /// Run periodic sweeps until interrupted
    Daemon {
        /// Seconds between sweeps
        #[arg(long)]
        interval_secs: Option<u64>,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Container Commands
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Args, Debug)]
pub struct ContainerCommand {
    #[command(subcommand)]
    pub action: ContainerAction,
}

#[derive(Subcommand, Debug)]
pub enum ContainerAction {
    /// Decode every chunk of a container and report damage
    Verify { container_id: u64 },

    /// Reload a container's index entries from its bytes
    Rebuild { container_id: u64 },

    /// Drop tombstoned entries from the archive index
    Compact,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_query_with_globals() {
        let cli = Cli::try_parse_from(["hmem", "query", "budget", "-k", "3", "--user", "alice", "--json"])
            .unwrap();
        assert_eq!(cli.user.as_deref(), Some("alice"));
        assert!(cli.json);
        match cli.command {
            Commands::Query {
                text,
                top_k,
                active_only,
            } => {
                assert_eq!(text, "budget");
                assert_eq!(top_k, 3);
                assert!(!active_only);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_index_dir_excludes() {
        let cli = Cli::try_parse_from([
            "hmem", "files", "index-dir", "src", "-p", "**/*.rs", "-e", "gen", "-e", "vendor",
        ])
        .unwrap();
        match cli.command {
            Commands::Files(FilesCommand {
                action: FilesAction::IndexDir { dir, pattern, exclude },
            }) => {
                assert_eq!(dir, PathBuf::from("src"));
                assert_eq!(pattern.as_deref(), Some("**/*.rs"));
                assert_eq!(exclude, vec!["gen", "vendor"]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_scheduler_run_now() {
        let cli = Cli::try_parse_from(["hmem", "scheduler", "run-now"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Scheduler(SchedulerCommand {
                action: SchedulerAction::RunNow
            })
        ));
    }
}
