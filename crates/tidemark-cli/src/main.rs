//! Tidemark migration command-line tool.
//!
//! Generates, lists, applies and reverts schema migrations for a tidemark
//! store.

mod commands;
mod config;
mod error;
mod formatter;

use clap::{Parser, Subcommand};
use formatter::OutputFormat;
use std::path::PathBuf;
use std::process::ExitCode;

/// Tidemark schema migrations
#[derive(Parser, Debug)]
#[command(name = "migrate")]
#[command(version, about = "Schema migrations for tidemark stores")]
pub struct Args {
    /// Project configuration file
    #[arg(long, global = true, default_value = "migrate.json")]
    pub config: PathBuf,

    /// Store directory (overrides the configuration file)
    #[arg(long, global = true)]
    pub store: Option<PathBuf>,

    /// Migrations directory (overrides the configuration file)
    #[arg(long, global = true)]
    pub migrations: Option<PathBuf>,

    /// Entity declarations file (overrides the configuration file)
    #[arg(long, global = true)]
    pub schema: Option<PathBuf>,

    /// Seconds to wait for the migration lock
    #[arg(long, global = true)]
    pub lock_timeout: Option<u64>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Generate a migration from the difference between the declared and applied schema
    New {
        /// Migration name (letters, digits and underscores)
        name: String,

        /// Permit changes that lose data
        #[arg(long)]
        allow_destructive: bool,

        /// Permit down steps that cannot fully restore the prior state
        #[arg(long)]
        accept_irreversible: bool,

        /// Treat a table as renamed instead of dropped and created
        #[arg(long = "rename-table", value_name = "OLD=NEW")]
        rename_table: Vec<String>,

        /// Treat a column as renamed instead of dropped and added
        #[arg(long = "rename-column", value_name = "TABLE.OLD=NEW")]
        rename_column: Vec<String>,
    },

    /// List applied and pending migrations
    List {
        /// Output format
        #[arg(long, default_value = "table", value_enum)]
        format: OutputFormat,
    },

    /// Apply pending migrations, or move to a given migration
    Up {
        /// Target migration name; 0 reverts everything
        #[arg(long)]
        to: Option<String>,
    },

    /// Revert the most recently applied migration
    Down,

    /// Delete the newest migration file if it has not been applied
    RemoveLast,

    /// Print the SQL for a range of migrations
    Script {
        /// Start after this migration (default: the empty schema)
        #[arg(long)]
        from: Option<String>,

        /// End at this migration (default: the newest)
        #[arg(long)]
        to: Option<String>,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();

    // Logs go to stderr; stdout carries command output
    let default_filter = if args.verbose {
        "tidemark_core=debug,tidemark_cli=debug"
    } else {
        "tidemark_core=info,tidemark_cli=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match commands::run(&args) {
        Ok(output) => {
            if !output.is_empty() {
                println!("{}", output);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(e.exit_code())
        }
    }
}
