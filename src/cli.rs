use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pgperm")]
#[command(author = "pgperm contributors")]
#[command(version)]
#[command(about = "Declarative PostgreSQL roles, databases, schemas and privileges", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show what apply would change
    Plan(PlanArgs),

    /// Make the cluster match the objects file
    Apply(ApplyArgs),

    /// Show every object in dependency order
    Inspect(SourceArgs),

    /// Print the md5 verifier of a password, generating one if needed
    Password {
        /// Role the password belongs to
        username: String,

        /// Password to hash instead of a generated one
        #[arg(short, long)]
        password: Option<String>,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Where desired and observed state come from
#[derive(Debug, Clone, Args)]
pub struct SourceArgs {
    /// Objects file (TOML or JSON); defaults to objects.toml in the config dir
    pub objects: Option<PathBuf>,

    /// Snapshot of the current cluster state
    #[arg(long, env = "PGPERM_STATE")]
    pub state: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
pub struct PlanArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Also print the plan fingerprint
    #[arg(long)]
    pub fingerprint: bool,
}

#[derive(Debug, Clone, Args)]
pub struct ApplyArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Dry run - show what would be done
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Skip confirmation prompts
    #[arg(short, long)]
    pub yes: bool,

    /// Number of parallel jobs
    #[arg(short, long, default_value = "1")]
    pub jobs: usize,

    /// Write the SQL script here instead of the state dir
    #[arg(long)]
    pub script: Option<PathBuf>,

    /// Keep the snapshot unchanged
    #[arg(long)]
    pub no_save: bool,
}
