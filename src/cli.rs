use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "iamsync")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Reconcile AWS IAM users against an edited export", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// AWS named profile (overrides config)
    #[arg(long, global = true)]
    pub profile: Option<String>,

    /// AWS region (overrides config)
    #[arg(long, global = true)]
    pub region: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Export every user's groups, policies and credential activity
    Export(ExportArgs),

    /// Show what an actions file would change, without changing anything
    Plan(PlanArgs),

    /// Apply an actions file
    Apply(ApplyArgs),

    /// Show the account credential report
    Report,

    /// Manage configuration
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

// ============================================================================
// Export
// ============================================================================

#[derive(Parser)]
pub struct ExportArgs {
    /// Write records here instead of stdout (`.csv` for a spreadsheet, else JSON)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Only export these users (repeatable)
    #[arg(short, long = "user", value_name = "NAME")]
    pub users: Vec<String>,

    /// Skip the credential report (activity columns become N/A)
    #[arg(long)]
    pub no_report: bool,
}

// ============================================================================
// Plan / Apply
// ============================================================================

#[derive(Parser)]
pub struct PlanArgs {
    /// Action records: a `.csv` sheet or a JSON array
    pub actions_file: PathBuf,
}

#[derive(Parser)]
pub struct ApplyArgs {
    /// Action records: a `.csv` sheet or a JSON array
    pub actions_file: PathBuf,

    /// Skip confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Number of users reconciled in parallel
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Write result records to this file (`.csv` or JSON)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Record what would be done without calling IAM mutations
    #[arg(short = 'n', long)]
    pub dry_run: bool,
}

// ============================================================================
// Config Commands
// ============================================================================

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show the effective configuration
    Show,

    /// Print the config file path
    Path,

    /// Write a starter config file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}
