use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "infragraph")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Infrastructure as a typed resource graph, converged onto containers", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file (default: ~/.config/infragraph/config.toml)
    #[arg(long, global = true, env = "INFRAGRAPH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Use an in-memory container runtime instead of docker
    #[arg(long, global = true)]
    pub simulate: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Converge containers onto the applications the graph defines
    Reconcile(ReconcileArgs),

    /// Run or inspect periodic tasks
    #[command(subcommand)]
    Timers(TimersCommand),

    /// Query and import graph resources
    #[command(subcommand)]
    Resources(ResourcesCommand),

    /// Allocate unix user ids
    #[command(subcommand, name = "unix-id")]
    UnixId(UnixIdCommand),

    /// Show store, plugins, timers and containers
    Status,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

// ============================================================================
// Reconcile
// ============================================================================

#[derive(clap::Args)]
pub struct ReconcileArgs {
    /// Prune without asking
    #[arg(short, long)]
    pub yes: bool,

    /// Show the plan without touching any container
    #[arg(short, long)]
    pub dry_run: bool,

    /// Containers converged in parallel (default: from config)
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Machine to converge (default: from config)
    #[arg(short, long)]
    pub machine: Option<String>,
}

// ============================================================================
// Timers
// ============================================================================

#[derive(Subcommand)]
pub enum TimersCommand {
    /// Run every timer on its schedule until interrupted
    Run,

    /// Run timers once and exit
    Once {
        /// Only this timer
        name: Option<String>,
    },

    /// List declared timers
    List,
}

// ============================================================================
// Resources
// ============================================================================

#[derive(Subcommand)]
pub enum ResourcesCommand {
    /// List resources matching every given filter
    List(ListArgs),

    /// Import resources and links from TOML files
    Import {
        /// A TOML file, or a directory searched for *.toml
        path: PathBuf,

        /// Validate without committing
        #[arg(short, long)]
        dry_run: bool,
    },
}

#[derive(clap::Args)]
pub struct ListArgs {
    /// Resource type, e.g. Application
    #[arg(short = 't', long = "type")]
    pub resource_type: Option<String>,

    /// Editor name
    #[arg(short, long)]
    pub editor: Option<String>,

    /// Required tag (repeatable)
    #[arg(long)]
    pub tag: Vec<String>,

    /// Property pattern as name=pattern, `%` is the wildcard (repeatable)
    #[arg(long)]
    pub like: Vec<String>,

    /// Print JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

// ============================================================================
// Unix ids
// ============================================================================

#[derive(Subcommand)]
pub enum UnixIdCommand {
    /// Print the next free uid
    Next {
        /// How many ids to hand out
        #[arg(short = 'n', long, default_value = "1")]
        count: usize,
    },
}
