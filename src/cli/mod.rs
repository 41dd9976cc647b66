//! Command-line interface for cohort nodes.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Cohort - federated metadata reads and lineage synchronization.
#[derive(Parser)]
#[command(name = "cohort")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "COHORT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "COHORT_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Start a cohort node
    Serve {
        /// Metadata collection id of the local repository
        #[arg(long, env = "COHORT_COLLECTION_ID")]
        collection_id: Option<String>,

        /// Server name announced to the cohort
        #[arg(long, env = "COHORT_SERVER_NAME")]
        server_name: Option<String>,

        /// Bind address of the repository and admin API
        #[arg(long, env = "COHORT_BIND_ADDR")]
        bind_addr: Option<String>,

        /// Endpoint peers should use to reach this node
        #[arg(long)]
        advertise: Option<String>,

        /// File the member registry is persisted to
        #[arg(long)]
        registry_file: Option<PathBuf>,

        /// Disable the Prometheus endpoint
        #[arg(long)]
        no_metrics: bool,
    },

    /// Cohort membership commands
    Cohort {
        #[command(subcommand)]
        command: CohortCommands,
    },

    /// Lineage commands
    Lineage {
        #[command(subcommand)]
        command: LineageCommands,
    },

    /// Look up an entity across the cohort
    Entity {
        /// Entity guid
        guid: String,

        /// Expected type (subtypes match)
        #[arg(long = "type")]
        type_name: Option<String>,

        /// Node address
        #[arg(short, long, default_value = "127.0.0.1:9443")]
        addr: String,
    },

    /// Show version information
    Version,
}

/// Cohort membership subcommands.
#[derive(Subcommand)]
pub enum CohortCommands {
    /// Show node and cohort status
    Status {
        #[arg(short, long, default_value = "127.0.0.1:9443")]
        addr: String,
    },

    /// List remote members
    Members {
        #[arg(short, long, default_value = "127.0.0.1:9443")]
        addr: String,
    },

    /// Register a remote member
    Join {
        /// Metadata collection id of the member
        id: String,

        /// Repository endpoint of the member
        endpoint: String,

        /// Server name of the member
        #[arg(long)]
        server_name: Option<String>,

        #[arg(short, long, default_value = "127.0.0.1:9443")]
        addr: String,
    },

    /// Remove a remote member and purge its copies
    Leave {
        id: String,

        #[arg(short, long, default_value = "127.0.0.1:9443")]
        addr: String,
    },
}

/// Lineage subcommands.
#[derive(Subcommand)]
pub enum LineageCommands {
    /// Run a promotion pass now
    Promote {
        #[arg(short, long, default_value = "127.0.0.1:9443")]
        addr: String,
    },

    /// Rebuild the main graph on the next promotion
    Reset {
        #[arg(short, long, default_value = "127.0.0.1:9443")]
        addr: String,
    },

    /// Show lineage of an asset
    Show {
        guid: String,

        #[arg(long, value_enum, default_value_t = ScopeArg::EndToEnd)]
        scope: ScopeArg,

        /// Keep process vertices instead of condensing them
        #[arg(long)]
        include_processes: bool,

        #[arg(short, long, default_value = "127.0.0.1:9443")]
        addr: String,
    },
}

/// Lineage scope as a command-line value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ScopeArg {
    EndToEnd,
    UltimateSource,
    UltimateDestination,
    Vertical,
}

impl From<ScopeArg> for crate::lineage::LineageScope {
    fn from(scope: ScopeArg) -> Self {
        use crate::lineage::LineageScope;
        match scope {
            ScopeArg::EndToEnd => LineageScope::EndToEnd,
            ScopeArg::UltimateSource => LineageScope::UltimateSource,
            ScopeArg::UltimateDestination => LineageScope::UltimateDestination,
            ScopeArg::Vertical => LineageScope::Vertical,
        }
    }
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
