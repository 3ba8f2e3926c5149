//! CLI argument parsing and command definitions.

use clap::{Parser, Subcommand};

// ============================================================================
// CLI argument types
// ============================================================================

/// Top-level CLI arguments.
#[derive(Parser, Debug)]
#[command(author, about, long_about = None)]
pub struct CliArgs {
    /// Path to configuration file.
    #[arg(short, long, env = "CIVICA_CONFIG")]
    pub config: Option<String>,

    /// Enable verbose output.
    #[arg(short, long)]
    pub verbose: bool,

    /// Suppress non-essential output.
    #[arg(short, long)]
    pub quiet: bool,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build or refresh the semantic index from a corpus snapshot.
    BuildIndex {
        /// Path to the JSON corpus snapshot (overrides config).
        #[arg(short = 's', long)]
        snapshot: Option<String>,
    },

    /// Run a semantic search against the built index.
    Query {
        /// Free-text query.
        query: String,

        /// Maximum number of hits.
        #[arg(short, long, default_value = "10")]
        limit: usize,

        /// Restrict to one city.
        #[arg(long)]
        city: Option<String>,

        /// Restrict to one organization.
        #[arg(long)]
        organization: Option<String>,

        /// Restrict to one meeting category.
        #[arg(long)]
        category: Option<String>,

        /// Inclusive lower date bound (YYYY-MM-DD).
        #[arg(long)]
        date_from: Option<String>,

        /// Inclusive upper date bound (YYYY-MM-DD).
        #[arg(long)]
        date_to: Option<String>,

        /// Emit the full response as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Report index availability and health.
    Status {
        /// Emit the status as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print version information.
    Version,
}

// ============================================================================
// Tests
// ============================================================================
