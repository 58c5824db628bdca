//! CLI command definitions for the `agentbridge` binary.
//!
//! Uses clap derive macros for argument parsing. `serve` runs the hub; the
//! inspection commands talk to a running hub over its HTTP API.

pub mod config;
pub mod remote;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// Message bridge between cooperating agents.
#[derive(Parser)]
#[command(name = "agentbridge", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to config.toml (defaults to $AGENTBRIDGE_CONFIG, then the platform config dir).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the hub: WebSocket endpoint plus HTTP API.
    Serve {
        /// Port to listen on (overrides config).
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to (overrides config).
        #[arg(long)]
        host: Option<String>,
    },

    /// Print the effective configuration after defaults and validation.
    Config,

    /// Show a running hub's status and metrics.
    Status {
        #[command(flatten)]
        remote: RemoteArgs,
    },

    /// List clients connected to a running hub.
    Clients {
        #[command(flatten)]
        remote: RemoteArgs,
    },

    /// Show recent envelopes from a running hub's history.
    History {
        #[command(flatten)]
        remote: RemoteArgs,

        /// Maximum number of envelopes.
        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// Only envelopes sent by or addressed to this agent.
        #[arg(long)]
        agent_id: Option<String>,

        /// Only envelopes for this task.
        #[arg(long)]
        task_id: Option<String>,

        /// Only envelopes with this intent.
        #[arg(long)]
        intent: Option<String>,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

/// Where to find a running hub.
#[derive(clap::Args)]
pub struct RemoteArgs {
    /// Base URL of the hub's HTTP API.
    #[arg(long, env = "AGENTBRIDGE_URL", default_value = "http://127.0.0.1:7420")]
    pub url: String,
}
