use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use uuid::Uuid;

/// Courier command-line client
#[derive(Parser, Debug)]
#[command(name = "courier")]
#[command(about = "Send, receive and inspect Courier messages", long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug, Clone, Default)]
pub struct ConnectionArgs {
    /// Client configuration file (YAML, JSON or TOML)
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// Server base URL, e.g. `http://localhost:8080/`
    #[arg(long, global = true)]
    pub server: Option<String>,

    /// Bearer token. Falls back to `COURIER_TOKEN` or the config file.
    #[arg(long, global = true)]
    pub token: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Send a direct message
    Send {
        /// Handle of the recipient
        receiver: String,
        /// Message text
        content: String,
    },
    /// Send a message to a group
    SendGroup {
        group_id: Uuid,
        content: String,
    },
    /// Stay connected and print events as JSON lines
    Listen {
        /// Groups to join for typing and presence updates
        #[arg(long = "join")]
        groups: Vec<Uuid>,

        /// Stop after this many seconds instead of waiting for Ctrl-C
        #[arg(long)]
        duration: Option<u64>,
    },
    /// Print a conversation, oldest first
    History {
        /// Handle of the other participant
        #[arg(long, conflicts_with = "group_id", required_unless_present = "group_id")]
        peer: Option<String>,

        #[arg(long)]
        group_id: Option<Uuid>,

        /// Only messages created after this RFC 3339 instant
        #[arg(long)]
        since: Option<DateTime<Utc>>,
    },
    /// List online users, or check one handle
    Online {
        handle: Option<String>,
    },
    /// Print a client configuration file with default values
    Config {
        /// yaml or json
        #[arg(long, short, default_value = "yaml")]
        format: String,
    },
    /// Generate shell completion scripts
    Completion {
        /// bash, zsh, fish, powershell or elvish
        #[arg(long, short)]
        shell: clap_complete::Shell,
    },
}
