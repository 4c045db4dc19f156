//! Configuration settings for mercurio
//!
//! Defines the CLI arguments and the runtime configuration of the
//! transfer pipeline, with their defaults.

use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default template for the directory an authorized key may write to
pub const DEFAULT_DESTDIR_TEMPLATE: &str = "~/mercurio/$owner";

/// mercurio - send files over the network with a pool of rsync workers
#[derive(Parser, Debug, Clone)]
#[command(name = "mercurio")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "A file transfer tool")]
#[command(long_about = r#"
mercurio sends files and directory trees with one rsync process per file,
running as many transfers in parallel as there are CPUs.

Examples:
  mercurio send data/ results.csv user@server:incoming/
  mercurio authorize ~/keys/alice.pub
  mercurio revoke --owner alice
"#)]
pub struct CliArgs {
    /// Verbose output (can be repeated: -v, -vv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log output format
    #[arg(long, value_enum, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// authorized_keys file to manage (default: ~/.ssh/authorized_keys)
    #[arg(long, value_name = "PATH", global = true, env = "MERCURIO_AUTHORIZED_KEYS")]
    pub authorized_keys: Option<PathBuf>,

    /// Subcommand
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Send one or many files over the network
    #[command(name = "send")]
    Send {
        /// File(s) or director{y,ies} to send
        #[arg(value_name = "PATH", required = true, num_args = 1..)]
        paths: Vec<String>,

        /// Destination path of the form 'user@host:path' (or a local path)
        #[arg(value_name = "DESTINATION")]
        destination: String,

        /// Number of parallel transfers (0 = one per logical CPU)
        #[arg(short = 'w', long, default_value = "0", value_name = "NUM", env = "MERCURIO_WORKERS")]
        workers: usize,

        /// Transfer program to run for each file
        #[arg(long, default_value = "rsync", value_name = "PROGRAM", env = "MERCURIO_RSYNC")]
        rsync: String,

        /// Let rsync create a missing destination root (rsync >= 3.2.3)
        #[arg(long)]
        mkpath: bool,

        /// Keep draining the remaining files after a transfer fails
        #[arg(long)]
        drain_on_error: bool,

        /// Follow symbolic links while walking directories
        #[arg(short = 'L', long)]
        follow_symlinks: bool,

        /// Show a progress spinner
        #[arg(short = 'p', long)]
        progress: bool,

        /// Format of the summary printed on success
        #[arg(long, value_enum, default_value = "text")]
        output_format: OutputFormat,
    },

    /// Authorize the owner of a public key to write (and read) data under a directory
    #[command(name = "authorize")]
    Authorize {
        /// Public key to authorize ('.pub' is appended when missing)
        #[arg(value_name = "KEYFILE")]
        key_file: PathBuf,

        /// Directory the key's owner may use; '$owner' is replaced by the owner's name
        #[arg(short = 'd', long, default_value = DEFAULT_DESTDIR_TEMPLATE, value_name = "TEMPLATE")]
        destdir: String,

        /// Owner of the key (guessed from the key's comment when omitted)
        #[arg(short = 'o', long)]
        owner: Option<String>,
    },

    /// Revoke a previously authorized identity
    #[command(name = "revoke")]
    Revoke {
        /// File containing the public key to revoke
        #[arg(short = 'k', long = "key-file", value_name = "KEYFILE", conflicts_with = "owner", required_unless_present = "owner")]
        key_file: Option<PathBuf>,

        /// Owner whose keys are to be revoked
        #[arg(short = 'o', long)]
        owner: Option<String>,
    },
}

/// Log output format
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

/// Output format for the run summary
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// JSON format
    Json,
}

/// How the external transfer tool is invoked
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolConfig {
    /// Program to run
    pub program: String,
    /// Ask the tool to create a missing destination root
    pub mkpath: bool,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            program: "rsync".to_string(),
            mkpath: false,
        }
    }
}

/// How input paths are walked
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumeratorConfig {
    /// Follow symbolic links while walking directories
    pub follow_symlinks: bool,
}

/// Worker pool configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Number of workers (0 = one per logical CPU)
    pub workers: usize,
    /// Stop handing out work once a transfer has failed
    pub cancel_on_error: bool,
    /// Transfer tool settings
    pub tool: ToolConfig,
    /// Enumeration settings
    pub enumerator: EnumeratorConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 0, // Auto-detect
            cancel_on_error: true,
            tool: ToolConfig::default(),
            enumerator: EnumeratorConfig::default(),
        }
    }
}

impl PoolConfig {
    /// Number of workers to start, resolving 0 to the logical CPU count
    pub fn effective_workers(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get().max(1)
        } else {
            self.workers
        }
    }

    /// Build a pool configuration from the `send` subcommand
    pub fn from_send_args(command: &Commands) -> Result<Self, String> {
        match command {
            Commands::Send {
                workers,
                rsync,
                mkpath,
                drain_on_error,
                follow_symlinks,
                ..
            } => {
                if rsync.trim().is_empty() {
                    return Err("transfer program must not be empty".to_string());
                }
                Ok(Self {
                    workers: *workers,
                    cancel_on_error: !drain_on_error,
                    tool: ToolConfig {
                        program: rsync.clone(),
                        mkpath: *mkpath,
                    },
                    enumerator: EnumeratorConfig {
                        follow_symlinks: *follow_symlinks,
                    },
                })
            }
            _ => Err("not a send command".to_string()),
        }
    }
}

/// Parse remote path (user@host:path)
pub fn parse_remote_path(path: &str) -> Option<(String, String, String)> {
    if let Some((user_host, remote_path)) = path.split_once(':') {
        if let Some((user, host)) = user_host.split_once('@') {
            if !user.is_empty() && !host.is_empty() && !host.contains('/') {
                return Some((user.to_string(), host.to_string(), remote_path.to_string()));
            }
        }
    }
    None
}

/// Expand a leading `~` to the current user's home directory
pub fn expand_home(path: &str) -> PathBuf {
    let home = || std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    if path == "~" {
        PathBuf::from(home())
    } else if let Some(rest) = path.strip_prefix("~/") {
        PathBuf::from(home()).join(rest)
    } else {
        PathBuf::from(path)
    }
}

/// Default authorized_keys location
pub fn default_authorized_keys() -> PathBuf {
    expand_home("~/.ssh/authorized_keys")
}
