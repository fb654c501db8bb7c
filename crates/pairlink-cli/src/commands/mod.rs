//! CLI command definitions and handlers.

use clap::{Parser, Subcommand, ValueEnum};
use pairlink_core::ChannelKind;

/// Load configuration with graceful fallback to defaults.
///
/// If the config file doesn't exist or can't be parsed, it falls back to
/// defaults and logs why.
pub fn load_config() -> pairlink_core::config::Config {
    pairlink_core::config::Config::load().unwrap_or_else(|e| {
        tracing::warn!("Using default configuration: {}", e);
        pairlink_core::config::Config::default()
    })
}

pub mod channels;
pub mod completions;
pub mod config;
pub mod demo;

/// Pairlink - phone and wearable session layer
#[derive(Parser)]
#[command(name = "pairlink")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand)]
pub enum Command {
    /// Show the channels and their delivery properties
    Channels(ChannelsArgs),

    /// Run commands through an in-process phone/watch pair
    Demo(DemoArgs),

    /// Manage configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

/// Arguments for the channels command
#[derive(Parser)]
pub struct ChannelsArgs {
    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the demo command
#[derive(Parser)]
pub struct DemoArgs {
    /// Channels to exercise, in order (default: all of them)
    #[arg(short, long = "channel", value_parser = parse_channel)]
    pub channels: Vec<ChannelKind>,

    /// Cancel the first outstanding transfer right after dispatching
    #[arg(long)]
    pub cancel: bool,

    /// Start with the watch unreachable
    #[arg(long)]
    pub unreachable: bool,

    /// Skip activating the phone's session
    #[arg(long)]
    pub no_activate: bool,

    /// Delay per loopback step (e.g., 50ms, 1s); overrides the config file
    #[arg(long)]
    pub step: Option<String>,

    /// Bytes per loopback progress step; overrides the config file
    #[arg(long)]
    pub chunk_size: Option<u64>,

    /// Give up waiting for outcomes after this long (e.g., 10s, 1m)
    #[arg(short, long, default_value = "10s")]
    pub timeout: String,

    /// Output statuses as JSON lines
    #[arg(long)]
    pub json: bool,
}

fn parse_channel(s: &str) -> Result<ChannelKind, String> {
    s.parse().map_err(|e: pairlink_core::Error| e.to_string())
}

/// Arguments for the config command
#[derive(Parser)]
pub struct ConfigArgs {
    /// Config subcommand
    #[command(subcommand)]
    pub action: ConfigAction,
}

/// Config subcommands
#[derive(Subcommand)]
pub enum ConfigAction {
    /// Get a configuration value
    Get {
        /// Configuration key (e.g., loopback.chunk_size)
        key: String,
    },

    /// Set a configuration value
    Set {
        /// Configuration key
        key: String,

        /// Value to set
        value: String,
    },

    /// Show all configuration
    Show,

    /// List all available configuration keys
    List,

    /// Show the configuration file path
    Path,

    /// Reset to defaults
    Reset,
}

/// Arguments for the completions command
#[derive(Parser)]
pub struct CompletionsArgs {
    /// Completions subcommand
    #[command(subcommand)]
    pub action: CompletionsAction,
}

/// Completions subcommands
#[derive(Subcommand, Clone, Copy)]
pub enum CompletionsAction {
    /// Install shell completions (auto-detects shell)
    Install {
        /// Override shell detection
        #[arg(long, value_enum)]
        shell: Option<ShellType>,
    },

    /// Uninstall shell completions
    Uninstall {
        /// Override shell detection
        #[arg(long, value_enum)]
        shell: Option<ShellType>,
    },

    /// Generate completions and print to stdout (for manual installation)
    Generate {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: ShellType,
    },
}

/// Supported shell types for completions
#[derive(Clone, Copy, ValueEnum, Debug)]
pub enum ShellType {
    /// Bash shell
    Bash,
    /// Zsh shell
    Zsh,
    /// Fish shell
    Fish,
    /// PowerShell
    #[value(name = "powershell")]
    PowerShell,
    /// Elvish shell
    Elvish,
}
