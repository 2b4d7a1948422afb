//! Clap derive structures for the `comfortlink` CLI.

use std::path::PathBuf;

use clap::{ArgGroup, Args, Parser, Subcommand, ValueEnum};
use comfortlink_core::{DeviceId, FanMode, SystemMode};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// comfortlink -- Total Connect Comfort thermostats from the command line
#[derive(Debug, Parser)]
#[command(
    name = "comfortlink",
    version,
    about = "Monitor and control Total Connect Comfort thermostats",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config file (defaults to the platform config directory)
    #[arg(long = "config", env = "COMFORTLINK_CONFIG", global = true)]
    pub config_file: Option<PathBuf>,

    /// Output format
    #[arg(long, short = 'o', default_value = "table", global = true)]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Log in, run one poll cycle and report the connection status
    Check,

    /// List thermostats with their latest readings
    #[command(alias = "ls")]
    Devices,

    /// Show every field of one thermostat
    Device {
        /// Device ID
        device: DeviceId,
    },

    /// Poll continuously and print every update until interrupted
    Watch,

    /// Change mode, setpoints or fan of a thermostat
    Set(SetArgs),

    /// Manage configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Debug, Args)]
#[command(group(ArgGroup::new("setpoint").args(["heat", "cool"]).multiple(true)))]
pub struct SetArgs {
    /// Device ID
    pub device: DeviceId,

    /// System mode (emergency_heat, heat, off, cool, auto)
    #[arg(long, short = 'm')]
    pub mode: Option<SystemMode>,

    /// Heat setpoint, in the thermostat's display units
    #[arg(long)]
    pub heat: Option<f64>,

    /// Cool setpoint, in the thermostat's display units
    #[arg(long)]
    pub cool: Option<f64>,

    /// Hold setpoints until cancelled instead of the next schedule period
    #[arg(long, requires = "setpoint")]
    pub permanent: bool,

    /// Fan mode (auto, on, circulate, follow_schedule)
    #[arg(long, short = 'f')]
    pub fan: Option<FanMode>,

    /// Drop any hold and resume the schedule
    #[arg(long, conflicts_with_all = ["heat", "cool", "permanent"])]
    pub resume: bool,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the config file location
    Path,

    /// Write a config file with default settings
    Init {
        /// Portal login (e-mail address)
        #[arg(long, short = 'u')]
        username: String,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Display the resolved configuration (password hidden)
    Show,

    /// Prompt for the portal password and store it in the system keyring
    SetPassword {
        /// Portal login; defaults to the configured username
        #[arg(long, short = 'u')]
        username: Option<String>,
    },
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
