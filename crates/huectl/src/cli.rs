//! Clap derive structures for the `huectl` CLI.
//!
//! Defines the complete command tree, global flags, and shared types.

use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;

// ── Top-Level CLI ────────────────────────────────────────────────────

/// huectl -- control Philips Hue lights from the command line
#[derive(Debug, Parser)]
#[command(
    name = "huectl",
    version,
    about = "Control Philips Hue lights from the command line",
    long_about = "Pairs with a Hue Bridge on your network and drives lights, rooms,\n\
        zones and scenes over the CLIP v2 API.\n\n\
        Run `huectl pair` first.",
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
    /// Output format
    #[arg(long, short = 'o', env = "HUECTL_OUTPUT", global = true)]
    pub output: Option<OutputFormat>,

    /// When to use color output
    #[arg(long, global = true)]
    pub color: Option<ColorMode>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Skip confirmation prompts
    #[arg(long, short = 'y', global = true)]
    pub yes: bool,

    /// Request timeout in seconds (overrides the config file)
    #[arg(long, env = "HUECTL_TIMEOUT", global = true)]
    pub timeout: Option<u64>,
}

impl GlobalOpts {
    /// Fill unset presentation flags from config-file defaults.
    pub fn apply_defaults(&mut self, defaults: &huectl_config::Defaults) {
        if self.output.is_none() {
            self.output = OutputFormat::from_str(&defaults.output, true).ok();
        }
        if self.color.is_none() {
            self.color = ColorMode::from_str(&defaults.color, true).ok();
        }
    }

    pub fn format(&self) -> OutputFormat {
        self.output.unwrap_or(OutputFormat::Table)
    }

    pub fn color_mode(&self) -> ColorMode {
        self.color.unwrap_or(ColorMode::Auto)
    }
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Find a bridge, link with it and save the pairing
    Pair(PairArgs),

    /// Forget the saved bridge and application key
    Unlink,

    /// Show the saved bridge and whether it is reachable
    Status(StatusArgs),

    /// Control individual lights
    #[command(alias = "l")]
    Lights(LightsArgs),

    /// List rooms
    Rooms(ListOnlyArgs),

    /// List zones
    Zones(ListOnlyArgs),

    /// Control every light in a room or zone at once
    #[command(alias = "g")]
    Groups(GroupsArgs),

    /// List and recall scenes
    Scenes(ScenesArgs),

    /// Turn off every light that is on
    Off,

    /// Print bridge events as they arrive
    Watch(WatchArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Pairing ──────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct PairArgs {
    /// Failed link or connect attempts to retry before giving up
    #[arg(long, default_value = "3")]
    pub attempts: u32,
}

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Only show what is saved; do not contact the bridge
    #[arg(long)]
    pub offline: bool,
}

// ── Lights ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct LightsArgs {
    #[command(subcommand)]
    pub command: LightsCommand,
}

#[derive(Debug, Subcommand)]
pub enum LightsCommand {
    /// List all lights
    #[command(alias = "ls")]
    List,

    /// Show one light
    Get { light: String },

    /// Turn a light on
    On { light: String },

    /// Turn a light off
    Off { light: String },

    /// Flip a light between on and off
    Toggle { light: String },

    /// Set brightness in percent (1-100)
    #[command(alias = "bri")]
    Brightness {
        light: String,
        #[arg(value_parser = parse_percent)]
        value: f64,
    },

    /// Raise brightness by one step
    Brighter { light: String },

    /// Lower brightness by one step
    Dimmer { light: String },

    /// Shift colour temperature warmer by one step
    Warmer { light: String },

    /// Shift colour temperature cooler by one step
    Cooler { light: String },

    /// Set colour as CIE xy coordinates
    Color {
        light: String,
        #[arg(value_parser = parse_unit)]
        x: f64,
        #[arg(value_parser = parse_unit)]
        y: f64,
    },
}

// ── Groups ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ListOnlyArgs {
    #[command(subcommand)]
    pub command: Option<ListOnlyCommand>,
}

#[derive(Debug, Subcommand)]
pub enum ListOnlyCommand {
    /// List all entries (default)
    #[command(alias = "ls")]
    List,
}

#[derive(Debug, Args)]
pub struct GroupsArgs {
    #[command(subcommand)]
    pub command: GroupsCommand,
}

#[derive(Debug, Subcommand)]
pub enum GroupsCommand {
    /// Turn a room or zone on
    On { group: String },

    /// Turn a room or zone off
    Off { group: String },

    /// Set brightness of a room or zone in percent (1-100)
    #[command(alias = "bri")]
    Brightness {
        group: String,
        #[arg(value_parser = parse_percent)]
        value: f64,
    },
}

// ── Scenes ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ScenesArgs {
    #[command(subcommand)]
    pub command: ScenesCommand,
}

#[derive(Debug, Subcommand)]
pub enum ScenesCommand {
    /// List all scenes
    #[command(alias = "ls")]
    List,

    /// Activate a scene
    Recall { scene: String },
}

// ── Watch / completions ──────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Stop after this many events
    #[arg(long, short = 'n')]
    pub count: Option<usize>,
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: Shell,
}

// ── Value parsers ────────────────────────────────────────────────────

fn parse_percent(s: &str) -> Result<f64, String> {
    let value: f64 = s.parse().map_err(|_| format!("'{s}' is not a number"))?;
    if (0.0..=100.0).contains(&value) {
        Ok(value)
    } else {
        Err(format!("{value} is outside 0-100"))
    }
}

fn parse_unit(s: &str) -> Result<f64, String> {
    let value: f64 = s.parse().map_err(|_| format!("'{s}' is not a number"))?;
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(format!("{value} is outside 0-1"))
    }
}
