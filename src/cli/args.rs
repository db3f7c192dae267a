//! Command-line interface definitions.

use clap::{ColorChoice, Parser, Subcommand};
use std::path::PathBuf;

/// Hot reload orchestrator for compiled UI applications
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None, arg_required_else_help = true)]
pub struct Cli {
    /// Control colored output (auto, always, never)
    #[arg(long, global = true, default_value = "auto")]
    pub color: ColorChoice,

    /// Config file path (default: hotreload.toml)
    #[arg(short = 'C', long, default_value = "hotreload.toml", value_hint = clap::ValueHint::FilePath)]
    pub config: PathBuf,

    /// Enable verbose output for debugging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Watch build artifacts and stream reload generations to applications
    #[command(visible_alias = "w")]
    Watch {
        /// Host an in-process application instead of waiting for one
        #[arg(short, long)]
        embedded: bool,

        /// Network interface for the bridge (overrides [bus].interface)
        #[arg(short, long)]
        interface: Option<std::net::IpAddr>,

        /// Bridge port (overrides [bus].port)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Validate configuration and show the resolved artifact wiring
    #[command(visible_alias = "c")]
    Check,
}
