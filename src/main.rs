//! hotreload - live code reload orchestration for compiled UI applications.

#![allow(dead_code)]

mod actor;
mod bus;
mod cli;
mod config;
mod core;
mod engine;
mod logger;
mod matrix;
mod utils;

use anyhow::Result;
use clap::{ColorChoice, Parser};
use cli::{Cli, Commands};
use config::{ReloadConfig, init_config};

fn main() -> Result<()> {
    // Setup global Ctrl+C handler (before any blocking operations)
    core::setup_shutdown_handler()?;

    let cli = Cli::parse();

    // Set global color override based on CLI option
    match cli.color {
        ColorChoice::Always => owo_colors::set_override(true),
        ColorChoice::Never => owo_colors::set_override(false),
        ColorChoice::Auto => {} // owo-colors auto-detects TTY
    }
    logger::set_verbose(cli.verbose);

    let config = init_config(ReloadConfig::load(&cli)?);

    match &cli.command {
        Commands::Watch { embedded, .. } => cli::watch::watch(config, *embedded),
        Commands::Check => cli::check::check(&config),
    }
}
