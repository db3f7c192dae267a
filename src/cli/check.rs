//! `check` command: validate configuration and show what would be watched.

use anyhow::Result;
use owo_colors::OwoColorize;

use crate::actor::reload::ArtifactWiring;
use crate::config::ReloadConfig;
use crate::log;

pub fn check(config: &ReloadConfig) -> Result<()> {
    // `ReloadConfig::load` already validated; this only reports
    let wiring = ArtifactWiring::from_config(config);

    if config.config_path.as_os_str().is_empty() {
        log!("check"; "no config file, using defaults");
    } else {
        log!("check"; "{}", config.config_path.display());
    }
    log!("check"; "topology: {}", wiring.topology());

    for root in wiring.roots() {
        let state = if root.is_dir() {
            "ok".green().to_string()
        } else {
            "missing".yellow().to_string()
        };
        println!("  {} {}", root.display(), state);
    }

    let scan = wiring.scan();
    log!("check"; "{} units in the current build", scan.units.len());
    for (path, e) in &scan.errors {
        log!("check"; "{} {}: {}", "unreadable".yellow(), path.display(), e);
    }

    if config.bus.bridge {
        log!("check"; "bridge on {}:{}", config.bus.interface, config.bus.port);
    }
    Ok(())
}
