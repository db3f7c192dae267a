//! Configuration management for `hotreload.toml`.
//!
//! # Module Structure
//!
//! ```text
//! config/
//! ├── section/       # Configuration section definitions
//! │   ├── watch      # [watch]  artifact wiring + reload timing
//! │   ├── bus        # [bus]    WebSocket bridge
//! │   └── engine     # [engine] escalation threshold
//! ├── types/         # Utility types
//! │   ├── error      # ConfigError, ConfigDiagnostics
//! │   ├── field      # FieldPath
//! │   └── handle     # Global config handle
//! └── mod.rs         # ReloadConfig (this file)
//! ```
//!
//! # Sections
//!
//! | Section    | Purpose                                             |
//! |------------|-----------------------------------------------------|
//! | `[watch]`  | Artifact directories, topology, debounce, timeouts  |
//! | `[bus]`    | Bridge interface/port                               |
//! | `[engine]` | Consecutive incompatible changes before restart     |
//!
//! A missing config file is not an error: every field has a default and the
//! project root becomes the current directory.

pub mod section;
pub mod types;
mod util;

use util::find_config_file;

pub use section::{BusConfig, EngineConfig, WatchConfig};
pub use types::{ConfigDiagnostics, ConfigError, FieldPath, cfg, init_config};

use crate::{
    cli::{Cli, Commands},
    log,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

// ============================================================================
// root configuration
// ============================================================================

/// Root configuration structure representing hotreload.toml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReloadConfig {
    /// Absolute path to the config file (internal use only)
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Project root directory - parent of config file (internal use only)
    #[serde(skip)]
    pub root: PathBuf,

    #[serde(default)]
    pub watch: WatchConfig,

    #[serde(default)]
    pub bus: BusConfig,

    #[serde(default)]
    pub engine: EngineConfig,
}

impl ReloadConfig {
    /// Load configuration for the CLI invocation.
    ///
    /// Searches upward from cwd for the config file; the project root is the
    /// config file's directory (or cwd when there is none).
    pub fn load(cli: &Cli) -> Result<Self> {
        let cwd = std::env::current_dir().context("Failed to get current working directory")?;

        let mut config = match find_config_file(&cli.config, &cwd) {
            Some(path) => {
                let mut config = Self::from_path(&path)?;
                config.config_path = crate::utils::path::normalize_path(&path);
                config
            }
            None => {
                crate::debug!("config"; "{} not found, using defaults", cli.config.display());
                Self::default()
            }
        };

        let root = config
            .config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or(cwd);
        config.apply_cli(cli);
        config.finalize(&root);
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML string
    pub fn from_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(ConfigError::Toml)?;
        Ok(config)
    }

    /// Load configuration from file path with unknown field detection.
    fn from_path(path: &Path) -> Result<Self> {
        let content =
            fs::read_to_string(path).map_err(|err| ConfigError::Io(path.to_path_buf(), err))?;

        let (config, ignored) = Self::parse_with_ignored(&content)?;
        if !ignored.is_empty() {
            Self::print_unknown_fields_warning(&ignored, path);
        }

        Ok(config)
    }

    /// Parse TOML content, collecting any unknown fields.
    fn parse_with_ignored(content: &str) -> Result<(Self, Vec<String>)> {
        let mut ignored = Vec::new();
        let deserializer = toml::Deserializer::new(content);
        let config = serde_ignored::deserialize(deserializer, |path: serde_ignored::Path| {
            ignored.push(path.to_string());
        })
        .map_err(ConfigError::Toml)?;
        Ok((config, ignored))
    }

    /// Print warning about unknown fields.
    fn print_unknown_fields_warning(fields: &[String], path: &Path) {
        let display_path = path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_else(|| path.to_string_lossy());
        log!("warning"; "unknown fields in {}, ignoring:", display_path);
        for field in fields {
            eprintln!("- {}", field);
        }
    }

    /// Command-line flags win over the file.
    fn apply_cli(&mut self, cli: &Cli) {
        if let Commands::Watch {
            interface, port, ..
        } = &cli.command
        {
            if let Some(interface) = interface {
                self.bus.interface = *interface;
            }
            if let Some(port) = port {
                self.bus.port = *port;
            }
        }
    }

    /// Resolve the root and every configured path.
    pub fn finalize(&mut self, root: &Path) {
        let root = crate::utils::path::normalize_path(root);
        self.watch.normalize(&root);
        self.root = root;
    }

    /// Get the root directory path
    pub fn get_root(&self) -> &Path {
        &self.root
    }

    /// Every directory the watcher attaches to.
    pub fn watch_roots(&self) -> Vec<PathBuf> {
        let mut roots = self.watch.classes_dirs().to_vec();
        if let Some(resources) = self.watch.resources_dir()
            && !roots.iter().any(|r| r == resources)
        {
            roots.push(resources.to_path_buf());
        }
        roots
    }

    // ========================================================================
    // validation
    // ========================================================================

    /// Collect all validation errors and return them at once.
    pub fn validate(&self) -> Result<()> {
        let mut diag = ConfigDiagnostics::new();

        self.watch.validate(&mut diag);
        self.engine.validate(&mut diag);

        diag.print_warnings();
        diag.into_result()
            .map_err(|e| ConfigError::Diagnostics(e).into())
    }
}

// ============================================================================
// Test Helpers (available to all modules via `use crate::config::test_*`)
// ============================================================================

/// Parse a config snippet.
/// Panics if there are unknown fields (to catch config typos in tests).
#[cfg(test)]
pub fn test_parse_config(content: &str) -> ReloadConfig {
    let (parsed, ignored) = ReloadConfig::parse_with_ignored(content).unwrap();
    assert!(
        ignored.is_empty(),
        "test config has unknown fields: {:?}",
        ignored
    );
    parsed
}

// ============================================================================
// tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_str_invalid_toml() {
        let result = ReloadConfig::from_str("[watch\ndebounce_ms = 1");
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_fields_are_collected() {
        let (config, ignored) =
            ReloadConfig::parse_with_ignored("[watch]\ndebounce_ms = 50\ndebounse = 1\n[extra]\na = 1")
                .unwrap();
        assert_eq!(config.watch.debounce_ms, 50);
        assert_eq!(ignored, vec!["watch.debounse".to_string(), "extra".to_string()]);
    }

    #[test]
    fn test_watch_roots_include_resources_once() {
        let mut config = test_parse_config("");
        config.finalize(Path::new("/project"));
        let roots = config.watch_roots();
        assert_eq!(roots.len(), 2);
        assert!(roots[0].ends_with("build/classes/kotlin/main"));
        assert!(roots[1].ends_with("build/processedResources/main"));

        let mut config = test_parse_config("[watch]\nclasses = [\"out\"]\nresources = \"out\"");
        config.finalize(Path::new("/project"));
        assert_eq!(config.watch_roots(), vec![PathBuf::from("/project/out")]);
    }

    #[test]
    fn test_cli_overrides_bridge_address() {
        use clap::Parser;

        let cli = Cli::parse_from(["hotreload", "watch", "-i", "0.0.0.0", "-p", "4100"]);
        let mut config = test_parse_config("[bus]\nport = 4000");
        config.apply_cli(&cli);
        assert_eq!(config.bus.port, 4100);
        assert_eq!(config.bus.interface.to_string(), "0.0.0.0");
    }

    #[test]
    fn test_validate_reports_all_errors() {
        let config = test_parse_config("[watch]\ndebounce_ms = 0\n[engine]\nrestart_threshold = 0");
        let err = config.validate().unwrap_err();
        let ConfigError::Diagnostics(diag) = err.downcast::<ConfigError>().unwrap() else {
            panic!("expected diagnostics");
        };
        assert_eq!(diag.len(), 2);
    }
}
