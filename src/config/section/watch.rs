//! `[watch]` section configuration.
//!
//! Build-artifact wiring plus reload timing.
//!
//! # Example
//!
//! ```toml
//! [watch]
//! topology = "multi-platform-runtime"   # or "single-runtime" (default)
//! classes = ["build/classes/kotlin/jvm/main"]
//! resources = "build/processedResources/jvm/main"
//! debounce_ms = 300                     # Quiet period before a generation
//! outcome_timeout_ms = 10000            # Wait for the application's outcomes
//! io_retry_attempts = 5
//! io_backoff_ms = 100                   # Doubles per retry...
//! io_backoff_max_ms = 2000              # ...up to this cap
//! root_timeout_ms = 30000               # How long a vanished root may stay away
//! ```
//!
//! `classes` and `resources` default to the topology's build layout.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{ConfigDiagnostics, FieldPath};
use crate::core::Topology;
use crate::utils::path::resolve_config_path;
use crate::utils::retry::RetryPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub topology: Topology,

    /// Compiled-class directories. `None` = topology default.
    pub classes: Option<Vec<PathBuf>>,

    /// Processed resources directory. `None` = topology default.
    pub resources: Option<PathBuf>,

    pub debounce_ms: u64,
    pub outcome_timeout_ms: u64,
    pub io_retry_attempts: u32,
    pub io_backoff_ms: u64,
    pub io_backoff_max_ms: u64,
    pub root_timeout_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            topology: Topology::default(),
            classes: None,
            resources: None,
            debounce_ms: 300,
            outcome_timeout_ms: 10_000,
            io_retry_attempts: 5,
            io_backoff_ms: 100,
            io_backoff_max_ms: 2_000,
            root_timeout_ms: 30_000,
        }
    }
}

impl WatchConfig {
    /// Fill topology defaults and make every path absolute.
    pub fn normalize(&mut self, root: &Path) {
        let classes = match self.classes.take() {
            Some(dirs) => dirs
                .iter()
                .map(|dir| resolve_config_path(dir, root))
                .collect(),
            None => vec![self.topology.classes_dir(root)],
        };
        self.classes = Some(classes);

        self.resources = Some(match self.resources.take() {
            Some(dir) => resolve_config_path(&dir, root),
            None => self.topology.resources_dir(root),
        });
    }

    pub fn classes_dirs(&self) -> &[PathBuf] {
        self.classes.as_deref().unwrap_or_default()
    }

    pub fn resources_dir(&self) -> Option<&Path> {
        self.resources.as_deref()
    }

    #[inline]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    #[inline]
    pub fn outcome_timeout(&self) -> Duration {
        Duration::from_millis(self.outcome_timeout_ms)
    }

    #[inline]
    pub fn root_timeout(&self) -> Duration {
        Duration::from_millis(self.root_timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.io_retry_attempts,
            base: Duration::from_millis(self.io_backoff_ms),
            max: Duration::from_millis(self.io_backoff_max_ms),
        }
    }

    pub fn validate(&self, diag: &mut ConfigDiagnostics) {
        if self.classes.as_ref().is_some_and(Vec::is_empty) {
            diag.error_with_hint(
                FieldPath::new("watch.classes"),
                "no class directories to watch",
                "remove the key to use the topology's default layout",
            );
        }
        for dir in self.classes_dirs() {
            if !dir.exists() {
                diag.warn(
                    FieldPath::new("watch.classes"),
                    format!("{} does not exist yet, waiting for it", dir.display()),
                );
            }
        }

        let positive = [
            ("watch.debounce_ms", self.debounce_ms),
            ("watch.outcome_timeout_ms", self.outcome_timeout_ms),
            ("watch.io_backoff_ms", self.io_backoff_ms),
            ("watch.root_timeout_ms", self.root_timeout_ms),
        ];
        for (field, value) in positive {
            if value == 0 {
                diag.error(FieldPath::new(field), "must be greater than 0");
            }
        }

        if self.io_retry_attempts == 0 {
            diag.error(
                FieldPath::new("watch.io_retry_attempts"),
                "must be at least 1",
            );
        }
        if self.io_backoff_max_ms < self.io_backoff_ms {
            diag.error(
                FieldPath::new("watch.io_backoff_max_ms"),
                format!(
                    "cap {}ms is below the base backoff {}ms",
                    self.io_backoff_max_ms, self.io_backoff_ms
                ),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    use crate::config::{ConfigDiagnostics, test_parse_config};
    use crate::core::Topology;

    #[test]
    fn test_watch_defaults_follow_topology() {
        let mut config = test_parse_config("[watch]\ntopology = \"multi-platform-runtime\"");
        config.watch.normalize(Path::new("/project"));

        assert_eq!(config.watch.topology, Topology::MultiPlatformRuntime);
        assert_eq!(
            config.watch.classes_dirs(),
            &[PathBuf::from("/project/build/classes/kotlin/jvm/main")]
        );
        assert_eq!(
            config.watch.resources_dir(),
            Some(Path::new("/project/build/processedResources/jvm/main"))
        );
        assert_eq!(config.watch.debounce(), Duration::from_millis(300));
    }

    #[test]
    fn test_explicit_classes_are_resolved_against_root() {
        let mut config = test_parse_config("[watch]\nclasses = [\"out/a\", \"/abs/b\"]");
        config.watch.normalize(Path::new("/project"));
        assert_eq!(
            config.watch.classes_dirs(),
            &[PathBuf::from("/project/out/a"), PathBuf::from("/abs/b")]
        );
    }

    #[test]
    fn test_validation_collects_every_problem() {
        let config = test_parse_config(
            "[watch]\nclasses = []\ndebounce_ms = 0\nio_retry_attempts = 0\nio_backoff_ms = 500\nio_backoff_max_ms = 100",
        );
        let mut diag = ConfigDiagnostics::new();
        config.watch.validate(&mut diag);
        assert_eq!(diag.len(), 4);
    }

    #[test]
    fn test_retry_policy_from_config() {
        let config = test_parse_config("[watch]\nio_retry_attempts = 2\nio_backoff_ms = 10");
        let policy = config.watch.retry_policy();
        assert_eq!(policy.attempts, 2);
        assert_eq!(policy.delay(1), Duration::from_millis(20));
    }
}
