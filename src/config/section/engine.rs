//! `[engine]` section configuration.
//!
//! ```toml
//! [engine]
//! restart_threshold = 3       # Consecutive incompatible changes before "restart required"
//! ```

use serde::{Deserialize, Serialize};

use crate::config::{ConfigDiagnostics, FieldPath};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub restart_threshold: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            restart_threshold: 3,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self, diag: &mut ConfigDiagnostics) {
        if self.restart_threshold == 0 {
            diag.error_with_hint(
                FieldPath::new("engine.restart_threshold"),
                "must be at least 1",
                "use 1 to require a restart on the first incompatible change",
            );
        }
    }
}
