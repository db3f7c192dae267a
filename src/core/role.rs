//! Session roles.

use std::fmt;

use serde::{Deserialize, Serialize};

/// What a connected participant is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Build/compile watcher; publishes update batches.
    Compiler,
    /// Running application process hosting a redefinition engine.
    Application,
    /// Passive listener (IDE, status line, test harness).
    Observer,
}

impl Role {
    pub fn label(self) -> &'static str {
        match self {
            Self::Compiler => "compiler",
            Self::Application => "application",
            Self::Observer => "observer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
