//! Application topology.
//!
//! The topology decides where a project's build writes its compiled classes
//! and resources. It never changes the wire protocol.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Structural shape of the target application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Topology {
    /// Plain single-target project (one runtime).
    #[default]
    SingleRuntime,
    /// Multi-platform project; the reloadable runtime is its JVM target.
    MultiPlatformRuntime,
}

impl Topology {
    pub const ALL: [Self; 2] = [Self::SingleRuntime, Self::MultiPlatformRuntime];

    /// Compilation target directory segment used by the build.
    fn target_segment(self) -> &'static str {
        match self {
            Self::SingleRuntime => "main",
            Self::MultiPlatformRuntime => "jvm/main",
        }
    }

    /// Default compiled-classes directory under a project root.
    pub fn classes_dir(self, root: &Path) -> PathBuf {
        root.join("build/classes/kotlin").join(self.target_segment())
    }

    /// Default processed-resources directory under a project root.
    pub fn resources_dir(self, root: &Path) -> PathBuf {
        root.join("build/processedResources")
            .join(self.target_segment())
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::SingleRuntime => "SingleRuntime",
            Self::MultiPlatformRuntime => "MultiPlatformRuntime",
        }
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
