//! Matrix expansion: parent scenarios × topologies.

use std::fmt;

use crate::core::Topology;

/// What a parent scenario exercises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScenarioKind {
    HotReload,
    /// Also provides the visual assertion facility.
    Screenshot,
}

/// A transport/runtime scenario declared by the test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentContext {
    pub display_name: String,
    pub kind: ScenarioKind,
}

impl ParentContext {
    pub fn new(display_name: impl Into<String>, kind: ScenarioKind) -> Self {
        Self {
            display_name: display_name.into(),
            kind,
        }
    }

    pub fn hot_reload(display_name: impl Into<String>) -> Self {
        Self::new(display_name, ScenarioKind::HotReload)
    }

    pub fn screenshot(display_name: impl Into<String>) -> Self {
        Self::new(display_name, ScenarioKind::Screenshot)
    }
}

/// One cell of the matrix. Owns nothing yet; its fixture is built per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationContext {
    pub parent: ParentContext,
    pub topology: Topology,
}

impl InvocationContext {
    /// `"<parent> [<Topology>]"`
    pub fn display_name(&self) -> String {
        format!("{} [{}]", self.parent.display_name, self.topology)
    }

    #[inline]
    pub fn kind(&self) -> ScenarioKind {
        self.parent.kind
    }
}

impl fmt::Display for InvocationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_name())
    }
}

/// Cross product, parent-major: N parents × M topologies = N·M contexts.
pub fn expand(parents: &[ParentContext], topologies: &[Topology]) -> Vec<InvocationContext> {
    parents
        .iter()
        .flat_map(|parent| {
            topologies.iter().map(move |&topology| InvocationContext {
                parent: parent.clone(),
                topology,
            })
        })
        .collect()
}
