//! Capabilities the engine consumes from the live process.

use std::fmt;

use super::error::RedefinitionError;
use crate::core::{GenerationId, UnitName};

/// One field slot in a unit's layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSlot {
    pub name: String,
    pub ty: String,
}

impl fmt::Display for FieldSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.ty)
    }
}

/// External shape of a unit: what live instances depend on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitShape {
    pub supertype: Option<String>,
    pub fields: Vec<FieldSlot>,
}

impl UnitShape {
    /// Describe why `proposed` cannot replace `self` in a live process.
    ///
    /// A changed supertype or any change to the ordered field layout breaks
    /// existing instances. Everything else (method bodies) is swappable.
    pub fn incompatibility(&self, proposed: &UnitShape) -> Option<String> {
        if self.supertype != proposed.supertype {
            return Some(format!(
                "supertype changed from {} to {}",
                self.supertype.as_deref().unwrap_or("<none>"),
                proposed.supertype.as_deref().unwrap_or("<none>")
            ));
        }

        if self.fields != proposed.fields {
            let render = |fields: &[FieldSlot]| {
                fields
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            return Some(format!(
                "field layout changed from [{}] to [{}]",
                render(&self.fields),
                render(&proposed.fields)
            ));
        }

        None
    }
}

/// Low-level "apply update to a live unit" primitive.
///
/// Not safe to call concurrently on one process; the engine owns its runtime
/// and calls it from a single task.
pub trait UnitRuntime: Send + 'static {
    fn is_loaded(&self, unit: &UnitName) -> bool;

    /// Shape of the currently loaded version, if loaded.
    fn loaded_shape(&self, unit: &UnitName) -> Option<UnitShape>;

    /// Shape declared by proposed content.
    fn read_shape(&self, unit: &UnitName, content: &[u8]) -> Result<UnitShape, RedefinitionError>;

    /// Swap the unit's content in place (defines it when new).
    fn apply(&mut self, unit: &UnitName, content: &[u8]) -> Result<(), RedefinitionError>;
}

/// What the UI runtime should re-evaluate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecompositionScope {
    pub generation: GenerationId,
    pub units: Vec<UnitName>,
}

/// UI runtime side-effect sink.
pub trait UiRuntime: Send + Sync + 'static {
    fn request_recomposition(&self, scope: &RecompositionScope);
}
