//! In-memory runtime for embedded applications and test fixtures.
//!
//! Unit content may start with a shape header terminated by `---`:
//!
//! ```text
//! super androidx.compose.Base
//! field count: Int
//! field label: String
//! ---
//! <body>
//! ```
//!
//! Content without a `---` line has no supertype and no fields.

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};

use super::error::RedefinitionError;
use super::runtime::{FieldSlot, RecompositionScope, UiRuntime, UnitRuntime, UnitShape};
use crate::core::UnitName;

const HEADER_END: &str = "---";

#[derive(Debug, Clone)]
struct LoadedUnit {
    shape: UnitShape,
    body: Vec<u8>,
    /// 0 when loaded at startup, +1 per redefinition
    version: u32,
}

#[derive(Debug, Default)]
struct Units {
    loaded: FxHashMap<UnitName, LoadedUnit>,
    /// Units the runtime refuses to redefine
    pinned: FxHashSet<UnitName>,
}

/// Shared-state runtime; clones observe the same units.
#[derive(Debug, Clone, Default)]
pub struct SimulatedRuntime {
    units: Arc<Mutex<Units>>,
}

impl SimulatedRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a unit as if the process started with it.
    pub fn load(&self, unit: UnitName, content: &[u8]) -> Result<(), RedefinitionError> {
        let (shape, body) = parse_unit(&unit, content)?;
        self.units.lock().loaded.insert(
            unit,
            LoadedUnit {
                shape,
                body,
                version: 0,
            },
        );
        Ok(())
    }

    /// Make `apply` fail for this unit with `RejectedByRuntime`.
    pub fn pin(&self, unit: UnitName) {
        self.units.lock().pinned.insert(unit);
    }

    /// Body of the loaded version.
    pub fn body(&self, unit: &UnitName) -> Option<Vec<u8>> {
        self.units.lock().loaded.get(unit).map(|u| u.body.clone())
    }

    pub fn version(&self, unit: &UnitName) -> Option<u32> {
        self.units.lock().loaded.get(unit).map(|u| u.version)
    }

    /// Loaded unit names, sorted.
    pub fn unit_names(&self) -> Vec<UnitName> {
        let mut names: Vec<_> = self.units.lock().loaded.keys().cloned().collect();
        names.sort();
        names
    }
}

impl UnitRuntime for SimulatedRuntime {
    fn is_loaded(&self, unit: &UnitName) -> bool {
        self.units.lock().loaded.contains_key(unit)
    }

    fn loaded_shape(&self, unit: &UnitName) -> Option<UnitShape> {
        self.units.lock().loaded.get(unit).map(|u| u.shape.clone())
    }

    fn read_shape(&self, unit: &UnitName, content: &[u8]) -> Result<UnitShape, RedefinitionError> {
        parse_unit(unit, content).map(|(shape, _)| shape)
    }

    fn apply(&mut self, unit: &UnitName, content: &[u8]) -> Result<(), RedefinitionError> {
        let (shape, body) = parse_unit(unit, content)?;
        let mut units = self.units.lock();
        if units.pinned.contains(unit) {
            return Err(RedefinitionError::RejectedByRuntime {
                unit: unit.clone(),
                detail: "unit is pinned".into(),
            });
        }

        let version = units.loaded.get(unit).map_or(0, |u| u.version + 1);
        units.loaded.insert(
            unit.clone(),
            LoadedUnit {
                shape,
                body,
                version,
            },
        );
        Ok(())
    }
}

/// Split content into declared shape and body.
fn parse_unit(unit: &UnitName, content: &[u8]) -> Result<(UnitShape, Vec<u8>), RedefinitionError> {
    let malformed = |detail: String| RedefinitionError::RejectedByRuntime {
        unit: unit.clone(),
        detail,
    };

    let Some(header_len) = header_length(content) else {
        return Ok((UnitShape::default(), content.to_vec()));
    };
    let header = std::str::from_utf8(&content[..header_len])
        .map_err(|e| malformed(format!("header is not UTF-8: {e}")))?;

    let mut shape = UnitShape::default();
    for line in header.lines().map(str::trim) {
        if line.is_empty() || line == HEADER_END {
            continue;
        }
        if let Some(supertype) = line.strip_prefix("super ") {
            shape.supertype = Some(supertype.trim().to_string());
        } else if let Some(field) = line.strip_prefix("field ") {
            let Some((name, ty)) = field.split_once(':') else {
                return Err(malformed(format!("field without type: `{line}`")));
            };
            shape.fields.push(FieldSlot {
                name: name.trim().to_string(),
                ty: ty.trim().to_string(),
            });
        } else {
            return Err(malformed(format!("unknown header line `{line}`")));
        }
    }

    // Body bytes are kept as-is
    Ok((shape, content[header_len..].to_vec()))
}

/// Byte length of the header including its `---` line.
fn header_length(content: &[u8]) -> Option<usize> {
    let mut offset = 0;
    for line in content.split_inclusive(|b| *b == b'\n') {
        offset += line.len();
        if line.trim_ascii() == HEADER_END.as_bytes() {
            return Some(offset);
        }
    }
    None
}

/// UI runtime that records every recomposition request.
#[derive(Debug, Clone, Default)]
pub struct RecompositionLog {
    requests: Arc<Mutex<Vec<RecompositionScope>>>,
}

impl RecompositionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> Vec<RecompositionScope> {
        self.requests.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.requests.lock().len()
    }
}

impl UiRuntime for RecompositionLog {
    fn request_recomposition(&self, scope: &RecompositionScope) {
        crate::debug!("engine"; "recompose {} ({} units)", scope.generation, scope.units.len());
        self.requests.lock().push(scope.clone());
    }
}
