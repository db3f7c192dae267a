//! Build-artifact wiring: which directories hold units and how files map to
//! unit names.
//!
//! ```text
//! build/classes/kotlin/main/com/example/Foo.class  → com.example.Foo
//! build/classes/kotlin/main/META-INF/foo.kotlin_module → META-INF/foo.kotlin_module
//! build/processedResources/main/strings.xml         → strings.xml
//! ```

use std::io;
use std::path::{Path, PathBuf};

use jwalk::WalkDir;

use crate::actor::fs::is_temp_file;
use crate::config::ReloadConfig;
use crate::core::{Topology, UnitName};
use crate::utils::path::{normalize_path, slash_relative};

const CLASS_EXTENSION: &str = "class";

#[derive(Debug, Clone)]
pub struct ArtifactWiring {
    classes: Vec<PathBuf>,
    resources: Option<PathBuf>,
    topology: Topology,
}

impl ArtifactWiring {
    pub fn new(classes: Vec<PathBuf>, resources: Option<PathBuf>, topology: Topology) -> Self {
        Self {
            classes: classes.iter().map(|p| normalize_path(p)).collect(),
            resources: resources.map(|p| normalize_path(&p)),
            topology,
        }
    }

    /// Wiring from the resolved `[watch]` section.
    pub fn from_config(config: &ReloadConfig) -> Self {
        Self::new(
            config.watch.classes_dirs().to_vec(),
            config.watch.resources_dir().map(Path::to_path_buf),
            config.watch.topology,
        )
    }

    /// The default build layout of `topology` under `root`.
    pub fn for_project(root: &Path, topology: Topology) -> Self {
        Self::new(
            vec![topology.classes_dir(root)],
            Some(topology.resources_dir(root)),
            topology,
        )
    }

    #[inline]
    pub fn topology(&self) -> Topology {
        self.topology
    }

    pub fn classes_dirs(&self) -> &[PathBuf] {
        &self.classes
    }

    pub fn resources_dir(&self) -> Option<&Path> {
        self.resources.as_deref()
    }

    /// Every directory to watch, classes first, without duplicates.
    pub fn roots(&self) -> Vec<PathBuf> {
        let mut roots = self.classes.clone();
        if let Some(resources) = &self.resources
            && !roots.contains(resources)
        {
            roots.push(resources.clone());
        }
        roots
    }

    /// Unit name for an artifact file, `None` if it lies outside every root
    /// or is an editor temp file.
    pub fn unit_for(&self, path: &Path) -> Option<UnitName> {
        if is_temp_file(path) {
            return None;
        }

        for dir in &self.classes {
            if let Some(rel) = slash_relative(path, dir) {
                return Some(UnitName::new(class_name(&rel)));
            }
        }

        let resources = self.resources.as_deref()?;
        slash_relative(path, resources).map(UnitName::new)
    }

    /// Every unit file currently present, sorted by path, plus the entries
    /// that could not be read.
    pub fn scan(&self) -> Scan {
        let mut scan = Scan::default();
        for root in self.roots() {
            if !root.is_dir() {
                continue;
            }
            for entry in WalkDir::new(&root).skip_hidden(false) {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        let path = e.path().map_or_else(|| root.clone(), Path::to_path_buf);
                        crate::debug!("scan"; "unreadable {}: {}", path.display(), e);
                        scan.errors.push((path, io::Error::from(e)));
                        continue;
                    }
                };
                if !entry.file_type().is_file() {
                    continue;
                }
                let path = normalize_path(&entry.path());
                if let Some(unit) = self.unit_for(&path) {
                    scan.units.push((path, unit));
                }
            }
        }
        scan.units.sort();
        scan.units.dedup_by(|a, b| a.0 == b.0);
        scan
    }
}

#[derive(Debug, Default)]
pub struct Scan {
    pub units: Vec<(PathBuf, UnitName)>,
    pub errors: Vec<(PathBuf, io::Error)>,
}

/// `com/example/Foo.class` → `com.example.Foo`; anything else unchanged.
fn class_name(relative: &str) -> String {
    match relative.rsplit_once('.') {
        Some((stem, CLASS_EXTENSION)) if !stem.is_empty() => stem.replace('/', "."),
        _ => relative.to_string(),
    }
}
