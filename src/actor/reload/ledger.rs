//! Last known content hash per unit.

use std::fs;
use std::path::PathBuf;

use dashmap::DashMap;
use rayon::prelude::*;

use crate::core::{ContentHash, UnitName};

/// Updated only by `Applied` outcomes (and the startup baseline), so units
/// that failed are sent again once their content changes.
#[derive(Debug, Default)]
pub struct HashLedger {
    hashes: DashMap<UnitName, ContentHash>,
}

impl HashLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, unit: &UnitName) -> Option<ContentHash> {
        self.hashes.get(unit).map(|entry| *entry)
    }

    pub fn contains(&self, unit: &UnitName) -> bool {
        self.hashes.contains_key(unit)
    }

    /// `true` when `hash` equals the recorded one.
    pub fn is_unchanged(&self, unit: &UnitName, hash: &ContentHash) -> bool {
        self.get(unit).as_ref() == Some(hash)
    }

    pub fn record(&self, unit: UnitName, hash: ContentHash) {
        self.hashes.insert(unit, hash);
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    /// Hash every file in parallel and record it. Unreadable files are
    /// skipped; they will be sent when the next change event arrives.
    pub fn seed(&self, files: &[(PathBuf, UnitName)]) -> usize {
        files
            .par_iter()
            .filter_map(|(path, unit)| {
                let content = fs::read(path).ok()?;
                self.record(unit.clone(), ContentHash::of(&content));
                Some(())
            })
            .count()
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_seed_records_readable_files() {
        let dir = TempDir::new().unwrap();
        let foo = dir.path().join("Foo.class");
        fs::write(&foo, "foo").unwrap();

        let ledger = HashLedger::new();
        let seeded = ledger.seed(&[
            (foo, UnitName::new("Foo")),
            (dir.path().join("Gone.class"), UnitName::new("Gone")),
        ]);

        assert_eq!(seeded, 1);
        assert!(ledger.is_unchanged(&"Foo".into(), &ContentHash::of(b"foo")));
        assert!(!ledger.contains(&"Gone".into()));
    }
}
