use std::path::{Path, PathBuf};

use notify::EventKind;
use notify::event::{ModifyKind, RenameMode};

use super::types::ChangeKind;
use crate::utils::path::normalize_path;

/// Translate one notify event into per-file changes.
///
/// Renames are split: the old name is removed, the new one created. Compilers
/// commonly write a temp file and rename it over the class file.
pub(super) fn file_changes(event: &notify::Event) -> Vec<(PathBuf, ChangeKind)> {
    let kinds: Vec<ChangeKind> = match event.kind {
        EventKind::Create(_) => vec![ChangeKind::Created],
        EventKind::Remove(_) => vec![ChangeKind::Removed],
        // Metadata-only changes (mtime/chmod) carry no new content
        EventKind::Modify(ModifyKind::Metadata(_)) => return Vec::new(),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => vec![ChangeKind::Removed],
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => vec![ChangeKind::Created],
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            vec![ChangeKind::Removed, ChangeKind::Created]
        }
        EventKind::Modify(_) => vec![ChangeKind::Modified],
        _ => return Vec::new(),
    };

    event
        .paths
        .iter()
        .enumerate()
        .filter(|(_, path)| !is_temp_file(path))
        .map(|(i, path)| {
            let kind = kinds.get(i).or(kinds.last()).copied().unwrap_or(ChangeKind::Modified);
            (normalize_path(path), kind)
        })
        .collect()
}

/// Check if path is a temp/backup file (editor artifacts).
pub fn is_temp_file(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

    matches!(ext, "bck" | "bak" | "backup" | "swp" | "swo" | "tmp")
        || name.ends_with('~')
        || name.starts_with('.')
}
