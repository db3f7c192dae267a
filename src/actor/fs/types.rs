use std::io;
use std::path::PathBuf;
use std::time::Duration;

/// What happened to a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
    Removed,
}

impl ChangeKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Modified => "modified",
            Self::Removed => "removed",
        }
    }
}

/// Output of the filesystem actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// One file changed below a watch root.
    Changed { path: PathBuf, kind: ChangeKind },
    /// A root vanished and did not come back in time.
    RootTimedOut { root: PathBuf, missing_for: Duration },
    /// Watching `path` hit an I/O error. The receiver decides when repeated
    /// failures become fatal.
    Failed {
        path: PathBuf,
        kind: io::ErrorKind,
        detail: String,
    },
}

impl WatchEvent {
    /// `fallback` is used when notify does not say which path failed.
    pub fn from_notify_error(err: &notify::Error, fallback: &std::path::Path) -> Self {
        let kind = match &err.kind {
            notify::ErrorKind::Io(e) => e.kind(),
            notify::ErrorKind::PathNotFound => io::ErrorKind::NotFound,
            _ => io::ErrorKind::Other,
        };
        Self::Failed {
            path: err.paths.first().cloned().unwrap_or_else(|| fallback.to_path_buf()),
            kind,
            detail: err.to_string(),
        }
    }

    pub fn from_io_error(path: PathBuf, err: &io::Error) -> Self {
        Self::Failed {
            path,
            kind: err.kind(),
            detail: err.to_string(),
        }
    }
}
