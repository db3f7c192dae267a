use std::path::PathBuf;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use super::events::{file_changes, is_temp_file};
use super::watch_roots::WatchRoots;
use super::*;
use crate::utils::path::normalize_path;

fn make_event(paths: Vec<&str>, kind: notify::EventKind) -> notify::Event {
    notify::Event {
        kind,
        paths: paths.into_iter().map(PathBuf::from).collect(),
        attrs: Default::default(),
    }
}

fn modify_kind() -> notify::EventKind {
    notify::EventKind::Modify(notify::event::ModifyKind::Data(
        notify::event::DataChange::Any,
    ))
}

#[test]
fn test_event_kinds_map_to_changes() {
    let created = file_changes(&make_event(
        vec!["/tmp/a.class"],
        notify::EventKind::Create(notify::event::CreateKind::File),
    ));
    assert_eq!(created, vec![(PathBuf::from("/tmp/a.class"), ChangeKind::Created)]);

    let modified = file_changes(&make_event(vec!["/tmp/b.class"], modify_kind()));
    assert_eq!(modified[0].1, ChangeKind::Modified);

    let removed = file_changes(&make_event(
        vec!["/tmp/c.class"],
        notify::EventKind::Remove(notify::event::RemoveKind::File),
    ));
    assert_eq!(removed[0].1, ChangeKind::Removed);
}

#[test]
fn test_metadata_changes_are_ignored() {
    let event = make_event(
        vec!["/tmp/a.class"],
        notify::EventKind::Modify(notify::event::ModifyKind::Metadata(
            notify::event::MetadataKind::WriteTime,
        )),
    );
    assert!(file_changes(&event).is_empty());
}

#[test]
fn test_rename_splits_into_remove_and_create() {
    let event = make_event(
        vec!["/tmp/Foo.class.part", "/tmp/Foo.class"],
        notify::EventKind::Modify(notify::event::ModifyKind::Name(
            notify::event::RenameMode::Both,
        )),
    );
    assert_eq!(
        file_changes(&event),
        vec![
            (PathBuf::from("/tmp/Foo.class.part"), ChangeKind::Removed),
            (PathBuf::from("/tmp/Foo.class"), ChangeKind::Created),
        ]
    );
}

#[test]
fn test_temp_files_are_filtered() {
    assert!(is_temp_file(&PathBuf::from("/tmp/Foo.class.swp")));
    assert!(is_temp_file(&PathBuf::from("/tmp/Foo.class~")));
    assert!(is_temp_file(&PathBuf::from("/tmp/.Foo.class")));
    assert!(is_temp_file(&PathBuf::from("/tmp/build.tmp")));
    assert!(!is_temp_file(&PathBuf::from("/tmp/Foo.class")));

    let event = make_event(vec!["/tmp/x.swp", "/tmp/Foo.class"], modify_kind());
    let changes = file_changes(&event);
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].0, PathBuf::from("/tmp/Foo.class"));
}

#[test]
fn test_vanished_root_times_out_once_and_reattaches() {
    let temp = TempDir::new().unwrap();
    let root = normalize_path(temp.path()).join("classes");
    std::fs::create_dir_all(&root).unwrap();

    let mut watcher = notify::recommended_watcher(|_| {}).unwrap();
    let timeout = Duration::from_secs(5);
    let mut roots = WatchRoots::new(vec![root.clone()], timeout);
    roots.attach_existing(&mut watcher).unwrap();
    assert!(roots.is_attached(&root));

    std::fs::remove_dir_all(&root).unwrap();
    let start = Instant::now();
    assert!(roots.maintain(&mut watcher, start).is_empty());
    assert!(!roots.is_attached(&root));

    let expired = roots.maintain(&mut watcher, start + timeout);
    assert_eq!(
        expired,
        vec![WatchEvent::RootTimedOut {
            root: root.clone(),
            missing_for: timeout
        }]
    );
    assert!(roots.maintain(&mut watcher, start + timeout * 2).is_empty());

    std::fs::create_dir_all(&root).unwrap();
    assert!(roots.maintain(&mut watcher, start + timeout * 3).is_empty());
    assert!(roots.is_attached(&root));
}

/// Watcher whose `watch` fails while `refuse` is set.
struct RefusingWatcher {
    refuse: bool,
    watched: Vec<PathBuf>,
}

impl notify::Watcher for RefusingWatcher {
    fn new<F: notify::EventHandler>(_: F, _: notify::Config) -> notify::Result<Self> {
        Ok(Self {
            refuse: false,
            watched: Vec::new(),
        })
    }

    fn watch(&mut self, path: &std::path::Path, _: notify::RecursiveMode) -> notify::Result<()> {
        if self.refuse {
            return Err(notify::Error::new(notify::ErrorKind::MaxFilesWatch).add_path(path.to_path_buf()));
        }
        self.watched.push(path.to_path_buf());
        Ok(())
    }

    fn unwatch(&mut self, path: &std::path::Path) -> notify::Result<()> {
        self.watched.retain(|p| p != path);
        Ok(())
    }

    fn kind() -> notify::WatcherKind {
        notify::WatcherKind::NullWatcher
    }
}

#[test]
fn test_failed_reattach_is_reported_with_backoff() {
    let temp = TempDir::new().unwrap();
    let root = normalize_path(temp.path()).join("classes");
    let mut watcher = RefusingWatcher {
        refuse: true,
        watched: Vec::new(),
    };
    let mut roots = WatchRoots::new(vec![root.clone()], Duration::from_secs(30));
    roots.set_retry(crate::utils::retry::RetryPolicy {
        attempts: 3,
        base: Duration::from_secs(1),
        max: Duration::from_secs(4),
    });
    roots.attach_existing(&mut watcher).unwrap();
    std::fs::create_dir_all(&root).unwrap();

    let start = Instant::now();
    let reports = roots.maintain(&mut watcher, start);
    assert_eq!(reports.len(), 1);
    let WatchEvent::Failed { path, kind, .. } = &reports[0] else {
        panic!("expected a failure, got {:?}", reports[0]);
    };
    assert_eq!(path, &root);
    assert_eq!(*kind, std::io::ErrorKind::Other);

    // Not retried before the first delay, then the delay doubles
    assert!(roots.maintain(&mut watcher, start + Duration::from_millis(500)).is_empty());
    assert_eq!(roots.maintain(&mut watcher, start + Duration::from_secs(1)).len(), 1);
    assert!(roots.maintain(&mut watcher, start + Duration::from_secs(2)).is_empty());

    watcher.refuse = false;
    assert!(roots.maintain(&mut watcher, start + Duration::from_secs(3)).is_empty());
    assert!(roots.is_attached(&root));
    assert_eq!(watcher.watched, vec![root]);
}

#[test]
fn test_notify_errors_become_watch_failures() {
    let fallback = PathBuf::from("/out/classes");
    let io = notify::Error::io(std::io::Error::from(std::io::ErrorKind::PermissionDenied));
    let WatchEvent::Failed { path, kind, .. } = WatchEvent::from_notify_error(&io, &fallback) else {
        panic!("expected a failure");
    };
    assert_eq!(path, fallback);
    assert_eq!(kind, std::io::ErrorKind::PermissionDenied);

    let missing = notify::Error::path_not_found().add_path(PathBuf::from("/out/classes/app"));
    let WatchEvent::Failed { path, kind, .. } = WatchEvent::from_notify_error(&missing, &fallback) else {
        panic!("expected a failure");
    };
    assert_eq!(path, PathBuf::from("/out/classes/app"));
    assert_eq!(kind, std::io::ErrorKind::NotFound);
}

#[test]
fn test_never_seen_root_has_no_deadline() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("not-built-yet");

    let mut watcher = notify::recommended_watcher(|_| {}).unwrap();
    let mut roots = WatchRoots::new(vec![root.clone()], Duration::from_millis(1));
    roots.attach_existing(&mut watcher).unwrap();

    let later = Instant::now() + Duration::from_secs(60);
    assert!(roots.maintain(&mut watcher, later).is_empty());

    std::fs::create_dir_all(&root).unwrap();
    roots.maintain(&mut watcher, later);
    assert!(roots.is_attached(&root));
}

#[tokio::test]
async fn test_actor_forwards_file_writes() {
    let temp = TempDir::new().unwrap();
    let root = normalize_path(temp.path());
    let (tx, mut rx) = tokio::sync::mpsc::channel(16);

    let actor = FsActor::new(vec![root.clone()], Duration::from_secs(30), tx).unwrap();
    tokio::spawn(actor.run());

    let file = root.join("Foo.class");
    std::fs::write(&file, b"v1").unwrap();

    let event = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Some(WatchEvent::Changed { path, .. }) if path == file => return path,
                Some(_) => continue,
                None => panic!("actor stopped"),
            }
        }
    })
    .await
    .expect("no event for written file");
    assert_eq!(event, file);
}
