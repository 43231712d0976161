//! Polling change detection over a watched content tree.
//!
//! Keeps a per-path snapshot of `(mtime, size)` and diffs it on every poll,
//! emitting added/modified/deleted events in a stable lexicographic order.
//! Only files matching the configured extensions are tracked.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::Result;

/// Last observed state of one watched file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileState {
    pub mtime: SystemTime,
    pub size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
}

/// One detected file change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

/// Polls a directory tree and diffs it against the previous snapshot.
pub struct DirectoryWatcher {
    root: PathBuf,
    extensions: Vec<String>,
    snapshot: BTreeMap<PathBuf, FileState>,
}

impl DirectoryWatcher {
    pub fn new(root: impl Into<PathBuf>, extensions: &[String]) -> Self {
        Self {
            root: root.into(),
            extensions: extensions.iter().map(|e| e.to_lowercase()).collect(),
            snapshot: BTreeMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Diff the tree against the previous snapshot. Events come out sorted
    /// lexicographically by path; per-path ordering across polls follows
    /// arrival order by construction.
    pub fn poll(&mut self) -> Result<Vec<ChangeEvent>> {
        let current = self.scan()?;
        let mut events = Vec::new();

        for (path, state) in &current {
            match self.snapshot.get(path) {
                None => events.push(ChangeEvent {
                    path: path.clone(),
                    kind: ChangeKind::Added,
                }),
                Some(previous) if previous != state => events.push(ChangeEvent {
                    path: path.clone(),
                    kind: ChangeKind::Modified,
                }),
                Some(_) => {}
            }
        }
        for path in self.snapshot.keys() {
            if !current.contains_key(path) {
                events.push(ChangeEvent {
                    path: path.clone(),
                    kind: ChangeKind::Deleted,
                });
            }
        }

        events.sort_by(|a, b| a.path.cmp(&b.path));
        self.snapshot = current;
        Ok(events)
    }

    /// Whether a path passes the extension filter.
    pub fn matches(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.extensions.contains(&e.to_lowercase()))
            .unwrap_or(false)
    }

    fn scan(&self) -> Result<BTreeMap<PathBuf, FileState>> {
        let mut found = BTreeMap::new();
        if self.root.exists() {
            self.scan_dir(&self.root, &mut found)?;
        }
        Ok(found)
    }

    fn scan_dir(&self, dir: &Path, found: &mut BTreeMap<PathBuf, FileState>) -> Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                // Skip hidden directories (.git and friends)
                let hidden = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with('.'))
                    .unwrap_or(false);
                if !hidden {
                    self.scan_dir(&path, found)?;
                }
            } else if file_type.is_file() && self.matches(&path) {
                let metadata = entry.metadata()?;
                found.insert(
                    path,
                    FileState {
                        mtime: metadata.modified()?,
                        size: metadata.len(),
                    },
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn md_extensions() -> Vec<String> {
        vec!["md".into()]
    }

    #[test]
    fn first_poll_reports_existing_files_as_added() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.md"), "alpha").unwrap();
        fs::write(dir.path().join("b.md"), "beta").unwrap();

        let mut watcher = DirectoryWatcher::new(dir.path(), &md_extensions());
        let events = watcher.poll().unwrap();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.kind == ChangeKind::Added));
        // Lexicographic order
        assert!(events[0].path.ends_with("a.md"));
        assert!(events[1].path.ends_with("b.md"));
    }

    #[test]
    fn unchanged_tree_emits_nothing() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.md"), "alpha").unwrap();

        let mut watcher = DirectoryWatcher::new(dir.path(), &md_extensions());
        watcher.poll().unwrap();
        assert!(watcher.poll().unwrap().is_empty());
    }

    #[test]
    fn size_change_is_modified() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.md");
        fs::write(&file, "alpha").unwrap();

        let mut watcher = DirectoryWatcher::new(dir.path(), &md_extensions());
        watcher.poll().unwrap();

        fs::write(&file, "alpha with more content").unwrap();
        let events = watcher.poll().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, ChangeKind::Modified);
    }

    #[test]
    fn removal_is_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.md");
        fs::write(&file, "alpha").unwrap();

        let mut watcher = DirectoryWatcher::new(dir.path(), &md_extensions());
        watcher.poll().unwrap();

        fs::remove_file(&file).unwrap();
        let events = watcher.poll().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, ChangeKind::Deleted);
        assert!(events[0].path.ends_with("a.md"));
    }

    #[test]
    fn extension_filter_applies() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.md"), "tracked").unwrap();
        fs::write(dir.path().join("b.txt"), "ignored").unwrap();
        fs::write(dir.path().join("c"), "no extension").unwrap();

        let mut watcher = DirectoryWatcher::new(dir.path(), &md_extensions());
        let events = watcher.poll().unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].path.ends_with("a.md"));
    }

    #[test]
    fn nested_directories_are_scanned_but_hidden_ones_skipped() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("docs/deep")).unwrap();
        fs::create_dir_all(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join("docs/deep/nested.md"), "found").unwrap();
        fs::write(dir.path().join(".git/ignored.md"), "not found").unwrap();

        let mut watcher = DirectoryWatcher::new(dir.path(), &md_extensions());
        let events = watcher.poll().unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].path.ends_with("nested.md"));
    }

    #[test]
    fn missing_root_is_empty_not_an_error() {
        let mut watcher = DirectoryWatcher::new("/nonexistent/watch/root", &md_extensions());
        assert!(watcher.poll().unwrap().is_empty());
    }

    #[test]
    fn mixed_changes_come_out_in_path_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.md"), "beta").unwrap();
        fs::write(dir.path().join("d.md"), "delta").unwrap();

        let mut watcher = DirectoryWatcher::new(dir.path(), &md_extensions());
        watcher.poll().unwrap();

        fs::write(dir.path().join("a.md"), "alpha").unwrap(); // added
        fs::write(dir.path().join("b.md"), "beta prime").unwrap(); // modified
        fs::remove_file(dir.path().join("d.md")).unwrap(); // deleted

        let events = watcher.poll().unwrap();
        let kinds: Vec<ChangeKind> = events.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![ChangeKind::Added, ChangeKind::Modified, ChangeKind::Deleted]
        );
        assert!(events[0].path.ends_with("a.md"));
        assert!(events[1].path.ends_with("b.md"));
        assert!(events[2].path.ends_with("d.md"));
    }
}
