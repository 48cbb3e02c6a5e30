//! File-backed durable key/value store.
//!
//! Each key maps to one file under the store root; `/` in a key becomes a
//! directory level. Writes go through a temporary file and a rename, so a
//! crash never leaves a half-written value behind.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use proctor_core::traits::KeyValueStore;

pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .with_context(|| format!("failed to create store directory: {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let mut path = self.root.clone();
        for segment in key.split('/').filter(|s| !s.is_empty()) {
            path.push(sanitize(segment));
        }
        path.set_extension("json");
        path
    }
}

/// Keep key segments inside the store root and portable across filesystems.
fn sanitize(segment: &str) -> String {
    let cleaned: String = segment
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.chars().all(|c| c == '_') {
        format!("_{}", cleaned.len())
    } else {
        cleaned
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key);
        match std::fs::read_to_string(&path) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("failed to read {}", path.display())),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, value)
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("failed to replace {}", path.display()))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("failed to remove {}", path.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        assert!(store.get("proctor/EX1/s1/in_progress").unwrap().is_none());
        store.set("proctor/EX1/s1/in_progress", "abc").unwrap();
        assert_eq!(
            store.get("proctor/EX1/s1/in_progress").unwrap().as_deref(),
            Some("abc")
        );
        assert!(dir.path().join("proctor/EX1/s1/in_progress.json").exists());

        store.remove("proctor/EX1/s1/in_progress").unwrap();
        assert!(store.get("proctor/EX1/s1/in_progress").unwrap().is_none());
        // Removing twice is fine.
        store.remove("proctor/EX1/s1/in_progress").unwrap();
    }

    #[test]
    fn values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        FileStore::open(dir.path()).unwrap().set("k", "v1").unwrap();
        let reopened = FileStore::open(dir.path()).unwrap();
        assert_eq!(reopened.get("k").unwrap().as_deref(), Some("v1"));
    }

    #[test]
    fn keys_cannot_escape_the_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("store")).unwrap();
        store.set("../../etc/passwd", "nope").unwrap();
        assert!(!dir.path().join("etc").exists());
        assert_eq!(store.get("../../etc/passwd").unwrap().as_deref(), Some("nope"));
    }

    #[test]
    fn student_ids_with_odd_characters() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        store.set("proctor/EX 1/ada@school.edu/snapshot", "{}").unwrap();
        assert_eq!(
            store.get("proctor/EX 1/ada@school.edu/snapshot").unwrap().as_deref(),
            Some("{}")
        );
    }
}
