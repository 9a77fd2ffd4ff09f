//! Snapshot persistence capability
//!
//! The graph is persisted as a single binary blob: a 1-byte version tag
//! followed by a bincode payload (see [`crate::graph::GraphStore`] for the
//! codec). This module only moves bytes; both read and write may fail
//! without being fatal to the engine.

use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Byte-level persistence for graph snapshots
pub trait SnapshotStore: Send + Sync {
    /// Read the last written snapshot, `None` if none exists
    fn read(&self) -> Result<Option<Vec<u8>>>;

    /// Persist a snapshot, replacing any previous one
    fn write(&self, bytes: &[u8]) -> Result<()>;
}

/// File-backed snapshot store with atomic replacement
///
/// Writes go to a temp file in the same directory, are fsynced, then renamed
/// over the target so a crash mid-write never leaves a torn snapshot.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    path: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "snapshot".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn read(&self) -> Result<Option<Vec<u8>>> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("reading snapshot {}", self.path.display())),
        }
    }

    fn write(&self, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("creating snapshot dir {}", parent.display()))?;
            }
        }

        let tmp = self.temp_path();
        let mut file = fs::File::create(&tmp)
            .with_context(|| format!("creating temp snapshot {}", tmp.display()))?;
        file.write_all(bytes)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp, &self.path)
            .with_context(|| format!("renaming snapshot into {}", self.path.display()))?;

        tracing::debug!(
            path = %self.path.display(),
            bytes = bytes.len(),
            "Snapshot written"
        );
        Ok(())
    }
}

/// In-memory snapshot store for tests and ephemeral deployments
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    bytes: parking_lot::Mutex<Option<Vec<u8>>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seed the store, as if a previous process had written a snapshot
    pub fn with_bytes(bytes: Vec<u8>) -> Self {
        Self {
            bytes: parking_lot::Mutex::new(Some(bytes)),
        }
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn read(&self) -> Result<Option<Vec<u8>>> {
        Ok(self.bytes.lock().clone())
    }

    fn write(&self, bytes: &[u8]) -> Result<()> {
        *self.bytes.lock() = Some(bytes.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_read_missing_is_none() {
        let dir = TempDir::new().unwrap();
        let store = FileSnapshotStore::new(dir.path().join("graph.bin"));
        assert!(store.read().unwrap().is_none());
    }

    #[test]
    fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let store = FileSnapshotStore::new(dir.path().join("graph.bin"));
        store.write(b"\x01hello").unwrap();
        assert_eq!(store.read().unwrap().unwrap(), b"\x01hello");
    }

    #[test]
    fn test_write_replaces_previous() {
        let dir = TempDir::new().unwrap();
        let store = FileSnapshotStore::new(dir.path().join("graph.bin"));
        store.write(b"first").unwrap();
        store.write(b"second").unwrap();
        assert_eq!(store.read().unwrap().unwrap(), b"second");
        // No temp file left behind
        assert!(!store.temp_path().exists());
    }

    #[test]
    fn test_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let store = FileSnapshotStore::new(dir.path().join("nested/deep/graph.bin"));
        store.write(b"data").unwrap();
        assert!(store.read().unwrap().is_some());
    }

    #[test]
    fn test_memory_store() {
        let store = MemorySnapshotStore::new();
        assert!(store.read().unwrap().is_none());
        store.write(b"abc").unwrap();
        assert_eq!(store.read().unwrap().unwrap(), b"abc");
    }
}
