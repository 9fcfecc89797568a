//! Durable hierarchical storage for depletion results.
//!
//! This module provides a single-file, append-only store with:
//! - A framed mutation log with CRC32 checksums for corruption detection
//! - Torn-write recovery on open
//! - File locking for the length of each session
//! - Snapshot compaction through write-to-temp-then-rename
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                           Store                              │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────┐  ┌─────────────────┐                    │
//! │  │    Session      │  │ SnapshotWriter  │                    │
//! │  │ (replay + log)  │  │  (compaction)   │                    │
//! │  └────────┬────────┘  └────────┬────────┘                    │
//! │           │                    │                             │
//! │           └──────────┬─────────┘                             │
//! │                      ↓                                       │
//! │           ┌─────────────────────┐                            │
//! │           │   FileLock (flock)  │                            │
//! │           └─────────────────────┘                            │
//! └──────────────────────────────────────────────────────────────┘
//! ```

mod codec;
mod file_lock;
mod log;
mod node;
mod session;
mod snapshot;

pub use codec::{HEADER_LEN, MAGIC};
pub use file_lock::{FileLock, LockMode};
pub use log::{LogEntry, LogEntryKind};
pub use node::{Column, ColumnKind, ExtensibleArray, Group, Node, NodePath, NodeTree, Table, TableSchema};
pub use session::{AccessMode, Session};

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::StoreConfig;
use crate::error::{StorageError, StoreResult};

use snapshot::SnapshotWriter;

/// Handle on a store file.
///
/// Holds only the path and configuration; every access opens a fresh
/// [`Session`] and closes it before returning.
#[derive(Debug, Clone)]
pub struct Store {
    path: PathBuf,
    config: StoreConfig,
}

/// Outcome of [`Store::compact`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionResult {
    pub entries_before: u64,
    pub entries_after: u64,
    pub bytes_before: u64,
    pub bytes_after: u64,
}

/// Size of a store file and its log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    /// Log entries replayed.
    pub entries: u64,
    /// Nodes in the tree, root excluded.
    pub nodes: usize,
    /// Bytes on disk.
    pub file_size: u64,
}

impl Store {
    /// Creates a handle after validating the configuration.
    ///
    /// Nothing is touched on disk until the first session.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Config` if the configuration is invalid.
    pub fn new(path: impl Into<PathBuf>, config: StoreConfig) -> StoreResult<Self> {
        Ok(Self {
            path: path.into(),
            config: config.validate()?,
        })
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Store configuration.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Returns true if the backing file exists.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Runs `f` against a read-only session.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened, or whatever `f` returns.
    pub fn read<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Session) -> Result<T, E>,
        E: From<StorageError>,
    {
        let session = Session::open(&self.path, &self.config, AccessMode::Read)?;
        f(&session)
    }

    /// Runs `f` against an appending session, then flushes and closes it.
    ///
    /// Entries written before `f` fails stay in the log; each one is a
    /// complete mutation on its own. After a successful session the store is
    /// compacted if the configured [`crate::config::CompactionPolicy`] says
    /// enough of it is superseded.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened, flushed or compacted,
    /// or whatever `f` returns.
    pub fn append<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Session) -> Result<T, E>,
        E: From<StorageError>,
    {
        let mut session = Session::open(&self.path, &self.config, AccessMode::Append)?;
        match f(&mut session) {
            Ok(value) => {
                session.flush()?;
                let file_size = fs::metadata(&self.path).map_err(StorageError::Io)?.len();
                if self
                    .config
                    .compaction
                    .should_compact(session.superseded_bytes(), file_size)
                {
                    self.compact_session(session)?;
                } else {
                    session.close()?;
                }
                Ok(value)
            }
            Err(e) => {
                // Keep what was logged so far durable before reporting.
                if let Err(flush_err) = session.flush() {
                    tracing::warn!(
                        path = %self.path.display(),
                        error = %flush_err,
                        "Failed to flush store after an aborted session"
                    );
                }
                Err(e)
            }
        }
    }

    /// Rewrites the log as one entry per live node.
    ///
    /// Rows superseded by migrations are dropped. The writer lock is held
    /// until the new file has replaced the old one.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be opened or the snapshot cannot
    /// be written; the original file is left untouched in that case.
    pub fn compact(&self) -> StoreResult<CompactionResult> {
        let session = Session::open(&self.path, &self.config, AccessMode::Append)?;
        Ok(self.compact_session(session)?)
    }

    fn compact_session(&self, session: Session) -> Result<CompactionResult, StorageError> {
        let bytes_before = fs::metadata(&self.path)?.len();
        let entries_before = session.replayed_entries() + session.appended_entries();
        let superseded = session.superseded_bytes();

        let mut writer = SnapshotWriter::new(&self.path, self.config.compression)?;
        let entries_after = writer.write_tree(session.tree())?;
        let lock = session.into_lock()?;

        // Windows refuses to replace a file that still has open handles, so
        // the lock goes first there and a writer may slip in before the
        // rename. Unix keeps it until the new file is in place.
        #[cfg(windows)]
        drop(lock);
        let bytes_after = writer.finalize()?;
        #[cfg(not(windows))]
        drop(lock);

        tracing::info!(
            path = %self.path.display(),
            entries_before,
            entries_after,
            bytes_before,
            bytes_after,
            superseded,
            "Compacted store"
        );

        Ok(CompactionResult {
            entries_before,
            entries_after,
            bytes_before,
            bytes_after,
        })
    }

    /// Reports the size of the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or unreadable.
    pub fn stats(&self) -> StoreResult<StoreStats> {
        self.read(|session| {
            Ok(StoreStats {
                entries: session.replayed_entries(),
                nodes: session.tree().iter().count(),
                file_size: fs::metadata(session.path())?.len(),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CompactionPolicy, CompressionProfile};
    use crate::error::StoreError;
    use tempfile::tempdir;

    fn store(dir: &Path) -> Store {
        let config = StoreConfig {
            compression: CompressionProfile::default(),
            sync_on_write: false,
            compaction: CompactionPolicy::disabled(),
        };
        Store::new(dir.join("db.dpl"), config).unwrap()
    }

    #[test]
    fn test_store_rejects_invalid_config() {
        let mut config = StoreConfig::default();
        config.compression.level = 12;
        let err = Store::new("x.dpl", config).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_read_missing_store_is_not_found() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        assert!(!store.exists());
        let err = store.read(|_| Ok::<_, StoreError>(())).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_compaction_drops_superseded_rows() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let array = NodePath::parse("/comp").unwrap();

        store
            .append(|s| {
                s.create_array(&array, 1, "")?;
                for i in 0..5 {
                    s.append_rows(&array, vec![vec![f64::from(i)]])?;
                }
                let rebuilt = ExtensibleArray::with_rows("", 2, vec![vec![0.0, 1.0]])?;
                s.put_nodes(vec![(array.clone(), Node::Array(rebuilt))])
            })
            .map_err(StoreError::from)
            .unwrap();

        let before = store.stats().unwrap();
        assert_eq!(before.entries, 7);

        let result = store.compact().unwrap();
        assert_eq!(result.entries_before, 7);
        assert_eq!(result.entries_after, 1);
        assert!(result.bytes_after < result.bytes_before);

        let rows = store
            .read(|s| Ok::<_, StorageError>(s.array(&array)?.map(|a| a.rows().to_vec())))
            .unwrap();
        assert_eq!(rows, Some(vec![vec![0.0, 1.0]]));

        // Appending continues after the rewritten log.
        store.append(|s| s.append_rows(&array, vec![vec![2.0, 3.0]])).unwrap();
        assert_eq!(store.stats().unwrap().entries, 2);
    }

    #[test]
    fn test_append_compacts_past_threshold() {
        let dir = tempdir().unwrap();
        let config = StoreConfig {
            sync_on_write: false,
            compaction: CompactionPolicy {
                superseded_percent: 30,
                min_file_bytes: 0,
            },
            ..StoreConfig::default()
        };
        let store = Store::new(dir.path().join("db.dpl"), config).unwrap();
        let array = NodePath::parse("/comp").unwrap();
        store.append(|s| s.create_array(&array, 1, "")).unwrap();

        // Every step widens the array by one column, replacing the old image.
        for width in 2..=40_usize {
            store
                .append(|s| {
                    let rows = vec![vec![1.0; width]; width];
                    let rebuilt = ExtensibleArray::with_rows("", width, rows)?;
                    s.put_nodes(vec![(array.clone(), Node::Array(rebuilt))])
                })
                .unwrap();
            let stats = store.stats().unwrap();
            assert!(stats.entries <= 3, "log kept {} entries at width {width}", stats.entries);
        }

        let rows = store
            .read(|s| Ok::<_, StorageError>(s.array(&array)?.map(|a| a.rows().to_vec())))
            .unwrap()
            .unwrap();
        assert_eq!(rows.len(), 40);
        assert_eq!(rows[39].len(), 40);
    }

    #[test]
    fn test_disabled_policy_never_compacts() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let array = NodePath::parse("/comp").unwrap();
        store.append(|s| s.create_array(&array, 1, "")).unwrap();
        for width in 2..=6_usize {
            store
                .append(|s| {
                    let rebuilt = ExtensibleArray::with_rows("", width, vec![vec![0.0; width]])?;
                    s.put_nodes(vec![(array.clone(), Node::Array(rebuilt))])
                })
                .unwrap();
        }
        assert_eq!(store.stats().unwrap().entries, 6);
    }
}
