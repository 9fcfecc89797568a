//! Scoped access to a store file.
//!
//! A [`Session`] is one open → mutate → flush → close cycle. Opening locks
//! the file and replays its log into a [`NodeTree`]; every mutation is
//! validated against that tree, framed onto the log, then applied. Nothing
//! outlives the session: the tree, the handle and the lock are all dropped
//! with it.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::StoreConfig;
use crate::error::StorageError;

use super::codec;
use super::file_lock::{FileLock, LockMode};
use super::log::{self, LogEntryKind, LogFootprint, LogWriter};
use super::node::{ExtensibleArray, Node, NodePath, NodeTree, Table, TableSchema};

/// What a session is allowed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Shared lock, no mutations, the file must exist.
    Read,
    /// Exclusive lock, the file is created if missing.
    Append,
}

/// An open, locked store file.
pub struct Session {
    path: PathBuf,
    tree: NodeTree,
    writer: Option<LogWriter>,
    sync_on_write: bool,
    replayed: u64,
    footprint: LogFootprint,
    lock: FileLock,
}

impl Session {
    /// Opens the store file at `path`.
    ///
    /// In append mode a frame cut short by an interrupted write is truncated
    /// away, restoring the state of the last completed session.
    ///
    /// # Errors
    /// - `StorageError::Io` (`NotFound`) when reading a missing file
    /// - `StorageError::Locked` if another session holds a conflicting lock
    /// - `StorageError::Corrupted` on a bad header, failed checksum or a log
    ///   entry that does not apply
    pub fn open(path: &Path, config: &StoreConfig, mode: AccessMode) -> Result<Self, StorageError> {
        let mut file = match mode {
            AccessMode::Read => File::open(path)?,
            AccessMode::Append => OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(path)?,
        };

        let lock_mode = match mode {
            AccessMode::Read => LockMode::Shared,
            AccessMode::Append => LockMode::Exclusive,
        };
        let lock = FileLock::acquire(&file, lock_mode).map_err(|e| {
            if e.kind() == ErrorKind::WouldBlock {
                StorageError::Locked { path: path.to_path_buf() }
            } else {
                StorageError::Io(e)
            }
        })?;

        let fresh = file.metadata()?.len() == 0;
        if fresh && mode == AccessMode::Append {
            codec::write_header(&mut file)?;
            if config.sync_on_write {
                file.sync_all()?;
            }
        }

        let replay = if fresh && mode == AccessMode::Read {
            None
        } else {
            Some(log::replay(&file).map_err(|e| corrupted(path, e))?)
        };

        let (tree, last_sequence, replayed, footprint) = match replay {
            None => (NodeTree::new(), 0, 0, LogFootprint::default()),
            Some(r) => {
                if r.torn_tail {
                    tracing::warn!(
                        path = %path.display(),
                        valid_end = r.valid_end,
                        "Store ends in an incomplete frame; ignoring the partial write"
                    );
                    if mode == AccessMode::Append {
                        file.set_len(r.valid_end)?;
                    }
                }
                (r.tree, r.last_sequence, r.entries, r.footprint)
            }
        };

        let writer = match mode {
            AccessMode::Read => None,
            AccessMode::Append => {
                file.seek(SeekFrom::End(0))?;
                Some(LogWriter::new(file, last_sequence, config.compression))
            }
        };

        tracing::debug!(
            path = %path.display(),
            ?mode,
            entries = replayed,
            nodes = tree.len(),
            "Opened store session"
        );

        Ok(Self {
            path: path.to_path_buf(),
            tree,
            writer,
            sync_on_write: config.sync_on_write,
            replayed,
            footprint,
            lock,
        })
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of log entries replayed when the session opened.
    #[must_use]
    pub fn replayed_entries(&self) -> u64 {
        self.replayed
    }

    /// Number of log entries this session has written.
    #[must_use]
    pub fn appended_entries(&self) -> u64 {
        self.writer.as_ref().map_or(0, LogWriter::appended)
    }

    /// Bytes of the log, this session's appends included, that only hold
    /// data replaced by later entries.
    #[must_use]
    pub fn superseded_bytes(&self) -> u64 {
        self.footprint.superseded_bytes()
    }

    /// The replayed node tree.
    #[must_use]
    pub fn tree(&self) -> &NodeTree {
        &self.tree
    }

    /// Returns true if a node exists at `path`.
    #[must_use]
    pub fn exists(&self, path: &NodePath) -> bool {
        self.tree.exists(path)
    }

    /// Returns the node at `path`, if any.
    #[must_use]
    pub fn lookup(&self, path: &NodePath) -> Option<&Node> {
        self.tree.lookup(path)
    }

    /// Returns the array at `path`, if any.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NodeKindMismatch` if a non-array lives there.
    pub fn array(&self, path: &NodePath) -> Result<Option<&ExtensibleArray>, StorageError> {
        match self.tree.lookup(path) {
            None => Ok(None),
            Some(Node::Array(a)) => Ok(Some(a)),
            Some(other) => Err(mismatch(path, "array", other)),
        }
    }

    /// Returns the table at `path`, if any.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NodeKindMismatch` if a non-table lives there.
    pub fn table(&self, path: &NodePath) -> Result<Option<&Table>, StorageError> {
        match self.tree.lookup(path) {
            None => Ok(None),
            Some(Node::Table(t)) => Ok(Some(t)),
            Some(other) => Err(mismatch(path, "table", other)),
        }
    }

    /// Decodes every row of the table at `path`; empty if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the node is not a table or rows do not decode.
    pub fn read_records<R: DeserializeOwned>(&self, path: &NodePath) -> Result<Vec<R>, StorageError> {
        match self.table(path)? {
            Some(table) => table.decode(),
            None => Ok(Vec::new()),
        }
    }

    /// Creates a group. Fails if the node exists.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NodeExists`, `NodeNotFound` (missing parent) or
    /// an I/O error.
    pub fn create_group(&mut self, path: &NodePath, title: &str) -> Result<(), StorageError> {
        self.commit(LogEntryKind::CreateGroup {
            path: path.clone(),
            title: title.to_string(),
        })
    }

    /// Creates a group unless one already exists. Returns true if created.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NodeKindMismatch` if a non-group occupies the path.
    pub fn ensure_group(&mut self, path: &NodePath, title: &str) -> Result<bool, StorageError> {
        match self.tree.lookup(path) {
            Some(Node::Group(_)) => Ok(false),
            Some(other) => Err(mismatch(path, "group", other)),
            None => {
                self.create_group(path, title)?;
                Ok(true)
            }
        }
    }

    /// Creates an empty array of fixed width.
    ///
    /// # Errors
    ///
    /// Same as [`Session::create_group`].
    pub fn create_array(&mut self, path: &NodePath, width: usize, title: &str) -> Result<(), StorageError> {
        self.commit(LogEntryKind::CreateArray {
            path: path.clone(),
            width,
            title: title.to_string(),
        })
    }

    /// Appends rows along the time axis.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::RowWidthMismatch` if a row has the wrong width.
    pub fn append_rows(&mut self, path: &NodePath, rows: Vec<Vec<f64>>) -> Result<(), StorageError> {
        self.commit(LogEntryKind::AppendRows { path: path.clone(), rows })
    }

    /// Creates an empty table.
    ///
    /// # Errors
    ///
    /// Same as [`Session::create_group`].
    pub fn create_table(&mut self, path: &NodePath, schema: TableSchema, title: &str) -> Result<(), StorageError> {
        self.commit(LogEntryKind::CreateTable {
            path: path.clone(),
            schema,
            title: title.to_string(),
        })
    }

    /// Appends records to a table.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::SchemaMismatch` if a record does not fit.
    pub fn append_records<R: Serialize>(&mut self, path: &NodePath, records: &[R]) -> Result<(), StorageError> {
        let values = match self.table(path)? {
            Some(table) => table.encode_records(path.as_str(), records)?,
            None => return Err(StorageError::NodeNotFound { path: path.to_string() }),
        };
        self.commit(LogEntryKind::AppendRecords { path: path.clone(), records: values })
    }

    /// Creates the table from the first record's shape if needed, then
    /// appends. Returns true if the table was created.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::SchemaMismatch` if the table exists with a
    /// different shape.
    pub fn append_record_creating<R: Serialize>(
        &mut self,
        path: &NodePath,
        record: &R,
        title: &str,
    ) -> Result<bool, StorageError> {
        let created = if self.table(path)?.is_none() {
            self.create_table(path, TableSchema::of_record(record)?, title)?;
            true
        } else {
            false
        };
        self.append_records(path, std::slice::from_ref(record))?;
        Ok(created)
    }

    /// Installs complete node images in one log entry.
    ///
    /// Either every node is replaced or, if the write is interrupted, none
    /// of them is.
    ///
    /// # Errors
    ///
    /// Returns an error if a parent is missing or an image is malformed.
    pub fn put_nodes(&mut self, nodes: Vec<(NodePath, Node)>) -> Result<(), StorageError> {
        self.commit(LogEntryKind::PutNodes { nodes })
    }

    /// Makes every mutation so far durable.
    ///
    /// # Errors
    ///
    /// Propagates I/O failures.
    pub fn flush(&mut self) -> Result<(), StorageError> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush(self.sync_on_write)?;
        }
        Ok(())
    }

    /// Flushes and releases the file.
    ///
    /// # Errors
    ///
    /// Propagates I/O failures from the final flush.
    pub fn close(mut self) -> Result<(), StorageError> {
        self.flush()?;
        if let Some(writer) = self.writer.as_ref() {
            tracing::debug!(
                path = %self.path.display(),
                appended = writer.appended(),
                sequence = writer.current_sequence(),
                "Closed store session"
            );
        }
        Ok(())
    }

    /// Flushes, closes the file handle and hands back only the lock.
    pub(crate) fn into_lock(mut self) -> Result<FileLock, StorageError> {
        self.flush()?;
        Ok(self.lock)
    }

    fn commit(&mut self, kind: LogEntryKind) -> Result<(), StorageError> {
        let writer = self.writer.as_mut().ok_or(StorageError::ReadOnly)?;
        kind.validate(&self.tree)?;
        let frame_len = writer.append(&kind)?;
        self.footprint.record(&kind, frame_len);
        kind.apply_validated(&mut self.tree);
        Ok(())
    }
}

fn mismatch(path: &NodePath, expected: &'static str, actual: &Node) -> StorageError {
    StorageError::NodeKindMismatch {
        path: path.to_string(),
        expected,
        actual: actual.kind_name(),
    }
}

fn corrupted(path: &Path, err: StorageError) -> StorageError {
    match err {
        StorageError::Io(e) if e.kind() == ErrorKind::InvalidData || e.kind() == ErrorKind::UnexpectedEof => {
            StorageError::Corrupted {
                path: path.to_path_buf(),
                message: e.to_string(),
            }
        }
        StorageError::Io(e) => StorageError::Io(e),
        other => StorageError::Corrupted {
            path: path.to_path_buf(),
            message: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        step: u64,
        value: f64,
    }

    fn config() -> StoreConfig {
        StoreConfig {
            sync_on_write: false,
            ..StoreConfig::default()
        }
    }

    #[test]
    fn test_append_session_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.dpl");
        let group = NodePath::parse("/g").unwrap();
        let array = group.join("comp").unwrap();
        let table = group.join("params").unwrap();

        {
            let mut s = Session::open(&path, &config(), AccessMode::Append).unwrap();
            s.create_group(&group, "group").unwrap();
            s.create_array(&array, 2, "comp").unwrap();
            s.append_rows(&array, vec![vec![1.0, 2.0]]).unwrap();
            assert!(s.append_record_creating(&table, &Sample { step: 0, value: 1.5 }, "p").unwrap());
            assert!(!s.append_record_creating(&table, &Sample { step: 1, value: 2.5 }, "p").unwrap());
            s.close().unwrap();
        }

        let s = Session::open(&path, &config(), AccessMode::Read).unwrap();
        assert_eq!(s.replayed_entries(), 6);
        assert_eq!(s.array(&array).unwrap().unwrap().len(), 1);
        let rows: Vec<Sample> = s.read_records(&table).unwrap();
        assert_eq!(rows[1], Sample { step: 1, value: 2.5 });
    }

    #[test]
    fn test_read_session_rejects_mutation() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.dpl");
        Session::open(&path, &config(), AccessMode::Append).unwrap().close().unwrap();

        let mut s = Session::open(&path, &config(), AccessMode::Read).unwrap();
        let err = s.create_group(&NodePath::parse("/x").unwrap(), "").unwrap_err();
        assert!(matches!(err, StorageError::ReadOnly));
    }

    #[test]
    fn test_read_missing_file_is_not_found() {
        let dir = tempdir().unwrap();
        let err = Session::open(&dir.path().join("absent.dpl"), &config(), AccessMode::Read)
            .err()
            .unwrap();
        assert!(matches!(err, StorageError::Io(ref e) if e.kind() == ErrorKind::NotFound));
    }

    #[test]
    fn test_second_writer_is_locked_out() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.dpl");
        let _first = Session::open(&path, &config(), AccessMode::Append).unwrap();
        let err = Session::open(&path, &config(), AccessMode::Append).err().unwrap();
        assert!(matches!(err, StorageError::Locked { .. }));
    }

    #[test]
    fn test_failed_validation_writes_nothing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.dpl");
        {
            let mut s = Session::open(&path, &config(), AccessMode::Append).unwrap();
            let array = NodePath::parse("/comp").unwrap();
            s.create_array(&array, 2, "").unwrap();
            assert!(s.append_rows(&array, vec![vec![1.0]]).is_err());
            s.close().unwrap();
        }
        let s = Session::open(&path, &config(), AccessMode::Read).unwrap();
        assert_eq!(s.replayed_entries(), 1);
    }

    #[test]
    fn test_replaced_images_count_as_superseded() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.dpl");
        let array = NodePath::parse("/comp").unwrap();
        {
            let mut s = Session::open(&path, &config(), AccessMode::Append).unwrap();
            s.create_array(&array, 1, "").unwrap();
            s.append_rows(&array, vec![vec![1.0]]).unwrap();
            assert_eq!(s.superseded_bytes(), 0);
            assert_eq!(s.appended_entries(), 2);

            let rebuilt = ExtensibleArray::with_rows("", 2, vec![vec![1.0, 0.0]]).unwrap();
            s.put_nodes(vec![(array.clone(), Node::Array(rebuilt))]).unwrap();
            assert!(s.superseded_bytes() > 0);
            s.close().unwrap();
        }

        // Replay charges the same bytes as the session that wrote them.
        let s = Session::open(&path, &config(), AccessMode::Read).unwrap();
        assert!(s.superseded_bytes() > 0);
        assert_eq!(s.appended_entries(), 0);
    }

    #[test]
    fn test_ensure_group_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.dpl");
        let mut s = Session::open(&path, &config(), AccessMode::Append).unwrap();
        let g = NodePath::parse("/materials").unwrap();
        assert!(s.ensure_group(&g, "Material data").unwrap());
        assert!(!s.ensure_group(&g, "Material data").unwrap());
        assert_eq!(s.tree().len(), 2);
    }
}
