//! The append-only mutation log that makes up a store file.
//!
//! The store file is nothing but a header followed by framed log entries.
//! Opening a store replays the log into a [`NodeTree`]; mutating it appends
//! new entries.
//!
//! # File Format
//! ```text
//! [MAGIC: 4 bytes][VERSION: 1 byte]
//! [ENTRY 1: codec-encoded LogEntry]
//! [ENTRY 2: codec-encoded LogEntry]
//! ...
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Result as IoResult, Seek, Write};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::CompressionProfile;
use crate::error::StorageError;

use super::codec;
use super::node::{ExtensibleArray, Group, Node, NodePath, NodeTree, Table, TableSchema};

/// A single entry in the log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// Monotonically increasing sequence number.
    pub sequence: u64,
    /// When this entry was written.
    pub timestamp: DateTime<Utc>,
    /// The mutation being logged.
    pub kind: LogEntryKind,
}

/// The type of log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LogEntryKind {
    CreateGroup { path: NodePath, title: String },
    CreateArray { path: NodePath, width: usize, title: String },
    AppendRows { path: NodePath, rows: Vec<Vec<f64>> },
    CreateTable { path: NodePath, schema: TableSchema, title: String },
    AppendRecords { path: NodePath, records: Vec<Value> },

    /// Installs complete node images, creating or replacing each one.
    ///
    /// All nodes of one entry land together or not at all, which is what
    /// keeps a rebuilt composition array and its nuclide map consistent.
    PutNodes { nodes: Vec<(NodePath, Node)> },
}

impl LogEntryKind {
    /// Checks the entry against the tree without changing it.
    pub(crate) fn validate(&self, tree: &NodeTree) -> Result<(), StorageError> {
        match self {
            Self::CreateGroup { path, .. } => tree.check_slot(path, false, &Node::Group(Group::default())),
            Self::CreateArray { path, width, .. } => {
                tree.check_slot(path, false, &Node::Array(ExtensibleArray::new("", *width)))
            }
            Self::CreateTable { path, schema, .. } => {
                tree.check_slot(path, false, &Node::Table(Table::new("", schema.clone())))
            }
            Self::AppendRows { path, rows } => match tree.lookup(path) {
                Some(Node::Array(array)) => array.check_rows(path.as_str(), rows),
                Some(other) => Err(kind_mismatch(path, "array", other)),
                None => Err(StorageError::NodeNotFound { path: path.to_string() }),
            },
            Self::AppendRecords { path, records } => match tree.lookup(path) {
                Some(Node::Table(table)) => records
                    .iter()
                    .try_for_each(|r| table.check_value(path.as_str(), r)),
                Some(other) => Err(kind_mismatch(path, "table", other)),
                None => Err(StorageError::NodeNotFound { path: path.to_string() }),
            },
            Self::PutNodes { nodes } => {
                // Later nodes in the same entry may hang off earlier ones.
                let mut pending: BTreeMap<&NodePath, &Node> = BTreeMap::new();
                for (path, node) in nodes {
                    tree.check_slot_over(&pending, path, true, node)?;
                    if let Node::Array(array) = node {
                        array.check_rows(path.as_str(), array.rows())?;
                    }
                    pending.insert(path, node);
                }
                Ok(())
            }
        }
    }

    /// Validates and applies the entry.
    pub(crate) fn apply(self, tree: &mut NodeTree) -> Result<(), StorageError> {
        self.validate(tree)?;
        self.apply_validated(tree);
        Ok(())
    }

    /// Applies an entry that already passed [`LogEntryKind::validate`]
    /// against this tree.
    pub(crate) fn apply_validated(self, tree: &mut NodeTree) {
        match self {
            Self::CreateGroup { path, title } => tree.insert(path, Node::Group(Group { title })),
            Self::CreateArray { path, width, title } => {
                tree.insert(path, Node::Array(ExtensibleArray::new(title, width)));
            }
            Self::CreateTable { path, schema, title } => tree.insert(path, Node::Table(Table::new(title, schema))),
            Self::AppendRows { path, rows } => {
                if let Some(Node::Array(array)) = tree.lookup_mut(&path) {
                    array.extend(rows);
                }
            }
            Self::AppendRecords { path, records } => {
                if let Some(Node::Table(table)) = tree.lookup_mut(&path) {
                    table.extend(records);
                }
            }
            Self::PutNodes { nodes } => {
                for (path, node) in nodes {
                    tree.insert(path, node);
                }
            }
        }
    }
}

/// How many bytes of the log describe data that later entries replaced.
///
/// Every frame is charged to the node it mutates. A `PutNodes` image
/// supersedes everything charged to the nodes it replaces and splits its own
/// size across them.
#[derive(Debug, Clone, Default)]
pub struct LogFootprint {
    live: HashMap<NodePath, u64>,
    superseded: u64,
}

impl LogFootprint {
    /// Charges one frame of `frame_len` bytes.
    pub fn record(&mut self, kind: &LogEntryKind, frame_len: u64) {
        match kind {
            LogEntryKind::CreateGroup { path, .. }
            | LogEntryKind::CreateArray { path, .. }
            | LogEntryKind::AppendRows { path, .. }
            | LogEntryKind::CreateTable { path, .. }
            | LogEntryKind::AppendRecords { path, .. } => {
                *self.live.entry(path.clone()).or_default() += frame_len;
            }
            LogEntryKind::PutNodes { nodes } => {
                let share = frame_len / u64::try_from(nodes.len().max(1)).unwrap_or(1);
                for (path, _) in nodes {
                    self.superseded += self.live.insert(path.clone(), share).unwrap_or(0);
                }
            }
        }
    }

    /// Bytes a compaction would drop.
    pub fn superseded_bytes(&self) -> u64 {
        self.superseded
    }
}

fn kind_mismatch(path: &NodePath, expected: &'static str, actual: &Node) -> StorageError {
    StorageError::NodeKindMismatch {
        path: path.to_string(),
        expected,
        actual: actual.kind_name(),
    }
}

/// Appends framed entries to an open store file.
pub struct LogWriter {
    writer: BufWriter<File>,
    current_sequence: u64,
    profile: CompressionProfile,
    appended: u64,
}

impl LogWriter {
    /// Wraps a file positioned at its end.
    pub fn new(file: File, current_sequence: u64, profile: CompressionProfile) -> Self {
        Self {
            writer: BufWriter::new(file),
            current_sequence,
            profile,
            appended: 0,
        }
    }

    /// Append an entry to the log.
    ///
    /// Returns the length of the frame written.
    pub fn append(&mut self, kind: &LogEntryKind) -> IoResult<u64> {
        #[derive(Serialize)]
        struct Borrowed<'a> {
            sequence: u64,
            timestamp: DateTime<Utc>,
            kind: &'a LogEntryKind,
        }

        let candidate = self.current_sequence + 1;
        let encoded = codec::encode(
            &Borrowed {
                sequence: candidate,
                timestamp: Utc::now(),
                kind,
            },
            &self.profile,
        )?;
        self.writer.write_all(&encoded)?;

        self.current_sequence = candidate;
        self.appended += 1;
        Ok(encoded.len() as u64)
    }

    /// Get the current sequence number.
    pub fn current_sequence(&self) -> u64 {
        self.current_sequence
    }

    /// Number of entries appended through this writer.
    pub fn appended(&self) -> u64 {
        self.appended
    }

    /// Flush buffered frames, optionally fsyncing the file.
    pub fn flush(&mut self, sync: bool) -> IoResult<()> {
        self.writer.flush()?;
        if sync {
            self.writer.get_ref().sync_all()?;
        }
        Ok(())
    }
}

/// Iterator over the entries of a store file.
///
/// Tracks the offset just past the last entry that decoded cleanly, so a
/// torn tail can be cut off.
pub struct LogReader<'f> {
    reader: BufReader<&'f File>,
    file_size: u64,
    valid_end: u64,
}

impl<'f> LogReader<'f> {
    /// Starts reading after the header.
    pub fn new(file: &'f File) -> IoResult<Self> {
        let file_size = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        reader.rewind()?;

        codec::read_header(&mut reader)?;
        let valid_end = reader.stream_position()?;

        Ok(Self { reader, file_size, valid_end })
    }

    /// Offset just past the last fully decoded entry.
    pub fn valid_end(&self) -> u64 {
        self.valid_end
    }

    fn at_eof(&mut self) -> IoResult<bool> {
        let pos = self.reader.stream_position()?;
        Ok(pos >= self.file_size)
    }
}

/// Outcome of decoding one frame.
pub enum ReadOutcome {
    /// A decoded entry and the length of its frame.
    Entry(LogEntry, u64),
    /// The file ends in the middle of a frame.
    TornTail,
}

impl Iterator for LogReader<'_> {
    type Item = IoResult<ReadOutcome>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.at_eof() {
            Ok(true) => return None,
            Ok(false) => {}
            Err(e) => return Some(Err(e)),
        }

        match codec::decode::<LogEntry>(&mut self.reader) {
            Ok(entry) => match self.reader.stream_position() {
                Ok(pos) => {
                    let frame_len = pos - self.valid_end;
                    self.valid_end = pos;
                    Some(Ok(ReadOutcome::Entry(entry, frame_len)))
                }
                Err(e) => Some(Err(e)),
            },
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Some(Ok(ReadOutcome::TornTail)),
            Err(e) => Some(Err(e)),
        }
    }
}

/// Result of replaying a store file.
pub struct Replay {
    pub tree: NodeTree,
    pub last_sequence: u64,
    pub entries: u64,
    /// Offset past the last good entry.
    pub valid_end: u64,
    /// Whether bytes after `valid_end` belong to an incomplete frame.
    pub torn_tail: bool,
    pub footprint: LogFootprint,
}

/// Replays every entry of a store file into a fresh tree.
///
/// A frame cut short at the end of the file is reported through
/// `torn_tail`; any other decoding or validation failure is an error.
pub fn replay(file: &File) -> Result<Replay, StorageError> {
    let mut reader = LogReader::new(file)?;
    let mut tree = NodeTree::new();
    let mut last_sequence = 0;
    let mut entries = 0;
    let mut torn_tail = false;
    let mut footprint = LogFootprint::default();

    for outcome in reader.by_ref() {
        match outcome? {
            ReadOutcome::Entry(entry, frame_len) => {
                if entry.sequence <= last_sequence {
                    return Err(StorageError::Serialization(format!(
                        "log sequence went backwards: {} after {last_sequence}",
                        entry.sequence
                    )));
                }
                last_sequence = entry.sequence;
                footprint.record(&entry.kind, frame_len);
                entry.kind.apply(&mut tree)?;
                entries += 1;
            }
            ReadOutcome::TornTail => {
                torn_tail = true;
                break;
            }
        }
    }

    Ok(Replay {
        tree,
        last_sequence,
        entries,
        valid_end: reader.valid_end(),
        torn_tail,
        footprint,
    })
}
