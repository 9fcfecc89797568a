//! Rewriting a store as a minimal log.
//!
//! Migrations leave superseded composition images behind in the log. A
//! snapshot replays the live tree into a fresh file holding one entry per
//! node and swaps it in place of the original.

use std::fs::{self, File, OpenOptions};
use std::io::{Error as IoError, Result as IoResult};
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::config::CompressionProfile;

use super::codec;
use super::log::{LogEntryKind, LogWriter};
use super::node::NodeTree;

/// Writes a snapshot next to its target, renaming it over the target on
/// [`SnapshotWriter::finalize`].
///
/// Uses write-to-temp-then-rename so a crash leaves either the old or the
/// new file, never a mix.
pub struct SnapshotWriter {
    temp_path: Option<PathBuf>,
    final_path: PathBuf,
    writer: Option<LogWriter>,
}

impl SnapshotWriter {
    /// Creates the temporary file and writes the header.
    pub fn new(final_path: &Path, profile: CompressionProfile) -> IoResult<Self> {
        let mut temp_name = final_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        temp_name.push(format!(".tmp.{}", Uuid::new_v4()));
        let temp_path = final_path.with_file_name(temp_name);

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)?;
        codec::write_header(&mut file)?;

        Ok(Self {
            temp_path: Some(temp_path),
            final_path: final_path.to_path_buf(),
            writer: Some(LogWriter::new(file, 0, profile)),
        })
    }

    /// Writes one `PutNodes` entry per node, parents first.
    ///
    /// Returns the number of entries written.
    pub fn write_tree(&mut self, tree: &NodeTree) -> IoResult<u64> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| IoError::other("writer already consumed"))?;
        for (path, node) in tree.iter() {
            writer.append(&LogEntryKind::PutNodes {
                nodes: vec![(path.clone(), node.clone())],
            })?;
        }
        Ok(writer.appended())
    }

    /// Flush, fsync, rename.
    ///
    /// This is the commit point.
    pub fn finalize(mut self) -> IoResult<u64> {
        let mut writer = self
            .writer
            .take()
            .ok_or_else(|| IoError::other("writer already consumed"))?;
        let temp_path = self
            .temp_path
            .take()
            .ok_or_else(|| IoError::other("temp_path already consumed"))?;

        writer.flush(true)?;
        let size = fs::metadata(&temp_path)?.len();
        drop(writer);

        fs::rename(&temp_path, &self.final_path)?;
        sync_parent(&self.final_path);
        Ok(size)
    }
}

impl Drop for SnapshotWriter {
    fn drop(&mut self) {
        // Best-effort cleanup of temp file if not finalized
        self.writer.take();
        if let Some(ref temp_path) = self.temp_path {
            if temp_path.exists() {
                let _ = fs::remove_file(temp_path);
            }
        }
    }
}

#[cfg(unix)]
fn sync_parent(path: &Path) {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        if let Ok(handle) = File::open(dir) {
            let _ = handle.sync_all();
        }
    }
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) {}
