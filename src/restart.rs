//! Picking the step a run starts from.
//!
//! A fresh run clears the store and the depletion code's runtime files
//! left by an earlier run. A restarted run keeps them and resumes after the
//! last step whose results were stored.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::StoreResult;
use crate::metadata;
use crate::storage::Store;

/// Input files the depletion code is run from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeInputFiles {
    /// One input deck.
    Single(PathBuf),
    /// Several named inputs (geometry, settings, materials, ...).
    Named(BTreeMap<String, PathBuf>),
}

impl RuntimeInputFiles {
    /// Every path, in name order for [`RuntimeInputFiles::Named`].
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        let (single, named) = match self {
            Self::Single(path) => (Some(path.as_path()), None),
            Self::Named(map) => (None, Some(map.values().map(PathBuf::as_path))),
        };
        single.into_iter().chain(named.into_iter().flatten())
    }
}

/// Files a depletion code writes while running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeArtifacts {
    pub material_file: PathBuf,
    pub input_files: RuntimeInputFiles,
}

impl RuntimeArtifacts {
    fn paths(&self) -> impl Iterator<Item = &Path> {
        std::iter::once(self.material_file.as_path()).chain(self.input_files.paths())
    }
}

/// Returns the index of the first step to run.
///
/// Not restarting: deletes the store file and every runtime artifact,
/// tolerating files that do not exist, and returns 0. Restarting: returns
/// the number of steps with stored results.
///
/// # Errors
///
/// When restarting, returns an error if the store is missing or unreadable.
/// Deletion failures never fail a fresh run; they are logged.
pub fn determine_resume_step(restarting: bool, store: &Store, artifacts: &RuntimeArtifacts) -> StoreResult<usize> {
    if restarting {
        let completed = store.read(|session| metadata::completed_steps(session))?;
        tracing::info!(path = %store.path().display(), completed, "Resuming from stored results");
        return Ok(completed);
    }

    let mut removed = 0;
    for path in std::iter::once(store.path()).chain(artifacts.paths()) {
        match fs::remove_file(path) {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Could not remove previous run output");
            }
        }
    }
    if removed > 0 {
        tracing::info!(removed, "Previous run output files were deleted");
    }
    Ok(0)
}
