//! Waste and process stream compositions.
//!
//! Streams removed by each reprocessing process are stored per material:
//!
//! ```text
//! /materials/<material>/in_out_streams/<process>/{comp, nuclide_map}
//! ```
//!
//! Nodes appear the first time a (material, process) pair produces waste.
//! A step without waste for a pair writes nothing for it, so row counts of
//! different processes need not agree.

use std::collections::BTreeMap;

use crate::composition::{self, CompositionView};
use crate::error::StorageError;
use crate::material::{ensure_material_group, material_path, MaterialSnapshot};
use crate::nuclide::NuclideOrdering;
use crate::storage::{NodePath, Session};

/// Group holding the streams of one material.
pub const STREAMS_GROUP: &str = "in_out_streams";

/// Waste of one step: material → process → removed stream.
pub type WasteStreams = BTreeMap<String, BTreeMap<String, MaterialSnapshot>>;

/// `/materials/<material>/in_out_streams/<process>`.
///
/// # Errors
///
/// Returns `StorageError::InvalidNodeName` for an invalid material or process name.
pub fn stream_path(material: &str, process: &str) -> Result<NodePath, StorageError> {
    material_path(material)?.join(STREAMS_GROUP)?.join(process)
}

/// Appends one step of waste compositions.
///
/// Streams with an empty composition are skipped. Returns the number of
/// rows appended.
///
/// # Errors
///
/// Returns an error if a stored pair is inconsistent or a write fails.
pub fn store_waste(
    session: &mut Session,
    waste: &WasteStreams,
    ordering: &dyn NuclideOrdering,
) -> Result<usize, StorageError> {
    let mut appended = 0;
    for (material, processes) in waste {
        for (process, stream) in processes {
            if stream.composition.is_empty() {
                tracing::debug!(%material, %process, "No waste composition this step");
                continue;
            }

            ensure_material_group(session, material)?;
            session.ensure_group(
                &material_path(material)?.join(STREAMS_GROUP)?,
                "Waste stream compositions for each process",
            )?;
            let group = stream_path(material, process)?;
            session.ensure_group(&group, "")?;

            composition::append_step(
                session,
                &group,
                &stream.absolute_composition(),
                ordering,
                &format!("Isotopic composition for {process}"),
            )?;
            appended += 1;
        }
    }
    if appended > 0 {
        tracing::info!(streams = appended, "Stored waste stream compositions");
    }
    Ok(appended)
}

/// Composition history of one waste stream, `None` if it never produced waste.
///
/// # Errors
///
/// Returns an error if the stored pair is inconsistent.
pub fn read_waste_composition(
    session: &Session,
    material: &str,
    process: &str,
) -> Result<Option<CompositionView>, StorageError> {
    composition::read(session, &stream_path(material, process)?)
}

/// Processes that have produced waste for `material`.
#[must_use]
pub fn process_names(session: &Session, material: &str) -> Vec<String> {
    let Ok(group) = material_path(material).and_then(|p| p.join(STREAMS_GROUP)) else {
        return Vec::new();
    };
    session
        .tree()
        .children(&group)
        .map(|p| p.name().to_string())
        .collect()
}
