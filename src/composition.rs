//! Composition array + nuclide map pairs.
//!
//! Material phases and waste streams store compositions the same way: a
//! `comp` array with one row per step and a sibling `nuclide_map` table
//! naming its columns. This module appends a step to such a pair,
//! reconciling the step's nuclides against the stored map first.

use std::collections::BTreeMap;

use crate::error::StorageError;
use crate::nuclide::{NuclideIndexMap, NuclideIndexRecord, NuclideOrdering};
use crate::reconcile::{reconcile, Reconciliation, StepValues};
use crate::storage::{ExtensibleArray, Node, NodePath, Session, Table};

/// Name of the composition array inside its group.
pub const COMP_NODE: &str = "comp";

/// Name of the nuclide index table inside its group.
pub const NUCLIDE_MAP_NODE: &str = "nuclide_map";

const NUCLIDE_MAP_TITLE: &str = "Nuclide index map";

/// Paths of one composition pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositionNodes {
    pub comp: NodePath,
    pub nuclide_map: NodePath,
}

impl CompositionNodes {
    /// The pair stored under `group`.
    ///
    /// # Errors
    ///
    /// Never fails for a valid group path; node names are constants.
    pub fn under(group: &NodePath) -> Result<Self, StorageError> {
        Ok(Self {
            comp: group.join(COMP_NODE)?,
            nuclide_map: group.join(NUCLIDE_MAP_NODE)?,
        })
    }
}

/// A composition history read back from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositionView {
    /// Column layout.
    pub map: NuclideIndexMap,
    /// One row per stored step, `map.len()` values each.
    pub matrix: Vec<Vec<f64>>,
}

impl CompositionView {
    /// Number of stored steps.
    #[must_use]
    pub fn steps(&self) -> usize {
        self.matrix.len()
    }

    /// Values of one nuclide over every step.
    #[must_use]
    pub fn column(&self, nuclide: &str) -> Option<Vec<f64>> {
        let c = self.map.index_of(nuclide)?;
        Some(self.matrix.iter().map(|row| row[c]).collect())
    }

    /// One step as nuclide → value.
    #[must_use]
    pub fn step(&self, index: usize) -> Option<BTreeMap<String, f64>> {
        let row = self.matrix.get(index)?;
        Some(
            self.map
                .nuclides()
                .iter()
                .cloned()
                .zip(row.iter().copied())
                .collect(),
        )
    }
}

/// Appends one step to the pair under `group`, creating it on first use.
///
/// `group` must already exist. When the step introduces nuclides the pair
/// is rebuilt at the wider schema and installed together with the new row
/// in a single log entry, so an interrupted write leaves the previous pair
/// intact.
///
/// # Errors
///
/// - `StorageError::InconsistentComposition` if only one node of the pair
///   exists or their widths disagree
/// - `StorageError::DuplicateNuclideCode` if the ordering cannot rank the
///   union
pub fn append_step(
    session: &mut Session,
    group: &NodePath,
    step: &StepValues,
    ordering: &dyn NuclideOrdering,
    title: &str,
) -> Result<Reconciliation, StorageError> {
    let nodes = CompositionNodes::under(group)?;
    let stored = read_pair(session, group, &nodes)?;
    let bootstrap = stored.is_none();
    let (base, history, comp_title) = match stored {
        Some((view, comp_title)) => (view.map, view.matrix, comp_title),
        None => (NuclideIndexMap::new(), Vec::new(), title.to_string()),
    };

    let outcome = reconcile(&base, &history, step, ordering).map_err(|e| match e {
        StorageError::InconsistentComposition { reason, .. } => StorageError::InconsistentComposition {
            path: group.to_string(),
            reason,
        },
        other => other,
    })?;

    match &outcome {
        Reconciliation::InPlace { row, absent } => {
            tracing::debug!(
                group = %group,
                columns = row.len(),
                absent = absent.len(),
                "Composition fits stored nuclide map"
            );
            session.append_rows(&nodes.comp, vec![row.clone()])?;
        }
        Reconciliation::Migrated { map, history, row, drift } => {
            if bootstrap {
                tracing::info!(group = %group, nuclides = map.len(), "Creating composition array");
            } else {
                tracing::warn!(
                    group = %group,
                    added = drift.backward.len(),
                    absent = drift.forward.len(),
                    rows = history.len(),
                    width = map.len(),
                    "Nuclide set grew; rebuilding composition history"
                );
            }
            let mut rows = history.clone();
            rows.push(row.clone());
            let array = ExtensibleArray::with_rows(comp_title, map.len(), rows)?;
            let table = Table::with_records(
                NUCLIDE_MAP_TITLE,
                NuclideIndexMap::table_schema(),
                &map.to_records(),
            )?;
            session.put_nodes(vec![
                (nodes.comp.clone(), Node::Array(array)),
                (nodes.nuclide_map.clone(), Node::Table(table)),
            ])?;
        }
    }

    Ok(outcome)
}

/// Reads the pair under `group`, `None` if it was never written.
///
/// # Errors
///
/// Returns `StorageError::InconsistentComposition` if the pair is half
/// present or its widths disagree.
pub fn read(session: &Session, group: &NodePath) -> Result<Option<CompositionView>, StorageError> {
    let nodes = CompositionNodes::under(group)?;
    Ok(read_pair(session, group, &nodes)?.map(|(view, _)| view))
}

fn read_pair(
    session: &Session,
    group: &NodePath,
    nodes: &CompositionNodes,
) -> Result<Option<(CompositionView, String)>, StorageError> {
    let comp = session.array(&nodes.comp)?;
    let table = session.table(&nodes.nuclide_map)?;
    let (comp, table) = match (comp, table) {
        (None, None) => return Ok(None),
        (Some(comp), Some(table)) => (comp, table),
        (Some(_), None) | (None, Some(_)) => {
            return Err(StorageError::InconsistentComposition {
                path: group.to_string(),
                reason: "composition array and nuclide map must exist together".to_string(),
            })
        }
    };

    let records: Vec<NuclideIndexRecord> = table.decode()?;
    let map = NuclideIndexMap::from_records(nodes.nuclide_map.as_str(), records)?;
    if comp.width() != map.len() {
        return Err(StorageError::InconsistentComposition {
            path: group.to_string(),
            reason: format!(
                "composition array has {} columns but the nuclide map has {}",
                comp.width(),
                map.len()
            ),
        });
    }

    let view = CompositionView {
        map,
        matrix: comp.rows().to_vec(),
    };
    Ok(Some((view, comp.title.clone())))
}
