//! Nuclide identifiers and the column index map.
//!
//! Nuclides are identified by their canonical name (`"U235"`, `"Xe135"`,
//! `"Am242_m1"`, ...). Their ordering is not owned here: the depletion-code
//! collaborator supplies a [`NuclideOrdering`] whose codes increase with
//! atomic number, mass number and metastable state.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::storage::{Column, TableSchema};

/// Integer sort key for a nuclide (ZAM-style).
pub type NuclideCode = i64;

/// Supplies the canonical nuclide ordering.
pub trait NuclideOrdering {
    /// Returns the sort code for a nuclide name.
    fn nuclide_code(&self, nuclide: &str) -> NuclideCode;
}

impl<F> NuclideOrdering for F
where
    F: Fn(&str) -> NuclideCode,
{
    fn nuclide_code(&self, nuclide: &str) -> NuclideCode {
        self(nuclide)
    }
}

/// One row of a persisted `nuclide_map` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NuclideIndexRecord {
    /// Nuclide name.
    pub nuclide: String,
    /// Column of this nuclide in the sibling composition array.
    pub index: u64,
}

/// Bijection from nuclide to a 0-based contiguous column index.
///
/// Columns are always sorted by nuclide code.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NuclideIndexMap {
    nuclides: Vec<String>,
    index: HashMap<String, usize>,
}

impl NuclideIndexMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a map from an unordered set of nuclides.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::DuplicateNuclideCode` if two distinct nuclides
    /// share a code, since their relative column order would be undefined.
    pub fn from_unordered<I>(nuclides: I, ordering: &dyn NuclideOrdering) -> Result<Self, StorageError>
    where
        I: IntoIterator<Item = String>,
    {
        let mut keyed: Vec<(NuclideCode, String)> = nuclides
            .into_iter()
            .map(|n| (ordering.nuclide_code(&n), n))
            .collect();
        keyed.sort();
        keyed.dedup_by(|a, b| a.1 == b.1);

        for pair in keyed.windows(2) {
            if pair[0].0 == pair[1].0 {
                return Err(StorageError::DuplicateNuclideCode {
                    first: pair[0].1.clone(),
                    second: pair[1].1.clone(),
                    code: pair[0].0,
                });
            }
        }

        Ok(Self::from_sorted(keyed.into_iter().map(|(_, n)| n).collect()))
    }

    fn from_sorted(nuclides: Vec<String>) -> Self {
        let index = nuclides
            .iter()
            .enumerate()
            .map(|(i, n)| (n.clone(), i))
            .collect();
        Self { nuclides, index }
    }

    /// Rebuilds a map from persisted table rows.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::InconsistentComposition` unless the indices form
    /// exactly `0..len` with no repeated nuclide.
    pub fn from_records(path: &str, mut records: Vec<NuclideIndexRecord>) -> Result<Self, StorageError> {
        records.sort_by_key(|r| r.index);
        let mut nuclides = Vec::with_capacity(records.len());
        for (expected, record) in records.into_iter().enumerate() {
            if record.index != expected as u64 {
                return Err(StorageError::InconsistentComposition {
                    path: path.to_string(),
                    reason: format!(
                        "nuclide map index {} for '{}' breaks contiguity at {expected}",
                        record.index, record.nuclide
                    ),
                });
            }
            nuclides.push(record.nuclide);
        }

        let map = Self::from_sorted(nuclides);
        if map.index.len() != map.nuclides.len() {
            return Err(StorageError::InconsistentComposition {
                path: path.to_string(),
                reason: "nuclide map lists a nuclide more than once".to_string(),
            });
        }
        Ok(map)
    }

    /// Rows to persist for this map.
    #[must_use]
    pub fn to_records(&self) -> Vec<NuclideIndexRecord> {
        self.nuclides
            .iter()
            .enumerate()
            .map(|(i, n)| NuclideIndexRecord {
                nuclide: n.clone(),
                index: i as u64,
            })
            .collect()
    }

    /// Schema of the persisted `nuclide_map` table.
    #[must_use]
    pub fn table_schema() -> TableSchema {
        TableSchema::new(vec![Column::text("nuclide"), Column::int("index")])
    }

    /// Number of columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nuclides.len()
    }

    /// Returns true if the map has no nuclides.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nuclides.is_empty()
    }

    /// Column index of a nuclide.
    #[must_use]
    pub fn index_of(&self, nuclide: &str) -> Option<usize> {
        self.index.get(nuclide).copied()
    }

    /// Returns true if the nuclide has a column.
    #[must_use]
    pub fn contains(&self, nuclide: &str) -> bool {
        self.index.contains_key(nuclide)
    }

    /// Nuclides in column order.
    #[must_use]
    pub fn nuclides(&self) -> &[String] {
        &self.nuclides
    }
}
