//! Nuclide set reconciliation.
//!
//! Composition arrays can only grow along the step axis. When a step brings
//! nuclides the stored map has never seen, the whole history is rebuilt at
//! the width of the union so the new row fits. Nuclides are never dropped:
//! one that vanishes from a step keeps its column and gets `0.0` in the new
//! row, while its historical values stay where they were.
//!
//! This module is pure. Writing the result back is the caller's job (see
//! [`crate::composition`]).

use std::collections::{BTreeMap, BTreeSet};

use crate::error::StorageError;
use crate::nuclide::{NuclideIndexMap, NuclideOrdering};

/// Absolute composition of one step, nuclide name to value.
pub type StepValues = BTreeMap<String, f64>;

/// Difference between the stored nuclide set and a step's nuclide set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NuclideDrift {
    /// Known historically but absent from this step.
    pub forward: BTreeSet<String>,
    /// New in this step.
    pub backward: BTreeSet<String>,
}

impl NuclideDrift {
    /// Computes the drift between a stored map and a step.
    #[must_use]
    pub fn between(base: &NuclideIndexMap, step: &StepValues) -> Self {
        let forward = base
            .nuclides()
            .iter()
            .filter(|n| !step.contains_key(n.as_str()))
            .cloned()
            .collect();
        let backward = step
            .keys()
            .filter(|n| !base.contains(n))
            .cloned()
            .collect();
        Self { forward, backward }
    }

    /// Returns true if both sets are equal.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.forward.is_empty() && self.backward.is_empty()
    }

    /// Returns true if the step forces the schema to grow.
    #[must_use]
    pub fn requires_migration(&self) -> bool {
        !self.backward.is_empty()
    }
}

/// How a step was fitted onto the stored schema.
#[derive(Debug, Clone, PartialEq)]
pub enum Reconciliation {
    /// The stored map already covers every nuclide of the step.
    ///
    /// `absent` lists stored nuclides missing from the step; their entries
    /// in `row` are `0.0`.
    InPlace {
        row: Vec<f64>,
        absent: BTreeSet<String>,
    },
    /// The schema grew to the sorted union of both sets.
    Migrated {
        map: NuclideIndexMap,
        history: Vec<Vec<f64>>,
        row: Vec<f64>,
        drift: NuclideDrift,
    },
}

impl Reconciliation {
    /// The row to append for the current step.
    #[must_use]
    pub fn row(&self) -> &[f64] {
        match self {
            Self::InPlace { row, .. } | Self::Migrated { row, .. } => row,
        }
    }

    /// Returns true if the history had to be rebuilt.
    #[must_use]
    pub const fn is_migration(&self) -> bool {
        matches!(self, Self::Migrated { .. })
    }
}

/// Fits a step onto a stored map and its history.
///
/// An empty `base` with an empty `history` is the bootstrap case: the result
/// is a migration whose map is the step's own nuclides in canonical order.
///
/// # Errors
///
/// - `StorageError::InconsistentComposition` if a history row does not match
///   the width of `base`
/// - `StorageError::DuplicateNuclideCode` if the union holds two nuclides
///   with the same code
pub fn reconcile(
    base: &NuclideIndexMap,
    history: &[Vec<f64>],
    step: &StepValues,
    ordering: &dyn NuclideOrdering,
) -> Result<Reconciliation, StorageError> {
    if let Some((i, bad)) = history.iter().enumerate().find(|(_, r)| r.len() != base.len()) {
        return Err(StorageError::InconsistentComposition {
            path: String::new(),
            reason: format!(
                "history row {i} has {} columns but the nuclide map has {}",
                bad.len(),
                base.len()
            ),
        });
    }

    let drift = NuclideDrift::between(base, step);

    if !drift.requires_migration() && !(base.is_empty() && history.is_empty()) {
        let row = layout_row(base, step);
        return Ok(Reconciliation::InPlace {
            row,
            absent: drift.forward,
        });
    }

    let union = base
        .nuclides()
        .iter()
        .chain(step.keys())
        .cloned()
        .collect::<BTreeSet<String>>();
    let map = NuclideIndexMap::from_unordered(union, ordering)?;

    // For every new column, the column it came from (if any).
    let source: Vec<Option<usize>> = map.nuclides().iter().map(|n| base.index_of(n)).collect();
    let history = history
        .iter()
        .map(|old| {
            source
                .iter()
                .map(|src| src.map_or(0.0, |c| old[c]))
                .collect()
        })
        .collect();
    let row = layout_row(&map, step);

    Ok(Reconciliation::Migrated {
        map,
        history,
        row,
        drift,
    })
}

fn layout_row(map: &NuclideIndexMap, step: &StepValues) -> Vec<f64> {
    map.nuclides()
        .iter()
        .map(|n| step.get(n).copied().unwrap_or(0.0))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nuclide::NuclideCode;

    fn code(n: &str) -> NuclideCode {
        match n {
            "Xe135" => 541_350,
            "U235" => 922_350,
            "U238" => 922_380,
            "Pu239" => 942_390,
            "Pu240" => 942_400,
            _ => 0,
        }
    }

    fn step(pairs: &[(&str, f64)]) -> StepValues {
        pairs.iter().map(|(n, v)| ((*n).to_string(), *v)).collect()
    }

    fn map_of(names: &[&str]) -> NuclideIndexMap {
        NuclideIndexMap::from_unordered(names.iter().map(|n| (*n).to_string()), &code).unwrap()
    }

    #[test]
    fn test_bootstrap_orders_by_code() {
        let result = reconcile(
            &NuclideIndexMap::new(),
            &[],
            &step(&[("U238", 10.0), ("U235", 90.0)]),
            &code,
        )
        .unwrap();

        let Reconciliation::Migrated { map, history, row, .. } = result else {
            panic!("bootstrap must build a map");
        };
        assert_eq!(map.nuclides(), ["U235", "U238"]);
        assert!(history.is_empty());
        assert_eq!(row, vec![90.0, 10.0]);
    }

    #[test]
    fn test_fast_path_keeps_column_order() {
        let base = map_of(&["U235", "U238"]);
        let result = reconcile(&base, &[vec![90.0, 10.0]], &step(&[("U238", 12.0), ("U235", 80.0)]), &code).unwrap();
        assert_eq!(
            result,
            Reconciliation::InPlace {
                row: vec![80.0, 12.0],
                absent: BTreeSet::new(),
            }
        );
    }

    #[test]
    fn test_vanished_nuclide_zeroed_without_rebuild() {
        let base = map_of(&["U235", "U238", "Pu239"]);
        let result = reconcile(&base, &[vec![1.0, 2.0, 3.0]], &step(&[("U235", 5.0), ("Pu239", 7.0)]), &code).unwrap();

        let Reconciliation::InPlace { row, absent } = result else {
            panic!("no new nuclides, no migration");
        };
        assert_eq!(row, vec![5.0, 0.0, 7.0]);
        assert!(absent.contains("U238"));
    }

    #[test]
    fn test_migration_with_both_differences() {
        let base = map_of(&["U235", "U238"]);
        let history = vec![vec![90.0, 10.0]];
        let result = reconcile(&base, &history, &step(&[("U235", 40.0), ("Pu239", 10.0)]), &code).unwrap();

        let Reconciliation::Migrated { map, history, row, drift } = result else {
            panic!("Pu239 is new, expected migration");
        };
        assert_eq!(map.nuclides(), ["U235", "U238", "Pu239"]);
        assert_eq!(history, vec![vec![90.0, 10.0, 0.0]]);
        assert_eq!(row, vec![40.0, 0.0, 10.0]);
        assert!(drift.forward.contains("U238"));
        assert!(drift.backward.contains("Pu239"));
    }

    #[test]
    fn test_migration_relocates_history_columns() {
        let base = map_of(&["U235", "Pu239"]);
        let history = vec![vec![1.0, 2.0], vec![3.0, 4.0]];
        let result = reconcile(&base, &history, &step(&[("Xe135", 0.5), ("U238", 6.0)]), &code).unwrap();

        let Reconciliation::Migrated { map, history, row, .. } = result else {
            panic!("expected migration");
        };
        assert_eq!(map.nuclides(), ["Xe135", "U235", "U238", "Pu239"]);
        assert_eq!(history[0], vec![0.0, 1.0, 0.0, 2.0]);
        assert_eq!(history[1], vec![0.0, 3.0, 0.0, 4.0]);
        assert_eq!(row, vec![0.5, 0.0, 6.0, 0.0]);
    }

    #[test]
    fn test_rejects_history_wider_than_map() {
        let base = map_of(&["U235"]);
        let err = reconcile(&base, &[vec![1.0, 2.0]], &step(&[("U235", 1.0)]), &code).unwrap_err();
        assert!(matches!(err, StorageError::InconsistentComposition { .. }));
    }

    #[test]
    fn test_drift_sets() {
        let base = map_of(&["U235", "U238"]);
        let drift = NuclideDrift::between(&base, &step(&[("U235", 1.0), ("Pu240", 1.0)]));
        assert_eq!(drift.forward.iter().collect::<Vec<_>>(), ["U238"]);
        assert_eq!(drift.backward.iter().collect::<Vec<_>>(), ["Pu240"]);
        assert!(drift.requires_migration());
        assert!(!drift.is_empty());
    }
}
