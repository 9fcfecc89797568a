//! Per-material composition and parameter history.
//!
//! ```text
//! /materials/<name>/before_reproc/{comp, nuclide_map, parameters}
//! /materials/<name>/after_reproc/{comp, nuclide_map, parameters}
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::composition::{self, CompositionView};
use crate::error::StorageError;
use crate::nuclide::NuclideOrdering;
use crate::reconcile::{Reconciliation, StepValues};
use crate::records::MaterialParameters;
use crate::storage::{NodePath, Session};

/// Root group of every material.
pub const MATERIALS_GROUP: &str = "materials";

const PARAMETERS_NODE: &str = "parameters";

/// Moment within a depletion step at which a material is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Start of the step, straight out of the transport code.
    BeforeReprocessing,
    /// End of the step, after removal and refill.
    AfterReprocessing,
}

impl Phase {
    /// Group name of the phase.
    #[must_use]
    pub const fn node_name(self) -> &'static str {
        match self {
            Self::BeforeReprocessing => "before_reproc",
            Self::AfterReprocessing => "after_reproc",
        }
    }

    const fn title(self) -> &'static str {
        match self {
            Self::BeforeReprocessing => "Material data before reprocessing",
            Self::AfterReprocessing => "Material data after reprocessing",
        }
    }

    /// Phase recorded at the start (`false`) or end (`true`) of a step.
    #[must_use]
    pub const fn at_end(end: bool) -> Self {
        if end {
            Self::AfterReprocessing
        } else {
            Self::BeforeReprocessing
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.node_name())
    }
}

/// State of one material stream as handed over by the simulation.
///
/// `composition` holds mass fractions; they are stored multiplied by `mass`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MaterialSnapshot {
    pub composition: BTreeMap<String, f64>,
    pub mass: f64,
    pub density: f64,
    pub volume: f64,
    pub mass_flowrate: f64,
    pub void_fraction: f64,
    pub burnup: f64,
}

impl MaterialSnapshot {
    /// Absolute composition, `fraction × mass` per nuclide.
    #[must_use]
    pub fn absolute_composition(&self) -> StepValues {
        self.composition
            .iter()
            .map(|(n, frac)| (n.clone(), frac * self.mass))
            .collect()
    }

    /// Scalar properties as a parameter row.
    #[must_use]
    pub fn parameters(&self) -> MaterialParameters {
        MaterialParameters {
            mass: self.mass,
            density: self.density,
            volume: self.volume,
            mass_flowrate: self.mass_flowrate,
            void_fraction: self.void_fraction,
            burnup: self.burnup,
        }
    }
}

/// `/materials`.
///
/// # Errors
///
/// Never fails; the name is a constant.
pub fn materials_path() -> Result<NodePath, StorageError> {
    NodePath::root().join(MATERIALS_GROUP)
}

/// `/materials/<material>`.
///
/// # Errors
///
/// Returns `StorageError::InvalidNodeName` if `material` is not a valid node name.
pub fn material_path(material: &str) -> Result<NodePath, StorageError> {
    materials_path()?.join(material)
}

/// `/materials/<material>/<phase>`.
///
/// # Errors
///
/// Returns `StorageError::InvalidNodeName` if `material` is not a valid node name.
pub fn phase_path(material: &str, phase: Phase) -> Result<NodePath, StorageError> {
    material_path(material)?.join(phase.node_name())
}

/// Creates `/materials/<material>` if missing. Returns true if created.
///
/// # Errors
///
/// Returns an error if a non-group occupies the path.
pub fn ensure_material_group(session: &mut Session, material: &str) -> Result<bool, StorageError> {
    session.ensure_group(&materials_path()?, "Material data")?;
    session.ensure_group(&material_path(material)?, "")
}

fn ensure_phase_group(session: &mut Session, material: &str, phase: Phase) -> Result<NodePath, StorageError> {
    ensure_material_group(session, material)?;
    let path = phase_path(material, phase)?;
    session.ensure_group(&path, phase.title())?;
    Ok(path)
}

/// Appends one composition row for `material` at `phase`.
///
/// `fractions` are mass fractions and are scaled by `mass` before storing.
///
/// # Errors
///
/// Returns an error if the stored pair is inconsistent, the ordering ranks
/// two nuclides equally, or the write fails.
pub fn append_composition_row(
    session: &mut Session,
    material: &str,
    phase: Phase,
    fractions: &BTreeMap<String, f64>,
    mass: f64,
    ordering: &dyn NuclideOrdering,
) -> Result<Reconciliation, StorageError> {
    let group = ensure_phase_group(session, material, phase)?;
    let step: StepValues = fractions.iter().map(|(n, f)| (n.clone(), f * mass)).collect();
    composition::append_step(
        session,
        &group,
        &step,
        ordering,
        &format!("Isotopic composition for {material}"),
    )
}

/// Appends one parameter row for `material` at `phase`.
///
/// # Errors
///
/// Returns an error if the stored table has a different layout or the write
/// fails.
pub fn append_parameter_row(
    session: &mut Session,
    material: &str,
    phase: Phase,
    params: &MaterialParameters,
) -> Result<(), StorageError> {
    let group = ensure_phase_group(session, material, phase)?;
    session.append_record_creating(&group.join(PARAMETERS_NODE)?, params, "Material parameters data")?;
    Ok(())
}

/// Stores every material of one step: a composition row and a parameter row
/// each, so both stay aligned.
///
/// # Errors
///
/// Stops at the first failing material; earlier materials stay written.
pub fn store_materials(
    session: &mut Session,
    materials: &BTreeMap<String, MaterialSnapshot>,
    phase: Phase,
    ordering: &dyn NuclideOrdering,
) -> Result<(), StorageError> {
    for (name, snapshot) in materials {
        tracing::info!(
            material = %name,
            %phase,
            nuclides = snapshot.composition.len(),
            path = %session.path().display(),
            "Storing material data"
        );
        append_composition_row(session, name, phase, &snapshot.composition, snapshot.mass, ordering)?;
        append_parameter_row(session, name, phase, &snapshot.parameters())?;
    }
    Ok(())
}

/// Composition history of `material` at `phase`, `None` if never stored.
///
/// # Errors
///
/// Returns an error if the stored pair is inconsistent.
pub fn read_composition(
    session: &Session,
    material: &str,
    phase: Phase,
) -> Result<Option<CompositionView>, StorageError> {
    composition::read(session, &phase_path(material, phase)?)
}

/// Parameter rows of `material` at `phase`; empty if never stored.
///
/// # Errors
///
/// Returns an error if the rows do not decode.
pub fn read_parameters(
    session: &Session,
    material: &str,
    phase: Phase,
) -> Result<Vec<MaterialParameters>, StorageError> {
    session.read_records(&phase_path(material, phase)?.join(PARAMETERS_NODE)?)
}

/// Names of every stored material.
#[must_use]
pub fn material_names(session: &Session) -> Vec<String> {
    let Ok(root) = materials_path() else {
        return Vec::new();
    };
    session
        .tree()
        .children(&root)
        .map(|p| p.name().to_string())
        .collect()
}
