//! Driving the store from a depletion run.
//!
//! [`Simulation`] pairs a [`Store`] with the depletion-code collaborator
//! that produces each step's results, and exposes one call per point in
//! the step loop where data is recorded or read back.

use std::collections::BTreeMap;

use crate::composition::CompositionView;
use crate::error::StoreResult;
use crate::material::{self, MaterialSnapshot, Phase};
use crate::metadata;
use crate::nuclide::NuclideOrdering;
use crate::predictor;
use crate::records::{CodeMetadataRecord, NeutronicsParameters, StepMetadataRecord, StepRunRecord};
use crate::restart::{self, RuntimeArtifacts};
use crate::storage::Store;
use crate::waste::{self, WasteStreams};

/// Steps after which the criticality forecast has enough history on a
/// fresh run.
const FORECAST_AFTER_STEP: usize = 3;

/// The depletion / transport code whose results are being stored.
///
/// Running the code and parsing its output live behind this trait; the
/// store only sees the parsed records. The supertrait supplies the
/// canonical nuclide order.
pub trait DepletionCode: NuclideOrdering {
    /// Neutronics results of the step that just finished.
    ///
    /// # Errors
    ///
    /// Returns an error if the code's output cannot be read.
    fn read_neutronics_parameters(&mut self) -> StoreResult<NeutronicsParameters>;

    /// Description of the code and its inputs.
    ///
    /// # Errors
    ///
    /// Returns an error if the code's output cannot be read.
    fn read_code_metadata(&mut self) -> StoreResult<CodeMetadataRecord>;

    /// Execution metadata of the step that just finished.
    ///
    /// # Errors
    ///
    /// Returns an error if the code's output cannot be read.
    fn read_step_metadata(&mut self) -> StoreResult<StepMetadataRecord>;

    /// Files the code writes while running.
    fn runtime_artifacts(&self) -> RuntimeArtifacts;
}

/// A depletion run backed by a store.
pub struct Simulation<D> {
    name: String,
    depcode: D,
    store: Store,
    restart: bool,
    adjust_geometry: bool,
}

impl<D: DepletionCode> Simulation<D> {
    /// Creates a simulation.
    ///
    /// `restart` resumes from the results already in `store`;
    /// `adjust_geometry` enables criticality-driven geometry switching.
    pub fn new(name: impl Into<String>, depcode: D, store: Store, restart: bool, adjust_geometry: bool) -> Self {
        Self {
            name: name.into(),
            depcode,
            store,
            restart,
            adjust_geometry,
        }
    }

    /// Name of the run.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The backing store.
    #[must_use]
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// The depletion-code collaborator.
    pub fn depcode(&mut self) -> &mut D {
        &mut self.depcode
    }

    /// Returns true if the run resumes from stored results.
    #[must_use]
    pub fn is_restart(&self) -> bool {
        self.restart
    }

    /// Returns true if the geometry is switched when criticality is lost.
    #[must_use]
    pub fn adjusts_geometry(&self) -> bool {
        self.adjust_geometry
    }

    /// Returns the index of the first step to run, clearing old output on a
    /// fresh run.
    ///
    /// # Errors
    ///
    /// On restart, returns an error if the store cannot be read.
    pub fn check_restart(&self) -> StoreResult<usize> {
        restart::determine_resume_step(self.restart, &self.store, &self.depcode.runtime_artifacts())
    }

    /// Stores every material at the start (`at_end == false`) or end of a step.
    ///
    /// # Errors
    ///
    /// Returns an error if a material cannot be reconciled or written.
    pub fn store_mat_data(
        &self,
        materials: &BTreeMap<String, MaterialSnapshot>,
        step: usize,
        at_end: bool,
    ) -> StoreResult<()> {
        let phase = Phase::at_end(at_end);
        tracing::info!(sim = %self.name, step = step + 1, %phase, "Storing material data for depletion step");
        self.store
            .append(|session| material::store_materials(session, materials, phase, &self.depcode))?;
        Ok(())
    }

    /// Stores the waste streams of a step, then the materials after
    /// reprocessing.
    ///
    /// # Errors
    ///
    /// Returns an error if a composition cannot be reconciled or written.
    pub fn store_after_repr(
        &self,
        after_materials: &BTreeMap<String, MaterialSnapshot>,
        waste: Option<&WasteStreams>,
        step: usize,
    ) -> StoreResult<()> {
        if let Some(waste) = waste {
            self.store
                .append(|session| waste::store_waste(session, waste, &self.depcode))?;
        }
        self.store_mat_data(after_materials, step, true)
    }

    /// Reads the step's neutronics results from the code and stores them.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::SchemaMismatch` (wrapped) if the number of
    /// delayed-neutron groups changed since the first step.
    pub fn store_step_neutronics_parameters(&mut self) -> StoreResult<StepRunRecord> {
        let params = self.depcode.read_neutronics_parameters()?;
        let record = self
            .store
            .append(|session| metadata::append_step_run_record(session, params))?;
        Ok(record)
    }

    /// Stores the code metadata once per store. Returns true if written.
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata cannot be read or written.
    pub fn store_depcode_metadata(&mut self) -> StoreResult<bool> {
        let record = self.depcode.read_code_metadata()?;
        let written = self
            .store
            .append(|session| metadata::write_code_metadata(session, &record))?;
        Ok(written)
    }

    /// Reads the step's execution metadata from the code and stores it.
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata cannot be read or written.
    pub fn store_step_metadata(&mut self) -> StoreResult<()> {
        let record = self.depcode.read_step_metadata()?;
        self.store
            .append(|session| metadata::append_step_metadata(session, &record))?;
        Ok(())
    }

    /// Predicts whether the next step ends subcritical.
    ///
    /// Returns `None` before enough steps have run on a fresh simulation.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Prediction` if a restarted run has fewer than
    /// four stored steps.
    pub fn read_k_eds_delta(&self, current_step: usize) -> StoreResult<Option<bool>> {
        if current_step <= FORECAST_AFTER_STEP && !self.restart {
            return Ok(None);
        }
        let history = self.keff_eds_history()?;
        Ok(Some(predictor::predict_next_step_subcritical(&history)?))
    }

    /// Returns true if `current_time` is one of the scheduled switch times.
    #[must_use]
    pub fn check_switch_geo_trigger(&self, current_time: f64, schedule: &[f64]) -> bool {
        predictor::should_switch_geometry(current_time, schedule)
    }

    /// Mean end-of-step multiplication factor of every stored step.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn keff_eds_history(&self) -> StoreResult<Vec<f64>> {
        Ok(self.store.read(|session| metadata::keff_eds_history(session))?)
    }

    /// Composition history of a material, `None` if never stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn read_composition(&self, material: &str, phase: Phase) -> StoreResult<Option<CompositionView>> {
        Ok(self
            .store
            .read(|session| material::read_composition(session, material, phase))?)
    }

    /// Composition history of one waste stream, `None` if never stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn read_waste_composition(&self, material: &str, process: &str) -> StoreResult<Option<CompositionView>> {
        Ok(self
            .store
            .read(|session| waste::read_waste_composition(session, material, process))?)
    }

    /// Every stored step result.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn read_step_run_records(&self) -> StoreResult<Vec<StepRunRecord>> {
        Ok(self
            .store
            .read(|session| metadata::read_step_run_records(session))?)
    }

    /// The stored code metadata, if written.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn read_code_metadata(&self) -> StoreResult<Option<CodeMetadataRecord>> {
        Ok(self.store.read(|session| metadata::read_code_metadata(session))?)
    }
}
