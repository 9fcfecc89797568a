//! Row types of the fixed-schema tables.
//!
//! Each record serializes to a flat JSON object; the first row written to a
//! table fixes its column layout (see [`crate::storage::TableSchema`]).

use serde::{Deserialize, Serialize};

/// A Monte Carlo estimate: `(mean, standard deviation)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Estimate(pub f64, pub f64);

impl Estimate {
    /// Mean value.
    #[must_use]
    pub const fn mean(self) -> f64 {
        self.0
    }

    /// Standard deviation.
    #[must_use]
    pub const fn std(self) -> f64 {
        self.1
    }
}

/// Physical properties of a material stream at one step, one row per
/// composition row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MaterialParameters {
    pub mass: f64,
    pub density: f64,
    pub volume: f64,
    pub mass_flowrate: f64,
    pub void_fraction: f64,
    pub burnup: f64,
}

/// Neutronics results of one depletion step as reported by the depletion
/// code, before the cumulative time is known.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NeutronicsParameters {
    pub keff_bds: Estimate,
    pub keff_eds: Estimate,
    pub breeding_ratio_bds: Estimate,
    pub breeding_ratio_eds: Estimate,
    /// Length of this step, days.
    pub step_duration: f64,
    pub power_level: f64,
    /// One estimate per delayed-neutron group.
    pub beta_eff_bds: Vec<Estimate>,
    pub beta_eff_eds: Vec<Estimate>,
    pub delayed_neutrons_lambda_bds: Vec<Estimate>,
    pub delayed_neutrons_lambda_eds: Vec<Estimate>,
    pub fission_mass_bds: f64,
    pub fission_mass_eds: f64,
}

impl NeutronicsParameters {
    /// Number of delayed-neutron groups.
    #[must_use]
    pub fn delayed_groups(&self) -> usize {
        self.beta_eff_bds.len()
    }
}

/// One row of `/simulation_parameters`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepRunRecord {
    pub keff_bds: Estimate,
    pub keff_eds: Estimate,
    pub breeding_ratio_bds: Estimate,
    pub breeding_ratio_eds: Estimate,
    /// Time elapsed since the start of depletion, at the end of this step.
    pub cumulative_time_at_eds: f64,
    pub power_level: f64,
    pub beta_eff_bds: Vec<Estimate>,
    pub beta_eff_eds: Vec<Estimate>,
    pub delayed_neutrons_lambda_bds: Vec<Estimate>,
    pub delayed_neutrons_lambda_eds: Vec<Estimate>,
    pub fission_mass_bds: f64,
    pub fission_mass_eds: f64,
}

impl StepRunRecord {
    /// Builds the stored row from a step's parameters.
    #[must_use]
    pub fn from_parameters(params: NeutronicsParameters, cumulative_time_at_eds: f64) -> Self {
        Self {
            keff_bds: params.keff_bds,
            keff_eds: params.keff_eds,
            breeding_ratio_bds: params.breeding_ratio_bds,
            breeding_ratio_eds: params.breeding_ratio_eds,
            cumulative_time_at_eds,
            power_level: params.power_level,
            beta_eff_bds: params.beta_eff_bds,
            beta_eff_eds: params.beta_eff_eds,
            delayed_neutrons_lambda_bds: params.delayed_neutrons_lambda_bds,
            delayed_neutrons_lambda_eds: params.delayed_neutrons_lambda_eds,
            fission_mass_bds: params.fission_mass_bds,
            fission_mass_eds: params.fission_mass_eds,
        }
    }
}

/// Run-wide description of the depletion code, `/depcode_metadata`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeMetadataRecord {
    pub depcode_name: String,
    pub depcode_version: String,
    pub title: String,
    pub depcode_input_filename: String,
    pub depcode_working_dir: String,
    pub xs_data_path: String,
}

/// Execution metadata of one step, `/depletion_step_metadata`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepMetadataRecord {
    pub neutron_population: u64,
    pub active_cycles: u64,
    pub inactive_cycles: u64,
    pub omp_threads: u64,
    pub mpi_tasks: u64,
    pub memory_optimization_mode: u64,
    pub depletion_timestep_size: f64,
    /// Wall-clock seconds.
    pub execution_time: f64,
    /// Megabytes.
    pub memory_usage: f64,
}
