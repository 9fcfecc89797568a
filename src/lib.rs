//! # burnup-store - Depletion result storage
//!
//! Persists the per-step output of a reactor depletion simulation into a
//! single append-only file: isotopic compositions of every material stream,
//! their physical parameters, waste streams per reprocessing process, and
//! run-level neutronics and execution metadata.
//!
//! ## Core Concepts
//!
//! - **Store**: a single file holding a framed, checksummed mutation log,
//!   accessed through short-lived sessions
//! - **Composition pair**: a `comp` array (rows = steps) next to a
//!   `nuclide_map` table naming its columns
//! - **Reconciliation**: when a step brings new nuclides, the stored history
//!   is rebuilt at the wider schema; nuclides are never dropped
//! - **Forecast**: one-step extrapolation of the end-of-step multiplication
//!   factor
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::collections::BTreeMap;
//! use burnup_store::{material, Phase, Store, StoreConfig};
//!
//! # fn main() -> burnup_store::StoreResult<()> {
//! let store = Store::new("db_depletion.dpl", StoreConfig::default())?;
//! let zam = |name: &str| -> i64 { if name == "U235" { 922_350 } else { 922_380 } };
//! let fractions: BTreeMap<String, f64> =
//!     [("U235".to_string(), 0.9), ("U238".to_string(), 0.1)].into();
//!
//! store.append(|session| {
//!     material::append_composition_row(session, "fuel", Phase::BeforeReprocessing, &fractions, 100.0, &zam)
//! })?;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod composition;
pub mod config;
pub mod error;
pub mod material;
pub mod metadata;
pub mod nuclide;
pub mod predictor;
pub mod reconcile;
pub mod records;
pub mod restart;
pub mod simulation;
pub mod storage;
pub mod waste;

// Re-export primary types at crate root for convenience
pub use composition::CompositionView;
pub use config::{CompactionPolicy, CompressionAlgorithm, CompressionProfile, StoreConfig};
pub use error::{ConfigError, PredictionError, StorageError, StoreError, StoreResult};
pub use material::{MaterialSnapshot, Phase};
pub use nuclide::{NuclideCode, NuclideIndexMap, NuclideOrdering};
pub use predictor::{predict_next_step_subcritical, should_switch_geometry, CriticalityForecast};
pub use reconcile::{reconcile, NuclideDrift, Reconciliation, StepValues};
pub use records::{
    CodeMetadataRecord, Estimate, MaterialParameters, NeutronicsParameters, StepMetadataRecord, StepRunRecord,
};
pub use restart::{determine_resume_step, RuntimeArtifacts, RuntimeInputFiles};
pub use simulation::{DepletionCode, Simulation};
pub use storage::{AccessMode, CompactionResult, NodePath, Session, Store, StoreStats};
pub use waste::WasteStreams;
