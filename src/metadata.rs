//! Run-level metadata tables at the root of the store.
//!
//! | Table                      | Rows                          |
//! |----------------------------|-------------------------------|
//! | `/simulation_parameters`   | one [`StepRunRecord`] per step |
//! | `/depcode_metadata`        | a single [`CodeMetadataRecord`] |
//! | `/depletion_step_metadata` | one [`StepMetadataRecord`] per step |

use crate::error::StorageError;
use crate::records::{CodeMetadataRecord, NeutronicsParameters, StepMetadataRecord, StepRunRecord};
use crate::storage::{NodePath, Session};

/// Per-step neutronics results.
pub const SIMULATION_PARAMETERS: &str = "simulation_parameters";
/// Depletion code description.
pub const CODE_METADATA: &str = "depcode_metadata";
/// Per-step execution metadata.
pub const STEP_METADATA: &str = "depletion_step_metadata";

fn root_table(name: &str) -> Result<NodePath, StorageError> {
    NodePath::root().join(name)
}

/// Appends the results of one step.
///
/// The cumulative time is the previous row's plus `params.step_duration`.
/// The first row fixes the number of delayed-neutron groups.
///
/// # Errors
///
/// Returns `StorageError::SchemaMismatch` if the group count differs from
/// the stored rows.
pub fn append_step_run_record(
    session: &mut Session,
    params: NeutronicsParameters,
) -> Result<StepRunRecord, StorageError> {
    let path = root_table(SIMULATION_PARAMETERS)?;
    let previous = match session.table(&path)? {
        Some(table) => table
            .decode_last::<StepRunRecord>()?
            .map_or(0.0, |r| r.cumulative_time_at_eds),
        None => 0.0,
    };
    let groups = params.delayed_groups();
    let cumulative = previous + params.step_duration;
    let record = StepRunRecord::from_parameters(params, cumulative);

    let created = session.append_record_creating(&path, &record, "Simulation parameters after each timestep")?;
    if created {
        tracing::info!(delayed_groups = groups, "Created simulation parameters table");
    }
    tracing::info!(
        keff_eds = record.keff_eds.mean(),
        cumulative_time = record.cumulative_time_at_eds,
        "Stored step neutronics parameters"
    );
    Ok(record)
}

/// Writes the code metadata unless already present. Returns true if written.
///
/// # Errors
///
/// Propagates storage failures.
pub fn write_code_metadata(session: &mut Session, record: &CodeMetadataRecord) -> Result<bool, StorageError> {
    let path = root_table(CODE_METADATA)?;
    if session.exists(&path) {
        tracing::debug!("Depletion code metadata already stored");
        return Ok(false);
    }
    session.append_record_creating(&path, record, "Depletion code metadata")?;
    tracing::info!(code = %record.depcode_name, version = %record.depcode_version, "Stored depletion code metadata");
    Ok(true)
}

/// Appends the execution metadata of one step.
///
/// # Errors
///
/// Propagates storage failures.
pub fn append_step_metadata(session: &mut Session, record: &StepMetadataRecord) -> Result<(), StorageError> {
    session.append_record_creating(&root_table(STEP_METADATA)?, record, "Depletion step metadata")?;
    tracing::info!(
        execution_time = record.execution_time,
        memory_usage = record.memory_usage,
        "Stored depletion step metadata"
    );
    Ok(())
}

/// Every stored step result.
///
/// # Errors
///
/// Returns an error if rows do not decode.
pub fn read_step_run_records(session: &Session) -> Result<Vec<StepRunRecord>, StorageError> {
    session.read_records(&root_table(SIMULATION_PARAMETERS)?)
}

/// The stored code metadata, if written.
///
/// # Errors
///
/// Returns an error if the row does not decode.
pub fn read_code_metadata(session: &Session) -> Result<Option<CodeMetadataRecord>, StorageError> {
    match session.table(&root_table(CODE_METADATA)?)? {
        Some(table) => table.decode_last(),
        None => Ok(None),
    }
}

/// Every stored step metadata row.
///
/// # Errors
///
/// Returns an error if rows do not decode.
pub fn read_step_metadata(session: &Session) -> Result<Vec<StepMetadataRecord>, StorageError> {
    session.read_records(&root_table(STEP_METADATA)?)
}

/// Mean end-of-step multiplication factor of every stored step.
///
/// # Errors
///
/// Returns an error if rows do not decode.
pub fn keff_eds_history(session: &Session) -> Result<Vec<f64>, StorageError> {
    Ok(read_step_run_records(session)?
        .into_iter()
        .map(|r| r.keff_eds.mean())
        .collect())
}

/// Number of steps with stored results.
///
/// # Errors
///
/// Returns `StorageError::NodeKindMismatch` if a non-table holds the name.
pub fn completed_steps(session: &Session) -> Result<usize, StorageError> {
    Ok(session
        .table(&root_table(SIMULATION_PARAMETERS)?)?
        .map_or(0, |t| t.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::records::Estimate;
    use crate::storage::AccessMode;
    use tempfile::tempdir;

    fn params(keff: f64, days: f64, groups: usize) -> NeutronicsParameters {
        NeutronicsParameters {
            keff_eds: Estimate(keff, 1e-4),
            step_duration: days,
            beta_eff_bds: vec![Estimate(3e-4, 1e-6); groups],
            beta_eff_eds: vec![Estimate(3e-4, 1e-6); groups],
            delayed_neutrons_lambda_bds: vec![Estimate(0.1, 0.0); groups],
            delayed_neutrons_lambda_eds: vec![Estimate(0.1, 0.0); groups],
            ..NeutronicsParameters::default()
        }
    }

    fn open(dir: &std::path::Path) -> Session {
        let config = StoreConfig { sync_on_write: false, ..StoreConfig::default() };
        Session::open(&dir.join("db.dpl"), &config, AccessMode::Append).unwrap()
    }

    #[test]
    fn test_cumulative_time_accumulates() {
        let dir = tempdir().unwrap();
        let mut s = open(dir.path());
        assert_eq!(completed_steps(&s).unwrap(), 0);
        append_step_run_record(&mut s, params(1.05, 3.0, 6)).unwrap();
        append_step_run_record(&mut s, params(1.04, 3.0, 6)).unwrap();
        let third = append_step_run_record(&mut s, params(1.02, 1.5, 6)).unwrap();
        assert_eq!(third.cumulative_time_at_eds, 7.5);
        assert_eq!(keff_eds_history(&s).unwrap(), vec![1.05, 1.04, 1.02]);
        assert_eq!(completed_steps(&s).unwrap(), 3);
    }

    #[test]
    fn test_group_count_is_fixed_by_first_row() {
        let dir = tempdir().unwrap();
        let mut s = open(dir.path());
        append_step_run_record(&mut s, params(1.0, 1.0, 6)).unwrap();
        let err = append_step_run_record(&mut s, params(1.0, 1.0, 8)).unwrap_err();
        assert!(err.is_schema_mismatch());
        assert_eq!(completed_steps(&s).unwrap(), 1);
    }

    #[test]
    fn test_code_metadata_written_once() {
        let dir = tempdir().unwrap();
        let mut s = open(dir.path());
        let first = CodeMetadataRecord { depcode_name: "serpent".into(), ..CodeMetadataRecord::default() };
        let second = CodeMetadataRecord { depcode_name: "openmc".into(), ..CodeMetadataRecord::default() };
        assert!(write_code_metadata(&mut s, &first).unwrap());
        assert!(!write_code_metadata(&mut s, &second).unwrap());
        assert_eq!(read_code_metadata(&s).unwrap(), Some(first));
        assert_eq!(s.table(&root_table(CODE_METADATA).unwrap()).unwrap().unwrap().len(), 1);
    }

    #[test]
    fn test_step_metadata_appends() {
        let dir = tempdir().unwrap();
        let mut s = open(dir.path());
        let record = StepMetadataRecord { mpi_tasks: 4, execution_time: 12.5, ..StepMetadataRecord::default() };
        append_step_metadata(&mut s, &record).unwrap();
        append_step_metadata(&mut s, &record).unwrap();
        assert_eq!(read_step_metadata(&s).unwrap(), vec![record.clone(), record]);
    }
}
