//! End-to-end tests for storing a depletion run.
//!
//! Covers the documented scenarios:
//! - Fast-path append when the nuclide set is unchanged
//! - History migration when the nuclide set grows
//! - Criticality forecast and geometry trigger
//! - Write-once code metadata and restart step counting
//! - No stored value is ever lost across migrations

use std::collections::{BTreeMap, BTreeSet};

use burnup_store::material::{self, Phase};
use burnup_store::{
    metadata, predict_next_step_subcritical, should_switch_geometry, waste, CodeMetadataRecord,
    MaterialSnapshot, NeutronicsParameters, NuclideCode, Reconciliation, StorageError, Store, StoreConfig,
};
use tempfile::{tempdir, TempDir};

fn zam(name: &str) -> NuclideCode {
    match name {
        "U235" => 922_350,
        "U238" => 922_380,
        "Pu239" => 942_390,
        "Xe135" => 541_350,
        "Cs137" => 551_370,
        "Sr90" => 380_900,
        _ => 0,
    }
}

const NUCLIDES: [&str; 6] = ["U235", "U238", "Pu239", "Xe135", "Cs137", "Sr90"];

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn open_store() -> (TempDir, Store) {
    init_tracing();
    let dir = tempdir().unwrap();
    let config = StoreConfig {
        sync_on_write: false,
        ..StoreConfig::default()
    };
    let store = Store::new(dir.path().join("db_depletion.dpl"), config).unwrap();
    (dir, store)
}

fn fractions(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
    pairs.iter().map(|(n, f)| ((*n).to_string(), *f)).collect()
}

fn append_fuel(store: &Store, pairs: &[(&str, f64)], mass: f64) -> Reconciliation {
    store
        .append(|s| material::append_composition_row(s, "fuel", Phase::BeforeReprocessing, &fractions(pairs), mass, &zam))
        .unwrap()
}

/// Scenario A: first step bootstraps the pair in code order.
#[test]
fn test_first_step_bootstraps_pair() {
    let (_dir, store) = open_store();
    append_fuel(&store, &[("U238", 0.1), ("U235", 0.9)], 100.0);

    let view = store
        .read(|s| material::read_composition(s, "fuel", Phase::BeforeReprocessing))
        .unwrap()
        .unwrap();
    assert_eq!(view.map.nuclides(), ["U235", "U238"]);
    assert_eq!(view.map.index_of("U238"), Some(1));
    assert_eq!(view.matrix, vec![vec![90.0, 10.0]]);
}

/// Scenario B: a new nuclide widens the history and backfills zeros.
#[test]
fn test_growth_migrates_history() {
    let (_dir, store) = open_store();
    append_fuel(&store, &[("U235", 0.9), ("U238", 0.1)], 100.0);
    let outcome = append_fuel(&store, &[("U235", 0.8), ("Pu239", 0.2)], 50.0);

    match outcome {
        Reconciliation::Migrated { drift, .. } => {
            assert_eq!(drift.backward, BTreeSet::from(["Pu239".to_string()]));
            assert_eq!(drift.forward, BTreeSet::from(["U238".to_string()]));
        }
        other => panic!("expected a migration, got {other:?}"),
    }

    let view = store
        .read(|s| material::read_composition(s, "fuel", Phase::BeforeReprocessing))
        .unwrap()
        .unwrap();
    assert_eq!(view.map.nuclides(), ["U235", "U238", "Pu239"]);
    assert_eq!(view.matrix, vec![vec![90.0, 10.0, 0.0], vec![40.0, 0.0, 10.0]]);
    assert_eq!(view.column("U238"), Some(vec![10.0, 0.0]));
}

/// A shrinking nuclide set appends in place with zeros.
#[test]
fn test_missing_nuclides_stay_in_place() {
    let (_dir, store) = open_store();
    append_fuel(&store, &[("U235", 0.9), ("U238", 0.1)], 100.0);
    let outcome = append_fuel(&store, &[("U235", 1.0)], 10.0);
    assert!(matches!(outcome, Reconciliation::InPlace { .. }));

    let view = store
        .read(|s| material::read_composition(s, "fuel", Phase::BeforeReprocessing))
        .unwrap()
        .unwrap();
    assert_eq!(view.matrix, vec![vec![90.0, 10.0], vec![10.0, 0.0]]);
}

/// Scenario C: history `[1.05, 1.04, 1.02, 1.00]` forecasts subcritical.
#[test]
fn test_forecast_from_stored_history() {
    let (_dir, store) = open_store();
    store
        .append(|s| {
            for keff in [1.05, 1.04, 1.02, 1.00] {
                let mut params = NeutronicsParameters {
                    step_duration: 1.0,
                    ..NeutronicsParameters::default()
                };
                params.keff_eds.0 = keff;
                metadata::append_step_run_record(s, params)?;
            }
            Ok::<_, StorageError>(())
        })
        .unwrap();

    let history = store.read(|s| metadata::keff_eds_history(s)).unwrap();
    assert_eq!(history, vec![1.05, 1.04, 1.02, 1.00]);
    assert!(predict_next_step_subcritical(&history).unwrap());
    assert!(predict_next_step_subcritical(&history[..3]).is_err());
}

/// Scenario D: the geometry switch fires only on scheduled times.
#[test]
fn test_geometry_trigger() {
    assert!(should_switch_geometry(20.0, &[10.0, 20.0]));
    assert!(!should_switch_geometry(15.0, &[10.0, 20.0]));
    assert!(!should_switch_geometry(10.0, &[]));
}

/// Scenario E: code metadata is written once.
#[test]
fn test_code_metadata_written_once() {
    let (_dir, store) = open_store();
    let first = CodeMetadataRecord {
        depcode_name: "openmc".into(),
        depcode_version: "0.13.3".into(),
        title: "msbr".into(),
        ..CodeMetadataRecord::default()
    };
    let second = CodeMetadataRecord {
        depcode_version: "0.14.0".into(),
        ..first.clone()
    };

    assert!(store.append(|s| metadata::write_code_metadata(s, &first)).unwrap());
    assert!(!store.append(|s| metadata::write_code_metadata(s, &second)).unwrap());

    let stored = store.read(|s| metadata::read_code_metadata(s)).unwrap();
    assert_eq!(stored, Some(first));
}

/// A restart resumes after the last stored step.
#[test]
fn test_restart_step_matches_stored_rows() {
    let (_dir, store) = open_store();
    for _ in 0..4 {
        store
            .append(|s| metadata::append_step_run_record(s, NeutronicsParameters::default()))
            .unwrap();
    }
    assert_eq!(store.read(|s| metadata::completed_steps(s)).unwrap(), 4);
}

/// Rows written with a different layout are refused.
#[test]
fn test_parameter_layout_change_is_fatal() {
    let (_dir, store) = open_store();
    store
        .append(|s| metadata::append_step_run_record(s, NeutronicsParameters::default()))
        .unwrap();

    let wider = NeutronicsParameters {
        beta_eff_bds: vec![Default::default(); 6],
        ..NeutronicsParameters::default()
    };
    let err = store
        .append(|s| metadata::append_step_run_record(s, wider))
        .unwrap_err();
    assert!(err.is_schema_mismatch(), "unexpected error: {err}");
    assert_eq!(store.read(|s| metadata::completed_steps(s)).unwrap(), 1);
}

fn stream(pairs: &[(&str, f64)]) -> MaterialSnapshot {
    MaterialSnapshot {
        composition: fractions(pairs),
        mass: 2.0,
        ..MaterialSnapshot::default()
    }
}

/// Streams without waste this step leave no row behind.
#[test]
fn test_empty_waste_streams_are_skipped() {
    let (_dir, store) = open_store();
    let step1: waste::WasteStreams = [(
        "fuel".to_string(),
        [
            ("sparger".to_string(), stream(&[("Xe135", 1.0)])),
            ("entrainment".to_string(), stream(&[])),
        ]
        .into(),
    )]
    .into();

    let appended = store.append(|s| waste::store_waste(s, &step1, &zam)).unwrap();
    assert_eq!(appended, 1);

    store
        .read(|s| {
            assert_eq!(waste::process_names(s, "fuel"), ["sparger"]);
            let sparger = waste::read_waste_composition(s, "fuel", "sparger")?.unwrap();
            assert_eq!(sparger.matrix, vec![vec![2.0]]);
            assert!(waste::read_waste_composition(s, "fuel", "entrainment")?.is_none());
            Ok::<_, StorageError>(())
        })
        .unwrap();
}

/// Every value ever appended can be read back at its step, and absent
/// nuclides read as zero.
#[test]
fn test_no_value_lost_across_migrations() {
    let (_dir, store) = open_store();

    // Deterministic LCG so the test is reproducible.
    let mut state: u64 = 0x2545_F491_4F6C_DD1D;
    let mut next = move || {
        state = state.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1_442_695_040_888_963_407);
        state >> 33
    };

    let mut written: Vec<BTreeMap<String, f64>> = Vec::new();
    for _ in 0..25 {
        let mut step = BTreeMap::new();
        for nuclide in NUCLIDES {
            if next() % 3 != 0 {
                #[allow(clippy::cast_precision_loss)]
                let value = (next() % 1000) as f64 / 8.0;
                step.insert(nuclide.to_string(), value);
            }
        }
        store
            .append(|s| material::append_composition_row(s, "fuel", Phase::AfterReprocessing, &step, 1.0, &zam))
            .unwrap();
        written.push(step);
    }

    let view = store
        .read(|s| material::read_composition(s, "fuel", Phase::AfterReprocessing))
        .unwrap()
        .unwrap();
    assert_eq!(view.steps(), written.len());

    let mut codes: Vec<NuclideCode> = view.map.nuclides().iter().map(|n| zam(n)).collect();
    let sorted = {
        let mut c = codes.clone();
        c.sort_unstable();
        c
    };
    assert_eq!(codes, sorted);
    codes.dedup();
    assert_eq!(codes.len(), view.map.len());

    for (index, expected) in written.iter().enumerate() {
        let stored = view.step(index).unwrap();
        for nuclide in view.map.nuclides() {
            let want = expected.get(nuclide).copied().unwrap_or(0.0);
            assert_eq!(stored[nuclide], want, "step {index}, {nuclide}");
        }
        for nuclide in expected.keys() {
            assert!(view.map.contains(nuclide));
        }
    }
}

/// Before- and after-reprocessing histories of a material are independent.
#[test]
fn test_phases_are_independent() {
    let (_dir, store) = open_store();
    let mats: BTreeMap<String, MaterialSnapshot> = [(
        "fuel".to_string(),
        MaterialSnapshot {
            composition: fractions(&[("U235", 0.5), ("U238", 0.5)]),
            mass: 2.0,
            density: 3.3,
            ..MaterialSnapshot::default()
        },
    )]
    .into();

    store
        .append(|s| material::store_materials(s, &mats, Phase::BeforeReprocessing, &zam))
        .unwrap();

    store
        .read(|s| {
            assert_eq!(material::material_names(s), ["fuel"]);
            assert!(material::read_composition(s, "fuel", Phase::AfterReprocessing)?.is_none());
            let params = material::read_parameters(s, "fuel", Phase::BeforeReprocessing)?;
            assert_eq!(params.len(), 1);
            assert_eq!(params[0].density, 3.3);
            Ok::<_, StorageError>(())
        })
        .unwrap();
}
