//! Integration tests for the file-loading layer.
//!
//! Fixture CSVs are written to a temporary directory laid out like a
//! batch data dir: `current/`, optional `history/`, `reference/`.

use docket_core::{
    cohort::StageTables,
    config::BatchConfig,
    error::BatchError,
    pipeline::BatchInputs,
    record::read_stage_csv,
    reference::{ExternalLookups, ReferenceData},
    types::Stage,
};
use std::fs;
use std::path::Path;

fn write(dir: &Path, name: &str, content: &str) {
    fs::create_dir_all(dir).unwrap();
    fs::write(dir.join(name), content).unwrap();
}

const RECEIVED: &str = "\
File #,Agency,Ref. Charge Code,Enter Dt.,Year,Def. Sex,Offense Street Address
123.0,2.0,100,01/05/2023,2023,M,1 Main St
,2,100,01/05/2023,2023,F,
124,,200,2023-02-01,,F,
125,3,200,2022-12-30,abc,M,
";

fn write_stage_dir(dir: &Path) {
    write(dir, "Received.csv", RECEIVED);
    write(dir, "NotFiled.csv", "File #,Disp. Code\n124,7.0\n");
    write(dir, "Filed.csv", "File #\n123\n");
    write(dir, "Disposed.csv", "File #,Activity\n");
}

fn write_reference_dir(dir: &Path) {
    write(dir, "ChargeCodeCategories.csv", "Ref. Charge Code,Category\n100.0,Drugs\n200,Homicide\n,Orphan\n300,\n");
    write(dir, "Disposition Codes.csv", "Disp. Code,Reason\n10,Dismissed\n");
    write(dir, "RefusalReasons.csv", "Disp. Code,Reason\n7.0,Insufficient Evidence\n");
    write(dir, "PD Agency.csv", "Agency,PD NAME\n2,Kansas City PD\n 3.0 , Independence PD \n");
}

// ─────────────────────────────────────────────────────────────────────────────
// Stage tables
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn stage_rows_parse_the_extract_columns() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "Received.csv", RECEIVED);
    let rows = read_stage_csv(&dir.path().join("Received.csv")).unwrap();

    let ids: Vec<&str> = rows.iter().map(|r| r.file_number.as_str()).collect();
    assert_eq!(ids, vec!["123", "124", "125"], "blank File # dropped, decimals normalised");

    let first = &rows[0];
    assert_eq!(first.agency_code().as_deref(), Some("2"));
    assert_eq!(first.charge().as_deref(), Some("100"));
    assert_eq!(first.sex.as_deref(), Some("M"));
    assert_eq!(first.offense_address.as_deref(), Some("1 Main St"));
    assert_eq!(first.year, Some(2023));

    assert_eq!(rows[1].agency, None);
    assert_eq!(rows[1].year, None, "blank Year");
    assert_eq!(rows[1].received_year(), Some(2023), "falls back to the entry date");
    assert_eq!(rows[2].year, None, "unparseable Year");
    assert_eq!(rows[2].received_year(), Some(2022));
}

#[test]
fn stage_directory_loads_all_four_tables() {
    let dir = tempfile::tempdir().unwrap();
    write_stage_dir(dir.path());
    let tables = StageTables::load_dir(dir.path()).unwrap();

    assert_eq!(tables.stage(Stage::Received).len(), 3);
    assert_eq!(tables.stage(Stage::NotFiled)[0].disposition().as_deref(), Some("7"));
    assert_eq!(tables.stage(Stage::Filed).len(), 1);
    assert!(tables.stage(Stage::Disposed).is_empty());
}

#[test]
fn missing_stage_table_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "Received.csv", RECEIVED);
    match StageTables::load_dir(dir.path()) {
        Err(BatchError::StageTable { path, .. }) => assert!(path.ends_with("NotFiled.csv"), "got {path}"),
        other => panic!("expected a stage table error, got {other:?}"),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Reference tables
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn reference_tables_normalise_keys_and_skip_blanks() {
    let dir = tempfile::tempdir().unwrap();
    write_reference_dir(dir.path());
    let refs = ReferenceData::load(dir.path(), &BatchConfig::default_test().reference).unwrap();

    assert_eq!(refs.charge_categories.len(), 2, "blank keys and labels skipped");
    assert_eq!(refs.category_of("100"), Some("Drugs"));
    assert_eq!(refs.category_of("200.0"), Some("Homicide"));
    assert_eq!(refs.refusal_reason("7"), Some("Insufficient Evidence"));
    assert_eq!(refs.disposition_reason("10"), Some("Dismissed"));
    assert_eq!(refs.agency_name("3"), Some("Independence PD"));
    assert_eq!(refs.categories(), vec!["Drugs", "Homicide"]);
}

#[test]
fn missing_reference_file_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    write_reference_dir(dir.path());
    fs::remove_file(dir.path().join("PD Agency.csv")).unwrap();

    match ReferenceData::load(dir.path(), &BatchConfig::default_test().reference) {
        Err(BatchError::ReferenceFile { path, .. }) => assert!(path.ends_with("PD Agency.csv"), "got {path}"),
        other => panic!("expected a reference file error, got {other:?}"),
    }
}

#[test]
fn missing_reference_column_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    write_reference_dir(dir.path());
    write(dir.path(), "ChargeCodeCategories.csv", "Code,Category\n100,Drugs\n");

    match ReferenceData::load(dir.path(), &BatchConfig::default_test().reference) {
        Err(BatchError::ReferenceFile { reason, .. }) => {
            assert!(reason.contains("missing column 'Ref. Charge Code'"), "got {reason}")
        }
        other => panic!("expected a reference file error, got {other:?}"),
    }
}

#[test]
fn side_tables_load_when_configured() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "JailInmateLibrary.csv", "File #,InmateNum\n123.0,J-1\n");
    write(dir.path(), "AllBonds.csv", "File #,Initial Bond\n123,\"$25,000.00\"\n124,n/a\n");
    write(dir.path(), "FiledFileNumbers.csv", "File #\nF9\n\n");
    write(dir.path(), "AllDisposedFileNumbers.csv", "File #\n123\n");
    write(dir.path(), "NotFiledCases.csv", "File #\n");

    let lookups = ExternalLookups::load(dir.path(), &BatchConfig::default().reference).unwrap();
    assert_eq!(lookups.inmates.get("123").map(String::as_str), Some("J-1"));
    assert_eq!(lookups.bonds.get("123"), Some(&25_000.0));
    assert!(!lookups.bonds.contains_key("124"), "unparseable amounts dropped");
    assert!(lookups.ever_filed.contains("F9"));
    assert!(lookups.all_disposed.contains("123"));
    assert!(lookups.all_not_filed.is_empty());
}

#[test]
fn side_tables_are_skipped_when_not_configured() {
    let dir = tempfile::tempdir().unwrap();
    let lookups = ExternalLookups::load(dir.path(), &BatchConfig::default_test().reference).unwrap();
    assert!(lookups.inmates.is_empty() && lookups.bonds.is_empty() && lookups.ever_filed.is_empty());
}

// ─────────────────────────────────────────────────────────────────────────────
// Data directory
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn data_dir_loads_without_a_history_archive() {
    let dir = tempfile::tempdir().unwrap();
    write_stage_dir(&dir.path().join("current"));
    write_reference_dir(&dir.path().join("reference"));

    let inputs = BatchInputs::load(dir.path(), &BatchConfig::default_test()).unwrap();
    assert_eq!(inputs.current.stage(Stage::Received).len(), 3);
    assert!(inputs.history.is_empty());
    assert_eq!(inputs.refs.categories(), vec!["Drugs", "Homicide"]);
}

#[test]
fn data_dir_reads_the_history_archive_when_present() {
    let dir = tempfile::tempdir().unwrap();
    write_stage_dir(&dir.path().join("current"));
    write_stage_dir(&dir.path().join("history"));
    write_reference_dir(&dir.path().join("reference"));

    let inputs = BatchInputs::load(dir.path(), &BatchConfig::default_test()).unwrap();
    assert_eq!(inputs.history.stage(Stage::Received).len(), 3);
    let consolidated = inputs.consolidated(2023);
    assert_eq!(
        consolidated.stage(Stage::Received).len(),
        4,
        "archived 2023 rows give way to the batch; the 2022 row stays"
    );
}
