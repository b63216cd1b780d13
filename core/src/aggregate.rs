//! Aggregators: the dashboard tables of one category cohort.
//!
//! Each function takes the (already category-filtered) stage tables and
//! returns a `DashboardTable`: an ordered list of items, each with one
//! value per stage column. Counting is always over deduplicated rows.
//!
//! RULE: a row missing the field a table groups by is left out of that
//! table only, and the omission is tallied. It still counts everywhere
//! else.

use crate::{
    cohort::StageTables,
    config::BatchConfig,
    error::{DataIssue, IssueTally},
    histogram::{BinSpec, Histogram},
    outcome::{classify_cases, OutcomeSummary},
    record::{non_blank, CaseRow},
    reference::{ExternalLookups, ReferenceData},
    report::{ReportRow, StageValues},
    types::{CategoryFilter, Stage, Year},
};
use std::collections::{BTreeMap, BTreeSet, HashSet};

// ── Table names (the dashboard's dataSource column) ──────────────────────────

pub const CASES_BY_YEAR: &str = "CasesByYear";
pub const REFERRING_AGENCIES: &str = "ReferringAgencies";
pub const ATTORNEY: &str = "Attorney";
pub const RACE: &str = "RaceDemographics";
pub const GENDER: &str = "GenderDemographics";
pub const AGE: &str = "AgeDemographics";
pub const BONDS: &str = "Bonds";
pub const INCARCERATED: &str = "incarceratedByYear";
pub const TRIAL_CASES: &str = "TrialCases";
pub const TRIAL_OUTCOMES: &str = "TrialOutcomes";
pub const NON_TRIAL_OUTCOMES: &str = "NonTrialOutcomes";
pub const AGE_OF_CASE: &str = "AgeOfCase";
pub const DECLINED_AGE_OF_CASE: &str = "DeclinedAgeOfCase";
pub const DECLINE_REASONS: &str = "DeclineReasons";

// ── DashboardTable ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct DashboardTable {
    pub data_source: &'static str,
    pub rows: Vec<(String, StageValues)>,
}

impl DashboardTable {
    pub fn new(data_source: &'static str) -> Self {
        Self {
            data_source,
            rows: Vec::new(),
        }
    }

    pub fn row(&self, item: &str) -> Option<&StageValues> {
        self.rows.iter().find(|(i, _)| i == item).map(|(_, v)| v)
    }

    pub fn items(&self) -> Vec<&str> {
        self.rows.iter().map(|(i, _)| i.as_str()).collect()
    }

    pub fn to_report_rows(&self, year: Year, category: &CategoryFilter) -> Vec<ReportRow> {
        self.rows
            .iter()
            .map(|(item, values)| ReportRow::new(self.data_source, item.clone(), year, *values, category))
            .collect()
    }

    fn from_counts(data_source: &'static str, counts: BTreeMap<String, StageValues>) -> Self {
        Self {
            data_source,
            rows: counts.into_iter().collect(),
        }
    }

    fn from_histograms(data_source: &'static str, spec: BinSpec, hists: &[(Stage, Histogram)]) -> Self {
        let rows = spec
            .labels()
            .into_iter()
            .enumerate()
            .map(|(bin, label)| {
                let mut values = StageValues::default();
                for (stage, hist) in hists {
                    values.set(*stage, hist.counts.get(bin).copied().unwrap_or(0) as f64);
                }
                (label, values)
            })
            .collect();
        Self { data_source, rows }
    }
}

// ── Shared helpers ───────────────────────────────────────────────────────────

/// Count unique cases per item across `stages`. `key` yields the item or
/// the reason the row has none.
fn count_per_stage<F>(
    data_source: &'static str,
    tables: &StageTables,
    stages: &[Stage],
    tally: &mut IssueTally,
    key: F,
) -> DashboardTable
where
    F: Fn(&CaseRow) -> Result<String, DataIssue>,
{
    let mut counts: BTreeMap<String, StageValues> = BTreeMap::new();
    for &stage in stages {
        for row in tables.unique(stage) {
            match key(row) {
                Ok(item) => counts.entry(item).or_default().add(stage, 1.0),
                Err(issue) => tally.record(issue),
            }
        }
    }
    DashboardTable::from_counts(data_source, counts)
}

fn required(field: &Option<String>, name: &'static str) -> Result<String, DataIssue> {
    non_blank(field)
        .map(str::to_string)
        .ok_or(DataIssue::MissingField(name))
}

fn histogram_of<F>(
    tables: &StageTables,
    stage: Stage,
    spec: BinSpec,
    missing: DataIssue,
    tally: &mut IssueTally,
    value: F,
) -> Histogram
where
    F: Fn(&CaseRow) -> Option<f64>,
{
    let mut hist = Histogram::empty(spec);
    for row in tables.unique(stage) {
        match value(row) {
            Some(v) => hist.add(v),
            None => tally.record(missing),
        }
    }
    hist
}

// ── Count tables ─────────────────────────────────────────────────────────────

/// Unique cases per stage, as a single row keyed by the batch year.
pub fn case_numbers(tables: &StageTables, year: Year) -> DashboardTable {
    let mut values = StageValues::default();
    for stage in Stage::ALL {
        values.set(stage, tables.unique(stage).len() as f64);
    }
    DashboardTable {
        data_source: CASES_BY_YEAR,
        rows: vec![(year.to_string(), values)],
    }
}

pub fn referring_agencies(
    tables: &StageTables,
    refs: &ReferenceData,
    tally: &mut IssueTally,
) -> DashboardTable {
    count_per_stage(REFERRING_AGENCIES, tables, &Stage::ALL, tally, |row| {
        let code = row.agency_code().ok_or(DataIssue::MissingField("Agency"))?;
        refs.agency_name(&code)
            .map(str::to_string)
            .ok_or(DataIssue::UnmatchedReferenceKey("agency"))
    })
}

pub fn attorneys(tables: &StageTables, tally: &mut IssueTally) -> DashboardTable {
    count_per_stage(ATTORNEY, tables, &Stage::ALL, tally, |row| {
        required(&row.attorney, "Assigned Atty")
    })
}

pub fn race(tables: &StageTables, tally: &mut IssueTally) -> DashboardTable {
    count_per_stage(RACE, tables, &Stage::ALL, tally, |row| {
        required(&row.race, "Def. Race")
    })
}

/// Sex table. Codes in `excluded` ("U") are dropped from the output.
pub fn sex(tables: &StageTables, excluded: &[String], tally: &mut IssueTally) -> DashboardTable {
    let mut table = count_per_stage(GENDER, tables, &Stage::ALL, tally, |row| {
        required(&row.sex, "Def. Sex")
    });
    table.rows.retain(|(item, _)| !excluded.iter().any(|code| code == item));
    table
}

// ── Histogram tables ─────────────────────────────────────────────────────────

/// Defendant age in years at entry, per stage.
pub fn defendant_age(tables: &StageTables, spec: BinSpec, tally: &mut IssueTally) -> DashboardTable {
    let hists: Vec<(Stage, Histogram)> = Stage::ALL
        .iter()
        .map(|&stage| {
            let hist = histogram_of(
                tables,
                stage,
                spec,
                DataIssue::MissingField("Def. DOB"),
                tally,
                CaseRow::defendant_age_years,
            );
            (stage, hist)
        })
        .collect();
    DashboardTable::from_histograms(AGE, spec, &hists)
}

/// Initial bond in thousands of dollars, per stage.
/// `None` when no bond table was loaded.
pub fn bonds(
    tables: &StageTables,
    lookups: &ExternalLookups,
    spec: BinSpec,
    tally: &mut IssueTally,
) -> Option<DashboardTable> {
    if lookups.bonds.is_empty() {
        return None;
    }
    let hists: Vec<(Stage, Histogram)> = Stage::ALL
        .iter()
        .map(|&stage| {
            let hist = histogram_of(
                tables,
                stage,
                spec,
                DataIssue::UnmatchedReferenceKey("bond"),
                tally,
                |row| lookups.bonds.get(&row.file_number).map(|b| b / 1000.0),
            );
            (stage, hist)
        })
        .collect();
    Some(DashboardTable::from_histograms(BONDS, spec, &hists))
}

/// Months from entry to disposition of disposed cases.
pub fn disposal_age(tables: &StageTables, spec: BinSpec, tally: &mut IssueTally) -> DashboardTable {
    let hist = histogram_of(
        tables,
        Stage::Disposed,
        spec,
        DataIssue::MissingField("Disp. Dt."),
        tally,
        CaseRow::case_age_months,
    );
    DashboardTable::from_histograms(AGE_OF_CASE, spec, &[(Stage::Disposed, hist)])
}

/// Months from entry to refusal of declined cases.
pub fn declined_age(tables: &StageTables, spec: BinSpec, tally: &mut IssueTally) -> DashboardTable {
    let hist = histogram_of(
        tables,
        Stage::NotFiled,
        spec,
        DataIssue::MissingField("Disp. Dt."),
        tally,
        CaseRow::case_age_months,
    );
    DashboardTable::from_histograms(DECLINED_AGE_OF_CASE, spec, &[(Stage::NotFiled, hist)])
}

// ── Rates ────────────────────────────────────────────────────────────────────

/// Share of still-open cases whose defendant is in jail.
///
/// Cases already disposed or declined anywhere are left out of the base.
/// The numerator counts distinct inmates, so co-defendant cases sharing
/// one inmate count once. Returns 0 for an empty base.
pub fn incarceration_rate(cases: &[&CaseRow], lookups: &ExternalLookups) -> f64 {
    let open: Vec<&&CaseRow> = cases
        .iter()
        .filter(|row| {
            !lookups.all_disposed.contains(&row.file_number)
                && !lookups.all_not_filed.contains(&row.file_number)
        })
        .collect();
    if open.is_empty() {
        return 0.0;
    }
    let inmates: HashSet<&str> = open
        .iter()
        .filter_map(|row| lookups.inmates.get(&row.file_number).map(String::as_str))
        .collect();
    inmates.len() as f64 / open.len() as f64
}

/// Incarceration rate per stage, as one row keyed by the batch year.
/// `None` when no inmate table was loaded.
pub fn incarceration(
    tables: &StageTables,
    lookups: &ExternalLookups,
    year: Year,
) -> Option<DashboardTable> {
    if lookups.inmates.is_empty() {
        return None;
    }
    let mut values = StageValues::default();
    for stage in Stage::ALL {
        values.set(stage, incarceration_rate(&tables.unique(stage), lookups));
    }
    Some(DashboardTable {
        data_source: INCARCERATED,
        rows: vec![(year.to_string(), values)],
    })
}

// ── Outcome tables ───────────────────────────────────────────────────────────

/// Trial split, trial verdicts and non-trial outcomes of the disposed
/// table. Values sit in the Disposed column.
pub fn outcome_tables(tables: &StageTables, refs: &ReferenceData) -> [DashboardTable; 3] {
    let classified = classify_cases(tables.stage(Stage::Disposed), refs);
    let summary = OutcomeSummary::from_classifications(classified.values());
    let disposed_only = |name: &'static str, counts: &BTreeMap<String, u64>| DashboardTable {
        data_source: name,
        rows: counts
            .iter()
            .map(|(label, n)| (label.clone(), StageValues::only(Stage::Disposed, *n as f64)))
            .collect(),
    };
    [
        disposed_only(TRIAL_CASES, &summary.trial_split),
        disposed_only(TRIAL_OUTCOMES, &summary.trial_outcomes),
        disposed_only(NON_TRIAL_OUTCOMES, &summary.non_trial_outcomes),
    ]
}

/// Refusal reasons of declined cases, one count per distinct
/// (File #, code). Values sit in the Not-Filed column.
pub fn decline_reasons(
    tables: &StageTables,
    refs: &ReferenceData,
    tally: &mut IssueTally,
) -> DashboardTable {
    let mut seen: BTreeSet<(&str, String)> = BTreeSet::new();
    let mut counts: BTreeMap<String, StageValues> = BTreeMap::new();
    for row in tables.stage(Stage::NotFiled) {
        let Some(code) = row.disposition() else {
            tally.record(DataIssue::MissingField("Disp. Code"));
            continue;
        };
        if !seen.insert((row.file_number.as_str(), code.clone())) {
            continue;
        }
        match refs.refusal_reason(&code) {
            Some(label) => counts
                .entry(label.to_string())
                .or_default()
                .add(Stage::NotFiled, 1.0),
            None => tally.record(DataIssue::UnmatchedReferenceKey("refusal_reason")),
        }
    }
    DashboardTable::from_counts(DECLINE_REASONS, counts)
}

// ── Category run ─────────────────────────────────────────────────────────────

/// Every dashboard table of one category cohort, in emission order.
pub fn analyze_category(
    tables: &StageTables,
    refs: &ReferenceData,
    lookups: &ExternalLookups,
    config: &BatchConfig,
    year: Year,
    tally: &mut IssueTally,
) -> Vec<DashboardTable> {
    let hist = &config.histograms;
    let mut out = vec![
        case_numbers(tables, year),
        referring_agencies(tables, refs, tally),
        attorneys(tables, tally),
        race(tables, tally),
        sex(tables, &config.excluded_sex_codes, tally),
        defendant_age(tables, hist.defendant_age, tally),
    ];
    out.extend(bonds(tables, lookups, hist.bond_thousands, tally));
    out.extend(incarceration(tables, lookups, year));
    out.extend(outcome_tables(tables, refs));
    out.push(disposal_age(tables, hist.case_age_months, tally));
    out.push(declined_age(tables, hist.case_age_months, tally));
    out.push(decline_reasons(tables, refs, tally));
    out
}
