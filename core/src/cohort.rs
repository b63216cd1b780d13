//! Cohort builder.
//!
//! Holds the four stage tables of a batch, deduplicates them to one row
//! per `File #`, and narrows them to a charge category. Counting always
//! happens on deduplicated rows: a case with five charges counts once.

use crate::{
    error::{BatchResult, DataIssue, IssueTally},
    record::{read_stage_csv, CaseRow},
    reference::ReferenceData,
    types::{CaseId, CategoryFilter, Stage, Year},
};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;

/// File name of each stage extract inside a batch directory.
pub fn stage_file_name(stage: Stage) -> &'static str {
    match stage {
        Stage::Received => "Received.csv",
        Stage::NotFiled => "NotFiled.csv",
        Stage::Filed    => "Filed.csv",
        Stage::Disposed => "Disposed.csv",
    }
}

/// The four stage tables, indexed by [`Stage`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageTables {
    tables: [Vec<CaseRow>; 4],
}

impl StageTables {
    pub fn new(
        received: Vec<CaseRow>,
        not_filed: Vec<CaseRow>,
        filed: Vec<CaseRow>,
        disposed: Vec<CaseRow>,
    ) -> Self {
        Self {
            tables: [received, not_filed, filed, disposed],
        }
    }

    /// Read `Received.csv`, `NotFiled.csv`, `Filed.csv`, `Disposed.csv` from `dir`.
    pub fn load_dir(dir: &Path) -> BatchResult<Self> {
        let mut tables = Self::default();
        for stage in Stage::ALL {
            tables.tables[stage.index()] = read_stage_csv(&dir.join(stage_file_name(stage)))?;
        }
        Ok(tables)
    }

    pub fn stage(&self, stage: Stage) -> &[CaseRow] {
        &self.tables[stage.index()]
    }

    pub fn stage_mut(&mut self, stage: Stage) -> &mut Vec<CaseRow> {
        &mut self.tables[stage.index()]
    }

    /// True when every stage table is empty.
    pub fn is_empty(&self) -> bool {
        self.tables.iter().all(Vec::is_empty)
    }

    pub fn row_count(&self) -> usize {
        self.tables.iter().map(Vec::len).sum()
    }

    /// Distinct `File #`s in one stage table.
    pub fn file_ids(&self, stage: Stage) -> BTreeSet<CaseId> {
        self.stage(stage)
            .iter()
            .map(|r| r.file_number.clone())
            .collect()
    }

    /// One row per case for a stage, first occurrence wins.
    pub fn unique(&self, stage: Stage) -> Vec<&CaseRow> {
        dedup_by_file(self.stage(stage))
    }
}

/// Keep the first row of each `File #`, preserving input order.
pub fn dedup_by_file(rows: &[CaseRow]) -> Vec<&CaseRow> {
    let mut seen: HashSet<&str> = HashSet::with_capacity(rows.len());
    rows.iter()
        .filter(|row| seen.insert(row.file_number.as_str()))
        .collect()
}

/// All rows of each case, keyed by `File #` in sorted order.
pub fn rows_by_case(rows: &[CaseRow]) -> BTreeMap<&str, Vec<&CaseRow>> {
    let mut grouped: BTreeMap<&str, Vec<&CaseRow>> = BTreeMap::new();
    for row in rows {
        grouped.entry(row.file_number.as_str()).or_default().push(row);
    }
    grouped
}

/// Drop not-filed rows for cases that were filed in any year.
/// Returns the number of rows removed.
pub fn exclude_ever_filed(tables: &mut StageTables, ever_filed: &HashSet<CaseId>) -> usize {
    if ever_filed.is_empty() {
        return 0;
    }
    let not_filed = tables.stage_mut(Stage::NotFiled);
    let before = not_filed.len();
    not_filed.retain(|row| !ever_filed.contains(&row.file_number));
    before - not_filed.len()
}

/// Does this row's charge fall under `filter`? Records why a row is
/// excluded when its charge cannot be resolved.
fn row_in_category(
    row: &CaseRow,
    refs: &ReferenceData,
    filter: &CategoryFilter,
    tally: &mut IssueTally,
) -> bool {
    if matches!(filter, CategoryFilter::All) {
        return true;
    }
    let Some(code) = row.charge() else {
        tally.record(DataIssue::MissingField("Ref. Charge Code"));
        return false;
    };
    match refs.category_of(&code) {
        Some(category) => filter.matches(Some(category)),
        None => {
            tally.record(DataIssue::UnmatchedReferenceKey("charge_category"));
            false
        }
    }
}

/// Narrow every stage table to one charge category.
///
/// Returns `None` when the category has no rows in any of the four
/// tables; the caller skips that category entirely.
pub fn filter_category(
    tables: &StageTables,
    refs: &ReferenceData,
    filter: &CategoryFilter,
    tally: &mut IssueTally,
) -> Option<StageTables> {
    let mut filtered = StageTables::default();
    for stage in Stage::ALL {
        filtered.tables[stage.index()] = tables
            .stage(stage)
            .iter()
            .filter(|row| row_in_category(row, refs, filter, tally))
            .cloned()
            .collect();
    }
    if filtered.is_empty() {
        None
    } else {
        Some(filtered)
    }
}

/// `File #`s received in `year` whose charge falls under `filter`.
pub fn received_cohort(
    received: &[CaseRow],
    refs: &ReferenceData,
    filter: &CategoryFilter,
    year: Year,
) -> BTreeSet<CaseId> {
    let mut ignored = IssueTally::default();
    received
        .iter()
        .filter(|row| row.received_year() == Some(year))
        .filter(|row| row_in_category(row, refs, filter, &mut ignored))
        .map(|row| row.file_number.clone())
        .collect()
}

/// Every reporting year present in a received table, ascending.
pub fn history_years(received: &[CaseRow]) -> Vec<Year> {
    received
        .iter()
        .filter_map(CaseRow::received_year)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// The batch year: the most common reporting year in the received table.
pub fn batch_year(tables: &StageTables) -> Option<Year> {
    let mut counts: BTreeMap<Year, usize> = BTreeMap::new();
    for row in tables.stage(Stage::Received) {
        if let Some(year) = row.received_year() {
            *counts.entry(year).or_insert(0) += 1;
        }
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)))
        .map(|(year, _)| year)
}
