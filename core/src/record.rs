//! Stage-table rows and the small parsing helpers every aggregate shares.
//!
//! Column names follow the standardised extract headers. Raw-extract
//! renaming happens upstream; this module only reads the cleaned files.

use crate::{
    error::{BatchError, BatchResult},
    types::{CaseId, Year},
};
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Days per month and per year as used by the dashboard's age arithmetic.
const DAYS_PER_MONTH: f64 = 30.436875;
const DAYS_PER_YEAR: f64 = 365.2425;

/// One charge row from a stage table. A case has one row per charge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaseRow {
    #[serde(rename = "File #")]
    pub file_number: CaseId,
    #[serde(rename = "Agency", default)]
    pub agency: Option<String>,
    #[serde(rename = "Ref. Charge Code", default)]
    pub charge_code: Option<String>,
    #[serde(rename = "Enter Dt.", default)]
    pub entered: Option<String>,
    #[serde(rename = "Disp. Dt.", default)]
    pub disposed_on: Option<String>,
    #[serde(rename = "Disp. Code", default)]
    pub disposition_code: Option<String>,
    #[serde(rename = "Activity", default)]
    pub activity: Option<String>,
    #[serde(rename = "Reason", default)]
    pub reason: Option<String>,
    #[serde(rename = "Def. Race", default)]
    pub race: Option<String>,
    #[serde(rename = "Def. Sex", default)]
    pub sex: Option<String>,
    #[serde(rename = "Def. DOB", default)]
    pub birth_date: Option<String>,
    #[serde(rename = "Assigned Atty", default)]
    pub attorney: Option<String>,
    #[serde(rename = "Offense Street Address", default)]
    pub offense_address: Option<String>,
    #[serde(rename = "Year", default, deserialize_with = "csv::invalid_option")]
    pub year: Option<Year>,
}

impl CaseRow {
    pub fn new(file_number: impl Into<CaseId>) -> Self {
        Self {
            file_number: file_number.into(),
            ..Self::default()
        }
    }

    pub fn agency_code(&self) -> Option<String> {
        non_blank(&self.agency).map(normalize_code)
    }

    pub fn charge(&self) -> Option<String> {
        non_blank(&self.charge_code).map(normalize_code)
    }

    pub fn disposition(&self) -> Option<String> {
        non_blank(&self.disposition_code).map(normalize_code)
    }

    pub fn entered_date(&self) -> Option<NaiveDate> {
        non_blank(&self.entered).and_then(parse_date)
    }

    pub fn disposed_date(&self) -> Option<NaiveDate> {
        non_blank(&self.disposed_on).and_then(parse_date)
    }

    pub fn dob(&self) -> Option<NaiveDate> {
        non_blank(&self.birth_date).and_then(parse_date)
    }

    /// Reporting year: the explicit `Year` column, else the entry date's year.
    pub fn received_year(&self) -> Option<Year> {
        self.year.or_else(|| self.entered_date().map(|d| d.year()))
    }

    /// Defendant age in years on the entry date.
    pub fn defendant_age_years(&self) -> Option<f64> {
        let dob = self.dob()?;
        let entered = self.entered_date()?;
        Some(days_between(dob, entered) / DAYS_PER_YEAR)
    }

    /// Months from entry to disposition.
    pub fn case_age_months(&self) -> Option<f64> {
        let entered = self.entered_date()?;
        let disposed = self.disposed_date()?;
        Some(days_between(entered, disposed) / DAYS_PER_MONTH)
    }
}

/// Trimmed field contents, `None` when absent or blank.
pub fn non_blank(field: &Option<String>) -> Option<&str> {
    field.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Codes exported through spreadsheets arrive as `"2.0"`; the key is `"2"`.
pub fn normalize_code(raw: &str) -> String {
    let trimmed = raw.trim();
    match trimmed.strip_suffix(".0") {
        Some(head) if !head.is_empty() && head.chars().all(|c| c.is_ascii_digit()) => {
            head.to_string()
        }
        _ => trimmed.to_string(),
    }
}

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    const DATE_FORMATS: [&str; 4] = ["%m/%d/%Y", "%Y-%m-%d", "%m/%d/%y", "%Y/%m/%d"];
    const DATETIME_FORMATS: [&str; 4] = [
        "%m/%d/%Y %H:%M",
        "%m/%d/%Y %H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
    ];
    let raw = raw.trim();
    DATE_FORMATS
        .iter()
        .find_map(|f| NaiveDate::parse_from_str(raw, f).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|f| NaiveDateTime::parse_from_str(raw, f).ok())
                .map(|dt| dt.date())
        })
}

fn days_between(start: NaiveDate, end: NaiveDate) -> f64 {
    (end - start).num_days() as f64
}

/// Read one cleaned stage extract. Rows with a blank `File #` are dropped.
pub fn read_stage_csv(path: &Path) -> BatchResult<Vec<CaseRow>> {
    let stage_err = |reason: String| BatchError::StageTable {
        path: path.display().to_string(),
        reason,
    };
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_path(path)
        .map_err(|e| stage_err(e.to_string()))?;

    let mut rows = Vec::new();
    let mut blank_keys = 0usize;
    for result in reader.deserialize::<CaseRow>() {
        let mut row = result.map_err(|e| stage_err(e.to_string()))?;
        row.file_number = normalize_code(&row.file_number);
        if row.file_number.is_empty() {
            blank_keys += 1;
            continue;
        }
        rows.push(row);
    }
    if blank_keys > 0 {
        log::warn!("{}: dropped {blank_keys} rows without a File #", path.display());
    }
    log::debug!("{}: {} rows", path.display(), rows.len());
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_lose_spreadsheet_decimal() {
        assert_eq!(normalize_code(" 2.0 "), "2");
        assert_eq!(normalize_code("570.0"), "570");
        assert_eq!(normalize_code("A12.0"), "A12.0");
        assert_eq!(normalize_code("13-1.0"), "13-1.0");
    }

    #[test]
    fn dates_parse_in_extract_formats() {
        let expected = NaiveDate::from_ymd_opt(2022, 3, 14);
        assert_eq!(parse_date("03/14/2022"), expected);
        assert_eq!(parse_date("2022-03-14"), expected);
        assert_eq!(parse_date("3/14/2022 10:30"), expected);
        assert_eq!(parse_date("not a date"), None);
    }

    #[test]
    fn case_age_is_measured_in_months() {
        let row = CaseRow {
            entered: Some("2022-01-01".into()),
            disposed_on: Some("2023-01-01".into()),
            ..CaseRow::new("F1")
        };
        let months = row.case_age_months().unwrap();
        assert!((months - 12.0).abs() < 0.05, "got {months}");
    }

    #[test]
    fn year_column_wins_over_entry_date() {
        let row = CaseRow {
            entered: Some("2021-12-30".into()),
            year: Some(2022),
            ..CaseRow::new("F1")
        };
        assert_eq!(row.received_year(), Some(2022));
        let row = CaseRow { year: None, ..row };
        assert_eq!(row.received_year(), Some(2021));
    }
}
