//! Report emitter: the dashboard's combined table and the sinks that
//! persist it.
//!
//! Every aggregate lands in one long table with the columns
//! (dataSource, Item, Year, Received, Not-Filed, Filed, Disposed,
//! caseCategory). A batch replaces the rows of its own year and leaves
//! earlier years untouched.

use crate::{
    error::BatchResult,
    flow::FlowResult,
    spatial::HexCount,
    types::{CategoryFilter, Stage, Year},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One value per stage column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StageValues([f64; 4]);

impl StageValues {
    pub fn get(&self, stage: Stage) -> f64 {
        self.0[stage.index()]
    }

    pub fn set(&mut self, stage: Stage, value: f64) {
        self.0[stage.index()] = value;
    }

    pub fn add(&mut self, stage: Stage, value: f64) {
        self.0[stage.index()] += value;
    }

    pub fn only(stage: Stage, value: f64) -> Self {
        let mut values = Self::default();
        values.set(stage, value);
        values
    }
}

/// A row of the combined dashboard table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRow {
    #[serde(rename = "dataSource")]
    pub data_source: String,
    #[serde(rename = "Item")]
    pub item: String,
    #[serde(rename = "Year")]
    pub year: Year,
    #[serde(rename = "Received")]
    pub received: f64,
    #[serde(rename = "Not-Filed")]
    pub not_filed: f64,
    #[serde(rename = "Filed")]
    pub filed: f64,
    #[serde(rename = "Disposed")]
    pub disposed: f64,
    #[serde(rename = "caseCategory")]
    pub case_category: String,
}

impl ReportRow {
    pub fn new(
        data_source: &str,
        item: impl Into<String>,
        year: Year,
        values: StageValues,
        category: &CategoryFilter,
    ) -> Self {
        Self {
            data_source: data_source.to_string(),
            item: item.into(),
            year,
            received: values.get(Stage::Received),
            not_filed: values.get(Stage::NotFiled),
            filed: values.get(Stage::Filed),
            disposed: values.get(Stage::Disposed),
            case_category: category.report_label(),
        }
    }

    pub fn value(&self, stage: Stage) -> f64 {
        match stage {
            Stage::Received => self.received,
            Stage::NotFiled => self.not_filed,
            Stage::Filed    => self.filed,
            Stage::Disposed => self.disposed,
        }
    }
}

/// Downstream persistence for a batch's outputs.
pub trait ReportSink {
    /// Short label for logs and events.
    fn name(&self) -> String;

    /// Replace every combined-table row of `year` with `rows`.
    fn replace_year_rows(&self, year: Year, rows: &[ReportRow]) -> BatchResult<()>;

    /// Persist the flow diagram of one (year, category) cohort.
    fn write_flow(&self, year: Year, category: &CategoryFilter, flow: &FlowResult)
        -> BatchResult<()>;

    /// Replace the hex counts of `year`.
    fn replace_hex_counts(&self, year: Year, counts: &[HexCount]) -> BatchResult<()>;
}

/// Flat-file sink: `CombinedData.csv`, one JSON file per flow diagram,
/// and `HexCounts.csv`, all under `dir`.
pub struct CsvReportWriter {
    dir: PathBuf,
}

impl CsvReportWriter {
    pub fn new(dir: impl Into<PathBuf>) -> BatchResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(dir.join("flows"))?;
        Ok(Self { dir })
    }

    pub fn combined_path(&self) -> PathBuf {
        self.dir.join("CombinedData.csv")
    }

    pub fn hex_path(&self) -> PathBuf {
        self.dir.join("HexCounts.csv")
    }

    pub fn flow_path(&self, year: Year, category: &CategoryFilter) -> PathBuf {
        self.dir
            .join("flows")
            .join(format!("{year} - {}.json", file_stem(category.label())))
    }

    fn read_existing<T: for<'de> Deserialize<'de>>(path: &Path) -> BatchResult<Vec<T>> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let mut reader = csv::Reader::from_path(path)?;
        let rows = reader.deserialize().collect::<Result<Vec<T>, _>>()?;
        Ok(rows)
    }

    fn write_all<T: Serialize>(path: &Path, rows: &[T]) -> BatchResult<()> {
        let mut writer = csv::Writer::from_path(path)?;
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// A category label made safe to use as a file name. Path separators and
/// other characters reserved on common filesystems become `_`.
pub fn file_stem(label: &str) -> String {
    let stem: String = label
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    match stem.trim_matches('.') {
        "" => "_".to_string(),
        _ => stem,
    }
}

impl ReportSink for CsvReportWriter {
    fn name(&self) -> String {
        format!("csv:{}", self.dir.display())
    }

    fn replace_year_rows(&self, year: Year, rows: &[ReportRow]) -> BatchResult<()> {
        let path = self.combined_path();
        let mut combined: Vec<ReportRow> = rows.to_vec();
        combined.extend(
            Self::read_existing::<ReportRow>(&path)?
                .into_iter()
                .filter(|r| r.year != year),
        );
        Self::write_all(&path, &combined)?;
        log::info!("{}: {} rows ({} for {year})", path.display(), combined.len(), rows.len());
        Ok(())
    }

    fn write_flow(
        &self,
        year: Year,
        category: &CategoryFilter,
        flow: &FlowResult,
    ) -> BatchResult<()> {
        let path = self.flow_path(year, category);
        std::fs::write(&path, serde_json::to_string_pretty(&flow.edges)?)?;
        log::debug!("{}: {} edges", path.display(), flow.edges.len());
        Ok(())
    }

    fn replace_hex_counts(&self, year: Year, counts: &[HexCount]) -> BatchResult<()> {
        let path = self.hex_path();
        let mut all: Vec<HexCount> = counts.to_vec();
        all.extend(
            Self::read_existing::<HexCount>(&path)?
                .into_iter()
                .filter(|c| c.year != year),
        );
        Self::write_all(&path, &all)
    }
}
