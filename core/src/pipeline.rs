//! The batch pipeline: one dashboard refresh, start to finish.
//!
//! EXECUTION ORDER (fixed, never reordered):
//!   1. Not-filed cleanup   (drop cases filed in any year)
//!   2. Category aggregates ("All" first, then each category, sorted)
//!   3. Consolidated history (flow per (year, category) over all years)
//!   4. Geocoding            (cache first, then the geocoder)
//!   5. Hex binning          (per category and stage of the batch year)
//!   6. Persist              (store, then every extra sink)
//!
//! A store failure stops the run. A failing extra sink is logged and
//! recorded as an event; the run still completes.
//!
//! RULES:
//!   - Reference data is loaded once and only ever borrowed.
//!   - Each step returns new values; nothing is mutated in place after
//!     step 1.
//!   - Every decision is recorded in the event log.

use crate::{
    aggregate::analyze_category,
    cohort::{exclude_ever_filed, filter_category, history_years, received_cohort, StageTables},
    config::BatchConfig,
    error::{BatchError, BatchResult, IssueTally},
    event::{BatchEvent, EventLogEntry},
    flow::{FlowReconciler, FlowResult},
    geocode::{case_address, geocode_addresses, Geocoder},
    reference::{ExternalLookups, ReferenceData},
    report::{ReportRow, ReportSink},
    spatial::{bin_cases, HexCount, HexGrid},
    store::DashboardStore,
    types::{CategoryFilter, RunId, Stage, Year},
};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::Path;

/// Everything a run reads.
#[derive(Debug, Clone, Default)]
pub struct BatchInputs {
    /// This batch's stage extracts.
    pub current: StageTables,
    /// Consolidated prior-years archive. May be empty.
    pub history: StageTables,
    pub refs: ReferenceData,
    pub lookups: ExternalLookups,
}

impl BatchInputs {
    /// Read `{data_dir}/current`, `{data_dir}/history` (optional) and
    /// `{data_dir}/reference`.
    pub fn load(data_dir: &Path, config: &BatchConfig) -> BatchResult<Self> {
        let reference_dir = data_dir.join("reference");
        let history_dir = data_dir.join("history");
        let history = if history_dir.is_dir() {
            StageTables::load_dir(&history_dir)?
        } else {
            log::info!("no history archive at {}", history_dir.display());
            StageTables::default()
        };
        Ok(Self {
            current: StageTables::load_dir(&data_dir.join("current"))?,
            history,
            refs: ReferenceData::load(&reference_dir, &config.reference)?,
            lookups: ExternalLookups::load(&reference_dir, &config.reference)?,
        })
    }

    /// Prior years of the archive followed by the current batch, stage by
    /// stage. Archive rows reporting `year` are superseded by the batch.
    pub fn consolidated(&self, year: Year) -> StageTables {
        let mut all = StageTables::default();
        let mut superseded = 0usize;
        for stage in Stage::ALL {
            let rows = all.stage_mut(stage);
            for row in self.history.stage(stage) {
                if row.received_year() == Some(year) {
                    superseded += 1;
                } else {
                    rows.push(row.clone());
                }
            }
            rows.extend(self.current.stage(stage).iter().cloned());
        }
        if superseded > 0 {
            log::info!("history: {superseded} archived rows of {year} replaced by the batch");
        }
        all
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
    pub run_id: RunId,
    pub year: Year,
    pub not_filed_removed: usize,
    pub categories_analyzed: Vec<String>,
    pub categories_skipped: Vec<String>,
    pub report_rows: usize,
    pub flow_cohorts: usize,
    pub addresses: usize,
    pub geocoded: usize,
    pub ungeocodable: usize,
    pub hex_cells: usize,
    /// Extra sinks that could not be written. The store is never counted
    /// here; a store failure stops the run.
    pub sink_failures: usize,
    pub issues: IssueTally,
}

/// What step 6 hands to every sink.
struct BatchOutputs<'a> {
    year: Year,
    report_rows: &'a [ReportRow],
    hex_counts: &'a [HexCount],
    flows: &'a [(Year, CategoryFilter, FlowResult)],
}

impl BatchOutputs<'_> {
    fn write_to(&self, sink: &dyn ReportSink) -> BatchResult<()> {
        sink.replace_year_rows(self.year, self.report_rows)?;
        sink.replace_hex_counts(self.year, self.hex_counts)?;
        for (flow_year, filter, result) in self.flows {
            sink.write_flow(*flow_year, filter, result)?;
        }
        Ok(())
    }
}

pub struct BatchPipeline {
    pub run_id: RunId,
    config: BatchConfig,
    store: DashboardStore,
    sinks: Vec<Box<dyn ReportSink>>,
    geocoder: Option<Box<dyn Geocoder>>,
    seq: u64,
}

impl BatchPipeline {
    /// The run must already be registered with `store.insert_run`.
    pub fn new(run_id: RunId, config: BatchConfig, store: DashboardStore) -> Self {
        Self {
            run_id,
            config,
            store,
            sinks: Vec::new(),
            geocoder: None,
            seq: 0,
        }
    }

    /// Extra destination for the outputs, written after the store.
    pub fn add_sink(&mut self, sink: Box<dyn ReportSink>) {
        self.sinks.push(sink);
    }

    /// Without a geocoder only cached coordinates are used.
    pub fn set_geocoder(&mut self, geocoder: Box<dyn Geocoder>) {
        self.geocoder = Some(geocoder);
    }

    pub fn store(&self) -> &DashboardStore {
        &self.store
    }

    pub fn run(&mut self, mut inputs: BatchInputs) -> BatchResult<BatchSummary> {
        let year = self.store.run_year(&self.run_id)?;
        let mut summary = BatchSummary {
            run_id: self.run_id.clone(),
            year,
            ..BatchSummary::default()
        };
        self.emit("pipeline", &BatchEvent::RunStarted {
            run_id: self.run_id.clone(),
            year,
            stage_rows: inputs.current.row_count(),
        })?;

        // 1. Not-filed cleanup
        summary.not_filed_removed = exclude_ever_filed(&mut inputs.current, &inputs.lookups.ever_filed);
        if summary.not_filed_removed > 0 {
            log::info!("dropped {} not-filed rows filed in another year", summary.not_filed_removed);
        }
        self.emit("cleanup", &BatchEvent::NotFiledCleaned {
            removed_rows: summary.not_filed_removed,
        })?;

        let filters = category_filters(&inputs.refs);

        // 2. Category aggregates
        let mut report_rows: Vec<ReportRow> = Vec::new();
        let mut cohorts: Vec<(CategoryFilter, StageTables)> = Vec::new();
        for filter in &filters {
            let mut tally = IssueTally::default();
            let Some(tables) = filter_category(&inputs.current, &inputs.refs, filter, &mut tally) else {
                log::info!("category '{filter}': no cases, skipped");
                summary.categories_skipped.push(filter.label().to_string());
                self.emit("aggregate", &BatchEvent::CategorySkipped {
                    category: filter.label().to_string(),
                })?;
                continue;
            };

            let dashboard = analyze_category(
                &tables,
                &inputs.refs,
                &inputs.lookups,
                &self.config,
                year,
                &mut tally,
            );
            let before = report_rows.len();
            for table in &dashboard {
                report_rows.extend(table.to_report_rows(year, filter));
            }
            log::info!(
                "category '{filter}': {} tables, {} rows",
                dashboard.len(),
                report_rows.len() - before
            );
            self.emit("aggregate", &BatchEvent::CategoryAnalyzed {
                category: filter.label().to_string(),
                tables: dashboard.len(),
                rows: report_rows.len() - before,
            })?;
            if !tally.is_empty() {
                log::debug!("category '{filter}': {} data issues", tally.total());
                self.emit("aggregate", &BatchEvent::DataIssues {
                    category: filter.label().to_string(),
                    tally: tally.clone(),
                })?;
            }
            summary.issues.merge(&tally);
            summary.categories_analyzed.push(filter.label().to_string());
            cohorts.push((filter.clone(), tables));
        }

        // 3. Consolidated history
        let consolidated = inputs.consolidated(year);
        let reconciler = FlowReconciler::new(&consolidated, &inputs.refs);
        let mut flows = Vec::new();
        for flow_year in history_years(consolidated.stage(Stage::Received)) {
            for filter in &filters {
                let received = received_cohort(
                    consolidated.stage(Stage::Received),
                    &inputs.refs,
                    filter,
                    flow_year,
                );
                if received.is_empty() {
                    continue;
                }
                let result = reconciler.run(&received);
                let f = &result.flow;
                if !f.disposed_unfiled.is_empty() {
                    log::warn!(
                        "{flow_year} '{filter}': {} disposed cases never filed, left out of the flow",
                        f.disposed_unfiled.len()
                    );
                }
                self.emit("flow", &BatchEvent::FlowComputed {
                    year: flow_year,
                    category: filter.label().to_string(),
                    received: f.received.len(),
                    declined: f.declined.len(),
                    under_review: f.under_review.len(),
                    filed: f.filed.len(),
                    active: f.active.len(),
                    disposed: f.disposed.len(),
                    disposed_unfiled: f.disposed_unfiled.len(),
                })?;
                summary.issues.merge(&result.issues);
                flows.push((flow_year, filter.clone(), result));
            }
        }
        summary.flow_cohorts = flows.len();
        log::info!("consolidated history: {} cohorts", flows.len());

        // 4. Geocoding
        let addresses: BTreeSet<String> = Stage::ALL
            .iter()
            .flat_map(|&stage| inputs.current.unique(stage))
            .filter_map(case_address)
            .collect();
        summary.addresses = addresses.len();
        let geocoded = geocode_addresses(
            self.geocoder.as_deref(),
            &self.store,
            &self.config.geocoder,
            &addresses,
        )?;
        summary.geocoded = geocoded.resolved;
        summary.ungeocodable = geocoded.ungeocodable;
        for event in &geocoded.events {
            self.emit("geocode", event)?;
        }

        // 5. Hex binning
        let grid = HexGrid::new(&self.config.hex_grid);
        let mut hex_counts: Vec<HexCount> = Vec::new();
        for (filter, tables) in &cohorts {
            for stage in Stage::ALL {
                hex_counts.extend(bin_cases(
                    &grid,
                    &tables.unique(stage),
                    &geocoded.coordinates,
                    year,
                    filter,
                    stage,
                ));
            }
        }
        summary.hex_cells = hex_counts.len();

        // 6. Persist
        summary.report_rows = report_rows.len();
        let outputs = BatchOutputs {
            year,
            report_rows: &report_rows,
            hex_counts: &hex_counts,
            flows: &flows,
        };
        outputs.write_to(&self.store)?;
        let mut failures = Vec::new();
        for sink in &self.sinks {
            if let Err(e) = outputs.write_to(&**sink) {
                log::error!("sink '{}' failed: {e}", sink.name());
                failures.push(BatchEvent::SinkFailed {
                    sink: sink.name(),
                    reason: e.to_string(),
                });
            }
        }
        summary.sink_failures = failures.len();
        for event in &failures {
            self.emit("persist", event)?;
        }

        self.emit("pipeline", &BatchEvent::RunCompleted {
            report_rows: summary.report_rows,
            flow_cohorts: summary.flow_cohorts,
            hex_cells: summary.hex_cells,
        })?;
        Ok(summary)
    }

    fn emit(&mut self, step: &str, event: &BatchEvent) -> BatchResult<()> {
        let entry = EventLogEntry {
            id:         None,
            run_id:     self.run_id.clone(),
            seq:        self.seq,
            step:       step.to_string(),
            event_type: event.event_type_name().to_string(),
            payload:    serde_json::to_string(event)?,
        };
        self.seq += 1;
        self.store.append_event(&entry)
    }
}

/// "All" followed by every category label of the reference map, sorted.
pub fn category_filters(refs: &ReferenceData) -> Vec<CategoryFilter> {
    std::iter::once(CategoryFilter::All)
        .chain(refs.categories().into_iter().map(CategoryFilter::Category))
        .collect()
}

/// The batch year when none is given: the most common reporting year of
/// the current received table.
pub fn infer_year(current: &StageTables) -> BatchResult<Year> {
    crate::cohort::batch_year(current).ok_or_else(|| {
        BatchError::StageTable {
            path: "Received.csv".to_string(),
            reason: "no row carries a reporting year".to_string(),
        }
    })
}
