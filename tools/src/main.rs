//! docket-runner: headless dashboard batch runner.
//!
//! Usage:
//!   docket-runner --data-dir ./data --db dashboard.db
//!   docket-runner --data-dir ./data --year 2023 --output ./out --no-geocode
//!
//! Layout under --data-dir:
//!   config/batch.json   optional, production defaults otherwise
//!   current/            Received.csv, NotFiled.csv, Filed.csv, Disposed.csv
//!   history/            same four files for prior years (optional)
//!   reference/          lookup tables

use anyhow::Result;
use docket_core::{
    config::BatchConfig,
    geocode::LocationIqClient,
    pipeline::{infer_year, BatchInputs, BatchPipeline, BatchSummary},
    report::CsvReportWriter,
    store::DashboardStore,
};
use std::env;
use std::path::Path;

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let data_dir = flag_value(&args, "--data-dir").unwrap_or("./data");
    let db = flag_value(&args, "--db").unwrap_or("dashboard.db");
    let output = flag_value(&args, "--output");
    let year_arg = parse_arg(&args, "--year", 0i32);
    let no_geocode = args.iter().any(|a| a == "--no-geocode");

    let config = if Path::new(data_dir).join("config/batch.json").exists() {
        BatchConfig::load(data_dir)?
    } else {
        log::info!("no config/batch.json under {data_dir}, using defaults");
        BatchConfig::default()
    };

    let inputs = BatchInputs::load(Path::new(data_dir), &config)?;
    let year = if year_arg > 0 { year_arg } else { infer_year(&inputs.current)? };

    println!("Docket dashboard: batch runner");
    println!("  data_dir:  {data_dir}");
    println!("  db:        {db}");
    println!("  year:      {year}");
    println!("  output:    {}", output.unwrap_or("(store only)"));
    println!("  geocode:   {}", if no_geocode { "cache only" } else { "enabled" });
    println!();

    let store = DashboardStore::open(db)?;
    store.migrate()?;
    let run_id = format!("batch-{year}-{}", uuid::Uuid::new_v4());
    store.insert_run(&run_id, year, env!("CARGO_PKG_VERSION"))?;

    let mut pipeline = BatchPipeline::new(run_id, config.clone(), store);
    if let Some(dir) = output {
        pipeline.add_sink(Box::new(CsvReportWriter::new(dir)?));
    }
    if !no_geocode {
        match LocationIqClient::from_env(&config.geocoder)? {
            Some(client) => pipeline.set_geocoder(Box::new(client)),
            None => log::warn!(
                "{} is not set; only cached coordinates will be used",
                config.geocoder.api_key_env
            ),
        }
    }

    let summary = pipeline.run(inputs)?;
    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &BatchSummary) {
    println!("=== RUN SUMMARY ===");
    println!("  run_id:           {}", summary.run_id);
    println!("  year:             {}", summary.year);
    println!("  not-filed purged: {}", summary.not_filed_removed);
    println!("  categories:       {} analysed, {} skipped",
        summary.categories_analyzed.len(),
        summary.categories_skipped.len());
    println!("  report rows:      {}", summary.report_rows);
    println!("  flow cohorts:     {}", summary.flow_cohorts);
    println!("  addresses:        {} ({} geocoded, {} ungeocodable)",
        summary.addresses, summary.geocoded, summary.ungeocodable);
    println!("  hex cells:        {}", summary.hex_cells);
    if summary.sink_failures > 0 {
        println!("  failed sinks:     {} (see sink_failed events)", summary.sink_failures);
    }
    println!("  data issues:      {}", summary.issues.total());

    if !summary.issues.is_empty() {
        println!();
        println!("=== DATA ISSUES ===");
        for (issue, n) in summary.issues.counts() {
            println!("  {issue:<40} {n}");
        }
    }
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
