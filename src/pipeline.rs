use crate::config::{DatasetPaths, PipelineConfig};
use crate::dedup;
use crate::ingest;
use crate::models::DatasetId;
use crate::reference;
use crate::report::{self, ErrorSummary};
use crate::sink::{Sink, SinkReport};
use crate::source::RecordSource;
use crate::stats::{PipelineStats, StatsSnapshot};
use anyhow::{bail, Result};
use std::time::{Duration, Instant};
use tracing::info;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableSizes {
    pub admin1: usize,
    pub admin2: usize,
    pub countries: usize,
    pub postal_codes: usize,
    pub hierarchy_edges: usize,
}

/// Everything a finished run reports.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub tables: TableSizes,
    pub stats: StatsSnapshot,
    pub sink: SinkReport,
    pub errors: ErrorSummary,
    pub loading_time: Duration,
    pub ingestion_time: Duration,
    pub total_time: Duration,
}

/// Runs the import over local dataset files:
///
/// 1. load the five reference tables concurrently and wait for all of them
/// 2. stream the primary place file, emitting non-candidates as they come
/// 3. resolve the buffered duplicate candidates
/// 4. close the sink, waiting for it to drain, then drain the error reporter
///
/// Only infrastructure failures (unreadable datasets, a dead sink) return an
/// error; record-level problems end up in [`RunSummary::errors`].
pub fn run<S: Sink>(paths: &DatasetPaths, config: &PipelineConfig, mut sink: S) -> Result<RunSummary> {
    let start = Instant::now();
    let (reporter, error_log) = report::spawn(config.rejects_path.as_deref())?;
    let stats = PipelineStats::new();

    info!("Loading reference tables");
    let tables = reference::load_all(paths, config, &reporter)?;
    let loading_time = start.elapsed();
    let sizes = TableSizes {
        admin1: tables.admin1.len(),
        admin2: tables.admin2.len(),
        countries: tables.countries.len(),
        postal_codes: tables.postal_codes.len(),
        hierarchy_edges: tables.hierarchy.len(),
    };

    info!("Ingesting cities");
    let ingest_start = Instant::now();
    let source = RecordSource::open(DatasetId::Cities, &paths.cities)?;
    let outcome = ingest::ingest(source, &tables, config, &reporter, &stats, &mut sink)?;

    dedup::resolve(
        outcome.candidates,
        &outcome.observed_parents,
        &reporter,
        &stats,
        &mut sink,
    )?;
    let ingestion_time = ingest_start.elapsed();

    let sink_report = sink.close()?;
    let errors = error_log.finish(reporter)?;

    if sink_report.failed_batches > 0 {
        bail!(
            "{} of {} sink batches failed",
            sink_report.failed_batches,
            sink_report.batches + sink_report.failed_batches
        );
    }

    Ok(RunSummary {
        tables: sizes,
        stats: stats.snapshot(),
        sink: sink_report,
        errors,
        loading_time,
        ingestion_time,
        total_time: start.elapsed(),
    })
}
