use crate::ingest::ObservedParents;
use crate::models::{DatasetId, DuplicateCandidate};
use crate::report::{ErrorReporter, RecordError};
use crate::sink::Sink;
use crate::stats::PipelineStats;
use anyhow::Result;
use tracing::info;

/// A candidate is a duplicate when its hierarchy parent turned up as a city
/// during ingestion; the parent record is kept and the child dropped.
pub fn is_duplicate(candidate: &DuplicateCandidate, observed: &ObservedParents) -> bool {
    observed.contains(&candidate.edge.parent)
}

/// Post-pass over the buffered candidates. Duplicates are reported and
/// dropped; the rest go to the sink.
///
/// Takes the observed-parent set the ingestion pass handed back, which only
/// exists once that pass has consumed the whole primary source.
pub fn resolve<S: Sink>(
    candidates: Vec<DuplicateCandidate>,
    observed: &ObservedParents,
    reporter: &ErrorReporter,
    stats: &PipelineStats,
    sink: &mut S,
) -> Result<()> {
    for candidate in candidates {
        if is_duplicate(&candidate, observed) {
            stats.inc_duplicates();
            reporter.report(RecordError::Duplicate {
                dataset: DatasetId::Cities,
                parent: candidate.edge.parent,
                city: Box::new(candidate.city),
            });
        } else {
            stats.inc_resolved();
            sink.accept(candidate.city)?;
        }
    }

    info!(
        resolved = stats.resolved(),
        duplicates = stats.duplicates(),
        "Duplicate resolution complete"
    );
    Ok(())
}
