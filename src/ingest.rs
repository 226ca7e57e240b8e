use crate::config::{PipelineConfig, PROGRESS_INTERVAL};
use crate::models::{City, DatasetId, DuplicateCandidate, RawFields};
use crate::reference::{Hierarchy, ReferenceTables};
use crate::report::{ErrorReporter, RecordError};
use crate::sink::Sink;
use crate::source::{self, RecordSource};
use crate::stats::PipelineStats;
use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use rustc_hash::FxHashSet;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Rows must have more than this many fields (population sits at index 14).
pub const MIN_CITY_FIELDS: usize = 16;

const GEONAME_ID: usize = 0;
const NAME: usize = 1;
const ALTERNATE_NAMES: usize = 3;
const LATITUDE: usize = 4;
const LONGITUDE: usize = 5;
const FEATURE_CLASS: usize = 6;
const FEATURE_CODE: usize = 7;
const COUNTRY_CODE: usize = 8;
const ADMIN1_CODE: usize = 10;
const ADMIN2_CODE: usize = 11;
const POPULATION: usize = 14;

/// Geoname ids seen during ingestion as the parent of a hierarchy edge.
///
/// Only [`ingest`] builds one, and only after the primary source is drained.
#[derive(Debug)]
pub struct ObservedParents(FxHashSet<String>);

impl ObservedParents {
    pub fn contains(&self, geoname_id: &str) -> bool {
        self.0.contains(geoname_id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
impl FromIterator<String> for ObservedParents {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        ObservedParents(iter.into_iter().collect())
    }
}

/// Result of a completed ingestion pass.
#[derive(Debug)]
pub struct IngestOutcome {
    pub candidates: Vec<DuplicateCandidate>,
    pub observed_parents: ObservedParents,
}

pub fn validate(fields: &RawFields) -> std::result::Result<(), RecordError> {
    if fields.len() < MIN_CITY_FIELDS {
        return Err(RecordError::validation(
            DatasetId::Cities,
            format!(
                "expected at least {MIN_CITY_FIELDS} fields, found {}",
                fields.len()
            ),
            fields.clone(),
        ));
    }
    Ok(())
}

fn parse_number<T: FromStr + Default>(
    fields: &RawFields,
    index: usize,
    name: &'static str,
    reporter: &ErrorReporter,
) -> T {
    let value = &fields[index];
    match value.parse() {
        Ok(n) => n,
        Err(_) => {
            reporter.report(RecordError::Parse {
                dataset: DatasetId::Cities,
                field: name,
                value: value.clone(),
                record: fields.clone(),
            });
            T::default()
        }
    }
}

/// Maps a validated row onto a [`City`]. Numeric fields that do not parse are
/// reported and left at zero; the row is kept.
pub fn parse_city(fields: RawFields, reporter: &ErrorReporter) -> City {
    let latitude = parse_number(&fields, LATITUDE, "latitude", reporter);
    let longitude = parse_number(&fields, LONGITUDE, "longitude", reporter);
    let population = parse_number(&fields, POPULATION, "population", reporter);

    let mut fields = fields;
    let mut take = |index: usize| std::mem::take(&mut fields[index]);

    City {
        geoname_id: take(GEONAME_ID),
        name: take(NAME),
        alternate_names: take(ALTERNATE_NAMES),
        f_class: take(FEATURE_CLASS),
        f_code: take(FEATURE_CODE),
        latitude,
        longitude,
        population,
        country_code: take(COUNTRY_CODE),
        administrative_code: take(ADMIN1_CODE),
        administrative2_code: take(ADMIN2_CODE),
        ..City::default()
    }
}

/// Decides which parsed rows count as cities.
#[derive(Debug, Clone)]
pub struct CityFilter {
    feature_class: String,
    ignored_codes: FxHashSet<String>,
}

impl CityFilter {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            feature_class: config.city_feature_class.clone(),
            ignored_codes: config.ignored_feature_codes.clone(),
        }
    }

    pub fn accepts(&self, city: &City) -> bool {
        city.population != 0
            && !self.ignored_codes.contains(&city.f_code)
            && city.f_class == self.feature_class
    }
}

/// Fills the join fields that have a match; the rest stay empty.
pub fn enrich(city: &mut City, tables: &ReferenceTables) {
    if let Some(name) = tables.country_name(&city.country_code) {
        city.country = name.to_string();
    }
    if let Some(name) = tables.admin1_name(&city.country_code, &city.administrative_code) {
        city.administrative = name.to_string();
    }
    if let Some(name) = tables.admin2_name(
        &city.country_code,
        &city.administrative_code,
        &city.administrative2_code,
    ) {
        city.administrative2 = name.to_string();
    }
    if let Some(code) = tables.postal_code(&city.country_code, &city.name, &city.administrative_code)
    {
        city.postal_code = code.to_string();
    }
}

#[derive(Debug, PartialEq)]
pub enum Classification {
    Emit(City),
    Candidate(DuplicateCandidate),
}

/// Per-record duplicate check against the hierarchy. Owns the observed-parent
/// set while the pass runs.
pub struct Classifier<'a> {
    hierarchy: &'a Hierarchy,
    observed: FxHashSet<String>,
}

impl<'a> Classifier<'a> {
    pub fn new(hierarchy: &'a Hierarchy) -> Self {
        Self {
            hierarchy,
            observed: FxHashSet::default(),
        }
    }

    pub fn classify(&mut self, city: City) -> Classification {
        if self.hierarchy.is_parent(&city.geoname_id) {
            self.observed.insert(city.geoname_id.clone());
        }
        match self.hierarchy.by_child(&city.geoname_id) {
            Some(edge) => Classification::Candidate(DuplicateCandidate {
                edge: edge.clone(),
                city,
            }),
            None => Classification::Emit(city),
        }
    }

    fn into_observed(self) -> ObservedParents {
        ObservedParents(self.observed)
    }
}

/// Runs the ingestion pass over `source`: each row is validated, parsed,
/// filtered, enriched from `tables` and classified. Non-candidate cities go to
/// `sink` straight away; hierarchy children are buffered as candidates.
///
/// Returns only after the reader thread has finished and every row has been
/// processed, so the returned [`ObservedParents`] is complete.
pub fn ingest<S: Sink>(
    source: RecordSource,
    tables: &ReferenceTables,
    config: &PipelineConfig,
    reporter: &ErrorReporter,
    stats: &PipelineStats,
    sink: &mut S,
) -> Result<IngestOutcome> {
    let filter = CityFilter::new(config);
    let mut classifier = Classifier::new(&tables.hierarchy);
    let mut candidates = Vec::new();
    let pb = make_spinner();

    let rows = source::drain(source, config.channel_capacity, reporter, |fields| {
        stats.inc_records();
        if stats.records() % PROGRESS_INTERVAL == 0 {
            pb.set_position(stats.records());
        }

        if let Err(e) = validate(&fields) {
            stats.inc_invalid();
            reporter.report(e);
            return Ok(());
        }

        let mut city = parse_city(fields, reporter);
        if !filter.accepts(&city) {
            stats.inc_filtered();
            return Ok(());
        }

        enrich(&mut city, tables);

        match classifier.classify(city) {
            Classification::Emit(city) => {
                stats.inc_emitted();
                sink.accept(city)?;
            }
            Classification::Candidate(candidate) => {
                stats.inc_candidates();
                candidates.push(candidate);
            }
        }
        Ok(())
    })?;

    let observed_parents = classifier.into_observed();
    pb.finish_with_message(format!(
        "{} emitted, {} candidates",
        stats.emitted(),
        candidates.len()
    ));
    info!(
        rows,
        emitted = stats.emitted(),
        candidates = candidates.len(),
        observed_parents = observed_parents.len(),
        "City ingestion complete"
    );

    Ok(IngestOutcome {
        candidates,
        observed_parents,
    })
}

fn make_spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("    {spinner:.cyan} cities       {pos} rows {msg}")
            .unwrap(),
    );
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}
