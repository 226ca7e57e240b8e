use crate::config::{DatasetPaths, PipelineConfig, PROGRESS_INTERVAL};
use crate::models::{AdminRegion, Country, DatasetId, HierarchyEdge, PostalCodeEntry, RawFields};
use crate::report::{ErrorReporter, RecordError};
use crate::source::{self, RecordSource};
use anyhow::{anyhow, Result};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use rustc_hash::FxHashMap;
use std::collections::hash_map::Entry;
use std::thread::{self, ScopedJoinHandle};
use std::time::Duration;
use tracing::info;

const ADMIN_MIN_FIELDS: usize = 2;
const COUNTRY_MIN_FIELDS: usize = 5;
const POSTAL_CODE_MIN_FIELDS: usize = 5;
const HIERARCHY_MIN_FIELDS: usize = 2;

const COMMENT_MARKER: &str = "#";

pub fn admin1_key(country_code: &str, admin1_code: &str) -> String {
    format!("{country_code}.{admin1_code}")
}

pub fn admin2_key(country_code: &str, admin1_code: &str, admin2_code: &str) -> String {
    format!("{country_code}.{admin1_code}.{admin2_code}")
}

/// Postal codes are looked up by place *name*, not by any postal identifier.
pub fn postal_code_key(country_code: &str, name: &str, admin1_code: &str) -> String {
    format!("{country_code}.{name}.{admin1_code}")
}

/// Parent/child edges indexed both ways. A geoname id appearing in several
/// edges keeps only the last one read, in each index.
#[derive(Debug, Default)]
pub struct Hierarchy {
    child_index: FxHashMap<String, HierarchyEdge>,
    parent_index: FxHashMap<String, HierarchyEdge>,
    edges: usize,
}

impl Hierarchy {
    pub fn insert(&mut self, edge: HierarchyEdge) {
        self.edges += 1;
        self.parent_index.insert(edge.parent.clone(), edge.clone());
        self.child_index.insert(edge.child.clone(), edge);
    }

    pub fn by_child(&self, geoname_id: &str) -> Option<&HierarchyEdge> {
        self.child_index.get(geoname_id)
    }

    pub fn by_parent(&self, geoname_id: &str) -> Option<&HierarchyEdge> {
        self.parent_index.get(geoname_id)
    }

    pub fn is_parent(&self, geoname_id: &str) -> bool {
        self.parent_index.contains_key(geoname_id)
    }

    /// Edges read, including ones later shadowed in an index.
    pub fn len(&self) -> usize {
        self.edges
    }

    pub fn is_empty(&self) -> bool {
        self.edges == 0
    }

    /// Distinct geoname ids that are the child of some edge.
    pub fn children(&self) -> usize {
        self.child_index.len()
    }
}

impl FromIterator<HierarchyEdge> for Hierarchy {
    fn from_iter<I: IntoIterator<Item = HierarchyEdge>>(iter: I) -> Self {
        let mut hierarchy = Hierarchy::default();
        for edge in iter {
            hierarchy.insert(edge);
        }
        hierarchy
    }
}

/// Postal codes keyed by [`postal_code_key`]; the first entry seen for a key wins.
#[derive(Debug, Default)]
pub struct PostalCodes(FxHashMap<String, PostalCodeEntry>);

impl PostalCodes {
    /// Returns false when the key was already taken.
    pub fn insert(&mut self, entry: PostalCodeEntry) -> bool {
        let key = postal_code_key(&entry.country, &entry.name, &entry.admin1_code);
        match self.0.entry(key) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(entry);
                true
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&PostalCodeEntry> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Lookup tables joined onto each city. Built once by [`load_all`], read-only afterwards.
#[derive(Debug, Default)]
pub struct ReferenceTables {
    pub admin1: FxHashMap<String, AdminRegion>,
    pub admin2: FxHashMap<String, AdminRegion>,
    pub countries: FxHashMap<String, Country>,
    pub postal_codes: PostalCodes,
    pub hierarchy: Hierarchy,
}

impl ReferenceTables {
    pub fn country_name(&self, country_code: &str) -> Option<&str> {
        self.countries.get(country_code).map(|c| c.name.as_str())
    }

    pub fn admin1_name(&self, country_code: &str, admin1_code: &str) -> Option<&str> {
        self.admin1
            .get(&admin1_key(country_code, admin1_code))
            .map(|a| a.name.as_str())
    }

    pub fn admin2_name(
        &self,
        country_code: &str,
        admin1_code: &str,
        admin2_code: &str,
    ) -> Option<&str> {
        self.admin2
            .get(&admin2_key(country_code, admin1_code, admin2_code))
            .map(|a| a.name.as_str())
    }

    pub fn postal_code(&self, country_code: &str, name: &str, admin1_code: &str) -> Option<&str> {
        self.postal_codes
            .get(&postal_code_key(country_code, name, admin1_code))
            .map(|p| p.postal_code.as_str())
    }
}

fn require_fields(
    dataset: DatasetId,
    fields: &RawFields,
    min: usize,
) -> std::result::Result<(), RecordError> {
    if fields.len() < min {
        return Err(RecordError::validation(
            dataset,
            format!("expected at least {min} fields, found {}", fields.len()),
            fields.clone(),
        ));
    }
    Ok(())
}

/// Admin1 and admin2 rows share a layout: composite code, then name.
pub fn parse_admin(
    dataset: DatasetId,
    fields: RawFields,
) -> std::result::Result<AdminRegion, RecordError> {
    require_fields(dataset, &fields, ADMIN_MIN_FIELDS)?;
    let mut fields = fields.into_iter();
    Ok(AdminRegion {
        code: fields.next().unwrap_or_default(),
        name: fields.next().unwrap_or_default(),
    })
}

pub fn parse_country(fields: RawFields) -> std::result::Result<Country, RecordError> {
    let dataset = DatasetId::Country;
    require_fields(dataset, &fields, COUNTRY_MIN_FIELDS)?;
    if fields[0].starts_with(COMMENT_MARKER) {
        return Err(RecordError::validation(dataset, "comment line", fields));
    }
    Ok(Country {
        iso_code: fields[0].clone(),
        name: fields[4].clone(),
    })
}

pub fn parse_postal_code(fields: RawFields) -> std::result::Result<PostalCodeEntry, RecordError> {
    require_fields(DatasetId::PostalCode, &fields, POSTAL_CODE_MIN_FIELDS)?;
    Ok(PostalCodeEntry {
        country: fields[0].clone(),
        postal_code: fields[1].clone(),
        name: fields[2].clone(),
        admin1_code: fields[4].clone(),
    })
}

pub fn parse_edge(fields: RawFields) -> std::result::Result<HierarchyEdge, RecordError> {
    require_fields(DatasetId::Hierarchy, &fields, HIERARCHY_MIN_FIELDS)?;
    Ok(HierarchyEdge {
        parent: fields[0].clone(),
        child: fields[1].clone(),
    })
}

/// Streams `source` into a table: each row goes through `parse`, valid
/// entities through `insert`, invalid rows to the reporter.
pub fn load<T, P, I>(
    source: RecordSource,
    config: &PipelineConfig,
    reporter: &ErrorReporter,
    pb: &ProgressBar,
    parse: P,
    mut insert: I,
) -> Result<u64>
where
    P: Fn(RawFields) -> std::result::Result<T, RecordError>,
    I: FnMut(T),
{
    let mut rows = 0u64;
    source::drain(source, config.channel_capacity, reporter, |fields| {
        rows += 1;
        if rows % PROGRESS_INTERVAL == 0 {
            pb.set_position(rows);
        }
        match parse(fields) {
            Ok(entity) => insert(entity),
            Err(e) => reporter.report(e),
        }
        Ok(())
    })
}

pub fn load_admin(
    source: RecordSource,
    config: &PipelineConfig,
    reporter: &ErrorReporter,
    pb: &ProgressBar,
) -> Result<FxHashMap<String, AdminRegion>> {
    let dataset = source.dataset();
    let mut table = FxHashMap::default();
    load(
        source,
        config,
        reporter,
        pb,
        |fields| parse_admin(dataset, fields),
        |region: AdminRegion| {
            table.insert(region.code.clone(), region);
        },
    )?;
    finish(pb, dataset, table.len());
    Ok(table)
}

pub fn load_countries(
    source: RecordSource,
    config: &PipelineConfig,
    reporter: &ErrorReporter,
    pb: &ProgressBar,
) -> Result<FxHashMap<String, Country>> {
    let mut table = FxHashMap::default();
    load(source, config, reporter, pb, parse_country, |country: Country| {
        table.insert(country.iso_code.clone(), country);
    })?;
    finish(pb, DatasetId::Country, table.len());
    Ok(table)
}

pub fn load_postal_codes(
    source: RecordSource,
    config: &PipelineConfig,
    reporter: &ErrorReporter,
    pb: &ProgressBar,
) -> Result<PostalCodes> {
    let mut table = PostalCodes::default();
    load(source, config, reporter, pb, parse_postal_code, |entry| {
        table.insert(entry);
    })?;
    finish(pb, DatasetId::PostalCode, table.len());
    Ok(table)
}

pub fn load_hierarchy(
    source: RecordSource,
    config: &PipelineConfig,
    reporter: &ErrorReporter,
    pb: &ProgressBar,
) -> Result<Hierarchy> {
    let mut hierarchy = Hierarchy::default();
    load(source, config, reporter, pb, parse_edge, |edge| {
        hierarchy.insert(edge)
    })?;
    finish(pb, DatasetId::Hierarchy, hierarchy.len());
    Ok(hierarchy)
}

fn finish(pb: &ProgressBar, dataset: DatasetId, entries: usize) {
    pb.finish_with_message(format!("{dataset}: {entries} entries"));
    info!(dataset = %dataset, entries, "Reference table loaded");
}

fn join<T>(handle: ScopedJoinHandle<'_, Result<T>>, dataset: DatasetId) -> Result<T> {
    handle
        .join()
        .map_err(|_| anyhow!("{dataset} loader thread panicked"))?
}

/// Loads the five reference tables concurrently and waits for all of them.
/// Each table has one loader thread as its only writer.
///
/// Every dataset is opened before any loader starts, so a missing file aborts
/// the run before work begins.
pub fn load_all(
    paths: &DatasetPaths,
    config: &PipelineConfig,
    reporter: &ErrorReporter,
) -> Result<ReferenceTables> {
    let admin1 = RecordSource::open(DatasetId::Admin1, &paths.admin1)?;
    let admin2 = RecordSource::open(DatasetId::Admin2, &paths.admin2)?;
    let countries = RecordSource::open(DatasetId::Country, &paths.country)?;
    let postal_codes = RecordSource::open(DatasetId::PostalCode, &paths.postal_code)?;
    let hierarchy = RecordSource::open(DatasetId::Hierarchy, &paths.hierarchy)?;

    let mp = MultiProgress::new();
    let bars: Vec<ProgressBar> = [
        DatasetId::Admin1,
        DatasetId::Admin2,
        DatasetId::Country,
        DatasetId::PostalCode,
        DatasetId::Hierarchy,
    ]
    .iter()
    .map(|dataset| mp.add(make_spinner(*dataset)))
    .collect();

    let tables = thread::scope(|s| -> Result<ReferenceTables> {
        let admin1 = s.spawn(|| load_admin(admin1, config, reporter, &bars[0]));
        let admin2 = s.spawn(|| load_admin(admin2, config, reporter, &bars[1]));
        let countries = s.spawn(|| load_countries(countries, config, reporter, &bars[2]));
        let postal_codes = s.spawn(|| load_postal_codes(postal_codes, config, reporter, &bars[3]));
        let hierarchy = s.spawn(|| load_hierarchy(hierarchy, config, reporter, &bars[4]));

        Ok(ReferenceTables {
            admin1: join(admin1, DatasetId::Admin1)?,
            admin2: join(admin2, DatasetId::Admin2)?,
            countries: join(countries, DatasetId::Country)?,
            postal_codes: join(postal_codes, DatasetId::PostalCode)?,
            hierarchy: join(hierarchy, DatasetId::Hierarchy)?,
        })
    })?;

    info!(
        admin1 = tables.admin1.len(),
        admin2 = tables.admin2.len(),
        countries = tables.countries.len(),
        postal_codes = tables.postal_codes.len(),
        hierarchy_edges = tables.hierarchy.len(),
        hierarchy_children = tables.hierarchy.children(),
        "Reference tables ready"
    );

    Ok(tables)
}

fn make_spinner(dataset: DatasetId) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("    {spinner:.cyan} {prefix:<12} {pos} rows {msg}")
            .unwrap(),
    );
    pb.set_prefix(dataset.as_str());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}
