//! End-to-end tests for the import pipeline over small GeoNames fixtures.
//!
//! Every test writes its own set of tab-separated files into a TempDir and runs
//! [`pipeline::run`] against them with an in-memory sink that records what it
//! was given and in which order.
//!
//! # Sample Data
//!
//! - Reference rows for France with one admin1 region, one admin2 region and
//!   two postal codes for Marseille (the first one must win)
//! - A comment line in the country file, a short admin1 row and a short
//!   postal-code row for Aubagne, all rejected
//! - Hierarchy edges `1 -> 2` (both cities) and `9 -> 3` (9 is not a city)
//! - Cities listed child-first, so the child of Marseille is read before
//!   Marseille itself

use anyhow::{bail, Result};
use gazetteer::config::{DatasetPaths, PipelineConfig};
use gazetteer::models::City;
use gazetteer::pipeline;
use gazetteer::sink::{BatchingSink, JsonLinesWriter, Sink, SinkReport};
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Accept(City),
    Close,
}

/// Sink that logs every call into a shared list.
#[derive(Clone, Default)]
struct RecordingSink {
    events: Arc<Mutex<Vec<Event>>>,
}

impl RecordingSink {
    fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    fn accepted_ids(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Accept(city) => Some(city.geoname_id),
                Event::Close => None,
            })
            .collect()
    }

    fn accepted(&self, geoname_id: &str) -> Option<City> {
        self.events().into_iter().find_map(|e| match e {
            Event::Accept(city) if city.geoname_id == geoname_id => Some(city),
            _ => None,
        })
    }
}

impl Sink for RecordingSink {
    fn accept(&mut self, city: City) -> Result<()> {
        self.events.lock().unwrap().push(Event::Accept(city));
        Ok(())
    }

    fn close(self) -> Result<SinkReport> {
        let mut events = self.events.lock().unwrap();
        let accepted = events.len() as u64;
        events.push(Event::Close);
        Ok(SinkReport {
            accepted,
            written: accepted,
            batches: 1,
            failed_batches: 0,
        })
    }
}

/// Sink whose destination is unreachable.
struct BrokenSink;

impl Sink for BrokenSink {
    fn accept(&mut self, _city: City) -> Result<()> {
        bail!("index unreachable")
    }

    fn close(self) -> Result<SinkReport> {
        Ok(SinkReport::default())
    }
}

/// A 19-field primary place row.
fn city_row(
    id: &str,
    name: &str,
    class: &str,
    code: &str,
    latitude: &str,
    population: &str,
) -> String {
    let mut fields = vec![""; 19];
    fields[0] = id;
    fields[1] = name;
    fields[2] = name;
    fields[3] = name;
    fields[4] = latitude;
    fields[5] = "5.38107";
    fields[6] = class;
    fields[7] = code;
    fields[8] = "FR";
    fields[10] = "A1";
    fields[11] = "13";
    fields[14] = population;
    fields[17] = "Europe/Paris";
    fields[18] = "2024-01-01";
    fields.join("\t")
}

fn write(dir: &Path, name: &str, lines: &[String]) -> std::path::PathBuf {
    let path = dir.join(name);
    let content: String = lines.iter().map(|l| format!("{l}\n")).collect();
    fs::write(&path, content).unwrap();
    path
}

fn lines(rows: &[&str]) -> Vec<String> {
    rows.iter().map(|r| r.to_string()).collect()
}

fn sample_cities() -> Vec<String> {
    vec![
        city_row("2", "Marseille 01", "P", "PPL", "43.3", "40000"),
        city_row("1", "Marseille", "P", "PPLA", "43.29695", "870731"),
        city_row("3", "Aubagne", "P", "PPL", "43.29", "45000"),
        city_row("4", "Massilia", "P", "PPLH", "43.3", "1000"),
        city_row("5", "Empty", "P", "PPL", "43.3", "0"),
        city_row("6", "Sainte-Victoire", "T", "MT", "43.5", "100"),
        "7\tShort".to_string(),
        city_row("8", "Cassis", "P", "PPL", "north", "7000"),
    ]
}

fn write_fixtures(dir: &Path, cities: &[String]) -> DatasetPaths {
    DatasetPaths {
        admin1: write(
            dir,
            "admin1CodesASCII.txt",
            &lines(&["FR.A1\tProvence\tProvence\t2985244", "broken"]),
        ),
        admin2: write(
            dir,
            "admin2Codes.txt",
            &lines(&["FR.A1.13\tBouches-du-Rhone\tBouches-du-Rhone\t3031359"]),
        ),
        country: write(
            dir,
            "countryInfo.txt",
            &lines(&[
                "#ISO\tISO3\tISO-Numeric\tfips\tCountry\tCapital",
                "FR\tFRA\t250\tFR\tFrance\tParis",
            ]),
        ),
        postal_code: write(
            dir,
            "allCountries-postal.txt",
            &lines(&[
                "FR\t13001\tMarseille\tProvence\tA1",
                "FR\t13002\tMarseille\tProvence\tA1",
                "FR\t13400\tAubagne\tProvence",
            ]),
        ),
        hierarchy: write(dir, "hierarchy.txt", &lines(&["1\t2\tADM", "9\t3\tADM"])),
        cities: write(dir, "allCountries.txt", cities),
    }
}

fn test_config() -> PipelineConfig {
    PipelineConfig {
        channel_capacity: 2,
        ..PipelineConfig::default()
    }
}

// ============================================================================
// End-to-end
// ============================================================================

#[test]
fn child_of_a_city_is_suppressed_and_parent_enriched() {
    let dir = TempDir::new().unwrap();
    let paths = write_fixtures(dir.path(), &sample_cities());
    let sink = RecordingSink::default();

    let summary = pipeline::run(&paths, &test_config(), sink.clone()).unwrap();

    // Direct emissions in file order, then the resolved candidate.
    assert_eq!(sink.accepted_ids(), vec!["1", "8", "3"]);

    let marseille = sink.accepted("1").unwrap();
    assert_eq!(marseille.country, "France");
    assert_eq!(marseille.administrative, "Provence");
    assert_eq!(marseille.administrative2, "Bouches-du-Rhone");
    assert_eq!(marseille.postal_code, "13001");
    assert_eq!(marseille.population, 870731);

    let aubagne = sink.accepted("3").unwrap();
    assert_eq!(aubagne.country, "France");
    assert_eq!(aubagne.postal_code, "");

    assert!(sink.accepted("2").is_none());
    assert_eq!(summary.errors.duplicate, 1);
    assert_eq!(summary.stats.duplicates_dropped, 1);
    assert_eq!(summary.stats.candidates_resolved, 1);
}

#[test]
fn close_is_called_once_after_the_last_accept() {
    let dir = TempDir::new().unwrap();
    let paths = write_fixtures(dir.path(), &sample_cities());
    let sink = RecordingSink::default();

    pipeline::run(&paths, &test_config(), sink.clone()).unwrap();

    let events = sink.events();
    let closes: Vec<usize> = events
        .iter()
        .enumerate()
        .filter(|(_, e)| **e == Event::Close)
        .map(|(i, _)| i)
        .collect();
    assert_eq!(closes, vec![events.len() - 1]);
}

#[test]
fn filter_rejects_are_never_emitted() {
    let dir = TempDir::new().unwrap();
    let paths = write_fixtures(dir.path(), &sample_cities());
    let sink = RecordingSink::default();

    let summary = pipeline::run(&paths, &test_config(), sink.clone()).unwrap();

    for city in sink.events().into_iter().filter_map(|e| match e {
        Event::Accept(city) => Some(city),
        Event::Close => None,
    }) {
        assert_ne!(city.population, 0);
        assert_eq!(city.f_class, "P");
        assert!(city.f_code != "PPLH" && city.f_code != "PPLX");
    }
    assert_eq!(summary.stats.records_filtered, 3);
}

#[test]
fn counters_and_error_kinds_add_up() {
    let dir = TempDir::new().unwrap();
    let paths = write_fixtures(dir.path(), &sample_cities());

    let summary = pipeline::run(&paths, &test_config(), RecordingSink::default()).unwrap();
    let stats = summary.stats;

    assert_eq!(stats.records_read, 8);
    assert_eq!(stats.records_invalid, 1);
    assert_eq!(stats.records_filtered, 3);
    assert_eq!(stats.cities_emitted, 2);
    assert_eq!(stats.duplicate_candidates, 2);
    assert_eq!(
        stats.candidates_resolved + stats.duplicates_dropped,
        stats.duplicate_candidates
    );

    // Short admin1 row, country comment line, short postal row, short city row.
    assert_eq!(summary.errors.validation, 4);
    // Cassis has an unparseable latitude but is still emitted.
    assert_eq!(summary.errors.parse, 1);
    assert_eq!(summary.errors.read, 0);

    assert_eq!(summary.tables.admin1, 1);
    assert_eq!(summary.tables.admin2, 1);
    assert_eq!(summary.tables.countries, 1);
    assert_eq!(summary.tables.postal_codes, 1);
    assert_eq!(summary.tables.hierarchy_edges, 2);
    assert_eq!(summary.sink.accepted, 3);
    assert_eq!(stats.total_emitted(), 3);
}

#[test]
fn unparseable_coordinate_defaults_to_zero() {
    let dir = TempDir::new().unwrap();
    let paths = write_fixtures(dir.path(), &sample_cities());
    let sink = RecordingSink::default();

    pipeline::run(&paths, &test_config(), sink.clone()).unwrap();

    let cassis = sink.accepted("8").unwrap();
    assert_eq!(cassis.latitude, 0.0);
    assert_eq!(cassis.longitude, 5.38107);
}

#[test]
fn without_hierarchy_every_city_is_emitted_directly() {
    let dir = TempDir::new().unwrap();
    let mut paths = write_fixtures(dir.path(), &sample_cities());
    paths.hierarchy = write(dir.path(), "empty-hierarchy.txt", &[]);
    let sink = RecordingSink::default();

    let summary = pipeline::run(&paths, &test_config(), sink.clone()).unwrap();

    assert_eq!(sink.accepted_ids(), vec!["2", "1", "3", "8"]);
    assert_eq!(summary.stats.duplicate_candidates, 0);
    assert_eq!(summary.errors.duplicate, 0);
}

// ============================================================================
// Outputs
// ============================================================================

#[test]
fn rejects_file_lists_every_record_error() {
    let dir = TempDir::new().unwrap();
    let paths = write_fixtures(dir.path(), &sample_cities());
    let rejects = dir.path().join("rejects.tsv");
    let config = PipelineConfig {
        rejects_path: Some(rejects.clone()),
        ..test_config()
    };

    pipeline::run(&paths, &config, RecordingSink::default()).unwrap();

    let content = fs::read_to_string(&rejects).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 6);
    assert!(lines.iter().any(|l| l.starts_with("country\tvalidation\t")));
    assert!(lines
        .iter()
        .any(|l| l.starts_with("postal-code\tvalidation\t") && l.ends_with("\tAubagne\tProvence")));
    assert!(lines.iter().any(|l| l.starts_with("admin1\tvalidation\t")));
    assert!(lines.iter().any(|l| l.starts_with("cities\tparse\t")));
    assert!(lines
        .iter()
        .any(|l| l.starts_with("cities\tduplicate\t") && l.contains("Marseille 01")));
}

#[test]
fn json_lines_output_through_batching_sink() {
    let dir = TempDir::new().unwrap();
    let paths = write_fixtures(dir.path(), &sample_cities());
    let output = dir.path().join("cities.jsonl");
    let sink = BatchingSink::spawn(JsonLinesWriter::create(&output).unwrap(), 2, 4).unwrap();

    let summary = pipeline::run(&paths, &test_config(), sink).unwrap();
    assert_eq!(summary.sink.written, 3);
    assert_eq!(summary.sink.batches, 2);

    let docs: Vec<Value> = fs::read_to_string(&output)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    let ids: Vec<&str> = docs.iter().map(|d| d["objectID"].as_str().unwrap()).collect();
    assert_eq!(ids, vec!["1", "8", "3"]);
    assert_eq!(docs[0]["Country"], "France");
    assert_eq!(docs[0]["PostalCode"], "13001");
}

// ============================================================================
// Fatal failures
// ============================================================================

#[test]
fn missing_reference_dataset_aborts_before_ingestion() {
    let dir = TempDir::new().unwrap();
    let mut paths = write_fixtures(dir.path(), &sample_cities());
    paths.hierarchy = dir.path().join("missing.txt");
    let sink = RecordingSink::default();

    let err = pipeline::run(&paths, &test_config(), sink.clone()).unwrap_err();

    assert!(err.to_string().contains("hierarchy"));
    assert!(sink.events().is_empty());
}

#[test]
fn missing_primary_dataset_is_fatal() {
    let dir = TempDir::new().unwrap();
    let mut paths = write_fixtures(dir.path(), &sample_cities());
    paths.cities = dir.path().join("missing.txt");

    let err = pipeline::run(&paths, &test_config(), RecordingSink::default()).unwrap_err();
    assert!(err.to_string().contains("cities"));
}

#[test]
fn sink_failure_stops_the_run() {
    let dir = TempDir::new().unwrap();
    let paths = write_fixtures(dir.path(), &sample_cities());

    let err = pipeline::run(&paths, &test_config(), BrokenSink).unwrap_err();
    assert!(format!("{err:#}").contains("index unreachable"));
}
