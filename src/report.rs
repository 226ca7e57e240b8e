use crate::models::{City, DatasetId, RawFields};
use anyhow::{anyhow, Context, Result};
use csv::{QuoteStyle, Writer, WriterBuilder};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    Parse,
    Duplicate,
    Read,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Parse => "parse",
            ErrorKind::Duplicate => "duplicate",
            ErrorKind::Read => "read",
        }
    }
}

/// Record-level failure. Never stops the pipeline; routed to the [`ErrorReporter`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecordError {
    #[error("invalid record in {dataset}: {reason}")]
    Validation {
        dataset: DatasetId,
        reason: String,
        record: RawFields,
    },

    #[error("cannot parse {field} {value:?} in {dataset}")]
    Parse {
        dataset: DatasetId,
        field: &'static str,
        value: String,
        record: RawFields,
    },

    #[error("city {} in {dataset} duplicates its parent {parent}", .city.geoname_id)]
    Duplicate {
        dataset: DatasetId,
        parent: String,
        city: Box<City>,
    },

    #[error("unreadable row at line {line} in {dataset}: {message}")]
    Read {
        dataset: DatasetId,
        line: u64,
        message: String,
        record: RawFields,
    },
}

impl RecordError {
    pub fn validation(dataset: DatasetId, reason: impl Into<String>, record: RawFields) -> Self {
        RecordError::Validation {
            dataset,
            reason: reason.into(),
            record,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            RecordError::Validation { .. } => ErrorKind::Validation,
            RecordError::Parse { .. } => ErrorKind::Parse,
            RecordError::Duplicate { .. } => ErrorKind::Duplicate,
            RecordError::Read { .. } => ErrorKind::Read,
        }
    }

    pub fn dataset(&self) -> DatasetId {
        match self {
            RecordError::Validation { dataset, .. }
            | RecordError::Parse { dataset, .. }
            | RecordError::Duplicate { dataset, .. }
            | RecordError::Read { dataset, .. } => *dataset,
        }
    }

    /// The offending record. Duplicates were parsed already, so their key fields are rebuilt.
    pub fn record(&self) -> RawFields {
        match self {
            RecordError::Validation { record, .. }
            | RecordError::Parse { record, .. }
            | RecordError::Read { record, .. } => record.clone(),
            RecordError::Duplicate { city, .. } => vec![
                city.geoname_id.clone(),
                city.name.clone(),
                city.country_code.clone(),
                city.administrative_code.clone(),
            ],
        }
    }
}

/// Counts per error kind, returned once the reporter has drained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ErrorSummary {
    pub validation: u64,
    pub parse: u64,
    pub duplicate: u64,
    pub read: u64,
}

impl ErrorSummary {
    fn record(&mut self, kind: ErrorKind) {
        match kind {
            ErrorKind::Validation => self.validation += 1,
            ErrorKind::Parse => self.parse += 1,
            ErrorKind::Duplicate => self.duplicate += 1,
            ErrorKind::Read => self.read += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.validation + self.parse + self.duplicate + self.read
    }
}

/// Cloneable intake for record errors. Sending never blocks.
#[derive(Clone)]
pub struct ErrorReporter {
    tx: Sender<RecordError>,
}

impl ErrorReporter {
    pub fn report(&self, error: RecordError) {
        // The consumer outlives every reporter handle unless it panicked; nothing to do then.
        let _ = self.tx.send(error);
    }
}

/// Consumer side of the error channel.
pub struct ErrorLog {
    worker: JoinHandle<Result<ErrorSummary>>,
}

impl ErrorLog {
    /// Drops the last reporter handle and waits for every queued error to be consumed.
    pub fn finish(self, reporter: ErrorReporter) -> Result<ErrorSummary> {
        drop(reporter);
        self.worker
            .join()
            .map_err(|_| anyhow!("Error reporter thread panicked"))?
    }
}

/// Starts the error consumer. With `rejects_path`, every error is also appended
/// to a tab-separated file: dataset, kind, message, then the record's fields.
pub fn spawn(rejects_path: Option<&Path>) -> Result<(ErrorReporter, ErrorLog)> {
    let rejects = match rejects_path {
        Some(path) => Some(
            WriterBuilder::new()
                .delimiter(b'\t')
                .flexible(true)
                .quote_style(QuoteStyle::Never)
                .from_writer(BufWriter::new(File::create(path).with_context(|| {
                    format!("Failed to create rejects file: {}", path.display())
                })?)),
        ),
        None => None,
    };

    let (tx, rx) = mpsc::channel();
    let worker = thread::Builder::new()
        .name("gazetteer-errors".to_string())
        .spawn(move || consume(rx, rejects))
        .context("Failed to spawn error reporter thread")?;

    Ok((ErrorReporter { tx }, ErrorLog { worker }))
}

fn consume(
    rx: Receiver<RecordError>,
    mut rejects: Option<Writer<BufWriter<File>>>,
) -> Result<ErrorSummary> {
    let mut summary = ErrorSummary::default();

    for error in rx {
        let kind = error.kind();
        summary.record(kind);

        match kind {
            ErrorKind::Validation | ErrorKind::Read => {
                warn!(dataset = %error.dataset(), kind = kind.as_str(), "{error}")
            }
            ErrorKind::Parse | ErrorKind::Duplicate => {
                debug!(dataset = %error.dataset(), kind = kind.as_str(), "{error}")
            }
        }

        if let Some(writer) = rejects.as_mut() {
            let mut row = vec![
                error.dataset().to_string(),
                kind.as_str().to_string(),
                error.to_string(),
            ];
            row.extend(error.record());
            writer
                .write_record(&row)
                .context("Failed to write rejects file")?;
        }
    }

    if let Some(mut writer) = rejects {
        writer.flush().context("Failed to flush rejects file")?;
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fields(values: &[&str]) -> RawFields {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn summary_counts_each_kind() {
        let (reporter, log) = spawn(None).unwrap();
        reporter.report(RecordError::validation(
            DatasetId::Admin1,
            "expected 2 fields",
            fields(&["FR.A1"]),
        ));
        reporter.report(RecordError::Parse {
            dataset: DatasetId::Cities,
            field: "latitude",
            value: "north".to_string(),
            record: fields(&["1"]),
        });
        reporter.report(RecordError::Duplicate {
            dataset: DatasetId::Cities,
            parent: "1".to_string(),
            city: Box::new(City::default()),
        });

        let clone = reporter.clone();
        clone.report(RecordError::validation(DatasetId::Country, "comment", fields(&["#ISO"])));
        drop(clone);

        let summary = log.finish(reporter).unwrap();
        assert_eq!(summary.validation, 2);
        assert_eq!(summary.parse, 1);
        assert_eq!(summary.duplicate, 1);
        assert_eq!(summary.read, 0);
        assert_eq!(summary.total(), 4);
    }

    #[test]
    fn rejects_file_lists_every_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rejects.tsv");

        let (reporter, log) = spawn(Some(&path)).unwrap();
        reporter.report(RecordError::validation(
            DatasetId::Admin2,
            "expected 2 fields, found 1",
            fields(&["FR.A1.04"]),
        ));
        let city = City {
            geoname_id: "2".to_string(),
            name: "Marseille 01".to_string(),
            country_code: "FR".to_string(),
            ..City::default()
        };
        reporter.report(RecordError::Duplicate {
            dataset: DatasetId::Cities,
            parent: "1".to_string(),
            city: Box::new(city),
        });
        log.finish(reporter).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("admin2\tvalidation\t"));
        assert!(lines[0].ends_with("\tFR.A1.04"));
        assert!(lines[1].starts_with("cities\tduplicate\t"));
        assert!(lines[1].contains("Marseille 01"));
    }

    #[test]
    fn error_messages_name_the_dataset() {
        let err = RecordError::Read {
            dataset: DatasetId::Hierarchy,
            line: 42,
            message: "invalid UTF-8".to_string(),
            record: vec![],
        };
        assert_eq!(err.kind(), ErrorKind::Read);
        assert_eq!(
            err.to_string(),
            "unreadable row at line 42 in hierarchy: invalid UTF-8"
        );
    }
}
