use crate::config::READ_BUFFER_SIZE;
use crate::models::{DatasetId, RawFields};
use crate::report::{ErrorReporter, RecordError};
use anyhow::{anyhow, Context, Result};
use csv::{ByteRecord, Reader, ReaderBuilder, Terminator};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::sync::mpsc::{self, SyncSender};
use std::thread;

/// Streaming reader over one tab-separated GeoNames file.
///
/// Quotes are not special (GeoNames fields contain bare `"`), rows may have
/// any number of fields and there is no header line. Only `\n` ends a row; a
/// `\r` inside a field is data.
pub struct RecordSource<R: Read = BufReader<File>> {
    dataset: DatasetId,
    reader: Reader<R>,
}

impl RecordSource {
    /// Opens the dataset file. Failure here is fatal for the run.
    pub fn open(dataset: DatasetId, path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| {
            format!("Failed to open {} dataset at: {}", dataset, path.display())
        })?;
        Ok(Self::from_reader(
            dataset,
            BufReader::with_capacity(READ_BUFFER_SIZE, file),
        ))
    }
}

impl<R: Read> RecordSource<R> {
    pub fn from_reader(dataset: DatasetId, rdr: R) -> Self {
        let reader = ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .flexible(true)
            .quoting(false)
            .terminator(Terminator::Any(b'\n'))
            .from_reader(rdr);
        Self { dataset, reader }
    }

    pub fn dataset(&self) -> DatasetId {
        self.dataset
    }

    /// Sends every row to `tx` and returns the number of rows sent.
    ///
    /// Rows that are not valid UTF-8 are reported and skipped. Stops early,
    /// without error, when the receiving side hangs up. An I/O error mid-file
    /// is fatal.
    pub fn stream(mut self, tx: SyncSender<RawFields>, reporter: &ErrorReporter) -> Result<u64> {
        let mut record = ByteRecord::new();
        let mut sent = 0u64;

        loop {
            match self.reader.read_byte_record(&mut record) {
                Ok(false) => break,
                Ok(true) => match decode(&record) {
                    Ok(fields) => {
                        if tx.send(fields).is_err() {
                            break;
                        }
                        sent += 1;
                    }
                    Err(message) => reporter.report(RecordError::Read {
                        dataset: self.dataset,
                        line: record.position().map_or(0, |p| p.line()),
                        message,
                        record: lossy(&record),
                    }),
                },
                Err(e) if e.is_io_error() => {
                    return Err(e).with_context(|| format!("Failed to read {} dataset", self.dataset));
                }
                Err(e) => reporter.report(RecordError::Read {
                    dataset: self.dataset,
                    line: e.position().map_or(0, |p| p.line()),
                    message: e.to_string(),
                    record: Vec::new(),
                }),
            }
        }

        Ok(sent)
    }
}

/// Fields of `record` with the `\r` of a CRLF line ending removed.
fn raw_fields(record: &ByteRecord) -> impl Iterator<Item = &[u8]> {
    let last = record.len().saturating_sub(1);
    record.iter().enumerate().map(move |(i, field)| {
        if i == last {
            field.strip_suffix(b"\r").unwrap_or(field)
        } else {
            field
        }
    })
}

fn decode(record: &ByteRecord) -> std::result::Result<RawFields, String> {
    raw_fields(record)
        .map(|field| {
            std::str::from_utf8(field)
                .map(str::to_owned)
                .map_err(|e| format!("invalid UTF-8: {e}"))
        })
        .collect()
}

fn lossy(record: &ByteRecord) -> RawFields {
    raw_fields(record)
        .map(|field| String::from_utf8_lossy(field).into_owned())
        .collect()
}

/// Runs `source` on its own thread and feeds each row to `consume` on the
/// calling thread, through a channel of `capacity` rows.
///
/// Returns once the reader thread has finished and every row it produced has
/// been consumed. If `consume` fails, the channel is dropped so the reader
/// stops, and the error is returned.
pub fn drain<R, F>(
    source: RecordSource<R>,
    capacity: usize,
    reporter: &ErrorReporter,
    mut consume: F,
) -> Result<u64>
where
    R: Read + Send,
    F: FnMut(RawFields) -> Result<()>,
{
    let dataset = source.dataset();
    let (tx, rx) = mpsc::sync_channel(capacity);

    thread::scope(|s| {
        let producer = s.spawn(move || source.stream(tx, reporter));

        let mut outcome = Ok(());
        for fields in rx.iter() {
            if let Err(e) = consume(fields) {
                outcome = Err(e);
                break;
            }
        }
        drop(rx);

        let sent = producer
            .join()
            .map_err(|_| anyhow!("{dataset} reader thread panicked"))??;
        outcome.map(|()| sent)
    })
}
