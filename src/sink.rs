use crate::models::City;
use anyhow::{anyhow, Context, Result};
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Serialize;
use serde_json::{json, Value};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::thread::{self, JoinHandle};
use tokio::runtime::Runtime;
use tracing::{info, warn};

/// Attributes the search index matches queries against, most important first.
pub const SEARCHABLE_ATTRIBUTES: &[&str] = &[
    "Name",
    "AlternateNames",
    "Administrative",
    "Country",
    "PostalCode",
];

/// Ties between equally relevant hits go to the bigger place.
pub const CUSTOM_RANKING: &[&str] = &["desc(Population)"];

/// Destination for enriched cities.
///
/// `close` consumes the sink and returns only once everything accepted has
/// been flushed, so it runs exactly once and after the last `accept`.
pub trait Sink {
    fn accept(&mut self, city: City) -> Result<()>;

    fn close(self) -> Result<SinkReport>
    where
        Self: Sized;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkReport {
    pub accepted: u64,
    pub written: u64,
    pub batches: u64,
    pub failed_batches: u64,
}

/// Writes one batch of cities to the final destination. Runs on the sink's
/// worker thread.
pub trait BatchWriter: Send + 'static {
    fn write_batch(&mut self, batch: &[City]) -> Result<()>;

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Document shape sent to the index: the city plus its `objectID`.
#[derive(Serialize)]
pub struct IndexRecord<'a> {
    #[serde(rename = "objectID")]
    pub object_id: &'a str,
    #[serde(flatten)]
    pub city: &'a City,
}

impl<'a> From<&'a City> for IndexRecord<'a> {
    fn from(city: &'a City) -> Self {
        Self {
            object_id: &city.geoname_id,
            city,
        }
    }
}

/// Sink that hands cities to a worker thread, which groups them into batches
/// of `batch_size` for a [`BatchWriter`].
///
/// Failed batches are logged and counted; they do not stop the worker.
pub struct BatchingSink {
    tx: SyncSender<City>,
    worker: Option<JoinHandle<Result<SinkReport>>>,
}

impl BatchingSink {
    pub fn spawn<W: BatchWriter>(writer: W, batch_size: usize, capacity: usize) -> Result<Self> {
        let batch_size = batch_size.max(1);
        let (tx, rx) = mpsc::sync_channel(capacity);
        let worker = thread::Builder::new()
            .name("gazetteer-sink".to_string())
            .spawn(move || run_batches(writer, rx, batch_size))
            .context("Failed to spawn sink worker thread")?;
        Ok(Self {
            tx,
            worker: Some(worker),
        })
    }
}

fn join_worker(worker: JoinHandle<Result<SinkReport>>) -> Result<SinkReport> {
    worker
        .join()
        .map_err(|_| anyhow!("Sink worker thread panicked"))?
}

impl Sink for BatchingSink {
    fn accept(&mut self, city: City) -> Result<()> {
        if self.tx.send(city).is_ok() {
            return Ok(());
        }
        // The worker only hangs up when it has failed; surface its error.
        match self.worker.take() {
            Some(worker) => match join_worker(worker) {
                Err(e) => Err(e.context("Sink worker stopped")),
                Ok(_) => Err(anyhow!("Sink worker stopped before the input ended")),
            },
            None => Err(anyhow!("Sink worker already stopped")),
        }
    }

    fn close(self) -> Result<SinkReport> {
        let Self { tx, worker } = self;
        drop(tx);
        let worker = worker.ok_or_else(|| anyhow!("Sink worker already stopped"))?;
        join_worker(worker)
    }
}

fn run_batches<W: BatchWriter>(
    mut writer: W,
    rx: Receiver<City>,
    batch_size: usize,
) -> Result<SinkReport> {
    let mut report = SinkReport::default();
    let mut batch = Vec::with_capacity(batch_size);

    for city in rx {
        report.accepted += 1;
        batch.push(city);
        if batch.len() >= batch_size {
            flush_batch(&mut writer, &mut batch, &mut report);
        }
    }

    if !batch.is_empty() {
        flush_batch(&mut writer, &mut batch, &mut report);
    }
    writer.finish()?;

    info!(
        accepted = report.accepted,
        batches = report.batches,
        failed_batches = report.failed_batches,
        "Sink drained"
    );
    Ok(report)
}

fn flush_batch<W: BatchWriter>(writer: &mut W, batch: &mut Vec<City>, report: &mut SinkReport) {
    match writer.write_batch(batch) {
        Ok(()) => {
            report.batches += 1;
            report.written += batch.len() as u64;
        }
        Err(e) => {
            report.failed_batches += 1;
            warn!(size = batch.len(), error = %e, "Batch write failed");
        }
    }
    batch.clear();
}

/// Newline-delimited JSON file, one index document per line.
pub struct JsonLinesWriter {
    writer: BufWriter<File>,
}

impl JsonLinesWriter {
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let file = File::create(path)
            .with_context(|| format!("Failed to create output file: {}", path.display()))?;
        Ok(Self {
            writer: BufWriter::with_capacity(128 * 1024, file),
        })
    }
}

impl BatchWriter for JsonLinesWriter {
    fn write_batch(&mut self, batch: &[City]) -> Result<()> {
        for city in batch {
            serde_json::to_writer(&mut self.writer, &IndexRecord::from(city))?;
            self.writer.write_all(b"\n")?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.writer.flush().context("Failed to flush output file")
    }
}

#[derive(Debug, Clone)]
pub struct SearchIndexConfig {
    pub base_url: String,
    pub index_name: String,
    pub app_id: String,
    pub api_key: String,
}

pub fn index_settings() -> Value {
    json!({
        "searchableAttributes": SEARCHABLE_ATTRIBUTES,
        "customRanking": CUSTOM_RANKING,
    })
}

pub fn batch_body(batch: &[City]) -> Value {
    let requests: Vec<Value> = batch
        .iter()
        .map(|city| json!({ "action": "updateObject", "body": IndexRecord::from(city) }))
        .collect();
    json!({ "requests": requests })
}

/// Uploads batches to an Algolia-compatible search index over HTTP.
pub struct SearchIndexWriter {
    runtime: Runtime,
    client: reqwest::Client,
    index_url: String,
    indexed: u64,
}

impl SearchIndexWriter {
    /// Builds the client and pushes index settings. A settings failure is only
    /// logged; uploads can still succeed against an index configured elsewhere.
    pub fn connect(config: &SearchIndexConfig) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .thread_name("gazetteer-index")
            .enable_io()
            .enable_time()
            .build()
            .context("Failed to build search index runtime")?;

        let mut headers = HeaderMap::new();
        headers.insert(
            "x-algolia-application-id",
            HeaderValue::from_str(&config.app_id).context("Invalid application id")?,
        );
        let mut key = HeaderValue::from_str(&config.api_key).context("Invalid API key")?;
        key.set_sensitive(true);
        headers.insert("x-algolia-api-key", key);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .context("Failed to build HTTP client")?;

        let writer = Self {
            runtime,
            client,
            index_url: format!(
                "{}/1/indexes/{}",
                config.base_url.trim_end_matches('/'),
                config.index_name
            ),
            indexed: 0,
        };

        match writer.runtime.block_on(writer.apply_settings()) {
            Ok(()) => info!(index = %config.index_name, "Search index settings applied"),
            Err(e) => warn!(index = %config.index_name, error = %e, "Failed to apply index settings"),
        }

        Ok(writer)
    }

    async fn apply_settings(&self) -> Result<()> {
        self.client
            .put(format!("{}/settings", self.index_url))
            .json(&index_settings())
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn post_batch(&self, batch: &[City]) -> Result<()> {
        self.client
            .post(format!("{}/batch", self.index_url))
            .json(&batch_body(batch))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

impl BatchWriter for SearchIndexWriter {
    fn write_batch(&mut self, batch: &[City]) -> Result<()> {
        self.runtime
            .block_on(self.post_batch(batch))
            .with_context(|| format!("Failed to upload batch to {}", self.index_url))?;
        self.indexed += batch.len() as u64;
        info!(
            size = batch.len(),
            total = self.indexed,
            "Indexed batch"
        );
        Ok(())
    }
}
