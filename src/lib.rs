//! Gazetteer: GeoNames place-catalog import pipeline
//!
//! This crate joins the GeoNames flat files into enriched, deduplicated city
//! records and streams them to a search index:
//!
//! 1. **Fetch** -- Download each dataset (or use a local copy) and extract zip
//!    archives, a few at a time
//! 2. **Reference loading** -- Build the admin1, admin2, country, postal-code and
//!    hierarchy tables concurrently; ingestion waits for all five
//! 3. **Ingestion** -- Stream the primary place file once: validate, parse, filter
//!    and enrich each row, then either emit it or hold it as a duplicate candidate
//! 4. **Resolution** -- Drop candidates whose hierarchy parent turned out to be a
//!    city, emit the rest
//!
//! # Architecture
//!
//! - **One thread per dataset** -- A reader thread per file feeds a bounded
//!   channel; the single consumer is the only writer of its table, so tables
//!   need no locks
//! - **Explicit phases** -- Reference tables are complete before ingestion starts;
//!   the observed-parent set is only handed out once ingestion is drained
//! - **Side-channel errors** -- Record-level problems go to a reporter thread and
//!   never stop the stream; only unreadable datasets abort the run
//! - **Drained close** -- The sink's `close` waits for its worker to flush
//!
//! # Key Modules
//!
//! - [`fetch`] -- HTTP download and zip extraction
//! - [`source`] -- Tab-separated record reader
//! - [`reference`] -- Reference loaders and lookup tables
//! - [`ingest`] -- City validation, enrichment and duplicate classification
//! - [`dedup`] -- Duplicate resolution post-pass
//! - [`sink`] -- Batching sink, JSON lines and search-index writers
//! - [`report`] -- Record error reporting
//! - [`pipeline`] -- Orchestration of the phases
//! - [`stats`] -- Thread-safe atomic counters
//! - [`config`] -- Constants and the run configuration
//! - [`models`] -- Core data types
//!
//! # Example Usage
//!
//! ```bash
//! # Download and extract every dataset into ./data
//! gazetteer fetch
//!
//! # Import into a JSON lines file, keeping a log of rejected rows
//! gazetteer import --output cities.jsonl --rejects rejects.tsv
//!
//! # Import into a search index
//! GAZETTEER_APP_ID=... GAZETTEER_API_KEY=... gazetteer import \
//!     --index-url https://example-dsn.algolia.net --index-name cities
//! ```

pub mod config;
pub mod dedup;
pub mod fetch;
pub mod ingest;
pub mod models;
pub mod pipeline;
pub mod reference;
pub mod report;
pub mod sink;
pub mod source;
pub mod stats;
