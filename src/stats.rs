use std::sync::atomic::{AtomicU64, Ordering};

/// Statistics collected while ingesting and resolving cities
#[derive(Default)]
pub struct PipelineStats {
    pub records_read: AtomicU64,
    pub records_invalid: AtomicU64,
    pub records_filtered: AtomicU64,
    pub cities_emitted: AtomicU64,
    pub duplicate_candidates: AtomicU64,
    pub candidates_resolved: AtomicU64,
    pub duplicates_dropped: AtomicU64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_records(&self) {
        self.records_read.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_invalid(&self) {
        self.records_invalid.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_filtered(&self) {
        self.records_filtered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_emitted(&self) {
        self.cities_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_candidates(&self) {
        self.duplicate_candidates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_resolved(&self) {
        self.candidates_resolved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_duplicates(&self) {
        self.duplicates_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn records(&self) -> u64 {
        self.records_read.load(Ordering::Relaxed)
    }

    pub fn invalid(&self) -> u64 {
        self.records_invalid.load(Ordering::Relaxed)
    }

    pub fn filtered(&self) -> u64 {
        self.records_filtered.load(Ordering::Relaxed)
    }

    pub fn emitted(&self) -> u64 {
        self.cities_emitted.load(Ordering::Relaxed)
    }

    pub fn candidates(&self) -> u64 {
        self.duplicate_candidates.load(Ordering::Relaxed)
    }

    pub fn resolved(&self) -> u64 {
        self.candidates_resolved.load(Ordering::Relaxed)
    }

    pub fn duplicates(&self) -> u64 {
        self.duplicates_dropped.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            records_read: self.records(),
            records_invalid: self.invalid(),
            records_filtered: self.filtered(),
            cities_emitted: self.emitted(),
            duplicate_candidates: self.candidates(),
            candidates_resolved: self.resolved(),
            duplicates_dropped: self.duplicates(),
        }
    }
}

/// Plain copy of the counters, taken once the run is over
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub records_read: u64,
    pub records_invalid: u64,
    pub records_filtered: u64,
    pub cities_emitted: u64,
    pub duplicate_candidates: u64,
    pub candidates_resolved: u64,
    pub duplicates_dropped: u64,
}

impl StatsSnapshot {
    /// Cities sent to the sink, immediately or after resolution
    pub fn total_emitted(&self) -> u64 {
        self.cities_emitted + self.candidates_resolved
    }
}
