use crate::models::DatasetId;
use rustc_hash::FxHashSet;
use std::path::PathBuf;

/// GeoNames export locations used when no override is given
pub const ADMIN1_URL: &str = "https://download.geonames.org/export/dump/admin1CodesASCII.txt";
pub const ADMIN2_URL: &str = "https://download.geonames.org/export/dump/admin2Codes.txt";
pub const COUNTRY_URL: &str = "https://download.geonames.org/export/dump/countryInfo.txt";
pub const POSTAL_CODE_URL: &str = "https://download.geonames.org/export/zip/allCountries.zip";
pub const HIERARCHY_URL: &str = "https://download.geonames.org/export/dump/hierarchy.zip";
pub const CITIES_URL: &str = "https://download.geonames.org/export/dump/allCountries.zip";

/// Directory that downloads and extracted archives land in
pub const DEFAULT_WORK_DIR: &str = "data";

/// Feature class a place record must carry to count as a city
pub const DEFAULT_CITY_FEATURE_CLASS: &str = "P";

/// Feature codes that are never cities (historical and sections of populated places)
pub const DEFAULT_IGNORED_FEATURE_CODES: &[&str] = &["PPLH", "PPLX"];

/// Capacity of each dataset's record channel (backpressure on the reader thread)
pub const CHANNEL_CAPACITY: usize = 1024;

/// Records per search-index upload
pub const SINK_BATCH_SIZE: usize = 1000;

/// Concurrent downloads during the fetch phase
pub const MAX_PARALLEL_FETCHES: usize = 3;

/// Progress update interval (tick every N records)
pub const PROGRESS_INTERVAL: u64 = 10_000;

/// Buffer size for dataset readers
pub const READ_BUFFER_SIZE: usize = 256 * 1024;

/// One value per dataset the pipeline consumes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PerDataset<T> {
    pub admin1: T,
    pub admin2: T,
    pub country: T,
    pub postal_code: T,
    pub hierarchy: T,
    pub cities: T,
}

impl<T> PerDataset<T> {
    pub fn get(&self, id: DatasetId) -> &T {
        match id {
            DatasetId::Admin1 => &self.admin1,
            DatasetId::Admin2 => &self.admin2,
            DatasetId::Country => &self.country,
            DatasetId::PostalCode => &self.postal_code,
            DatasetId::Hierarchy => &self.hierarchy,
            DatasetId::Cities => &self.cities,
        }
    }

    pub fn get_mut(&mut self, id: DatasetId) -> &mut T {
        match id {
            DatasetId::Admin1 => &mut self.admin1,
            DatasetId::Admin2 => &mut self.admin2,
            DatasetId::Country => &mut self.country,
            DatasetId::PostalCode => &mut self.postal_code,
            DatasetId::Hierarchy => &mut self.hierarchy,
            DatasetId::Cities => &mut self.cities,
        }
    }
}

/// Where each dataset comes from: an http(s) URL or a local path.
pub type DatasetLocations = PerDataset<String>;

/// Local, readable file for each dataset once the fetch phase is done.
pub type DatasetPaths = PerDataset<PathBuf>;

impl DatasetLocations {
    pub fn geonames() -> Self {
        Self {
            admin1: ADMIN1_URL.to_string(),
            admin2: ADMIN2_URL.to_string(),
            country: COUNTRY_URL.to_string(),
            postal_code: POSTAL_CODE_URL.to_string(),
            hierarchy: HIERARCHY_URL.to_string(),
            cities: CITIES_URL.to_string(),
        }
    }
}

/// Every option the pipeline recognises. Built once at startup and passed by
/// reference into each stage; nothing reads process-wide settings afterwards.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub datasets: DatasetLocations,
    pub work_dir: PathBuf,
    pub force_download: bool,
    pub max_parallel_fetches: usize,
    pub city_feature_class: String,
    pub ignored_feature_codes: FxHashSet<String>,
    pub channel_capacity: usize,
    pub batch_size: usize,
    pub rejects_path: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            datasets: DatasetLocations::geonames(),
            work_dir: PathBuf::from(DEFAULT_WORK_DIR),
            force_download: false,
            max_parallel_fetches: MAX_PARALLEL_FETCHES,
            city_feature_class: DEFAULT_CITY_FEATURE_CLASS.to_string(),
            ignored_feature_codes: DEFAULT_IGNORED_FEATURE_CODES
                .iter()
                .map(|c| c.to_string())
                .collect(),
            channel_capacity: CHANNEL_CAPACITY,
            batch_size: SINK_BATCH_SIZE,
            rejects_path: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_filters_historical_places() {
        let config = PipelineConfig::default();
        assert_eq!(config.city_feature_class, "P");
        assert!(config.ignored_feature_codes.contains("PPLH"));
        assert!(config.ignored_feature_codes.contains("PPLX"));
        assert!(!config.ignored_feature_codes.contains("PPL"));
    }

    #[test]
    fn per_dataset_get_matches_fields() {
        let locations = DatasetLocations::geonames();
        assert_eq!(locations.get(DatasetId::Country), COUNTRY_URL);
        assert_eq!(locations.get(DatasetId::Cities), CITIES_URL);

        let mut paths = DatasetPaths::default();
        *paths.get_mut(DatasetId::Hierarchy) = PathBuf::from("h.txt");
        assert_eq!(paths.hierarchy, PathBuf::from("h.txt"));
    }
}
