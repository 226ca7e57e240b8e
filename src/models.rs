use serde::Serialize;
use std::fmt;

/// Logical name of each input file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatasetId {
    Admin1,
    Admin2,
    Country,
    PostalCode,
    Hierarchy,
    Cities,
}

impl DatasetId {
    pub const ALL: [DatasetId; 6] = [
        DatasetId::Admin1,
        DatasetId::Admin2,
        DatasetId::Country,
        DatasetId::PostalCode,
        DatasetId::Hierarchy,
        DatasetId::Cities,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetId::Admin1 => "admin1",
            DatasetId::Admin2 => "admin2",
            DatasetId::Country => "country",
            DatasetId::PostalCode => "postal-code",
            DatasetId::Hierarchy => "hierarchy",
            DatasetId::Cities => "cities",
        }
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One tab-separated row, fields in file order.
pub type RawFields = Vec<String>;

#[derive(Debug, Clone, PartialEq)]
pub struct AdminRegion {
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Country {
    pub iso_code: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PostalCodeEntry {
    pub country: String,
    pub postal_code: String,
    pub name: String,
    pub admin1_code: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HierarchyEdge {
    pub parent: String,
    pub child: String,
}

/// Enriched place record sent to the search index. Field names match the
/// index's searchable attributes.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct City {
    pub geoname_id: String,
    pub name: String,
    pub alternate_names: String,
    pub f_class: String,
    pub f_code: String,
    pub latitude: f64,
    pub longitude: f64,
    pub population: i64,
    pub country_code: String,
    pub country: String,
    pub administrative_code: String,
    pub administrative: String,
    pub administrative2_code: String,
    pub administrative2: String,
    pub postal_code: String,
}

/// A city named as a hierarchy child, held until every parent has been seen.
#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateCandidate {
    pub city: City,
    pub edge: HierarchyEdge,
}
