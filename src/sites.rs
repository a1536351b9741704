/// Site registry for the observatory monitoring service.
///
/// Defines the canonical list of observation sites whose weather collections
/// this service can query, along with their metadata and the timestamp
/// convention each collection uses. This is the single source of truth for
/// collection ids: a request naming anything not in the registry fails with
/// `FetchError::UnknownCollection` before the store is touched.
///
/// The built-in table can be replaced or extended from a `sites.toml` file.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::timestamp::TimestampConvention;

// ---------------------------------------------------------------------------
// Site metadata
// ---------------------------------------------------------------------------

/// Metadata for a single observation site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    /// Collection id, also the storage partition / table name.
    pub collection_id: String,
    /// Short display name ("APEX").
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// WGS84 latitude.
    pub latitude: f64,
    /// WGS84 longitude.
    pub longitude: f64,
    /// Altitude above sea level, metres.
    pub altitude_m: f64,
    /// How this collection writes `wdatetime`.
    pub timestamp_convention: TimestampConvention,
}

struct BuiltinSite {
    collection_id: &'static str,
    name: &'static str,
    description: &'static str,
    latitude: f64,
    longitude: f64,
    altitude_m: f64,
    timestamp_convention: TimestampConvention,
}

/// All sites known out of the box.
///
/// The APEX archive was exported with epoch-millisecond timestamps; every
/// other collection stores the canonical string form.
static BUILTIN_SITES: &[BuiltinSite] = &[
    BuiltinSite {
        collection_id: "apex_2006_2023",
        name: "APEX",
        description: "Atacama Pathfinder Experiment, Llano de Chajnantor. \
                      Longest continuous record (2006-2023).",
        latitude: -23.0058,
        longitude: -67.7592,
        altitude_m: 5105.0,
        timestamp_convention: TimestampConvention::EpochMillis,
    },
    BuiltinSite {
        collection_id: "glt_2017_2022",
        name: "GLT",
        description: "Greenland Telescope at Pituffik. Arctic site with very \
                      low PWV in winter.",
        latitude: 76.5312,
        longitude: -68.7031,
        altitude_m: 100.0,
        timestamp_convention: TimestampConvention::Canonical,
    },
    BuiltinSite {
        collection_id: "jcmt_data",
        name: "JCMT",
        description: "James Clerk Maxwell Telescope, Maunakea.",
        latitude: 19.8228,
        longitude: -155.4770,
        altitude_m: 4092.0,
        timestamp_convention: TimestampConvention::Canonical,
    },
    BuiltinSite {
        collection_id: "sma_data",
        name: "SMA",
        description: "Submillimeter Array, Maunakea.",
        latitude: 19.8242,
        longitude: -155.4781,
        altitude_m: 4080.0,
        timestamp_convention: TimestampConvention::Canonical,
    },
    BuiltinSite {
        collection_id: "smt_data",
        name: "SMT",
        description: "Submillimeter Telescope, Mount Graham.",
        latitude: 32.7016,
        longitude: -109.8912,
        altitude_m: 3185.0,
        timestamp_convention: TimestampConvention::Canonical,
    },
    BuiltinSite {
        collection_id: "lmt_data",
        name: "LMT",
        description: "Large Millimeter Telescope, Sierra Negra.",
        latitude: 18.9858,
        longitude: -97.3147,
        altitude_m: 4600.0,
        timestamp_convention: TimestampConvention::Canonical,
    },
    BuiltinSite {
        collection_id: "alma_data",
        name: "ALMA",
        description: "Atacama Large Millimeter/submillimeter Array, \
                      Chajnantor plateau.",
        latitude: -23.0193,
        longitude: -67.7532,
        altitude_m: 5058.0,
        timestamp_convention: TimestampConvention::Canonical,
    },
];

impl From<&BuiltinSite> for Site {
    fn from(b: &BuiltinSite) -> Self {
        Site {
            collection_id: b.collection_id.to_string(),
            name: b.name.to_string(),
            description: b.description.to_string(),
            latitude: b.latitude,
            longitude: b.longitude,
            altitude_m: b.altitude_m,
            timestamp_convention: b.timestamp_convention,
        }
    }
}

/// Collection ids double as table names, so they are restricted to
/// lowercase ASCII identifiers.
pub fn is_valid_collection_id(id: &str) -> bool {
    let mut chars = id.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return false,
    }
    id.len() <= 63 && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SitesFile {
    #[serde(default)]
    replace_builtin: bool,
    #[serde(default, rename = "site")]
    sites: Vec<Site>,
}

/// The set of collections this service will answer for.
#[derive(Debug, Clone, PartialEq)]
pub struct SiteRegistry {
    sites: Vec<Site>,
}

impl Default for SiteRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl SiteRegistry {
    pub fn builtin() -> Self {
        SiteRegistry {
            sites: BUILTIN_SITES.iter().map(Site::from).collect(),
        }
    }

    pub fn from_sites(sites: Vec<Site>) -> Self {
        SiteRegistry { sites }
    }

    /// Parses a `sites.toml` document. Entries override built-in sites with
    /// the same collection id and add the rest; `replace_builtin = true`
    /// starts from an empty table instead.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let file: SitesFile = toml::from_str(text)?;
        let mut registry = if file.replace_builtin {
            SiteRegistry { sites: Vec::new() }
        } else {
            SiteRegistry::builtin()
        };

        for site in file.sites {
            if !is_valid_collection_id(&site.collection_id) {
                return Err(ConfigError::Invalid {
                    field: "site.collection_id".to_string(),
                    reason: format!("'{}' is not a lowercase identifier", site.collection_id),
                });
            }
            match registry
                .sites
                .iter_mut()
                .find(|s| s.collection_id == site.collection_id)
            {
                Some(existing) => *existing = site,
                None => registry.sites.push(site),
            }
        }
        Ok(registry)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Looks up a site by collection id. Returns `None` if not found.
    pub fn find(&self, collection_id: &str) -> Option<&Site> {
        self.sites.iter().find(|s| s.collection_id == collection_id)
    }

    pub fn all_collection_ids(&self) -> Vec<&str> {
        self.sites.iter().map(|s| s.collection_id.as_str()).collect()
    }

    pub fn sites(&self) -> &[Site] {
        &self.sites
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
