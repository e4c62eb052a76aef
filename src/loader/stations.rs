use super::read_input;
use crate::error::{AppError, Result};
use crate::geo;
use crate::model::{Station, StationId};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tracing::{debug, info};

const DEFAULT_REGION: &str = "unknown";

/// Accepted station feed shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StationFormat {
    /// `station_id,lon,lat,region[,name]`
    Csv,
    /// Registry keyed by station id, with nested `location`.
    Yaml,
    /// Legacy list of `{id, name, lat, lng, state}`.
    LegacyJson,
}

impl StationFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        match ext.as_deref() {
            Some("csv") => Ok(StationFormat::Csv),
            Some("yaml") | Some("yml") => Ok(StationFormat::Yaml),
            Some("json") => Ok(StationFormat::LegacyJson),
            _ => Err(AppError::Config(format!(
                "Cannot tell station feed format from '{}', expected .csv, .yaml or .json",
                path.display()
            ))),
        }
    }
}

/// Station codes arrive as numbers in YAML keys and legacy JSON.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(untagged)]
enum RawId {
    Number(u64),
    Text(String),
}

impl RawId {
    fn to_station_id(&self) -> Result<StationId> {
        match self {
            RawId::Number(n) => StationId::new(&n.to_string()),
            RawId::Text(s) => StationId::new(s),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CsvStation {
    station_id: String,
    lon: f64,
    lat: f64,
    region: String,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Registry {
    #[serde(default)]
    metadata: RegistryMetadata,
    stations: BTreeMap<RawId, RegistryStation>,
}

#[derive(Debug, Default, Deserialize)]
struct RegistryMetadata {
    #[serde(default)]
    region: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RegistryStation {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    region: Option<String>,
    #[serde(flatten)]
    position: RegistryPosition,
}

/// Nested `location: {lat, lon}` or older flat `latitude`/`longitude`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RegistryPosition {
    Nested { location: LatLon },
    Flat { latitude: f64, longitude: f64 },
}

#[derive(Debug, Deserialize)]
struct LatLon {
    lat: f64,
    lon: f64,
}

#[derive(Debug, Deserialize)]
struct LegacyStation {
    id: RawId,
    #[serde(default)]
    name: Option<String>,
    lat: f64,
    lng: f64,
    #[serde(default)]
    state: Option<String>,
}

pub fn parse_stations(content: &str, format: StationFormat) -> Result<Vec<Station>> {
    let raw = match format {
        StationFormat::Csv => from_csv(content)?,
        StationFormat::Yaml => from_registry(content)?,
        StationFormat::LegacyJson => from_legacy(content)?,
    };
    normalize(raw)
}

pub fn load_stations<P: AsRef<Path>>(path: P) -> Result<Vec<Station>> {
    let path = path.as_ref();
    let format = StationFormat::from_path(path)?;
    debug!("Reading {:?} station feed {}", format, path.display());

    let stations = parse_stations(&read_input(path)?, format)?;
    info!("Loaded {} stations from {}", stations.len(), path.display());
    Ok(stations)
}

fn from_csv(content: &str) -> Result<Vec<Station>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let mut stations = Vec::new();
    for result in rdr.deserialize() {
        let row: CsvStation = result?;
        stations.push(Station {
            id: StationId::new(&row.station_id)?,
            name: row.name.filter(|n| !n.is_empty()),
            lon: row.lon,
            lat: row.lat,
            region: normalize_region(Some(&row.region)),
        });
    }
    Ok(stations)
}

fn from_registry(content: &str) -> Result<Vec<Station>> {
    let registry: Registry = serde_yaml::from_str(content)?;
    let fallback_region = registry.metadata.region;

    registry
        .stations
        .iter()
        .map(|(id, entry)| {
            let (lat, lon) = match &entry.position {
                RegistryPosition::Nested { location } => (location.lat, location.lon),
                RegistryPosition::Flat {
                    latitude,
                    longitude,
                } => (*latitude, *longitude),
            };
            Ok(Station {
                id: id.to_station_id()?,
                name: entry.name.clone(),
                lon,
                lat,
                region: normalize_region(
                    entry.region.as_deref().or(fallback_region.as_deref()),
                ),
            })
        })
        .collect()
}

fn from_legacy(content: &str) -> Result<Vec<Station>> {
    let entries: Vec<LegacyStation> = serde_json::from_str(content)?;

    entries
        .into_iter()
        .map(|entry| {
            Ok(Station {
                id: entry.id.to_station_id()?,
                name: entry.name,
                lon: entry.lng,
                lat: entry.lat,
                region: normalize_region(entry.state.as_deref()),
            })
        })
        .collect()
}

fn normalize_region(region: Option<&str>) -> String {
    match region.map(str::trim) {
        Some(r) if !r.is_empty() => r.to_lowercase(),
        _ => DEFAULT_REGION.to_string(),
    }
}

/// Validates coordinates, rejects repeated ids and sorts by id.
fn normalize(mut stations: Vec<Station>) -> Result<Vec<Station>> {
    let mut seen = HashSet::new();
    for station in &stations {
        if !geo::is_valid_coordinate(station.lon, station.lat) {
            return Err(AppError::InvalidData(format!(
                "Station {} has invalid coordinate ({}, {})",
                station.id, station.lon, station.lat
            )));
        }
        if !seen.insert(station.id.clone()) {
            return Err(AppError::InvalidData(format!(
                "Duplicate station id {}",
                station.id
            )));
        }
    }

    stations.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(stations)
}
