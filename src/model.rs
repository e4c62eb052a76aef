//! Shared data types for the imputation pipeline.
//!
//! Geometry and metric inputs are normalized into these types once, at load
//! time, and are read-only afterwards.

use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

pub type PointId = u64;

/// NOAA tide station identifier (CO-OPS codes are 7 digits, a few legacy
/// codes are shorter).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StationId(Arc<str>);

impl StationId {
    pub const MIN_LEN: usize = 4;
    pub const MAX_LEN: usize = 7;

    pub fn new(raw: &str) -> Result<Self> {
        let id = raw.trim();
        let len = id.chars().count();
        if !(Self::MIN_LEN..=Self::MAX_LEN).contains(&len) {
            return Err(AppError::InvalidData(format!(
                "Station id '{}' must be {}-{} characters, got {}",
                id,
                Self::MIN_LEN,
                Self::MAX_LEN,
                len
            )));
        }
        if !id.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(AppError::InvalidData(format!(
                "Station id '{}' must be alphanumeric",
                id
            )));
        }
        Ok(Self(Arc::from(id)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for StationId {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(&value)
    }
}

impl From<StationId> for String {
    fn from(value: StationId) -> Self {
        value.0.to_string()
    }
}

impl fmt::Display for StationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// County FIPS code (5 digits for states, territories vary).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CountyId(Arc<str>);

impl CountyId {
    pub fn new(raw: &str) -> Result<Self> {
        let id = raw.trim();
        if id.is_empty() {
            return Err(AppError::InvalidData("County id cannot be empty".to_string()));
        }
        Ok(Self(Arc::from(id)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for CountyId {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(&value)
    }
}

impl From<CountyId> for String {
    fn from(value: CountyId) -> Self {
        value.0.to_string()
    }
}

impl fmt::Display for CountyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A synthetic coastal sample location owned by one county.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferencePoint {
    pub point_id: PointId,
    pub county_id: CountyId,
    pub lon: f64,
    pub lat: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Station {
    pub id: StationId,
    pub name: Option<String>,
    pub lon: f64,
    pub lat: f64,
    /// Region tag, e.g. `gulf_coast` or a state code for legacy feeds.
    pub region: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NeighborCandidate {
    pub point_id: PointId,
    pub station_id: StationId,
    pub distance_km: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WeightedAssignment {
    pub point_id: PointId,
    pub county_id: CountyId,
    pub station_id: StationId,
    pub weight: f64,
    pub distance_km: f64,
    /// 1-based distance rank of the station for this point.
    pub rank: usize,
}

/// Search and weighting result for a single reference point.
#[derive(Debug, Clone, PartialEq)]
pub struct PointOutcome {
    pub point_id: PointId,
    pub county_id: CountyId,
    pub assignments: Vec<WeightedAssignment>,
    /// Nearest station overall, kept even when it was not retained so that
    /// coverage gaps can be sized.
    pub nearest: Option<NeighborCandidate>,
}

impl PointOutcome {
    pub fn is_unassigned(&self) -> bool {
        self.assignments.is_empty()
    }

    pub fn total_weight(&self) -> f64 {
        self.assignments.iter().map(|a| a.weight).sum()
    }
}

// ---------------------------------------------------------------------------
// Metric feed
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Historical,
    Projected,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Historical => "historical",
            MetricKind::Projected => "projected",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sea-level-rise trajectory used by the decadal projections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    Low,
    IntermediateLow,
    Intermediate,
    IntermediateHigh,
    High,
}

impl Scenario {
    pub const ALL: [Scenario; 5] = [
        Scenario::Low,
        Scenario::IntermediateLow,
        Scenario::Intermediate,
        Scenario::IntermediateHigh,
        Scenario::High,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Scenario::Low => "low",
            Scenario::IntermediateLow => "intermediate_low",
            Scenario::Intermediate => "intermediate",
            Scenario::IntermediateHigh => "intermediate_high",
            Scenario::High => "high",
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Calendar year for observed counts, decade start year for projections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Period {
    Year(i32),
    Decade(i32),
}

impl Period {
    pub fn start_year(&self) -> i32 {
        match self {
            Period::Year(y) | Period::Decade(y) => *y,
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Period::Year(y) => write!(f, "{}", y),
            Period::Decade(d) => write!(f, "{}s", d),
        }
    }
}

/// Flood severity class of the historical counts. `Total` is the sum of the
/// minor, moderate and major days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Total,
    Major,
    Moderate,
    Minor,
}

impl Severity {
    pub const ALL: [Severity; 4] = [
        Severity::Total,
        Severity::Major,
        Severity::Moderate,
        Severity::Minor,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Total => "total",
            Severity::Major => "major",
            Severity::Moderate => "moderate",
            Severity::Minor => "minor",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flood-day counts per severity for one station-year.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SeverityValues(pub [Option<f64>; 4]);

impl SeverityValues {
    /// Only the total count; the per-severity breakdown is unknown.
    pub fn total(days: Option<f64>) -> Self {
        let mut values = Self::default();
        values.0[Severity::Total as usize] = days;
        values
    }

    pub fn get(&self, severity: Severity) -> Option<f64> {
        self.0[severity as usize].filter(|v| v.is_finite())
    }
}

/// One year of observed flood days at a station.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoricalRecord {
    pub station_id: StationId,
    pub year: i32,
    pub flood_days: SeverityValues,
    /// Days without observations; a full year of missing days means the
    /// station was not reporting yet.
    pub missing_days: Option<f64>,
}

impl HistoricalRecord {
    /// Reported count for `severity`, or `None` when the year carries no
    /// observation. Zero flood days is a valid measurement.
    pub fn reported_value(&self, severity: Severity) -> Option<f64> {
        let days = self.flood_days.get(severity)?;
        if let Some(missing) = self.missing_days {
            if missing >= days_in_year(self.year) as f64 {
                return None;
            }
        }
        Some(days)
    }
}

fn days_in_year(year: i32) -> u32 {
    if (year % 4 == 0 && year % 100 != 0) || year % 400 == 0 {
        366
    } else {
        365
    }
}

/// Five-way scenario vector for one decade at a station.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScenarioValues(pub [Option<f64>; 5]);

impl ScenarioValues {
    pub fn get(&self, scenario: Scenario) -> Option<f64> {
        self.0[scenario as usize].filter(|v| v.is_finite())
    }

    pub fn iter(&self) -> impl Iterator<Item = (Scenario, Option<f64>)> + '_ {
        Scenario::ALL.iter().map(move |s| (*s, self.get(*s)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectedRecord {
    pub station_id: StationId,
    /// First year of the decade, e.g. 2050 for the 2050s.
    pub decade: i32,
    pub values: ScenarioValues,
}

// ---------------------------------------------------------------------------
// County output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoverageFlag {
    /// Every mapped station with positive weight reported.
    Complete,
    /// Some mapped stations were silent; weights were renormalized.
    Partial,
}

impl CoverageFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            CoverageFlag::Complete => "complete",
            CoverageFlag::Partial => "partial",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CountyFloodEstimate {
    pub county_id: CountyId,
    pub period: Period,
    pub scenario: Option<Scenario>,
    pub severity: Option<Severity>,
    pub value: f64,
    pub contributing_gauges: usize,
    pub coverage: CoverageFlag,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapReason {
    /// The county has mapped stations but none reported for the period.
    NoReportingStations,
    /// No station carries positive weight for the county.
    UnmappedCounty,
}

impl GapReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            GapReason::NoReportingStations => "no_reporting_stations",
            GapReason::UnmappedCounty => "unmapped_county",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CoverageGap {
    pub county_id: CountyId,
    pub period: Period,
    pub scenario: Option<Scenario>,
    pub severity: Option<Severity>,
    pub mapped_gauges: usize,
    pub reason: GapReason,
}
