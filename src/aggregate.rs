//! County estimates from the gauge mapping and one metric snapshot.

use crate::config::PeriodWindow;
use crate::error::{AppError, Result};
use crate::mapping::{CountyCoverage, GaugeCountyMapping};
use crate::model::{
    CountyFloodEstimate, CountyId, CoverageFlag, CoverageGap, GapReason, HistoricalRecord,
    MetricKind, Period, ProjectedRecord, Scenario, Severity, StationId,
};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// Estimation slot: one period, plus a scenario for projections or a
/// severity class for observed counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MetricKey {
    pub period: Period,
    pub scenario: Option<Scenario>,
    pub severity: Option<Severity>,
}

/// Station values for a single metric kind.
///
/// Built only through [`MetricSnapshot::historical`] or
/// [`MetricSnapshot::projected`], so one snapshot never mixes annual counts
/// with decadal projections. Every period present in the input gets a slot,
/// even when no station reported for it, so that it surfaces as a gap.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSnapshot {
    kind: MetricKind,
    values: BTreeMap<MetricKey, BTreeMap<StationId, f64>>,
    stations: BTreeSet<StationId>,
}

impl MetricSnapshot {
    /// Total counts are always keyed. A severity breakdown is keyed only when
    /// the feed carries it for at least one station-year.
    pub fn historical(records: impl IntoIterator<Item = HistoricalRecord>) -> Result<Self> {
        let records: Vec<HistoricalRecord> = records.into_iter().collect();
        let carried: Vec<Severity> = Severity::ALL
            .iter()
            .copied()
            .filter(|severity| {
                *severity == Severity::Total
                    || records.iter().any(|r| r.flood_days.get(*severity).is_some())
            })
            .collect();

        let mut snapshot = Self::empty(MetricKind::Historical);
        let mut seen = BTreeSet::new();

        for record in records {
            if !seen.insert((record.station_id.clone(), record.year)) {
                return Err(AppError::InvalidData(format!(
                    "Duplicate historical record for station {} year {}",
                    record.station_id, record.year
                )));
            }
            snapshot.stations.insert(record.station_id.clone());

            for severity in &carried {
                let slot = snapshot.slot(MetricKey {
                    period: Period::Year(record.year),
                    scenario: None,
                    severity: Some(*severity),
                });
                if let Some(value) = record.reported_value(*severity) {
                    slot.insert(record.station_id.clone(), value);
                }
            }
        }

        Ok(snapshot)
    }

    pub fn projected(records: impl IntoIterator<Item = ProjectedRecord>) -> Result<Self> {
        let mut snapshot = Self::empty(MetricKind::Projected);
        let mut seen = BTreeSet::new();

        for record in records {
            if !seen.insert((record.station_id.clone(), record.decade)) {
                return Err(AppError::InvalidData(format!(
                    "Duplicate projection for station {} decade {}",
                    record.station_id,
                    Period::Decade(record.decade)
                )));
            }
            snapshot.stations.insert(record.station_id.clone());

            for (scenario, value) in record.values.iter() {
                let slot = snapshot.slot(MetricKey {
                    period: Period::Decade(record.decade),
                    scenario: Some(scenario),
                    severity: None,
                });
                if let Some(value) = value {
                    slot.insert(record.station_id.clone(), value);
                }
            }
        }

        Ok(snapshot)
    }

    fn empty(kind: MetricKind) -> Self {
        Self {
            kind,
            values: BTreeMap::new(),
            stations: BTreeSet::new(),
        }
    }

    fn slot(&mut self, key: MetricKey) -> &mut BTreeMap<StationId, f64> {
        self.values.entry(key).or_default()
    }

    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    /// Keeps only periods whose start year falls inside `window`.
    pub fn restrict(mut self, window: PeriodWindow) -> Self {
        self.values
            .retain(|key, _| window.contains(key.period.start_year()));
        self
    }

    pub fn keys(&self) -> impl Iterator<Item = &MetricKey> {
        self.values.keys()
    }

    pub fn value(&self, key: &MetricKey, station: &StationId) -> Option<f64> {
        self.values.get(key).and_then(|m| m.get(station)).copied()
    }

    /// Whether the feed carries any record for `station`, reported or not.
    pub fn has_station(&self, station: &StationId) -> bool {
        self.stations.contains(station)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregationReport {
    pub kind: MetricKind,
    /// Ordered by county, period, scenario, severity.
    pub estimates: Vec<CountyFloodEstimate>,
    /// Ordered by county, period, scenario, severity.
    pub gaps: Vec<CoverageGap>,
    /// Mapped stations with no series in the snapshot at all.
    pub missing_stations: Vec<StationId>,
}

impl AggregationReport {
    pub fn partial_estimates(&self) -> usize {
        self.estimates
            .iter()
            .filter(|e| e.coverage == CoverageFlag::Partial)
            .count()
    }

    pub fn log(&self) {
        info!(
            "{} aggregation produced {} estimates ({} partial) and {} gaps",
            self.kind,
            self.estimates.len(),
            self.partial_estimates(),
            self.gaps.len()
        );

        let unmapped = self
            .gaps
            .iter()
            .filter(|g| g.reason == GapReason::UnmappedCounty)
            .count();
        if unmapped > 0 {
            debug!("{} gap rows belong to counties with no mapped gauge", unmapped);
        }
    }
}

#[derive(Debug, Clone)]
struct CountyLinks {
    county_id: CountyId,
    /// Positive-weight stations, sorted by station id.
    links: Vec<(StationId, f64)>,
}

pub struct AggregationEngine {
    counties: Vec<CountyLinks>,
}

impl AggregationEngine {
    /// `coverage` lists counties that may have no mapping rows at all; they
    /// are reported as unmapped gaps.
    pub fn new(rows: &[GaugeCountyMapping], coverage: &[CountyCoverage]) -> Self {
        let mut by_county: BTreeMap<CountyId, Vec<(StationId, f64)>> = coverage
            .iter()
            .map(|c| (c.county_id.clone(), Vec::new()))
            .collect();

        for row in rows {
            let links = by_county.entry(row.county_id.clone()).or_default();
            if row.mean_weight > 0.0 && row.mean_weight.is_finite() {
                links.push((row.station_id.clone(), row.mean_weight));
            }
        }

        let counties = by_county
            .into_iter()
            .map(|(county_id, mut links)| {
                links.sort_by(|a, b| a.0.cmp(&b.0));
                CountyLinks { county_id, links }
            })
            .collect();

        Self { counties }
    }

    pub fn county_count(&self) -> usize {
        self.counties.len()
    }

    pub fn aggregate(&self, snapshot: &MetricSnapshot) -> AggregationReport {
        let missing_stations: Vec<StationId> = self
            .counties
            .iter()
            .flat_map(|c| c.links.iter().map(|(station, _)| station))
            .filter(|station| !snapshot.has_station(station))
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        for station in &missing_stations {
            warn!(
                "Station {} is mapped but has no {} series",
                station,
                snapshot.kind()
            );
        }

        let per_county: Vec<(Vec<CountyFloodEstimate>, Vec<CoverageGap>)> = self
            .counties
            .par_iter()
            .map(|county| aggregate_county(county, snapshot))
            .collect();

        let mut estimates = Vec::new();
        let mut gaps = Vec::new();
        for (county_estimates, county_gaps) in per_county {
            estimates.extend(county_estimates);
            gaps.extend(county_gaps);
        }

        AggregationReport {
            kind: snapshot.kind(),
            estimates,
            gaps,
            missing_stations,
        }
    }
}

fn aggregate_county(
    county: &CountyLinks,
    snapshot: &MetricSnapshot,
) -> (Vec<CountyFloodEstimate>, Vec<CoverageGap>) {
    let mut estimates = Vec::new();
    let mut gaps = Vec::new();

    for key in snapshot.keys() {
        if county.links.is_empty() {
            gaps.push(gap(county, key, GapReason::UnmappedCounty));
            continue;
        }

        let mut weighted = 0.0;
        let mut total_weight = 0.0;
        let mut reporting = 0;
        for (station, weight) in &county.links {
            if let Some(value) = snapshot.value(key, station) {
                weighted += weight * value;
                total_weight += weight;
                reporting += 1;
            }
        }

        if reporting == 0 || total_weight <= 0.0 {
            gaps.push(gap(county, key, GapReason::NoReportingStations));
            continue;
        }

        estimates.push(CountyFloodEstimate {
            county_id: county.county_id.clone(),
            period: key.period,
            scenario: key.scenario,
            severity: key.severity,
            value: weighted / total_weight,
            contributing_gauges: reporting,
            coverage: if reporting == county.links.len() {
                CoverageFlag::Complete
            } else {
                CoverageFlag::Partial
            },
        });
    }

    (estimates, gaps)
}

fn gap(county: &CountyLinks, key: &MetricKey, reason: GapReason) -> CoverageGap {
    CoverageGap {
        county_id: county.county_id.clone(),
        period: key.period,
        scenario: key.scenario,
        severity: key.severity,
        mapped_gauges: county.links.len(),
        reason,
    }
}
