//! Roll-up of point-level assignments into the station-to-county mapping.
//!
//! Outcomes are folded into [`MappingAccumulator`]s, one per worker, which
//! merge pairwise. Raw contributions are kept until [`MappingBuilder::finish`]
//! sorts them, so the summed output is bit-identical for any input order or
//! partitioning.

use crate::model::{CountyId, PointId, PointOutcome, Station, StationId};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

const UNKNOWN_REGION: &str = "unknown";

/// One (county, station) row of the persisted mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaugeCountyMapping {
    pub county_id: CountyId,
    pub station_id: StationId,
    /// Sum of point weights over the county's reference point count.
    pub mean_weight: f64,
    pub mean_distance_km: f64,
    pub point_count: usize,
    pub min_distance_km: f64,
    pub max_distance_km: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountyCoverage {
    pub county_id: CountyId,
    pub reference_points: usize,
    pub assigned_points: usize,
    pub gauges: usize,
}

impl CountyCoverage {
    pub fn is_unmapped(&self) -> bool {
        self.assigned_points == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistanceStats {
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
}

impl DistanceStats {
    pub fn from_values(mut values: Vec<f64>) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        values.sort_by(|a, b| a.total_cmp(b));

        let count = values.len();
        let mid = count / 2;
        let median = if count % 2 == 0 {
            (values[mid - 1] + values[mid]) / 2.0
        } else {
            values[mid]
        };

        Some(Self {
            count,
            mean: values.iter().sum::<f64>() / count as f64,
            median,
            min: values[0],
            max: values[count - 1],
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaugeBucket {
    pub points: usize,
    pub fraction: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionCoverage {
    pub assignments: usize,
    pub mean_distance_km: f64,
    pub max_distance_km: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageSummary {
    pub total_points: usize,
    pub assigned_points: usize,
    pub unassigned_points: usize,
    /// Points keyed by how many gauges they were assigned. Bucket 0 is
    /// always present.
    pub gauge_buckets: BTreeMap<usize, GaugeBucket>,
    /// Distance statistics per 1-based station rank.
    pub rank_distances: BTreeMap<usize, DistanceStats>,
    /// How far the nearest station was for points that got none.
    pub unassigned_nearest: Option<DistanceStats>,
    pub regions: BTreeMap<String, RegionCoverage>,
}

impl CoverageSummary {
    pub fn assigned_fraction(&self) -> f64 {
        if self.total_points == 0 {
            return 0.0;
        }
        self.assigned_points as f64 / self.total_points as f64
    }
}

#[derive(Debug, Clone, Copy)]
struct Contribution {
    point_id: PointId,
    weight: f64,
    distance_km: f64,
}

#[derive(Debug, Clone, Copy, Default)]
struct CountyTally {
    points: usize,
    assigned: usize,
}

/// Partial roll-up over a subset of point outcomes.
#[derive(Debug, Default)]
pub struct MappingAccumulator {
    links: HashMap<(CountyId, StationId), Vec<Contribution>>,
    counties: HashMap<CountyId, CountyTally>,
    gauge_buckets: BTreeMap<usize, usize>,
    rank_distances: BTreeMap<usize, Vec<f64>>,
    unassigned_nearest: Vec<f64>,
}

impl MappingAccumulator {
    pub fn add(&mut self, outcome: &PointOutcome) {
        let tally = self.counties.entry(outcome.county_id.clone()).or_default();
        tally.points += 1;
        if !outcome.is_unassigned() {
            tally.assigned += 1;
        }

        *self
            .gauge_buckets
            .entry(outcome.assignments.len())
            .or_default() += 1;

        if outcome.is_unassigned() {
            if let Some(nearest) = &outcome.nearest {
                self.unassigned_nearest.push(nearest.distance_km);
            }
            return;
        }

        for assignment in &outcome.assignments {
            self.links
                .entry((assignment.county_id.clone(), assignment.station_id.clone()))
                .or_default()
                .push(Contribution {
                    point_id: assignment.point_id,
                    weight: assignment.weight,
                    distance_km: assignment.distance_km,
                });
            self.rank_distances
                .entry(assignment.rank)
                .or_default()
                .push(assignment.distance_km);
        }
    }

    pub fn merge(mut self, other: MappingAccumulator) -> MappingAccumulator {
        for (key, mut contributions) in other.links {
            self.links.entry(key).or_default().append(&mut contributions);
        }
        for (county, tally) in other.counties {
            let entry = self.counties.entry(county).or_default();
            entry.points += tally.points;
            entry.assigned += tally.assigned;
        }
        for (bucket, points) in other.gauge_buckets {
            *self.gauge_buckets.entry(bucket).or_default() += points;
        }
        for (rank, mut distances) in other.rank_distances {
            self.rank_distances
                .entry(rank)
                .or_default()
                .append(&mut distances);
        }
        self.unassigned_nearest.extend(other.unassigned_nearest);
        self
    }

    pub fn point_count(&self) -> usize {
        self.counties.values().map(|t| t.points).sum()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MappingResult {
    /// Sorted by county, then station.
    pub rows: Vec<GaugeCountyMapping>,
    /// Sorted by county.
    pub counties: Vec<CountyCoverage>,
    pub summary: CoverageSummary,
}

impl MappingResult {
    pub fn log(&self) {
        let summary = &self.summary;
        info!(
            "Mapping covers {} counties with {} gauge links; {}/{} points assigned ({:.2}%)",
            self.counties.len(),
            self.rows.len(),
            summary.assigned_points,
            summary.total_points,
            summary.assigned_fraction() * 100.0
        );

        for (gauges, bucket) in &summary.gauge_buckets {
            debug!(
                "  {} gauge(s): {} points ({:.2}%)",
                gauges,
                bucket.points,
                bucket.fraction * 100.0
            );
        }

        for (rank, stats) in &summary.rank_distances {
            debug!(
                "  rank {}: mean {:.2} km, median {:.2} km, min {:.2} km, max {:.2} km",
                rank, stats.mean, stats.median, stats.min, stats.max
            );
        }

        if summary.unassigned_points > 0 {
            match &summary.unassigned_nearest {
                Some(stats) => warn!(
                    "{} points have no gauge in range; their nearest gauge is {:.1} km away on average (max {:.1} km)",
                    summary.unassigned_points, stats.mean, stats.max
                ),
                None => warn!("{} points have no gauge in range", summary.unassigned_points),
            }
        }

        let unmapped = self.counties.iter().filter(|c| c.is_unmapped()).count();
        if unmapped > 0 {
            warn!("{} counties have no assigned gauge", unmapped);
        }
    }
}

pub struct MappingBuilder<'a> {
    regions: HashMap<&'a StationId, &'a str>,
}

impl<'a> MappingBuilder<'a> {
    pub fn new(stations: &'a [Station]) -> Self {
        let regions = stations
            .iter()
            .map(|s| (&s.id, s.region.as_str()))
            .collect();
        Self { regions }
    }

    pub fn build(&self, outcomes: &[PointOutcome]) -> MappingResult {
        let mut acc = MappingAccumulator::default();
        for outcome in outcomes {
            acc.add(outcome);
        }
        self.finish(acc)
    }

    pub fn build_parallel(&self, outcomes: &[PointOutcome]) -> MappingResult {
        let acc = outcomes
            .par_iter()
            .fold(MappingAccumulator::default, |mut acc, outcome| {
                acc.add(outcome);
                acc
            })
            .reduce(MappingAccumulator::default, MappingAccumulator::merge);
        self.finish(acc)
    }

    pub fn finish(&self, acc: MappingAccumulator) -> MappingResult {
        let MappingAccumulator {
            links,
            counties,
            gauge_buckets,
            rank_distances,
            unassigned_nearest,
        } = acc;

        let mut links: Vec<_> = links.into_iter().collect();
        links.sort_by(|a, b| a.0.cmp(&b.0));

        let mut rows = Vec::with_capacity(links.len());
        let mut region_distances: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        let mut gauges_per_county: HashMap<CountyId, usize> = HashMap::new();

        for ((county_id, station_id), mut contributions) in links {
            contributions.sort_by(|a, b| {
                a.point_id
                    .cmp(&b.point_id)
                    .then(a.weight.total_cmp(&b.weight))
                    .then(a.distance_km.total_cmp(&b.distance_km))
            });

            let county_points = counties
                .get(&county_id)
                .map(|t| t.points)
                .unwrap_or(0)
                .max(1);
            let count = contributions.len();
            let weight_sum: f64 = contributions.iter().map(|c| c.weight).sum();
            let distance_sum: f64 = contributions.iter().map(|c| c.distance_km).sum();
            let (min_distance_km, max_distance_km) = contributions.iter().fold(
                (f64::INFINITY, f64::NEG_INFINITY),
                |(lo, hi), c| (lo.min(c.distance_km), hi.max(c.distance_km)),
            );

            let region = self
                .regions
                .get(&station_id)
                .copied()
                .unwrap_or(UNKNOWN_REGION);
            region_distances
                .entry(region.to_string())
                .or_default()
                .extend(contributions.iter().map(|c| c.distance_km));

            *gauges_per_county.entry(county_id.clone()).or_default() += 1;

            rows.push(GaugeCountyMapping {
                county_id,
                station_id,
                mean_weight: weight_sum / county_points as f64,
                mean_distance_km: distance_sum / count as f64,
                point_count: count,
                min_distance_km,
                max_distance_km,
            });
        }

        let mut county_rows: Vec<CountyCoverage> = counties
            .iter()
            .map(|(county_id, tally)| CountyCoverage {
                county_id: county_id.clone(),
                reference_points: tally.points,
                assigned_points: tally.assigned,
                gauges: gauges_per_county.get(county_id).copied().unwrap_or(0),
            })
            .collect();
        county_rows.sort_by(|a, b| a.county_id.cmp(&b.county_id));

        let total_points: usize = counties.values().map(|t| t.points).sum();
        let unassigned_points = gauge_buckets.get(&0).copied().unwrap_or(0);

        let mut buckets: BTreeMap<usize, GaugeBucket> = gauge_buckets
            .into_iter()
            .map(|(gauges, points)| {
                (
                    gauges,
                    GaugeBucket {
                        points,
                        fraction: fraction(points, total_points),
                    },
                )
            })
            .collect();
        buckets.entry(0).or_insert(GaugeBucket {
            points: 0,
            fraction: 0.0,
        });

        let rank_distances = rank_distances
            .into_iter()
            .filter_map(|(rank, distances)| {
                DistanceStats::from_values(distances).map(|stats| (rank, stats))
            })
            .collect();

        let regions = region_distances
            .into_iter()
            .filter_map(|(region, distances)| {
                DistanceStats::from_values(distances).map(|stats| {
                    (
                        region,
                        RegionCoverage {
                            assignments: stats.count,
                            mean_distance_km: stats.mean,
                            max_distance_km: stats.max,
                        },
                    )
                })
            })
            .collect();

        let summary = CoverageSummary {
            total_points,
            assigned_points: total_points - unassigned_points,
            unassigned_points,
            gauge_buckets: buckets,
            rank_distances,
            unassigned_nearest: DistanceStats::from_values(unassigned_nearest),
            regions,
        };

        MappingResult {
            rows,
            counties: county_rows,
            summary,
        }
    }
}

fn fraction(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}
