//! Station lookup for reference points.
//!
//! Stations are indexed in an R-tree over Earth-centred coordinates. Chord
//! length grows monotonically with great-circle distance, so a chord radius
//! query returns exactly the stations inside the matching arc radius; every
//! reported distance is recomputed with haversine.

use crate::error::{AppError, Result};
use crate::geo;
use crate::model::{NeighborCandidate, ReferencePoint, Station};
use rstar::{PointDistance, RTree, RTreeObject, AABB};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::debug;

/// First radius tried when ranking without a distance cutoff. Doubled until
/// enough stations fall inside.
const INITIAL_UNBOUNDED_RADIUS_KM: f64 = 100.0;

/// Relative padding on the chord radius so float rounding in the ECEF
/// projection never hides a station sitting on the cutoff.
const CHORD_PADDING: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SelectionPolicy {
    /// Up to `max_gauges_per_point` stations, none farther than
    /// `max_search_distance_km`. A point may get none.
    Bounded {
        #[serde(default = "default_max_gauges_per_point")]
        max_gauges_per_point: usize,
        #[serde(default = "default_max_search_distance_km")]
        max_search_distance_km: f64,
    },
    /// Always the `fixed_gauge_count` nearest stations, however far.
    Forced {
        #[serde(default = "default_fixed_gauge_count")]
        fixed_gauge_count: usize,
    },
}

fn default_max_gauges_per_point() -> usize {
    3
}

fn default_max_search_distance_km() -> f64 {
    100.0
}

fn default_fixed_gauge_count() -> usize {
    2
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        SelectionPolicy::Bounded {
            max_gauges_per_point: default_max_gauges_per_point(),
            max_search_distance_km: default_max_search_distance_km(),
        }
    }
}

impl SelectionPolicy {
    /// Upper bound on stations per point.
    pub fn gauges_per_point(&self) -> usize {
        match self {
            SelectionPolicy::Bounded {
                max_gauges_per_point,
                ..
            } => *max_gauges_per_point,
            SelectionPolicy::Forced { fixed_gauge_count } => *fixed_gauge_count,
        }
    }

    pub fn is_forced(&self) -> bool {
        matches!(self, SelectionPolicy::Forced { .. })
    }

    pub fn describe(&self) -> String {
        match self {
            SelectionPolicy::Bounded {
                max_gauges_per_point,
                max_search_distance_km,
            } => format!(
                "bounded (up to {} gauges within {:.1} km)",
                max_gauges_per_point, max_search_distance_km
            ),
            SelectionPolicy::Forced { fixed_gauge_count } => {
                format!("forced ({} nearest gauges, no distance cutoff)", fixed_gauge_count)
            }
        }
    }
}

struct IndexedStation {
    position: [f64; 3],
    index: usize,
}

impl RTreeObject for IndexedStation {
    type Envelope = AABB<[f64; 3]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.position)
    }
}

impl PointDistance for IndexedStation {
    /// Squared chord length in km².
    fn distance_2(&self, point: &[f64; 3]) -> f64 {
        let dx = self.position[0] - point[0];
        let dy = self.position[1] - point[1];
        let dz = self.position[2] - point[2];
        dx * dx + dy * dy + dz * dz
    }
}

/// Orders by distance, then station id so equal distances are reproducible.
pub fn compare_candidates(a: &NeighborCandidate, b: &NeighborCandidate) -> Ordering {
    a.distance_km
        .total_cmp(&b.distance_km)
        .then_with(|| a.station_id.cmp(&b.station_id))
}

pub struct NeighborSearch<'a> {
    stations: &'a [Station],
    tree: RTree<IndexedStation>,
    policy: SelectionPolicy,
}

impl<'a> NeighborSearch<'a> {
    pub fn new(stations: &'a [Station], policy: SelectionPolicy) -> Result<Self> {
        if stations.is_empty() {
            return Err(AppError::InvalidData(
                "Station set is empty, nothing to search".to_string(),
            ));
        }

        if let SelectionPolicy::Forced { fixed_gauge_count } = policy {
            if stations.len() < fixed_gauge_count {
                return Err(AppError::InvalidData(format!(
                    "Forced selection needs {} stations but only {} are available",
                    fixed_gauge_count,
                    stations.len()
                )));
            }
        }

        let entries = stations
            .iter()
            .enumerate()
            .map(|(index, station)| IndexedStation {
                position: geo::to_ecef_km(station.lon, station.lat),
                index,
            })
            .collect();
        let tree = RTree::bulk_load(entries);

        debug!(
            "Indexed {} stations for {} search",
            stations.len(),
            policy.describe()
        );

        Ok(Self {
            stations,
            tree,
            policy,
        })
    }

    pub fn policy(&self) -> SelectionPolicy {
        self.policy
    }

    pub fn station_count(&self) -> usize {
        self.stations.len()
    }

    /// Candidate stations for `point` under the configured policy, nearest
    /// first.
    pub fn candidates(&self, point: &ReferencePoint) -> Vec<NeighborCandidate> {
        match self.policy {
            SelectionPolicy::Bounded {
                max_gauges_per_point,
                max_search_distance_km,
            } => {
                let mut found = self.within(point, max_search_distance_km);
                found.truncate(max_gauges_per_point);
                found
            }
            SelectionPolicy::Forced { fixed_gauge_count } => {
                self.nearest_k(point, fixed_gauge_count)
            }
        }
    }

    /// Nearest station regardless of policy.
    pub fn nearest(&self, point: &ReferencePoint) -> Option<NeighborCandidate> {
        self.nearest_k(point, 1).into_iter().next()
    }

    /// All stations within `radius_km` of `point`, sorted.
    pub fn within(&self, point: &ReferencePoint, radius_km: f64) -> Vec<NeighborCandidate> {
        if radius_km >= geo::MAX_ARC_KM {
            return self.all_sorted(point);
        }

        let query = geo::to_ecef_km(point.lon, point.lat);
        let chord = geo::chord_for_arc_km(radius_km) * (1.0 + CHORD_PADDING) + CHORD_PADDING;

        let mut found: Vec<NeighborCandidate> = self
            .tree
            .locate_within_distance(query, chord * chord)
            .map(|entry| self.candidate(point, entry.index))
            .filter(|candidate| candidate.distance_km <= radius_km)
            .collect();
        found.sort_by(compare_candidates);
        found
    }

    fn nearest_k(&self, point: &ReferencePoint, k: usize) -> Vec<NeighborCandidate> {
        let k = k.min(self.stations.len());
        if k == 0 {
            return Vec::new();
        }

        let mut radius = INITIAL_UNBOUNDED_RADIUS_KM;
        loop {
            let mut found = self.within(point, radius);
            // Every station inside the radius is present, so the k nearest
            // (and anything tied with the k-th) are among them.
            if found.len() >= k || radius >= geo::MAX_ARC_KM {
                found.truncate(k);
                return found;
            }
            radius = (radius * 2.0).min(geo::MAX_ARC_KM);
        }
    }

    fn all_sorted(&self, point: &ReferencePoint) -> Vec<NeighborCandidate> {
        let mut found: Vec<NeighborCandidate> = (0..self.stations.len())
            .map(|index| self.candidate(point, index))
            .collect();
        found.sort_by(compare_candidates);
        found
    }

    fn candidate(&self, point: &ReferencePoint, index: usize) -> NeighborCandidate {
        let station = &self.stations[index];
        NeighborCandidate {
            point_id: point.point_id,
            station_id: station.id.clone(),
            distance_km: geo::haversine_km(point.lon, point.lat, station.lon, station.lat),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CountyId, StationId};

    fn station(id: &str, lon: f64, lat: f64) -> Station {
        Station {
            id: StationId::new(id).unwrap(),
            name: None,
            lon,
            lat,
            region: "test".to_string(),
        }
    }

    fn point(lon: f64, lat: f64) -> ReferencePoint {
        ReferencePoint {
            point_id: 1,
            county_id: CountyId::new("12086").unwrap(),
            lon,
            lat,
        }
    }

    fn ids(found: &[NeighborCandidate]) -> Vec<&str> {
        found.iter().map(|c| c.station_id.as_str()).collect()
    }

    #[test]
    fn test_bounded_orders_and_truncates() {
        let stations = vec![
            station("8723214", -80.0, 25.0),
            station("8723970", -80.5, 25.0),
            station("8724580", -80.2, 25.0),
            station("8725110", -81.0, 25.0),
        ];
        let search = NeighborSearch::new(
            &stations,
            SelectionPolicy::Bounded {
                max_gauges_per_point: 3,
                max_search_distance_km: 200.0,
            },
        )
        .unwrap();

        let found = search.candidates(&point(-80.0, 25.0));
        assert_eq!(ids(&found), vec!["8723214", "8724580", "8723970"]);
        assert_eq!(found[0].distance_km, 0.0);
    }

    #[test]
    fn test_bounded_excludes_beyond_radius() {
        let stations = vec![station("9414290", -122.47, 37.81)];
        let search = NeighborSearch::new(
            &stations,
            SelectionPolicy::Bounded {
                max_gauges_per_point: 3,
                max_search_distance_km: 50.0,
            },
        )
        .unwrap();

        // Monterey is ~140 km from the Golden Gate gauge.
        assert!(search.candidates(&point(-121.89, 36.60)).is_empty());
        assert!(search.nearest(&point(-121.89, 36.60)).is_some());
    }

    #[test]
    fn test_ties_break_on_station_id() {
        let stations = vec![
            station("8500002", -70.0, 41.0),
            station("8500001", -70.0, 41.0),
            station("8500003", -70.0, 41.0),
        ];
        let search = NeighborSearch::new(
            &stations,
            SelectionPolicy::Bounded {
                max_gauges_per_point: 2,
                max_search_distance_km: 100.0,
            },
        )
        .unwrap();

        let found = search.candidates(&point(-70.1, 41.0));
        assert_eq!(ids(&found), vec!["8500001", "8500002"]);
    }

    #[test]
    fn test_forced_ignores_distance() {
        let stations = vec![
            station("1612340", -157.87, 21.31),
            station("9414290", -122.47, 37.81),
            station("8443970", -71.05, 42.35),
        ];
        let search =
            NeighborSearch::new(&stations, SelectionPolicy::Forced { fixed_gauge_count: 2 })
                .unwrap();

        // Guam: thousands of km from every station.
        let found = search.candidates(&point(144.79, 13.44));
        assert_eq!(found.len(), 2);
        assert_eq!(ids(&found), vec!["1612340", "9414290"]);
        assert!(found[0].distance_km > 5000.0);
    }

    #[test]
    fn test_search_crosses_antimeridian() {
        let stations = vec![station("9461380", 179.9, 51.8), station("9462450", -170.0, 52.0)];
        let search = NeighborSearch::new(
            &stations,
            SelectionPolicy::Bounded {
                max_gauges_per_point: 1,
                max_search_distance_km: 50.0,
            },
        )
        .unwrap();

        let found = search.candidates(&point(-179.9, 51.8));
        assert_eq!(ids(&found), vec!["9461380"]);
    }

    #[test]
    fn test_forced_requires_enough_stations() {
        let stations = vec![station("8443970", -71.05, 42.35)];
        let result = NeighborSearch::new(&stations, SelectionPolicy::Forced { fixed_gauge_count: 2 });
        assert!(matches!(result, Err(AppError::InvalidData(_))));
    }

    #[test]
    fn test_empty_station_set_rejected() {
        let result = NeighborSearch::new(&[], SelectionPolicy::default());
        assert!(result.is_err());
    }

    #[test]
    fn test_policy_deserializes_from_tagged_yaml() {
        let bounded: SelectionPolicy = serde_yaml::from_str(
            "mode: bounded\nmax_gauges_per_point: 3\nmax_search_distance_km: 200\n",
        )
        .unwrap();
        assert_eq!(
            bounded,
            SelectionPolicy::Bounded {
                max_gauges_per_point: 3,
                max_search_distance_km: 200.0
            }
        );

        let forced: SelectionPolicy = serde_yaml::from_str("mode: forced\n").unwrap();
        assert_eq!(forced, SelectionPolicy::Forced { fixed_gauge_count: 2 });
    }
}
