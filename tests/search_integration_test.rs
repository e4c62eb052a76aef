use htf_imputation::geo::haversine_km;
use htf_imputation::model::{CountyId, ReferencePoint, Station, StationId};
use htf_imputation::search::{NeighborSearch, SelectionPolicy};
use proptest::prelude::*;

fn stations_from(coords: &[(f64, f64)]) -> Vec<Station> {
    coords
        .iter()
        .enumerate()
        .map(|(i, (lon, lat))| Station {
            id: StationId::new(&format!("{}", 8_000_000 + i)).expect("valid id"),
            name: None,
            lon: *lon,
            lat: *lat,
            region: "test".to_string(),
        })
        .collect()
}

fn point(lon: f64, lat: f64) -> ReferencePoint {
    ReferencePoint {
        point_id: 1,
        county_id: CountyId::new("99999").expect("valid county"),
        lon,
        lat,
    }
}

/// Every station ranked by haversine distance, ties by id
fn brute_force(stations: &[Station], p: &ReferencePoint) -> Vec<(String, f64)> {
    let mut all: Vec<(String, f64)> = stations
        .iter()
        .map(|s| {
            (
                s.id.as_str().to_string(),
                haversine_km(p.lon, p.lat, s.lon, s.lat),
            )
        })
        .collect();
    all.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    all
}

fn coordinate() -> impl Strategy<Value = (f64, f64)> {
    (-180.0f64..180.0, -85.0f64..85.0)
}

/// Clustered coordinates so bounded radii actually find neighbours
fn clustered() -> impl Strategy<Value = (f64, f64)> {
    (-75.0f64..-70.0, 38.0f64..43.0)
}

proptest! {
    /// Bounded search returns exactly the brute-force nearest stations inside the radius
    #[test]
    fn bounded_matches_brute_force(
        coords in prop::collection::vec(clustered(), 1..60),
        (lon, lat) in clustered(),
        max_gauges in 1usize..6,
        radius in 5.0f64..400.0,
    ) {
        let stations = stations_from(&coords);
        let policy = SelectionPolicy::Bounded {
            max_gauges_per_point: max_gauges,
            max_search_distance_km: radius,
        };
        let search = NeighborSearch::new(&stations, policy).expect("search");
        let p = point(lon, lat);

        let found = search.candidates(&p);
        let expected: Vec<(String, f64)> = brute_force(&stations, &p)
            .into_iter()
            .filter(|(_, d)| *d <= radius)
            .take(max_gauges)
            .collect();

        prop_assert_eq!(found.len(), expected.len());
        for (candidate, (id, distance)) in found.iter().zip(&expected) {
            prop_assert_eq!(candidate.station_id.as_str(), id.as_str());
            prop_assert!((candidate.distance_km - distance).abs() < 1e-9);
            prop_assert!(candidate.distance_km <= radius);
        }
    }

    /// Forced search always returns the fixed count, nearest first, anywhere on the globe
    #[test]
    fn forced_matches_brute_force(
        coords in prop::collection::vec(coordinate(), 4..40),
        (lon, lat) in coordinate(),
        count in 1usize..4,
    ) {
        let stations = stations_from(&coords);
        let search = NeighborSearch::new(
            &stations,
            SelectionPolicy::Forced { fixed_gauge_count: count },
        )
        .expect("search");
        let p = point(lon, lat);

        let found = search.candidates(&p);
        let expected = brute_force(&stations, &p);

        prop_assert_eq!(found.len(), count);
        for (candidate, (id, _)) in found.iter().zip(&expected) {
            prop_assert_eq!(candidate.station_id.as_str(), id.as_str());
        }
    }

    /// The nearest lookup agrees with a linear scan
    #[test]
    fn nearest_matches_brute_force(
        coords in prop::collection::vec(coordinate(), 1..40),
        (lon, lat) in coordinate(),
    ) {
        let stations = stations_from(&coords);
        let search = NeighborSearch::new(&stations, SelectionPolicy::default()).expect("search");
        let p = point(lon, lat);

        let nearest = search.nearest(&p).expect("non-empty station set");
        let expected = brute_force(&stations, &p);
        prop_assert_eq!(nearest.station_id.as_str(), expected[0].0.as_str());
    }
}

/// A point with every station beyond the radius gets no candidates
#[test]
fn test_all_candidates_beyond_radius() {
    let stations = stations_from(&[(-122.47, 37.81), (-118.27, 33.72)]);
    let search = NeighborSearch::new(
        &stations,
        SelectionPolicy::Bounded {
            max_gauges_per_point: 3,
            max_search_distance_km: 100.0,
        },
    )
    .expect("search");

    // Cape Mendocino
    let found = search.candidates(&point(-124.41, 40.44));
    assert!(found.is_empty());
}

/// Stations filtered by the radius never reappear through truncation
#[test]
fn test_within_returns_sorted_superset() {
    let stations = stations_from(&[(-71.05, 42.35), (-70.67, 41.52), (-71.33, 41.50), (-74.01, 40.70)]);
    let search = NeighborSearch::new(&stations, SelectionPolicy::default()).expect("search");
    let p = point(-71.0, 42.0);

    let within = search.within(&p, 150.0);
    assert!(within.windows(2).all(|w| w[0].distance_km <= w[1].distance_km));
    assert!(within.iter().all(|c| c.distance_km <= 150.0));
    assert_eq!(within.len(), 3);
}
