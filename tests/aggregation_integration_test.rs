use htf_imputation::aggregate::{AggregationEngine, MetricSnapshot};
use htf_imputation::mapping::{CountyCoverage, GaugeCountyMapping};
use htf_imputation::model::{
    CountyId, CoverageFlag, GapReason, HistoricalRecord, MetricKind, Period, ProjectedRecord,
    Scenario, ScenarioValues, Severity, SeverityValues, StationId,
};

fn sid(id: &str) -> StationId {
    StationId::new(id).expect("valid station id")
}

fn cid(id: &str) -> CountyId {
    CountyId::new(id).expect("valid county id")
}

fn link(county: &str, station: &str, weight: f64) -> GaugeCountyMapping {
    GaugeCountyMapping {
        county_id: cid(county),
        station_id: sid(station),
        mean_weight: weight,
        mean_distance_km: 20.0,
        point_count: 10,
        min_distance_km: 5.0,
        max_distance_km: 40.0,
    }
}

fn observed(station: &str, year: i32, days: f64) -> HistoricalRecord {
    HistoricalRecord {
        station_id: sid(station),
        year,
        flood_days: SeverityValues::total(Some(days)),
        missing_days: Some(0.0),
    }
}

/// Weights 0.3/0.7 with values 10/20 give 17.0
#[test]
fn test_weighted_average_scenario() {
    let rows = vec![link("51810", "8638610", 0.3), link("51810", "8638863", 0.7)];
    let engine = AggregationEngine::new(&rows, &[]);
    let snapshot = MetricSnapshot::historical(vec![
        observed("8638610", 2020, 10.0),
        observed("8638863", 2020, 20.0),
    ])
    .expect("snapshot");

    let report = engine.aggregate(&snapshot);

    assert_eq!(report.kind, MetricKind::Historical);
    assert_eq!(report.estimates.len(), 1);
    let estimate = &report.estimates[0];
    assert_eq!(estimate.period, Period::Year(2020));
    assert_eq!(estimate.scenario, None);
    assert_eq!(estimate.severity, Some(Severity::Total));
    assert!((estimate.value - 17.0).abs() < 1e-12);
    assert_eq!(estimate.contributing_gauges, 2);
    assert_eq!(estimate.coverage, CoverageFlag::Complete);
    assert!(report.gaps.is_empty());
}

/// Weights are renormalized over reporting stations only
#[test]
fn test_partial_reporting_renormalizes() {
    let rows = vec![
        link("51810", "8638610", 0.2),
        link("51810", "8638863", 0.2),
        link("51810", "8639348", 0.6),
    ];
    let engine = AggregationEngine::new(&rows, &[]);
    let snapshot = MetricSnapshot::historical(vec![
        observed("8638610", 2019, 10.0),
        observed("8638863", 2019, 30.0),
        HistoricalRecord {
            station_id: sid("8639348"),
            year: 2019,
            flood_days: SeverityValues::total(Some(0.0)),
            missing_days: Some(365.0),
        },
    ])
    .expect("snapshot");

    let report = engine.aggregate(&snapshot);
    let estimate = &report.estimates[0];
    assert!((estimate.value - 20.0).abs() < 1e-12);
    assert_eq!(estimate.contributing_gauges, 2);
    assert_eq!(estimate.coverage, CoverageFlag::Partial);
}

/// Zero flood days is a real measurement, not a gap
#[test]
fn test_zero_value_counts() {
    let rows = vec![link("12086", "8723214", 0.5), link("12086", "8723970", 0.5)];
    let engine = AggregationEngine::new(&rows, &[]);
    let snapshot = MetricSnapshot::historical(vec![
        observed("8723214", 1999, 0.0),
        observed("8723970", 1999, 8.0),
    ])
    .expect("snapshot");

    let report = engine.aggregate(&snapshot);
    assert!((report.estimates[0].value - 4.0).abs() < 1e-12);
}

/// Counties, gaps and estimates come out in a fixed order
#[test]
fn test_ordering_and_gap_reasons() {
    let rows = vec![
        link("48167", "8771450", 1.0),
        link("12086", "8723214", 1.0),
    ];
    let coverage = vec![CountyCoverage {
        county_id: cid("02013"),
        reference_points: 12,
        assigned_points: 0,
        gauges: 0,
    }];
    let engine = AggregationEngine::new(&rows, &coverage);
    let snapshot = MetricSnapshot::historical(vec![
        observed("8771450", 2001, 3.0),
        observed("8771450", 2000, 2.0),
        observed("8723214", 2001, 1.0),
    ])
    .expect("snapshot");

    let report = engine.aggregate(&snapshot);

    let keys: Vec<(&str, Period)> = report
        .estimates
        .iter()
        .map(|e| (e.county_id.as_str(), e.period))
        .collect();
    assert_eq!(
        keys,
        vec![
            ("12086", Period::Year(2001)),
            ("48167", Period::Year(2000)),
            ("48167", Period::Year(2001)),
        ]
    );

    let gaps: Vec<(&str, Period, GapReason)> = report
        .gaps
        .iter()
        .map(|g| (g.county_id.as_str(), g.period, g.reason))
        .collect();
    assert_eq!(
        gaps,
        vec![
            ("02013", Period::Year(2000), GapReason::UnmappedCounty),
            ("02013", Period::Year(2001), GapReason::UnmappedCounty),
            ("12086", Period::Year(2000), GapReason::NoReportingStations),
        ]
    );
}

/// Stations present in the mapping but absent from the feed are reported once
#[test]
fn test_missing_station_series_listed() {
    let rows = vec![
        link("06037", "9410660", 0.5),
        link("06059", "9410660", 0.5),
        link("06037", "9410840", 0.5),
    ];
    let engine = AggregationEngine::new(&rows, &[]);
    let snapshot =
        MetricSnapshot::historical(vec![observed("9410840", 2015, 2.0)]).expect("snapshot");

    let report = engine.aggregate(&snapshot);
    assert_eq!(report.missing_stations, vec![sid("9410660")]);
}

/// Re-running the aggregation on identical inputs gives identical output
#[test]
fn test_aggregation_idempotent() {
    let rows = vec![
        link("22071", "8761724", 0.25),
        link("22071", "8761927", 0.5),
        link("22075", "8761724", 0.125),
        link("22075", "8760922", 0.875),
    ];
    let records = vec![
        ProjectedRecord {
            station_id: sid("8761724"),
            decade: 2050,
            values: ScenarioValues([Some(30.0), Some(45.5), Some(80.1), Some(150.2), Some(210.0)]),
        },
        ProjectedRecord {
            station_id: sid("8761927"),
            decade: 2050,
            values: ScenarioValues([Some(12.3), None, Some(60.0), Some(101.7), Some(190.4)]),
        },
        ProjectedRecord {
            station_id: sid("8760922"),
            decade: 2060,
            values: ScenarioValues([Some(1.0), Some(2.0), Some(3.0), Some(4.0), Some(5.0)]),
        },
    ];

    let engine = AggregationEngine::new(&rows, &[]);
    let first = engine.aggregate(&MetricSnapshot::projected(records.clone()).expect("snapshot"));
    let second = engine.aggregate(&MetricSnapshot::projected(records).expect("snapshot"));

    assert_eq!(first, second);
    let bits: Vec<u64> = first.estimates.iter().map(|e| e.value.to_bits()).collect();
    let again: Vec<u64> = second.estimates.iter().map(|e| e.value.to_bits()).collect();
    assert_eq!(bits, again);

    let low_2050 = first
        .estimates
        .iter()
        .find(|e| {
            e.county_id.as_str() == "22071"
                && e.period == Period::Decade(2050)
                && e.scenario == Some(Scenario::Low)
        })
        .expect("estimate");
    let expected = (0.25 * 30.0 + 0.5 * 12.3) / 0.75;
    assert!((low_2050.value - expected).abs() < 1e-9);
}

/// Each severity class is estimated through the same weights, renormalized
/// over the stations that report that class
#[test]
fn test_severity_classes_share_the_mapping() {
    let rows = vec![link("34029", "8534720", 0.25), link("34029", "8531680", 0.75)];
    let engine = AggregationEngine::new(&rows, &[]);
    let snapshot = MetricSnapshot::historical(vec![
        HistoricalRecord {
            station_id: sid("8534720"),
            year: 2012,
            flood_days: SeverityValues([Some(20.0), Some(2.0), Some(6.0), Some(12.0)]),
            missing_days: Some(0.0),
        },
        HistoricalRecord {
            station_id: sid("8531680"),
            year: 2012,
            flood_days: SeverityValues([Some(8.0), None, Some(2.0), Some(6.0)]),
            missing_days: Some(0.0),
        },
    ])
    .expect("snapshot");

    let report = engine.aggregate(&snapshot);
    let value = |severity: Severity| {
        report
            .estimates
            .iter()
            .find(|e| e.severity == Some(severity))
            .map(|e| (e.value, e.coverage))
            .expect("estimate")
    };

    assert!((value(Severity::Total).0 - 11.0).abs() < 1e-12);
    assert!((value(Severity::Moderate).0 - 3.0).abs() < 1e-12);
    assert!((value(Severity::Minor).0 - 7.5).abs() < 1e-12);
    // Only one station reports major days
    assert_eq!(value(Severity::Major), (2.0, CoverageFlag::Partial));
    assert!(report.gaps.is_empty());
}

/// A year in the feed where no mapped station reported still shows up as a gap
#[test]
fn test_unreported_year_is_not_silently_dropped() {
    let rows = vec![link("45019", "8665530", 1.0)];
    let engine = AggregationEngine::new(&rows, &[]);
    let snapshot = MetricSnapshot::historical(vec![
        observed("8665530", 2016, 38.0),
        HistoricalRecord {
            station_id: sid("8665530"),
            year: 2017,
            flood_days: SeverityValues::total(None),
            missing_days: None,
        },
    ])
    .expect("snapshot");

    let report = engine.aggregate(&snapshot);
    assert_eq!(report.estimates.len(), 1);
    assert_eq!(report.gaps.len(), 1);
    assert_eq!(report.gaps[0].period, Period::Year(2017));
    assert_eq!(report.gaps[0].reason, GapReason::NoReportingStations);
}
