use super::{parse_optional_f64, read_input, LoadStats};
use crate::error::{AppError, Result};
use crate::model::{
    HistoricalRecord, ProjectedRecord, Scenario, ScenarioValues, Severity, SeverityValues,
    StationId,
};
use csv::StringRecord;
use std::path::Path;
use tracing::info;

/// Historical counts from CSV, columns located by header name.
///
/// `station_id`, `year` and `flood_days` (or `total_flood_days`) are
/// required. `missing_days` and the `major_flood_days`,
/// `moderate_flood_days` and `minor_flood_days` breakdown are optional.
///
/// Malformed rows are skipped and counted; the load fails only when their
/// share exceeds `failure_threshold`. An empty count cell is kept as an
/// unreported value.
pub fn parse_historical(
    content: &str,
    failure_threshold: f64,
) -> Result<(Vec<HistoricalRecord>, LoadStats)> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(content.as_bytes());

    let columns = HistoricalColumns::locate(rdr.headers()?)?;
    let mut records = Vec::new();
    let mut stats = LoadStats::new();

    for (idx, result) in rdr.records().enumerate() {
        let row = result?;
        stats.total_rows += 1;

        match columns.record(&row) {
            Ok(record) => {
                records.push(record);
                stats.loaded += 1;
            }
            Err(e) => stats.record_failure(idx + 2, &e),
        }
    }

    stats.check(failure_threshold, "historical")?;
    Ok((records, stats))
}

struct HistoricalColumns {
    station_id: usize,
    year: usize,
    missing_days: Option<usize>,
    /// Indexed like [`SeverityValues`]; total is always present.
    flood_days: [Option<usize>; 4],
}

impl HistoricalColumns {
    fn locate(headers: &StringRecord) -> Result<Self> {
        let find = |names: &[&str]| {
            headers
                .iter()
                .position(|h| names.contains(&h.trim().to_ascii_lowercase().as_str()))
        };
        let required = |names: &[&str]| {
            find(names).ok_or_else(|| {
                AppError::Parse(format!("historical feed has no '{}' column", names[0]))
            })
        };

        let total = required(&["flood_days", "total_flood_days"])?;
        Ok(Self {
            station_id: required(&["station_id"])?,
            year: required(&["year"])?,
            missing_days: find(&["missing_days"]),
            flood_days: [
                Some(total),
                find(&["major_flood_days"]),
                find(&["moderate_flood_days"]),
                find(&["minor_flood_days"]),
            ],
        })
    }

    fn record(&self, row: &StringRecord) -> std::result::Result<HistoricalRecord, String> {
        let station_id = station(row, self.station_id)?;
        let raw_year = field(row, self.year, "year")?;
        let year = raw_year
            .parse::<i32>()
            .map_err(|_| format!("invalid year '{}'", raw_year))?;
        let missing_days = parse_optional_f64(self.missing_days.and_then(|i| row.get(i)))?;

        let mut flood_days = SeverityValues::default();
        for severity in Severity::ALL {
            let idx = self.flood_days[severity as usize];
            flood_days.0[severity as usize] = parse_optional_f64(idx.and_then(|i| row.get(i)))
                .map_err(|e| format!("{} flood days: {}", severity, e))?;
        }

        if flood_days.0.iter().flatten().any(|v| *v < 0.0) || missing_days.is_some_and(|v| v < 0.0)
        {
            return Err(format!("negative day count for {} {}", station_id, year));
        }

        Ok(HistoricalRecord {
            station_id,
            year,
            flood_days,
            missing_days,
        })
    }
}

/// Decadal projections from CSV
/// (`station_id,decade,low,intermediate_low,intermediate,intermediate_high,high`).
///
/// `decade` may be written `2050` or `2050s`. Empty scenario cells are
/// missing values for that scenario only.
pub fn parse_projected(
    content: &str,
    failure_threshold: f64,
) -> Result<(Vec<ProjectedRecord>, LoadStats)> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(content.as_bytes());

    let mut records = Vec::new();
    let mut stats = LoadStats::new();

    for (idx, result) in rdr.records().enumerate() {
        let row = result?;
        stats.total_rows += 1;

        match projected_row(&row) {
            Ok(record) => {
                records.push(record);
                stats.loaded += 1;
            }
            Err(e) => stats.record_failure(idx + 2, &e),
        }
    }

    stats.check(failure_threshold, "projected")?;
    Ok((records, stats))
}

fn projected_row(row: &StringRecord) -> std::result::Result<ProjectedRecord, String> {
    let station_id = station(row, 0)?;
    let raw_decade = field(row, 1, "decade")?;
    let decade = raw_decade
        .trim_end_matches('s')
        .parse::<i32>()
        .map_err(|_| format!("invalid decade '{}'", raw_decade))?;
    if decade % 10 != 0 {
        return Err(format!("decade {} does not start a decade", decade));
    }

    let mut values = ScenarioValues::default();
    for (i, scenario) in Scenario::ALL.iter().enumerate() {
        values.0[*scenario as usize] = parse_optional_f64(row.get(2 + i))
            .map_err(|e| format!("{} scenario: {}", scenario, e))?;
    }

    Ok(ProjectedRecord {
        station_id,
        decade,
        values,
    })
}

fn station(row: &StringRecord, idx: usize) -> std::result::Result<StationId, String> {
    let raw = field(row, idx, "station_id")?;
    StationId::new(raw).map_err(|e| e.to_string())
}

fn field<'r>(row: &'r StringRecord, idx: usize, name: &str) -> std::result::Result<&'r str, String> {
    match row.get(idx).map(str::trim) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(format!("missing {}", name)),
    }
}

pub fn load_historical<P: AsRef<Path>>(
    path: P,
    failure_threshold: f64,
) -> Result<Vec<HistoricalRecord>> {
    let (records, stats) = parse_historical(&read_input(path.as_ref())?, failure_threshold)?;
    info!(
        "Loaded {} historical records from {} ({} rows skipped)",
        records.len(),
        path.as_ref().display(),
        stats.failures
    );
    Ok(records)
}

pub fn load_projected<P: AsRef<Path>>(
    path: P,
    failure_threshold: f64,
) -> Result<Vec<ProjectedRecord>> {
    let (records, stats) = parse_projected(&read_input(path.as_ref())?, failure_threshold)?;
    info!(
        "Loaded {} projected records from {} ({} rows skipped)",
        records.len(),
        path.as_ref().display(),
        stats.failures
    );
    Ok(records)
}
