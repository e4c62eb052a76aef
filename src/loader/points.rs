use super::read_input;
use crate::error::{AppError, Result};
use crate::geo;
use crate::model::{CountyId, PointId, ReferencePoint};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

#[derive(Debug, Deserialize)]
struct PointRow {
    point_id: PointId,
    county_id: String,
    lon: f64,
    lat: f64,
}

/// Reference points from CSV (`point_id,county_id,lon,lat`).
///
/// Geometry is trusted input: any malformed row, bad coordinate or repeated
/// point id fails the whole load.
pub fn parse_points(content: &str) -> Result<Vec<ReferencePoint>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let mut points = Vec::new();
    let mut seen = HashSet::new();

    for result in rdr.deserialize() {
        let row: PointRow = result?;

        if !geo::is_valid_coordinate(row.lon, row.lat) {
            return Err(AppError::InvalidData(format!(
                "Reference point {} has invalid coordinate ({}, {})",
                row.point_id, row.lon, row.lat
            )));
        }
        if !seen.insert(row.point_id) {
            return Err(AppError::InvalidData(format!(
                "Duplicate reference point id {}",
                row.point_id
            )));
        }

        points.push(ReferencePoint {
            point_id: row.point_id,
            county_id: CountyId::new(&row.county_id)?,
            lon: row.lon,
            lat: row.lat,
        });
    }

    Ok(points)
}

pub fn load_points<P: AsRef<Path>>(path: P) -> Result<Vec<ReferencePoint>> {
    let points = parse_points(&read_input(path.as_ref())?)?;
    let counties: HashSet<&CountyId> = points.iter().map(|p| &p.county_id).collect();
    info!(
        "Loaded {} reference points across {} counties from {}",
        points.len(),
        counties.len(),
        path.as_ref().display()
    );
    Ok(points)
}
