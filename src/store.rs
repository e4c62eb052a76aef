//! Persistence of the mapping artifact and the estimate tables.
//!
//! Every file is written to a sibling temp path and renamed into place, so a
//! failed run never leaves a truncated artifact behind.

use crate::aggregate::AggregationReport;
use crate::error::{AppError, Result};
use crate::mapping::{CountyCoverage, CoverageSummary, GaugeCountyMapping, MappingResult};
use crate::model::MetricKind;
use crate::search::SelectionPolicy;
use crate::weights::WeightMethod;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const FORMAT_VERSION: u32 = 1;

pub const MAPPING_JSON: &str = "mapping.json";
pub const MAPPING_CSV: &str = "mapping.csv";
pub const COVERAGE_JSON: &str = "coverage.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub format_version: u32,
    pub generated_at: DateTime<Utc>,
    pub selection: SelectionPolicy,
    pub weight_method: WeightMethod,
    pub reference_points: usize,
    pub stations: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingArtifact {
    pub metadata: ArtifactMetadata,
    pub mappings: Vec<GaugeCountyMapping>,
    pub counties: Vec<CountyCoverage>,
    pub coverage: CoverageSummary,
}

impl MappingArtifact {
    pub fn new(
        result: MappingResult,
        selection: SelectionPolicy,
        weight_method: WeightMethod,
        stations: usize,
    ) -> Self {
        Self {
            metadata: ArtifactMetadata {
                format_version: FORMAT_VERSION,
                generated_at: Utc::now(),
                selection,
                weight_method,
                reference_points: result.summary.total_points,
                stations,
            },
            mappings: result.rows,
            counties: result.counties,
            coverage: result.summary,
        }
    }
}

#[derive(Debug, Serialize)]
struct EstimateRow<'a> {
    county_id: &'a str,
    period: String,
    scenario: &'a str,
    severity: &'a str,
    value: f64,
    contributing_gauges: usize,
    coverage: &'a str,
}

#[derive(Debug, Serialize)]
struct GapRow<'a> {
    county_id: &'a str,
    period: String,
    scenario: &'a str,
    severity: &'a str,
    mapped_gauges: usize,
    reason: &'a str,
}

pub struct ArtifactStore {
    directory: PathBuf,
}

impl ArtifactStore {
    pub fn new<P: Into<PathBuf>>(directory: P) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn mapping_path(&self) -> PathBuf {
        self.directory.join(MAPPING_JSON)
    }

    pub fn save_mapping(&self, artifact: &MappingArtifact) -> Result<()> {
        fs::create_dir_all(&self.directory)?;

        let json = serde_json::to_vec_pretty(artifact)?;
        self.write_atomic(MAPPING_JSON, &json)?;

        let mut csv = csv::Writer::from_writer(Vec::new());
        for row in &artifact.mappings {
            csv.serialize(row)?;
        }
        self.write_atomic(MAPPING_CSV, &finish_csv(csv)?)?;

        let coverage = serde_json::to_vec_pretty(&artifact.coverage)?;
        self.write_atomic(COVERAGE_JSON, &coverage)?;

        info!(
            "Saved mapping artifact ({} rows, {} counties) to {}",
            artifact.mappings.len(),
            artifact.counties.len(),
            self.directory.display()
        );
        Ok(())
    }

    pub fn load_mapping(&self) -> Result<MappingArtifact> {
        let path = self.mapping_path();
        let content = fs::read(&path).map_err(|e| {
            AppError::Io(std::io::Error::new(
                e.kind(),
                format!("{}: {}", path.display(), e),
            ))
        })?;
        let artifact: MappingArtifact = serde_json::from_slice(&content)?;

        if artifact.metadata.format_version != FORMAT_VERSION {
            return Err(AppError::InvalidData(format!(
                "Mapping artifact {} has format version {}, expected {}",
                path.display(),
                artifact.metadata.format_version,
                FORMAT_VERSION
            )));
        }

        debug!(
            "Loaded mapping generated at {} ({})",
            artifact.metadata.generated_at,
            artifact.metadata.selection.describe()
        );
        Ok(artifact)
    }

    pub fn save_report(&self, report: &AggregationReport) -> Result<()> {
        fs::create_dir_all(&self.directory)?;

        let mut estimates = csv::Writer::from_writer(Vec::new());
        for estimate in &report.estimates {
            estimates.serialize(EstimateRow {
                county_id: estimate.county_id.as_str(),
                period: estimate.period.to_string(),
                scenario: estimate.scenario.map(|s| s.as_str()).unwrap_or(""),
                severity: estimate.severity.map(|s| s.as_str()).unwrap_or(""),
                value: estimate.value,
                contributing_gauges: estimate.contributing_gauges,
                coverage: estimate.coverage.as_str(),
            })?;
        }
        // An empty table still gets its header row.
        if report.estimates.is_empty() {
            estimates.write_record([
                "county_id",
                "period",
                "scenario",
                "severity",
                "value",
                "contributing_gauges",
                "coverage",
            ])?;
        }

        let mut gaps = csv::Writer::from_writer(Vec::new());
        for gap in &report.gaps {
            gaps.serialize(GapRow {
                county_id: gap.county_id.as_str(),
                period: gap.period.to_string(),
                scenario: gap.scenario.map(|s| s.as_str()).unwrap_or(""),
                severity: gap.severity.map(|s| s.as_str()).unwrap_or(""),
                mapped_gauges: gap.mapped_gauges,
                reason: gap.reason.as_str(),
            })?;
        }
        if report.gaps.is_empty() {
            gaps.write_record([
                "county_id",
                "period",
                "scenario",
                "severity",
                "mapped_gauges",
                "reason",
            ])?;
        }

        self.write_atomic(&estimates_file(report.kind), &finish_csv(estimates)?)?;
        self.write_atomic(&gaps_file(report.kind), &finish_csv(gaps)?)?;

        info!(
            "Saved {} estimates and {} gaps to {}",
            report.estimates.len(),
            report.gaps.len(),
            self.directory.display()
        );
        Ok(())
    }

    fn write_atomic(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let target = self.directory.join(name);
        let tmp = self.directory.join(format!(".{}.tmp", name));

        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, &target)?;

        debug!("Wrote {} ({} bytes)", target.display(), bytes.len());
        Ok(())
    }
}

pub fn estimates_file(kind: MetricKind) -> String {
    format!("estimates_{}.csv", kind)
}

pub fn gaps_file(kind: MetricKind) -> String {
    format!("gaps_{}.csv", kind)
}

fn finish_csv(writer: csv::Writer<Vec<u8>>) -> Result<Vec<u8>> {
    writer
        .into_inner()
        .map_err(|e| AppError::Io(e.into_error()))
}
