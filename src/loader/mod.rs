//! Input adapters. Every accepted feed shape is normalized into the model
//! types here, once, so the core only ever sees canonical records.

pub mod metrics;
pub mod points;
pub mod stations;

pub use metrics::{load_historical, load_projected, parse_historical, parse_projected};
pub use points::{load_points, parse_points};
pub use stations::{load_stations, parse_stations, StationFormat};

use crate::error::{AppError, Result};
use std::path::Path;
use tracing::warn;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadStats {
    pub total_rows: usize,
    pub loaded: usize,
    pub failures: usize,
    pub failure_rate: f64,
}

impl LoadStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_failure(&mut self, row: usize, error: &dyn std::fmt::Display) {
        self.failures += 1;
        warn!(
            "Skipping row {} (failure {}/{}): {}",
            row, self.failures, self.total_rows, error
        );
    }

    pub fn finalize(&mut self) {
        self.failure_rate = if self.total_rows > 0 {
            self.failures as f64 / self.total_rows as f64
        } else {
            0.0
        };
    }

    pub fn exceeds_threshold(&self, threshold: f64) -> bool {
        self.failure_rate > threshold
    }

    /// Finalizes and fails when the malformed-row rate is above `threshold`.
    pub fn check(&mut self, threshold: f64, feed: &str) -> Result<()> {
        self.finalize();
        if self.exceeds_threshold(threshold) {
            return Err(AppError::Parse(format!(
                "{} parse failure rate {:.1}% exceeds threshold {:.1}%: {} failures out of {} rows",
                feed,
                self.failure_rate * 100.0,
                threshold * 100.0,
                self.failures,
                self.total_rows
            )));
        }
        Ok(())
    }
}

fn read_input(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| {
        AppError::Io(std::io::Error::new(
            e.kind(),
            format!("{}: {}", path.display(), e),
        ))
    })
}

/// Empty or whitespace-only cells read as missing.
fn parse_optional_f64(raw: Option<&str>) -> std::result::Result<Option<f64>, String> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => s
            .parse::<f64>()
            .map(Some)
            .map_err(|_| format!("'{}' is not a number", s)),
    }
}
