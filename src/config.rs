use crate::error::{AppError, Result};
use crate::model::Station;
use crate::search::SelectionPolicy;
use crate::weights::{WeightCalculator, WeightMethod};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};

/// Upper bound on stations per point for either selection mode.
pub const MAX_GAUGES_PER_POINT: usize = 16;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub weighting: WeightingConfig,
    #[serde(default)]
    pub selection: SelectionPolicy,
    #[serde(default)]
    pub stations: StationFilter,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    pub inputs: InputConfig,
    #[serde(default)]
    pub aggregation: AggregationConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct WeightingConfig {
    #[serde(default)]
    pub method: WeightMethod,
    #[serde(default = "default_power")]
    pub power: f64,
    #[serde(default = "default_close_threshold_km")]
    pub close_threshold_km: f64,
    #[serde(default = "default_min_weight_threshold")]
    pub min_weight_threshold: f64,
}

fn default_power() -> f64 {
    2.0
}

fn default_close_threshold_km() -> f64 {
    1.0
}

fn default_min_weight_threshold() -> f64 {
    0.1
}

impl Default for WeightingConfig {
    fn default() -> Self {
        Self {
            method: WeightMethod::default(),
            power: default_power(),
            close_threshold_km: default_close_threshold_km(),
            min_weight_threshold: default_min_weight_threshold(),
        }
    }
}

impl WeightingConfig {
    pub fn calculator(&self, selection: &SelectionPolicy) -> WeightCalculator {
        WeightCalculator::new(
            self.method,
            self.power,
            self.close_threshold_km,
            self.min_weight_threshold,
        )
        .preserving_multiplicity(selection.is_forced())
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct RuntimeConfig {
    /// Worker threads; 0 lets rayon pick one per core.
    #[serde(default, deserialize_with = "deserialize_threads")]
    pub threads: usize,
}

/// Custom deserializer that accepts a thread count as a number or a string
///
/// Accepts:
/// - `threads: 8` (number)
/// - `threads: "8"` (string that parses to number)
/// - `threads: auto` (one worker per core)
/// - `threads: ${IMPUTATION_THREADS}` (env var substituted to any of the above)
fn deserialize_threads<'de, D>(deserializer: D) -> std::result::Result<usize, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ThreadsValue {
        Number(usize),
        String(String),
    }

    match ThreadsValue::deserialize(deserializer)? {
        ThreadsValue::Number(n) => Ok(n),
        ThreadsValue::String(s) if s.eq_ignore_ascii_case("auto") => Ok(0),
        ThreadsValue::String(s) => s
            .parse::<usize>()
            .map_err(|_| serde::de::Error::custom(format!("Invalid thread count: '{}'", s))),
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct InputConfig {
    pub reference_points: PathBuf,
    pub stations: PathBuf,
    #[serde(default)]
    pub historical: Option<PathBuf>,
    #[serde(default)]
    pub projected: Option<PathBuf>,
    /// Fraction of malformed rows tolerated in a feed before the run fails.
    #[serde(default)]
    pub max_parse_failure_rate: f64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    pub directory: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AggregationConfig {
    #[serde(default = "default_historical_window")]
    pub historical: PeriodWindow,
    #[serde(default = "default_projected_window")]
    pub projected: PeriodWindow,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            historical: default_historical_window(),
            projected: default_projected_window(),
        }
    }
}

fn default_historical_window() -> PeriodWindow {
    PeriodWindow {
        start: Some(1970),
        end: None,
    }
}

fn default_projected_window() -> PeriodWindow {
    PeriodWindow {
        start: Some(2020),
        end: Some(2100),
    }
}

/// Inclusive range of period start years; open ends are unbounded.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq)]
pub struct PeriodWindow {
    #[serde(default)]
    pub start: Option<i32>,
    #[serde(default)]
    pub end: Option<i32>,
}

impl PeriodWindow {
    pub fn contains(&self, year: i32) -> bool {
        self.start.map_or(true, |s| year >= s) && self.end.map_or(true, |e| year <= e)
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct StationFilter {
    #[serde(default)]
    pub regions: Vec<String>,
    /// Glob patterns over station ids; empty keeps every id.
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl StationFilter {
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty() && self.include.is_empty() && self.exclude.is_empty()
    }

    pub fn matches(&self, station: &Station) -> bool {
        if self.is_empty() {
            return true;
        }

        if !self.regions.is_empty()
            && !self
                .regions
                .iter()
                .any(|r| r.eq_ignore_ascii_case(&station.region))
        {
            return false;
        }

        let id = station.id.as_str();
        if !self.include.is_empty() && !self.include.iter().any(|p| pattern_matches(p, id)) {
            return false;
        }

        !self.exclude.iter().any(|p| pattern_matches(p, id))
    }

    pub fn apply(&self, stations: Vec<Station>) -> Vec<Station> {
        if self.is_empty() {
            return stations;
        }
        stations.into_iter().filter(|s| self.matches(s)).collect()
    }
}

fn pattern_matches(pattern: &str, id: &str) -> bool {
    glob::Pattern::new(pattern)
        .map(|p| p.matches(id))
        .unwrap_or(false)
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| AppError::Config(format!("Failed to read config file: {}", e)))?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        // Substitute environment variables
        let expanded = expand_env_vars(content)?;

        let config: Config = serde_yaml::from_str(&expanded)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    ///
    /// Checks for:
    /// - Threshold combinations the weighting rules cannot honour
    /// - Gauge counts and search radius of the selection mode
    /// - Malformed station filter patterns
    /// - Inverted aggregation windows
    pub fn validate(&self) -> Result<()> {
        let w = &self.weighting;

        if !(0.0..1.0).contains(&w.min_weight_threshold) {
            return Err(AppError::Config(format!(
                "weighting.min_weight_threshold must be in [0, 1), got {}",
                w.min_weight_threshold
            )));
        }

        if !w.close_threshold_km.is_finite() || w.close_threshold_km < 0.0 {
            return Err(AppError::Config(format!(
                "weighting.close_threshold_km must be a non-negative number, got {}",
                w.close_threshold_km
            )));
        }

        if !w.power.is_finite() || w.power <= 0.0 {
            return Err(AppError::Config(format!(
                "weighting.power must be positive, got {}",
                w.power
            )));
        }

        if w.power != 2.0 {
            tracing::warn!("Using weighting.power {} instead of 2", w.power);
        }

        match self.selection {
            SelectionPolicy::Bounded {
                max_gauges_per_point,
                max_search_distance_km,
            } => {
                check_gauge_count("selection.max_gauges_per_point", max_gauges_per_point)?;

                if !max_search_distance_km.is_finite() || max_search_distance_km <= 0.0 {
                    return Err(AppError::Config(format!(
                        "selection.max_search_distance_km must be positive, got {}",
                        max_search_distance_km
                    )));
                }

                if max_search_distance_km <= w.close_threshold_km {
                    return Err(AppError::Config(format!(
                        "selection.max_search_distance_km ({}) must exceed weighting.close_threshold_km ({})",
                        max_search_distance_km, w.close_threshold_km
                    )));
                }
            }
            SelectionPolicy::Forced { fixed_gauge_count } => {
                check_gauge_count("selection.fixed_gauge_count", fixed_gauge_count)?;
                tracing::warn!(
                    "Forced selection assigns {} gauges to every point with no distance cutoff; \
                     remote points may be mapped to stations thousands of km away",
                    fixed_gauge_count
                );
            }
        }

        for pattern in self.stations.include.iter().chain(&self.stations.exclude) {
            if let Err(e) = glob::Pattern::new(pattern) {
                return Err(AppError::Config(format!(
                    "Invalid station pattern '{}': {}",
                    pattern, e
                )));
            }
        }

        if !(0.0..=1.0).contains(&self.inputs.max_parse_failure_rate) {
            return Err(AppError::Config(format!(
                "inputs.max_parse_failure_rate must be in [0, 1], got {}",
                self.inputs.max_parse_failure_rate
            )));
        }

        for (name, window) in [
            ("aggregation.historical", &self.aggregation.historical),
            ("aggregation.projected", &self.aggregation.projected),
        ] {
            if let (Some(start), Some(end)) = (window.start, window.end) {
                if start > end {
                    return Err(AppError::Config(format!(
                        "{} window starts after it ends ({} > {})",
                        name, start, end
                    )));
                }
            }
        }

        Ok(())
    }

    pub fn calculator(&self) -> WeightCalculator {
        self.weighting.calculator(&self.selection)
    }
}

fn check_gauge_count(field: &str, count: usize) -> Result<()> {
    if count == 0 {
        return Err(AppError::Config(format!("{} must be at least 1", field)));
    }
    if count > MAX_GAUGES_PER_POINT {
        return Err(AppError::Config(format!(
            "{} {} is too high, maximum is {}",
            field, count, MAX_GAUGES_PER_POINT
        )));
    }
    Ok(())
}

fn expand_env_vars(content: &str) -> Result<String> {
    let mut result = content.to_string();
    let re = regex_lite::Regex::new(r"\$\{([^}]+)\}")
        .map_err(|e| AppError::Config(format!("Invalid env var pattern: {}", e)))?;

    let mut missing_vars = Vec::new();

    for cap in re.captures_iter(content) {
        let var_name = &cap[1];
        match std::env::var(var_name) {
            Ok(value) => {
                result = result.replace(&cap[0], &value);
            }
            Err(_) => {
                missing_vars.push(var_name.to_string());
            }
        }
    }

    if !missing_vars.is_empty() {
        return Err(AppError::Config(format!(
            "Missing required environment variable{}: {}\n\n\
             To fix this:\n\
             1. Create a .env file in the project root\n\
             2. Set the missing variable{}: export {}=<value>\n\
             3. Or set {} in your environment before running",
            if missing_vars.len() > 1 { "s" } else { "" },
            missing_vars.join(", "),
            if missing_vars.len() > 1 { "s" } else { "" },
            missing_vars[0],
            missing_vars.join(", ")
        )));
    }

    Ok(result)
}
