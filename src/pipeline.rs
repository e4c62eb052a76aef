use crate::aggregate::{AggregationEngine, AggregationReport, MetricSnapshot};
use crate::config::Config;
use crate::error::{AppError, Result};
use crate::loader;
use crate::mapping::{MappingAccumulator, MappingBuilder, MappingResult};
use crate::model::{MetricKind, PointOutcome, ReferencePoint, Station};
use crate::search::NeighborSearch;
use crate::store::{ArtifactStore, MappingArtifact};
use crate::weights::WeightCalculator;
use rayon::prelude::*;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Search and weighting for one point. A point left without stations still
/// records its nearest station for gap diagnostics.
pub fn impute_point(
    search: &NeighborSearch<'_>,
    calculator: &WeightCalculator,
    point: &ReferencePoint,
) -> PointOutcome {
    let candidates = search.candidates(point);
    let mut outcome = calculator.assign(point, &candidates);
    if outcome.nearest.is_none() {
        outcome.nearest = search.nearest(point);
    }
    outcome
}

pub struct Pipeline {
    config: Config,
    pool: rayon::ThreadPool,
    store: ArtifactStore,
}

impl Pipeline {
    pub fn new(config: Config) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.runtime.threads)
            .thread_name(|i| format!("htf-worker-{}", i))
            .build()
            .map_err(|e| AppError::Config(format!("Failed to start worker pool: {}", e)))?;

        info!("Worker pool started with {} threads", pool.current_num_threads());

        let store = ArtifactStore::new(config.output.directory.clone());
        Ok(Self {
            config,
            pool,
            store,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Loads stations and applies the configured filter.
    pub fn load_stations(&self) -> Result<Vec<Station>> {
        let stations = loader::load_stations(&self.config.inputs.stations)?;
        let total = stations.len();
        let stations = self.config.stations.apply(stations);

        if stations.len() < total {
            info!(
                "Station filter kept {} of {} stations",
                stations.len(),
                total
            );
        }
        if stations.is_empty() {
            return Err(AppError::InvalidData(
                "No stations left after applying the station filter".to_string(),
            ));
        }
        Ok(stations)
    }

    pub fn impute_points(
        &self,
        points: &[ReferencePoint],
        stations: &[Station],
    ) -> Result<Vec<PointOutcome>> {
        let search = NeighborSearch::new(stations, self.config.selection)?;
        let calculator = self.config.calculator();

        Ok(self.pool.install(|| {
            points
                .par_iter()
                .map(|point| impute_point(&search, &calculator, point))
                .collect()
        }))
    }

    /// Point outcomes are folded straight into per-worker accumulators and
    /// never collected.
    pub fn compute_mapping(
        &self,
        points: &[ReferencePoint],
        stations: &[Station],
    ) -> Result<MappingResult> {
        let search = NeighborSearch::new(stations, self.config.selection)?;
        let calculator = self.config.calculator();
        let builder = MappingBuilder::new(stations);

        let started = Instant::now();
        let acc = self.pool.install(|| {
            points
                .par_iter()
                .map(|point| impute_point(&search, &calculator, point))
                .fold(MappingAccumulator::default, |mut acc, outcome| {
                    acc.add(&outcome);
                    acc
                })
                .reduce(MappingAccumulator::default, MappingAccumulator::merge)
        });
        debug!(
            "Assigned {} points in {:.2?}",
            acc.point_count(),
            started.elapsed()
        );

        Ok(builder.finish(acc))
    }

    pub fn run_mapping(&self) -> Result<MappingArtifact> {
        info!(
            "Starting mapping run: {} selection, {} weighting",
            self.config.selection.describe(),
            self.config.weighting.method.as_str()
        );

        let points = loader::load_points(&self.config.inputs.reference_points)?;
        let stations = self.load_stations()?;

        let result = self.compute_mapping(&points, &stations)?;
        result.log();

        let artifact = MappingArtifact::new(
            result,
            self.config.selection,
            self.config.weighting.method,
            stations.len(),
        );
        self.store.save_mapping(&artifact)?;

        info!("Mapping run completed");
        Ok(artifact)
    }

    pub fn load_snapshot(&self, kind: MetricKind) -> Result<MetricSnapshot> {
        let inputs = &self.config.inputs;
        let missing = || {
            AppError::Config(format!(
                "inputs.{} is not set, cannot run {} aggregation",
                kind, kind
            ))
        };

        match kind {
            MetricKind::Historical => {
                let path = inputs.historical.as_ref().ok_or_else(missing)?;
                MetricSnapshot::historical(loader::load_historical(
                    path,
                    inputs.max_parse_failure_rate,
                )?)
            }
            MetricKind::Projected => {
                let path = inputs.projected.as_ref().ok_or_else(missing)?;
                MetricSnapshot::projected(loader::load_projected(
                    path,
                    inputs.max_parse_failure_rate,
                )?)
            }
        }
    }

    /// Restricts the snapshot to the configured window and aggregates.
    pub fn aggregate(
        &self,
        artifact: &MappingArtifact,
        snapshot: MetricSnapshot,
    ) -> AggregationReport {
        let window = match snapshot.kind() {
            MetricKind::Historical => self.config.aggregation.historical,
            MetricKind::Projected => self.config.aggregation.projected,
        };
        let snapshot = snapshot.restrict(window);
        if snapshot.is_empty() {
            warn!(
                "No {} periods fall inside the configured window",
                snapshot.kind()
            );
        }

        let engine = AggregationEngine::new(&artifact.mappings, &artifact.counties);
        debug!("Aggregating over {} counties", engine.county_count());
        self.pool.install(|| engine.aggregate(&snapshot))
    }

    pub fn run_aggregation(&self, kind: MetricKind) -> Result<AggregationReport> {
        info!("Starting {} aggregation run", kind);

        let artifact = self.store.load_mapping()?;
        let snapshot = self.load_snapshot(kind)?;

        let report = self.aggregate(&artifact, snapshot);
        report.log();
        self.store.save_report(&report)?;

        info!("{} aggregation run completed", kind);
        Ok(report)
    }
}
