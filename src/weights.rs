//! Distance-decay weighting of a point's candidate stations.

use crate::model::{NeighborCandidate, PointOutcome, ReferencePoint, WeightedAssignment};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightMethod {
    /// Co-located override, then inverse distance with low-weight pruning.
    #[default]
    Hybrid,
    /// Plain inverse distance over every candidate.
    InverseDistance,
}

impl WeightMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            WeightMethod::Hybrid => "hybrid",
            WeightMethod::InverseDistance => "inverse_distance",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightCalculator {
    method: WeightMethod,
    power: f64,
    close_threshold_km: f64,
    min_weight_threshold: f64,
    preserve_multiplicity: bool,
}

impl WeightCalculator {
    pub fn new(
        method: WeightMethod,
        power: f64,
        close_threshold_km: f64,
        min_weight_threshold: f64,
    ) -> Self {
        Self {
            method,
            power,
            close_threshold_km,
            min_weight_threshold,
            preserve_multiplicity: false,
        }
    }

    /// Keep pruned or overridden stations as zero-weight assignments, so
    /// every point keeps its full candidate count. Used by forced selection.
    pub fn preserving_multiplicity(mut self, preserve: bool) -> Self {
        self.preserve_multiplicity = preserve;
        self
    }

    pub fn method(&self) -> WeightMethod {
        self.method
    }

    /// Normalized weights parallel to `candidates`, which must be sorted
    /// nearest first. Dropped candidates get 0.0. The weights sum to 1.0,
    /// or are all 0.0 when hybrid pruning drops every candidate.
    pub fn weigh(&self, candidates: &[NeighborCandidate]) -> Vec<f64> {
        if candidates.is_empty() {
            return Vec::new();
        }
        match self.method {
            WeightMethod::Hybrid => self.weigh_hybrid(candidates),
            WeightMethod::InverseDistance => self.weigh_inverse_distance(candidates),
        }
    }

    fn weigh_hybrid(&self, candidates: &[NeighborCandidate]) -> Vec<f64> {
        // A gauge at (or practically at) the point dominates. Zero distance
        // always lands here, so the inverse powers below never see 0.
        if let Some(pos) = candidates
            .iter()
            .position(|c| c.distance_km <= self.close_threshold_km)
        {
            return one_hot(candidates.len(), pos);
        }

        let raw: Vec<f64> = candidates
            .iter()
            .map(|c| c.distance_km.powf(-self.power))
            .collect();
        let total: f64 = raw.iter().sum();

        let keep: Vec<bool> = raw
            .iter()
            .map(|w| w / total >= self.min_weight_threshold)
            .collect();
        if !keep.iter().any(|k| *k) {
            return vec![0.0; candidates.len()];
        }

        let retained: f64 = raw
            .iter()
            .zip(&keep)
            .filter(|(_, k)| **k)
            .map(|(w, _)| *w)
            .sum();

        raw.iter()
            .zip(&keep)
            .map(|(w, k)| if *k { w / retained } else { 0.0 })
            .collect()
    }

    fn weigh_inverse_distance(&self, candidates: &[NeighborCandidate]) -> Vec<f64> {
        let colocated = candidates.iter().filter(|c| c.distance_km <= 0.0).count();
        if colocated > 0 {
            let share = 1.0 / colocated as f64;
            return candidates
                .iter()
                .map(|c| if c.distance_km <= 0.0 { share } else { 0.0 })
                .collect();
        }

        let raw: Vec<f64> = candidates
            .iter()
            .map(|c| c.distance_km.powf(-self.power))
            .collect();
        let total: f64 = raw.iter().sum();
        raw.iter().map(|w| w / total).collect()
    }

    /// Weighs the candidates of one point and wraps the result. A point
    /// whose candidates were all pruned comes back unassigned.
    pub fn assign(&self, point: &ReferencePoint, candidates: &[NeighborCandidate]) -> PointOutcome {
        let weights = self.weigh(candidates);
        let retained = weights.iter().any(|w| *w > 0.0);

        let assignments = candidates
            .iter()
            .zip(weights)
            .enumerate()
            .filter(|(_, (_, weight))| {
                retained && (self.preserve_multiplicity || *weight > 0.0)
            })
            .map(|(idx, (candidate, weight))| WeightedAssignment {
                point_id: point.point_id,
                county_id: point.county_id.clone(),
                station_id: candidate.station_id.clone(),
                weight,
                distance_km: candidate.distance_km,
                rank: idx + 1,
            })
            .collect();

        PointOutcome {
            point_id: point.point_id,
            county_id: point.county_id.clone(),
            assignments,
            nearest: candidates.first().cloned(),
        }
    }
}

fn one_hot(len: usize, pos: usize) -> Vec<f64> {
    let mut weights = vec![0.0; len];
    weights[pos] = 1.0;
    weights
}
