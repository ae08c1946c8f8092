use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dynamical_systems::{seeded_rng, Domain, State, SystemDefinition, SystemKind};
use crate::error::{ChaosError, ChaosResult};
use crate::orbit::TrajectoryStats;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransitivityConfig {
    pub num_points: usize,
    /// Orbit length, initial point included.
    pub num_iterations: usize,
    /// Guards the mixing coefficient of variation against a zero mean.
    pub epsilon: f64,
    /// Orbits entering the pairwise mixing comparison.
    pub mixing_sample: usize,
    pub threshold: f64,
    pub seed: u64,
    pub return_details: bool,
}

impl Default for TransitivityConfig {
    fn default() -> Self {
        Self {
            num_points: 1000,
            num_iterations: 100,
            epsilon: 1e-6,
            mixing_sample: 50,
            threshold: 0.7,
            seed: 42,
            return_details: false,
        }
    }
}

impl TransitivityConfig {
    pub fn validate(&self) -> ChaosResult<()> {
        if self.num_points == 0 || self.num_iterations == 0 {
            return Err(ChaosError::invalid(
                "num_points and num_iterations must be at least 1",
            ));
        }
        if !(self.epsilon.is_finite() && self.epsilon > 0.0) {
            return Err(ChaosError::invalid("epsilon must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitivityDetails {
    pub orbits: Vec<Vec<State>>,
    pub min: Vec<f64>,
    pub max: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitivityReport {
    pub score: f64,
    pub coverage_ratio: f64,
    pub mixing_score: f64,
    pub covered_volume: f64,
    /// Orbit points per unit of covered volume, 0 when nothing is covered.
    pub point_density: f64,
    pub is_transitive: bool,
    pub dimension: usize,
    pub details: Option<TransitivityDetails>,
}

/// Coefficient of variation of the mean distances between pairs of orbits.
fn mixing_score(orbits: &[Vec<State>], sample: usize, epsilon: f64) -> f64 {
    let m = orbits.len().min(sample);
    let mut pair_means = Vec::with_capacity(m * m.saturating_sub(1) / 2);
    for i in 0..m {
        for j in (i + 1)..m {
            let total: f64 = orbits[i]
                .iter()
                .zip(&orbits[j])
                .map(|(a, b)| (a - b).norm())
                .sum();
            pair_means.push(total / orbits[i].len() as f64);
        }
    }
    if pair_means.is_empty() {
        return 0.0;
    }

    let n = pair_means.len() as f64;
    let mean = pair_means.iter().sum::<f64>() / n;
    let std = (pair_means.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / n).sqrt();
    std / (mean + epsilon)
}

/// Numerical check of topological transitivity for a map.
///
/// Seeds are drawn uniformly from `domain`. Coverage is the bounding-box
/// volume of all orbit points over the domain volume; the score is
/// `coverage × (1 + mixing) / 2`. Flows must be turned into a map first with
/// [`SystemDefinition::time_map`].
pub fn check_transitivity(
    system: &SystemDefinition,
    domain: &Domain,
    config: &TransitivityConfig,
) -> ChaosResult<TransitivityReport> {
    system.require(SystemKind::Map)?;
    domain.validate()?;
    config.validate()?;

    let mut rng = seeded_rng(config.seed);
    let seeds = domain.sample_uniform(&mut rng, config.num_points);

    let mut orbits = Vec::with_capacity(seeds.len());
    for x0 in seeds {
        let mut orbit = Vec::with_capacity(config.num_iterations);
        let mut x = x0;
        for i in 1..config.num_iterations {
            let next = system.evaluate(i as f64, &x)?;
            orbit.push(x);
            x = next;
        }
        orbit.push(x);
        orbits.push(orbit);
    }

    let all_points: Vec<State> = orbits.iter().flatten().cloned().collect();
    let stats = TrajectoryStats::from_points(&all_points);
    let covered_volume = stats.bounding_volume();
    let coverage_ratio = covered_volume / domain.volume();
    let point_density = if covered_volume > 0.0 {
        all_points.len() as f64 / covered_volume
    } else {
        0.0
    };

    let mixing = mixing_score(&orbits, config.mixing_sample, config.epsilon);
    let score = coverage_ratio * (1.0 + mixing) / 2.0;
    debug!(score, coverage_ratio, mixing, "transitivity scored");

    let details = config.return_details.then(|| TransitivityDetails {
        orbits,
        min: stats.min.clone(),
        max: stats.max.clone(),
    });

    Ok(TransitivityReport {
        score,
        coverage_ratio,
        mixing_score: mixing,
        covered_volume,
        point_density,
        is_transitive: score > config.threshold,
        dimension: domain.dim(),
        details,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DVector;

    fn logistic() -> SystemDefinition {
        SystemDefinition::map(|x: &State| DVector::from_vec(vec![4.0 * x[0] * (1.0 - x[0])]))
    }

    #[test]
    fn test_identity_map_single_seed_is_not_transitive() {
        let identity = SystemDefinition::map(|x: &State| x.clone());
        let domain = Domain::new(vec![0.0, 0.0], vec![1.0, 1.0]).unwrap();
        let config = TransitivityConfig {
            num_points: 1,
            ..TransitivityConfig::default()
        };
        let report = check_transitivity(&identity, &domain, &config).unwrap();

        assert_eq!(report.coverage_ratio, 0.0);
        assert_eq!(report.mixing_score, 0.0);
        assert_eq!(report.point_density, 0.0);
        assert!(!report.is_transitive);
        assert_eq!(report.dimension, 2);
    }

    #[test]
    fn test_logistic_covers_interval() {
        let domain = Domain::interval(0.001, 0.999).unwrap();
        let config = TransitivityConfig {
            num_points: 200,
            return_details: true,
            ..TransitivityConfig::default()
        };
        let report = check_transitivity(&logistic(), &domain, &config).unwrap();

        assert!(report.coverage_ratio > 0.99, "{:?}", report.coverage_ratio);
        assert!(report.mixing_score >= 0.0);
        let details = report.details.unwrap();
        assert_eq!(details.orbits.len(), 200);
        assert!(details.orbits.iter().all(|o| o.len() == 100));
    }

    #[test]
    fn test_same_seed_same_report() {
        let domain = Domain::interval(0.001, 0.999).unwrap();
        let config = TransitivityConfig {
            num_points: 30,
            ..TransitivityConfig::default()
        };
        let a = check_transitivity(&logistic(), &domain, &config).unwrap();
        let b = check_transitivity(&logistic(), &domain, &config).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_flows_need_a_time_map() {
        let flow = SystemDefinition::flow(|_t, x: &State| -x);
        let domain = Domain::interval(0.0, 1.0).unwrap();
        let result = check_transitivity(&flow, &domain, &TransitivityConfig::default());
        assert!(matches!(result, Err(ChaosError::InvalidParameter(_))));
    }

    #[test]
    fn test_mixing_score_of_identical_pairs() {
        let orbit = vec![DVector::from_vec(vec![0.0]), DVector::from_vec(vec![1.0])];
        let shifted = vec![DVector::from_vec(vec![1.0]), DVector::from_vec(vec![2.0])];
        // One pair only: zero spread.
        assert_eq!(mixing_score(&[orbit.clone(), shifted], 50, 1e-6), 0.0);
        assert_eq!(mixing_score(&[orbit], 50, 1e-6), 0.0);
    }
}
