use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dynamical_systems::{State, SystemDefinition};
use crate::error::{ChaosError, ChaosResult};
use crate::integrator::{integrate, IntegratorConfig};

/// How far to follow a trajectory.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Horizon {
    /// Number of map applications.
    Steps(usize),
    /// Flow time span `[0, t_max]`, resampled at `n_points` evenly spaced times.
    Time { t_max: f64, n_points: usize },
}

/// A sampled trajectory.
///
/// `times` holds the iterate index for maps and the sample time for flows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Orbit {
    times: Vec<f64>,
    states: Vec<State>,
}

impl Orbit {
    pub(crate) fn from_parts(times: Vec<f64>, states: Vec<State>) -> Self {
        debug_assert_eq!(times.len(), states.len());
        Self { times, states }
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn states(&self) -> &[State] {
        &self.states
    }

    pub fn into_states(self) -> Vec<State> {
        self.states
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.states.first().map_or(0, |s| s.len())
    }

    pub fn last(&self) -> Option<&State> {
        self.states.last()
    }

    pub fn stats(&self) -> TrajectoryStats {
        TrajectoryStats::from_points(&self.states)
    }
}

/// Generate an orbit of a map or a flow.
pub fn generate_orbit(
    system: &SystemDefinition,
    x0: &State,
    horizon: Horizon,
    config: &IntegratorConfig,
) -> ChaosResult<Orbit> {
    if x0.iter().any(|v| !v.is_finite()) {
        return Err(ChaosError::integration(0.0, "initial state is not finite"));
    }

    match (system, horizon) {
        (SystemDefinition::Map(_), Horizon::Steps(n_steps)) => {
            let mut times = Vec::with_capacity(n_steps + 1);
            let mut states = Vec::with_capacity(n_steps + 1);
            let mut current = x0.clone();
            times.push(0.0);
            states.push(current.clone());
            for i in 0..n_steps {
                current = system.evaluate(i as f64, &current)?;
                times.push((i + 1) as f64);
                states.push(current.clone());
            }
            Ok(Orbit::from_parts(times, states))
        }
        (SystemDefinition::Flow(_), Horizon::Time { t_max, n_points }) => {
            if !(t_max.is_finite() && t_max > 0.0) {
                return Err(ChaosError::invalid("t_max must be positive"));
            }
            if n_points < 2 {
                return Err(ChaosError::invalid("a flow orbit needs at least 2 samples"));
            }
            let solution = integrate(system, 0.0, x0, t_max, config)?;
            debug!(steps = solution.len(), t_max, "flow orbit integrated");
            let (times, states) = solution.resample(n_points);
            Ok(Orbit::from_parts(times, states))
        }
        (_, horizon) => Err(ChaosError::invalid(format!(
            "horizon {:?} does not fit a {:?} system",
            horizon,
            system.kind()
        ))),
    }
}

/// Bounding box, centroid and spread of a point cloud.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryStats {
    pub count: usize,
    pub min: Vec<f64>,
    pub max: Vec<f64>,
    pub centroid: Vec<f64>,
    /// Diagonal length of the bounding box.
    pub spread: f64,
}

impl TrajectoryStats {
    pub fn from_points(points: &[State]) -> Self {
        let dim = points.first().map_or(0, |p| p.len());
        if points.is_empty() {
            return Self {
                count: 0,
                min: Vec::new(),
                max: Vec::new(),
                centroid: Vec::new(),
                spread: 0.0,
            };
        }

        let mut min = vec![f64::INFINITY; dim];
        let mut max = vec![f64::NEG_INFINITY; dim];
        let mut sum = DVector::<f64>::zeros(dim);
        for p in points {
            for j in 0..dim {
                min[j] = min[j].min(p[j]);
                max[j] = max[j].max(p[j]);
            }
            sum += p;
        }

        let centroid = (sum / points.len() as f64).iter().copied().collect();
        let spread = min
            .iter()
            .zip(&max)
            .map(|(lo, hi)| (hi - lo).powi(2))
            .sum::<f64>()
            .sqrt();

        Self {
            count: points.len(),
            min,
            max,
            centroid,
            spread,
        }
    }

    /// Product of the bounding-box side lengths.
    pub fn bounding_volume(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.min.iter().zip(&self.max).map(|(lo, hi)| hi - lo).product()
    }
}
