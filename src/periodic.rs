use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::dynamical_systems::{ensure_dimension, State, SystemDefinition, SystemKind};
use crate::error::{CandidateFailure, ChaosError, ChaosResult};
use crate::integrator::{integrate, DenseSolution, IntegratorConfig};

/// Shooting search for closed orbits of a flow.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocatorConfig {
    pub expected_period: f64,
    pub tolerance: f64,
    pub max_periods: usize,
    /// Defaults to `3 × expected_period × max_periods`.
    pub integration_time: Option<f64>,
    pub integrator: IntegratorConfig,
    /// Keep every 10th solver step of the verification run.
    pub keep_trajectories: bool,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            expected_period: 1.5,
            tolerance: 1e-6,
            max_periods: 5,
            integration_time: None,
            integrator: IntegratorConfig::default(),
            keep_trajectories: false,
        }
    }
}

impl LocatorConfig {
    pub fn new(expected_period: f64) -> ChaosResult<Self> {
        let config = Self {
            expected_period,
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ChaosResult<()> {
        if !(self.expected_period.is_finite() && self.expected_period > 0.0) {
            return Err(ChaosError::invalid("expected_period must be positive"));
        }
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(ChaosError::invalid("tolerance must be positive"));
        }
        if self.max_periods == 0 {
            return Err(ChaosError::invalid("max_periods must be at least 1"));
        }
        if let Some(t) = self.integration_time {
            if !(t.is_finite() && t > 0.0) {
                return Err(ChaosError::invalid("integration_time must be positive"));
            }
        }
        self.integrator.validate()
    }

    fn integration_span(&self) -> f64 {
        self.integration_time
            .unwrap_or(3.0 * self.expected_period * self.max_periods as f64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodicOrbitCandidate {
    /// Position of the initial condition in the caller's list.
    pub index: usize,
    pub initial_point: State,
    pub period: f64,
    /// Distance to the initial point after one verified period.
    pub closure_error: f64,
    /// Closure within `tolerance` rather than only within `10 × tolerance`.
    pub closes_within_tolerance: bool,
    pub trajectory_samples: Option<Vec<State>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocatorReport {
    pub orbits: Vec<PeriodicOrbitCandidate>,
    pub failures: Vec<CandidateFailure>,
    pub candidates_processed: usize,
    pub mean_period: f64,
    /// Population standard deviation of the found periods.
    pub std_period: f64,
    pub tolerance: f64,
}

/// Indices of local minima, thinned so that kept minima are at least
/// `separation` samples apart. Deeper minima win.
pub(crate) fn local_minima(values: &[f64], separation: usize) -> Vec<usize> {
    if values.len() < 3 {
        return Vec::new();
    }
    let mut minima: Vec<usize> = (1..values.len() - 1)
        .filter(|&i| values[i] < values[i - 1] && values[i] <= values[i + 1])
        .collect();

    let separation = separation.max(1);
    if separation > 1 {
        let mut by_depth = minima.clone();
        by_depth.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
        let mut kept: Vec<usize> = Vec::with_capacity(by_depth.len());
        for i in by_depth {
            if kept.iter().all(|&k| k.abs_diff(i) >= separation) {
                kept.push(i);
            }
        }
        kept.sort_unstable();
        minima = kept;
    }
    minima
}

const INV_PHI: f64 = 0.618_033_988_749_894_8;

/// Minimize a unimodal function on `[a, b]` by golden-section search.
pub(crate) fn golden_section_min<F>(f: F, mut a: f64, mut b: f64, iterations: usize) -> (f64, f64)
where
    F: Fn(f64) -> f64,
{
    let mut c = b - INV_PHI * (b - a);
    let mut d = a + INV_PHI * (b - a);
    let mut fc = f(c);
    let mut fd = f(d);
    for _ in 0..iterations {
        if fc < fd {
            b = d;
            d = c;
            fd = fc;
            c = b - INV_PHI * (b - a);
            fc = f(c);
        } else {
            a = c;
            c = d;
            fc = fd;
            d = a + INV_PHI * (b - a);
            fd = f(d);
        }
    }
    if fc < fd {
        (c, fc)
    } else {
        (d, fd)
    }
}

/// Closest returns to `x0` along a solution: solver-step minima refined on the
/// dense interpolant.
fn closest_returns(solution: &DenseSolution, x0: &State) -> Vec<(f64, f64)> {
    let times = solution.times();
    let distances: Vec<f64> = solution.states().iter().map(|s| (s - x0).norm()).collect();
    let separation = (distances.len() / 10).max(1);

    local_minima(&distances, separation)
        .into_iter()
        .map(|i| {
            let (t, d) = golden_section_min(
                |t| (solution.evaluate(t) - x0).norm(),
                times[i - 1],
                times[i + 1],
                60,
            );
            if d < distances[i] {
                (t, d)
            } else {
                (times[i], distances[i])
            }
        })
        .collect()
}

fn locate_one(
    system: &SystemDefinition,
    index: usize,
    x0: &State,
    config: &LocatorConfig,
) -> ChaosResult<Option<PeriodicOrbitCandidate>> {
    let solution = integrate(system, 0.0, x0, config.integration_span(), &config.integrator)?;

    let best = closest_returns(&solution, x0)
        .into_iter()
        .filter(|&(t, d)| d < config.tolerance && t > 0.5 * config.expected_period)
        .min_by(|a, b| a.1.total_cmp(&b.1));

    let Some((period, _)) = best else {
        return Ok(None);
    };

    let verification = integrate(system, 0.0, x0, period, &config.integrator)?;
    let closure_error = (verification.final_state() - x0).norm();
    if closure_error >= 10.0 * config.tolerance {
        return Ok(None);
    }

    let trajectory_samples = config
        .keep_trajectories
        .then(|| verification.states().iter().step_by(10).cloned().collect());

    Ok(Some(PeriodicOrbitCandidate {
        index,
        initial_point: x0.clone(),
        period,
        closure_error,
        closes_within_tolerance: closure_error < config.tolerance,
        trajectory_samples,
    }))
}

/// Search each initial condition for a closed orbit near `expected_period`.
///
/// Every candidate is integrated for the configured span; local minima of its
/// distance to the start that fall below `tolerance` after more than half the
/// expected period are period estimates. The closest return is re-verified by
/// a fresh integration over exactly that period. A candidate whose
/// integration fails is recorded in `failures` and the search goes on.
pub fn locate_periodic_orbits(
    system: &SystemDefinition,
    candidates: &[State],
    config: &LocatorConfig,
) -> ChaosResult<LocatorReport> {
    system.require(SystemKind::Flow)?;
    config.validate()?;
    if let Some(first) = candidates.first() {
        for c in candidates {
            ensure_dimension(first.len(), c.len())?;
        }
    }

    let mut orbits = Vec::new();
    let mut failures = Vec::new();

    for (index, x0) in candidates.iter().enumerate() {
        match locate_one(system, index, x0, config) {
            Ok(Some(orbit)) => orbits.push(orbit),
            Ok(None) => {}
            Err(err) => {
                warn!(candidate = index, error = %err, "skipping periodic orbit candidate");
                failures.push(CandidateFailure::new(index, &err));
            }
        }
    }

    let (mean_period, std_period) = if orbits.is_empty() {
        (0.0, 0.0)
    } else {
        let n = orbits.len() as f64;
        let mean = orbits.iter().map(|o| o.period).sum::<f64>() / n;
        let var = orbits.iter().map(|o| (o.period - mean).powi(2)).sum::<f64>() / n;
        (mean, var.sqrt())
    };

    info!(
        found = orbits.len(),
        failed = failures.len(),
        candidates = candidates.len(),
        "periodic orbit search finished"
    );

    Ok(LocatorReport {
        orbits,
        failures,
        candidates_processed: candidates.len(),
        mean_period,
        std_period,
        tolerance: config.tolerance,
    })
}
