use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dynamical_systems::{State, SystemDefinition, SystemKind};
use crate::error::{ChaosError, ChaosResult};
use crate::integrator::Rk4Integrator;
use crate::variational::tangent_map;

/// Lyapunov exponents sorted in descending order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LyapunovSpectrum {
    pub exponents: Vec<f64>,
}

impl LyapunovSpectrum {
    pub fn new(mut exponents: Vec<f64>) -> Self {
        exponents.sort_by(|a, b| b.total_cmp(a));
        Self { exponents }
    }

    pub fn largest(&self) -> Option<f64> {
        self.exponents.first().copied()
    }

    pub fn sum(&self) -> f64 {
        self.exponents.iter().sum()
    }

    /// Kolmogorov-Sinai entropy estimate (Pesin): sum of the positive exponents.
    pub fn ks_entropy(&self) -> f64 {
        self.exponents.iter().filter(|&&l| l > 0.0).sum()
    }

    pub fn is_chaotic(&self) -> bool {
        self.largest().map_or(false, |l| l > 0.0)
    }

    /// Phase-space volumes contract.
    pub fn is_dissipative(&self) -> bool {
        self.sum() < 0.0
    }

    /// Kaplan-Yorke (Lyapunov) dimension.
    pub fn kaplan_yorke_dimension(&self) -> f64 {
        let mut partial = 0.0;
        for (j, &lambda) in self.exponents.iter().enumerate() {
            if partial + lambda < 0.0 {
                if lambda == 0.0 {
                    return j as f64;
                }
                return j as f64 + partial / lambda.abs();
            }
            partial += lambda;
        }
        self.exponents.len() as f64
    }
}

/// Benettin QR estimation for flows.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LyapunovConfig {
    pub t_max: f64,
    pub dt: f64,
    /// Defaults to the state dimension.
    pub num_exponents: Option<usize>,
}

impl Default for LyapunovConfig {
    fn default() -> Self {
        Self {
            t_max: 100.0,
            dt: 0.01,
            num_exponents: None,
        }
    }
}

impl LyapunovConfig {
    pub fn validate(&self) -> ChaosResult<()> {
        if !(self.t_max.is_finite() && self.t_max > 0.0) {
            return Err(ChaosError::invalid("t_max must be positive"));
        }
        if !(self.dt.is_finite() && self.dt > 0.0 && self.dt <= self.t_max) {
            return Err(ChaosError::invalid("dt must be positive and at most t_max"));
        }
        Ok(())
    }
}

/// Benettin QR estimation for maps.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MapLyapunovConfig {
    pub n_iterations: usize,
    /// Iterations discarded before accumulation starts.
    pub transient: usize,
    pub num_exponents: Option<usize>,
}

impl Default for MapLyapunovConfig {
    fn default() -> Self {
        Self {
            n_iterations: 10_000,
            transient: 100,
            num_exponents: None,
        }
    }
}

impl MapLyapunovConfig {
    pub fn validate(&self) -> ChaosResult<()> {
        if self.n_iterations == 0 {
            return Err(ChaosError::invalid("n_iterations must be at least 1"));
        }
        Ok(())
    }
}

fn exponent_count(requested: Option<usize>, dim: usize) -> ChaosResult<usize> {
    let k = requested.unwrap_or(dim);
    if k == 0 || k > dim {
        return Err(ChaosError::invalid(format!(
            "number of exponents must be in 1..={}, got {}",
            dim, k
        )));
    }
    Ok(k)
}

/// Rotate `basis` by one tangent step and re-orthonormalize.
///
/// Adds `ln |R[i,i]|` for every non-zero diagonal factor to `sums`. A
/// negative `R[i,i]` flips the matching column of Q instead of being
/// skipped, so the basis orientation stays continuous between steps. For a
/// full-rank step this gives the same sums as counting only positive factors
/// of a sign-normalized QR.
fn qr_step(tangent: &DMatrix<f64>, basis: &DMatrix<f64>, sums: &mut [f64]) -> DMatrix<f64> {
    let evolved = tangent * basis;
    let qr = evolved.qr();
    let mut q = qr.q();
    let r = qr.r();

    for (i, sum) in sums.iter_mut().enumerate() {
        let r_ii = r[(i, i)];
        let magnitude = r_ii.abs();
        if r_ii < 0.0 {
            q.column_mut(i).neg_mut();
        }
        if magnitude > 0.0 {
            *sum += magnitude.ln();
        }
    }
    q
}

/// Lyapunov spectrum of a flow by the Benettin QR method.
///
/// The reference trajectory advances by fixed RK4 steps of `dt`; the tangent
/// basis is multiplied by `I + J·dt` at the new point each step. Sums are
/// divided by `t_max`.
pub fn lyapunov_spectrum(
    system: &SystemDefinition,
    x0: &State,
    config: &LyapunovConfig,
) -> ChaosResult<LyapunovSpectrum> {
    system.require(SystemKind::Flow)?;
    config.validate()?;
    let dim = x0.len();
    let k = exponent_count(config.num_exponents, dim)?;

    let rk4 = Rk4Integrator::new(config.dt)?;
    let n_steps = (config.t_max / config.dt) as usize;
    let mut basis = DMatrix::<f64>::identity(dim, k);
    let mut sums = vec![0.0; k];
    let mut x = x0.clone();
    let mut t = 0.0;

    for _ in 0..n_steps {
        x = rk4.step(system, t, &x)?;
        t += config.dt;
        let tangent = tangent_map(system, t, &x, config.dt)?;
        basis = qr_step(&tangent, &basis, &mut sums);
    }

    debug!(n_steps, dim, "flow Lyapunov spectrum accumulated");
    Ok(LyapunovSpectrum::new(
        sums.into_iter().map(|s| s / config.t_max).collect(),
    ))
}

/// Lyapunov spectrum of a map, with the map Jacobian as tangent map.
pub fn map_lyapunov_spectrum(
    system: &SystemDefinition,
    x0: &State,
    config: &MapLyapunovConfig,
) -> ChaosResult<LyapunovSpectrum> {
    system.require(SystemKind::Map)?;
    config.validate()?;
    let dim = x0.len();
    let k = exponent_count(config.num_exponents, dim)?;

    let mut x = system.iterate(x0, config.transient)?;
    let mut basis = DMatrix::<f64>::identity(dim, k);
    let mut sums = vec![0.0; k];

    for i in 0..config.n_iterations {
        let step = (config.transient + i) as f64;
        let tangent = tangent_map(system, step, &x, 1.0)?;
        basis = qr_step(&tangent, &basis, &mut sums);
        x = system.evaluate(step, &x)?;
    }

    Ok(LyapunovSpectrum::new(
        sums.into_iter()
            .map(|s| s / config.n_iterations as f64)
            .collect(),
    ))
}

/// Two-trajectory estimation of the largest exponent of a flow.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LargestLyapunovConfig {
    pub dt: f64,
    /// RK4 steps discarded before the perturbed copy is created.
    pub transient: usize,
    pub steps: usize,
    pub perturbation: f64,
    pub renormalize_every: usize,
}

impl Default for LargestLyapunovConfig {
    fn default() -> Self {
        Self {
            dt: 0.01,
            transient: 1000,
            steps: 50_000,
            perturbation: 1e-8,
            renormalize_every: 10,
        }
    }
}

impl LargestLyapunovConfig {
    pub fn validate(&self) -> ChaosResult<()> {
        if !(self.dt.is_finite() && self.dt > 0.0) {
            return Err(ChaosError::invalid("dt must be positive"));
        }
        if !(self.perturbation.is_finite() && self.perturbation > 0.0) {
            return Err(ChaosError::invalid("perturbation must be positive"));
        }
        if self.steps == 0 || self.renormalize_every == 0 {
            return Err(ChaosError::invalid(
                "steps and renormalize_every must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Estimate the largest Lyapunov exponent using the two-trajectory method
///
/// Algorithm:
/// 1. Start two trajectories separated by `perturbation` along the first axis
/// 2. Evolve both trajectories
/// 3. Every `renormalize_every` steps, measure the separation d and
///    accumulate ln(d / perturbation)
/// 4. Pull the perturbed trajectory back to distance `perturbation`
///
/// λ = (1 / total time) · Σ ln(d / perturbation)
///
/// For Lorenz system with classical parameters λ₁ ≈ 0.9.
pub fn largest_lyapunov_exponent(
    system: &SystemDefinition,
    x0: &State,
    config: &LargestLyapunovConfig,
) -> ChaosResult<f64> {
    system.require(SystemKind::Flow)?;
    config.validate()?;
    let rk4 = Rk4Integrator::new(config.dt)?;

    let mut t = 0.0;
    let mut state1 = x0.clone();
    for _ in 0..config.transient {
        state1 = rk4.step(system, t, &state1)?;
        t += config.dt;
    }

    let mut state2 = state1.clone();
    state2[0] += config.perturbation;

    let mut sum_log = 0.0;
    let mut n_renorm = 0usize;

    for i in 1..=config.steps {
        state1 = rk4.step(system, t, &state1)?;
        state2 = rk4.step(system, t, &state2)?;
        t += config.dt;

        if i % config.renormalize_every == 0 {
            let separation = &state2 - &state1;
            let d = separation.norm();
            if d == 0.0 {
                debug!(step = i, "trajectories coincide, stopping");
                break;
            }
            sum_log += (d / config.perturbation).ln();
            n_renorm += 1;

            // Renormalize separation vector to prevent overflow
            state2 = &state1 + separation * (config.perturbation / d);
        }
    }

    if n_renorm == 0 {
        return Ok(0.0);
    }
    Ok(sum_log / (n_renorm as f64 * config.renormalize_every as f64 * config.dt))
}

/// Separation of two nearby trajectories over time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DivergenceConfig {
    pub epsilon: f64,
    /// Step of the RK4 integrator for flows; ignored for maps.
    pub dt: f64,
    pub steps: usize,
}

impl Default for DivergenceConfig {
    fn default() -> Self {
        Self {
            epsilon: 1e-8,
            dt: 0.01,
            steps: 2000,
        }
    }
}

impl DivergenceConfig {
    pub fn validate(&self) -> ChaosResult<()> {
        if !(self.epsilon.is_finite() && self.epsilon > 0.0) {
            return Err(ChaosError::invalid("epsilon must be positive"));
        }
        if !(self.dt.is_finite() && self.dt > 0.0) {
            return Err(ChaosError::invalid("dt must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DivergenceSeries {
    pub times: Vec<f64>,
    pub distances: Vec<f64>,
}

impl DivergenceSeries {
    /// Slope of `ln d` against time by least squares; a rough largest exponent
    /// while the separation is still small.
    pub fn growth_rate(&self) -> Option<f64> {
        let pairs: Vec<(f64, f64)> = self
            .times
            .iter()
            .zip(&self.distances)
            .filter(|&(_, &d)| d > 0.0)
            .map(|(&t, &d)| (t, d.ln()))
            .collect();
        if pairs.len() < 2 {
            return None;
        }
        let n = pairs.len() as f64;
        let mean_t = pairs.iter().map(|p| p.0).sum::<f64>() / n;
        let mean_l = pairs.iter().map(|p| p.1).sum::<f64>() / n;
        let cov: f64 = pairs.iter().map(|p| (p.0 - mean_t) * (p.1 - mean_l)).sum();
        let var: f64 = pairs.iter().map(|p| (p.0 - mean_t).powi(2)).sum();
        if var == 0.0 {
            None
        } else {
            Some(cov / var)
        }
    }
}

/// Distance between a trajectory from `x0` and one started `epsilon` away
/// along the first axis, recorded after every step.
///
/// Maps are iterated; flows advance by RK4 steps of `dt`. Stops early once the
/// separation stops being finite.
pub fn sensitivity_divergence(
    system: &SystemDefinition,
    x0: &State,
    config: &DivergenceConfig,
) -> ChaosResult<DivergenceSeries> {
    config.validate()?;
    let rk4 = Rk4Integrator::new(config.dt)?;

    let mut s1 = x0.clone();
    let mut s2 = x0.clone();
    s2[0] += config.epsilon;

    let mut times = Vec::with_capacity(config.steps);
    let mut distances = Vec::with_capacity(config.steps);

    for i in 0..config.steps {
        let (next1, next2, time) = match system.kind() {
            SystemKind::Map => (
                system.evaluate(i as f64, &s1)?,
                system.evaluate(i as f64, &s2)?,
                (i + 1) as f64,
            ),
            SystemKind::Flow => {
                let t = i as f64 * config.dt;
                (
                    rk4.step(system, t, &s1)?,
                    rk4.step(system, t, &s2)?,
                    t + config.dt,
                )
            }
        };
        s1 = next1;
        s2 = next2;

        let d = (&s2 - &s1).norm();
        if !d.is_finite() {
            break;
        }
        times.push(time);
        distances.push(d);
    }

    Ok(DivergenceSeries { times, distances })
}
