use nalgebra::DVector;
use rand::seq::index;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dynamical_systems::{ensure_dimension, linspace, seeded_rng, Domain, State, SystemDefinition, SystemKind};
use crate::error::{ChaosError, ChaosResult};

/// Newton search for periodic points of a one-dimensional map.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeriodSearchConfig {
    /// A point counts as returning after k steps when `|f^k(x) - x| < 100 × tolerance`.
    pub tolerance: f64,
    pub num_samples: usize,
    pub max_iter: usize,
    /// Points closer than this are the same periodic point.
    pub dedup_tolerance: f64,
}

impl Default for PeriodSearchConfig {
    fn default() -> Self {
        Self {
            tolerance: 1e-10,
            num_samples: 1000,
            max_iter: 50,
            dedup_tolerance: 1e-8,
        }
    }
}

impl PeriodSearchConfig {
    pub fn validate(&self) -> ChaosResult<()> {
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(ChaosError::invalid("tolerance must be positive"));
        }
        if self.num_samples == 0 || self.max_iter == 0 {
            return Err(ChaosError::invalid("num_samples and max_iter must be at least 1"));
        }
        if !(self.dedup_tolerance >= 0.0) {
            return Err(ChaosError::invalid("dedup_tolerance must not be negative"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeriodicPoint {
    pub x: f64,
    pub period: usize,
}

/// Apply a scalar map `n` times.
fn iterate_scalar(system: &SystemDefinition, x: f64, n: usize) -> ChaosResult<f64> {
    Ok(system.iterate(&DVector::from_vec(vec![x]), n)?[0])
}

/// Reject maps that do not send scalars to scalars.
fn ensure_scalar_map(system: &SystemDefinition, probe: f64) -> ChaosResult<()> {
    system.require(SystemKind::Map)?;
    if let SystemDefinition::Map(f) = system {
        let out = f(&DVector::from_vec(vec![probe])).map_err(|reason| ChaosError::integration(0.0, reason))?;
        ensure_dimension(1, out.len())?;
    }
    Ok(())
}

/// Newton iteration on `g(x) = f^n(x) - x` with a central-difference slope.
/// `None` when the iteration stalls, diverges or leaves the map's domain.
fn newton_period_point(system: &SystemDefinition, x0: f64, n: usize, config: &PeriodSearchConfig) -> Option<f64> {
    let g = |x: f64| iterate_scalar(system, x, n).map(|fx| fx - x).ok();
    let mut x = x0;
    for _ in 0..config.max_iter {
        let gx = g(x)?;
        if gx.abs() < config.tolerance {
            return Some(x);
        }
        let h = 1e-7 * x.abs().max(1.0);
        let slope = (g(x + h)? - g(x - h)?) / (2.0 * h);
        if slope == 0.0 || !slope.is_finite() {
            return None;
        }
        let step = gx / slope;
        x -= step;
        if !x.is_finite() {
            return None;
        }
        if step.abs() < 1e-15 * x.abs().max(1.0) {
            break;
        }
    }
    let gx = g(x)?;
    (gx.abs() < 100.0 * config.tolerance).then_some(x)
}

/// Smallest k in `1..=n` with `|f^k(x) - x| < 100 × tolerance`.
fn minimal_period(system: &SystemDefinition, x: f64, n: usize, tolerance: f64) -> ChaosResult<Option<usize>> {
    let mut current = x;
    for k in 1..=n {
        current = iterate_scalar(system, current, 1)?;
        if (current - x).abs() < 100.0 * tolerance {
            return Ok(Some(k));
        }
    }
    Ok(None)
}

/// Points of minimal period `n` of a one-dimensional map in `[a, b]`.
///
/// Newton is started from `num_samples` evenly spaced seeds; converged points
/// inside the interval whose minimal period is exactly `n` are kept once.
pub fn find_period_n_points(
    system: &SystemDefinition,
    interval: (f64, f64),
    n: usize,
    config: &PeriodSearchConfig,
) -> ChaosResult<Vec<PeriodicPoint>> {
    let (a, b) = interval;
    Domain::interval(a, b)?;
    config.validate()?;
    if n == 0 {
        return Err(ChaosError::invalid("period must be at least 1"));
    }
    ensure_scalar_map(system, 0.5 * (a + b))?;

    let mut found: Vec<PeriodicPoint> = Vec::new();
    for seed in linspace(a, b, config.num_samples) {
        let Some(x) = newton_period_point(system, seed, n, config) else {
            continue;
        };
        if !(a..=b).contains(&x) {
            continue;
        }
        if minimal_period(system, x, n, config.tolerance).ok().flatten() != Some(n) {
            continue;
        }
        if found.iter().all(|p| (p.x - x).abs() > config.dedup_tolerance) {
            found.push(PeriodicPoint { x, period: n });
        }
    }

    found.sort_by(|p, q| p.x.total_cmp(&q.x));
    debug!(period = n, found = found.len(), "period-n search finished");
    Ok(found)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LiYorkeConfig {
    pub num_points: usize,
    /// Closeness scale: a pair approaches when its liminf is below `100 × epsilon`.
    pub epsilon: f64,
    pub num_samples: usize,
    pub num_iterations: usize,
    pub transient: usize,
    pub limsup_threshold: f64,
    /// Fraction of scrambled pairs needed when no period-3 point is found.
    pub scrambled_ratio_threshold: f64,
    pub period_search: PeriodSearchConfig,
    pub seed: u64,
    pub return_scrambled_set: bool,
}

impl Default for LiYorkeConfig {
    fn default() -> Self {
        Self {
            num_points: 10_000,
            epsilon: 1e-10,
            num_samples: 100,
            num_iterations: 1000,
            transient: 100,
            limsup_threshold: 0.1,
            scrambled_ratio_threshold: 0.1,
            period_search: PeriodSearchConfig::default(),
            seed: 42,
            return_scrambled_set: false,
        }
    }
}

impl LiYorkeConfig {
    pub fn validate(&self) -> ChaosResult<()> {
        if self.num_points == 0 {
            return Err(ChaosError::invalid("num_points must be at least 1"));
        }
        if !(self.epsilon.is_finite() && self.epsilon > 0.0) {
            return Err(ChaosError::invalid("epsilon must be positive"));
        }
        if self.transient >= self.num_iterations {
            return Err(ChaosError::invalid("transient must be shorter than num_iterations"));
        }
        self.period_search.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiYorkeReport {
    pub satisfies_li_yorke: bool,
    pub has_period_3: bool,
    pub period_3_points: Vec<PeriodicPoint>,
    pub has_scrambled_pairs: bool,
    pub pairs_analyzed: usize,
    pub scrambled_pairs: usize,
    /// Fraction of pairs with `liminf < 100 ε`.
    pub condition_1_ratio: f64,
    /// Fraction of pairs with `limsup > limsup_threshold`.
    pub condition_2_ratio: f64,
    /// Fraction of pairs meeting both conditions.
    pub scrambled_ratio: f64,
    pub interval: (f64, f64),
    pub scrambled_set: Option<Vec<f64>>,
}

/// Numerical Li-Yorke test for a one-dimensional map on `[a, b]`.
///
/// The verdict holds when a point of minimal period 3 exists, or when more
/// than `scrambled_ratio_threshold` of the sampled orbit pairs are scrambled
/// (they come within `100 ε` of each other and separate by more than
/// `limsup_threshold` after the transient).
pub fn check_li_yorke(
    system: &SystemDefinition,
    interval: (f64, f64),
    config: &LiYorkeConfig,
) -> ChaosResult<LiYorkeReport> {
    let (a, b) = interval;
    Domain::interval(a, b)?;
    config.validate()?;
    ensure_scalar_map(system, 0.5 * (a + b))?;

    let period_3_points = find_period_n_points(system, interval, 3, &config.period_search)?;

    let grid = linspace(a + config.epsilon, b - config.epsilon, config.num_points);
    let n_samples = config.num_samples.min(config.num_points);
    let mut rng = seeded_rng(config.seed);
    let sample: Vec<f64> = index::sample(&mut rng, config.num_points, n_samples)
        .into_iter()
        .map(|i| grid[i])
        .collect();

    let mut orbits = Vec::with_capacity(n_samples);
    for &x0 in &sample {
        let mut orbit = Vec::with_capacity(config.num_iterations);
        let mut x = x0;
        for t in 0..config.num_iterations {
            orbit.push(x);
            if t + 1 < config.num_iterations {
                x = system.evaluate(t as f64, &DVector::from_vec(vec![x]))?[0];
            }
        }
        orbits.push(orbit);
    }

    let close = 100.0 * config.epsilon;
    let mut condition_1 = 0usize;
    let mut condition_2 = 0usize;
    let mut scrambled: Vec<(usize, usize)> = Vec::new();
    for i in 0..n_samples {
        for j in (i + 1)..n_samples {
            let (liminf, limsup) = orbits[i][config.transient..]
                .iter()
                .zip(&orbits[j][config.transient..])
                .map(|(p, q)| (p - q).abs())
                .fold((f64::INFINITY, 0.0f64), |(lo, hi), d| (lo.min(d), hi.max(d)));

            let approaches = liminf < close;
            let separates = limsup > config.limsup_threshold;
            condition_1 += approaches as usize;
            condition_2 += separates as usize;
            if approaches && separates {
                scrambled.push((i, j));
            }
        }
    }

    let pairs = n_samples * n_samples.saturating_sub(1) / 2;
    let ratio = |count: usize| if pairs == 0 { 0.0 } else { count as f64 / pairs as f64 };
    let scrambled_ratio = ratio(scrambled.len());
    let has_period_3 = !period_3_points.is_empty();

    let scrambled_set = (config.return_scrambled_set && !scrambled.is_empty()).then(|| {
        let mut members: Vec<usize> = scrambled.iter().flat_map(|&(i, j)| [i, j]).collect();
        members.sort_unstable();
        members.dedup();
        members.into_iter().map(|i| sample[i]).collect()
    });

    debug!(
        period_3 = period_3_points.len(),
        scrambled = scrambled.len(),
        pairs,
        "Li-Yorke check finished"
    );

    Ok(LiYorkeReport {
        satisfies_li_yorke: has_period_3 || scrambled_ratio > config.scrambled_ratio_threshold,
        has_period_3,
        period_3_points,
        has_scrambled_pairs: !scrambled.is_empty(),
        pairs_analyzed: pairs,
        scrambled_pairs: scrambled.len(),
        condition_1_ratio: ratio(condition_1),
        condition_2_ratio: ratio(condition_2),
        scrambled_ratio,
        interval,
        scrambled_set,
    })
}
