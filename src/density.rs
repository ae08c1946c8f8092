use std::ops::ControlFlow;

use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::dynamical_systems::{linspace, Domain, State, SystemDefinition, SystemKind};
use crate::error::{CandidateFailure, ChaosError, ChaosResult};
use crate::integrator::{integrate_with, IntegratorConfig, StepView};
use crate::refiner::{refine_orbit, RefinerConfig};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DensityConfig {
    pub periods: Vec<usize>,
    /// Grid values per axis (per section axis for flows).
    pub grid_resolution: usize,
    pub tolerance: f64,
    /// Newton-polish map grid seeds onto nearby periodic points before the
    /// acceptance test.
    ///
    /// A polished point returns to itself within `tolerance`. With polishing
    /// off (or when Newton leaves the map's domain and the raw seed is kept)
    /// a point only satisfies the acceptance bound
    /// `|f^n(x) - x| < 100 * tolerance`.
    pub polish: bool,
    pub polish_max_iter: usize,
    /// Integration time per seed on the Poincaré section.
    pub section_time: f64,
    pub integrator: IntegratorConfig,
    /// Aggregate density above which periodic points count as dense.
    pub significance_threshold: f64,
    pub return_distribution: bool,
}

impl Default for DensityConfig {
    fn default() -> Self {
        Self {
            periods: vec![1, 2, 3, 4],
            grid_resolution: 50,
            tolerance: 1e-6,
            polish: true,
            polish_max_iter: 50,
            section_time: 100.0,
            integrator: IntegratorConfig::default(),
            significance_threshold: 0.01,
            return_distribution: false,
        }
    }
}

impl DensityConfig {
    pub fn validate(&self) -> ChaosResult<()> {
        if self.periods.is_empty() || self.periods.contains(&0) {
            return Err(ChaosError::invalid("periods must be a non-empty list of positive integers"));
        }
        if self.grid_resolution < 2 {
            return Err(ChaosError::invalid("grid_resolution must be at least 2"));
        }
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(ChaosError::invalid("tolerance must be positive"));
        }
        if self.polish && self.polish_max_iter == 0 {
            return Err(ChaosError::invalid("polish_max_iter must be at least 1"));
        }
        if !(self.section_time.is_finite() && self.section_time > 0.0) {
            return Err(ChaosError::invalid("section_time must be positive"));
        }
        self.integrator.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodCount {
    pub period: usize,
    pub count: usize,
    pub density: f64,
    pub points: Vec<State>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DensityReport {
    pub per_period: Vec<PeriodCount>,
    pub total_points: usize,
    pub domain_volume: f64,
    pub global_density: f64,
    pub has_significant_density: bool,
    pub failures: Vec<CandidateFailure>,
    /// Every accepted point with its period, when requested.
    pub distribution: Option<Vec<(State, usize)>>,
}

/// Points accepted for one period, deduplicated at `radius`.
struct Accepted {
    radius: f64,
    points: Vec<State>,
}

impl Accepted {
    fn new(radius: f64) -> Self {
        Self {
            radius,
            points: Vec::new(),
        }
    }

    fn insert(&mut self, point: State) -> bool {
        if self.points.iter().any(|p| (p - &point).norm() < self.radius) {
            return false;
        }
        self.points.push(point);
        true
    }
}

fn proper_divisors(n: usize) -> impl Iterator<Item = usize> {
    (1..n).filter(move |k| n % k == 0)
}

/// Count primitive periodic points per period and their density in `domain`.
///
/// Maps are searched on a tensor grid; flows must be three-dimensional and
/// are searched on the Poincaré section through the middle of the third axis.
/// Seeds whose evaluation fails are recorded in `failures`.
pub fn periodic_point_density(
    system: &SystemDefinition,
    domain: &Domain,
    config: &DensityConfig,
) -> ChaosResult<DensityReport> {
    domain.validate()?;
    config.validate()?;

    let (per_period_points, failures) = match system.kind() {
        SystemKind::Map => search_map(system, domain, config)?,
        SystemKind::Flow => search_flow_section(system, domain, config)?,
    };

    if !failures.is_empty() {
        warn!(failed = failures.len(), "periodic point seeds skipped");
    }

    let volume = domain.volume();
    let per_period: Vec<PeriodCount> = config
        .periods
        .iter()
        .zip(per_period_points)
        .map(|(&period, points)| PeriodCount {
            period,
            count: points.len(),
            density: points.len() as f64 / volume,
            points,
        })
        .collect();

    let total_points: usize = per_period.iter().map(|p| p.count).sum();
    let global_density = total_points as f64 / volume;
    let distribution = config.return_distribution.then(|| {
        per_period
            .iter()
            .flat_map(|p| p.points.iter().map(move |x| (x.clone(), p.period)))
            .collect()
    });

    info!(total_points, global_density, "periodic point density computed");

    Ok(DensityReport {
        per_period,
        total_points,
        domain_volume: volume,
        global_density,
        has_significant_density: global_density > config.significance_threshold,
        failures,
        distribution,
    })
}

type SearchOutcome = (Vec<Vec<State>>, Vec<CandidateFailure>);

/// Polish a grid seed (when enabled) and apply the period-n acceptance rules.
fn map_candidate(
    system: &SystemDefinition,
    domain: &Domain,
    seed: &State,
    n: usize,
    config: &DensityConfig,
    polisher: &RefinerConfig,
) -> ChaosResult<Option<State>> {
    let tol = config.tolerance;
    let x = if config.polish {
        match refine_orbit(system, seed, n as f64, polisher) {
            Ok(refined) if refined.converged && domain.contains(&refined.point) => refined.point,
            Ok(_) => return Ok(None),
            Err(err) => {
                // Newton left the region where the map is defined; test the raw seed.
                debug!(period = n, error = %err, "polishing failed");
                seed.clone()
            }
        }
    } else {
        seed.clone()
    };

    if (system.iterate(&x, n)? - &x).norm() >= 100.0 * tol {
        return Ok(None);
    }
    for k in proper_divisors(n) {
        if (system.iterate(&x, k)? - &x).norm() < tol {
            return Ok(None);
        }
    }
    Ok(Some(x))
}

fn search_map(system: &SystemDefinition, domain: &Domain, config: &DensityConfig) -> ChaosResult<SearchOutcome> {
    let grid = domain.grid(config.grid_resolution)?;
    let tol = config.tolerance;
    let polisher = RefinerConfig {
        tolerance: tol * 0.01,
        max_iter: config.polish_max_iter,
        ..RefinerConfig::default()
    };

    let mut per_period = Vec::with_capacity(config.periods.len());
    let mut failures = Vec::new();

    for &n in &config.periods {
        let mut accepted = Accepted::new(10.0 * tol);

        for (index, seed) in grid.iter().enumerate() {
            let outcome = map_candidate(system, domain, seed, n, config, &polisher);

            match outcome {
                Ok(Some(x)) => {
                    accepted.insert(x);
                }
                Ok(None) => {}
                Err(err) => {
                    debug!(period = n, seed = index, error = %err, "periodic point seed failed");
                    failures.push(CandidateFailure::new(index, &err).with_period(n));
                }
            }
        }

        debug!(period = n, found = accepted.points.len(), "map periodic points");
        per_period.push(accepted.points);
    }

    Ok((per_period, failures))
}

/// Same-direction returns of a trajectory to the plane `x[2] = level`.
fn section_returns(
    system: &SystemDefinition,
    seed: &State,
    level: f64,
    direction: f64,
    max_returns: usize,
    config: &DensityConfig,
) -> ChaosResult<Vec<State>> {
    let mut returns = Vec::with_capacity(max_returns);
    integrate_with(system, 0.0, seed, config.section_time, &config.integrator, |step: &StepView<'_>| {
        let g0 = (step.y0[2] - level) * direction;
        let g1 = (step.y1[2] - level) * direction;
        if g0 < 0.0 && g1 >= 0.0 {
            let (mut lo, mut hi) = (step.t0, step.t1);
            for _ in 0..60 {
                let mid = 0.5 * (lo + hi);
                if (step.interpolate(mid)[2] - level) * direction < 0.0 {
                    lo = mid;
                } else {
                    hi = mid;
                }
            }
            returns.push(step.interpolate(hi));
        }
        if returns.len() >= max_returns {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    })?;
    Ok(returns)
}

fn search_flow_section(
    system: &SystemDefinition,
    domain: &Domain,
    config: &DensityConfig,
) -> ChaosResult<SearchOutcome> {
    if domain.dim() != 3 {
        return Err(ChaosError::DimensionMismatch {
            expected: 3,
            found: domain.dim(),
        });
    }

    let tol = config.tolerance;
    let level = 0.5 * (domain.lower()[2] + domain.upper()[2]);
    let xs = linspace(domain.lower()[0], domain.upper()[0], config.grid_resolution);
    let ys = linspace(domain.lower()[1], domain.upper()[1], config.grid_resolution);
    let max_returns = config.periods.iter().copied().max().unwrap_or(1);

    let mut accepted: Vec<Accepted> = config.periods.iter().map(|_| Accepted::new(10.0 * tol)).collect();
    let mut failures = Vec::new();
    let planar = |p: &State, seed: &State| ((p[0] - seed[0]).powi(2) + (p[1] - seed[1]).powi(2)).sqrt();

    for (iy, &y) in ys.iter().enumerate() {
        for (ix, &x) in xs.iter().enumerate() {
            let index = iy * xs.len() + ix;
            let seed = DVector::from_vec(vec![x, y, level]);

            let returns = system.evaluate(0.0, &seed).and_then(|field| {
                if field[2] == 0.0 {
                    // Tangent to the section: no crossing direction.
                    return Ok(Vec::new());
                }
                section_returns(system, &seed, level, field[2].signum(), max_returns, config)
            });

            let returns = match returns {
                Ok(r) => r,
                Err(err) => {
                    debug!(seed = index, error = %err, "section seed failed");
                    failures.push(CandidateFailure::new(index, &err));
                    continue;
                }
            };

            for (slot, &n) in accepted.iter_mut().zip(&config.periods) {
                let Some(nth) = returns.get(n - 1) else {
                    continue;
                };
                if planar(nth, &seed) >= 10.0 * tol {
                    continue;
                }
                let primitive = proper_divisors(n).all(|k| planar(&returns[k - 1], &seed) >= tol);
                if primitive {
                    slot.insert(seed.clone());
                }
            }
        }
    }

    Ok((accepted.into_iter().map(|a| a.points).collect(), failures))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logistic(r: f64) -> SystemDefinition {
        SystemDefinition::map(move |x: &State| DVector::from_vec(vec![r * x[0] * (1.0 - x[0])]))
    }

    fn count(report: &DensityReport, period: usize) -> usize {
        report
            .per_period
            .iter()
            .find(|p| p.period == period)
            .map_or(0, |p| p.count)
    }

    #[test]
    fn test_logistic_periodic_points_are_primitive() {
        let map = logistic(4.0);
        let domain = Domain::interval(0.0, 1.0).unwrap();
        let config = DensityConfig {
            periods: vec![1, 2, 3],
            grid_resolution: 200,
            return_distribution: true,
            ..DensityConfig::default()
        };
        let report = periodic_point_density(&map, &domain, &config).unwrap();

        // f^n has 2^n fixed points; primitive counts are 2, 2 and 6.
        assert_eq!(count(&report, 1), 2);
        assert_eq!(count(&report, 2), 2);
        assert_eq!(count(&report, 3), 6);
        assert!(report.has_significant_density);
        assert_eq!(report.distribution.as_ref().map(|d| d.len()), Some(10));

        for period in &report.per_period {
            let n = period.period;
            for x in &period.points {
                let residual = (map.iterate(x, n).unwrap() - x).norm();
                assert!(residual < config.tolerance, "period {} residual {}", n, residual);
                for k in proper_divisors(n) {
                    assert!((map.iterate(x, k).unwrap() - x).norm() >= config.tolerance);
                }
            }
        }
    }

    #[test]
    fn test_unpolished_grid_needs_exact_hits() {
        // The grid includes 0 and 0.5, fixed points of x -> 2x(1-x).
        let map = logistic(2.0);
        let domain = Domain::interval(0.0, 1.0).unwrap();
        let config = DensityConfig {
            periods: vec![1],
            grid_resolution: 11,
            polish: false,
            ..DensityConfig::default()
        };
        let report = periodic_point_density(&map, &domain, &config).unwrap();
        assert_eq!(report.total_points, 2);
        assert!((report.global_density - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_failing_seeds_are_recorded() {
        let map = SystemDefinition::try_map(|x: &State| {
            if x[0] > 0.5 {
                Err("outside definition".to_string())
            } else {
                Ok(x * 0.5)
            }
        });
        let domain = Domain::interval(0.0, 1.0).unwrap();
        let config = DensityConfig {
            periods: vec![1],
            grid_resolution: 5,
            polish: false,
            ..DensityConfig::default()
        };
        let report = periodic_point_density(&map, &domain, &config).unwrap();
        // 0.75 and 1.0 fail; 0 is the only fixed point.
        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.total_points, 1);

        let both = DensityConfig {
            periods: vec![1, 2],
            ..config
        };
        let report = periodic_point_density(&map, &domain, &both).unwrap();
        let tagged: Vec<(usize, Option<usize>)> = report.failures.iter().map(|f| (f.index, f.period)).collect();
        assert_eq!(tagged, vec![(3, Some(1)), (4, Some(1)), (3, Some(2)), (4, Some(2))]);
    }

    #[test]
    fn test_unpolished_points_meet_acceptance_bound() {
        // Contraction onto 0.5: a seed x has residual 0.1 |x - 0.5|, at most
        // 0.05 on the grid, so every seed passes the 100 * tol test.
        let map = SystemDefinition::map(|x: &State| x.map(|v| 0.9 * v + 0.05));
        let domain = Domain::interval(0.0, 1.0).unwrap();
        let config = DensityConfig {
            periods: vec![1],
            grid_resolution: 11,
            tolerance: 1e-3,
            polish: false,
            ..DensityConfig::default()
        };
        let report = periodic_point_density(&map, &domain, &config).unwrap();
        assert_eq!(report.total_points, 11);

        let residuals: Vec<f64> = report.per_period[0]
            .points
            .iter()
            .map(|x| (map.iterate(x, 1).unwrap() - x).norm())
            .collect();
        assert!(residuals.iter().all(|r| *r < 100.0 * config.tolerance), "{:?}", residuals);
        assert!(residuals.iter().any(|r| *r >= config.tolerance));

        // Polishing collapses every seed onto the fixed point itself.
        let polished = periodic_point_density(&map, &domain, &DensityConfig { polish: true, ..config }).unwrap();
        assert_eq!(polished.total_points, 1);
        let x = &polished.per_period[0].points[0];
        assert!((map.iterate(x, 1).unwrap() - x).norm() < 1e-3);
    }

    #[test]
    fn test_oversized_grid_is_rejected() {
        let identity = SystemDefinition::map(|x: &State| x.clone());
        let domain = Domain::new(vec![0.0; 12], vec![1.0; 12]).unwrap();
        let config = DensityConfig {
            periods: vec![1],
            ..DensityConfig::default()
        };
        let result = periodic_point_density(&identity, &domain, &config);
        assert!(matches!(result, Err(ChaosError::InvalidParameter(_))));
    }

    #[test]
    fn test_rotation_section_returns() {
        // Rigid rotation in the (y, z) plane: every section point returns after 2π.
        let rotation = SystemDefinition::flow(|_t, s: &State| DVector::from_vec(vec![0.0, -s[2], s[1]]));
        let domain = Domain::new(vec![-1.0, -1.0, -1.0], vec![1.0, 1.0, 1.0]).unwrap();
        let config = DensityConfig {
            periods: vec![1, 2],
            grid_resolution: 5,
            tolerance: 1e-4,
            section_time: 10.0,
            ..DensityConfig::default()
        };
        let report = periodic_point_density(&rotation, &domain, &config).unwrap();

        // Seeds with y = 0 sit on the rotation axis and never cross.
        assert_eq!(count(&report, 1), 20);
        assert_eq!(count(&report, 2), 0);
        assert!(report.failures.is_empty());
        assert!((report.global_density - 2.5).abs() < 1e-12);
    }

    #[test]
    fn test_flow_section_requires_three_dimensions() {
        let planar = SystemDefinition::flow(|_t, s: &State| DVector::from_vec(vec![-s[1], s[0]]));
        let domain = Domain::new(vec![-1.0, -1.0], vec![1.0, 1.0]).unwrap();
        let result = periodic_point_density(&planar, &domain, &DensityConfig::default());
        assert!(matches!(
            result,
            Err(ChaosError::DimensionMismatch { expected: 3, found: 2 })
        ));
    }
}
