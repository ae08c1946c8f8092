use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dynamical_systems::{State, SystemDefinition, SystemKind};
use crate::error::{ChaosError, ChaosResult};
use crate::integrator::{integrate, IntegratorConfig};
use crate::variational::finite_difference;

/// Newton-Poincaré refinement settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RefinerConfig {
    pub tolerance: f64,
    pub max_iter: usize,
    /// Used for every `Φ_T` evaluation, including the monodromy columns.
    pub integrator: IntegratorConfig,
    /// Condition number of `J - I` above which the step switches to damped
    /// least squares.
    pub condition_limit: f64,
    pub relaxation: f64,
}

impl Default for RefinerConfig {
    fn default() -> Self {
        Self {
            tolerance: 1e-10,
            max_iter: 100,
            integrator: IntegratorConfig::tight(),
            condition_limit: 1e12,
            relaxation: 0.5,
        }
    }
}

impl RefinerConfig {
    pub fn validate(&self) -> ChaosResult<()> {
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(ChaosError::invalid("tolerance must be positive"));
        }
        if self.max_iter == 0 {
            return Err(ChaosError::invalid("max_iter must be at least 1"));
        }
        if !(self.condition_limit > 1.0) {
            return Err(ChaosError::invalid("condition_limit must exceed 1"));
        }
        if !(self.relaxation > 0.0 && self.relaxation <= 1.0) {
            return Err(ChaosError::invalid("relaxation must be in (0, 1]"));
        }
        self.integrator.validate()
    }
}

/// Outcome of a Newton refinement. Not converging is a result, not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinedOrbit {
    /// Last point at which the return error was evaluated.
    pub point: State,
    pub period: f64,
    pub converged: bool,
    pub final_error: f64,
    pub iteration_count: usize,
    pub error_history: Vec<f64>,
    /// Newton steps taken by damped least squares because `J - I` was
    /// singular or ill-conditioned.
    pub fallback_steps: usize,
}

/// Return map after one period: `Φ_T` for flows, `f^n` for maps.
fn period_map<'a>(
    system: &'a SystemDefinition,
    period: f64,
    integrator: &'a IntegratorConfig,
) -> ChaosResult<impl Fn(&State) -> ChaosResult<State> + 'a> {
    let steps = match system.kind() {
        SystemKind::Map => {
            if !(period >= 1.0 && period.fract() == 0.0) {
                return Err(ChaosError::invalid(format!(
                    "map period must be a positive integer, got {}",
                    period
                )));
            }
            period as usize
        }
        SystemKind::Flow => {
            if !(period.is_finite() && period > 0.0) {
                return Err(ChaosError::invalid("period must be positive"));
            }
            0
        }
    };

    Ok(move |x: &State| match system.kind() {
        SystemKind::Map => system.iterate(x, steps),
        SystemKind::Flow => {
            integrate(system, 0.0, x, period, integrator).map(|s| s.final_state().clone())
        }
    })
}

/// Newton step for `(J - I) δ = rhs`.
///
/// Returns the step and whether the damped least-squares fallback was used.
fn newton_step(
    jac: DMatrix<f64>,
    rhs: &DVector<f64>,
    config: &RefinerConfig,
) -> ChaosResult<(DVector<f64>, bool)> {
    let n = jac.nrows();
    let a = jac - DMatrix::identity(n, n);

    let svd = a.clone().svd(true, true);
    let sigma_max = svd.singular_values.max();
    let sigma_min = svd.singular_values.min();
    let ill_conditioned = sigma_min == 0.0 || sigma_max / sigma_min > config.condition_limit;

    if !ill_conditioned {
        if let Some(delta) = a.lu().solve(rhs) {
            return Ok((delta, false));
        }
    }

    let delta = svd
        .solve(rhs, sigma_max * f64::EPSILON * n as f64)
        .map_err(|e| ChaosError::invalid(format!("least-squares step failed: {}", e)))?;
    Ok((delta * config.relaxation, true))
}

/// Newton iteration on `F(x) = P(x) - x` with the period held fixed.
fn newton_on_return_map<P>(
    advance: P,
    x0: &State,
    period: f64,
    config: &RefinerConfig,
) -> ChaosResult<RefinedOrbit>
where
    P: Fn(&State) -> ChaosResult<State>,
{
    let mut x = x0.clone();
    let mut error_history = Vec::new();
    let mut fallback_steps = 0;
    let mut last_evaluated: Option<(State, f64)> = None;

    for iteration in 0..config.max_iter {
        let x_t = advance(&x)?;
        let residual = &x_t - &x;
        let error = residual.norm();
        error_history.push(error);
        last_evaluated = Some((x.clone(), error));

        if error < config.tolerance {
            return Ok(RefinedOrbit {
                point: x,
                period,
                converged: true,
                final_error: error,
                iteration_count: iteration + 1,
                error_history,
                fallback_steps,
            });
        }

        let monodromy = finite_difference(&advance, &x, &x_t)?;
        let (delta, fallback) = newton_step(monodromy, &(-residual), config)?;
        if fallback {
            fallback_steps += 1;
            debug!(iteration, error, "singular Newton matrix, using damped least squares");
        }
        x += delta;
    }

    let (last_point, last_error) = last_evaluated.unwrap_or((x, f64::INFINITY));
    debug!(
        max_iter = config.max_iter,
        final_error = last_error,
        "Newton refinement did not converge"
    );
    Ok(RefinedOrbit {
        point: last_point,
        period,
        converged: false,
        final_error: last_error,
        iteration_count: config.max_iter,
        error_history,
        fallback_steps,
    })
}

/// Refine a periodic orbit guess by Newton-Poincaré iteration.
///
/// Solves `Φ_T(x) = x` for flows and `f^n(x) = x` for maps (`period_guess`
/// must then be a positive integer). The period is never adjusted: the result
/// returns after the given period, which need not be the minimal one.
pub fn refine_orbit(
    system: &SystemDefinition,
    x0_guess: &State,
    period_guess: f64,
    config: &RefinerConfig,
) -> ChaosResult<RefinedOrbit> {
    config.validate()?;
    if x0_guess.iter().any(|v| !v.is_finite()) {
        return Err(ChaosError::integration(0.0, "initial guess is not finite"));
    }
    let advance = period_map(system, period_guess, &config.integrator)?;
    newton_on_return_map(advance, x0_guess, period_guess, config)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StabilityType {
    Stable,
    Unstable,
    Saddle,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Multiplier {
    pub re: f64,
    pub im: f64,
    pub modulus: f64,
}

/// Floquet multipliers (eigenvalues of the monodromy matrix) of a periodic orbit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrbitStability {
    pub multipliers: Vec<Multiplier>,
    pub stability: StabilityType,
}

/// Multipliers within this distance of 1 are treated as the trivial flow direction.
const TRIVIAL_MULTIPLIER_TOLERANCE: f64 = 1e-3;

fn classify_stability(moduli: &[f64]) -> StabilityType {
    if moduli.iter().all(|&m| m < 1.0) {
        StabilityType::Stable
    } else if moduli.iter().all(|&m| m > 1.0) {
        StabilityType::Unstable
    } else {
        StabilityType::Saddle
    }
}

/// Floquet stability of the periodic orbit through `point`.
///
/// For autonomous flows the multiplier closest to 1 (the direction along the
/// orbit) is dropped before classification when it lies within 1e-3 of 1.
pub fn orbit_stability(
    system: &SystemDefinition,
    point: &State,
    period: f64,
    integrator: &IntegratorConfig,
) -> ChaosResult<OrbitStability> {
    integrator.validate()?;
    let advance = period_map(system, period, integrator)?;
    let image = advance(point)?;
    let monodromy = finite_difference(&advance, point, &image)?;

    let eigenvalues = monodromy.complex_eigenvalues();
    let multipliers: Vec<Multiplier> = eigenvalues
        .iter()
        .map(|z| Multiplier {
            re: z.re,
            im: z.im,
            modulus: z.norm(),
        })
        .collect();

    let mut moduli: Vec<f64> = multipliers.iter().map(|m| m.modulus).collect();
    if system.is_flow() {
        let trivial = multipliers
            .iter()
            .enumerate()
            .map(|(i, m)| (i, ((m.re - 1.0).powi(2) + m.im.powi(2)).sqrt()))
            .min_by(|a, b| a.1.total_cmp(&b.1));
        if let Some((i, distance)) = trivial {
            if distance < TRIVIAL_MULTIPLIER_TOLERANCE && moduli.len() > 1 {
                moduli.remove(i);
            }
        }
    }

    Ok(OrbitStability {
        multipliers,
        stability: classify_stability(&moduli),
    })
}
