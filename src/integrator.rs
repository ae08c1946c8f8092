use std::ops::ControlFlow;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dynamical_systems::{State, SystemDefinition, SystemKind};
use crate::error::{ChaosError, ChaosResult};

/// Tolerances and budgets of the adaptive Dormand-Prince 5(4) solver.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntegratorConfig {
    pub rtol: f64,
    pub atol: f64,
    /// Accepted-step budget. Exhausting it is reported as non-convergence.
    pub max_steps: usize,
    pub initial_step: Option<f64>,
    pub max_step: Option<f64>,
}

impl Default for IntegratorConfig {
    fn default() -> Self {
        Self {
            rtol: 1e-8,
            atol: 1e-10,
            max_steps: 1_000_000,
            initial_step: None,
            max_step: None,
        }
    }
}

impl IntegratorConfig {
    pub fn new(rtol: f64, atol: f64) -> ChaosResult<Self> {
        let config = Self {
            rtol,
            atol,
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Tolerances used by the Newton-Poincaré refiner.
    pub fn tight() -> Self {
        Self {
            rtol: 1e-10,
            atol: 1e-12,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> ChaosResult<()> {
        if !(self.rtol.is_finite() && self.rtol > 0.0) {
            return Err(ChaosError::invalid("rtol must be positive"));
        }
        if !(self.atol.is_finite() && self.atol > 0.0) {
            return Err(ChaosError::invalid("atol must be positive"));
        }
        if self.max_steps == 0 {
            return Err(ChaosError::invalid("max_steps must be at least 1"));
        }
        for (name, value) in [("initial_step", self.initial_step), ("max_step", self.max_step)] {
            if let Some(h) = value {
                if !(h.is_finite() && h > 0.0) {
                    return Err(ChaosError::invalid(format!("{} must be positive", name)));
                }
            }
        }
        Ok(())
    }
}

// Dormand-Prince 5(4) tableau.
const C2: f64 = 1.0 / 5.0;
const C3: f64 = 3.0 / 10.0;
const C4: f64 = 4.0 / 5.0;
const C5: f64 = 8.0 / 9.0;

const A21: f64 = 1.0 / 5.0;
const A31: f64 = 3.0 / 40.0;
const A32: f64 = 9.0 / 40.0;
const A41: f64 = 44.0 / 45.0;
const A42: f64 = -56.0 / 15.0;
const A43: f64 = 32.0 / 9.0;
const A51: f64 = 19372.0 / 6561.0;
const A52: f64 = -25360.0 / 2187.0;
const A53: f64 = 64448.0 / 6561.0;
const A54: f64 = -212.0 / 729.0;
const A61: f64 = 9017.0 / 3168.0;
const A62: f64 = -355.0 / 33.0;
const A63: f64 = 46732.0 / 5247.0;
const A64: f64 = 49.0 / 176.0;
const A65: f64 = -5103.0 / 18656.0;

const B1: f64 = 35.0 / 384.0;
const B3: f64 = 500.0 / 1113.0;
const B4: f64 = 125.0 / 192.0;
const B5: f64 = -2187.0 / 6784.0;
const B6: f64 = 11.0 / 84.0;

// Difference between the 5th and embedded 4th order weights.
const E1: f64 = 71.0 / 57600.0;
const E3: f64 = -71.0 / 16695.0;
const E4: f64 = 71.0 / 1920.0;
const E5: f64 = -17253.0 / 339200.0;
const E6: f64 = 22.0 / 525.0;
const E7: f64 = -1.0 / 40.0;

const SAFETY: f64 = 0.9;
const MIN_FACTOR: f64 = 0.2;
const MAX_FACTOR: f64 = 10.0;

/// Accepted solver steps with derivatives, interpolated by cubic Hermite
/// polynomials between steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseSolution {
    times: Vec<f64>,
    states: Vec<State>,
    derivatives: Vec<State>,
}

impl DenseSolution {
    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn states(&self) -> &[State] {
        &self.states
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn final_time(&self) -> f64 {
        self.times[self.times.len() - 1]
    }

    pub fn final_state(&self) -> &State {
        &self.states[self.states.len() - 1]
    }

    /// State at time `t`, clamped to the integrated span.
    pub fn evaluate(&self, t: f64) -> State {
        let last = self.times.len() - 1;
        if t <= self.times[0] || last == 0 {
            return self.states[0].clone();
        }
        if t >= self.times[last] {
            return self.states[last].clone();
        }
        let i = self.times.partition_point(|&s| s <= t) - 1;
        hermite(
            self.times[i],
            &self.states[i],
            &self.derivatives[i],
            self.times[i + 1],
            &self.states[i + 1],
            &self.derivatives[i + 1],
            t,
        )
    }

    /// `n_points` samples at evenly spaced times over the integrated span.
    pub fn resample(&self, n_points: usize) -> (Vec<f64>, Vec<State>) {
        let times = crate::dynamical_systems::linspace(self.times[0], self.final_time(), n_points);
        let states = times.iter().map(|&t| self.evaluate(t)).collect();
        (times, states)
    }
}

/// One accepted step, handed to integration observers.
#[derive(Debug, Clone, Copy)]
pub struct StepView<'a> {
    pub t0: f64,
    pub y0: &'a State,
    pub f0: &'a State,
    pub t1: f64,
    pub y1: &'a State,
    pub f1: &'a State,
}

impl StepView<'_> {
    pub fn interpolate(&self, t: f64) -> State {
        hermite(self.t0, self.y0, self.f0, self.t1, self.y1, self.f1, t)
    }
}

/// Cubic Hermite interpolant through two states and their derivatives.
pub fn hermite(t0: f64, y0: &State, f0: &State, t1: f64, y1: &State, f1: &State, t: f64) -> State {
    let h = t1 - t0;
    if h == 0.0 {
        return y0.clone();
    }
    let s = (t - t0) / h;
    let s2 = s * s;
    let s3 = s2 * s;
    let h00 = 2.0 * s3 - 3.0 * s2 + 1.0;
    let h10 = s3 - 2.0 * s2 + s;
    let h01 = -2.0 * s3 + 3.0 * s2;
    let h11 = s3 - s2;
    y0 * h00 + f0 * (h10 * h) + y1 * h01 + f1 * (h11 * h)
}

/// Integrate a flow from `t0` to `t_end`.
pub fn integrate(
    system: &SystemDefinition,
    t0: f64,
    y0: &State,
    t_end: f64,
    config: &IntegratorConfig,
) -> ChaosResult<DenseSolution> {
    integrate_with(system, t0, y0, t_end, config, |_| ControlFlow::Continue(()))
}

/// Integrate a flow, showing every accepted step to `observer`.
///
/// Returning `ControlFlow::Break` from the observer ends the integration after
/// that step; the returned solution then stops short of `t_end`.
pub fn integrate_with<F>(
    system: &SystemDefinition,
    t0: f64,
    y0: &State,
    t_end: f64,
    config: &IntegratorConfig,
    mut observer: F,
) -> ChaosResult<DenseSolution>
where
    F: FnMut(&StepView<'_>) -> ControlFlow<()>,
{
    system.require(SystemKind::Flow)?;
    config.validate()?;
    if !(t0.is_finite() && t_end.is_finite() && t_end >= t0) {
        return Err(ChaosError::invalid(format!(
            "integration span [{}, {}] is not a forward interval",
            t0, t_end
        )));
    }
    if y0.iter().any(|v| !v.is_finite()) {
        return Err(ChaosError::integration(t0, "initial state is not finite"));
    }

    let mut t = t0;
    let mut y = y0.clone();
    let mut f = system.evaluate(t, &y)?;
    let mut solution = DenseSolution {
        times: vec![t],
        states: vec![y.clone()],
        derivatives: vec![f.clone()],
    };

    let span = t_end - t0;
    if span == 0.0 {
        return Ok(solution);
    }

    let max_step = config.max_step.unwrap_or(span).min(span);
    let mut h = match config.initial_step {
        Some(h) => h,
        None => initial_step(system, t, &y, &f, span, config)?,
    }
    .min(max_step);

    let mut accepted = 0usize;
    let mut last_failure: Option<ChaosError> = None;

    while t < t_end {
        if accepted >= config.max_steps {
            return Err(ChaosError::integration(
                t,
                format!("step budget of {} exhausted before t = {}", config.max_steps, t_end),
            ));
        }
        let min_step = 16.0 * f64::EPSILON * t.abs().max(1.0);
        if h < min_step {
            return Err(last_failure
                .unwrap_or_else(|| ChaosError::integration(t, "step size underflow")));
        }

        let last = t + h >= t_end;
        if last {
            h = t_end - t;
        }

        let trial = match dopri_step(system, t, &y, &f, h) {
            Ok(trial) => trial,
            Err(err) => {
                // A stage left the region where the system is defined; retry smaller.
                last_failure = Some(err);
                h *= MIN_FACTOR;
                continue;
            }
        };

        let err_norm = error_norm(&trial.error, &y, &trial.y, config);
        if err_norm <= 1.0 {
            let t_new = if last { t_end } else { t + h };
            let control = observer(&StepView {
                t0: t,
                y0: &y,
                f0: &f,
                t1: t_new,
                y1: &trial.y,
                f1: &trial.f,
            });

            solution.times.push(t_new);
            solution.states.push(trial.y.clone());
            solution.derivatives.push(trial.f.clone());
            t = t_new;
            y = trial.y;
            f = trial.f;
            accepted += 1;
            last_failure = None;

            let factor = if err_norm == 0.0 {
                MAX_FACTOR
            } else {
                (SAFETY * err_norm.powf(-0.2)).clamp(MIN_FACTOR, MAX_FACTOR)
            };
            h = (h * factor).min(max_step);

            if control.is_break() {
                debug!(t, steps = accepted, "integration stopped by observer");
                break;
            }
        } else {
            h *= (SAFETY * err_norm.powf(-0.2)).max(MIN_FACTOR);
        }
    }

    Ok(solution)
}

struct TrialStep {
    y: State,
    f: State,
    error: State,
}

fn dopri_step(
    system: &SystemDefinition,
    t: f64,
    y: &State,
    k1: &State,
    h: f64,
) -> ChaosResult<TrialStep> {
    let k2 = system.evaluate(t + C2 * h, &(y + k1 * (A21 * h)))?;
    let k3 = system.evaluate(t + C3 * h, &(y + (k1 * A31 + &k2 * A32) * h))?;
    let k4 = system.evaluate(t + C4 * h, &(y + (k1 * A41 + &k2 * A42 + &k3 * A43) * h))?;
    let k5 = system.evaluate(
        t + C5 * h,
        &(y + (k1 * A51 + &k2 * A52 + &k3 * A53 + &k4 * A54) * h),
    )?;
    let k6 = system.evaluate(
        t + h,
        &(y + (k1 * A61 + &k2 * A62 + &k3 * A63 + &k4 * A64 + &k5 * A65) * h),
    )?;

    let y_new = y + (k1 * B1 + &k3 * B3 + &k4 * B4 + &k5 * B5 + &k6 * B6) * h;
    let k7 = system.evaluate(t + h, &y_new)?;
    let error = (k1 * E1 + &k3 * E3 + &k4 * E4 + &k5 * E5 + &k6 * E6 + &k7 * E7) * h;

    Ok(TrialStep {
        y: y_new,
        f: k7,
        error,
    })
}

fn error_norm(error: &State, y: &State, y_new: &State, config: &IntegratorConfig) -> f64 {
    let n = error.len().max(1) as f64;
    let sum: f64 = error
        .iter()
        .zip(y.iter().zip(y_new.iter()))
        .map(|(e, (a, b))| {
            let scale = config.atol + config.rtol * a.abs().max(b.abs());
            (e / scale).powi(2)
        })
        .sum();
    (sum / n).sqrt()
}

fn scaled_rms(v: &State, y: &State, config: &IntegratorConfig) -> f64 {
    let n = v.len().max(1) as f64;
    let sum: f64 = v
        .iter()
        .zip(y.iter())
        .map(|(a, b)| (a / (config.atol + config.rtol * b.abs())).powi(2))
        .sum();
    (sum / n).sqrt()
}

// Starting step estimate of Hairer, Norsett & Wanner (II.4).
fn initial_step(
    system: &SystemDefinition,
    t: f64,
    y: &State,
    f: &State,
    span: f64,
    config: &IntegratorConfig,
) -> ChaosResult<f64> {
    let d0 = scaled_rms(y, y, config);
    let d1 = scaled_rms(f, y, config);
    let h0 = if d0 < 1e-5 || d1 < 1e-5 {
        1e-6
    } else {
        0.01 * d0 / d1
    }
    .min(span);

    let y1 = y + f * h0;
    let f1 = system.evaluate(t + h0, &y1)?;
    let d2 = scaled_rms(&(&f1 - f), y, config) / h0;

    let h1 = if d1.max(d2) <= 1e-15 {
        (h0 * 1e-3).max(1e-6)
    } else {
        (0.01 / d1.max(d2)).powf(0.2)
    };

    Ok((100.0 * h0).min(h1))
}

/// Runge-Kutta 4th Order (RK4) step
///
/// Given current state x_n at time t_n, compute next state x_{n+1}:
///
/// k1 = f(x_n, t_n)
/// k2 = f(x_n + dt/2 * k1, t_n + dt/2)
/// k3 = f(x_n + dt/2 * k2, t_n + dt/2)
/// k4 = f(x_n + dt * k3, t_n + dt)
///
/// x_{n+1} = x_n + dt/6 * (k1 + 2k2 + 2k3 + k4)
pub fn rk4_step(system: &SystemDefinition, t: f64, state: &State, dt: f64) -> ChaosResult<State> {
    system.require(SystemKind::Flow)?;
    let k1 = system.evaluate(t, state)?;
    let k2 = system.evaluate(t + 0.5 * dt, &(state + &k1 * (0.5 * dt)))?;
    let k3 = system.evaluate(t + 0.5 * dt, &(state + &k2 * (0.5 * dt)))?;
    let k4 = system.evaluate(t + dt, &(state + &k3 * dt))?;
    Ok(state + (k1 + k2 * 2.0 + k3 * 2.0 + k4) * (dt / 6.0))
}

/// Fixed-step RK4 integrator for consumers that want evenly spaced samples
/// without adaptive control (divergence series, bifurcation sweeps).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rk4Integrator {
    pub dt: f64,
    /// States whose largest component exceeds this are treated as escaped.
    pub divergence_limit: f64,
}

impl Rk4Integrator {
    pub fn new(dt: f64) -> ChaosResult<Self> {
        if !(dt.is_finite() && dt > 0.0) {
            return Err(ChaosError::invalid("time step must be positive"));
        }
        Ok(Self {
            dt,
            divergence_limit: 1e8,
        })
    }

    pub fn step(&self, system: &SystemDefinition, t: f64, state: &State) -> ChaosResult<State> {
        rk4_step(system, t, state, self.dt)
    }

    /// Integrate for `n_steps`, keeping every `sample_every`-th state.
    ///
    /// Stops early, without error, once the state leaves the divergence limit.
    pub fn integrate(
        &self,
        system: &SystemDefinition,
        initial: &State,
        n_steps: usize,
        sample_every: usize,
    ) -> ChaosResult<Vec<State>> {
        let sample_every = sample_every.max(1);
        let mut trajectory = Vec::with_capacity(n_steps / sample_every + 1);
        let mut state = initial.clone();
        trajectory.push(state.clone());

        for i in 1..=n_steps {
            state = self.step(system, (i - 1) as f64 * self.dt, &state)?;

            if i % sample_every == 0 {
                trajectory.push(state.clone());
            }

            if state.amax() > self.divergence_limit {
                debug!(step = i, "trajectory left the divergence limit");
                break;
            }
        }

        Ok(trajectory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DVector;

    fn harmonic() -> SystemDefinition {
        SystemDefinition::flow(|_t, x: &State| DVector::from_vec(vec![x[1], -x[0]]))
    }

    #[test]
    fn test_exponential_decay_accuracy() {
        let decay = SystemDefinition::flow(|_t, x: &State| -x);
        let y0 = DVector::from_vec(vec![1.0, 2.0]);
        let solution = integrate(&decay, 0.0, &y0, 5.0, &IntegratorConfig::default()).unwrap();

        assert_eq!(solution.final_time(), 5.0);
        let expected = (-5.0f64).exp();
        assert!((solution.final_state()[0] - expected).abs() < 1e-8);
        assert!((solution.final_state()[1] - 2.0 * expected).abs() < 1e-8);
    }

    #[test]
    fn test_harmonic_oscillator_full_period() {
        let y0 = DVector::from_vec(vec![1.0, 0.0]);
        let period = 2.0 * std::f64::consts::PI;
        let solution = integrate(&harmonic(), 0.0, &y0, period, &IntegratorConfig::default()).unwrap();
        let closure = (solution.final_state() - &y0).norm();
        assert!(closure < 1e-7, "closure error {}", closure);
    }

    #[test]
    fn test_dense_output_between_steps() {
        let y0 = DVector::from_vec(vec![1.0, 0.0]);
        let solution = integrate(&harmonic(), 0.0, &y0, 3.0, &IntegratorConfig::default()).unwrap();
        for &t in &[0.123, 1.0, 2.345, 2.999] {
            let y = solution.evaluate(t);
            assert!((y[0] - t.cos()).abs() < 1e-6, "x({}) = {}", t, y[0]);
            assert!((y[1] + t.sin()).abs() < 1e-6, "v({}) = {}", t, y[1]);
        }

        let (times, states) = solution.resample(11);
        assert_eq!(times.len(), 11);
        assert_eq!(times[10], 3.0);
        assert!((states[5][0] - 1.5f64.cos()).abs() < 1e-6);
    }

    #[test]
    fn test_blow_up_is_an_integration_error() {
        // x' = x^2 from x0 = 1 blows up at t = 1.
        let blow_up = SystemDefinition::flow(|_t, x: &State| x.component_mul(x));
        let y0 = DVector::from_vec(vec![1.0]);
        let err = integrate(&blow_up, 0.0, &y0, 2.0, &IntegratorConfig::default()).unwrap_err();
        assert!(matches!(err, ChaosError::Integration { .. }), "got {:?}", err);
    }

    #[test]
    fn test_step_budget_exhaustion() {
        let config = IntegratorConfig {
            max_steps: 3,
            ..IntegratorConfig::default()
        };
        let y0 = DVector::from_vec(vec![1.0, 0.0]);
        let err = integrate(&harmonic(), 0.0, &y0, 100.0, &config).unwrap_err();
        assert!(err.to_string().contains("step budget"));
    }

    #[test]
    fn test_observer_can_stop_early() {
        let y0 = DVector::from_vec(vec![1.0, 0.0]);
        let mut seen = 0;
        let solution = integrate_with(&harmonic(), 0.0, &y0, 50.0, &IntegratorConfig::default(), |step| {
            seen += 1;
            if step.t1 > 1.0 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })
        .unwrap();
        assert!(solution.final_time() > 1.0 && solution.final_time() < 50.0);
        assert_eq!(seen + 1, solution.len());
    }

    #[test]
    fn test_map_rejected_by_flow_solver() {
        let map = SystemDefinition::map(|x: &State| x.clone());
        let y0 = DVector::from_vec(vec![1.0]);
        assert!(integrate(&map, 0.0, &y0, 1.0, &IntegratorConfig::default()).is_err());
    }

    #[test]
    fn test_invalid_tolerances() {
        assert!(IntegratorConfig::new(0.0, 1e-10).is_err());
        assert!(IntegratorConfig::new(1e-6, -1.0).is_err());
        assert!(IntegratorConfig::new(1e-6, 1e-9).is_ok());
    }

    #[test]
    fn test_rk4_matches_exact_rotation() {
        let rk4 = Rk4Integrator::new(0.01).unwrap();
        let y0 = DVector::from_vec(vec![1.0, 0.0]);
        let trajectory = rk4.integrate(&harmonic(), &y0, 100, 10).unwrap();
        assert_eq!(trajectory.len(), 11);
        let last = &trajectory[10];
        assert!((last[0] - 1.0f64.cos()).abs() < 1e-9);
        assert!((last[1] + 1.0f64.sin()).abs() < 1e-9);
    }

    #[test]
    fn test_rk4_stops_at_divergence() {
        let growth = SystemDefinition::flow(|_t, x: &State| x * 50.0);
        let rk4 = Rk4Integrator::new(0.1).unwrap();
        let trajectory = rk4.integrate(&growth, &DVector::from_vec(vec![1.0]), 1000, 1).unwrap();
        assert!(trajectory.len() < 1001);
    }
}
