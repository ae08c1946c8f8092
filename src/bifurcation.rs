use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dynamical_systems::{linspace, State, SystemDefinition};
use crate::error::{ChaosError, ChaosResult};
use crate::integrator::rk4_step;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BifurcationConfig {
    /// Inclusive sweep range of the parameter.
    pub range: (f64, f64),
    pub samples: usize,
    /// RK4 step for flows, ignored by maps.
    pub dt: f64,
    /// Steps discarded before capturing.
    pub transient: usize,
    /// Steps captured per parameter value.
    pub capture: usize,
    /// State coordinate recorded.
    pub coordinate: usize,
    pub divergence_limit: f64,
}

impl Default for BifurcationConfig {
    fn default() -> Self {
        Self {
            range: (2.5, 4.0),
            samples: 200,
            dt: 0.01,
            transient: 500,
            capture: 100,
            coordinate: 0,
            divergence_limit: 1e8,
        }
    }
}

impl BifurcationConfig {
    pub fn validate(&self) -> ChaosResult<()> {
        let (a, b) = self.range;
        if !(a.is_finite() && b.is_finite()) || a > b {
            return Err(ChaosError::invalid("sweep range must be finite with lower <= upper"));
        }
        if self.samples < 2 {
            return Err(ChaosError::invalid("a sweep needs at least two samples"));
        }
        if !(self.dt.is_finite() && self.dt > 0.0) {
            return Err(ChaosError::invalid("dt must be positive"));
        }
        if !(self.divergence_limit > 0.0) {
            return Err(ChaosError::invalid("divergence_limit must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BifurcationData {
    pub param_values: Vec<f64>,
    /// `captured_values[i]` belongs to `param_values[i]`. Shorter than
    /// `capture` when the orbit escaped.
    pub captured_values: Vec<Vec<f64>>,
}

fn advance(system: &SystemDefinition, t: f64, x: &State, dt: f64, limit: f64) -> Option<State> {
    let next = if system.is_flow() {
        rk4_step(system, t, x, dt)
    } else {
        system.evaluate(t, x)
    };
    next.ok().filter(|s| s.amax() <= limit)
}

/// Sweep one parameter of a system family and record the asymptotic values
/// of one coordinate.
///
/// Every sample starts from `x0`. An orbit that escapes during the transient
/// restarts the capture from `x0`; one that escapes while capturing stops
/// early.
pub fn bifurcation_data<F>(family: F, x0: &State, config: &BifurcationConfig) -> ChaosResult<BifurcationData>
where
    F: Fn(f64) -> SystemDefinition,
{
    config.validate()?;
    if config.coordinate >= x0.len() {
        return Err(ChaosError::invalid(format!(
            "coordinate {} out of range for a state of dimension {}",
            config.coordinate,
            x0.len()
        )));
    }

    let param_values = linspace(config.range.0, config.range.1, config.samples);
    let mut captured_values = Vec::with_capacity(param_values.len());

    for &p in &param_values {
        let system = family(p);
        let step = if system.is_flow() { config.dt } else { 1.0 };
        let mut state = x0.clone();
        let mut t = 0.0;

        for _ in 0..config.transient {
            match advance(&system, t, &state, config.dt, config.divergence_limit) {
                Some(next) => state = next,
                None => {
                    debug!(param = p, "orbit escaped during transient, restarting capture");
                    state = x0.clone();
                    t = 0.0;
                    break;
                }
            }
            t += step;
        }

        let mut captured = Vec::with_capacity(config.capture);
        for _ in 0..config.capture {
            match advance(&system, t, &state, config.dt, config.divergence_limit) {
                Some(next) => state = next,
                None => break,
            }
            t += step;
            captured.push(state[config.coordinate]);
        }
        captured_values.push(captured);
    }

    Ok(BifurcationData {
        param_values,
        captured_values,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DVector;

    fn logistic(r: f64) -> SystemDefinition {
        SystemDefinition::map(move |x: &State| DVector::from_vec(vec![r * x[0] * (1.0 - x[0])]))
    }

    #[test]
    fn test_logistic_period_doubling() {
        let config = BifurcationConfig {
            range: (2.8, 3.2),
            samples: 2,
            transient: 1000,
            capture: 20,
            ..BifurcationConfig::default()
        };
        let data = bifurcation_data(logistic, &DVector::from_vec(vec![0.3]), &config).unwrap();

        assert_eq!(data.param_values.len(), 2);
        assert!((data.param_values[1] - 3.2).abs() < 1e-12);
        let fixed = 1.0 - 1.0 / 2.8;
        assert!(data.captured_values[0].iter().all(|v| (v - fixed).abs() < 1e-6));

        // Period two: alternating values, neither equal to the fixed point.
        let cycle = &data.captured_values[1];
        assert_eq!(cycle.len(), 20);
        assert!((cycle[0] - cycle[2]).abs() < 1e-6);
        assert!((cycle[0] - cycle[1]).abs() > 0.1);
    }

    #[test]
    fn test_flow_sweep_tracks_equilibrium() {
        // x' = p - x relaxes to x = p.
        let family = |p: f64| SystemDefinition::flow(move |_t, x: &State| x.map(|v| p - v));
        let config = BifurcationConfig {
            range: (1.0, 2.0),
            samples: 3,
            dt: 0.05,
            transient: 400,
            capture: 5,
            ..BifurcationConfig::default()
        };
        let data = bifurcation_data(family, &DVector::from_vec(vec![0.0]), &config).unwrap();
        for (p, values) in data.param_values.iter().zip(&data.captured_values) {
            assert_eq!(values.len(), 5);
            assert!(values.iter().all(|v| (v - p).abs() < 1e-6), "{} {:?}", p, values);
        }
    }

    #[test]
    fn test_escaping_orbit_is_truncated() {
        let family = |p: f64| SystemDefinition::map(move |x: &State| x * p);
        let config = BifurcationConfig {
            range: (10.0, 10.0),
            samples: 2,
            transient: 100,
            capture: 50,
            ..BifurcationConfig::default()
        };
        let data = bifurcation_data(family, &DVector::from_vec(vec![1.0]), &config).unwrap();
        // Restarted from 1: 10, 100, ..., 1e8 before escaping.
        assert_eq!(data.captured_values[0].len(), 8);
    }

    #[test]
    fn test_invalid_sweeps() {
        let x0 = DVector::from_vec(vec![0.3]);
        let bad_range = BifurcationConfig {
            range: (4.0, 3.0),
            ..BifurcationConfig::default()
        };
        assert!(bifurcation_data(logistic, &x0, &bad_range).is_err());

        let bad_coordinate = BifurcationConfig {
            coordinate: 1,
            ..BifurcationConfig::default()
        };
        assert!(bifurcation_data(logistic, &x0, &bad_coordinate).is_err());
    }
}
