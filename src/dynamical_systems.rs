use std::fmt;
use std::sync::Arc;

use nalgebra::DVector;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::error::{ChaosError, ChaosResult};
use crate::integrator::{integrate, IntegratorConfig};

/// A point in phase space. The dimension is the vector length.
pub type State = DVector<f64>;

/// Discrete-time step `x -> f(x)`.
pub type MapFn = dyn Fn(&State) -> Result<State, String> + Send + Sync;

/// Continuous-time vector field `(t, x) -> dx/dt`.
pub type FieldFn = dyn Fn(f64, &State) -> Result<State, String> + Send + Sync;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SystemKind {
    Map,
    Flow,
}

/// A dynamical system supplied by the caller.
///
/// The variant is an explicit tag: nothing in the crate probes a function to
/// guess whether it is a map or a vector field.
#[derive(Clone)]
pub enum SystemDefinition {
    Map(Arc<MapFn>),
    Flow(Arc<FieldFn>),
}

impl fmt::Debug for SystemDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SystemDefinition::Map(_) => f.write_str("SystemDefinition::Map(..)"),
            SystemDefinition::Flow(_) => f.write_str("SystemDefinition::Flow(..)"),
        }
    }
}

impl SystemDefinition {
    pub fn map<F>(f: F) -> Self
    where
        F: Fn(&State) -> State + Send + Sync + 'static,
    {
        SystemDefinition::Map(Arc::new(move |x: &State| Ok(f(x))))
    }

    pub fn try_map<F>(f: F) -> Self
    where
        F: Fn(&State) -> Result<State, String> + Send + Sync + 'static,
    {
        SystemDefinition::Map(Arc::new(f))
    }

    pub fn flow<F>(f: F) -> Self
    where
        F: Fn(f64, &State) -> State + Send + Sync + 'static,
    {
        SystemDefinition::Flow(Arc::new(move |t: f64, x: &State| Ok(f(t, x))))
    }

    pub fn try_flow<F>(f: F) -> Self
    where
        F: Fn(f64, &State) -> Result<State, String> + Send + Sync + 'static,
    {
        SystemDefinition::Flow(Arc::new(f))
    }

    pub fn kind(&self) -> SystemKind {
        match self {
            SystemDefinition::Map(_) => SystemKind::Map,
            SystemDefinition::Flow(_) => SystemKind::Flow,
        }
    }

    pub fn is_map(&self) -> bool {
        self.kind() == SystemKind::Map
    }

    pub fn is_flow(&self) -> bool {
        self.kind() == SystemKind::Flow
    }

    /// Evaluate the map image (maps) or the vector field (flows) at `x`.
    ///
    /// `t` is the time passed to a vector field; for maps it is only used to
    /// label errors with the iteration at which they happened. The output must
    /// keep the dimension of `x` and be finite.
    pub fn evaluate(&self, t: f64, x: &State) -> ChaosResult<State> {
        let out = match self {
            SystemDefinition::Map(f) => f(x),
            SystemDefinition::Flow(f) => f(t, x),
        }
        .map_err(|reason| ChaosError::integration(t, reason))?;

        if out.len() != x.len() {
            return Err(ChaosError::integration(
                t,
                format!("system changed dimension from {} to {}", x.len(), out.len()),
            ));
        }
        if out.iter().any(|v| !v.is_finite()) {
            return Err(ChaosError::integration(t, "system produced non-finite values"));
        }
        Ok(out)
    }

    /// n-fold iterate `f^n(x)` of a map.
    pub fn iterate(&self, x: &State, n: usize) -> ChaosResult<State> {
        self.require(SystemKind::Map)?;
        let mut current = x.clone();
        for i in 0..n {
            current = self.evaluate(i as f64, &current)?;
        }
        Ok(current)
    }

    /// Time-`dt` flow map of a flow, as a map.
    ///
    /// Lets the map-only criteria (transitivity, density on a grid) run on
    /// stroboscopic samples of a continuous system.
    ///
    /// Every application integrates from `t = 0`, so iterating the result is
    /// the stroboscopic map only when the flow is autonomous or its forcing
    /// is `dt`-periodic.
    pub fn time_map(&self, dt: f64, config: IntegratorConfig) -> ChaosResult<SystemDefinition> {
        self.require(SystemKind::Flow)?;
        if !(dt.is_finite() && dt > 0.0) {
            return Err(ChaosError::invalid("time map step must be positive"));
        }
        config.validate()?;

        let flow = self.clone();
        Ok(SystemDefinition::try_map(move |x: &State| {
            integrate(&flow, 0.0, x, dt, &config)
                .map(|solution| solution.final_state().clone())
                .map_err(|e| e.to_string())
        }))
    }

    pub(crate) fn require(&self, kind: SystemKind) -> ChaosResult<()> {
        if self.kind() == kind {
            Ok(())
        } else {
            Err(ChaosError::invalid(format!(
                "operation requires a {:?} system, got a {:?}",
                kind,
                self.kind()
            )))
        }
    }
}

pub(crate) fn ensure_dimension(expected: usize, found: usize) -> ChaosResult<()> {
    if expected == found {
        Ok(())
    } else {
        Err(ChaosError::DimensionMismatch { expected, found })
    }
}

/// Axis-aligned box `[lower, upper]`.
///
/// Deserializing goes through [`Domain::new`], so a decoded domain is always
/// valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "DomainRepr")]
pub struct Domain {
    lower: Vec<f64>,
    upper: Vec<f64>,
}

#[derive(Deserialize)]
struct DomainRepr {
    lower: Vec<f64>,
    upper: Vec<f64>,
}

impl TryFrom<DomainRepr> for Domain {
    type Error = ChaosError;

    fn try_from(repr: DomainRepr) -> ChaosResult<Self> {
        Domain::new(repr.lower, repr.upper)
    }
}

impl Domain {
    pub fn new(lower: Vec<f64>, upper: Vec<f64>) -> ChaosResult<Self> {
        let domain = Self { lower, upper };
        domain.validate()?;
        Ok(domain)
    }

    pub fn interval(a: f64, b: f64) -> ChaosResult<Self> {
        Self::new(vec![a], vec![b])
    }

    pub fn validate(&self) -> ChaosResult<()> {
        ensure_dimension(self.lower.len(), self.upper.len())?;
        if self.lower.is_empty() {
            return Err(ChaosError::InvalidDomain("domain has no dimensions".into()));
        }
        for (i, (lo, hi)) in self.lower.iter().zip(&self.upper).enumerate() {
            if !lo.is_finite() || !hi.is_finite() {
                return Err(ChaosError::InvalidDomain(format!(
                    "bounds of axis {} are not finite",
                    i
                )));
            }
            if lo >= hi {
                return Err(ChaosError::InvalidDomain(format!(
                    "lower bound {} is not below upper bound {} on axis {}",
                    lo, hi, i
                )));
            }
        }
        Ok(())
    }

    pub fn dim(&self) -> usize {
        self.lower.len()
    }

    pub fn lower(&self) -> &[f64] {
        &self.lower
    }

    pub fn upper(&self) -> &[f64] {
        &self.upper
    }

    pub fn volume(&self) -> f64 {
        self.lower
            .iter()
            .zip(&self.upper)
            .map(|(lo, hi)| hi - lo)
            .product()
    }

    pub fn center(&self) -> State {
        DVector::from_iterator(
            self.dim(),
            self.lower.iter().zip(&self.upper).map(|(lo, hi)| 0.5 * (lo + hi)),
        )
    }

    pub fn contains(&self, x: &State) -> bool {
        x.len() == self.dim()
            && x
                .iter()
                .zip(self.lower.iter().zip(&self.upper))
                .all(|(v, (lo, hi))| *v >= *lo && *v <= *hi)
    }

    /// `n` points drawn uniformly from the box.
    pub fn sample_uniform<R: Rng>(&self, rng: &mut R, n: usize) -> Vec<State> {
        (0..n)
            .map(|_| {
                DVector::from_iterator(
                    self.dim(),
                    self.lower
                        .iter()
                        .zip(&self.upper)
                        .map(|(lo, hi)| rng.gen_range(*lo..*hi)),
                )
            })
            .collect()
    }

    /// Tensor grid with `resolution` evenly spaced values per axis, endpoints
    /// included. First axis varies fastest.
    ///
    /// Fails with `InvalidParameter` when `resolution^dim` does not fit in a
    /// `usize`.
    pub fn grid(&self, resolution: usize) -> ChaosResult<Vec<State>> {
        let total = u32::try_from(self.dim())
            .ok()
            .and_then(|dim| resolution.checked_pow(dim))
            .ok_or_else(|| {
                ChaosError::invalid(format!(
                    "a grid of {} points per axis in {} dimensions is too large",
                    resolution,
                    self.dim()
                ))
            })?;

        let axes: Vec<Vec<f64>> = self
            .lower
            .iter()
            .zip(&self.upper)
            .map(|(lo, hi)| linspace(*lo, *hi, resolution))
            .collect();

        let mut points = Vec::with_capacity(total);
        for flat in 0..total {
            let mut rem = flat;
            let point = DVector::from_iterator(
                self.dim(),
                axes.iter().map(|axis| {
                    let value = axis[rem % resolution];
                    rem /= resolution;
                    value
                }),
            );
            points.push(point);
        }
        Ok(points)
    }
}

/// `n` evenly spaced values from `a` to `b` inclusive.
pub fn linspace(a: f64, b: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![a],
        _ => {
            let step = (b - a) / (n - 1) as f64;
            (0..n).map(|i| a + step * i as f64).collect()
        }
    }
}

/// Per-call generator. Every randomized operation builds its own from the
/// seed in its config.
pub fn seeded_rng(seed: u64) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(seed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_evaluate_checks_dimension() {
        let system = SystemDefinition::map(|x: &State| DVector::from_vec(vec![x[0], x[0]]));
        let err = system.evaluate(0.0, &DVector::from_vec(vec![1.0])).unwrap_err();
        assert!(matches!(err, ChaosError::Integration { .. }));
    }

    #[test]
    fn test_map_evaluate_rejects_non_finite() {
        let system = SystemDefinition::map(|x: &State| x.map(|v| 1.0 / v));
        let err = system.evaluate(3.0, &DVector::from_vec(vec![0.0])).unwrap_err();
        match err {
            ChaosError::Integration { time, .. } => assert_eq!(time, 3.0),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_try_map_surfaces_user_error() {
        let system = SystemDefinition::try_map(|_x: &State| Err("outside definition".to_string()));
        let err = system.evaluate(0.0, &DVector::from_vec(vec![0.5])).unwrap_err();
        assert!(err.to_string().contains("outside definition"));
    }

    #[test]
    fn test_iterate_requires_map() {
        let flow = SystemDefinition::flow(|_t, x: &State| -x);
        assert!(flow.iterate(&DVector::from_vec(vec![1.0]), 2).is_err());

        let doubling = SystemDefinition::map(|x: &State| x * 2.0);
        let out = doubling.iterate(&DVector::from_vec(vec![1.0]), 3).unwrap();
        assert_eq!(out[0], 8.0);
    }

    #[test]
    fn test_domain_validation() {
        assert!(Domain::new(vec![0.0, 0.0], vec![1.0]).is_err());
        assert!(matches!(
            Domain::new(vec![1.0], vec![0.0]),
            Err(ChaosError::InvalidDomain(_))
        ));
        assert!(matches!(
            Domain::new(vec![0.0], vec![1.0, 2.0]),
            Err(ChaosError::DimensionMismatch { expected: 1, found: 2 })
        ));

        let domain = Domain::new(vec![-1.0, 0.0], vec![1.0, 3.0]).unwrap();
        assert_eq!(domain.volume(), 6.0);
        assert_eq!(domain.center(), DVector::from_vec(vec![0.0, 1.5]));
    }

    #[test]
    fn test_domain_grid_covers_corners() {
        let domain = Domain::new(vec![0.0, 0.0], vec![1.0, 2.0]).unwrap();
        let grid = domain.grid(3).unwrap();
        assert_eq!(grid.len(), 9);
        assert_eq!(grid[0], DVector::from_vec(vec![0.0, 0.0]));
        assert_eq!(grid[8], DVector::from_vec(vec![1.0, 2.0]));
        assert!(grid.iter().all(|p| domain.contains(p)));
    }

    #[test]
    fn test_grid_size_overflow_is_an_error() {
        let domain = Domain::new(vec![0.0; 12], vec![1.0; 12]).unwrap();
        assert!(matches!(domain.grid(50), Err(ChaosError::InvalidParameter(_))));
        assert_eq!(domain.grid(2).unwrap().len(), 4096);
    }

    #[test]
    fn test_domain_deserialization_validates() {
        let domain = Domain::new(vec![-1.0, 0.0], vec![1.0, 2.0]).unwrap();
        let json = serde_json::to_string(&domain).unwrap();
        let back: Domain = serde_json::from_str(&json).unwrap();
        assert_eq!(back, domain);

        assert!(serde_json::from_str::<Domain>(r#"{"lower":[1.0],"upper":[0.0]}"#).is_err());
        assert!(serde_json::from_str::<Domain>(r#"{"lower":[0.0,0.0],"upper":[1.0]}"#).is_err());
        assert!(serde_json::from_str::<Domain>(r#"{"lower":[],"upper":[]}"#).is_err());
    }

    #[test]
    fn test_seeded_sampling_is_reproducible() {
        let domain = Domain::new(vec![-2.0, -1.0], vec![2.0, 1.0]).unwrap();
        let a = domain.sample_uniform(&mut seeded_rng(7), 20);
        let b = domain.sample_uniform(&mut seeded_rng(7), 20);
        assert_eq!(a, b);
        assert!(a.iter().all(|p| domain.contains(p)));
    }

    #[test]
    fn test_time_map_of_linear_decay() {
        let decay = SystemDefinition::flow(|_t, x: &State| -x);
        let map = decay.time_map(1.0, IntegratorConfig::default()).unwrap();
        assert!(map.is_map());
        let out = map.evaluate(0.0, &DVector::from_vec(vec![1.0])).unwrap();
        assert!((out[0] - (-1.0f64).exp()).abs() < 1e-7, "got {}", out[0]);
    }

    #[test]
    fn test_linspace_endpoints() {
        let values = linspace(0.0, 1.0, 5);
        assert_eq!(values, vec![0.0, 0.25, 0.5, 0.75, 1.0]);
        assert_eq!(linspace(2.0, 3.0, 1), vec![2.0]);
    }
}
