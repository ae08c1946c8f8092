use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::dynamical_systems::{State, SystemDefinition};
use crate::error::{ChaosError, ChaosResult};

/// A named system with canonical parameters and a starting point on or near
/// its attractor.
pub trait ClassicSystem {
    fn system(&self) -> SystemDefinition;
    fn initial_state(&self) -> State;
}

fn vec3(x: f64, y: f64, z: f64) -> State {
    DVector::from_vec(vec![x, y, z])
}

fn check_finite(values: &[f64]) -> ChaosResult<()> {
    if values.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(ChaosError::invalid("parameters must be finite numbers"))
    }
}

/// Parameters for the Lorenz system
///
/// Mathematical Background:
/// - σ (sigma): Prandtl number, ratio of momentum diffusivity to thermal diffusivity
/// - ρ (rho): Rayleigh number, ratio of buoyancy to viscous forces
/// - β (beta): geometric factor related to domain aspect ratio
///
/// Classical chaos occurs at σ=10, ρ=28, β=8/3
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LorenzParameters {
    pub sigma: f64,
    pub rho: f64,
    pub beta: f64,
}

impl Default for LorenzParameters {
    fn default() -> Self {
        Self {
            sigma: 10.0,
            rho: 28.0,
            beta: 8.0 / 3.0,
        }
    }
}

impl LorenzParameters {
    /// The Lorenz equations:
    /// dx/dt = σ(y - x)                   [rate of convection]
    /// dy/dt = x(ρ - z) - y               [horizontal temperature variation]
    /// dz/dt = xy - βz                    [vertical temperature variation]
    ///
    /// Symmetric under (x,y,z) → (-x,-y,z).
    pub fn derivatives(&self, state: &State) -> State {
        let (x, y, z) = (state[0], state[1], state[2]);
        vec3(
            self.sigma * (y - x),
            x * (self.rho - z) - y,
            x * y - self.beta * z,
        )
    }

    /// div(F) = -σ - 1 - β, constant, so phase volumes contract exponentially
    /// when it is negative.
    pub fn divergence(&self) -> f64 {
        -self.sigma - 1.0 - self.beta
    }

    /// Fixed points satisfy dx/dt = dy/dt = dz/dt = 0
    ///
    /// For ρ > 1, there are three fixed points:
    /// 1. Origin: (0, 0, 0) - unstable saddle
    /// 2. C+: (√(β(ρ-1)), √(β(ρ-1)), ρ-1)
    /// 3. C-: (-√(β(ρ-1)), -√(β(ρ-1)), ρ-1)
    pub fn fixed_points(&self) -> Vec<State> {
        if self.rho <= 1.0 {
            vec![vec3(0.0, 0.0, 0.0)]
        } else {
            let c = (self.beta * (self.rho - 1.0)).sqrt();
            vec![
                vec3(0.0, 0.0, 0.0),
                vec3(c, c, self.rho - 1.0),
                vec3(-c, -c, self.rho - 1.0),
            ]
        }
    }
}

impl ClassicSystem for LorenzParameters {
    fn system(&self) -> SystemDefinition {
        let p = *self;
        SystemDefinition::flow(move |_t, x: &State| p.derivatives(x))
    }

    fn initial_state(&self) -> State {
        vec3(1.0, 1.0, 1.0)
    }
}

/// Rössler: x' = -y - z, y' = x + ay, z' = b + z(x - c).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RosslerParameters {
    pub a: f64,
    pub b: f64,
    pub c: f64,
}

impl Default for RosslerParameters {
    fn default() -> Self {
        Self { a: 0.2, b: 0.2, c: 5.7 }
    }
}

impl ClassicSystem for RosslerParameters {
    fn system(&self) -> SystemDefinition {
        let p = *self;
        SystemDefinition::flow(move |_t, s: &State| {
            let (x, y, z) = (s[0], s[1], s[2]);
            vec3(-y - z, x + p.a * y, p.b + z * (x - p.c))
        })
    }

    fn initial_state(&self) -> State {
        vec3(1.0, 1.0, 0.0)
    }
}

/// Chen: x' = a(y - x), y' = (c - a)x - xz + cy, z' = xy - bz.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChenParameters {
    pub a: f64,
    pub b: f64,
    pub c: f64,
}

impl Default for ChenParameters {
    fn default() -> Self {
        Self { a: 35.0, b: 3.0, c: 28.0 }
    }
}

impl ClassicSystem for ChenParameters {
    fn system(&self) -> SystemDefinition {
        let p = *self;
        SystemDefinition::flow(move |_t, s: &State| {
            let (x, y, z) = (s[0], s[1], s[2]);
            vec3(
                p.a * (y - x),
                (p.c - p.a) * x - x * z + p.c * y,
                x * y - p.b * z,
            )
        })
    }

    fn initial_state(&self) -> State {
        vec3(-10.0, 0.0, 37.0)
    }
}

/// Thomas' cyclically symmetric attractor: x' = sin y - bx and cyclic.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThomasParameters {
    pub b: f64,
}

impl Default for ThomasParameters {
    fn default() -> Self {
        Self { b: 0.208186 }
    }
}

impl ClassicSystem for ThomasParameters {
    fn system(&self) -> SystemDefinition {
        let b = self.b;
        SystemDefinition::flow(move |_t, s: &State| {
            let (x, y, z) = (s[0], s[1], s[2]);
            vec3(y.sin() - b * x, z.sin() - b * y, x.sin() - b * z)
        })
    }

    fn initial_state(&self) -> State {
        vec3(1.0, 0.0, 0.0)
    }
}

/// Halvorsen: x' = -ax - 4y - 4z - y² and cyclic.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HalvorsenParameters {
    pub a: f64,
}

impl Default for HalvorsenParameters {
    fn default() -> Self {
        Self { a: 1.89 }
    }
}

impl ClassicSystem for HalvorsenParameters {
    fn system(&self) -> SystemDefinition {
        let a = self.a;
        SystemDefinition::flow(move |_t, s: &State| {
            let (x, y, z) = (s[0], s[1], s[2]);
            vec3(
                -a * x - 4.0 * y - 4.0 * z - y * y,
                -a * y - 4.0 * z - 4.0 * x - z * z,
                -a * z - 4.0 * x - 4.0 * y - x * x,
            )
        })
    }

    fn initial_state(&self) -> State {
        vec3(-5.0, 0.0, 0.0)
    }
}

/// Aizawa:
/// x' = (z - b)x - dy
/// y' = dx + (z - b)y
/// z' = c + az - z³/3 - (x² + y²)(1 + ez) + fzx³
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AizawaParameters {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl Default for AizawaParameters {
    fn default() -> Self {
        Self {
            a: 0.95,
            b: 0.7,
            c: 0.6,
            d: 3.5,
            e: 0.25,
            f: 0.1,
        }
    }
}

impl ClassicSystem for AizawaParameters {
    fn system(&self) -> SystemDefinition {
        let p = *self;
        SystemDefinition::flow(move |_t, s: &State| {
            let (x, y, z) = (s[0], s[1], s[2]);
            let r2 = x * x + y * y;
            vec3(
                (z - p.b) * x - p.d * y,
                p.d * x + (z - p.b) * y,
                p.c + p.a * z - z.powi(3) / 3.0 - r2 * (1.0 + p.e * z) + p.f * z * x.powi(3),
            )
        })
    }

    fn initial_state(&self) -> State {
        vec3(0.1, 0.0, 0.0)
    }
}

/// Sprott case B: x' = yz, y' = x - y, z' = a - xy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SprottBParameters {
    pub a: f64,
}

impl Default for SprottBParameters {
    fn default() -> Self {
        Self { a: 1.0 }
    }
}

impl ClassicSystem for SprottBParameters {
    fn system(&self) -> SystemDefinition {
        let a = self.a;
        SystemDefinition::flow(move |_t, s: &State| {
            let (x, y, z) = (s[0], s[1], s[2]);
            vec3(y * z, x - y, a - x * y)
        })
    }

    fn initial_state(&self) -> State {
        vec3(0.1, 0.1, 0.1)
    }
}

/// Dadras: x' = y - ax + byz, y' = cy - xz + z, z' = dxy - ez.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DadrasParameters {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
}

impl Default for DadrasParameters {
    fn default() -> Self {
        Self {
            a: 3.0,
            b: 2.7,
            c: 1.7,
            d: 2.0,
            e: 9.0,
        }
    }
}

impl ClassicSystem for DadrasParameters {
    fn system(&self) -> SystemDefinition {
        let p = *self;
        SystemDefinition::flow(move |_t, s: &State| {
            let (x, y, z) = (s[0], s[1], s[2]);
            vec3(
                y - p.a * x + p.b * y * z,
                p.c * y - x * z + z,
                p.d * x * y - p.e * z,
            )
        })
    }

    fn initial_state(&self) -> State {
        vec3(1.0, 1.0, 1.0)
    }
}

/// Logistic map x → r x (1 - x). Fully chaotic on [0, 1] at r = 4.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LogisticParameters {
    pub r: f64,
}

impl Default for LogisticParameters {
    fn default() -> Self {
        Self { r: 4.0 }
    }
}

impl LogisticParameters {
    pub fn new(r: f64) -> ChaosResult<Self> {
        check_finite(&[r])?;
        if !(0.0..=4.0).contains(&r) {
            return Err(ChaosError::invalid("logistic r must lie in [0, 4]"));
        }
        Ok(Self { r })
    }
}

impl ClassicSystem for LogisticParameters {
    fn system(&self) -> SystemDefinition {
        let r = self.r;
        SystemDefinition::map(move |x: &State| DVector::from_vec(vec![r * x[0] * (1.0 - x[0])]))
    }

    fn initial_state(&self) -> State {
        DVector::from_vec(vec![0.1])
    }
}

/// Hénon map: x' = 1 - ax² + y, y' = bx.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HenonParameters {
    pub a: f64,
    pub b: f64,
}

impl Default for HenonParameters {
    fn default() -> Self {
        Self { a: 1.4, b: 0.3 }
    }
}

impl HenonParameters {
    pub fn new(a: f64, b: f64) -> ChaosResult<Self> {
        check_finite(&[a, b])?;
        if b.abs() < 1e-10 {
            return Err(ChaosError::invalid("Hénon b cannot be zero or near zero"));
        }
        Ok(Self { a, b })
    }
}

impl ClassicSystem for HenonParameters {
    fn system(&self) -> SystemDefinition {
        let p = *self;
        SystemDefinition::map(move |s: &State| {
            DVector::from_vec(vec![1.0 - p.a * s[0] * s[0] + s[1], p.b * s[0]])
        })
    }

    fn initial_state(&self) -> State {
        DVector::from_vec(vec![0.0, 0.0])
    }
}

/// Duffing map: x' = y, y' = -bx + ay - y³.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DuffingParameters {
    pub a: f64,
    pub b: f64,
}

impl Default for DuffingParameters {
    fn default() -> Self {
        Self { a: 2.75, b: 0.2 }
    }
}

impl DuffingParameters {
    pub fn new(a: f64, b: f64) -> ChaosResult<Self> {
        check_finite(&[a, b])?;
        if b.abs() < 1e-10 {
            return Err(ChaosError::invalid("Duffing b cannot be zero or near zero"));
        }
        if a.abs() > 10.0 || b.abs() > 10.0 {
            return Err(ChaosError::invalid("Duffing parameters outside reasonable range"));
        }
        Ok(Self { a, b })
    }
}

impl ClassicSystem for DuffingParameters {
    fn system(&self) -> SystemDefinition {
        let p = *self;
        SystemDefinition::map(move |s: &State| {
            let (x, y) = (s[0], s[1]);
            DVector::from_vec(vec![y, -p.b * x + p.a * y - y.powi(3)])
        })
    }

    fn initial_state(&self) -> State {
        DVector::from_vec(vec![0.1, 0.1])
    }
}
