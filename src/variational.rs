use nalgebra::{DMatrix, DVector};

use crate::dynamical_systems::{State, SystemDefinition};
use crate::error::ChaosResult;

/// Forward-difference step for every Jacobian in the crate.
pub const FD_EPSILON: f64 = 1e-8;

/// Finite-difference derivative of the system function at `(t, x)`.
///
/// Column j is `(f(x + ε e_j) - f(x)) / ε`: the map Jacobian `∂f/∂x` for a
/// map, the vector-field Jacobian for a flow.
pub fn derivative_matrix(system: &SystemDefinition, t: f64, x: &State) -> ChaosResult<DMatrix<f64>> {
    let n = x.len();
    let base = system.evaluate(t, x)?;
    let mut jac = DMatrix::zeros(n, n);

    for j in 0..n {
        let mut shifted = x.clone();
        shifted[j] += FD_EPSILON;
        let column = (system.evaluate(t, &shifted)? - &base) / FD_EPSILON;
        jac.set_column(j, &column);
    }

    Ok(jac)
}

/// One-step transition matrix of the linearized dynamics.
///
/// Flow: `I + J·dt`, the Euler step of the variational equation.
/// Map: `∂f/∂x`, with `dt` ignored.
pub fn tangent_map(system: &SystemDefinition, t: f64, x: &State, dt: f64) -> ChaosResult<DMatrix<f64>> {
    let jac = derivative_matrix(system, t, x)?;
    if system.is_map() {
        return Ok(jac);
    }
    let n = x.len();
    Ok(DMatrix::identity(n, n) + jac * dt)
}

/// [`tangent_map`] of an autonomous system, evaluated at `t = 0`.
pub fn jacobian(system: &SystemDefinition, x: &State, dt: f64) -> ChaosResult<DMatrix<f64>> {
    tangent_map(system, 0.0, x, dt)
}

/// Jacobian of an arbitrary vector function `g` by forward differences.
///
/// Used for composed maps (`f^n`, `Φ_T`) where no closed form exists.
pub(crate) fn finite_difference<G>(g: G, x: &State, gx: &State) -> ChaosResult<DMatrix<f64>>
where
    G: Fn(&State) -> ChaosResult<State>,
{
    let n = x.len();
    let mut jac = DMatrix::zeros(gx.len(), n);
    for j in 0..n {
        let mut shifted = x.clone();
        shifted[j] += FD_EPSILON;
        let column: DVector<f64> = (g(&shifted)? - gx) / FD_EPSILON;
        jac.set_column(j, &column);
    }
    Ok(jac)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_henon_jacobian() {
        // Hénon: (1 - a x^2 + y, b x) has Jacobian [[-2 a x, 1], [b, 0]]
        let (a, b) = (1.4, 0.3);
        let henon = SystemDefinition::map(move |p: &State| {
            DVector::from_vec(vec![1.0 - a * p[0] * p[0] + p[1], b * p[0]])
        });
        let x = DVector::from_vec(vec![0.5, -0.2]);
        let jac = jacobian(&henon, &x, 0.1).unwrap();

        assert!((jac[(0, 0)] + 2.0 * a * 0.5).abs() < 1e-6);
        assert!((jac[(0, 1)] - 1.0).abs() < 1e-6);
        assert!((jac[(1, 0)] - b).abs() < 1e-6);
        assert!(jac[(1, 1)].abs() < 1e-6);
    }

    #[test]
    fn test_flow_transition_is_identity_plus_jdt() {
        let linear = SystemDefinition::flow(|_t, x: &State| DVector::from_vec(vec![2.0 * x[0], -x[1]]));
        let x = DVector::from_vec(vec![1.0, 1.0]);
        let m = jacobian(&linear, &x, 0.01).unwrap();

        assert!((m[(0, 0)] - 1.02).abs() < 1e-7);
        assert!((m[(1, 1)] - 0.99).abs() < 1e-7);
        assert!(m[(0, 1)].abs() < 1e-7);
    }

    #[test]
    fn test_finite_difference_of_composition() {
        let square = |x: &State| -> ChaosResult<State> { Ok(x.component_mul(x)) };
        let x = DVector::from_vec(vec![3.0]);
        let gx = square(&x).unwrap();
        let jac = finite_difference(square, &x, &gx).unwrap();
        assert!((jac[(0, 0)] - 6.0).abs() < 1e-5);
    }
}
