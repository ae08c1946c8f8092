use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::dynamical_systems::State;
use crate::error::{ChaosError, ChaosResult};
use crate::lyapunov::LyapunovSpectrum;

/// Empirical ratio between topological and Kolmogorov-Sinai entropy used by
/// the Lyapunov estimate. `h_top >= h_KS` holds; the factor is not a bound.
pub const KS_TO_TOPOLOGICAL_FACTOR: f64 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntropyMethod {
    BoxCounting,
    CorrelationSum,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EntropyConfig {
    pub epsilon: f64,
    /// Leading orbit points analysed. `None` uses the whole orbit.
    pub max_points: Option<usize>,
    pub method: EntropyMethod,
}

impl Default for EntropyConfig {
    fn default() -> Self {
        Self {
            epsilon: 0.1,
            max_points: None,
            method: EntropyMethod::BoxCounting,
        }
    }
}

impl EntropyConfig {
    pub fn validate(&self) -> ChaosResult<()> {
        if !(self.epsilon.is_finite() && self.epsilon > 0.0) {
            return Err(ChaosError::invalid("epsilon must be positive"));
        }
        if self.max_points == Some(0) {
            return Err(ChaosError::invalid("max_points must be at least 1"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoxCountingEntropy {
    /// `ln N / ln(total_volume / cell_volume)`.
    pub entropy: f64,
    pub shannon_entropy: f64,
    pub occupied_boxes: usize,
    pub total_boxes: u64,
    /// Occupied fraction of the boxes covering the bounding box.
    pub complexity: f64,
    pub epsilon: f64,
    pub dimension: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationEntropy {
    /// `ln C / ln pair_count`.
    pub entropy: f64,
    /// Ordered pairs closer than `epsilon`, at least 1.
    pub correlation_sum: u64,
    pub correlation_dimension: f64,
    pub pair_count: u64,
    pub epsilon: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EntropyReport {
    BoxCounting(BoxCountingEntropy),
    CorrelationSum(CorrelationEntropy),
}

impl EntropyReport {
    pub fn entropy(&self) -> f64 {
        match self {
            EntropyReport::BoxCounting(r) => r.entropy,
            EntropyReport::CorrelationSum(r) => r.entropy,
        }
    }
}

fn check_points(points: &[State]) -> ChaosResult<usize> {
    let first = points
        .first()
        .ok_or_else(|| ChaosError::invalid("entropy needs at least one orbit point"))?;
    let dim = first.len();
    for p in points {
        crate::dynamical_systems::ensure_dimension(dim, p.len())?;
    }
    Ok(dim)
}

/// Topological entropy estimate of a sampled orbit.
pub fn topological_entropy(points: &[State], config: &EntropyConfig) -> ChaosResult<EntropyReport> {
    config.validate()?;
    let points = match config.max_points {
        Some(n) if n < points.len() => &points[..n],
        _ => points,
    };
    match config.method {
        EntropyMethod::BoxCounting => box_counting_entropy(points, config.epsilon).map(EntropyReport::BoxCounting),
        EntropyMethod::CorrelationSum => {
            correlation_sum_entropy(points, config.epsilon).map(EntropyReport::CorrelationSum)
        }
    }
}

/// Box-counting entropy at scale `epsilon`.
///
/// Boxes are anchored at the per-axis minimum of the points. The entropy is 0
/// when the bounding box is no larger than one box or a single box is
/// occupied.
pub fn box_counting_entropy(points: &[State], epsilon: f64) -> ChaosResult<BoxCountingEntropy> {
    if !(epsilon.is_finite() && epsilon > 0.0) {
        return Err(ChaosError::invalid("epsilon must be positive"));
    }
    let dim = check_points(points)?;

    let mut mins = vec![f64::INFINITY; dim];
    let mut maxs = vec![f64::NEG_INFINITY; dim];
    for p in points {
        for j in 0..dim {
            mins[j] = mins[j].min(p[j]);
            maxs[j] = maxs[j].max(p[j]);
        }
    }

    let boxes_per_axis: Vec<i64> = mins
        .iter()
        .zip(&maxs)
        .map(|(lo, hi)| (((hi - lo) / epsilon).ceil() as i64).max(1))
        .collect();

    let mut occupancy: HashMap<Vec<i64>, usize> = HashMap::new();
    for p in points {
        let key: Vec<i64> = (0..dim)
            .map(|j| (((p[j] - mins[j]) / epsilon).floor() as i64).clamp(0, boxes_per_axis[j] - 1))
            .collect();
        *occupancy.entry(key).or_insert(0) += 1;
    }

    let occupied = occupancy.len();
    let total_boxes = boxes_per_axis
        .iter()
        .fold(1u64, |acc, &n| acc.saturating_mul(n as u64));

    let total_volume: f64 = mins.iter().zip(&maxs).map(|(lo, hi)| hi - lo).product();
    let ratio = total_volume / epsilon.powi(dim as i32);
    let entropy = if ratio > 1.0 && occupied > 1 {
        (occupied as f64).ln() / ratio.ln()
    } else {
        0.0
    };

    let n = points.len() as f64;
    let shannon_entropy = -occupancy
        .values()
        .map(|&c| {
            let p = c as f64 / n;
            p * p.ln()
        })
        .sum::<f64>();

    Ok(BoxCountingEntropy {
        entropy,
        shannon_entropy: shannon_entropy.max(0.0),
        occupied_boxes: occupied,
        total_boxes,
        complexity: occupied as f64 / total_boxes as f64,
        epsilon,
        dimension: dim,
    })
}

/// Correlation-sum entropy at scale `epsilon`.
pub fn correlation_sum_entropy(points: &[State], epsilon: f64) -> ChaosResult<CorrelationEntropy> {
    if !(epsilon.is_finite() && epsilon > 0.0) {
        return Err(ChaosError::invalid("epsilon must be positive"));
    }
    check_points(points)?;
    let n = points.len();
    if n < 2 {
        return Err(ChaosError::invalid("correlation sum needs at least two points"));
    }

    let mut close_pairs = 0u64;
    for i in 0..n {
        for j in (i + 1)..n {
            if (&points[i] - &points[j]).norm() < epsilon {
                close_pairs += 1;
            }
        }
    }
    // Ordered pairs, both (i, j) and (j, i).
    let correlation_sum = (2 * close_pairs).max(1);
    let pair_count = (n as u64) * (n as u64 - 1) / 2;

    let ln_c = (correlation_sum as f64).ln();
    let entropy = if pair_count > 1 {
        ln_c / (pair_count as f64).ln()
    } else {
        0.0
    };
    let correlation_dimension = if epsilon == 1.0 { 0.0 } else { ln_c / epsilon.ln() };

    Ok(CorrelationEntropy {
        entropy,
        correlation_sum,
        correlation_dimension,
        pair_count,
        epsilon,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LyapunovEntropy {
    /// Topological entropy estimate, `ks_entropy × factor`.
    pub entropy: f64,
    pub ks_entropy: f64,
    pub factor: f64,
    pub exponents: Vec<f64>,
    pub positive_exponents: usize,
}

/// Entropy estimate from a Lyapunov spectrum (Pesin's identity scaled by
/// `factor`, normally [`KS_TO_TOPOLOGICAL_FACTOR`]).
pub fn lyapunov_entropy(spectrum: &LyapunovSpectrum, factor: f64) -> ChaosResult<LyapunovEntropy> {
    if !(factor.is_finite() && factor > 0.0) {
        return Err(ChaosError::invalid("entropy factor must be positive"));
    }
    let ks_entropy = spectrum.ks_entropy();
    Ok(LyapunovEntropy {
        entropy: ks_entropy * factor,
        ks_entropy,
        factor,
        exponents: spectrum.exponents.clone(),
        positive_exponents: spectrum.exponents.iter().filter(|&&l| l > 0.0).count(),
    })
}
