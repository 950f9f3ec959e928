//! Held-out regression accuracy metrics.

/// Threshold below which the test-set sum of squares counts as degenerate.
const SS_TOT_EPS: f64 = 1e-12;

/// Root mean squared residual.
pub fn rmse(actual: &[f64], predicted: &[f64]) -> f64 {
    mse(actual, predicted).sqrt()
}

/// Mean squared residual.
pub fn mse(actual: &[f64], predicted: &[f64]) -> f64 {
    debug_assert_eq!(actual.len(), predicted.len());
    if actual.is_empty() {
        return f64::NAN;
    }
    let ss: f64 = actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p).powi(2))
        .sum();
    ss / actual.len() as f64
}

/// Coefficient of determination with the **test-set mean** as baseline:
/// `1 - SS_res / SS_tot`, SS_tot computed against `mean(actual)`.
///
/// Returns None when SS_tot is (near) zero — a near-constant held-out
/// response makes R² undefined; callers treat that as a missing value.
pub fn r_squared(actual: &[f64], predicted: &[f64]) -> Option<f64> {
    debug_assert_eq!(actual.len(), predicted.len());
    if actual.is_empty() {
        return None;
    }
    let mean = actual.iter().sum::<f64>() / actual.len() as f64;
    let ss_tot: f64 = actual.iter().map(|a| (a - mean).powi(2)).sum();
    if ss_tot < SS_TOT_EPS {
        return None;
    }
    let ss_res: f64 = actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p).powi(2))
        .sum();
    Some(1.0 - ss_res / ss_tot)
}
