use thiserror::Error;

use super::rank::average_ranks;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrelationError {
    #[error("inputs have different lengths ({left} vs {right})")]
    LengthMismatch { left: usize, right: usize },
    #[error("at least 2 points are needed, got {0}")]
    TooFewPoints(usize),
    #[error("the first input is constant")]
    ConstantLeft,
    #[error("the second input is constant")]
    ConstantRight,
}

fn is_constant(values: &[f64]) -> bool {
    values.iter().all(|&v| v == values[0])
}

fn check_inputs(x: &[f64], y: &[f64]) -> Result<(), CorrelationError> {
    if x.len() != y.len() {
        return Err(CorrelationError::LengthMismatch {
            left: x.len(),
            right: y.len(),
        });
    }
    if x.len() < 2 {
        return Err(CorrelationError::TooFewPoints(x.len()));
    }
    // Exact equality: a numerically tiny variance from rounding must not pass.
    if is_constant(x) {
        return Err(CorrelationError::ConstantLeft);
    }
    if is_constant(y) {
        return Err(CorrelationError::ConstantRight);
    }
    Ok(())
}

/// Pearson product-moment correlation.
pub fn pearson(x: &[f64], y: &[f64]) -> Result<f64, CorrelationError> {
    check_inputs(x, y)?;
    let n = x.len() as f64;
    let mean_x = x.iter().sum::<f64>() / n;
    let mean_y = y.iter().sum::<f64>() / n;

    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (&a, &b) in x.iter().zip(y) {
        let dx = a - mean_x;
        let dy = b - mean_y;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    Ok((sxy / (sxx.sqrt() * syy.sqrt())).clamp(-1.0, 1.0))
}

/// Spearman rank correlation: Pearson on average ranks.
pub fn spearman(x: &[f64], y: &[f64]) -> Result<f64, CorrelationError> {
    check_inputs(x, y)?;
    pearson(&average_ranks(x), &average_ranks(y))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn pearson_of_linear_relation_is_one() {
        let x = [1.0, 2.0, 3.0, 4.0];
        let y = [2.0, 4.0, 6.0, 8.0];
        assert_abs_diff_eq!(pearson(&x, &y).unwrap(), 1.0, epsilon = 1e-12);
        let neg: Vec<f64> = y.iter().map(|v| -v).collect();
        assert_abs_diff_eq!(pearson(&x, &neg).unwrap(), -1.0, epsilon = 1e-12);
    }

    #[test]
    fn pearson_matches_hand_computation() {
        let x = [1.0, 2.0, 3.0];
        let y = [2.0, 4.0, 3.0];
        // dx = [-1, 0, 1], dy = [-1, 1, 0]; sxy = 1, sxx = 2, syy = 2.
        assert_abs_diff_eq!(pearson(&x, &y).unwrap(), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn spearman_only_sees_order() {
        let x = [1.0, 2.0, 3.0, 4.0, 5.0];
        let y = [1.0, 8.0, 27.0, 64.0, 125.0];
        assert_abs_diff_eq!(spearman(&x, &y).unwrap(), 1.0, epsilon = 1e-12);
        let y_ties = [1.0, 2.0, 2.0, 3.0, 4.0];
        let rho = spearman(&x, &y_ties).unwrap();
        assert!(rho > 0.9 && rho < 1.0, "rho = {rho}");
    }

    #[test]
    fn degenerate_inputs_are_errors() {
        assert_eq!(
            pearson(&[1.0, 1.0, 1.0], &[1.0, 2.0, 3.0]),
            Err(CorrelationError::ConstantLeft)
        );
        assert_eq!(
            spearman(&[1.0, 2.0], &[4.0, 4.0]),
            Err(CorrelationError::ConstantRight)
        );
        assert_eq!(pearson(&[1.0], &[2.0]), Err(CorrelationError::TooFewPoints(1)));
        assert_eq!(
            pearson(&[1.0, 2.0], &[2.0]),
            Err(CorrelationError::LengthMismatch { left: 2, right: 1 })
        );
    }
}
