/// Benjamini-Hochberg adjusted p-values (q-values), returned in input order.
///
/// `q_(i) = min_{j >= i} (m / j) * p_(j)` over ascending p-values, capped at 1.
pub fn benjamini_hochberg(p_values: &[f64]) -> Vec<f64> {
    let m = p_values.len();
    let mut order: Vec<usize> = (0..m).collect();
    order.sort_by(|&a, &b| p_values[a].total_cmp(&p_values[b]));

    let mut q_values = vec![0.0; m];
    let mut running_min = 1.0_f64;
    for (position, &idx) in order.iter().enumerate().rev() {
        let rank = (position + 1) as f64;
        let scaled = p_values[idx] * m as f64 / rank;
        running_min = running_min.min(scaled);
        q_values[idx] = running_min;
    }
    q_values
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn matches_hand_computed_adjustment() {
        let q = benjamini_hochberg(&[0.01, 0.04, 0.03, 0.20]);
        // Sorted: 0.01, 0.03, 0.04, 0.20 -> 0.04, 0.0533, 0.0533, 0.20.
        assert_relative_eq!(q[0], 0.04, epsilon = 1e-12);
        assert_relative_eq!(q[1], 0.16 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(q[2], 0.16 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(q[3], 0.20, epsilon = 1e-12);
    }

    #[test]
    fn q_values_never_exceed_one_or_fall_below_p() {
        let p = [0.9, 0.5, 0.95, 0.001];
        let q = benjamini_hochberg(&p);
        for (pi, qi) in p.iter().zip(&q) {
            assert!(*qi >= *pi && *qi <= 1.0);
        }
    }

    #[test]
    fn empty_input_gives_empty_output() {
        assert!(benjamini_hochberg(&[]).is_empty());
    }
}
