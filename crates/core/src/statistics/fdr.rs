//! Benjamini-Hochberg false-discovery-rate adjustment

/// Step-up adjusted p-values, returned in the input order.
///
/// Non-finite p-values are treated as 1.
pub fn benjamini_hochberg(p_values: &[f64]) -> Vec<f64> {
    let m = p_values.len();
    if m == 0 {
        return Vec::new();
    }

    let mut order: Vec<(usize, f64)> = p_values
        .iter()
        .map(|&p| if p.is_finite() { p.clamp(0.0, 1.0) } else { 1.0 })
        .enumerate()
        .collect();
    order.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));

    let mut adjusted = vec![1.0; m];
    let mut running_min: f64 = 1.0;
    // Largest p first so each adjusted value is the minimum over higher ranks
    for (rank0, &(original, p)) in order.iter().enumerate().rev() {
        let raw = p * m as f64 / (rank0 + 1) as f64;
        running_min = running_min.min(raw);
        adjusted[original] = running_min;
    }
    adjusted
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_known_adjustment() {
        let adjusted = benjamini_hochberg(&[0.01, 0.04, 0.03, 0.20]);
        assert_relative_eq!(adjusted[0], 0.04);
        assert_relative_eq!(adjusted[1], 0.04 * 4.0 / 3.0);
        assert_relative_eq!(adjusted[2], 0.04 * 4.0 / 3.0);
        assert_relative_eq!(adjusted[3], 0.20);
    }

    #[test]
    fn test_adjusted_never_below_raw_and_bounded() {
        let raw = [0.5, 0.001, f64::NAN, 0.9, 0.02];
        let adjusted = benjamini_hochberg(&raw);
        for (r, a) in raw.iter().zip(&adjusted) {
            assert!((0.0..=1.0).contains(a));
            if r.is_finite() {
                assert!(a >= r);
            }
        }
    }
}
