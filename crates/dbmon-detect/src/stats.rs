//! Descriptive statistics shared by the SPC detectors.

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Standard deviation. `population` selects the N denominator; the sample
/// form returns 0 for fewer than two values.
pub fn std_dev(values: &[f64], population: bool) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    let sum: f64 = values.iter().map(|v| (v - m) * (v - m)).sum();
    let denom = if population {
        values.len() as f64
    } else {
        if values.len() < 2 {
            return 0.0;
        }
        (values.len() - 1) as f64
    };
    (sum / denom).sqrt()
}

pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Median absolute deviation around a precomputed median.
pub fn mad(values: &[f64], median_value: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let deviations: Vec<f64> = values.iter().map(|v| (v - median_value).abs()).collect();
    median(&deviations)
}

/// Ordinary least squares over paired observations. Returns
/// `(slope, intercept, r_squared)`, or `None` when the inputs are
/// degenerate (fewer than two points, mismatched lengths, or zero x
/// variance).
pub fn linear_regression(x_vals: &[f64], y_vals: &[f64]) -> Option<(f64, f64, f64)> {
    if x_vals.len() != y_vals.len() || x_vals.len() < 2 {
        return None;
    }
    let n = x_vals.len() as f64;
    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    let mut sum_xy = 0.0;
    let mut sum_x2 = 0.0;
    for (x, y) in x_vals.iter().zip(y_vals) {
        sum_x += x;
        sum_y += y;
        sum_xy += x * y;
        sum_x2 += x * x;
    }
    let denom = n * sum_x2 - sum_x * sum_x;
    if denom == 0.0 {
        return None;
    }
    let slope = (n * sum_xy - sum_x * sum_y) / denom;
    let intercept = (sum_y - slope * sum_x) / n;

    let mean_y = sum_y / n;
    let mut ss_tot = 0.0;
    let mut ss_res = 0.0;
    for (x, y) in x_vals.iter().zip(y_vals) {
        let est = slope * x + intercept;
        ss_tot += (y - mean_y) * (y - mean_y);
        ss_res += (y - est) * (y - est);
    }
    let r2 = if ss_tot == 0.0 { 1.0 } else { 1.0 - ss_res / ss_tot };
    Some((slope, intercept, r2))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_and_mad() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        let m = median(&values);
        assert_eq!(m, 3.0);
        assert_eq!(mad(&values, m), 1.0);
    }

    #[test]
    fn median_even_length_averages() {
        assert_eq!(median(&[1.0, 2.0, 3.0, 4.0]), 2.5);
    }

    #[test]
    fn sample_stddev_needs_two_points() {
        assert_eq!(std_dev(&[5.0], false), 0.0);
        assert!(std_dev(&[5.0], true).abs() < f64::EPSILON);
    }

    #[test]
    fn regression_recovers_exact_line() {
        let x = [0.0, 1.0, 2.0, 3.0];
        let y = [1.0, 3.0, 5.0, 7.0];
        let (slope, intercept, r2) = linear_regression(&x, &y).unwrap();
        assert!((slope - 2.0).abs() < 1e-12);
        assert!((intercept - 1.0).abs() < 1e-12);
        assert!((r2 - 1.0).abs() < 1e-12);
    }

    #[test]
    fn regression_rejects_zero_x_variance() {
        assert!(linear_regression(&[2.0, 2.0, 2.0], &[1.0, 2.0, 3.0]).is_none());
    }

    #[test]
    fn regression_flat_series_has_r2_one() {
        let (slope, _, r2) = linear_regression(&[0.0, 1.0, 2.0], &[4.0, 4.0, 4.0]).unwrap();
        assert_eq!(slope, 0.0);
        assert_eq!(r2, 1.0);
    }
}
