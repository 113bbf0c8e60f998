//! Small numerical toolkit shared by the producers.
//!
//! - Descriptive statistics (mean, std, CV, interpolated percentiles)
//! - Student-t distribution (CDF, two-tailed p, quantile) via the regularized
//!   incomplete beta function and a Lanczos log-gamma
//! - Independent two-sample t-test (pooled variance)
//! - Ordinary least-squares polynomial fit with the (XᵀX)⁻¹ matrix kept for
//!   coefficient standard errors
//!
//! Everything here is pure and deterministic.

/// Arithmetic mean (0.0 for an empty slice)
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation (divides by n)
pub fn population_std(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

/// Sample standard deviation (divides by n - 1, 0.0 below two values)
pub fn sample_std(values: &[f64]) -> f64 {
    sample_variance(values).sqrt()
}

pub fn sample_variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64
}

/// Coefficient of variation (population std / mean); None when the mean is zero
pub fn coefficient_of_variation(values: &[f64]) -> Option<f64> {
    let m = mean(values);
    if values.is_empty() || m.abs() < f64::EPSILON {
        return None;
    }
    Some(population_std(values) / m.abs())
}

/// Percentile with linear interpolation between closest ranks.
///
/// `sorted` must be ascending; `pct` is in [0, 100].
pub fn percentile(sorted: &[f64], pct: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let rank = (pct.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let frac = rank - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * frac)
}

/// Sort a copy ascending, dropping NaNs
pub fn sorted_copy(values: &[f64]) -> Vec<f64> {
    let mut out: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    out.sort_by(|a, b| a.total_cmp(b));
    out
}

// ============================================================================
// Student-t distribution
// ============================================================================

/// Natural log of the gamma function (Lanczos, g = 7, 9 coefficients)
pub fn ln_gamma(x: f64) -> f64 {
    const COEFFS: [f64; 9] = [
        0.999_999_999_999_809_9,
        676.520_368_121_885_1,
        -1_259.139_216_722_403,
        771.323_428_777_653_1,
        -176.615_029_162_140_6,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_572e-6,
        1.505_632_735_149_311_6e-7,
    ];

    if x <= 0.0 {
        return f64::INFINITY;
    }
    if x < 0.5 {
        let pi = std::f64::consts::PI;
        return (pi / (pi * x).sin()).ln() - ln_gamma(1.0 - x);
    }
    let z = x - 1.0;
    let mut sum = COEFFS[0];
    for (i, &c) in COEFFS.iter().enumerate().skip(1) {
        sum += c / (z + i as f64);
    }
    let t = z + 7.5;
    0.5 * (2.0 * std::f64::consts::PI).ln() + (z + 0.5) * t.ln() - t + sum.ln()
}

/// Regularized incomplete beta function I_x(a, b)
pub fn incomplete_beta(x: f64, a: f64, b: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x >= 1.0 {
        return 1.0;
    }
    let ln_front = ln_gamma(a + b) - ln_gamma(a) - ln_gamma(b) + a * x.ln() + b * (1.0 - x).ln();
    let front = ln_front.exp();
    // Continued fraction converges fastest on this side of the mode
    if x < (a + 1.0) / (a + b + 2.0) {
        front * beta_continued_fraction(x, a, b) / a
    } else {
        1.0 - front * beta_continued_fraction(1.0 - x, b, a) / b
    }
}

/// Lentz evaluation of the incomplete beta continued fraction
fn beta_continued_fraction(x: f64, a: f64, b: f64) -> f64 {
    const MAX_ITER: usize = 300;
    const EPS: f64 = 1e-14;
    const TINY: f64 = 1e-300;

    let qab = a + b;
    let qap = a + 1.0;
    let qam = a - 1.0;
    let mut c = 1.0;
    let mut d = 1.0 - qab * x / qap;
    if d.abs() < TINY {
        d = TINY;
    }
    d = 1.0 / d;
    let mut h = d;

    for m in 1..=MAX_ITER {
        let m = m as f64;
        let m2 = 2.0 * m;

        let aa = m * (b - m) * x / ((qam + m2) * (a + m2));
        d = 1.0 + aa * d;
        if d.abs() < TINY {
            d = TINY;
        }
        c = 1.0 + aa / c;
        if c.abs() < TINY {
            c = TINY;
        }
        d = 1.0 / d;
        h *= d * c;

        let aa = -(a + m) * (qab + m) * x / ((a + m2) * (qap + m2));
        d = 1.0 + aa * d;
        if d.abs() < TINY {
            d = TINY;
        }
        c = 1.0 + aa / c;
        if c.abs() < TINY {
            c = TINY;
        }
        d = 1.0 / d;
        let delta = d * c;
        h *= delta;
        if (delta - 1.0).abs() < EPS {
            break;
        }
    }
    h
}

/// CDF of Student's t distribution with `df` degrees of freedom
pub fn student_t_cdf(t: f64, df: f64) -> f64 {
    if t.is_infinite() {
        return if t > 0.0 { 1.0 } else { 0.0 };
    }
    let x = df / (df + t * t);
    let tail = 0.5 * incomplete_beta(x, df / 2.0, 0.5);
    if t >= 0.0 {
        1.0 - tail
    } else {
        tail
    }
}

/// Two-tailed p-value for a t statistic
pub fn two_tailed_p(t: f64, df: f64) -> f64 {
    if t.is_infinite() {
        return 0.0;
    }
    let x = df / (df + t * t);
    incomplete_beta(x, df / 2.0, 0.5).clamp(0.0, 1.0)
}

/// Inverse CDF of Student's t by bisection
pub fn student_t_quantile(p: f64, df: f64) -> f64 {
    let p = p.clamp(1e-12, 1.0 - 1e-12);
    let mut lo = -1.0e4;
    let mut hi = 1.0e4;
    for _ in 0..200 {
        let mid = 0.5 * (lo + hi);
        if student_t_cdf(mid, df) < p {
            lo = mid;
        } else {
            hi = mid;
        }
        if hi - lo < 1e-10 {
            break;
        }
    }
    0.5 * (lo + hi)
}

/// Result of an independent two-sample t-test
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TTest {
    pub t_statistic: f64,
    pub degrees_of_freedom: f64,
    pub p_value: f64,
}

/// Independent two-sample t-test with pooled variance.
///
/// Returns None when either group has fewer than two values. Two
/// zero-variance groups are decided on their means alone.
pub fn two_sample_t_test(a: &[f64], b: &[f64]) -> Option<TTest> {
    if a.len() < 2 || b.len() < 2 {
        return None;
    }
    let (na, nb) = (a.len() as f64, b.len() as f64);
    let df = na + nb - 2.0;
    let diff = mean(b) - mean(a);
    let pooled = ((na - 1.0) * sample_variance(a) + (nb - 1.0) * sample_variance(b)) / df;
    let se = (pooled * (1.0 / na + 1.0 / nb)).sqrt();

    if se < 1e-12 {
        let (t, p) = if diff.abs() < 1e-12 {
            (0.0, 1.0)
        } else {
            (f64::MAX.copysign(diff), 0.0)
        };
        return Some(TTest {
            t_statistic: t,
            degrees_of_freedom: df,
            p_value: p,
        });
    }

    let t = diff / se;
    Some(TTest {
        t_statistic: t,
        degrees_of_freedom: df,
        p_value: two_tailed_p(t, df),
    })
}

// ============================================================================
// Least squares
// ============================================================================

/// Polynomial least-squares fit.
///
/// Coefficients are ordered highest degree first, so a quadratic fit is
/// `[a, b, c]` for `a·x² + b·x + c`. `xtx_inverse` uses the same ordering.
#[derive(Debug, Clone, PartialEq)]
pub struct PolyFit {
    pub coefficients: Vec<f64>,
    pub residual_sum_squares: f64,
    pub total_sum_squares: f64,
    pub xtx_inverse: Vec<Vec<f64>>,
    pub n: usize,
}

impl PolyFit {
    pub fn predict(&self, x: f64) -> f64 {
        self.coefficients.iter().fold(0.0, |acc, c| acc * x + c)
    }

    /// Number of fitted parameters
    pub fn parameters(&self) -> usize {
        self.coefficients.len()
    }

    /// Coefficient of determination, 1.0 for a perfectly flat series
    pub fn r_squared(&self) -> f64 {
        if self.total_sum_squares <= f64::EPSILON {
            return if self.residual_sum_squares <= f64::EPSILON { 1.0 } else { 0.0 };
        }
        (1.0 - self.residual_sum_squares / self.total_sum_squares).clamp(0.0, 1.0)
    }

    /// Residual variance with n - p degrees of freedom
    pub fn residual_variance(&self) -> Option<f64> {
        let df = self.n.checked_sub(self.parameters())?;
        if df == 0 {
            return None;
        }
        Some(self.residual_sum_squares / df as f64)
    }

    /// Standard error of the coefficient at `index` (highest degree first)
    pub fn standard_error(&self, index: usize) -> Option<f64> {
        let var = self.residual_variance()?;
        let diag = *self.xtx_inverse.get(index)?.get(index)?;
        Some((var * diag).max(0.0).sqrt())
    }
}

/// Fit a polynomial of `degree` to (x, y) pairs.
///
/// Returns None for mismatched input, too few points, or a singular system.
pub fn fit_polynomial(xs: &[f64], ys: &[f64], degree: usize) -> Option<PolyFit> {
    let p = degree + 1;
    if xs.len() != ys.len() || xs.len() < p {
        return None;
    }

    let mut xtx = vec![vec![0.0; p]; p];
    let mut xty = vec![0.0; p];
    for (&x, &y) in xs.iter().zip(ys) {
        let row: Vec<f64> = (0..p).map(|j| x.powi((degree - j) as i32)).collect();
        for i in 0..p {
            xty[i] += row[i] * y;
            for j in 0..p {
                xtx[i][j] += row[i] * row[j];
            }
        }
    }

    let inverse = invert(&xtx)?;
    let coefficients: Vec<f64> = (0..p)
        .map(|i| (0..p).map(|j| inverse[i][j] * xty[j]).sum())
        .collect();

    let y_mean = mean(ys);
    let mut ssr = 0.0;
    let mut sst = 0.0;
    for (&x, &y) in xs.iter().zip(ys) {
        let fitted = coefficients.iter().fold(0.0, |acc, c| acc * x + c);
        ssr += (y - fitted).powi(2);
        sst += (y - y_mean).powi(2);
    }

    Some(PolyFit {
        coefficients,
        residual_sum_squares: ssr,
        total_sum_squares: sst,
        xtx_inverse: inverse,
        n: xs.len(),
    })
}

/// Gauss-Jordan inversion with partial pivoting
fn invert(matrix: &[Vec<f64>]) -> Option<Vec<Vec<f64>>> {
    let n = matrix.len();
    let scale = matrix
        .iter()
        .flat_map(|row| row.iter())
        .fold(0.0_f64, |acc, v| acc.max(v.abs()))
        .max(1.0);

    let mut a: Vec<Vec<f64>> = matrix.to_vec();
    let mut inv: Vec<Vec<f64>> = (0..n)
        .map(|i| (0..n).map(|j| if i == j { 1.0 } else { 0.0 }).collect())
        .collect();

    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col].abs() < 1e-14 * scale {
            return None;
        }
        a.swap(col, pivot);
        inv.swap(col, pivot);

        let div = a[col][col];
        for j in 0..n {
            a[col][j] /= div;
            inv[col][j] /= div;
        }
        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = a[row][col];
            if factor == 0.0 {
                continue;
            }
            for j in 0..n {
                a[row][j] -= factor * a[col][j];
                inv[row][j] -= factor * inv[col][j];
            }
        }
    }
    Some(inv)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ln_gamma_known_values() {
        assert!(ln_gamma(1.0).abs() < 1e-10);
        assert!(ln_gamma(2.0).abs() < 1e-10);
        assert!((ln_gamma(5.0) - 24.0_f64.ln()).abs() < 1e-8);
        let sqrt_pi = std::f64::consts::PI.sqrt();
        assert!((ln_gamma(0.5) - sqrt_pi.ln()).abs() < 1e-8);
    }

    #[test]
    fn test_t_quantiles_match_tables() {
        // Two-sided 95% critical values
        assert!((student_t_quantile(0.975, 1.0) - 12.706).abs() < 1e-2);
        assert!((student_t_quantile(0.975, 9.0) - 2.262).abs() < 1e-3);
        assert!((student_t_quantile(0.975, 30.0) - 2.042).abs() < 1e-3);
        assert!(student_t_quantile(0.5, 7.0).abs() < 1e-6);
    }

    #[test]
    fn test_t_cdf_symmetry_and_p_value() {
        let df = 12.0;
        let upper = student_t_cdf(1.7, df);
        let lower = student_t_cdf(-1.7, df);
        assert!((upper + lower - 1.0).abs() < 1e-10);
        assert!((two_tailed_p(1.7, df) - 2.0 * lower).abs() < 1e-10);
        assert!((two_tailed_p(0.0, df) - 1.0).abs() < 1e-10);
    }

    #[test]
    fn test_percentile_interpolates() {
        let sorted = vec![1.0, 2.0, 3.0, 4.0];
        assert_eq!(percentile(&sorted, 0.0), Some(1.0));
        assert_eq!(percentile(&sorted, 100.0), Some(4.0));
        assert!((percentile(&sorted, 50.0).unwrap() - 2.5).abs() < 1e-12);
        assert_eq!(percentile(&[], 50.0), None);
    }

    #[test]
    fn test_t_test_detects_shift() {
        let a = [1.0, 1.1, 0.9, 1.0, 1.05, 0.95];
        let b = [2.0, 2.1, 1.9, 2.0, 2.05, 1.95];
        let result = two_sample_t_test(&a, &b).unwrap();
        assert!(result.t_statistic > 0.0);
        assert!(result.p_value < 0.001);

        let same = two_sample_t_test(&a, &a).unwrap();
        assert!(same.p_value > 0.99);
    }

    #[test]
    fn test_t_test_zero_variance_groups() {
        let flat = two_sample_t_test(&[3.0, 3.0], &[3.0, 3.0]).unwrap();
        assert_eq!(flat.p_value, 1.0);
        let shifted = two_sample_t_test(&[3.0, 3.0], &[4.0, 4.0]).unwrap();
        assert_eq!(shifted.p_value, 0.0);
        assert!(two_sample_t_test(&[1.0], &[2.0, 3.0]).is_none());
    }

    #[test]
    fn test_quadratic_fit_recovers_coefficients() {
        let xs: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let ys: Vec<f64> = xs.iter().map(|x| 0.5 * x * x - 2.0 * x + 7.0).collect();
        let fit = fit_polynomial(&xs, &ys, 2).unwrap();
        assert!((fit.coefficients[0] - 0.5).abs() < 1e-8);
        assert!((fit.coefficients[1] + 2.0).abs() < 1e-7);
        assert!((fit.coefficients[2] - 7.0).abs() < 1e-6);
        assert!(fit.r_squared() > 0.999_999);
        assert!((fit.predict(10.0) - 37.0).abs() < 1e-6);
    }

    #[test]
    fn test_fit_rejects_degenerate_input() {
        assert!(fit_polynomial(&[1.0, 1.0, 1.0], &[1.0, 2.0, 3.0], 1).is_none());
        assert!(fit_polynomial(&[1.0], &[1.0], 1).is_none());
    }
}
