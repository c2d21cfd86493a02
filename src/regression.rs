//! Degree-2 least-squares fit used to estimate continuation values.
//!
//! The fit solves the 3x3 normal equations for the basis `[1, x, x^2]` by
//! Gaussian elimination with partial pivoting. When the system is singular
//! (fewer than three distinct `x`), the fit drops to a straight line and then
//! to a constant, so the coefficients stay finite for finite input.

/// Pivots smaller than this fraction of the largest matrix entry are treated
/// as zero.
const SINGULAR_TOLERANCE: f64 = 1e-12;

/// `quadratic * x^2 + linear * x + constant`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct QuadraticFit {
    pub quadratic: f64,
    pub linear: f64,
    pub constant: f64,
    /// Polynomial degree actually fitted: 2, or 1 / 0 after a fallback.
    pub degree: usize,
}

impl QuadraticFit {
    #[inline(always)]
    pub fn eval(&self, x: f64) -> f64 {
        self.quadratic * x * x + self.linear * x + self.constant
    }
}

/// Fits `y ~ a x^2 + b x + c` over paired observations.
///
/// `x` and `y` must have the same length. An empty input yields the zero
/// polynomial.
pub fn fit_quadratic(x: &[f64], y: &[f64]) -> QuadraticFit {
    debug_assert_eq!(x.len(), y.len());
    if x.is_empty() {
        return QuadraticFit::default();
    }

    let mut s_x = 0.0;
    let mut s_xx = 0.0;
    let mut s_xxx = 0.0;
    let mut s_xxxx = 0.0;
    let mut s_y = 0.0;
    let mut s_xy = 0.0;
    let mut s_xxy = 0.0;
    for (&xi, &yi) in x.iter().zip(y) {
        let xi_2 = xi * xi;
        s_x += xi;
        s_xx += xi_2;
        s_xxx += xi_2 * xi;
        s_xxxx += xi_2 * xi_2;
        s_y += yi;
        s_xy += xi * yi;
        s_xxy += xi_2 * yi;
    }
    let n = x.len() as f64;

    let quadratic_system = [[n, s_x, s_xx], [s_x, s_xx, s_xxx], [s_xx, s_xxx, s_xxxx]];
    if let Some([c, b, a]) = solve(quadratic_system, [s_y, s_xy, s_xxy]) {
        return QuadraticFit {
            quadratic: a,
            linear: b,
            constant: c,
            degree: 2,
        };
    }

    if let Some([c, b]) = solve([[n, s_x], [s_x, s_xx]], [s_y, s_xy]) {
        return QuadraticFit {
            quadratic: 0.0,
            linear: b,
            constant: c,
            degree: 1,
        };
    }

    QuadraticFit {
        constant: s_y / n,
        ..QuadraticFit::default()
    }
}

/// Gaussian elimination with partial pivoting followed by back-substitution.
/// Returns `None` when a pivot vanishes relative to the matrix scale.
#[allow(clippy::needless_range_loop)]
fn solve<const N: usize>(mut a: [[f64; N]; N], mut b: [f64; N]) -> Option<[f64; N]> {
    let scale = a
        .iter()
        .flatten()
        .fold(0.0_f64, |largest, v| largest.max(v.abs()));
    let tolerance = SINGULAR_TOLERANCE * scale;

    for col in 0..N {
        let mut pivot = col;
        for row in col + 1..N {
            if a[row][col].abs() > a[pivot][col].abs() {
                pivot = row;
            }
        }
        // Also rejects NaN pivots.
        if !(a[pivot][col].abs() > tolerance) {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        for row in col + 1..N {
            let factor = a[row][col] / a[col][col];
            for k in col..N {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = [0.0; N];
    for i in (0..N).rev() {
        let mut sum = 0.0;
        for j in i + 1..N {
            sum += a[i][j] * x[j];
        }
        x[i] = (b[i] - sum) / a[i][i];
    }
    Some(x)
}

#[test]
fn recovers_exact_quadratic() {
    use approx::assert_relative_eq;

    let x: Vec<f64> = (1..=10).map(f64::from).collect();
    let y: Vec<f64> = x.iter().map(|&v| 2.0 * v * v - 3.0 * v + 1.0).collect();
    let fit = fit_quadratic(&x, &y);

    assert_eq!(fit.degree, 2);
    assert_relative_eq!(fit.quadratic, 2.0, epsilon = 1e-9);
    assert_relative_eq!(fit.linear, -3.0, epsilon = 1e-8);
    assert_relative_eq!(fit.constant, 1.0, epsilon = 1e-8);
    assert_relative_eq!(fit.eval(4.5), 2.0 * 20.25 - 13.5 + 1.0, epsilon = 1e-8);
}

#[test]
fn least_squares_through_noisy_points() {
    use approx::assert_relative_eq;

    // Symmetric residuals around y = x^2 leave the fit unchanged.
    let x = [-2.0, -1.0, 0.0, 1.0, 2.0, -2.0, -1.0, 0.0, 1.0, 2.0];
    let y = [4.5, 1.5, 0.5, 1.5, 4.5, 3.5, 0.5, -0.5, 0.5, 3.5];
    let fit = fit_quadratic(&x, &y);
    assert_relative_eq!(fit.quadratic, 1.0, epsilon = 1e-12);
    assert_relative_eq!(fit.linear, 0.0, epsilon = 1e-12);
    assert_relative_eq!(fit.constant, 0.0, epsilon = 1e-12);
}

#[test]
fn pivoting_handles_zero_leading_entry() {
    let a = [[0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]];
    let x = solve(a, [2.0, 3.0, 4.0]).unwrap();
    assert_eq!(x, [3.0, 2.0, 4.0]);
}

#[test]
fn two_distinct_prices_fall_back_to_line() {
    use approx::assert_relative_eq;

    let x = [1.0, 1.0, 2.0, 2.0];
    let y = [1.0, 3.0, 5.0, 7.0];
    let fit = fit_quadratic(&x, &y);
    assert_eq!(fit.degree, 1);
    assert_eq!(fit.quadratic, 0.0);
    assert_relative_eq!(fit.linear, 4.0, epsilon = 1e-12);
    assert_relative_eq!(fit.constant, -2.0, epsilon = 1e-12);
}

#[test]
fn identical_prices_fall_back_to_mean() {
    let x = [35.0; 4];
    let y = [1.0, 2.0, 3.0, 6.0];
    let fit = fit_quadratic(&x, &y);
    assert_eq!(fit.degree, 0);
    assert_eq!(fit.eval(35.0), 3.0);
    assert!(fit.eval(10.0).is_finite());
}

#[test]
fn single_observation_is_constant() {
    let fit = fit_quadratic(&[30.0], &[4.0]);
    assert_eq!(fit.degree, 0);
    assert_eq!(fit.constant, 4.0);
}
