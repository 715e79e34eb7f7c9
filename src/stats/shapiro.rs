use std::f64::consts::{FRAC_1_SQRT_2, PI, SQRT_2};

use statrs::function::erf::erfc_inv;

use super::{StatError, TestStatistic, normal_sf};

const MAX_N: usize = 5_000;

const C1: [f64; 6] = [0.0, 0.221157, -0.147981, -2.071190, 4.434685, -2.706056];
const C2: [f64; 6] = [0.0, 0.042981, -0.293762, -1.752461, 5.682633, -3.582633];
const C3: [f64; 4] = [0.5440, -0.39978, 0.025054, -6.714e-4];
const C4: [f64; 4] = [1.3822, -0.77857, 0.062767, -0.0020322];
const C5: [f64; 4] = [-1.5861, -0.31082, -0.083751, 0.0038915];
const C6: [f64; 3] = [-0.4803, -0.082676, 0.0030302];
const G: [f64; 2] = [-2.273, 0.459];

/// Evaluate `c[0] + c[1] x + c[2] x² + …`.
fn poly(c: &[f64], x: f64) -> f64 {
    c.iter().rev().fold(0.0, |acc, &ci| acc * x + ci)
}

fn normal_quantile(p: f64) -> f64 {
    -SQRT_2 * erfc_inv(2.0 * p)
}

/// Weights `a[0] >= a[1] >= …` applied to `x(n-i) - x(i+1)`.
fn coefficients(n: usize) -> Vec<f64> {
    let half = n / 2;
    if n == 3 {
        return vec![FRAC_1_SQRT_2];
    }

    let nf = n as f64;
    let m: Vec<f64> = (1..=half).map(|i| normal_quantile((i as f64 - 0.375) / (nf + 0.25))).collect();
    let summ2 = 2.0 * m.iter().map(|v| v * v).sum::<f64>();
    let ssumm2 = summ2.sqrt();
    let rsn = 1.0 / nf.sqrt();

    let a1 = poly(&C1, rsn) - m[0] / ssumm2;
    let mut a = vec![0.0; half];
    a[0] = a1;

    let (first, fac) = if n > 5 {
        let a2 = -m[1] / ssumm2 + poly(&C2, rsn);
        a[1] = a2;
        let fac = ((summ2 - 2.0 * m[0].powi(2) - 2.0 * m[1].powi(2))
            / (1.0 - 2.0 * a1.powi(2) - 2.0 * a2.powi(2)))
        .sqrt();
        (2, fac)
    } else {
        let fac = ((summ2 - 2.0 * m[0].powi(2)) / (1.0 - 2.0 * a1.powi(2))).sqrt();
        (1, fac)
    };
    for i in first..half {
        a[i] = -m[i] / fac;
    }
    a
}

fn pvalue(w: f64, n: usize) -> f64 {
    if n == 3 {
        // exact for n = 3; W is bounded below by 0.75
        let p = 6.0 / PI * (w.sqrt().asin() - PI / 3.0);
        return p.clamp(0.0, 1.0);
    }
    if w >= 1.0 {
        return 1.0;
    }

    let nf = n as f64;
    let w1 = (1.0 - w).ln();
    if n <= 11 {
        let gamma = poly(&G, nf);
        if w1 >= gamma {
            return 1e-99;
        }
        let y = -(gamma - w1).ln();
        let m = poly(&C3, nf);
        let s = poly(&C4, nf).exp();
        normal_sf((y - m) / s)
    } else {
        let ln_n = nf.ln();
        let m = poly(&C5, ln_n);
        let s = poly(&C6, ln_n).exp();
        normal_sf((w1 - m) / s)
    }
}

/// Shapiro-Wilk test of the hypothesis that `x` was drawn from a normal
/// distribution, using Royston's AS R94 approximation. Needs 3..=5000
/// observations that are not all equal and whose sum of squares is finite.
pub fn shapiro_wilk(x: &[f64]) -> Result<TestStatistic, StatError> {
    let n = x.len();
    if n < 3 {
        return Err(StatError::TooFew { needed: 3, got: n });
    }
    if n > MAX_N {
        return Err(StatError::Distribution(format!(
            "Shapiro-Wilk approximation is valid up to {MAX_N} observations, got {n}"
        )));
    }

    let mut sorted = x.to_vec();
    sorted.sort_by(f64::total_cmp);
    let range = sorted[n - 1] - sorted[0];
    if !(range > 1e-19) {
        return Err(StatError::Identical);
    }

    let a = coefficients(n);
    let mean = sorted.iter().sum::<f64>() / n as f64;
    let ss: f64 = sorted.iter().map(|v| (v - mean).powi(2)).sum();
    let b: f64 = a.iter().enumerate().map(|(i, ai)| ai * (sorted[n - 1 - i] - sorted[i])).sum();
    let w = b * b / ss;
    if !ss.is_finite() || !w.is_finite() {
        return Err(StatError::NonFinite);
    }
    let w = w.min(1.0);

    Ok(TestStatistic { statistic: w, pvalue: pvalue(w, n) })
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;
    use rand_distr::{Distribution, Exp, Normal};

    use super::*;

    #[test]
    fn weights_are_normalised() {
        for n in [3, 4, 5, 6, 11, 12, 50, 501] {
            let a = coefficients(n);
            let sum_sq = 2.0 * a.iter().map(|v| v * v).sum::<f64>();
            assert!((sum_sq - 1.0).abs() < 1e-6, "n = {n}: Σa² = {sum_sq}");
            assert!(a.windows(2).all(|w| w[0] >= w[1]), "n = {n}: weights not decreasing");
        }
    }

    #[test]
    fn skewed_sample_is_rejected() {
        let x = [148.0, 154.0, 158.0, 160.0, 161.0, 162.0, 166.0, 170.0, 182.0, 195.0, 236.0];
        let r = shapiro_wilk(&x).unwrap();
        assert!((r.statistic - 0.789).abs() < 0.01, "W = {}", r.statistic);
        assert!(r.pvalue < 0.01, "p = {}", r.pvalue);
    }

    #[test]
    fn normal_sample_is_not_rejected() {
        let mut rng = ChaCha20Rng::seed_from_u64(7);
        let normal = Normal::new(100.0, 15.0).unwrap();
        let x: Vec<f64> = (0..200).map(|_| normal.sample(&mut rng)).collect();
        let r = shapiro_wilk(&x).unwrap();
        assert!(r.statistic > 0.97, "W = {}", r.statistic);
        assert!(r.pvalue > 0.001, "p = {}", r.pvalue);
    }

    #[test]
    fn exponential_sample_is_rejected() {
        let mut rng = ChaCha20Rng::seed_from_u64(7);
        let exp = Exp::new(1.0).unwrap();
        let x: Vec<f64> = (0..200).map(|_| exp.sample(&mut rng)).collect();
        assert!(shapiro_wilk(&x).unwrap().pvalue < 1e-6);
    }

    #[test]
    fn three_points_use_exact_distribution() {
        // equally spaced points give the maximum W = 1
        let r = shapiro_wilk(&[1.0, 2.0, 3.0]).unwrap();
        assert!((r.statistic - 1.0).abs() < 1e-12);
        assert!((r.pvalue - 1.0).abs() < 1e-9);
    }

    #[test]
    fn degenerate_inputs_are_errors() {
        assert_eq!(shapiro_wilk(&[1.0, 2.0]), Err(StatError::TooFew { needed: 3, got: 2 }));
        assert_eq!(shapiro_wilk(&[4.0; 10]), Err(StatError::Identical));
    }

    #[test]
    fn overflowing_sum_of_squares_is_an_error() {
        let x = [1e200, -3e200, 2e200, 5e199, -1e200];
        assert_eq!(shapiro_wilk(&x), Err(StatError::NonFinite));
        assert_eq!(shapiro_wilk(&[1.0, f64::INFINITY, 3.0, 4.0]), Err(StatError::NonFinite));
    }
}
