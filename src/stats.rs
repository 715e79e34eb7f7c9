use statrs::distribution::{ChiSquared, ContinuousCDF, StudentsT};
use statrs::function::erf::erfc;
use thiserror::Error;

mod shapiro;

pub use shapiro::shapiro_wilk;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StatError {
    #[error("need at least {needed} observations, got {got}")]
    TooFew { needed: usize, got: usize },

    #[error("all values are identical")]
    Identical,

    #[error("the table of expected frequencies has a zero element")]
    ZeroExpected,

    #[error("invalid distribution parameter: {0}")]
    Distribution(String),

    #[error("statistic is not finite for this sample")]
    NonFinite,
}

/// Statistic and p-value of a single test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TestStatistic {
    pub statistic: f64,
    pub pvalue: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Chi2Contingency {
    pub statistic: f64,
    pub pvalue: f64,
    pub dof: usize,
    pub expected: Vec<Vec<f64>>,
}

/// Upper tail of the standard normal distribution.
pub fn normal_sf(z: f64) -> f64 {
    0.5 * erfc(z / std::f64::consts::SQRT_2)
}

pub fn chi2_sf(x: f64, dof: f64) -> Result<f64, StatError> {
    let dist = ChiSquared::new(dof).map_err(|e| StatError::Distribution(e.to_string()))?;
    Ok(dist.sf(x))
}

fn mean_var(x: &[f64]) -> (f64, f64) {
    let n = x.len() as f64;
    let mean = x.iter().sum::<f64>() / n;
    let var = x.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, var)
}

/// 1-based ranks with ties sharing their average rank, plus the size of every
/// tie block (blocks of one are omitted).
pub fn rank_average(values: &[f64]) -> (Vec<f64>, Vec<usize>) {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut ranks = vec![0.0; values.len()];
    let mut ties = Vec::new();
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && values[order[end]] == values[order[start]] {
            end += 1;
        }
        // positions start..end hold ranks start+1..=end
        let avg = (start + 1 + end) as f64 / 2.0;
        for &idx in &order[start..end] {
            ranks[idx] = avg;
        }
        if end - start > 1 {
            ties.push(end - start);
        }
        start = end;
    }
    (ranks, ties)
}

fn tie_term(ties: &[usize]) -> f64 {
    ties.iter().map(|&t| (t * t * t - t) as f64).sum()
}

/// Chi-square test of independence on an r×c table of observed counts.
///
/// With one degree of freedom and `correction` set, Yates' continuity
/// correction moves each observed count up to 0.5 towards its expectation.
pub fn chi2_contingency(observed: &[Vec<f64>], correction: bool) -> Result<Chi2Contingency, StatError> {
    let n_rows = observed.len();
    let n_cols = observed.first().map_or(0, Vec::len);
    if n_rows == 0 || n_cols == 0 {
        return Err(StatError::TooFew { needed: 1, got: 0 });
    }

    let row_sums: Vec<f64> = observed.iter().map(|r| r.iter().sum()).collect();
    let col_sums: Vec<f64> = (0..n_cols).map(|j| observed.iter().map(|r| r[j]).sum()).collect();
    let total: f64 = row_sums.iter().sum();

    let expected: Vec<Vec<f64>> = row_sums
        .iter()
        .map(|&rs| col_sums.iter().map(|&cs| rs * cs / total).collect())
        .collect();
    if expected.iter().flatten().any(|&e| e == 0.0 || e.is_nan()) {
        return Err(StatError::ZeroExpected);
    }

    let dof = (n_rows - 1) * (n_cols - 1);
    if dof == 0 {
        return Ok(Chi2Contingency { statistic: 0.0, pvalue: 1.0, dof, expected });
    }

    let yates = correction && dof == 1;
    let mut statistic = 0.0;
    for (obs_row, exp_row) in observed.iter().zip(&expected) {
        for (&o, &e) in obs_row.iter().zip(exp_row) {
            let mut o = o;
            if yates {
                let diff = e - o;
                o += diff.signum() * diff.abs().min(0.5);
            }
            statistic += (o - e).powi(2) / e;
        }
    }

    let pvalue = chi2_sf(statistic, dof as f64)?;
    Ok(Chi2Contingency { statistic, pvalue, dof, expected })
}

/// Two-sided z-test for equality of two proportions using the pooled
/// proportion for the standard error.
pub fn proportions_ztest(count: [f64; 2], nobs: [f64; 2]) -> TestStatistic {
    let p1 = count[0] / nobs[0];
    let p2 = count[1] / nobs[1];
    let pooled = (count[0] + count[1]) / (nobs[0] + nobs[1]);
    let std = (pooled * (1.0 - pooled) * (1.0 / nobs[0] + 1.0 / nobs[1])).sqrt();
    let statistic = (p1 - p2) / std;
    TestStatistic { statistic, pvalue: 2.0 * normal_sf(statistic.abs()) }
}

/// Kruskal-Wallis H-test across any number of independent samples.
pub fn kruskal(samples: &[&[f64]]) -> Result<TestStatistic, StatError> {
    if samples.len() < 2 {
        return Err(StatError::TooFew { needed: 2, got: samples.len() });
    }
    if let Some(empty) = samples.iter().find(|s| s.is_empty()) {
        return Err(StatError::TooFew { needed: 1, got: empty.len() });
    }

    let pooled: Vec<f64> = samples.iter().flat_map(|s| s.iter().copied()).collect();
    let n = pooled.len() as f64;
    let (ranks, ties) = rank_average(&pooled);

    let mut offset = 0;
    let mut sum_sq = 0.0;
    for sample in samples {
        let rank_sum: f64 = ranks[offset..offset + sample.len()].iter().sum();
        sum_sq += rank_sum * rank_sum / sample.len() as f64;
        offset += sample.len();
    }

    let correction = 1.0 - tie_term(&ties) / (n * n * n - n);
    if correction == 0.0 {
        return Err(StatError::Identical);
    }
    let h = (12.0 / (n * (n + 1.0)) * sum_sq - 3.0 * (n + 1.0)) / correction;
    let pvalue = chi2_sf(h, (samples.len() - 1) as f64)?;
    Ok(TestStatistic { statistic: h, pvalue })
}

/// Welch's unequal-variance t-test, two-sided.
pub fn welch_ttest(a: &[f64], b: &[f64]) -> Result<TestStatistic, StatError> {
    for s in [a, b] {
        if s.len() < 2 {
            return Err(StatError::TooFew { needed: 2, got: s.len() });
        }
    }
    let (na, nb) = (a.len() as f64, b.len() as f64);
    let (mean_a, var_a) = mean_var(a);
    let (mean_b, var_b) = mean_var(b);

    let se_a = var_a / na;
    let se_b = var_b / nb;
    let statistic = (mean_a - mean_b) / (se_a + se_b).sqrt();
    let df = (se_a + se_b).powi(2) / (se_a.powi(2) / (na - 1.0) + se_b.powi(2) / (nb - 1.0));

    let dist = StudentsT::new(0.0, 1.0, df).map_err(|e| StatError::Distribution(e.to_string()))?;
    Ok(TestStatistic { statistic, pvalue: 2.0 * dist.sf(statistic.abs()) })
}

/// P(U >= u) under the null for samples of size `m` and `n` without ties.
///
/// The counts of arrangements per U value are the coefficients of the
/// Gaussian binomial `[m+n choose m]_q`, built one factor at a time.
fn mann_whitney_exact_sf(u: f64, m: usize, n: usize) -> f64 {
    let (small, large) = (m.min(n), m.max(n));
    let max_u = small * large;
    let mut counts = vec![0.0f64; max_u + 1];
    counts[0] = 1.0;
    for i in 1..=small {
        let up = large + i;
        for k in (up..=max_u).rev() {
            counts[k] -= counts[k - up];
        }
        for k in i..=max_u {
            counts[k] += counts[k - i];
        }
    }
    let total: f64 = counts.iter().sum();
    let from = u.ceil().max(0.0) as usize;
    if from > max_u {
        return 0.0;
    }
    counts[from..].iter().sum::<f64>() / total
}

/// Two-sided Mann-Whitney U test. The statistic is U of the first sample.
///
/// The exact null distribution is used unless both samples have more than 8
/// observations or the pooled data contain ties; otherwise the normal
/// approximation with tie and continuity corrections applies.
pub fn mann_whitney_u(a: &[f64], b: &[f64]) -> Result<TestStatistic, StatError> {
    for s in [a, b] {
        if s.is_empty() {
            return Err(StatError::TooFew { needed: 1, got: 0 });
        }
    }
    let (n1, n2) = (a.len(), b.len());
    let pooled: Vec<f64> = a.iter().chain(b).copied().collect();
    let (ranks, ties) = rank_average(&pooled);

    let r1: f64 = ranks[..n1].iter().sum();
    let (f1, f2) = (n1 as f64, n2 as f64);
    let u1 = r1 - f1 * (f1 + 1.0) / 2.0;
    let u2 = f1 * f2 - u1;
    let u = u1.max(u2);

    let exact = !(n1 > 8 && n2 > 8) && ties.is_empty();
    let one_sided = if exact {
        mann_whitney_exact_sf(u, n1, n2)
    } else {
        let n = f1 + f2;
        let mu = f1 * f2 / 2.0;
        let s = (f1 * f2 / 12.0 * ((n + 1.0) - tie_term(&ties) / (n * (n - 1.0)))).sqrt();
        normal_sf((u - mu - 0.5) / s)
    };

    Ok(TestStatistic { statistic: u1, pvalue: (2.0 * one_sided).clamp(0.0, 1.0) })
}
