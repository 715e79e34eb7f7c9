use std::collections::BTreeMap;

use polars::prelude::*;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::config::TwoSampleConfig;
use crate::error::Error;
use crate::frame;
use crate::kpi::HAS_CLAIM;
use crate::stats::{self, StatError};
use crate::types::GroupKey;

pub const DEFAULT_ALPHA: f64 = 0.05;

/// Why a group comparison produced no result. Failed preconditions are
/// ordinary outcomes, reported next to the successful tests.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TestError {
    #[error("not enough groups with min_count")]
    NotEnoughGroups { groups: Vec<GroupKey> },

    #[error("groups not found or insufficient data")]
    GroupsNotFound { counts: BTreeMap<String, u64>, nobs: BTreeMap<String, u64> },

    #[error("not enough groups with required observations")]
    NotEnoughObservedGroups { groups_found: Vec<GroupKey> },

    #[error("too few observations")]
    TooFewObservations { n_a: usize, n_b: usize },

    #[error("column '{column}' not found")]
    MissingColumn { column: String },

    #[error("degenerate input: {reason}")]
    Degenerate { reason: String },
}

impl From<StatError> for TestError {
    fn from(err: StatError) -> Self {
        TestError::Degenerate { reason: err.to_string() }
    }
}

impl From<Error> for TestError {
    fn from(err: Error) -> Self {
        match err {
            Error::ColumnNotFound(column) => TestError::MissingColumn { column },
            other => TestError::Degenerate { reason: other.to_string() },
        }
    }
}

/// Serialized as `{"error": <message>, <context fields>...}`.
impl Serialize for TestError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("error", &self.to_string())?;
        match self {
            TestError::NotEnoughGroups { groups } => map.serialize_entry("groups", groups)?,
            TestError::GroupsNotFound { counts, nobs } => {
                map.serialize_entry("counts", counts)?;
                map.serialize_entry("nobs", nobs)?;
            }
            TestError::NotEnoughObservedGroups { groups_found } => {
                map.serialize_entry("groups_found", groups_found)?
            }
            TestError::TooFewObservations { n_a, n_b } => {
                map.serialize_entry("n_a", n_a)?;
                map.serialize_entry("n_b", n_b)?;
            }
            TestError::MissingColumn { column } => map.serialize_entry("column", column)?,
            TestError::Degenerate { .. } => {}
        }
        map.end()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChiSquareResult {
    pub statistic: f64,
    pub pvalue: f64,
    pub dof: usize,
    pub expected: Vec<Vec<f64>>,
    pub groups_used: Vec<GroupKey>,
    /// `[no_claim, claim]` per group, in `groups_used` order.
    pub contingency_table: Vec<[u64; 2]>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProportionZTestResult {
    pub statistic: f64,
    pub pvalue: f64,
    pub count: [u64; 2],
    pub nobs: [u64; 2],
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KruskalResult {
    pub statistic: f64,
    pub pvalue: f64,
    pub groups_used: Vec<GroupKey>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TwoSampleTest {
    Welch,
    MannWhitney,
}

impl TwoSampleTest {
    pub fn name(&self) -> &'static str {
        match self {
            TwoSampleTest::Welch => "t-test (Welch)",
            TwoSampleTest::MannWhitney => "Mann-Whitney U",
        }
    }
}

impl std::fmt::Display for TwoSampleTest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for TwoSampleTest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TwoSampleResult {
    pub test: TwoSampleTest,
    pub statistic: f64,
    pub pvalue: f64,
    pub n_a: usize,
    pub n_b: usize,
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// `(observations, claims)` per group over the rows with a defined `HasClaim`,
/// in ascending key order.
fn claim_counts(df: &DataFrame, group_col: &str) -> crate::error::Result<BTreeMap<GroupKey, (u64, u64)>> {
    frame::require(df, HAS_CLAIM)?;
    frame::require(df, group_col)?;
    let flag = || col(HAS_CLAIM).cast(DataType::Float64).fill_nan(lit(NULL));
    let counts = df
        .clone()
        .lazy()
        .filter(col(group_col).is_not_null())
        .group_by([col(group_col)])
        .agg([
            flag().count().cast(DataType::Float64).alias("nobs"),
            flag().sum().alias("claims"),
        ])
        .collect()?;

    let keys = frame::keys(counts.column(group_col)?)?;
    let nobs = frame::f64_values(counts.column("nobs")?)?;
    let claims = frame::f64_values(counts.column("claims")?)?;
    Ok(keys
        .into_iter()
        .zip(nobs.into_iter().zip(claims))
        .filter_map(|(key, (n, c))| Some((key?, (n.unwrap_or(0.0) as u64, c.unwrap_or(0.0).round() as u64))))
        .collect())
}

// ── Group comparisons ─────────────────────────────────────────────────────────

/// Chi-square test of independence between `group_col` and `HasClaim`,
/// over groups with at least `min_count` observations.
pub fn chi2_test_frequency(
    df: &DataFrame,
    group_col: &str,
    min_count: usize,
) -> Result<ChiSquareResult, TestError> {
    let mut groups_used = Vec::new();
    let mut contingency_table = Vec::new();
    for (group, (n, claims)) in claim_counts(df, group_col)? {
        if n as usize >= min_count {
            groups_used.push(group);
            contingency_table.push([n - claims, claims]);
        }
    }
    if groups_used.len() < 2 {
        log::warn!("chi2_test_frequency({group_col}): {} group(s) with >= {min_count} rows", groups_used.len());
        return Err(TestError::NotEnoughGroups { groups: groups_used });
    }

    let observed: Vec<Vec<f64>> =
        contingency_table.iter().map(|row| row.iter().map(|&v| v as f64).collect()).collect();
    let chi2 = stats::chi2_contingency(&observed, true)?;
    log::debug!("chi2_test_frequency({group_col}): {} groups, dof {}", groups_used.len(), chi2.dof);

    Ok(ChiSquareResult {
        statistic: chi2.statistic,
        pvalue: chi2.pvalue,
        dof: chi2.dof,
        expected: chi2.expected,
        groups_used,
        contingency_table,
    })
}

/// Two-sided pooled z-test of the claim frequency of `group_a` against
/// `group_b`. `count` and `nobs` follow ascending group order.
pub fn proportion_ztest_pair(
    df: &DataFrame,
    group_col: &str,
    group_a: &GroupKey,
    group_b: &GroupKey,
) -> Result<ProportionZTestResult, TestError> {
    let mut counts = BTreeMap::new();
    let mut nobs = BTreeMap::new();
    let mut pairs = Vec::with_capacity(2);
    for (group, (n, claims)) in claim_counts(df, group_col)? {
        if &group != group_a && &group != group_b {
            continue;
        }
        if n == 0 {
            continue;
        }
        counts.insert(group.to_string(), claims);
        nobs.insert(group.to_string(), n);
        pairs.push((claims, n));
    }

    let &[(c0, n0), (c1, n1)] = pairs.as_slice() else {
        return Err(TestError::GroupsNotFound { counts, nobs });
    };
    let z = stats::proportions_ztest([c0 as f64, c1 as f64], [n0 as f64, n1 as f64]);
    Ok(ProportionZTestResult { statistic: z.statistic, pvalue: z.pvalue, count: [c0, c1], nobs: [n0, n1] })
}

/// Kruskal-Wallis H-test of `numeric_col` across every group with at least
/// `min_count` defined values.
pub fn kruskal_test_numeric(
    df: &DataFrame,
    group_col: &str,
    numeric_col: &str,
    min_count: usize,
) -> Result<KruskalResult, TestError> {
    let mut groups_used = Vec::new();
    let mut samples = Vec::new();
    for (group, sample) in frame::group_values(df, group_col, numeric_col)? {
        if sample.len() >= min_count {
            groups_used.push(group);
            samples.push(sample);
        }
    }
    if samples.len() < 2 {
        log::warn!("kruskal_test_numeric({group_col}, {numeric_col}): {} usable group(s)", samples.len());
        return Err(TestError::NotEnoughObservedGroups { groups_found: groups_used });
    }

    let refs: Vec<&[f64]> = samples.iter().map(Vec::as_slice).collect();
    let h = stats::kruskal(&refs)?;
    Ok(KruskalResult { statistic: h.statistic, pvalue: h.pvalue, groups_used })
}

/// Shapiro-Wilk p-value above `alpha`, on a seeded subsample when the sample
/// is large. Any failure of the test counts as non-normal.
fn looks_normal(sample: &[f64], config: &TwoSampleConfig, rng: &mut ChaCha20Rng) -> bool {
    let subsample: Vec<f64> = if sample.len() > config.normality_max_sample {
        rand::seq::index::sample(rng, sample.len(), config.normality_max_sample)
            .into_iter()
            .map(|i| sample[i])
            .collect()
    } else {
        sample.to_vec()
    };
    match stats::shapiro_wilk(&subsample) {
        Ok(sw) => sw.pvalue > config.normality_alpha,
        Err(err) => {
            log::debug!("normality check failed ({err}); treating sample as non-normal");
            false
        }
    }
}

/// Compare `numeric_col` between two groups with Welch's t-test when both
/// samples look normal and are large enough, otherwise Mann-Whitney U.
pub fn ttest_or_mannwhitney(
    df: &DataFrame,
    group_col: &str,
    group_a: &GroupKey,
    group_b: &GroupKey,
    numeric_col: &str,
    config: &TwoSampleConfig,
) -> Result<TwoSampleResult, TestError> {
    let samples = frame::group_values(df, group_col, numeric_col)?;
    let sample = |key: &GroupKey| samples.get(key).cloned().unwrap_or_default();
    let a = sample(group_a);
    let b = sample(group_b);
    let (n_a, n_b) = (a.len(), b.len());
    if n_a < config.min_observations || n_b < config.min_observations {
        return Err(TestError::TooFewObservations { n_a, n_b });
    }

    let mut rng = ChaCha20Rng::seed_from_u64(config.subsample_seed);
    let normal = looks_normal(&a, config, &mut rng) && looks_normal(&b, config, &mut rng);
    let test = if normal && n_a >= config.min_parametric_n && n_b >= config.min_parametric_n {
        TwoSampleTest::Welch
    } else {
        TwoSampleTest::MannWhitney
    };
    log::info!("{numeric_col}: {group_a} (n={n_a}) vs {group_b} (n={n_b}) using {test}");

    let result = match test {
        TwoSampleTest::Welch => stats::welch_ttest(&a, &b)?,
        TwoSampleTest::MannWhitney => stats::mann_whitney_u(&a, &b)?,
    };
    Ok(TwoSampleResult { test, statistic: result.statistic, pvalue: result.pvalue, n_a, n_b })
}

pub fn ttest_or_mannwhitney_default(
    df: &DataFrame,
    group_col: &str,
    group_a: &GroupKey,
    group_b: &GroupKey,
    numeric_col: &str,
) -> Result<TwoSampleResult, TestError> {
    ttest_or_mannwhitney(df, group_col, group_a, group_b, numeric_col, &TwoSampleConfig::default())
}

// ── Reporting ─────────────────────────────────────────────────────────────────

/// Format like C's `%.{sig}g`: `sig` significant digits, trailing zeros
/// trimmed, scientific notation when the exponent is below -4 or at least
/// `sig`.
pub fn format_g(value: f64, sig: usize) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if value == 0.0 {
        return "0".to_string();
    }
    let sig = sig.max(1);
    let sci = format!("{:.*e}", sig - 1, value);
    let (mantissa, exp) = sci.split_once('e').unwrap_or((&sci, "0"));
    let exp: i32 = exp.parse().unwrap_or(0);

    if exp < -4 || exp >= sig as i32 {
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{}e{sign}{:02}", trim_fraction(mantissa), exp.abs())
    } else {
        let decimals = (sig as i32 - 1 - exp).max(0) as usize;
        trim_fraction(&format!("{value:.decimals$}")).to_string()
    }
}

fn trim_fraction(s: &str) -> &str {
    if s.contains('.') { s.trim_end_matches('0').trim_end_matches('.') } else { s }
}

pub fn pretty_interpret(pvalue: f64, alpha: f64) -> String {
    let p = format_g(pvalue, 4);
    if pvalue < alpha {
        format!("p = {p} < {alpha} -> Reject H0 (statistically significant)")
    } else {
        format!("p = {p} >= {alpha} -> Fail to reject H0 (not statistically significant)")
    }
}

/// JSON object for a test outcome: the result fields on success, `error`
/// plus context on failure.
pub fn report<T: Serialize>(outcome: &Result<T, TestError>) -> serde_json::Result<serde_json::Value> {
    match outcome {
        Ok(result) => serde_json::to_value(result),
        Err(err) => serde_json::to_value(err),
    }
}
