use polars::prelude::*;

use crate::error::Result;
use crate::frame;

pub const POLICY_ID: &str = "PolicyID";
pub const TOTAL_CLAIMS: &str = "TotalClaims";
pub const TOTAL_PREMIUM: &str = "TotalPremium";
pub const HAS_CLAIM: &str = "HasClaim";
pub const CLAIM_SEVERITY: &str = "ClaimSeverity";
pub const LOSS_RATIO: &str = "LossRatio";
pub const MARGIN: &str = "Margin";

/// The four per-policy KPIs. `None` marks an undefined value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Kpis {
    pub has_claim: bool,
    pub claim_severity: Option<f64>,
    pub loss_ratio: Option<f64>,
    pub margin: Option<f64>,
}

/// Derive the KPIs of one policy from its (already coerced) claims and premium.
pub fn derive(claims: Option<f64>, premium: Option<f64>) -> Kpis {
    let has_claim = claims.is_some_and(|c| c > 0.0);
    let claim_severity = if has_claim { claims } else { None };
    let loss_ratio = match (claims, premium) {
        (Some(c), Some(p)) if p > 0.0 => Some(c / p),
        _ => None,
    };
    let margin = match (claims, premium) {
        (Some(c), Some(p)) => Some(p - c),
        _ => None,
    };
    Kpis { has_claim, claim_severity, loss_ratio, margin }
}

/// Return a copy of `df` with `TotalClaims`/`TotalPremium` coerced to
/// numeric and the KPI columns `HasClaim`, `ClaimSeverity`, `LossRatio` and
/// `Margin` appended (or overwritten when already present).
///
/// Rows are neither dropped nor reordered. The per-row rule is [`derive`].
pub fn prepare_kpis(df: &DataFrame) -> Result<DataFrame> {
    frame::require(df, TOTAL_CLAIMS)?;
    frame::require(df, TOTAL_PREMIUM)?;

    let as_number = |name: &str| col(name).cast(DataType::Float64).fill_nan(lit(NULL)).alias(name);
    let claims = || col(TOTAL_CLAIMS);
    let premium = || col(TOTAL_PREMIUM);
    let claimed = || claims().gt(lit(0.0)).fill_null(lit(false));

    let out = df
        .clone()
        .lazy()
        .with_columns([as_number(TOTAL_CLAIMS), as_number(TOTAL_PREMIUM)])
        .with_columns([
            claimed().cast(DataType::Float64).alias(HAS_CLAIM),
            when(claimed()).then(claims()).otherwise(lit(NULL)).alias(CLAIM_SEVERITY),
            when(premium().gt(lit(0.0)))
                .then(claims() / premium())
                .otherwise(lit(NULL))
                .alias(LOSS_RATIO),
            (premium() - claims()).alias(MARGIN),
        ])
        .collect()?;

    log::debug!("derived KPIs for {} policies", out.height());
    Ok(out)
}
