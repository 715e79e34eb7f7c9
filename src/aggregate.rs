use std::path::Path;

use polars::prelude::*;
use serde::Serialize;

use crate::error::Result;
use crate::frame;
use crate::kpi::{CLAIM_SEVERITY, HAS_CLAIM, LOSS_RATIO, MARGIN, POLICY_ID};
use crate::types::{GroupKey, format_number};

pub const DEFAULT_MIN_COUNT: usize = 30;

/// Per-group KPI summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupAggregate {
    pub group: GroupKey,
    /// Distinct `PolicyID`s when that column exists, otherwise the row count.
    pub n_policies: usize,
    pub n_claims: usize,
    pub mean_claim_severity: Option<f64>,
    pub mean_lossratio: Option<f64>,
    pub mean_margin: Option<f64>,
    /// `n_claims / n_policies`. Can exceed 1.0 when claims are recorded per
    /// claim rather than per policy and `n_policies` counts distinct IDs.
    pub claim_freq: f64,
}

/// Aggregate KPIs by `group_col` over a KPI-derived frame.
///
/// Groups with fewer than `min_count` policies are dropped; the rest are
/// returned largest first, ties in ascending key order.
pub fn agg_by_group(df: &DataFrame, group_col: &str, min_count: usize) -> Result<Vec<GroupAggregate>> {
    frame::require(df, group_col)?;
    for kpi in [HAS_CLAIM, CLAIM_SEVERITY, LOSS_RATIO, MARGIN] {
        frame::require(df, kpi)?;
    }
    let n_policies = if df.column(POLICY_ID).is_ok() {
        col(POLICY_ID).drop_nulls().n_unique()
    } else {
        col(HAS_CLAIM).count()
    };
    let number = |name: &str| col(name).cast(DataType::Float64);

    let grouped = df
        .clone()
        .lazy()
        .filter(col(group_col).is_not_null())
        .group_by([col(group_col)])
        .agg([
            n_policies.cast(DataType::Float64).alias("n_policies"),
            number(HAS_CLAIM).sum().alias("n_claims"),
            number(CLAIM_SEVERITY).mean().alias("mean_claim_severity"),
            number(LOSS_RATIO).mean().alias("mean_lossratio"),
            number(MARGIN).mean().alias("mean_margin"),
        ])
        .collect()?;

    let kept = grouped
        .clone()
        .lazy()
        .filter(col("n_policies").gt_eq(lit(min_count as f64)))
        .sort(
            [PlSmallStr::from("n_policies"), PlSmallStr::from(group_col)],
            SortMultipleOptions::default().with_order_descending_multi([true, false]),
        )
        .collect()?;
    if kept.height() < grouped.height() {
        log::debug!(
            "agg_by_group({group_col}): dropped {} group(s) below {min_count} policies",
            grouped.height() - kept.height()
        );
    }

    let keys = frame::keys(kept.column(group_col)?)?;
    let stat = |name: &str| -> Result<Vec<Option<f64>>> { frame::f64_values(kept.column(name)?) };
    let (policies, claims) = (stat("n_policies")?, stat("n_claims")?);
    let (severity, loss_ratio, margin) = (stat("mean_claim_severity")?, stat("mean_lossratio")?, stat("mean_margin")?);

    Ok(keys
        .into_iter()
        .enumerate()
        .filter_map(|(i, group)| {
            let n_policies = policies[i].unwrap_or(0.0) as usize;
            let n_claims = claims[i].unwrap_or(0.0).round() as usize;
            Some(GroupAggregate {
                group: group?,
                n_policies,
                n_claims,
                mean_claim_severity: severity[i],
                mean_lossratio: loss_ratio[i],
                mean_margin: margin[i],
                claim_freq: n_claims as f64 / n_policies as f64,
            })
        })
        .collect())
}

/// Write aggregates as CSV, one row per group.
pub fn write_aggregates<P: AsRef<Path>>(path: P, groups: &[GroupAggregate]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path.as_ref())?;
    writer.write_record([
        "group",
        "n_policies",
        "n_claims",
        "mean_claim_severity",
        "mean_lossratio",
        "mean_margin",
        "claim_freq",
    ])?;
    let opt = |v: Option<f64>| v.map(format_number).unwrap_or_default();
    for g in groups {
        writer.write_record([
            g.group.to_string(),
            g.n_policies.to_string(),
            g.n_claims.to_string(),
            opt(g.mean_claim_severity),
            opt(g.mean_lossratio),
            opt(g.mean_margin),
            format_number(g.claim_freq),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use polars::df;

    use super::*;
    use crate::kpi::{TOTAL_CLAIMS, TOTAL_PREMIUM, prepare_kpis};

    /// `n` policies in `province`, the first `claims` of which claimed 100 on
    /// a premium of 200.
    fn rows(province: &str, n: usize, claims: usize, first_id: usize) -> Vec<(f64, String, f64, f64)> {
        (0..n)
            .map(|i| {
                let claim = if i < claims { 100.0 } else { 0.0 };
                ((first_id + i) as f64, province.to_string(), claim, 200.0)
            })
            .collect()
    }

    fn table(records: Vec<(f64, String, f64, f64)>, with_ids: bool) -> DataFrame {
        let province: Vec<&str> = records.iter().map(|r| r.1.as_str()).collect();
        let claims: Vec<f64> = records.iter().map(|r| r.2).collect();
        let premium: Vec<f64> = records.iter().map(|r| r.3).collect();
        let mut df = df!("Province" => province, TOTAL_CLAIMS => claims, TOTAL_PREMIUM => premium).unwrap();
        if with_ids {
            let ids: Vec<i64> = records.iter().map(|r| r.0 as i64).collect();
            df.with_column(Series::new(POLICY_ID.into(), ids)).unwrap();
        }
        prepare_kpis(&df).unwrap()
    }

    #[test]
    fn filters_and_sorts_by_policy_count() {
        let mut records = rows("Gauteng", 40, 4, 0);
        records.extend(rows("Limpopo", 10, 5, 1_000));
        records.extend(rows("Western Cape", 60, 3, 2_000));
        let groups = agg_by_group(&table(records, true), "Province", 30).unwrap();

        let names: Vec<String> = groups.iter().map(|g| g.group.to_string()).collect();
        assert_eq!(names, vec!["Western Cape", "Gauteng"]);
        assert!(groups.iter().all(|g| g.n_policies >= 30));

        let gauteng = &groups[1];
        assert_eq!(gauteng.n_policies, 40);
        assert_eq!(gauteng.n_claims, 4);
        assert!((gauteng.claim_freq - 0.1).abs() < 1e-12);
        assert_eq!(gauteng.mean_claim_severity, Some(100.0));
        assert!((gauteng.mean_lossratio.unwrap() - 0.05).abs() < 1e-12);
        assert!((gauteng.mean_margin.unwrap() - 190.0).abs() < 1e-12);
    }

    #[test]
    fn group_without_claims_has_undefined_severity() {
        let groups = agg_by_group(&table(rows("Free State", 5, 0, 0), true), "Province", 1).unwrap();
        assert_eq!(groups[0].mean_claim_severity, None);
        assert_eq!(groups[0].claim_freq, 0.0);
    }

    #[test]
    fn falls_back_to_row_count_without_policy_ids() {
        let groups = agg_by_group(&table(rows("Gauteng", 35, 7, 0), false), "Province", 30).unwrap();
        assert_eq!(groups[0].n_policies, 35);
        assert!(groups[0].n_claims <= groups[0].n_policies);
    }

    #[test]
    fn duplicate_policy_ids_can_push_frequency_above_one() {
        // Three claim rows recorded against the same policy.
        let records = vec![
            (1.0, "Gauteng".to_string(), 10.0, 50.0),
            (1.0, "Gauteng".to_string(), 20.0, 50.0),
            (1.0, "Gauteng".to_string(), 30.0, 50.0),
        ];
        let groups = agg_by_group(&table(records, true), "Province", 1).unwrap();
        assert_eq!(groups[0].n_policies, 1);
        assert_eq!(groups[0].n_claims, 3);
        assert_eq!(groups[0].claim_freq, 3.0);
    }

    #[test]
    fn equal_sizes_keep_ascending_key_order() {
        let df = df!(
            "Province" => &[Some("Limpopo"), Some("Limpopo"), Some("Gauteng"), Some("Gauteng"), None],
            TOTAL_CLAIMS => &[0.0, 5.0, 0.0, 0.0, 1.0],
            TOTAL_PREMIUM => &[10.0; 5],
        )
        .unwrap();
        let groups = agg_by_group(&prepare_kpis(&df).unwrap(), "Province", 1).unwrap();
        let names: Vec<String> = groups.iter().map(|g| g.group.to_string()).collect();
        // the row without a province belongs to no group
        assert_eq!(names, vec!["Gauteng", "Limpopo"]);
        assert_eq!((groups[1].n_policies, groups[1].n_claims), (2, 1));
    }

    #[test]
    fn missing_group_column_is_an_error() {
        let df = table(rows("Gauteng", 2, 1, 0), true);
        assert!(matches!(agg_by_group(&df, "Region", 1), Err(crate::error::Error::ColumnNotFound(c)) if c == "Region"));
    }

    #[test]
    fn write_aggregates_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("group_kpis.csv");
        let groups = agg_by_group(&table(rows("Gauteng", 2, 1, 0), true), "Province", 1).unwrap();
        write_aggregates(&path, &groups).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "group,n_policies,n_claims,mean_claim_severity,mean_lossratio,mean_margin,claim_freq"
        );
        assert_eq!(lines.next().unwrap(), "Gauteng,2,1,100,0.25,150,0.5");
    }
}
