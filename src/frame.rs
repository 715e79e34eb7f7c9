use std::collections::BTreeMap;

use polars::prelude::{Column, DataFrame, DataType};

use crate::error::{Error, Result};
use crate::types::GroupKey;

pub fn is_numeric(dtype: &DataType) -> bool {
    matches!(
        dtype,
        DataType::Float64
            | DataType::Float32
            | DataType::Int64
            | DataType::Int32
            | DataType::UInt64
            | DataType::UInt32
    )
}

/// pandas-style dtype label used in overviews.
pub fn dtype_label(dtype: &DataType) -> String {
    match dtype {
        DataType::Float64 | DataType::Float32 => "float64".to_string(),
        DataType::Int64 | DataType::Int32 => "int64".to_string(),
        DataType::UInt64 | DataType::UInt32 => "uint64".to_string(),
        DataType::Boolean => "bool".to_string(),
        DataType::String => "object".to_string(),
        other => other.to_string(),
    }
}

pub fn require<'a>(df: &'a DataFrame, name: &str) -> Result<&'a Column> {
    df.column(name).map_err(|_| Error::ColumnNotFound(name.to_string()))
}

/// Values of `column` as `f64`. Cells that do not parse, and NaN, become `None`.
pub fn f64_values(column: &Column) -> Result<Vec<Option<f64>>> {
    let cast = column.cast(&DataType::Float64)?;
    let values = cast.as_materialized_series().f64()?;
    Ok(values.into_iter().map(|v| v.filter(|x| !x.is_nan())).collect())
}

pub fn numeric(df: &DataFrame, name: &str) -> Result<Vec<Option<f64>>> {
    f64_values(require(df, name)?)
}

/// Grouping keys of `column`: numbers for numeric columns, text otherwise.
pub fn keys(column: &Column) -> Result<Vec<Option<GroupKey>>> {
    if is_numeric(column.dtype()) {
        return Ok(f64_values(column)?.into_iter().map(|v| v.map(GroupKey::Number)).collect());
    }
    let text = column.cast(&DataType::String)?;
    let values = text.as_materialized_series().str()?;
    Ok(values.into_iter().map(|v| v.map(GroupKey::from)).collect())
}

/// Build a key of `column`'s type from user input (e.g. a CLI argument).
pub fn key_from_str(column: &Column, raw: &str) -> GroupKey {
    if is_numeric(column.dtype()) {
        if let Some(v) = raw.trim().parse::<f64>().ok().filter(|v| !v.is_nan()) {
            return GroupKey::Number(v);
        }
    }
    GroupKey::Text(raw.to_string())
}

/// `true` for every missing cell of `column`.
pub fn null_mask(column: &Column) -> Vec<bool> {
    column.as_materialized_series().is_null().into_iter().map(|v| v == Some(true)).collect()
}

/// Row indices per distinct value of `name`, in ascending key order.
/// Rows with a missing key are left out.
pub fn group_rows(df: &DataFrame, name: &str) -> Result<BTreeMap<GroupKey, Vec<usize>>> {
    let mut groups: BTreeMap<GroupKey, Vec<usize>> = BTreeMap::new();
    for (row, key) in keys(require(df, name)?)?.into_iter().enumerate() {
        if let Some(key) = key {
            groups.entry(key).or_default().push(row);
        }
    }
    Ok(groups)
}

/// Defined values of `value_col` per group of `group_col`, in ascending key
/// order. Groups whose values are all missing keep an empty sample.
pub fn group_values(df: &DataFrame, group_col: &str, value_col: &str) -> Result<BTreeMap<GroupKey, Vec<f64>>> {
    let values = numeric(df, value_col)?;
    Ok(group_rows(df, group_col)?
        .into_iter()
        .map(|(key, rows)| (key, rows.iter().filter_map(|&r| values[r]).collect()))
        .collect())
}

#[cfg(test)]
mod tests {
    use polars::df;

    use super::*;

    #[test]
    fn text_cells_coerce_to_numbers_or_missing() {
        let df = df!("TotalClaims" => &[Some("1.5"), Some("abc"), None, Some("3")]).unwrap();
        assert_eq!(numeric(&df, "TotalClaims").unwrap(), vec![Some(1.5), None, None, Some(3.0)]);
    }

    #[test]
    fn nan_counts_as_missing() {
        let df = df!("x" => &[1.0, f64::NAN]).unwrap();
        assert_eq!(numeric(&df, "x").unwrap(), vec![Some(1.0), None]);
    }

    #[test]
    fn group_rows_skips_missing_keys_and_sorts() {
        let df = df!("Province" => &[Some("Limpopo"), None, Some("Gauteng"), Some("Limpopo")]).unwrap();
        let groups = group_rows(&df, "Province").unwrap();
        let keys: Vec<String> = groups.keys().map(|k| k.to_string()).collect();
        assert_eq!(keys, vec!["Gauteng", "Limpopo"]);
        assert_eq!(groups[&GroupKey::from("Limpopo")], vec![0, 3]);
    }

    #[test]
    fn integer_columns_group_by_number() {
        let df = df!("PostalCode" => &[2000i64, 1400, 2000], "Margin" => &[Some(1.0), Some(2.0), None]).unwrap();
        let samples = group_values(&df, "PostalCode", "Margin").unwrap();
        assert_eq!(samples[&GroupKey::Number(1400.0)], vec![2.0]);
        assert_eq!(samples[&GroupKey::Number(2000.0)], vec![1.0]);

        let column = require(&df, "PostalCode").unwrap();
        assert_eq!(key_from_str(column, "2000"), GroupKey::Number(2000.0));
        assert_eq!(key_from_str(column, "Cape"), GroupKey::from("Cape"));
    }

    #[test]
    fn dtype_labels_follow_pandas() {
        let df = df!("a" => &[1.0], "b" => &["x"], "c" => &[1i64]).unwrap();
        let labels: Vec<String> = df.get_columns().iter().map(|c| dtype_label(c.dtype())).collect();
        assert_eq!(labels, vec!["float64", "object", "int64"]);
    }

    #[test]
    fn require_unknown_column_is_an_error() {
        let df = DataFrame::empty();
        assert!(matches!(require(&df, "nope"), Err(Error::ColumnNotFound(c)) if c == "nope"));
    }
}
