use std::fmt;
use std::path::Path;

use polars::prelude::*;
use rayon::prelude::*;

use crate::error::Result;
use crate::frame;
use crate::types::{GroupKey, format_number};

/// One line of the `--- INFO ---` section.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    pub dtype: String,
    pub non_null: usize,
    pub missing: usize,
}

/// Shape, columns, dtypes and missing counts of a table.
#[derive(Debug, Clone, PartialEq)]
pub struct Overview {
    pub shape: (usize, usize),
    pub columns: Vec<ColumnInfo>,
}

pub fn dataset_overview(df: &DataFrame) -> Overview {
    let columns = df
        .get_columns()
        .iter()
        .map(|column| ColumnInfo {
            name: column.name().to_string(),
            dtype: frame::dtype_label(column.dtype()),
            non_null: column.len() - column.null_count(),
            missing: column.null_count(),
        })
        .collect();
    Overview { shape: df.shape(), columns }
}

impl fmt::Display for Overview {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self.columns.iter().map(|c| c.name.len()).max().unwrap_or(0).max(6);

        writeln!(f, "--- SHAPE ---")?;
        writeln!(f, "({}, {})", self.shape.0, self.shape.1)?;

        writeln!(f, "\n--- COLUMNS ---")?;
        let names: Vec<String> = self.columns.iter().map(|c| format!("'{}'", c.name)).collect();
        writeln!(f, "[{}]", names.join(", "))?;

        writeln!(f, "\n--- INFO ---")?;
        writeln!(f, "RangeIndex: {} entries", self.shape.0)?;
        writeln!(f, "Data columns (total {} columns):", self.shape.1)?;
        writeln!(f, " {:>3}  {:<width$}  {:>14}  Dtype", "#", "Column", "Non-Null Count")?;
        for (i, c) in self.columns.iter().enumerate() {
            let non_null = format!("{} non-null", c.non_null);
            writeln!(f, " {i:>3}  {:<width$}  {non_null:>14}  {}", c.name, c.dtype)?;
        }

        writeln!(f, "\n--- MISSING VALUES ---")?;
        for c in &self.columns {
            writeln!(f, "{:<width$}  {}", c.name, c.missing)?;
        }
        Ok(())
    }
}

// ── Describe ──────────────────────────────────────────────────────────────────

/// `describe()` of one numeric column. Statistics are `None` when undefined
/// (no values, or a single value for `std`).
#[derive(Debug, Clone, PartialEq)]
pub struct NumericDescribe {
    pub column: String,
    pub count: usize,
    pub mean: Option<f64>,
    pub std: Option<f64>,
    pub min: Option<f64>,
    pub p25: Option<f64>,
    pub p50: Option<f64>,
    pub p75: Option<f64>,
    pub max: Option<f64>,
}

/// `describe()` of one text column: `top` is the most frequent value, ties
/// going to the value seen first.
#[derive(Debug, Clone, PartialEq)]
pub struct CategoricalDescribe {
    pub column: String,
    pub count: usize,
    pub unique: usize,
    pub top: Option<String>,
    pub freq: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NumericSummary(pub Vec<NumericDescribe>);

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CategoricalSummary(pub Vec<CategoricalDescribe>);

fn describe_numeric(df: &DataFrame, name: &str) -> Result<NumericDescribe> {
    let x = || col(name).cast(DataType::Float64).fill_nan(lit(NULL));
    let quantile = |q: f64, label: &str| x().quantile(lit(q), QuantileMethod::Linear).alias(label);
    let stats = df
        .clone()
        .lazy()
        .select([
            x().count().cast(DataType::Float64).alias("count"),
            x().mean().alias("mean"),
            x().std(1).alias("std"),
            x().min().alias("min"),
            quantile(0.25, "25%"),
            quantile(0.50, "50%"),
            quantile(0.75, "75%"),
            x().max().alias("max"),
        ])
        .collect()?;

    let stat = |label: &str| -> Result<Option<f64>> {
        Ok(frame::f64_values(stats.column(label)?)?.first().copied().flatten())
    };
    let count = stat("count")?.unwrap_or(0.0) as usize;
    Ok(NumericDescribe {
        column: name.to_string(),
        count,
        mean: stat("mean")?,
        std: if count > 1 { stat("std")? } else { None },
        min: stat("min")?,
        p25: stat("25%")?,
        p50: stat("50%")?,
        p75: stat("75%")?,
        max: stat("max")?,
    })
}

/// Non-missing values of `name` with their counts, most frequent first and
/// ties in order of first appearance.
pub fn value_counts(df: &DataFrame, name: &str) -> Result<Vec<(GroupKey, usize)>> {
    frame::require(df, name)?;
    let counts = df
        .clone()
        .lazy()
        .filter(col(name).is_not_null())
        .group_by_stable([col(name)])
        .agg([len().cast(DataType::Float64).alias("count")])
        .sort(
            [PlSmallStr::from("count")],
            SortMultipleOptions::default().with_order_descending(true).with_maintain_order(true),
        )
        .collect()?;

    let keys = frame::keys(counts.column(name)?)?;
    let freq = frame::f64_values(counts.column("count")?)?;
    Ok(keys
        .into_iter()
        .zip(freq)
        .filter_map(|(key, n)| Some((key?, n? as usize)))
        .collect())
}

fn describe_categorical(df: &DataFrame, name: &str) -> Result<CategoricalDescribe> {
    let counts = value_counts(df, name)?;
    let top = counts.first();
    Ok(CategoricalDescribe {
        column: name.to_string(),
        count: counts.iter().map(|c| c.1).sum(),
        unique: counts.len(),
        top: top.map(|t| t.0.to_string()),
        freq: top.map_or(0, |t| t.1),
    })
}

/// Describe every numeric and every text column, optionally writing
/// `numeric_summary.csv` and `categorical_summary.csv` into `save_dir`.
pub fn summary_statistics(
    df: &DataFrame,
    save_dir: Option<&Path>,
) -> Result<(NumericSummary, CategoricalSummary)> {
    let (numeric, categorical): (Vec<&Column>, Vec<&Column>) =
        df.get_columns().iter().partition(|c| frame::is_numeric(c.dtype()));

    let numeric = NumericSummary(
        numeric
            .par_iter()
            .map(|c| describe_numeric(df, c.name().as_str()))
            .collect::<Result<_>>()?,
    );
    let categorical = CategoricalSummary(
        categorical
            .par_iter()
            .map(|c| describe_categorical(df, c.name().as_str()))
            .collect::<Result<_>>()?,
    );

    if let Some(dir) = save_dir {
        std::fs::create_dir_all(dir)?;
        numeric.write_csv(dir.join("numeric_summary.csv"))?;
        categorical.write_csv(dir.join("categorical_summary.csv"))?;
        log::info!("Summary statistics saved to {}", dir.display());
    }
    Ok((numeric, categorical))
}

fn cell(v: Option<f64>) -> String {
    v.map(format_number).unwrap_or_default()
}

/// Statistics as rows, columns as columns, with an unnamed label column first.
fn write_describe<P: AsRef<Path>>(path: P, columns: &[&str], rows: Vec<(&str, Vec<String>)>) -> Result<()> {
    let mut writer = csv::Writer::from_path(path.as_ref())?;
    writer.write_record(std::iter::once("").chain(columns.iter().copied()))?;
    for (label, cells) in rows {
        writer.write_record(std::iter::once(label.to_string()).chain(cells))?;
    }
    writer.flush()?;
    Ok(())
}

impl NumericSummary {
    pub fn get(&self, column: &str) -> Option<&NumericDescribe> {
        self.0.iter().find(|d| d.column == column)
    }

    pub fn write_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let names: Vec<&str> = self.0.iter().map(|d| d.column.as_str()).collect();
        let row = |f: fn(&NumericDescribe) -> Option<f64>| -> Vec<String> {
            self.0.iter().map(|d| cell(f(d))).collect()
        };
        write_describe(
            path,
            &names,
            vec![
                ("count", self.0.iter().map(|d| d.count.to_string()).collect()),
                ("mean", row(|d| d.mean)),
                ("std", row(|d| d.std)),
                ("min", row(|d| d.min)),
                ("25%", row(|d| d.p25)),
                ("50%", row(|d| d.p50)),
                ("75%", row(|d| d.p75)),
                ("max", row(|d| d.max)),
            ],
        )
    }
}

impl CategoricalSummary {
    pub fn get(&self, column: &str) -> Option<&CategoricalDescribe> {
        self.0.iter().find(|d| d.column == column)
    }

    pub fn write_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let names: Vec<&str> = self.0.iter().map(|d| d.column.as_str()).collect();
        write_describe(
            path,
            &names,
            vec![
                ("count", self.0.iter().map(|d| d.count.to_string()).collect()),
                ("unique", self.0.iter().map(|d| d.unique.to_string()).collect()),
                ("top", self.0.iter().map(|d| d.top.clone().unwrap_or_default()).collect()),
                ("freq", self.0.iter().map(|d| d.freq.to_string()).collect()),
            ],
        )
    }
}

impl fmt::Display for NumericSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<24} {:>8} {:>12} {:>12} {:>12} {:>12} {:>12} {:>12} {:>12}",
            "column", "count", "mean", "std", "min", "25%", "50%", "75%", "max"
        )?;
        let num = |v: Option<f64>| v.map_or_else(|| "NaN".to_string(), |x| format!("{x:.4}"));
        for d in &self.0 {
            writeln!(
                f,
                "{:<24} {:>8} {:>12} {:>12} {:>12} {:>12} {:>12} {:>12} {:>12}",
                d.column,
                d.count,
                num(d.mean),
                num(d.std),
                num(d.min),
                num(d.p25),
                num(d.p50),
                num(d.p75),
                num(d.max)
            )?;
        }
        Ok(())
    }
}

impl fmt::Display for CategoricalSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:<24} {:>8} {:>8} {:>24} {:>8}", "column", "count", "unique", "top", "freq")?;
        for d in &self.0 {
            let top = d.top.as_deref().unwrap_or("");
            writeln!(f, "{:<24} {:>8} {:>8} {top:>24} {:>8}", d.column, d.count, d.unique, d.freq)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use polars::df;

    use super::*;

    fn sample() -> DataFrame {
        df!(
            "TotalPremium" => &[Some(1.0), Some(2.0), Some(3.0), Some(4.0), None],
            "Province" => &["Gauteng", "KZN", "Gauteng", "KZN", "Limpopo"],
        )
        .unwrap()
    }

    #[test]
    fn overview_counts_missing() {
        let overview = dataset_overview(&sample());
        assert_eq!(overview.shape, (5, 2));
        assert_eq!(overview.columns[0].dtype, "float64");
        assert_eq!(overview.columns[0].missing, 1);
        assert_eq!(overview.columns[1].non_null, 5);
        assert_eq!(overview.columns[1].dtype, "object");

        let text = overview.to_string();
        for section in ["--- SHAPE ---", "--- COLUMNS ---", "--- INFO ---", "--- MISSING VALUES ---"] {
            assert!(text.contains(section), "missing {section}");
        }
        assert!(text.contains("['TotalPremium', 'Province']"));
    }

    #[test]
    fn quartiles_interpolate_linearly() {
        let (numeric, _) = summary_statistics(&sample(), None).unwrap();
        let d = numeric.get("TotalPremium").unwrap();
        assert_eq!(d.count, 4);
        assert_eq!(d.min, Some(1.0));
        assert_eq!(d.p25, Some(1.75));
        assert_eq!(d.p50, Some(2.5));
        assert_eq!(d.p75, Some(3.25));
        assert!((d.std.unwrap() - (5.0f64 / 3.0).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn single_value_has_no_std() {
        let df = df!("x" => &[Some(7.0), None]).unwrap();
        let d = describe_numeric(&df, "x").unwrap();
        assert_eq!(d.count, 1);
        assert_eq!(d.std, None);
        assert_eq!(d.p75, Some(7.0));
    }

    #[test]
    fn empty_column_describes_as_undefined() {
        let df = df!("x" => &[None::<f64>, None]).unwrap();
        let d = describe_numeric(&df, "x").unwrap();
        assert_eq!(d.count, 0);
        assert_eq!((d.mean, d.p50, d.max), (None, None, None));
    }

    #[test]
    fn categorical_top_prefers_first_seen_on_ties() {
        let (_, categorical) = summary_statistics(&sample(), None).unwrap();
        let d = categorical.get("Province").unwrap();
        assert_eq!((d.count, d.unique, d.freq), (5, 3, 2));
        assert_eq!(d.top.as_deref(), Some("Gauteng"));
    }

    #[test]
    fn value_counts_skip_missing() {
        let df = df!("Gender" => &[Some("F"), None, Some("M"), Some("M")]).unwrap();
        let counts = value_counts(&df, "Gender").unwrap();
        assert_eq!(counts, vec![(GroupKey::from("M"), 2), (GroupKey::from("F"), 1)]);
    }

    #[test]
    fn summaries_are_written_in_describe_layout() {
        let dir = tempfile::tempdir().unwrap();
        summary_statistics(&sample(), Some(dir.path())).unwrap();

        let numeric = std::fs::read_to_string(dir.path().join("numeric_summary.csv")).unwrap();
        let lines: Vec<&str> = numeric.lines().collect();
        assert_eq!(lines[0], ",TotalPremium");
        assert_eq!(lines[1], "count,4");
        assert_eq!(lines[5], "25%,1.75");

        let categorical = std::fs::read_to_string(dir.path().join("categorical_summary.csv")).unwrap();
        assert_eq!(
            categorical.lines().collect::<Vec<_>>(),
            vec![",Province", "count,5", "unique,3", "top,Gauteng", "freq,2"]
        );
    }
}
