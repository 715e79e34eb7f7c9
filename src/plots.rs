use std::path::{Path, PathBuf};

use plotters::prelude::*;
use polars::prelude::{DataFrame, DataType, IntoLazy, col};
use rayon::prelude::*;

use crate::config::PlotConfig;
use crate::error::Result;
use crate::frame;
use crate::overview;

const KDE_POINTS: usize = 200;
const BAR_COLOR: RGBColor = RGBColor(76, 114, 176);
const KDE_COLOR: RGBColor = RGBColor(221, 132, 82);
const MISSING_COLOR: RGBColor = RGBColor(250, 235, 215);
const PRESENT_COLOR: RGBColor = RGBColor(20, 20, 60);

fn output_path(dir: &Path, file_name: &str) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    Ok(dir.join(file_name))
}

fn segment_label(labels: &[String], v: &SegmentValue<u32>) -> String {
    match v {
        SegmentValue::CenterOf(i) => labels.get(*i as usize).cloned().unwrap_or_default(),
        _ => String::new(),
    }
}

fn lerp(a: RGBColor, b: RGBColor, t: f64) -> RGBColor {
    let mix = |x: u8, y: u8| (x as f64 + (y as f64 - x as f64) * t).round() as u8;
    RGBColor(mix(a.0, b.0), mix(a.1, b.1), mix(a.2, b.2))
}

// ── Missing values ────────────────────────────────────────────────────────────

/// Share of missing cells per (row bucket, column).
#[derive(Debug, Clone, PartialEq)]
pub struct MissingMatrix {
    pub columns: Vec<String>,
    /// Rows folded into each bucket (the last bucket may hold fewer).
    pub rows_per_bucket: usize,
    /// `fractions[bucket][column]`, each in `0.0..=1.0`.
    pub fractions: Vec<Vec<f64>>,
}

fn missing_matrix(df: &DataFrame, max_buckets: usize) -> MissingMatrix {
    let n_rows = df.height();
    let buckets = n_rows.min(max_buckets.max(1));
    let rows_per_bucket = if buckets == 0 { 0 } else { n_rows.div_ceil(buckets) };
    let masks: Vec<Vec<bool>> = df.get_columns().iter().map(frame::null_mask).collect();

    let fractions = (0..n_rows)
        .step_by(rows_per_bucket.max(1))
        .map(|start| {
            let end = (start + rows_per_bucket).min(n_rows);
            masks
                .iter()
                .map(|mask| mask[start..end].iter().filter(|&&m| m).count() as f64 / (end - start) as f64)
                .collect()
        })
        .collect();

    MissingMatrix {
        columns: df.get_columns().iter().map(|c| c.name().to_string()).collect(),
        rows_per_bucket,
        fractions,
    }
}

fn draw_missing(matrix: &MissingMatrix, path: &Path, size: (u32, u32)) -> Result<()> {
    let n_cols = matrix.columns.len() as u32;
    let n_buckets = matrix.fractions.len() as u32;
    let root = BitMapBackend::new(path, size).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Missing Value Heatmap", ("sans-serif", 24))
        .margin(10)
        .x_label_area_size(60)
        .y_label_area_size(60)
        .build_cartesian_2d((0..n_cols).into_segmented(), 0..n_buckets.max(1))?;

    let rows_per_bucket = matrix.rows_per_bucket as u32;
    chart
        .configure_mesh()
        .disable_mesh()
        .x_labels(matrix.columns.len())
        .x_label_formatter(&|v| segment_label(&matrix.columns, v))
        .y_label_formatter(&|b| (n_buckets.saturating_sub(*b) * rows_per_bucket).to_string())
        .y_desc("row")
        .draw()?;

    chart.draw_series(matrix.fractions.iter().enumerate().flat_map(|(bucket, row)| {
        // first rows at the top
        let y = n_buckets - 1 - bucket as u32;
        row.iter().enumerate().map(move |(col, &frac)| {
            let col = col as u32;
            Rectangle::new(
                [(SegmentValue::Exact(col), y), (SegmentValue::Exact(col + 1), y + 1)],
                lerp(PRESENT_COLOR, MISSING_COLOR, frac).filled(),
            )
        })
    }))?;

    root.present()?;
    Ok(())
}

pub fn plot_missing_values(df: &DataFrame, save_dir: Option<&Path>, config: &PlotConfig) -> Result<MissingMatrix> {
    let matrix = missing_matrix(df, config.missing_size.1 as usize);
    if let Some(dir) = save_dir {
        let path = output_path(dir, "missing_values_heatmap.png")?;
        draw_missing(&matrix, &path, config.missing_size)?;
        log::info!("Missing value heatmap saved to {}", path.display());
    }
    Ok(matrix)
}

// ── Correlation ───────────────────────────────────────────────────────────────

/// Pearson correlations between numeric columns. `None` where fewer than two
/// complete pairs exist or either side is constant.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelationMatrix {
    pub columns: Vec<String>,
    pub values: Vec<Vec<Option<f64>>>,
}

impl CorrelationMatrix {
    pub fn get(&self, a: &str, b: &str) -> Option<f64> {
        let i = self.columns.iter().position(|c| c == a)?;
        let j = self.columns.iter().position(|c| c == b)?;
        self.values[i][j]
    }
}

/// Pearson correlation of `a` and `b` over the rows where both are present.
fn pearson(df: &DataFrame, a: &str, b: &str) -> Result<Option<f64>> {
    let x = || col(a).cast(DataType::Float64);
    let y = || col(b).cast(DataType::Float64);
    let dx = || x() - x().mean();
    let dy = || y() - y().mean();
    let sums = df
        .clone()
        .lazy()
        .filter(x().is_not_null().and(y().is_not_null()))
        .select([
            x().count().cast(DataType::Float64).alias("n"),
            (dx() * dy()).sum().alias("sxy"),
            (dx() * dx()).sum().alias("sxx"),
            (dy() * dy()).sum().alias("syy"),
        ])
        .collect()?;

    let sum = |name: &str| -> Result<f64> {
        Ok(frame::f64_values(sums.column(name)?)?.first().copied().flatten().unwrap_or(0.0))
    };
    let (n, sxy, sxx, syy) = (sum("n")?, sum("sxy")?, sum("sxx")?, sum("syy")?);
    if n < 2.0 || sxx == 0.0 || syy == 0.0 {
        return Ok(None);
    }
    Ok(Some((sxy / (sxx * syy).sqrt()).clamp(-1.0, 1.0)))
}

fn correlation_matrix(df: &DataFrame) -> Result<CorrelationMatrix> {
    let columns: Vec<String> = df
        .get_columns()
        .iter()
        .filter(|c| frame::is_numeric(c.dtype()))
        .map(|c| c.name().to_string())
        .collect();
    let mut values = vec![vec![None; columns.len()]; columns.len()];
    for i in 0..columns.len() {
        for j in i..columns.len() {
            let r = pearson(df, &columns[i], &columns[j])?;
            values[i][j] = r;
            values[j][i] = r;
        }
    }
    Ok(CorrelationMatrix { columns, values })
}

/// Diverging blue-white-red scale over `-1.0..=1.0`.
fn coolwarm(r: Option<f64>) -> RGBColor {
    const COLD: RGBColor = RGBColor(59, 76, 192);
    const NEUTRAL: RGBColor = RGBColor(221, 221, 221);
    const WARM: RGBColor = RGBColor(180, 4, 38);
    match r {
        None => WHITE,
        Some(r) if r < 0.0 => lerp(NEUTRAL, COLD, -r),
        Some(r) => lerp(NEUTRAL, WARM, r),
    }
}

fn draw_correlation(matrix: &CorrelationMatrix, path: &Path, size: (u32, u32)) -> Result<()> {
    let n = matrix.columns.len() as u32;
    let root = BitMapBackend::new(path, size).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Correlation Heatmap", ("sans-serif", 24))
        .margin(10)
        .x_label_area_size(80)
        .y_label_area_size(140)
        .build_cartesian_2d((0..n).into_segmented(), (0..n).into_segmented())?;

    chart
        .configure_mesh()
        .disable_mesh()
        .x_labels(matrix.columns.len())
        .y_labels(matrix.columns.len())
        .x_label_formatter(&|v| segment_label(&matrix.columns, v))
        .y_label_formatter(&|v| segment_label(&matrix.columns, v))
        .draw()?;

    chart.draw_series(matrix.values.iter().enumerate().flat_map(|(i, row)| {
        row.iter().enumerate().map(move |(j, &r)| {
            let (x, y) = (j as u32, i as u32);
            Rectangle::new(
                [(SegmentValue::Exact(x), SegmentValue::Exact(y)), (SegmentValue::Exact(x + 1), SegmentValue::Exact(y + 1))],
                coolwarm(r).filled(),
            )
        })
    }))?;

    root.present()?;
    Ok(())
}

pub fn plot_correlation(df: &DataFrame, save_dir: Option<&Path>, config: &PlotConfig) -> Result<CorrelationMatrix> {
    let matrix = correlation_matrix(df)?;
    if let Some(dir) = save_dir {
        if matrix.columns.is_empty() {
            log::warn!("no numeric columns; correlation heatmap skipped");
        } else {
            let path = output_path(dir, "correlation_heatmap.png")?;
            draw_correlation(&matrix, &path, config.correlation_size)?;
            log::info!("Correlation heatmap saved to {}", path.display());
        }
    }
    Ok(matrix)
}

// ── Distributions ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Distribution {
    pub column: String,
    /// `counts.len() + 1` ascending edges; the last bin is closed on the right.
    pub bin_edges: Vec<f64>,
    pub counts: Vec<usize>,
    /// Gaussian KDE scaled to histogram counts, as `(x, count)` points. Empty
    /// when fewer than two distinct values exist.
    pub kde: Vec<(f64, f64)>,
}

fn sample_std(sorted: &[f64]) -> f64 {
    let n = sorted.len() as f64;
    let mean = sorted.iter().sum::<f64>() / n;
    (sorted.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
}

/// Linear-interpolated quantile of an ascending-sorted slice.
fn quantile(sorted: &[f64], p: f64) -> Option<f64> {
    let n = sorted.len();
    if n == 0 {
        return None;
    }
    let h = p.clamp(0.0, 1.0) * (n - 1) as f64;
    let lo = h.floor() as usize;
    let hi = (lo + 1).min(n - 1);
    let frac = h - lo as f64;
    Some(sorted[lo] * (1.0 - frac) + sorted[hi] * frac)
}

/// Bin count: the larger of Sturges' and Freedman-Diaconis' estimates, at
/// least one and at most `max_bins`.
fn bin_count(sorted: &[f64], max_bins: usize) -> usize {
    let n = sorted.len();
    if n < 2 {
        return 1;
    }
    let range = sorted[n - 1] - sorted[0];
    if range == 0.0 {
        return 1;
    }
    let sturges = (n as f64).log2().ceil() as usize + 1;
    let iqr = match (quantile(sorted, 0.75), quantile(sorted, 0.25)) {
        (Some(q3), Some(q1)) => q3 - q1,
        _ => 0.0,
    };
    let fd = if iqr > 0.0 {
        let width = 2.0 * iqr / (n as f64).cbrt();
        (range / width).ceil() as usize
    } else {
        0
    };
    sturges.max(fd).clamp(1, max_bins.max(1))
}

fn histogram(sorted: &[f64], bins: usize) -> (Vec<f64>, Vec<usize>) {
    let (mut lo, mut hi) = (sorted[0], sorted[sorted.len() - 1]);
    if lo == hi {
        lo -= 0.5;
        hi += 0.5;
    }
    let width = (hi - lo) / bins as f64;
    let edges: Vec<f64> = (0..=bins).map(|i| lo + width * i as f64).collect();
    let mut counts = vec![0; bins];
    for &v in sorted {
        let i = (((v - lo) / width).floor() as usize).min(bins - 1);
        counts[i] += 1;
    }
    (edges, counts)
}

fn kde(sorted: &[f64], bin_width: f64) -> Vec<(f64, f64)> {
    let n = sorted.len();
    if n < 2 {
        return Vec::new();
    }
    let std = sample_std(sorted);
    if std == 0.0 {
        return Vec::new();
    }
    // Scott's rule
    let bandwidth = std * (n as f64).powf(-0.2);
    let norm = 1.0 / (n as f64 * bandwidth * (2.0 * std::f64::consts::PI).sqrt());
    let (lo, hi) = (sorted[0], sorted[n - 1]);
    let step = (hi - lo) / (KDE_POINTS - 1) as f64;

    (0..KDE_POINTS)
        .map(|i| {
            let x = lo + step * i as f64;
            let density: f64 = sorted.iter().map(|v| (-0.5 * ((x - v) / bandwidth).powi(2)).exp()).sum::<f64>() * norm;
            (x, density * n as f64 * bin_width)
        })
        .collect()
}

fn distribution(name: &str, values: &[Option<f64>], max_bins: usize) -> Distribution {
    let mut sorted: Vec<f64> = values.iter().flatten().copied().collect();
    sorted.sort_by(f64::total_cmp);
    if sorted.is_empty() {
        return Distribution { column: name.to_string(), bin_edges: Vec::new(), counts: Vec::new(), kde: Vec::new() };
    }
    let bins = bin_count(&sorted, max_bins);
    let (bin_edges, counts) = histogram(&sorted, bins);
    let kde = kde(&sorted, bin_edges[1] - bin_edges[0]);
    Distribution { column: name.to_string(), bin_edges, counts, kde }
}

fn draw_distribution(dist: &Distribution, path: &Path, size: (u32, u32)) -> Result<()> {
    let lo = dist.bin_edges[0];
    let hi = dist.bin_edges[dist.bin_edges.len() - 1];
    let peak = dist
        .counts
        .iter()
        .map(|&c| c as f64)
        .chain(dist.kde.iter().map(|p| p.1))
        .fold(0.0, f64::max);

    let root = BitMapBackend::new(path, size).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(format!("Distribution of {}", dist.column), ("sans-serif", 20))
        .margin(10)
        .x_label_area_size(30)
        .y_label_area_size(50)
        .build_cartesian_2d(lo..hi, 0.0..(peak * 1.05).max(1.0))?;

    chart.configure_mesh().x_desc(dist.column.as_str()).y_desc("Count").draw()?;

    chart.draw_series(dist.counts.iter().enumerate().map(|(i, &count)| {
        Rectangle::new([(dist.bin_edges[i], 0.0), (dist.bin_edges[i + 1], count as f64)], BAR_COLOR.mix(0.6).filled())
    }))?;
    if !dist.kde.is_empty() {
        chart.draw_series(LineSeries::new(dist.kde.iter().copied(), KDE_COLOR.stroke_width(2)))?;
    }

    root.present()?;
    Ok(())
}

/// Histogram plus KDE for each of `columns`, computed and rendered in parallel.
pub fn plot_distribution(
    df: &DataFrame,
    columns: &[&str],
    save_dir: Option<&Path>,
    config: &PlotConfig,
) -> Result<Vec<Distribution>> {
    let inputs = columns
        .iter()
        .map(|&name| Ok((name, frame::numeric(df, name)?)))
        .collect::<Result<Vec<_>>>()?;

    inputs
        .par_iter()
        .map(|(name, values)| {
            let dist = distribution(name, values, config.max_bins);
            if let Some(dir) = save_dir {
                if dist.counts.is_empty() {
                    log::warn!("{name}: no numeric values; distribution plot skipped");
                } else {
                    let path = output_path(dir, &format!("dist_{name}.png"))?;
                    draw_distribution(&dist, &path, config.distribution_size)?;
                    log::debug!("distribution of {name} saved to {}", path.display());
                }
            }
            Ok(dist)
        })
        .collect()
}

// ── Categorical counts ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct ValueCounts {
    pub column: String,
    /// Most frequent first, ties by value; at most `categorical_top_n` entries.
    pub counts: Vec<(String, usize)>,
}

fn value_counts(df: &DataFrame, name: &str, top_n: usize) -> Result<ValueCounts> {
    let mut counts = overview::value_counts(df, name)?;
    counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    counts.truncate(top_n);
    Ok(ValueCounts {
        column: name.to_string(),
        counts: counts.into_iter().map(|(key, n)| (key.to_string(), n)).collect(),
    })
}

fn draw_bars(counts: &ValueCounts, path: &Path, size: (u32, u32)) -> Result<()> {
    let labels: Vec<String> = counts.counts.iter().map(|c| c.0.clone()).collect();
    let max = counts.counts.iter().map(|c| c.1).max().unwrap_or(0) as u32;

    let root = BitMapBackend::new(path, size).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(format!("Counts of {}", counts.column), ("sans-serif", 20))
        .margin(10)
        .x_label_area_size(60)
        .y_label_area_size(50)
        .build_cartesian_2d((0..labels.len() as u32).into_segmented(), 0..(max + max / 10 + 1))?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(labels.len())
        .x_label_formatter(&|v| segment_label(&labels, v))
        .x_desc(counts.column.as_str())
        .y_desc("Count")
        .draw()?;

    chart.draw_series(
        Histogram::vertical(&chart)
            .style(BAR_COLOR.filled())
            .margin(4)
            .data(counts.counts.iter().enumerate().map(|(i, c)| (i as u32, c.1 as u32))),
    )?;

    root.present()?;
    Ok(())
}

/// Bar chart of the most frequent values of each of `columns`.
pub fn plot_categorical(
    df: &DataFrame,
    columns: &[&str],
    save_dir: Option<&Path>,
    config: &PlotConfig,
) -> Result<Vec<ValueCounts>> {
    let mut result = Vec::with_capacity(columns.len());
    for &name in columns {
        let counts = value_counts(df, name, config.categorical_top_n)?;
        if let Some(dir) = save_dir {
            if counts.counts.is_empty() {
                log::warn!("{name}: no values; bar chart skipped");
            } else {
                let path = output_path(dir, &format!("bar_{name}.png"))?;
                draw_bars(&counts, &path, config.categorical_size)?;
                log::debug!("bar chart of {name} saved to {}", path.display());
            }
        }
        result.push(counts);
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use polars::df;

    use super::*;
    use crate::error::Error;

    #[test]
    fn missing_matrix_buckets_rows() {
        let df = df!(
            "a" => &[None, Some(1.0), Some(2.0), None, Some(3.0)],
            "b" => &["x", "y", "z", "w", "v"],
        )
        .unwrap();
        let m = missing_matrix(&df, 2);
        assert_eq!(m.rows_per_bucket, 3);
        assert_eq!(m.fractions.len(), 2);
        assert!((m.fractions[0][0] - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(m.fractions[1][0], 0.5);
        assert_eq!(m.fractions[0][1], 0.0);

        let full = missing_matrix(&df, 600);
        assert_eq!(full.rows_per_bucket, 1);
        assert_eq!(full.fractions.len(), 5);
        assert_eq!(full.fractions[3][0], 1.0);
    }

    #[test]
    fn pearson_uses_complete_pairs() {
        let df = df!(
            "x" => &[Some(1.0), Some(2.0), Some(3.0), None, Some(4.0)],
            "y" => &[2.0, 4.0, 6.0, 100.0, 8.0],
            "flat" => &[5.0; 5],
        )
        .unwrap();
        assert!((pearson(&df, "x", "y").unwrap().unwrap() - 1.0).abs() < 1e-12);
        assert_eq!(pearson(&df, "x", "flat").unwrap(), None);
    }

    #[test]
    fn correlation_covers_numeric_columns_only() {
        let df = df!(
            "TotalPremium" => &[1.0, 2.0, 3.0],
            "Province" => &["a", "b", "c"],
            "TotalClaims" => &[3i64, 2, 1],
        )
        .unwrap();
        let m = plot_correlation(&df, None, &PlotConfig::default()).unwrap();
        assert_eq!(m.columns, vec!["TotalPremium", "TotalClaims"]);
        assert!((m.get("TotalPremium", "TotalClaims").unwrap() + 1.0).abs() < 1e-12);
        assert!((m.get("TotalPremium", "TotalPremium").unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn quantile_of_empty_slice_is_undefined() {
        assert_eq!(quantile(&[], 0.5), None);
        assert_eq!(quantile(&[1.0, 2.0, 3.0, 4.0], 0.25), Some(1.75));
        assert_eq!(bin_count(&[], 100), 1);
    }

    #[test]
    fn bin_count_respects_bounds() {
        let sorted: Vec<f64> = (0..1000).map(f64::from).collect();
        // Sturges gives 11; Freedman-Diaconis gives 10 on uniform data
        assert_eq!(bin_count(&sorted, 100), 11);
        let mut skewed: Vec<f64> = (0..1000).map(|i| if i < 990 { f64::from(i % 10) } else { 1e6 }).collect();
        skewed.sort_by(f64::total_cmp);
        assert_eq!(bin_count(&skewed, 100), 100);
        assert_eq!(bin_count(&[3.0, 3.0, 3.0], 100), 1);
    }

    #[test]
    fn histogram_counts_every_value() {
        let dist = distribution("x", &[Some(0.0), Some(1.0), Some(1.0), None, Some(2.0), Some(10.0)], 100);
        assert_eq!(dist.counts.iter().sum::<usize>(), 5);
        assert_eq!(dist.bin_edges.len(), dist.counts.len() + 1);
        assert_eq!(dist.bin_edges[0], 0.0);
        assert_eq!(*dist.bin_edges.last().unwrap(), 10.0);
        assert_eq!(*dist.counts.last().unwrap(), 1);
        assert_eq!(dist.kde.len(), KDE_POINTS);
    }

    #[test]
    fn kde_area_matches_sample_size() {
        let values: Vec<Option<f64>> = (0..500).map(|i| Some(((i * 37) % 101) as f64)).collect();
        let dist = distribution("x", &values, 100);
        let width = dist.bin_edges[1] - dist.bin_edges[0];
        // trapezoid area in count units, divided back by the bin width
        let area: f64 = dist.kde.windows(2).map(|w| (w[1].0 - w[0].0) * (w[0].1 + w[1].1) / 2.0).sum::<f64>() / width;
        // tails beyond the data range are cut off
        assert!(area > 400.0 && area < 500.0, "area = {area}");
    }

    #[test]
    fn constant_column_has_one_bin_and_no_kde() {
        let dist = distribution("x", &[Some(4.0), Some(4.0)], 100);
        assert_eq!(dist.counts, vec![2]);
        assert_eq!(dist.bin_edges, vec![3.5, 4.5]);
        assert!(dist.kde.is_empty());
    }

    #[test]
    fn value_counts_top_n_with_ties_by_value() {
        let df = df!("Province" => &[Some("b"), Some("a"), Some("c"), Some("a"), None, Some("b"), Some("d")]).unwrap();
        let counts = value_counts(&df, "Province", 3).unwrap();
        assert_eq!(
            counts.counts,
            vec![("a".to_string(), 2), ("b".to_string(), 2), ("c".to_string(), 1)]
        );
    }

    #[test]
    fn numeric_categories_render_as_labels() {
        let df = df!("Cylinders" => &[4.0, 2.5, 4.0]).unwrap();
        let counts = value_counts(&df, "Cylinders", 20).unwrap();
        assert_eq!(counts.counts, vec![("4".to_string(), 2), ("2.5".to_string(), 1)]);
    }

    #[test]
    fn unknown_column_is_an_error() {
        let df = df!("a" => &[1.0]).unwrap();
        let config = PlotConfig::default();
        assert!(matches!(
            plot_distribution(&df, &["nope"], None, &config),
            Err(Error::ColumnNotFound(c)) if c == "nope"
        ));
        assert!(matches!(plot_categorical(&df, &["nope"], None, &config), Err(Error::ColumnNotFound(_))));
    }
}
