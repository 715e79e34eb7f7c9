use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Parser;
use polars::prelude::DataFrame;
use serde::Serialize;

use claimstat::aggregate::{self, GroupAggregate};
use claimstat::config::AnalysisConfig;
use claimstat::frame;
use claimstat::hypothesis::{self, TestError, pretty_interpret};
use claimstat::io::load_data;
use claimstat::kpi::prepare_kpis;
use claimstat::overview::{dataset_overview, summary_statistics};
use claimstat::plots;
use claimstat::types::GroupKey;

#[derive(Parser, Debug)]
#[command(author, version, about = "Exploratory analysis and hypothesis tests for insurance claims", long_about = None)]
struct Args {
    /// Delimited input file with a header row.
    #[arg(long)]
    input: PathBuf,

    /// Field separator of the input file.
    #[arg(long, default_value_t = '|')]
    sep: char,

    /// JSON file overriding the canonical analysis config.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory for summaries, plots, group KPIs and test results.
    #[arg(long)]
    output_dir: Option<PathBuf>,

    #[arg(long, default_value = "Province")]
    group_col: String,

    /// First group of the pairwise tests (default: largest group).
    #[arg(long)]
    group_a: Option<String>,

    /// Second group of the pairwise tests (default: second largest group).
    #[arg(long)]
    group_b: Option<String>,

    /// KPI compared by the Kruskal-Wallis and two-sample tests.
    #[arg(long, default_value = "Margin")]
    numeric_col: String,

    #[arg(long)]
    min_count: Option<usize>,

    #[arg(long)]
    alpha: Option<f64>,

    /// Columns to draw distribution plots for.
    #[arg(long, value_delimiter = ',')]
    plot_numeric: Vec<String>,

    /// Columns to draw bar charts for.
    #[arg(long, value_delimiter = ',')]
    plot_categorical: Vec<String>,
}

#[derive(Serialize)]
struct HypothesisReport {
    group_col: String,
    numeric_col: String,
    alpha: f64,
    chi2_frequency: serde_json::Value,
    proportion_ztest: serde_json::Value,
    kruskal: serde_json::Value,
    two_sample: serde_json::Value,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => AnalysisConfig::from_json_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => AnalysisConfig::canonical(),
    };
    if let Some(min_count) = args.min_count {
        config.min_count = min_count;
    }
    if let Some(alpha) = args.alpha {
        config.alpha = alpha;
    }
    if !args.sep.is_ascii() {
        bail!("--sep must be a single ASCII character, got {:?}", args.sep);
    }

    let raw = load_data(&args.input, args.sep as u8)
        .with_context(|| format!("failed to load {}", args.input.display()))?;
    let out_dir = args.output_dir.as_deref();

    // ── Overview ──────────────────────────────────────────────────────────────
    println!("{}", dataset_overview(&raw));
    let (numeric, categorical) = summary_statistics(&raw, out_dir)?;
    println!("\n=== Numeric summary ===\n{numeric}");
    println!("=== Categorical summary ===\n{categorical}");

    // ── Plots ─────────────────────────────────────────────────────────────────
    if let Some(dir) = out_dir {
        draw_plots(&raw, dir, &args, &config);
    }

    // ── KPIs and aggregation ──────────────────────────────────────────────────
    let table = prepare_kpis(&raw)?;
    let groups = aggregate::agg_by_group(&table, &args.group_col, config.min_count)?;
    print_aggregates(&args.group_col, &groups);
    if let Some(dir) = out_dir {
        let path = dir.join(format!("group_kpis_{}.csv", args.group_col));
        aggregate::write_aggregates(&path, &groups)?;
        log::info!("Group KPIs saved to {}", path.display());
    }

    // ── Hypothesis tests ──────────────────────────────────────────────────────
    let report = run_tests(&table, &args, &config, &groups)?;
    if let Some(dir) = out_dir {
        let path = dir.join("hypothesis_results.json");
        let writer = BufWriter::new(File::create(&path)?);
        serde_json::to_writer_pretty(writer, &report)?;
        log::info!("Hypothesis results saved to {}", path.display());
    }
    Ok(())
}

/// Rendering needs system fonts; a failed chart is reported and skipped.
fn draw_plots(raw: &DataFrame, dir: &Path, args: &Args, config: &AnalysisConfig) {
    let numeric: Vec<&str> = args.plot_numeric.iter().map(String::as_str).collect();
    let categorical: Vec<&str> = args.plot_categorical.iter().map(String::as_str).collect();

    let outcomes = [
        ("missing values", plots::plot_missing_values(raw, Some(dir), &config.plot).map(|_| ())),
        ("correlation", plots::plot_correlation(raw, Some(dir), &config.plot).map(|_| ())),
        ("distributions", plots::plot_distribution(raw, &numeric, Some(dir), &config.plot).map(|_| ())),
        ("bar charts", plots::plot_categorical(raw, &categorical, Some(dir), &config.plot).map(|_| ())),
    ];
    for (what, outcome) in outcomes {
        if let Err(e) = outcome {
            log::warn!("{what} plot failed: {e}");
        }
    }
}

fn print_aggregates(group_col: &str, groups: &[GroupAggregate]) {
    let num = |v: Option<f64>| v.map_or_else(|| "-".to_string(), |x| format!("{x:.2}"));
    println!("\n=== KPIs by {group_col} ===");
    println!(
        "  {:<24} {:>10} {:>9} {:>10} {:>14} {:>10} {:>12}",
        "group", "policies", "claims", "frequency", "severity", "loss ratio", "margin"
    );
    for g in groups {
        println!(
            "  {:<24} {:>10} {:>9} {:>10.4} {:>14} {:>10} {:>12}",
            g.group.to_string(),
            g.n_policies,
            g.n_claims,
            g.claim_freq,
            num(g.mean_claim_severity),
            num(g.mean_lossratio),
            num(g.mean_margin)
        );
    }
}

fn print_outcome<T>(
    title: &str,
    outcome: &std::result::Result<T, TestError>,
    alpha: f64,
    line: impl Fn(&T) -> (f64, f64, String),
) {
    println!("\n--- {title} ---");
    match outcome {
        Ok(result) => {
            let (statistic, pvalue, detail) = line(result);
            println!("  statistic = {statistic:.4}  {detail}");
            println!("  {}", pretty_interpret(pvalue, alpha));
        }
        Err(e) => println!("  skipped: {e}"),
    }
}

/// The two groups compared pairwise: from the command line, else the two
/// largest groups that survived aggregation.
fn pair(df: &DataFrame, args: &Args, groups: &[GroupAggregate]) -> Option<(GroupKey, GroupKey)> {
    let column = df.column(&args.group_col).ok()?;
    let from_arg = |raw: &Option<String>, fallback: usize| match raw {
        Some(s) => Some(frame::key_from_str(column, s)),
        None => groups.get(fallback).map(|g| g.group.clone()),
    };
    Some((from_arg(&args.group_a, 0)?, from_arg(&args.group_b, 1)?))
}

fn run_tests(
    table: &DataFrame,
    args: &Args,
    config: &AnalysisConfig,
    groups: &[GroupAggregate],
) -> Result<HypothesisReport> {
    let group_col = args.group_col.as_str();
    let numeric_col = args.numeric_col.as_str();
    let alpha = config.alpha;

    let chi2 = hypothesis::chi2_test_frequency(table, group_col, config.min_count);
    print_outcome(&format!("Chi-square: claim frequency by {group_col}"), &chi2, alpha, |r| {
        (r.statistic, r.pvalue, format!("dof = {}  groups = {}", r.dof, r.groups_used.len()))
    });

    let kruskal = hypothesis::kruskal_test_numeric(table, group_col, numeric_col, config.min_count);
    print_outcome(&format!("Kruskal-Wallis: {numeric_col} by {group_col}"), &kruskal, alpha, |r| {
        (r.statistic, r.pvalue, format!("groups = {}", r.groups_used.len()))
    });

    let (ztest, two_sample) = match pair(table, args, groups) {
        Some((a, b)) => {
            let ztest = hypothesis::proportion_ztest_pair(table, group_col, &a, &b);
            print_outcome(&format!("Proportion z-test: claim frequency {a} vs {b}"), &ztest, alpha, |r| {
                (r.statistic, r.pvalue, format!("count = {:?}  nobs = {:?}", r.count, r.nobs))
            });

            let two_sample =
                hypothesis::ttest_or_mannwhitney(table, group_col, &a, &b, numeric_col, &config.two_sample);
            print_outcome(&format!("Two-sample: {numeric_col} {a} vs {b}"), &two_sample, alpha, |r| {
                (r.statistic, r.pvalue, format!("{}  n_a = {}  n_b = {}", r.test, r.n_a, r.n_b))
            });
            (hypothesis::report(&ztest)?, hypothesis::report(&two_sample)?)
        }
        None => {
            log::warn!("fewer than two groups to compare; pairwise tests skipped");
            let skipped = serde_json::json!({ "error": "no pair of groups to compare" });
            (skipped.clone(), skipped)
        }
    };

    Ok(HypothesisReport {
        group_col: group_col.to_string(),
        numeric_col: numeric_col.to_string(),
        alpha,
        chi2_frequency: hypothesis::report(&chi2)?,
        proportion_ztest: ztest,
        kruskal: hypothesis::report(&kruskal)?,
        two_sample,
    })
}
